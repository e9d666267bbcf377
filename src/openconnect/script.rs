//! OpenConnect script mode handler
//!
//! Each invocation is one lifecycle event. The kill switch mode comes from
//! the config file, so `enable`/`disable` run earlier decide what happens here.
//!
//! # Error Handling
//!
//! OpenConnect expects exit code 0 for success, non-zero for failure. A
//! failure during `pre-init` aborts the connection attempt, which is what we
//! want when the server cannot be allowed through the block.

use crate::config::Config;
use crate::controller::{LifecycleEvent, ModeController};
use crate::engine::ReconciliationAction;
use crate::error::KillSwitchError;
use crate::openconnect::env::{EnvError, OpenConnectEnv, Reason};
use crate::platform::NetworkBackend;
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Environment parsing failed: {0}")]
    EnvError(#[from] EnvError),
    #[error("Kill switch error: {0}")]
    KillSwitch(#[from] KillSwitchError),
}

impl From<Reason> for LifecycleEvent {
    fn from(reason: Reason) -> Self {
        match reason {
            Reason::PreInit | Reason::AttemptReconnect => LifecycleEvent::Connecting,
            Reason::Connect | Reason::Reconnect => LifecycleEvent::Connected,
            Reason::Disconnect => LifecycleEvent::Disconnected,
        }
    }
}

/// VPNGATEWAY wins; the configured server covers releases that omit it
pub fn resolve_server(env: &OpenConnectEnv, config: &Config) -> Option<IpAddr> {
    env.gateway.or(config.openconnect.server)
}

/// Main entry point for script mode
///
/// Called when `nm-killswitch script` is invoked by OpenConnect.
pub fn handle_script_mode<B: NetworkBackend>(
    controller: &ModeController<B>,
    config: &Config,
) -> Result<Option<ReconciliationAction>, ScriptError> {
    let env = OpenConnectEnv::from_env()?;
    handle_event(controller, config, &env)
}

pub fn handle_event<B: NetworkBackend>(
    controller: &ModeController<B>,
    config: &Config,
    env: &OpenConnectEnv,
) -> Result<Option<ReconciliationAction>, ScriptError> {
    let event = LifecycleEvent::from(env.reason);
    let server = resolve_server(env, config);

    info!(
        reason = ?env.reason,
        ?event,
        tunnel = env.tunnel_device.as_deref().unwrap_or("-"),
        "Script mode"
    );
    if server.is_none() {
        debug!("No VPN server address available");
    }

    Ok(controller.on_lifecycle_event(event, server)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::KillSwitchMode;
    use crate::engine::{Posture, ReconciliationEngine};
    use crate::platform::memory::MemoryBackend;

    fn env(reason: Reason, gateway: Option<&str>) -> OpenConnectEnv {
        OpenConnectEnv {
            reason,
            gateway: gateway.map(|g| g.parse().unwrap()),
            tunnel_device: Some("tun0".to_string()),
        }
    }

    fn controller(mode: KillSwitchMode) -> ModeController<MemoryBackend> {
        ModeController::new(ReconciliationEngine::new(MemoryBackend::new()), mode)
    }

    #[test]
    fn test_reason_to_event() {
        assert_eq!(LifecycleEvent::from(Reason::PreInit), LifecycleEvent::Connecting);
        assert_eq!(
            LifecycleEvent::from(Reason::AttemptReconnect),
            LifecycleEvent::Connecting
        );
        assert_eq!(LifecycleEvent::from(Reason::Connect), LifecycleEvent::Connected);
        assert_eq!(LifecycleEvent::from(Reason::Reconnect), LifecycleEvent::Connected);
        assert_eq!(
            LifecycleEvent::from(Reason::Disconnect),
            LifecycleEvent::Disconnected
        );
    }

    #[test]
    fn test_server_falls_back_to_config() {
        let mut config = Config::default();
        config.openconnect.server = Some("185.159.157.20".parse().unwrap());

        let from_env = env(Reason::PreInit, Some("185.159.157.10"));
        assert_eq!(
            resolve_server(&from_env, &config),
            Some("185.159.157.10".parse().unwrap())
        );

        let without = env(Reason::PreInit, None);
        assert_eq!(
            resolve_server(&without, &config),
            Some("185.159.157.20".parse().unwrap())
        );
    }

    #[test]
    fn test_full_script_lifecycle() {
        let config = Config::default();
        let controller = controller(KillSwitchMode::On);

        let action = handle_event(
            &controller,
            &config,
            &env(Reason::PreInit, Some("185.159.157.10")),
        )
        .unwrap();
        assert!(matches!(action, Some(ReconciliationAction::PreConnection(_))));
        assert_eq!(controller.status().unwrap().posture, Posture::ServerOnly);

        handle_event(&controller, &config, &env(Reason::Connect, None)).unwrap();
        assert_eq!(controller.status().unwrap().posture, Posture::FullLockdown);

        handle_event(&controller, &config, &env(Reason::Disconnect, None)).unwrap();
        assert_eq!(controller.status().unwrap().posture, Posture::Disabled);
    }

    #[test]
    fn test_preinit_without_any_server_fails() {
        let controller = controller(KillSwitchMode::Permanent);
        let result = handle_event(&controller, &Config::default(), &env(Reason::PreInit, None));

        assert!(matches!(
            result,
            Err(ScriptError::KillSwitch(KillSwitchError::MissingServerAddress))
        ));
    }

    #[test]
    fn test_mode_off_is_passive() {
        let controller = controller(KillSwitchMode::Off);
        let action = handle_event(
            &controller,
            &Config::default(),
            &env(Reason::PreInit, Some("185.159.157.10")),
        )
        .unwrap();

        assert_eq!(action, None);
        assert_eq!(controller.status().unwrap().posture, Posture::Disabled);
    }
}
