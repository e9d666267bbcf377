//! Mode controller: maps the user-facing switch and tunnel lifecycle events
//! onto reconciliation actions
//!
//! | mode      | event / call      | action                       |
//! |-----------|-------------------|------------------------------|
//! | any       | `enable`          | by tunnel state, see below   |
//! | any       | `disable`         | `Disable`                    |
//! | off       | any event         | none                         |
//! | on / perm | `connecting`      | `PreConnection(server)`      |
//! | on / perm | `connected`       | `PostConnection`             |
//! | on        | `disconnected`    | `Disable`                    |
//! | permanent | `disconnected`    | `SoftEnable`                 |
//! | on / perm | `disconnecting`, `error` | none                  |
//!
//! `enable` runs `PreConnection` while a tunnel is connecting and `SoftEnable`
//! otherwise. Once the tunnel is up the routed construct is usually gone, and
//! `SoftEnable` restores the full block from whatever is left.

use crate::engine::{KillSwitchStatus, ReconciliationAction, ReconciliationEngine};
use crate::error::KillSwitchError;
use crate::planner::validate_server_address;
use crate::platform::NetworkBackend;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KillSwitchMode {
    #[default]
    Off,
    On,
    Permanent,
}

/// VPN connection lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LifecycleEvent {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Down,
    Connecting(IpAddr),
    Up,
}

/// Decide which action, if any, an event calls for
pub fn action_for_event(
    mode: KillSwitchMode,
    event: LifecycleEvent,
    server: Option<IpAddr>,
) -> Result<Option<ReconciliationAction>, KillSwitchError> {
    if mode == KillSwitchMode::Off {
        return Ok(None);
    }

    let action = match event {
        LifecycleEvent::Connecting => {
            let server = server.ok_or(KillSwitchError::MissingServerAddress)?;
            Some(ReconciliationAction::PreConnection(validate_server_address(
                server,
            )?))
        }
        LifecycleEvent::Connected => Some(ReconciliationAction::PostConnection),
        LifecycleEvent::Disconnected if mode == KillSwitchMode::Permanent => {
            Some(ReconciliationAction::SoftEnable)
        }
        LifecycleEvent::Disconnected => Some(ReconciliationAction::Disable),
        LifecycleEvent::Disconnecting | LifecycleEvent::Error => None,
    };
    Ok(action)
}

/// Decide which action enabling the kill switch calls for
pub fn action_for_enable(tunnel: TunnelState) -> ReconciliationAction {
    match tunnel {
        TunnelState::Connecting(server) => ReconciliationAction::PreConnection(server),
        TunnelState::Down | TunnelState::Up => ReconciliationAction::SoftEnable,
    }
}

struct ControllerState<B> {
    engine: ReconciliationEngine<B>,
    mode: KillSwitchMode,
    tunnel: TunnelState,
}

/// Serializes every kill switch action behind one lock
///
/// Callers arriving while an action runs block until it finishes.
pub struct ModeController<B> {
    state: Mutex<ControllerState<B>>,
}

impl<B: NetworkBackend> ModeController<B> {
    pub fn new(engine: ReconciliationEngine<B>, mode: KillSwitchMode) -> Self {
        Self {
            state: Mutex::new(ControllerState {
                engine,
                mode,
                tunnel: TunnelState::Down,
            }),
        }
    }

    // A panic mid-action leaves the platform in whatever state it reached;
    // the next action re-reads it, so the poisoned guard is still usable.
    fn lock(&self) -> MutexGuard<'_, ControllerState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> KillSwitchMode {
        self.lock().mode
    }

    pub fn tunnel(&self) -> TunnelState {
        self.lock().tunnel
    }

    /// Seed the tunnel state when it is known from outside, e.g. a fresh process
    pub fn set_tunnel(&self, tunnel: TunnelState) {
        self.lock().tunnel = tunnel;
    }

    pub fn enable(&self, permanent: bool) -> Result<ReconciliationAction, KillSwitchError> {
        let mut state = self.lock();
        state.mode = if permanent {
            KillSwitchMode::Permanent
        } else {
            KillSwitchMode::On
        };

        let action = action_for_enable(state.tunnel);
        info!(mode = ?state.mode, %action, "Enabling kill switch");
        state.engine.run(action)?;
        Ok(action)
    }

    pub fn disable(&self) -> Result<ReconciliationAction, KillSwitchError> {
        let mut state = self.lock();
        state.mode = KillSwitchMode::Off;

        info!("Disabling kill switch");
        state.engine.run(ReconciliationAction::Disable)?;
        Ok(ReconciliationAction::Disable)
    }

    /// Feed a lifecycle event; returns the action that ran, if any
    pub fn on_lifecycle_event(
        &self,
        event: LifecycleEvent,
        server: Option<IpAddr>,
    ) -> Result<Option<ReconciliationAction>, KillSwitchError> {
        let mut state = self.lock();

        let action = action_for_event(state.mode, event, server)?;
        state.tunnel = match (event, action) {
            (LifecycleEvent::Connecting, Some(ReconciliationAction::PreConnection(server))) => {
                TunnelState::Connecting(server)
            }
            (LifecycleEvent::Connecting, _) => match server {
                Some(server) => TunnelState::Connecting(server),
                None => state.tunnel,
            },
            (LifecycleEvent::Connected, _) => TunnelState::Up,
            (LifecycleEvent::Disconnected | LifecycleEvent::Error, _) => TunnelState::Down,
            (LifecycleEvent::Disconnecting, _) => state.tunnel,
        };

        let Some(action) = action else {
            debug!(?event, mode = ?state.mode, "No kill switch action for event");
            return Ok(None);
        };

        info!(?event, %action, "Kill switch reacting to connection event");
        state.engine.run(action)?;
        Ok(Some(action))
    }

    pub fn status(&self) -> Result<KillSwitchStatus, KillSwitchError> {
        self.lock().engine.status()
    }
}
