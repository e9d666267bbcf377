//! Kill switch reconciliation engine
//!
//! Each action inspects the tracker and issues backend calls until its
//! target state holds, retrying up to [`MAX_ATTEMPTS`] times. Transitions are
//! ordered make-before-break: the construct being switched to is brought up
//! before the outgoing one is taken down, so outside of [`Disable`] there is
//! never a moment with no kill switch construct active.
//!
//! [`Disable`]: ReconciliationAction::Disable

use crate::construct::{ConstructKind, ConstructSpec};
use crate::error::{ActionKind, KillSwitchError};
use crate::planner::{RoutedStrategy, plan_routed, validate_server_address};
use crate::platform::{BackendError, NetworkBackend, ProbeState};
use crate::probe::ConnectivityGuard;
use crate::tracker::{InterfaceState, InterfaceStateTracker};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Upper bound on convergence attempts for a single action
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationAction {
    /// Allow traffic to the VPN server only, while the tunnel comes up
    PreConnection(IpAddr),
    /// Tunnel is up: restore the full block and drop the routed construct
    PostConnection,
    /// Full block right away, ready for a later tunnel
    SoftEnable,
    /// Remove both constructs
    Disable,
}

impl ReconciliationAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            ReconciliationAction::PreConnection(_) => ActionKind::PreConnection,
            ReconciliationAction::PostConnection => ActionKind::PostConnection,
            ReconciliationAction::SoftEnable => ActionKind::SoftEnable,
            ReconciliationAction::Disable => ActionKind::Disable,
        }
    }
}

impl fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationAction::PreConnection(server) => write!(f, "pre-connection({server})"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// What the current constructs amount to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Posture {
    Disabled,
    FullLockdown,
    ServerOnly,
    Inconsistent,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchStatus {
    pub blocking: InterfaceState,
    pub routed: InterfaceState,
    pub probe: ProbeState,
    pub posture: Posture,
}

impl KillSwitchStatus {
    /// True when the full block is in place
    pub fn is_active(&self) -> bool {
        self.blocking.exists && self.blocking.active
    }
}

fn posture(blocking: InterfaceState, routed: InterfaceState) -> Posture {
    match (blocking.active, routed.active) {
        (false, false) => Posture::Disabled,
        (true, false) => Posture::FullLockdown,
        (false, true) => Posture::ServerOnly,
        (true, true) => Posture::Inconsistent,
    }
}

/// Drives the blocking and routed constructs through the connection lifecycle
///
/// Methods take `&mut self`, so one engine runs one action at a time; share
/// it behind a mutex (see [`ModeController`](crate::controller::ModeController)).
pub struct ReconciliationEngine<B> {
    backend: B,
    tracker: InterfaceStateTracker,
}

impl<B: NetworkBackend> ReconciliationEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            tracker: InterfaceStateTracker::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run one action to a terminal outcome
    pub fn run(&mut self, action: ReconciliationAction) -> Result<(), KillSwitchError> {
        info!(%action, "Starting kill switch reconciliation");

        ConnectivityGuard::new(&self.backend).ensure_suppressed()?;

        let result = match action {
            ReconciliationAction::PreConnection(server) => self.pre_connection(server),
            ReconciliationAction::PostConnection => self.post_connection(false),
            ReconciliationAction::SoftEnable => self.soft_enable(),
            ReconciliationAction::Disable => self.disable(),
        };

        match &result {
            Ok(()) => info!(%action, "Kill switch reconciliation complete"),
            Err(e) => warn!(%action, error = %e, "Kill switch reconciliation failed"),
        }
        result
    }

    /// Read-only snapshot of the constructs and the connectivity check
    pub fn status(&mut self) -> Result<KillSwitchStatus, KillSwitchError> {
        self.refresh()?;
        let probe = self
            .backend
            .probe_state()
            .map_err(KillSwitchError::StateQuery)?;
        let blocking = self.state(ConstructKind::Blocking);
        let routed = self.state(ConstructKind::Routed);

        Ok(KillSwitchStatus {
            blocking,
            routed,
            probe,
            posture: posture(blocking, routed),
        })
    }

    /// Run `step` until it reports convergence, at most [`MAX_ATTEMPTS`] times
    ///
    /// A failed state query spends an attempt instead of aborting the action.
    /// Every other error is returned at once.
    fn converge<F>(&mut self, action: ActionKind, mut step: F) -> Result<(), KillSwitchError>
    where
        F: FnMut(&mut Self, u32) -> Result<bool, KillSwitchError>,
    {
        let mut query_failures = 0;
        let mut last_query_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match step(self, attempt) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(KillSwitchError::StateQuery(source)) => {
                    warn!(attempt, %action, error = %source, "Network state query failed, retrying");
                    query_failures += 1;
                    last_query_error = Some(KillSwitchError::StateQuery(source));
                }
                Err(e) => return Err(e),
            }
        }

        match last_query_error {
            Some(e) if query_failures == MAX_ATTEMPTS => Err(e),
            _ => Err(KillSwitchError::ReconciliationExhausted {
                action,
                attempts: MAX_ATTEMPTS,
            }),
        }
    }

    fn pre_connection(&mut self, server: IpAddr) -> Result<(), KillSwitchError> {
        let server = validate_server_address(server)?;
        let action = ActionKind::PreConnection;

        self.converge(action, |engine, attempt| {
            engine.refresh()?;
            let blocking = engine.state(ConstructKind::Blocking);
            let routed = engine.state(ConstructKind::Routed);

            if blocking.active && !routed.exists {
                engine.create_routed(server)?;
                engine.deactivate(action, ConstructKind::Blocking)?;
                info!(%server, attempt, "Kill switch now only allows the VPN server");
                return Ok(true);
            }
            if !blocking.active && routed.active {
                debug!("Routed kill switch already in place");
                return Ok(true);
            }

            warn!(
                attempt,
                ?blocking,
                ?routed,
                "Kill switch not ready for pre-connection, resetting to full block"
            );
            engine.ensure_blocking(action)?;
            // Stale routed constructs carry an old server; never patched in place.
            if routed.exists {
                engine.delete(action, ConstructKind::Routed)?;
            }
            Ok(false)
        })
    }

    fn post_connection(&mut self, from_soft_enable: bool) -> Result<(), KillSwitchError> {
        let action = if from_soft_enable {
            ActionKind::SoftEnable
        } else {
            ActionKind::PostConnection
        };

        self.converge(action, |engine, attempt| {
            engine.refresh()?;
            let blocking = engine.state(ConstructKind::Blocking);
            let routed = engine.state(ConstructKind::Routed);

            if !blocking.active && routed.active {
                engine.ensure_blocking(action)?;
                engine.delete(action, ConstructKind::Routed)?;
                info!(attempt, "Kill switch restored full block");
                return Ok(true);
            }
            if from_soft_enable && !routed.active {
                engine.ensure_blocking(action)?;
                return Ok(true);
            }
            if blocking.active && !routed.active {
                debug!("Blocking kill switch already in place");
                return Ok(true);
            }

            warn!(
                attempt,
                ?blocking,
                ?routed,
                "Kill switch not ready for post-connection, falling back to routed"
            );
            if blocking.active {
                engine.deactivate(action, ConstructKind::Blocking)?;
            }
            if !routed.exists {
                return Err(KillSwitchError::RoutedConstructMissing);
            }
            engine.activate(action, ConstructKind::Routed)?;
            Ok(false)
        })
    }

    fn soft_enable(&mut self) -> Result<(), KillSwitchError> {
        self.ensure_blocking(ActionKind::SoftEnable)?;
        self.post_connection(true)
    }

    fn disable(&mut self) -> Result<(), KillSwitchError> {
        self.delete(ActionKind::Disable, ConstructKind::Blocking)?;
        self.delete(ActionKind::Disable, ConstructKind::Routed)?;
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), KillSwitchError> {
        self.tracker.refresh(&self.backend)
    }

    fn state(&self, kind: ConstructKind) -> InterfaceState {
        self.tracker.state(kind)
    }

    /// Create the blocking construct if needed, then make sure it is active
    fn ensure_blocking(&mut self, action: ActionKind) -> Result<(), KillSwitchError> {
        self.refresh()?;
        if !self.state(ConstructKind::Blocking).exists {
            self.create(&ConstructSpec::blocking())
                .map_err(|source| KillSwitchError::Create {
                    action,
                    construct: ConstructKind::Blocking,
                    source,
                })?;
        }
        self.activate(action, ConstructKind::Blocking)
    }

    /// Create and activate the routed construct for `server`
    ///
    /// Routes are tried first. Only an explicit invalid-arguments rejection
    /// switches to the address-list form; anything else is surfaced.
    fn create_routed(&mut self, server: IpAddr) -> Result<(), KillSwitchError> {
        let action = ActionKind::PreConnection;
        let failed = |source: BackendError| KillSwitchError::Create {
            action,
            construct: ConstructKind::Routed,
            source,
        };

        let plan = plan_routed(server, RoutedStrategy::AsRoutes);
        match self.create(&ConstructSpec::routed(&plan)) {
            Ok(()) => {}
            Err(BackendError::InvalidArguments { message, .. }) => {
                warn!(
                    %server,
                    reason = %message,
                    "Route list rejected, retrying routed kill switch as address list"
                );
                let plan = plan_routed(server, RoutedStrategy::AsAddresses);
                self.create(&ConstructSpec::routed(&plan)).map_err(failed)?;
            }
            Err(source) => return Err(failed(source)),
        }
        self.activate(action, ConstructKind::Routed)
    }

    fn create(&mut self, spec: &ConstructSpec) -> Result<(), BackendError> {
        info!(
            construct = %spec.kind,
            interface = spec.interface_name(),
            "Creating kill switch connection"
        );
        self.backend.create(spec)
    }

    fn activate(&mut self, action: ActionKind, kind: ConstructKind) -> Result<(), KillSwitchError> {
        self.refresh()?;
        let state = self.state(kind);
        if state.active {
            return Ok(());
        }
        if !state.exists {
            return Err(KillSwitchError::Activate {
                action,
                construct: kind,
                source: BackendError::NotFound(kind.connection_name().to_string()),
            });
        }

        info!(construct = %kind, "Activating kill switch connection");
        self.backend
            .activate(kind.connection_name())
            .map_err(|source| KillSwitchError::Activate {
                action,
                construct: kind,
                source,
            })
    }

    fn deactivate(&mut self, action: ActionKind, kind: ConstructKind) -> Result<(), KillSwitchError> {
        self.refresh()?;
        if !self.state(kind).active {
            return Ok(());
        }

        info!(construct = %kind, "Deactivating kill switch connection");
        self.backend
            .deactivate(kind.connection_name())
            .map_err(|source| KillSwitchError::Deactivate {
                action,
                construct: kind,
                source,
            })
    }

    /// Delete a construct; absence is not an error
    fn delete(&mut self, action: ActionKind, kind: ConstructKind) -> Result<(), KillSwitchError> {
        self.refresh()?;
        if !self.state(kind).exists {
            return Ok(());
        }

        info!(construct = %kind, "Deleting kill switch connection");
        match self.backend.delete(kind.connection_name()) {
            Ok(()) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(source) => Err(KillSwitchError::Delete {
                action,
                construct: kind,
                source,
            }),
        }
    }
}
