//! Snapshot of the kill switch constructs as the platform reports them

use crate::construct::ConstructKind;
use crate::error::KillSwitchError;
use crate::platform::NetworkBackend;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceState {
    pub exists: bool,
    pub active: bool,
}

impl InterfaceState {
    pub const ABSENT: InterfaceState = InterfaceState {
        exists: false,
        active: false,
    };
}

/// `{exists, active}` for the blocking and routed constructs
///
/// The snapshot is only as fresh as the last [`refresh`](Self::refresh);
/// callers refresh before every decision.
#[derive(Debug, Clone, Default)]
pub struct InterfaceStateTracker {
    blocking: InterfaceState,
    routed: InterfaceState,
}

impl InterfaceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, kind: ConstructKind) -> InterfaceState {
        match kind {
            ConstructKind::Blocking => self.blocking,
            ConstructKind::Routed => self.routed,
        }
    }

    fn state_mut(&mut self, kind: ConstructKind) -> &mut InterfaceState {
        match kind {
            ConstructKind::Blocking => &mut self.blocking,
            ConstructKind::Routed => &mut self.routed,
        }
    }

    /// Rebuild the snapshot from the backend.
    ///
    /// Both entries are cleared before either query runs, so a failed query
    /// never leaves half of the previous snapshot behind.
    pub fn refresh<B: NetworkBackend + ?Sized>(
        &mut self,
        backend: &B,
    ) -> Result<(), KillSwitchError> {
        self.blocking = InterfaceState::ABSENT;
        self.routed = InterfaceState::ABSENT;

        let existing = backend
            .list_connections()
            .map_err(KillSwitchError::StateQuery)?;
        let active = backend
            .list_active_connections()
            .map_err(KillSwitchError::StateQuery)?;

        for kind in existing
            .iter()
            .filter_map(|name| ConstructKind::from_connection_name(name))
        {
            self.state_mut(kind).exists = true;
        }
        for kind in active
            .iter()
            .filter_map(|name| ConstructKind::from_connection_name(name))
        {
            self.state_mut(kind).active = true;
        }

        debug!(
            blocking = ?self.blocking,
            routed = ?self.routed,
            "Refreshed kill switch interface state"
        );
        Ok(())
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        usize::from(self.blocking.active) + usize::from(self.routed.active)
    }
}
