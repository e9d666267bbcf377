//! Connectivity-check suppression
//!
//! NetworkManager periodically fetches a URL to detect captive portals. That
//! request would bypass the tunnel, so every action turns it off and reads
//! the setting back before touching any construct. It is never turned back on.

use crate::error::KillSwitchError;
use crate::platform::NetworkBackend;
use tracing::{debug, info};

pub struct ConnectivityGuard<'a, B: NetworkBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: NetworkBackend + ?Sized> ConnectivityGuard<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    pub fn ensure_suppressed(&self) -> Result<(), KillSwitchError> {
        let state = self
            .backend
            .probe_state()
            .map_err(KillSwitchError::StateQuery)?;

        if !state.enabled {
            debug!("Connectivity check already disabled");
            return Ok(());
        }
        if !state.available {
            return Err(KillSwitchError::ProbeUnsupported);
        }

        self.backend
            .set_probe_enabled(false)
            .map_err(KillSwitchError::ProbeWriteRejected)?;

        let state = self
            .backend
            .probe_state()
            .map_err(KillSwitchError::StateQuery)?;
        if state.enabled {
            return Err(KillSwitchError::ProbeSuppressionFailed);
        }

        info!("Disabled NetworkManager connectivity check");
        Ok(())
    }
}
