//! Platform network service adapter
//!
//! The reconciliation engine only talks to the [`NetworkBackend`] trait. The
//! Linux implementation drives NetworkManager; other platforms are rejected
//! at selection time.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub mod lock;

#[cfg(test)]
pub mod memory;

use crate::construct::ConstructSpec;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection not found: {0}")]
    NotFound(String),
    /// The CLI tool refused the arguments it was given. This is the one
    /// rejection the routed construct planner falls back on.
    #[error("Invalid arguments rejected by {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("{tool} exited with code {code}: {message}")]
    Rejected {
        tool: String,
        code: i32,
        message: String,
    },
    #[error("D-Bus call failed: {0}")]
    Bus(String),
    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("Unsupported platform")]
    UnsupportedPlatform,
}

/// Platform connectivity-check ("captive portal probe") setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeState {
    pub available: bool,
    pub enabled: bool,
}

/// Primitive operations against the platform network service
///
/// Listing methods return connection identities (names) as resolved through
/// the service's own settings lookup.
pub trait NetworkBackend {
    fn list_connections(&self) -> Result<Vec<String>, BackendError>;
    fn list_active_connections(&self) -> Result<Vec<String>, BackendError>;
    fn create(&self, spec: &ConstructSpec) -> Result<(), BackendError>;
    fn activate(&self, name: &str) -> Result<(), BackendError>;
    fn deactivate(&self, name: &str) -> Result<(), BackendError>;
    fn delete(&self, name: &str) -> Result<(), BackendError>;
    fn probe_state(&self) -> Result<ProbeState, BackendError>;
    fn set_probe_enabled(&self, enabled: bool) -> Result<(), BackendError>;
}

impl<B: NetworkBackend + ?Sized> NetworkBackend for Box<B> {
    fn list_connections(&self) -> Result<Vec<String>, BackendError> {
        (**self).list_connections()
    }

    fn list_active_connections(&self) -> Result<Vec<String>, BackendError> {
        (**self).list_active_connections()
    }

    fn create(&self, spec: &ConstructSpec) -> Result<(), BackendError> {
        (**self).create(spec)
    }

    fn activate(&self, name: &str) -> Result<(), BackendError> {
        (**self).activate(name)
    }

    fn deactivate(&self, name: &str) -> Result<(), BackendError> {
        (**self).deactivate(name)
    }

    fn delete(&self, name: &str) -> Result<(), BackendError> {
        (**self).delete(name)
    }

    fn probe_state(&self) -> Result<ProbeState, BackendError> {
        (**self).probe_state()
    }

    fn set_probe_enabled(&self, enabled: bool) -> Result<(), BackendError> {
        (**self).set_probe_enabled(enabled)
    }
}

/// Open the network backend for the current platform
pub fn get_backend(nmcli: &str) -> Result<Box<dyn NetworkBackend + Send>, BackendError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::NetworkManagerBackend::connect(nmcli)?))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = nmcli;
        Err(BackendError::UnsupportedPlatform)
    }
}
