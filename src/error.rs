//! Kill switch error taxonomy

use crate::construct::ConstructKind;
use crate::platform::BackendError;
use std::fmt;
use thiserror::Error;

/// Reconciliation action names, used to label errors and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    PreConnection,
    PostConnection,
    SoftEnable,
    Disable,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionKind::PreConnection => "pre-connection",
            ActionKind::PostConnection => "post-connection",
            ActionKind::SoftEnable => "soft-enable",
            ActionKind::Disable => "disable",
        })
    }
}

#[derive(Error, Debug)]
pub enum KillSwitchError {
    #[error("Invalid VPN server address: {0}")]
    InvalidServerAddress(String),
    #[error("A VPN server address is required to prepare a connection")]
    MissingServerAddress,
    #[error("Connectivity check is enabled but cannot be changed on this system")]
    ProbeUnsupported,
    #[error("Connectivity check is still enabled after disabling it")]
    ProbeSuppressionFailed,
    #[error("Failed to disable connectivity check: {0}")]
    ProbeWriteRejected(#[source] BackendError),
    #[error("Failed to query network state: {0}")]
    StateQuery(#[source] BackendError),
    #[error("Failed to create {construct} during {action}: {source}")]
    Create {
        action: ActionKind,
        construct: ConstructKind,
        source: BackendError,
    },
    #[error("Failed to activate {construct} during {action}: {source}")]
    Activate {
        action: ActionKind,
        construct: ConstructKind,
        source: BackendError,
    },
    #[error("Failed to deactivate {construct} during {action}: {source}")]
    Deactivate {
        action: ActionKind,
        construct: ConstructKind,
        source: BackendError,
    },
    #[error("Failed to delete {construct} during {action}: {source}")]
    Delete {
        action: ActionKind,
        construct: ConstructKind,
        source: BackendError,
    },
    #[error("Unable to set up {action} kill switch after {attempts} attempts")]
    ReconciliationExhausted { action: ActionKind, attempts: u32 },
    #[error("Routed connection does not exist, nothing to fall back to")]
    RoutedConstructMissing,
}

impl KillSwitchError {
    /// Errors that need outside intervention; retrying the action cannot help
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KillSwitchError::ProbeUnsupported
                | KillSwitchError::ProbeSuppressionFailed
                | KillSwitchError::ProbeWriteRejected(_)
                | KillSwitchError::RoutedConstructMissing
                | KillSwitchError::InvalidServerAddress(_)
                | KillSwitchError::MissingServerAddress
        )
    }

    /// First kill switch error in `err` or its source chain
    pub fn from_chain<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a Self> {
        std::iter::successors(Some(err), |e| e.source()).find_map(|e| e.downcast_ref::<Self>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KillSwitchError::InvalidServerAddress("10.0.0.0/8".to_string());
        assert_eq!(err.to_string(), "Invalid VPN server address: 10.0.0.0/8");

        let err = KillSwitchError::ReconciliationExhausted {
            action: ActionKind::PreConnection,
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "Unable to set up pre-connection kill switch after 5 attempts"
        );

        let err = KillSwitchError::Delete {
            action: ActionKind::Disable,
            construct: ConstructKind::Routed,
            source: BackendError::NotFound("nmks-routed".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Failed to delete nmks-routed during disable: Connection not found: nmks-routed"
        );
    }

    #[test]
    fn test_error_keeps_backend_source() {
        use std::error::Error;

        let err = KillSwitchError::Activate {
            action: ActionKind::SoftEnable,
            construct: ConstructKind::Blocking,
            source: BackendError::Bus("timeout".to_string()),
        };
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("D-Bus call failed: timeout"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(KillSwitchError::RoutedConstructMissing.is_fatal());
        assert!(KillSwitchError::ProbeUnsupported.is_fatal());
        assert!(KillSwitchError::ProbeWriteRejected(BackendError::Bus("denied".into())).is_fatal());
        assert!(
            !KillSwitchError::ReconciliationExhausted {
                action: ActionKind::PostConnection,
                attempts: 5
            }
            .is_fatal()
        );
        assert!(!KillSwitchError::StateQuery(BackendError::Bus("gone".into())).is_fatal());
    }

    #[test]
    fn test_from_chain_finds_wrapped_error() {
        use crate::openconnect::script::ScriptError;

        let err: Box<dyn std::error::Error> =
            Box::new(ScriptError::KillSwitch(KillSwitchError::ProbeUnsupported));
        let found = KillSwitchError::from_chain(err.as_ref());
        assert!(matches!(found, Some(KillSwitchError::ProbeUnsupported)));
        assert!(found.is_some_and(KillSwitchError::is_fatal));

        let err: Box<dyn std::error::Error> = Box::new(BackendError::Bus("timeout".to_string()));
        assert!(KillSwitchError::from_chain(err.as_ref()).is_none());
    }
}
