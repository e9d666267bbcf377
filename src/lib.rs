//! NM Kill Switch - VPN kill switch for NetworkManager
//!
//! Keeps traffic from leaking outside a VPN tunnel by programming two dummy
//! NetworkManager connections that capture the default routes and DNS:
//! a full block, and a block that leaves only the VPN server reachable.
//! Every transition is make-before-break, so there is never a moment with
//! neither construct active while the kill switch is on.
//!
//! # Architecture
//!
//! - `construct`: the two constructs and their fixed parameters
//! - `planner`: server address validation and the complement route plan
//! - `tracker`: existence/activity snapshot of the constructs
//! - `probe`: connectivity-check suppression
//! - `engine`: reconciliation actions
//! - `controller`: kill switch mode and lifecycle event table
//! - `platform`: NetworkManager adapter and the cross-process lock
//! - `openconnect`: OpenConnect script integration
//! - `config`: Configuration file handling (TOML)
//!
//! # Usage
//!
//! As an OpenConnect script:
//! ```bash
//! sudo openconnect vpn.example.com -s 'nm-killswitch script'
//! ```

pub mod config;
pub mod construct;
pub mod controller;
pub mod engine;
pub mod error;
pub mod openconnect;
pub mod planner;
pub mod platform;
pub mod probe;
pub mod tracker;

pub use config::Config;
pub use controller::{KillSwitchMode, LifecycleEvent, ModeController};
pub use engine::{KillSwitchStatus, Posture, ReconciliationAction, ReconciliationEngine};
pub use error::KillSwitchError;
pub use openconnect::handle_script_mode;
