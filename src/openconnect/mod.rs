//! OpenConnect integration module
//!
//! OpenConnect invokes our binary as a script with environment variables
//! describing the VPN connection state.
//!
//! # Usage
//!
//! ```bash
//! sudo openconnect vpn.example.com -s 'nm-killswitch script'
//! ```
//!
//! # Lifecycle
//!
//! OpenConnect calls the script with `reason` set to:
//! - `pre-init`, `attempt-reconnect`: about to reach the server, allow only it
//! - `connect`, `reconnect`: tunnel is up, block everything else again
//! - `disconnect`: tunnel is gone, follow the configured mode

pub mod env;
pub mod script;

pub use env::OpenConnectEnv;
pub use script::{ScriptError, handle_script_mode};
