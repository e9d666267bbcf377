//! OpenConnect environment variable parsing
//!
//! When OpenConnect invokes us as a script, it sets environment variables
//! with connection details. Only the few the kill switch needs are read.
//!
//! | Variable | Example | Description |
//! |----------|---------|-------------|
//! | `reason` | `connect` | Lifecycle event |
//! | `VPNGATEWAY` | `185.159.157.10` | VPN server address |
//! | `TUNDEV` | `tun0` | Tunnel device name |

use std::env;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid IP address in {var}: {value}")]
    InvalidIp { var: String, value: String },
    #[error("Unknown reason: {0}")]
    UnknownReason(String),
}

/// The reason OpenConnect is invoking the script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Before the tunnel is created
    PreInit,
    Connect,
    Disconnect,
    /// Tunnel re-established after a brief outage
    Reconnect,
    /// About to retry the server after losing the tunnel
    AttemptReconnect,
}

impl std::str::FromStr for Reason {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre-init" => Ok(Reason::PreInit),
            "connect" => Ok(Reason::Connect),
            "disconnect" => Ok(Reason::Disconnect),
            "reconnect" => Ok(Reason::Reconnect),
            "attempt-reconnect" => Ok(Reason::AttemptReconnect),
            _ => Err(EnvError::UnknownReason(s.to_string())),
        }
    }
}

/// Parsed OpenConnect environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectEnv {
    pub reason: Reason,
    /// Not set during pre-init on older OpenConnect releases
    pub gateway: Option<IpAddr>,
    pub tunnel_device: Option<String>,
}

impl OpenConnectEnv {
    /// Parse OpenConnect environment variables from the current process
    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_env_fn(|key| env::var(key))
    }

    /// Parse environment using a custom getter (for testing)
    pub fn from_env_fn<F>(get_var: F) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let reason: Reason = get_var("reason")
            .map_err(|_| EnvError::MissingVar("reason".into()))?
            .parse()?;

        let gateway = match get_var("VPNGATEWAY").ok().filter(|v| !v.is_empty()) {
            Some(value) => Some(value.parse().map_err(|_| EnvError::InvalidIp {
                var: "VPNGATEWAY".into(),
                value,
            })?),
            None => None,
        };

        let tunnel_device = get_var("TUNDEV").ok().filter(|v| !v.is_empty());

        Ok(Self {
            reason,
            gateway,
            tunnel_device,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_getter(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn test_parse_connect_env() {
        let getter = make_getter(&[
            ("reason", "connect"),
            ("VPNGATEWAY", "185.159.157.10"),
            ("TUNDEV", "tun0"),
        ]);

        let env = OpenConnectEnv::from_env_fn(getter).unwrap();

        assert_eq!(env.reason, Reason::Connect);
        assert_eq!(env.gateway, Some("185.159.157.10".parse().unwrap()));
        assert_eq!(env.tunnel_device.as_deref(), Some("tun0"));
    }

    #[test]
    fn test_parse_preinit_without_gateway() {
        let env = OpenConnectEnv::from_env_fn(make_getter(&[("reason", "pre-init")])).unwrap();

        assert_eq!(env.reason, Reason::PreInit);
        assert_eq!(env.gateway, None);
        assert_eq!(env.tunnel_device, None);
    }

    #[test]
    fn test_empty_gateway_is_absent() {
        let getter = make_getter(&[("reason", "pre-init"), ("VPNGATEWAY", "")]);
        let env = OpenConnectEnv::from_env_fn(getter).unwrap();

        assert_eq!(env.gateway, None);
    }

    #[test]
    fn test_ipv6_gateway() {
        let getter = make_getter(&[("reason", "attempt-reconnect"), ("VPNGATEWAY", "2a07:b944::2:1")]);
        let env = OpenConnectEnv::from_env_fn(getter).unwrap();

        assert_eq!(env.reason, Reason::AttemptReconnect);
        assert!(env.gateway.is_some_and(|ip| ip.is_ipv6()));
    }

    #[test]
    fn test_missing_reason() {
        let result = OpenConnectEnv::from_env_fn(make_getter(&[]));
        assert!(matches!(result, Err(EnvError::MissingVar(_))));
    }

    #[test]
    fn test_unknown_reason() {
        let result = OpenConnectEnv::from_env_fn(make_getter(&[("reason", "unknown_event")]));
        assert!(matches!(result, Err(EnvError::UnknownReason(_))));
    }

    #[test]
    fn test_invalid_ip() {
        let getter = make_getter(&[("reason", "connect"), ("VPNGATEWAY", "not-an-ip")]);
        let result = OpenConnectEnv::from_env_fn(getter);

        assert!(matches!(result, Err(EnvError::InvalidIp { .. })));
    }

    #[test]
    fn test_reason_parse() {
        assert_eq!("connect".parse::<Reason>().unwrap(), Reason::Connect);
        assert_eq!("disconnect".parse::<Reason>().unwrap(), Reason::Disconnect);
        assert_eq!("reconnect".parse::<Reason>().unwrap(), Reason::Reconnect);
        assert_eq!("pre-init".parse::<Reason>().unwrap(), Reason::PreInit);
        assert_eq!(
            "attempt-reconnect".parse::<Reason>().unwrap(),
            Reason::AttemptReconnect
        );
        assert!("invalid".parse::<Reason>().is_err());
    }
}
