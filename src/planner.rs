//! Route/address complement planning for the routed construct
//!
//! Given the VPN server as a single host, produce the minimal set of
//! prefixes that covers the whole address space of its family except that
//! host. Walking from /1 down to the host prefix, each step emits the
//! sibling block that does not contain the server.

use crate::error::KillSwitchError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// How the complement set is programmed into the routed construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutedStrategy {
    /// Explicit route list (preferred)
    AsRoutes,
    /// The same set as interface addresses, for services that reject the routes
    AsAddresses,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedPlan {
    pub server: IpAddr,
    pub ranges: Vec<IpNet>,
    pub strategy: RoutedStrategy,
}

/// Parse and validate a VPN server address
///
/// Accepts a bare address or a host-length prefix (`/32`, `/128`). Ranges,
/// the unspecified address and multicast groups are rejected.
pub fn parse_server_address(input: &str) -> Result<IpAddr, KillSwitchError> {
    let input = input.trim();
    let invalid = || KillSwitchError::InvalidServerAddress(input.to_string());

    let addr = match input.parse::<IpAddr>() {
        Ok(addr) => addr,
        Err(_) => {
            let net: IpNet = input.parse().map_err(|_| invalid())?;
            if net.prefix_len() != net.max_prefix_len() {
                return Err(invalid());
            }
            net.addr()
        }
    };

    validate_server_address(addr)
}

/// Reject addresses that cannot identify a single remote host
pub fn validate_server_address(addr: IpAddr) -> Result<IpAddr, KillSwitchError> {
    if addr.is_unspecified() || addr.is_multicast() {
        return Err(KillSwitchError::InvalidServerAddress(addr.to_string()));
    }
    Ok(addr)
}

/// Compute the complement of `server` within its family's full address space
pub fn plan_routed(server: IpAddr, strategy: RoutedStrategy) -> RoutedPlan {
    let ranges = match server {
        IpAddr::V4(addr) => exclude_ipv4_host(addr).into_iter().map(IpNet::V4).collect(),
        IpAddr::V6(addr) => exclude_ipv6_host(addr).into_iter().map(IpNet::V6).collect(),
    };

    RoutedPlan {
        server,
        ranges,
        strategy,
    }
}

fn exclude_ipv4_host(host: Ipv4Addr) -> Vec<Ipv4Net> {
    let host = u32::from(host);
    (1..=32u8)
        .filter_map(|prefix| {
            let shift = 32 - u32::from(prefix);
            let mask = u32::MAX << shift;
            let sibling = (host ^ (1u32 << shift)) & mask;
            Ipv4Net::new(Ipv4Addr::from(sibling), prefix).ok()
        })
        .collect()
}

fn exclude_ipv6_host(host: Ipv6Addr) -> Vec<Ipv6Net> {
    let host = u128::from(host);
    (1..=128u8)
        .filter_map(|prefix| {
            let shift = 128 - u32::from(prefix);
            let mask = u128::MAX << shift;
            let sibling = (host ^ (1u128 << shift)) & mask;
            Ipv6Net::new(Ipv6Addr::from(sibling), prefix).ok()
        })
        .collect()
}
