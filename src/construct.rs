//! The two network constructs the kill switch programs into the platform
//!
//! `Blocking` is a dummy interface that owns the default route and DNS with
//! black-hole values. `Routed` does the same but only for the complement of
//! the VPN server address, so the server itself stays reachable.

use crate::planner::{RoutedPlan, RoutedStrategy};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const BLOCKING_CONN_NAME: &str = "nmks-blocking";
pub const BLOCKING_INTERFACE_NAME: &str = "nmksblock0";
pub const ROUTED_CONN_NAME: &str = "nmks-routed";
pub const ROUTED_INTERFACE_NAME: &str = "nmksroute0";

pub const BLOCKING_ROUTE_METRIC: u32 = 98;
pub const ROUTED_ROUTE_METRIC: u32 = 97;

/// Lower values win; negative values exclude DNS from every other connection.
pub const DNS_PRIORITY: i32 = -1400;

const IPV4_DUMMY_ADDRESS: Ipv4Addr = Ipv4Addr::new(100, 85, 0, 1);
const IPV4_DUMMY_PREFIX: u8 = 24;
const IPV4_DUMMY_GATEWAY: Ipv4Addr = Ipv4Addr::new(100, 85, 0, 1);
const IPV6_DUMMY_ADDRESS: Ipv6Addr = Ipv6Addr::new(0xfdeb, 0x446c, 0x912d, 0x08da, 0, 0, 0, 0);
const IPV6_DUMMY_PREFIX: u8 = 64;
const IPV6_DUMMY_GATEWAY: Ipv6Addr = Ipv6Addr::new(0xfdeb, 0x446c, 0x912d, 0x08da, 0, 0, 0, 1);
const IPV4_BLACKHOLE_DNS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;
const IPV6_BLACKHOLE_DNS: Ipv6Addr = Ipv6Addr::LOCALHOST;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstructKind {
    Blocking,
    Routed,
}

impl ConstructKind {
    pub const ALL: [ConstructKind; 2] = [ConstructKind::Blocking, ConstructKind::Routed];

    pub fn connection_name(self) -> &'static str {
        match self {
            ConstructKind::Blocking => BLOCKING_CONN_NAME,
            ConstructKind::Routed => ROUTED_CONN_NAME,
        }
    }

    pub fn interface_name(self) -> &'static str {
        match self {
            ConstructKind::Blocking => BLOCKING_INTERFACE_NAME,
            ConstructKind::Routed => ROUTED_INTERFACE_NAME,
        }
    }

    pub fn from_connection_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.connection_name() == name)
    }
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.connection_name())
    }
}

/// Static addressing for one IP family of a construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyConfig {
    pub addresses: Vec<IpNet>,
    pub gateway: Option<IpAddr>,
    pub routes: Vec<IpNet>,
    pub dns: IpAddr,
}

/// Full description of a construct, as handed to the backend's `create`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructSpec {
    pub kind: ConstructKind,
    pub ipv4: FamilyConfig,
    pub ipv6: FamilyConfig,
    pub route_metric: u32,
    pub dns_priority: i32,
    pub ignore_auto_dns: bool,
}

impl ConstructSpec {
    pub fn name(&self) -> &'static str {
        self.kind.connection_name()
    }

    pub fn interface_name(&self) -> &'static str {
        self.kind.interface_name()
    }

    /// Default-deny construct: both families routed into the dummy interface.
    pub fn blocking() -> Self {
        Self {
            kind: ConstructKind::Blocking,
            ipv4: ipv4_blackhole(),
            ipv6: ipv6_blackhole(),
            route_metric: BLOCKING_ROUTE_METRIC,
            dns_priority: DNS_PRIORITY,
            ignore_auto_dns: true,
        }
    }

    /// Construct that black-holes everything except the planned server.
    ///
    /// The family of the server carries the complement (as routes or as
    /// addresses, per the plan); the other family stays fully blocked.
    pub fn routed(plan: &RoutedPlan) -> Self {
        let (ipv4, ipv6) = match plan.server {
            IpAddr::V4(_) => (routed_family(ipv4_blackhole(), plan), ipv6_blackhole()),
            IpAddr::V6(_) => (ipv4_blackhole(), routed_family(ipv6_blackhole(), plan)),
        };

        Self {
            kind: ConstructKind::Routed,
            ipv4,
            ipv6,
            route_metric: ROUTED_ROUTE_METRIC,
            dns_priority: DNS_PRIORITY,
            ignore_auto_dns: true,
        }
    }
}

fn ipv4_blackhole() -> FamilyConfig {
    let address = Ipv4Net::new(IPV4_DUMMY_ADDRESS, IPV4_DUMMY_PREFIX)
        .map(IpNet::V4)
        .into_iter()
        .collect();
    FamilyConfig {
        addresses: address,
        gateway: Some(IpAddr::V4(IPV4_DUMMY_GATEWAY)),
        routes: Vec::new(),
        dns: IpAddr::V4(IPV4_BLACKHOLE_DNS),
    }
}

fn ipv6_blackhole() -> FamilyConfig {
    let address = Ipv6Net::new(IPV6_DUMMY_ADDRESS, IPV6_DUMMY_PREFIX)
        .map(IpNet::V6)
        .into_iter()
        .collect();
    FamilyConfig {
        addresses: address,
        gateway: Some(IpAddr::V6(IPV6_DUMMY_GATEWAY)),
        routes: Vec::new(),
        dns: IpAddr::V6(IPV6_BLACKHOLE_DNS),
    }
}

// A default gateway would swallow the server too, so the routed family drops it.
fn routed_family(base: FamilyConfig, plan: &RoutedPlan) -> FamilyConfig {
    match plan.strategy {
        RoutedStrategy::AsRoutes => FamilyConfig {
            gateway: None,
            routes: plan.ranges.clone(),
            ..base
        },
        RoutedStrategy::AsAddresses => FamilyConfig {
            addresses: plan.ranges.clone(),
            gateway: None,
            routes: Vec::new(),
            ..base
        },
    }
}
