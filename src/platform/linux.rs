//! NetworkManager backend
//!
//! Queries, activation and the connectivity-check setting go over the system
//! D-Bus. Connections are created and deleted with `nmcli`, whose exit codes
//! tell an argument rejection (2) apart from a missing connection (10).

use super::{BackendError, NetworkBackend, ProbeState};
use crate::construct::{ConstructSpec, FamilyConfig};
use ipnet::IpNet;
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing::debug;
use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};

const NM_BUS_NAME: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_INTERFACE: &str = "org.freedesktop.NetworkManager";
const NM_SETTINGS_PATH: &str = "/org/freedesktop/NetworkManager/Settings";
const NM_SETTINGS_INTERFACE: &str = "org.freedesktop.NetworkManager.Settings";
const NM_CONNECTION_INTERFACE: &str = "org.freedesktop.NetworkManager.Settings.Connection";
const NM_ACTIVE_INTERFACE: &str = "org.freedesktop.NetworkManager.Connection.Active";

/// nmcli: invalid user input
const NMCLI_EXIT_INVALID_ARGUMENTS: i32 = 2;
/// nmcli: connection, device or access point does not exist
const NMCLI_EXIT_NOT_FOUND: i32 = 10;

type ConnectionSettings = HashMap<String, HashMap<String, OwnedValue>>;

pub struct NetworkManagerBackend {
    connection: Connection,
    nmcli: String,
}

impl NetworkManagerBackend {
    /// Open the system bus once; the handle lives as long as the backend
    pub fn connect(nmcli: &str) -> Result<Self, BackendError> {
        let connection = Connection::system().map_err(|e| {
            BackendError::Bus(format!("failed to connect to system D-Bus: {e}"))
        })?;
        Ok(Self {
            connection,
            nmcli: nmcli.to_string(),
        })
    }

    fn proxy<P>(&self, path: P, interface: &'static str) -> Result<Proxy<'static>, BackendError>
    where
        P: TryInto<ObjectPath<'static>>,
        P::Error: Into<zbus::Error>,
    {
        Proxy::new(&self.connection, NM_BUS_NAME, path, interface).map_err(bus_error)
    }

    fn manager(&self) -> Result<Proxy<'static>, BackendError> {
        self.proxy(NM_PATH, NM_INTERFACE)
    }

    fn settings_paths(&self) -> Result<Vec<OwnedObjectPath>, BackendError> {
        let settings = self.proxy(NM_SETTINGS_PATH, NM_SETTINGS_INTERFACE)?;
        settings.call("ListConnections", &()).map_err(bus_error)
    }

    /// `connection.id` from a connection's settings
    fn connection_id(&self, settings_path: &OwnedObjectPath) -> Result<Option<String>, BackendError> {
        let proxy = self.proxy(settings_path.clone(), NM_CONNECTION_INTERFACE)?;
        let settings: ConnectionSettings = proxy.call("GetSettings", &()).map_err(bus_error)?;

        Ok(settings
            .get("connection")
            .and_then(|section| section.get("id"))
            .and_then(|id| <&str>::try_from(&**id).ok())
            .map(str::to_string))
    }

    /// Active connection paths paired with their settings paths
    fn active_paths(&self) -> Result<Vec<(OwnedObjectPath, OwnedObjectPath)>, BackendError> {
        let active: Vec<OwnedObjectPath> = self
            .manager()?
            .get_property("ActiveConnections")
            .map_err(bus_error)?;

        let mut pairs = Vec::with_capacity(active.len());
        for path in active {
            let proxy = self.proxy(path.clone(), NM_ACTIVE_INTERFACE)?;
            // Active connections can vanish between the two calls
            match proxy.get_property::<OwnedObjectPath>("Connection") {
                Ok(settings) => pairs.push((path, settings)),
                Err(e) => debug!("Skipping active connection {}: {}", path.as_str(), e),
            }
        }
        Ok(pairs)
    }

    fn find_settings_path(&self, name: &str) -> Result<Option<OwnedObjectPath>, BackendError> {
        for path in self.settings_paths()? {
            if self.connection_id(&path)?.as_deref() == Some(name) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn find_active_path(&self, name: &str) -> Result<Option<OwnedObjectPath>, BackendError> {
        for (active, settings) in self.active_paths()? {
            if self.connection_id(&settings)?.as_deref() == Some(name) {
                return Ok(Some(active));
            }
        }
        Ok(None)
    }

    fn run_nmcli(&self, args: &[String]) -> Result<(), BackendError> {
        debug!("Running {} {}", self.nmcli, args.join(" "));
        let output = nmcli_command(&self.nmcli, args)
            .output()
            .map_err(|source| BackendError::Spawn {
                tool: self.nmcli.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(match output.status.code() {
            Some(NMCLI_EXIT_INVALID_ARGUMENTS) => BackendError::InvalidArguments {
                tool: self.nmcli.clone(),
                message,
            },
            Some(NMCLI_EXIT_NOT_FOUND) => BackendError::NotFound(message),
            code => BackendError::Rejected {
                tool: self.nmcli.clone(),
                code: code.unwrap_or(-1),
                message,
            },
        })
    }
}

impl NetworkBackend for NetworkManagerBackend {
    fn list_connections(&self) -> Result<Vec<String>, BackendError> {
        let mut names = Vec::new();
        for path in self.settings_paths()? {
            match self.connection_id(&path) {
                Ok(Some(name)) => names.push(name),
                Ok(None) => {}
                // Connections can be removed while we iterate
                Err(e) => debug!("Skipping connection {}: {}", path.as_str(), e),
            }
        }
        Ok(names)
    }

    fn list_active_connections(&self) -> Result<Vec<String>, BackendError> {
        let mut names = Vec::new();
        for (active, settings) in self.active_paths()? {
            match self.connection_id(&settings) {
                Ok(Some(name)) => names.push(name),
                Ok(None) => {}
                Err(e) => debug!("Skipping active connection {}: {}", active.as_str(), e),
            }
        }
        Ok(names)
    }

    fn create(&self, spec: &ConstructSpec) -> Result<(), BackendError> {
        self.run_nmcli(&nmcli_add_args(spec))
    }

    fn activate(&self, name: &str) -> Result<(), BackendError> {
        let settings = self
            .find_settings_path(name)?
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        let root = ObjectPath::from_static_str_unchecked("/");
        debug!("Activating {} ({})", name, settings.as_str());

        let _active: OwnedObjectPath = self
            .manager()?
            .call("ActivateConnection", &(&settings, &root, &root))
            .map_err(bus_error)?;
        Ok(())
    }

    fn deactivate(&self, name: &str) -> Result<(), BackendError> {
        let active = self
            .find_active_path(name)?
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;

        let reply: zbus::Result<()> = self.manager()?.call("DeactivateConnection", &(&active,));
        reply.map_err(bus_error)
    }

    fn delete(&self, name: &str) -> Result<(), BackendError> {
        let args = ["connection", "delete", "id", name].map(str::to_string);
        self.run_nmcli(&args)
    }

    fn probe_state(&self) -> Result<ProbeState, BackendError> {
        let manager = self.manager()?;
        let available: bool = manager
            .get_property("ConnectivityCheckAvailable")
            .map_err(bus_error)?;
        let enabled: bool = manager
            .get_property("ConnectivityCheckEnabled")
            .map_err(bus_error)?;
        Ok(ProbeState { available, enabled })
    }

    fn set_probe_enabled(&self, enabled: bool) -> Result<(), BackendError> {
        self.manager()?
            .set_property("ConnectivityCheckEnabled", enabled)
            .map_err(|e| BackendError::Bus(e.to_string()))
    }
}

fn bus_error(e: zbus::Error) -> BackendError {
    BackendError::Bus(e.to_string())
}

fn join_nets(nets: &[IpNet]) -> String {
    nets.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn push_family(args: &mut Vec<String>, family: &str, config: &FamilyConfig) {
    let mut set = |key: &str, value: String| {
        args.push(format!("{family}.{key}"));
        args.push(value);
    };

    set("method", "manual".to_string());
    set("addresses", join_nets(&config.addresses));
    if let Some(gateway) = config.gateway {
        set("gateway", gateway.to_string());
    }
    if !config.routes.is_empty() {
        set("routes", join_nets(&config.routes));
    }
    set("dns", config.dns.to_string());
}

/// `nmcli connection add` arguments for a dummy-interface construct
pub fn nmcli_add_args(spec: &ConstructSpec) -> Vec<String> {
    let mut args: Vec<String> = [
        "connection",
        "add",
        "type",
        "dummy",
        "ifname",
        spec.interface_name(),
        "con-name",
        spec.name(),
    ]
    .map(str::to_string)
    .to_vec();

    push_family(&mut args, "ipv4", &spec.ipv4);
    push_family(&mut args, "ipv6", &spec.ipv6);

    let ignore_auto_dns = if spec.ignore_auto_dns { "yes" } else { "no" };
    for family in ["ipv4", "ipv6"] {
        args.push(format!("{family}.route-metric"));
        args.push(spec.route_metric.to_string());
        args.push(format!("{family}.dns-priority"));
        args.push(spec.dns_priority.to_string());
        args.push(format!("{family}.ignore-auto-dns"));
        args.push(ignore_auto_dns.to_string());
    }
    args
}

/// nmcli runs in its own process group so a terminal Ctrl+C reaches only us
///
/// The interrupt is deferred until the action finishes; a killed nmcli would
/// leave a construct half created.
fn nmcli_command(nmcli: &str, args: &[String]) -> Command {
    let mut command = Command::new(nmcli);
    command.args(args).process_group(0);
    command
}
