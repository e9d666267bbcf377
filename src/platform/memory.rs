//! In-memory network backend that records every call
//!
//! Used by the tracker, guard, engine and controller tests. Each mutation
//! appends the number of active kill switch constructs to a history so tests
//! can check that transitions never drop to zero.

use super::{BackendError, NetworkBackend, ProbeState};
use crate::construct::{ConstructKind, ConstructSpec};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListConnections,
    ListActive,
    Create(ConstructSpec),
    Activate(String),
    Deactivate(String),
    Delete(String),
    GetProbe,
    SetProbe(bool),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::Create(_) | Call::Activate(_) | Call::Deactivate(_) | Call::Delete(_)
        )
    }
}

pub struct MemoryBackend {
    /// name -> active
    connections: RefCell<BTreeMap<String, bool>>,
    calls: RefCell<Vec<Call>>,
    active_history: RefCell<Vec<usize>>,
    probe: Cell<ProbeState>,
    probe_write_ignored: Cell<bool>,
    autoconnect: Cell<bool>,
    reject_routes: Cell<bool>,
    frozen: Cell<bool>,
    fail_queries: Cell<bool>,
    failing_listings: Cell<u32>,
    refuse_probe_write: Cell<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            connections: RefCell::new(BTreeMap::new()),
            calls: RefCell::new(Vec::new()),
            active_history: RefCell::new(Vec::new()),
            probe: Cell::new(ProbeState {
                available: true,
                enabled: false,
            }),
            probe_write_ignored: Cell::new(false),
            autoconnect: Cell::new(false),
            reject_routes: Cell::new(false),
            frozen: Cell::new(false),
            fail_queries: Cell::new(false),
            failing_listings: Cell::new(0),
            refuse_probe_write: Cell::new(false),
        }
    }

    pub fn with_connection(self, name: &str, active: bool) -> Self {
        self.connections.borrow_mut().insert(name.to_string(), active);
        self
    }

    pub fn with_probe(self, available: bool, enabled: bool) -> Self {
        self.probe.set(ProbeState { available, enabled });
        self
    }

    /// `set_probe_enabled` succeeds but the setting does not change
    pub fn with_probe_write_ignored(self) -> Self {
        self.probe_write_ignored.set(true);
        self
    }

    /// Newly created connections come up active, like NetworkManager dummies
    pub fn with_autoconnect(self) -> Self {
        self.autoconnect.set(true);
        self
    }

    /// `create` fails with `InvalidArguments` whenever the construct carries routes
    pub fn with_routes_rejected(self) -> Self {
        self.reject_routes.set(true);
        self
    }

    /// Mutations are accepted but have no effect on the reported state
    pub fn frozen(self) -> Self {
        self.frozen.set(true);
        self
    }

    /// Writes to the connectivity check fail, as D-Bus does without root
    pub fn with_probe_write_refused(self) -> Self {
        self.refuse_probe_write.set(true);
        self
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.set(fail);
    }

    /// Fail the next `count` connection listings; the probe keeps working
    pub fn fail_next_listings(&self, count: u32) {
        self.failing_listings.set(count);
    }

    /// Simulate a user deleting a connection behind the engine's back
    pub fn remove_externally(&self, name: &str) {
        self.connections.borrow_mut().remove(name);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
        self.active_history.borrow_mut().clear();
    }

    pub fn active_history(&self) -> Vec<usize> {
        self.active_history.borrow().clone()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.connections.borrow().contains_key(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.connections.borrow().get(name).copied().unwrap_or(false)
    }

    pub fn probe(&self) -> ProbeState {
        self.probe.get()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn record_active_count(&self) {
        let count = self
            .connections
            .borrow()
            .iter()
            .filter(|(name, active)| **active && ConstructKind::from_connection_name(name).is_some())
            .count();
        self.active_history.borrow_mut().push(count);
    }

    fn apply(&self, change: impl FnOnce(&mut BTreeMap<String, bool>)) {
        if !self.frozen.get() {
            change(&mut self.connections.borrow_mut());
        }
        self.record_active_count();
    }

    fn query_error(&self) -> Result<(), BackendError> {
        if self.fail_queries.get() {
            return Err(BackendError::Bus("NetworkManager is not running".to_string()));
        }
        Ok(())
    }
}

impl NetworkBackend for MemoryBackend {
    fn list_connections(&self) -> Result<Vec<String>, BackendError> {
        self.record(Call::ListConnections);
        self.query_error()?;
        let failing = self.failing_listings.get();
        if failing > 0 {
            self.failing_listings.set(failing - 1);
            return Err(BackendError::Bus("transient".to_string()));
        }
        Ok(self.connections.borrow().keys().cloned().collect())
    }

    fn list_active_connections(&self) -> Result<Vec<String>, BackendError> {
        self.record(Call::ListActive);
        self.query_error()?;
        Ok(self
            .connections
            .borrow()
            .iter()
            .filter(|(_, active)| **active)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn create(&self, spec: &ConstructSpec) -> Result<(), BackendError> {
        self.record(Call::Create(spec.clone()));
        let has_routes = !spec.ipv4.routes.is_empty() || !spec.ipv6.routes.is_empty();
        if self.reject_routes.get() && has_routes {
            return Err(BackendError::InvalidArguments {
                tool: "memory".to_string(),
                message: "routes not supported".to_string(),
            });
        }
        let active = self.autoconnect.get();
        self.apply(|conns| {
            conns.insert(spec.name().to_string(), active);
        });
        Ok(())
    }

    fn activate(&self, name: &str) -> Result<(), BackendError> {
        self.record(Call::Activate(name.to_string()));
        if !self.exists(name) {
            return Err(BackendError::NotFound(name.to_string()));
        }
        self.apply(|conns| {
            conns.insert(name.to_string(), true);
        });
        Ok(())
    }

    fn deactivate(&self, name: &str) -> Result<(), BackendError> {
        self.record(Call::Deactivate(name.to_string()));
        if !self.is_active(name) {
            return Err(BackendError::NotFound(name.to_string()));
        }
        self.apply(|conns| {
            conns.insert(name.to_string(), false);
        });
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), BackendError> {
        self.record(Call::Delete(name.to_string()));
        if !self.exists(name) {
            return Err(BackendError::NotFound(name.to_string()));
        }
        self.apply(|conns| {
            conns.remove(name);
        });
        Ok(())
    }

    fn probe_state(&self) -> Result<ProbeState, BackendError> {
        self.record(Call::GetProbe);
        self.query_error()?;
        Ok(self.probe.get())
    }

    fn set_probe_enabled(&self, enabled: bool) -> Result<(), BackendError> {
        self.record(Call::SetProbe(enabled));
        if self.refuse_probe_write.get() {
            return Err(BackendError::Bus(
                "org.freedesktop.DBus.Error.AccessDenied".to_string(),
            ));
        }
        if !self.probe_write_ignored.get() {
            let available = self.probe.get().available;
            self.probe.set(ProbeState { available, enabled });
        }
        Ok(())
    }
}
