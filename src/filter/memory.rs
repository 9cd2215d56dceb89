//! In-process filter set.
//!
//! Behaves like a hash:ip set without touching the host firewall. Individual
//! operations can be made to fail to exercise drift recovery.

use super::{FilterError, FilterSet};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    exists: bool,
    members: BTreeSet<String>,
    failing: HashSet<String>,
    calls: Vec<String>,
}

/// Filter set held in memory
#[derive(Debug)]
pub struct MemoryFilterSet {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryFilterSet {
    /// An existing, empty set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState {
                exists: true,
                ..Default::default()
            }),
        }
    }

    /// A set that was never created; the precheck must reject it
    pub fn missing(name: impl Into<String>) -> Self {
        let set = Self::new(name);
        set.lock().exists = false;
        set
    }

    /// Make `operation` ("add", "del", "list", "save") fail until cleared
    pub fn fail_on(&self, operation: &str) {
        self.lock().failing.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Snapshot of current members
    pub fn contents(&self) -> BTreeSet<String> {
        self.lock().members.clone()
    }

    /// Insert a member directly, bypassing failure injection
    pub fn insert(&self, ip: &str) {
        self.lock().members.insert(ip.to_string());
    }

    /// Every operation issued so far, as `"op ip"` strings
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(
        &self,
        state: &mut MemoryState,
        operation: &str,
        arg: &str,
    ) -> Result<(), FilterError> {
        state.calls.push(format!("{} {}", operation, arg).trim_end().to_string());
        if state.failing.contains(operation) {
            return Err(FilterError::Command {
                command: "memory".to_string(),
                operation: operation.to_string(),
                status: 1,
                stderr: "injected failure".to_string(),
            });
        }
        if !state.exists {
            return Err(FilterError::SetMissing {
                set: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FilterSet for MemoryFilterSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, FilterError> {
        let mut state = self.lock();
        state.calls.push("list".to_string());
        if state.failing.contains("list") {
            return Err(FilterError::Command {
                command: "memory".to_string(),
                operation: "list".to_string(),
                status: 1,
                stderr: "injected failure".to_string(),
            });
        }
        Ok(state.exists)
    }

    async fn add(&self, ip: &str) -> Result<(), FilterError> {
        let mut state = self.lock();
        self.check(&mut state, "add", ip)?;
        state.members.insert(ip.to_string());
        Ok(())
    }

    async fn remove(&self, ip: &str) -> Result<(), FilterError> {
        let mut state = self.lock();
        self.check(&mut state, "del", ip)?;
        state.members.remove(ip);
        Ok(())
    }

    async fn members(&self) -> Result<Vec<String>, FilterError> {
        let mut state = self.lock();
        self.check(&mut state, "list", "")?;
        Ok(state.members.iter().cloned().collect())
    }

    async fn save(&self) -> Result<String, FilterError> {
        let mut state = self.lock();
        self.check(&mut state, "save", "")?;

        let mut dump = format!(
            "create {} hash:ip family inet hashsize 1024 maxelem 65536\n",
            self.name
        );
        for ip in &state.members {
            dump.push_str(&format!("add {} {}\n", self.name, ip));
        }
        Ok(dump)
    }
}
