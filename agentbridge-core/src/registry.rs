//! Agent registry (spec C3): the live table of connected agents, what models each has
//! installed and currently loaded, and how many requests are in flight on each.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::GatewayError;
use crate::transport::AgentHandle;

/// One connected agent. Cloned out of the registry as a [`AgentSnapshot`] for anything
/// that needs to read it without holding a dashmap shard lock (the router, `/v1/models`).
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub installed_models: HashSet<String>,
    pub loaded_models: HashSet<String>,
    pub pending_requests: usize,
    pub handle: AgentHandle,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub id: String,
    pub name: String,
    pub installed_models: HashSet<String>,
    pub loaded_models: HashSet<String>,
    pub pending_requests: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<&AgentRecord> for AgentSnapshot {
    fn from(r: &AgentRecord) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            installed_models: r.installed_models.clone(),
            loaded_models: r.loaded_models.clone(),
            pending_requests: r.pending_requests,
            first_seen: r.first_seen,
            last_seen: r.last_seen,
        }
    }
}

/// Live agent table plus the request→agent bindings needed to fail in-flight brokers
/// when the bound agent disconnects.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, AgentRecord>,
    request_bindings: DashMap<String, String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        id: String,
        name: String,
        installed_models: HashSet<String>,
        handle: AgentHandle,
    ) -> Result<(), GatewayError> {
        if self.agents.contains_key(&id) {
            return Err(GatewayError::InvalidRequest(format!(
                "agent id {id:?} already connected"
            )));
        }
        let now = Utc::now();
        self.agents.insert(
            id.clone(),
            AgentRecord {
                id,
                name,
                installed_models,
                loaded_models: HashSet::new(),
                pending_requests: 0,
                handle,
                first_seen: now,
                last_seen: now,
            },
        );
        Ok(())
    }

    /// Removes the agent and returns the request ids that were bound to it, so the
    /// caller (the broker layer) can fail each one with [`GatewayError::AgentDisconnected`].
    pub fn remove(&self, id: &str) -> Vec<String> {
        self.agents.remove(id);
        let orphaned: Vec<String> = self
            .request_bindings
            .iter()
            .filter(|kv| kv.value() == id)
            .map(|kv| kv.key().clone())
            .collect();
        for request_id in &orphaned {
            self.request_bindings.remove(request_id);
        }
        orphaned
    }

    pub fn list(&self) -> Vec<AgentSnapshot> {
        self.agents.iter().map(|kv| AgentSnapshot::from(kv.value())).collect()
    }

    pub fn snapshot(&self, id: &str) -> Option<AgentSnapshot> {
        self.agents.get(id).map(|kv| AgentSnapshot::from(kv.value()))
    }

    pub fn handle(&self, id: &str) -> Option<AgentHandle> {
        self.agents.get(id).map(|kv| kv.handle.clone())
    }

    pub fn touch(&self, id: &str) {
        if let Some(mut a) = self.agents.get_mut(id) {
            a.last_seen = Utc::now();
        }
    }

    pub fn set_installed(&self, id: &str, models: HashSet<String>) {
        if let Some(mut a) = self.agents.get_mut(id) {
            a.installed_models = models;
        }
    }

    /// Marks `model` loaded. If the agent never reported it installed (a race between
    /// `listModels` and `loadModel` notifications), installed is corrected to include it
    /// too rather than leaving the invariant `loaded ⊆ installed` violated.
    pub fn add_loaded(&self, id: &str, model: &str) {
        if let Some(mut a) = self.agents.get_mut(id) {
            if !a.installed_models.contains(model) {
                tracing::warn!(agent = id, model, "model loaded without prior installed report, correcting");
                a.installed_models.insert(model.to_string());
            }
            a.loaded_models.insert(model.to_string());
        }
    }

    pub fn remove_loaded(&self, id: &str, model: &str) {
        if let Some(mut a) = self.agents.get_mut(id) {
            a.loaded_models.remove(model);
        }
    }

    pub fn increment_pending(&self, id: &str) {
        if let Some(mut a) = self.agents.get_mut(id) {
            a.pending_requests += 1;
        }
    }

    /// Saturating: never goes below zero even if called more times than incremented.
    pub fn decrement_pending(&self, id: &str) {
        if let Some(mut a) = self.agents.get_mut(id) {
            a.pending_requests = a.pending_requests.saturating_sub(1);
        }
    }

    pub fn bind_request(&self, request_id: String, agent_id: String) {
        self.request_bindings.insert(request_id, agent_id);
    }

    pub fn agent_for_request(&self, request_id: &str) -> Option<String> {
        self.request_bindings.get(request_id).map(|kv| kv.value().clone())
    }

    pub fn unbind_request(&self, request_id: &str) {
        self.request_bindings.remove(request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> AgentHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        AgentHandle::new(tx)
    }

    #[test]
    fn duplicate_id_rejected() {
        let reg = AgentRegistry::new();
        reg.register("a1".into(), "one".into(), HashSet::new(), handle()).unwrap();
        let err = reg
            .register("a1".into(), "two".into(), HashSet::new(), handle())
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn loaded_model_auto_corrects_installed_set() {
        let reg = AgentRegistry::new();
        reg.register("a1".into(), "one".into(), HashSet::new(), handle()).unwrap();
        reg.add_loaded("a1", "m1");
        let snap = reg.snapshot("a1").unwrap();
        assert!(snap.installed_models.contains("m1"));
        assert!(snap.loaded_models.contains("m1"));
    }

    #[test]
    fn pending_counter_never_goes_negative() {
        let reg = AgentRegistry::new();
        reg.register("a1".into(), "one".into(), HashSet::new(), handle()).unwrap();
        reg.decrement_pending("a1");
        reg.decrement_pending("a1");
        assert_eq!(reg.snapshot("a1").unwrap().pending_requests, 0);
        reg.increment_pending("a1");
        assert_eq!(reg.snapshot("a1").unwrap().pending_requests, 1);
    }

    #[test]
    fn remove_returns_orphaned_request_bindings() {
        let reg = AgentRegistry::new();
        reg.register("a1".into(), "one".into(), HashSet::new(), handle()).unwrap();
        reg.bind_request("r1".into(), "a1".into());
        reg.bind_request("r2".into(), "a1".into());
        let mut orphaned = reg.remove("a1");
        orphaned.sort();
        assert_eq!(orphaned, vec!["r1".to_string(), "r2".to_string()]);
        assert!(reg.snapshot("a1").is_none());
        assert!(reg.agent_for_request("r1").is_none());
    }
}
