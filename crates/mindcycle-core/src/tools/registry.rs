// The hybrid tool registry
//
// One namespace over internal tools (registered at startup) and external
// tool-server descriptors (registered per-channel or globally at
// runtime). Admission checks visibility, phase gating, and the circuit
// for the (tool, channel) pair, in that order.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use mindcycle_contracts::Phase;

use super::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use super::descriptor::{ToolDescriptor, ToolSource};
use crate::error::{CoreError, Result};

/// Registry of tool descriptors and their circuits
pub struct ToolRegistry {
    /// Internal and globally registered external tools
    global: DashMap<String, ToolDescriptor>,
    /// Channel-scoped external tools
    channel_scoped: DashMap<(Uuid, String), ToolDescriptor>,
    /// Circuit per (tool, channel)
    circuits: DashMap<(String, Uuid), Arc<CircuitBreaker>>,
    /// Tools blocked globally (their server was given up on)
    blocked: DashMap<String, ()>,
    circuit_config: CircuitBreakerConfig,
}

impl ToolRegistry {
    pub fn new(circuit_config: CircuitBreakerConfig) -> Self {
        Self {
            global: DashMap::new(),
            channel_scoped: DashMap::new(),
            circuits: DashMap::new(),
            blocked: DashMap::new(),
            circuit_config,
        }
    }

    /// Register a descriptor; idempotent on name, conflicting schemas reject
    pub fn register(&self, descriptor: ToolDescriptor) -> Result<()> {
        match descriptor.channel_scope {
            Some(channel_id) => {
                let key = (channel_id, descriptor.name.clone());
                if let Some(existing) = self.channel_scoped.get(&key) {
                    if existing.input_schema == descriptor.input_schema {
                        return Ok(());
                    }
                    return Err(CoreError::conflict(format!(
                        "tool '{}' already registered for channel {channel_id} with a different schema",
                        descriptor.name
                    )));
                }
                info!(tool = %descriptor.name, channel = %channel_id, "registered channel-scoped tool");
                self.channel_scoped.insert(key, descriptor);
            }
            None => {
                if let Some(existing) = self.global.get(&descriptor.name) {
                    if existing.input_schema == descriptor.input_schema {
                        return Ok(());
                    }
                    return Err(CoreError::conflict(format!(
                        "tool '{}' already registered with a different schema",
                        descriptor.name
                    )));
                }
                info!(tool = %descriptor.name, "registered tool");
                self.global.insert(descriptor.name.clone(), descriptor);
            }
        }
        Ok(())
    }

    /// Remove a descriptor
    pub fn unregister(&self, name: &str, channel_scope: Option<Uuid>) {
        match channel_scope {
            Some(channel_id) => {
                self.channel_scoped.remove(&(channel_id, name.to_string()));
            }
            None => {
                self.global.remove(name);
            }
        }
    }

    /// Remove every descriptor provided by an external server
    pub fn unregister_server(&self, server: &str) {
        let matches_server = |d: &ToolDescriptor| {
            matches!(&d.source, ToolSource::External { server: s } if s == server)
        };
        self.global.retain(|_, d| !matches_server(d));
        self.channel_scoped.retain(|_, d| !matches_server(d));
    }

    /// Look up a descriptor as seen from a channel
    pub fn lookup(&self, name: &str, channel_id: Uuid) -> Option<ToolDescriptor> {
        self.channel_scoped
            .get(&(channel_id, name.to_string()))
            .map(|d| d.value().clone())
            .or_else(|| self.global.get(name).map(|d| d.value().clone()))
    }

    /// Tools available to a channel in a phase
    ///
    /// Union of internal, globally registered external, and channel-scoped
    /// external descriptors, filtered by phase gating and by the tool's
    /// circuit being admittable.
    pub fn list_available(&self, channel_id: Uuid, phase: Phase) -> Vec<ToolDescriptor> {
        let now = Utc::now();
        let mut out: Vec<ToolDescriptor> = Vec::new();

        for entry in self.global.iter() {
            let descriptor = entry.value();
            if descriptor.visible_to(channel_id) && descriptor.phase_allowed.contains(phase) {
                out.push(descriptor.clone());
            }
        }
        for entry in self.channel_scoped.iter() {
            if entry.key().0 == channel_id && entry.value().phase_allowed.contains(phase) {
                out.push(entry.value().clone());
            }
        }

        out.retain(|d| {
            !self.blocked.contains_key(&d.name)
                && !self.circuit(&d.name, channel_id).is_rejecting(now)
        });
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// The circuit for a (tool, channel) pair, created closed on first use
    pub fn circuit(&self, name: &str, channel_id: Uuid) -> Arc<CircuitBreaker> {
        self.circuits
            .entry((name.to_string(), channel_id))
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.circuit_config.clone())))
            .value()
            .clone()
    }

    /// Snapshot of a circuit's state
    pub fn circuit_snapshot(&self, name: &str, channel_id: Uuid) -> CircuitSnapshot {
        self.circuit(name, channel_id).snapshot()
    }

    /// Admit a tool call: visibility, phase gate, then circuit
    pub fn admit(&self, name: &str, channel_id: Uuid, phase: Phase) -> Result<ToolDescriptor> {
        let descriptor = self
            .lookup(name, channel_id)
            .ok_or_else(|| CoreError::ToolNotFound(name.to_string()))?;

        if !descriptor.phase_allowed.contains(phase) {
            return Err(CoreError::PhaseViolation {
                tool: name.to_string(),
                phase,
                allowed: descriptor.phase_allowed,
            });
        }

        if self.blocked.contains_key(name) {
            return Err(CoreError::CircuitOpen {
                tool: name.to_string(),
                retry_after_ms: self.circuit_config.cooldown.as_millis() as u64,
            });
        }

        self.circuit(name, channel_id)
            .check_admit(Utc::now())
            .map_err(|rejected| CoreError::CircuitOpen {
                tool: name.to_string(),
                retry_after_ms: rejected.retry_after_ms,
            })?;

        Ok(descriptor)
    }

    /// Record a successful execution for the circuit
    pub fn record_success(&self, name: &str, channel_id: Uuid) {
        self.circuit(name, channel_id).record_success();
    }

    /// Record a failed execution for the circuit
    pub fn record_failure(&self, name: &str, channel_id: Uuid) {
        self.circuit(name, channel_id).record_failure(Utc::now());
    }

    /// Periodic maintenance: half-open circuits whose cooldown elapsed
    pub fn health_tick(&self) {
        let now = Utc::now();
        for entry in self.circuits.iter() {
            entry.value().health_tick(now);
        }
    }

    /// Block a tool everywhere (its server was given up on)
    pub fn force_open_tool(&self, name: &str) {
        warn!(tool = %name, "forcing tool circuits open");
        self.blocked.insert(name.to_string(), ());
        let now = Utc::now();
        for entry in self.circuits.iter() {
            if entry.key().0 == name {
                entry.value().force_open(now);
            }
        }
    }

    /// Lift a global block (the tool's server recovered)
    pub fn reinstate_tool(&self, name: &str) {
        self.blocked.remove(name);
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindcycle_contracts::PhaseSet;
    use serde_json::json;

    fn echo_tool() -> ToolDescriptor {
        ToolDescriptor::internal("echo", "Echo", json!({"type": "object"}))
    }

    #[test]
    fn test_register_idempotent() {
        let registry = ToolRegistry::default();
        registry.register(echo_tool()).unwrap();
        registry.register(echo_tool()).unwrap();
        assert!(registry.lookup("echo", Uuid::now_v7()).is_some());
    }

    #[test]
    fn test_conflicting_schema_rejected() {
        let registry = ToolRegistry::default();
        registry.register(echo_tool()).unwrap();

        let conflicting = ToolDescriptor::internal(
            "echo",
            "Echo",
            json!({"type": "object", "required": ["text"]}),
        );
        let err = registry.register(conflicting).unwrap_err();
        assert!(matches!(err, CoreError::ToolConflict(_)));
    }

    #[test]
    fn test_channel_scoping() {
        let registry = ToolRegistry::default();
        let channel_a = Uuid::now_v7();
        let channel_b = Uuid::now_v7();

        registry
            .register(echo_tool().with_channel_scope(channel_a))
            .unwrap();

        assert!(registry.lookup("echo", channel_a).is_some());
        assert!(registry.lookup("echo", channel_b).is_none());
    }

    #[test]
    fn test_list_available_filters_phase() {
        let registry = ToolRegistry::default();
        let channel = Uuid::now_v7();

        registry.register(echo_tool()).unwrap(); // Act only
        registry
            .register(
                ToolDescriptor::internal("peek", "Peek", json!({"type": "object"}))
                    .with_phases(PhaseSet::of(&[Phase::Observe])),
            )
            .unwrap();

        let act_tools = registry.list_available(channel, Phase::Act);
        assert_eq!(act_tools.len(), 1);
        assert_eq!(act_tools[0].name, "echo");

        let observe_tools = registry.list_available(channel, Phase::Observe);
        assert_eq!(observe_tools.len(), 1);
        assert_eq!(observe_tools[0].name, "peek");
    }

    #[test]
    fn test_admit_phase_violation() {
        let registry = ToolRegistry::default();
        registry.register(echo_tool()).unwrap();

        let err = registry
            .admit("echo", Uuid::now_v7(), Phase::Observe)
            .unwrap_err();
        assert!(matches!(err, CoreError::PhaseViolation { .. }));
    }

    #[test]
    fn test_admit_unknown_tool() {
        let registry = ToolRegistry::default();
        let err = registry
            .admit("missing", Uuid::now_v7(), Phase::Act)
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolNotFound(_)));
    }

    #[test]
    fn test_circuit_rejection_and_listing() {
        let registry = ToolRegistry::new(
            CircuitBreakerConfig::new().with_failure_threshold(2),
        );
        let channel = Uuid::now_v7();
        registry.register(echo_tool()).unwrap();

        registry.record_failure("echo", channel);
        registry.record_failure("echo", channel);

        let err = registry.admit("echo", channel, Phase::Act).unwrap_err();
        assert!(matches!(err, CoreError::CircuitOpen { .. }));

        // Open circuit hides the tool from listings for this channel
        assert!(registry.list_available(channel, Phase::Act).is_empty());

        // Other channels have their own circuit
        let other = Uuid::now_v7();
        assert!(registry.admit("echo", other, Phase::Act).is_ok());
    }

    #[test]
    fn test_force_open_and_reinstate() {
        let registry = ToolRegistry::default();
        let channel = Uuid::now_v7();
        registry.register(echo_tool()).unwrap();

        registry.force_open_tool("echo");
        assert!(matches!(
            registry.admit("echo", channel, Phase::Act),
            Err(CoreError::CircuitOpen { .. })
        ));

        registry.reinstate_tool("echo");
        // The per-channel circuit may still be open from the force;
        // success recording recovers it
        registry.record_success("echo", channel);
        assert!(registry.admit("echo", channel, Phase::Act).is_ok());
    }

    #[test]
    fn test_unregister_server_tools() {
        let registry = ToolRegistry::default();
        registry
            .register(ToolDescriptor::external(
                "search",
                "search-srv",
                "Search",
                json!({"type": "object"}),
            ))
            .unwrap();
        registry.register(echo_tool()).unwrap();

        registry.unregister_server("search-srv");
        assert!(registry.lookup("search", Uuid::now_v7()).is_none());
        assert!(registry.lookup("echo", Uuid::now_v7()).is_some());
    }
}
