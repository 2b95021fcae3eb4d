// Assembly of the coordination core
//
// Explicit construction with dependency injection: every collaborator is
// built here (or passed in) and handed to the loop manager. No globals,
// no lazy singletons.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mindcycle_memory::{
    InMemoryMemoryStore, KeywordSimilarityBackend, MemoryStore, MulsConfig, MulsEngine,
    RetrievalConfig, Retriever, StrataRouter,
};

use crate::bus::{BusConfig, EventBus};
use crate::engine::manager::{EngineConfig, EngineDeps, LoopManager};
use crate::error::Result;
use crate::llm::{CompletionClient, PhaseClient, PhaseClientConfig};
use crate::tools::{
    BuiltinToolExecutor, CircuitBreakerConfig, GatedToolRunner, PatternStore, ToolRegistry,
    ToolServerSupervisor, ToolValidator,
};
use crate::tools::runner::RunnerConfig;

/// Top-level configuration for the core
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub engine: EngineConfig,
    pub bus: BusConfig,
    pub circuit: CircuitBreakerConfig,
    pub runner: RunnerConfig,
    pub phase_client: PhaseClientConfig,
    pub muls: MulsConfig,
    pub retrieval: RetrievalConfig,
    /// Workspace directory the built-in write_file tool is confined to
    pub sandbox_root: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            bus: BusConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            runner: RunnerConfig::default(),
            phase_client: PhaseClientConfig::default(),
            muls: MulsConfig::default(),
            retrieval: RetrievalConfig::default(),
            sandbox_root: std::env::temp_dir().join("mindcycle-workspace"),
        }
    }
}

/// Everything the rest of the system talks to
pub struct CoreHandles {
    pub bus: Arc<EventBus>,
    pub registry: Arc<ToolRegistry>,
    pub validator: Arc<ToolValidator>,
    pub patterns: Arc<PatternStore>,
    pub memory: Arc<dyn MemoryStore>,
    pub manager: Arc<LoopManager>,
    pub supervisor: Arc<ToolServerSupervisor>,
}

impl CoreHandles {
    /// Spawn the periodic maintenance task (circuit half-opening, tool
    /// server keep-alive, TTL sweeps)
    pub fn spawn_maintenance(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        let supervisor = self.supervisor.clone();
        let memory = self.memory.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.health_tick();
                supervisor.tick().await;
                let _ = memory.sweep_expired().await;
            }
        })
    }
}

/// Build the standard single-node core around a completion collaborator
pub fn assemble(config: CoreConfig, completion: Arc<dyn CompletionClient>) -> Result<CoreHandles> {
    let bus = EventBus::new(config.bus);

    let registry = Arc::new(ToolRegistry::new(config.circuit));
    let validator = Arc::new(ToolValidator::new());
    for descriptor in BuiltinToolExecutor::descriptors() {
        registry.register(descriptor)?;
    }
    BuiltinToolExecutor::install_rules(&validator);

    let patterns = Arc::new(PatternStore::default());
    let tool_runner = Arc::new(GatedToolRunner::new(
        registry.clone(),
        validator.clone(),
        patterns.clone(),
        Arc::new(BuiltinToolExecutor::new(config.sandbox_root)),
        config.runner,
    ));

    let memory: Arc<InMemoryMemoryStore> = Arc::new(InMemoryMemoryStore::new());
    let memory_dyn: Arc<dyn MemoryStore> = memory.clone();
    let backend = Arc::new(KeywordSimilarityBackend::new(memory_dyn.clone()));
    let retriever = Arc::new(Retriever::new(
        memory_dyn.clone(),
        backend,
        config.retrieval,
    ));
    let muls = Arc::new(MulsEngine::new(memory_dyn.clone(), config.muls));

    let phase_client = Arc::new(PhaseClient::new(completion, config.phase_client));

    let deps = Arc::new(EngineDeps {
        bus: bus.clone(),
        registry: registry.clone(),
        tool_runner,
        phase_client,
        memory: memory_dyn.clone(),
        muls,
        retriever,
        router: StrataRouter::new(),
    });

    let manager = Arc::new(LoopManager::new(deps, config.engine));
    let supervisor = Arc::new(ToolServerSupervisor::new(registry.clone()));

    Ok(CoreHandles {
        bus,
        registry,
        validator,
        patterns,
        memory: memory_dyn,
        manager,
        supervisor,
    })
}
