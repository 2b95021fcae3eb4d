// Mindcycle server binary
//
// Assembles the core, wires the bridge, and serves the WebSocket
// transport. LLM providers are deployment collaborators; without one
// configured, reasoning degrades to the documented fallback artifacts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use mindcycle_core::{
    assemble, CompletionClient, CompletionRequest, CoreConfig, CoreError,
};
use mindcycle_server::auth::generate_agent_key;
use mindcycle_server::{
    AgentDirectory, AuthStore, BridgeConfig, NetworkBridge, RoomRegistry, TransportState,
};

/// Placeholder completion collaborator
///
/// Surfaces every call as a failure so loops take the documented
/// degraded path instead of fabricating output.
struct UnconfiguredCompletionClient;

#[async_trait]
impl CompletionClient for UnconfiguredCompletionClient {
    async fn complete(&self, _request: CompletionRequest) -> mindcycle_core::Result<String> {
        Err(CoreError::llm("no completion provider configured"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mindcycle_server=info,mindcycle_core=info".into()),
        )
        .init();

    let bridge_config = BridgeConfig::from_env();
    if bridge_config.jwt_secret.is_empty() {
        warn!("MINDCYCLE_JWT_SECRET not set; bearer tokens will be rejected");
    }

    let core = assemble(CoreConfig::default(), Arc::new(UnconfiguredCompletionClient))?;
    let _maintenance = core.spawn_maintenance(std::time::Duration::from_secs(5));

    let auth = Arc::new(AuthStore::new(bridge_config.jwt_secret.clone()));

    // Bootstrap credential for first connection; shown once, stored hashed
    let bootstrap_agent = uuid::Uuid::now_v7();
    let bootstrap_key = generate_agent_key();
    auth.register_agent_key(bootstrap_key.key_hash.clone(), bootstrap_agent);
    info!(
        agent_id = %bootstrap_agent,
        key = %bootstrap_key.key,
        "bootstrap agent key (shown once)"
    );

    let rooms = Arc::new(RoomRegistry::default());
    let bridge = Arc::new(NetworkBridge::new(
        core.bus.clone(),
        rooms,
        core.manager.clone(),
    ));

    let state = Arc::new(TransportState {
        bridge,
        auth,
        agents: Arc::new(AgentDirectory::new()),
        config: bridge_config.clone(),
    });

    let app = mindcycle_server::router(state);
    let listener = tokio::net::TcpListener::bind(bridge_config.bind_addr).await?;
    info!(addr = %bridge_config.bind_addr, "mindcycle server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
