// External tool-server supervision
//
// Tool servers are externally managed collaborators behind a handle
// trait (subprocess, container, remote - the supervisor does not care).
// Idle servers are stopped after the keep-alive window and restarted on
// next use; crashed servers are restarted under a retry cap, after which
// their tools' circuits are forced open.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::descriptor::{ToolDescriptor, ToolSource};
use super::registry::ToolRegistry;
use crate::error::{CoreError, Result};

/// Lifecycle handle for an externally managed tool server
#[async_trait]
pub trait ToolServerHandle: Send + Sync {
    /// Start (or restart) the server
    async fn start(&self) -> Result<()>;

    /// Stop the server
    async fn stop(&self) -> Result<()>;

    /// Whether the server process is currently alive
    fn is_running(&self) -> bool;
}

/// Per-server supervision configuration
#[derive(Debug, Clone)]
pub struct ToolServerConfig {
    pub name: String,
    /// Stop the server after this much idle time
    pub keep_alive: Duration,
    pub restart_on_crash: bool,
    /// Crash restarts allowed before giving up
    pub max_restarts: u32,
}

impl ToolServerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keep_alive: Duration::from_secs(10 * 60),
            restart_on_crash: true,
            max_restarts: 3,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_restart_on_crash(mut self, restart: bool) -> Self {
        self.restart_on_crash = restart;
        self
    }

    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }
}

struct Supervised {
    config: ToolServerConfig,
    handle: Arc<dyn ToolServerHandle>,
    tools: Vec<String>,
    last_used: Mutex<DateTime<Utc>>,
    restarts: AtomicU32,
    /// Stopped on purpose for idleness (distinguishes from a crash)
    idle_stopped: AtomicBool,
    given_up: AtomicBool,
}

/// Supervisor for external tool servers
pub struct ToolServerSupervisor {
    registry: Arc<ToolRegistry>,
    servers: DashMap<String, Arc<Supervised>>,
}

impl ToolServerSupervisor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            servers: DashMap::new(),
        }
    }

    /// Start a server and register its tools
    ///
    /// Every descriptor must name this server as its source.
    pub async fn register_server(
        &self,
        config: ToolServerConfig,
        handle: Arc<dyn ToolServerHandle>,
        descriptors: Vec<ToolDescriptor>,
    ) -> Result<()> {
        for descriptor in &descriptors {
            match &descriptor.source {
                ToolSource::External { server } if *server == config.name => {}
                _ => {
                    return Err(CoreError::conflict(format!(
                        "tool '{}' does not belong to server '{}'",
                        descriptor.name, config.name
                    )))
                }
            }
        }

        handle.start().await?;

        let tools: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        for descriptor in descriptors {
            self.registry.register(descriptor)?;
        }

        info!(server = %config.name, tools = tools.len(), "tool server registered");
        self.servers.insert(
            config.name.clone(),
            Arc::new(Supervised {
                config,
                handle,
                tools,
                last_used: Mutex::new(Utc::now()),
                restarts: AtomicU32::new(0),
                idle_stopped: AtomicBool::new(false),
                given_up: AtomicBool::new(false),
            }),
        );
        Ok(())
    }

    /// Record use of a server, restarting it if it was idle-stopped
    pub async fn touch(&self, server: &str) -> Result<()> {
        let Some(entry) = self.servers.get(server).map(|e| e.value().clone()) else {
            return Err(CoreError::ToolNotFound(format!("tool server {server}")));
        };
        *entry.last_used.lock() = Utc::now();

        if entry.given_up.load(Ordering::Relaxed) {
            return Err(CoreError::tool(format!("tool server {server} is out of service")));
        }
        if entry.idle_stopped.swap(false, Ordering::Relaxed) {
            info!(server = %server, "restarting idle-stopped tool server");
            entry.handle.start().await?;
        }
        Ok(())
    }

    /// Periodic maintenance: stop idle servers, restart crashed ones
    pub async fn tick(&self) {
        let now = Utc::now();
        let servers: Vec<Arc<Supervised>> =
            self.servers.iter().map(|e| e.value().clone()).collect();

        for server in servers {
            if server.given_up.load(Ordering::Relaxed) {
                continue;
            }

            if !server.handle.is_running() {
                if server.idle_stopped.load(Ordering::Relaxed) {
                    continue;
                }
                self.handle_crash(&server).await;
                continue;
            }

            let idle = now
                .signed_duration_since(*server.last_used.lock())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if idle >= server.config.keep_alive {
                info!(server = %server.config.name, ?idle, "stopping idle tool server");
                server.idle_stopped.store(true, Ordering::Relaxed);
                if let Err(e) = server.handle.stop().await {
                    warn!(server = %server.config.name, error = %e, "idle stop failed");
                }
            }
        }
    }

    async fn handle_crash(&self, server: &Supervised) {
        let name = &server.config.name;
        let attempts = server.restarts.load(Ordering::Relaxed);

        if server.config.restart_on_crash && attempts < server.config.max_restarts {
            server.restarts.fetch_add(1, Ordering::Relaxed);
            warn!(server = %name, attempt = attempts + 1, "tool server crashed, restarting");
            match server.handle.start().await {
                Ok(()) => {
                    for tool in &server.tools {
                        self.registry.reinstate_tool(tool);
                    }
                }
                Err(e) => {
                    error!(server = %name, error = %e, "tool server restart failed");
                }
            }
        } else {
            error!(server = %name, attempts, "giving up on tool server, opening circuits");
            server.given_up.store(true, Ordering::Relaxed);
            for tool in &server.tools {
                self.registry.force_open_tool(tool);
            }
        }
    }

    /// Whether a server has been given up on
    pub fn is_out_of_service(&self, server: &str) -> bool {
        self.servers
            .get(server)
            .map(|e| e.given_up.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}
