// The gated execution path
//
// Admission (phase gate + circuit), then validation with bounded
// auto-correction, then execution under a cancellation token and an
// explicit timeout. Outcomes feed the circuit and the pattern store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use mindcycle_contracts::Phase;

use super::correction::{CorrectionConfig, CorrectionEngine};
use super::descriptor::ToolDescriptor;
use super::patterns::PatternStore;
use super::registry::ToolRegistry;
use super::validation::{ToolValidator, ValidationLevel};
use crate::error::{CoreError, Result};

/// Executes an admitted, validated tool call
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, descriptor: &ToolDescriptor, params: &Value) -> Result<Value>;
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub correction: CorrectionConfig,
    /// Hard deadline per tool execution
    pub execution_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            correction: CorrectionConfig::default(),
            execution_timeout: Duration::from_secs(30),
        }
    }
}

/// The gated tool runner
pub struct GatedToolRunner {
    registry: Arc<ToolRegistry>,
    validator: Arc<ToolValidator>,
    correction: CorrectionEngine,
    patterns: Arc<PatternStore>,
    executor: Arc<dyn ToolExecutor>,
    config: RunnerConfig,
}

impl GatedToolRunner {
    pub fn new(
        registry: Arc<ToolRegistry>,
        validator: Arc<ToolValidator>,
        patterns: Arc<PatternStore>,
        executor: Arc<dyn ToolExecutor>,
        config: RunnerConfig,
    ) -> Self {
        let correction = CorrectionEngine::new(config.correction.clone(), patterns.clone());
        Self {
            registry,
            validator,
            correction,
            patterns,
            executor,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run a tool call through the full gated path
    pub async fn run(
        &self,
        channel_id: Uuid,
        phase: Phase,
        tool: &str,
        params: Value,
        token: &CancellationToken,
    ) -> Result<Value> {
        let descriptor = self.registry.admit(tool, channel_id, phase)?;
        let level = ValidationLevel::for_risk(descriptor.risk_level);

        let params = self.validate_and_correct(&descriptor, params, level, channel_id)?;

        let execution = self.executor.execute(&descriptor, &params);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                // Cancellation is cooperative and never counts against the circuit
                return Err(CoreError::Cancelled);
            }
            result = tokio::time::timeout(self.config.execution_timeout, execution) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(CoreError::tool(format!(
                        "tool '{tool}' timed out after {:?}",
                        self.config.execution_timeout
                    ))),
                }
            }
        };

        match result {
            Ok(value) => {
                self.registry.record_success(tool, channel_id);
                self.patterns.record_success(channel_id, tool, &params);
                Ok(value)
            }
            Err(e) => {
                self.registry.record_failure(tool, channel_id);
                self.patterns.record_failure(channel_id, tool);
                warn!(tool = %tool, channel = %channel_id, error = %e, "tool execution failed");
                Err(match e {
                    CoreError::ToolFailure(msg) => CoreError::ToolFailure(msg),
                    other => CoreError::tool(other.to_string()),
                })
            }
        }
    }

    /// Validate, correcting under the attempt budget when required
    fn validate_and_correct(
        &self,
        descriptor: &ToolDescriptor,
        params: Value,
        level: ValidationLevel,
        channel_id: Uuid,
    ) -> Result<Value> {
        if level == ValidationLevel::Async {
            // Fire-and-forget: a failed check is recorded for learning but
            // never blocks execution
            if let Err(failure) = self.validator.validate(descriptor, &params, level) {
                debug!(
                    tool = %descriptor.name,
                    detail = %failure.detail,
                    "async-level validation failed, executing anyway"
                );
                self.patterns.record_failure(channel_id, &descriptor.name);
            }
            return Ok(params);
        }

        let max_attempts = self.config.correction.max_retries;
        let mut params = params;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.validator.validate(descriptor, &params, level) {
                Ok(_assessment) => return Ok(params),
                Err(failure) => {
                    if attempts >= max_attempts {
                        self.patterns.record_failure(channel_id, &descriptor.name);
                        return Err(CoreError::CorrectionExhausted {
                            tool: descriptor.name.clone(),
                            attempts,
                            last_error: failure.detail,
                        });
                    }

                    match self.correction.correct(
                        descriptor,
                        &params,
                        &failure,
                        channel_id,
                        &self.validator,
                        level,
                    ) {
                        Some(outcome) => {
                            debug!(
                                tool = %descriptor.name,
                                strategy = ?outcome.strategy,
                                confidence = outcome.confidence,
                                attempt = attempts,
                                "applying correction"
                            );
                            params = outcome.params;
                        }
                        None => {
                            self.patterns.record_failure(channel_id, &descriptor.name);
                            return Err(CoreError::CorrectionExhausted {
                                tool: descriptor.name.clone(),
                                attempts,
                                last_error: failure.detail,
                            });
                        }
                    }
                }
            }
        }
    }
}
