// LLM phase client
//
// A thin, phase-parameterized wrapper over an opaque completion
// collaborator. Requests flow through a single throttled queue (blocks
// when full, never drops). Structured outputs get one parse retry, then
// the caller falls back to the documented degraded artifact. No
// simulated responses - provider failures surface as errors.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use mindcycle_contracts::{Observation, Phase, Plan, PlannedAction, Reasoning};

use crate::error::{CoreError, Result};
use crate::tools::ToolDescriptor;

/// Optional reasoning depth hint for providers that support it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningDepth {
    Shallow,
    Standard,
    Deep,
}

/// A provider-agnostic completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub reasoning_depth: Option<ReasoningDepth>,
}

/// The opaque completion collaborator
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Model parameters for one phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseModelConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub reasoning_depth: Option<ReasoningDepth>,
}

/// Phase client configuration
#[derive(Debug, Clone)]
pub struct PhaseClientConfig {
    pub observe: PhaseModelConfig,
    pub reason: PhaseModelConfig,
    pub plan: PhaseModelConfig,
    pub act: PhaseModelConfig,
    pub reflect: PhaseModelConfig,
    /// Minimum delay between provider calls
    pub request_delay: Duration,
    /// Queue depth; senders block when full
    pub queue_depth: usize,
}

impl Default for PhaseClientConfig {
    fn default() -> Self {
        Self {
            observe: PhaseModelConfig {
                temperature: 0.3,
                max_tokens: 1024,
                reasoning_depth: None,
            },
            reason: PhaseModelConfig {
                temperature: 0.7,
                max_tokens: 4096,
                reasoning_depth: Some(ReasoningDepth::Deep),
            },
            plan: PhaseModelConfig {
                temperature: 0.4,
                max_tokens: 2048,
                reasoning_depth: Some(ReasoningDepth::Standard),
            },
            act: PhaseModelConfig {
                temperature: 0.2,
                max_tokens: 1024,
                reasoning_depth: None,
            },
            reflect: PhaseModelConfig {
                temperature: 0.6,
                max_tokens: 2048,
                reasoning_depth: Some(ReasoningDepth::Standard),
            },
            request_delay: Duration::from_millis(250),
            queue_depth: 32,
        }
    }
}

impl PhaseClientConfig {
    pub fn for_phase(&self, phase: Phase) -> PhaseModelConfig {
        match phase {
            Phase::Observe => self.observe,
            Phase::Reason => self.reason,
            Phase::Plan => self.plan,
            Phase::Act => self.act,
            Phase::Reflect => self.reflect,
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

struct QueuedRequest {
    request: CompletionRequest,
    token: CancellationToken,
    reply: oneshot::Sender<Result<String>>,
}

/// Phase-parameterized completion calls behind a throttled queue
pub struct PhaseClient {
    tx: mpsc::Sender<QueuedRequest>,
    config: PhaseClientConfig,
}

impl PhaseClient {
    pub fn new(client: Arc<dyn CompletionClient>, config: PhaseClientConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueuedRequest>(config.queue_depth);
        let delay = config.request_delay;

        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                if queued.token.is_cancelled() {
                    let _ = queued.reply.send(Err(CoreError::Cancelled));
                    continue;
                }

                let result = tokio::select! {
                    biased;
                    _ = queued.token.cancelled() => Err(CoreError::Cancelled),
                    result = client.complete(queued.request) => result,
                };
                let _ = queued.reply.send(result);

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        });

        Self { tx, config }
    }

    /// Raw phase-parameterized completion
    pub async fn complete(
        &self,
        phase: Phase,
        system: impl Into<String>,
        prompt: impl Into<String>,
        token: &CancellationToken,
    ) -> Result<String> {
        let model = self.config.for_phase(phase);
        let request = CompletionRequest {
            system: system.into(),
            prompt: prompt.into(),
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            reasoning_depth: model.reasoning_depth,
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(QueuedRequest {
                request,
                token: token.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| CoreError::llm("completion queue closed"))?;

        reply_rx
            .await
            .map_err(|_| CoreError::llm("completion worker dropped the request"))?
    }

    /// Structured completion with one parse retry
    async fn complete_structured<T: for<'de> Deserialize<'de>>(
        &self,
        phase: Phase,
        system: &str,
        prompt: &str,
        token: &CancellationToken,
    ) -> Result<T> {
        let raw = self.complete(phase, system, prompt, token).await?;
        match parse_json_block::<T>(&raw) {
            Ok(parsed) => Ok(parsed),
            Err(parse_error) => {
                warn!(phase = %phase, error = %parse_error, "structured output parse failed, retrying once");
                let retry_prompt = format!(
                    "{prompt}\n\nYour previous reply was not valid JSON ({parse_error}). \
                     Respond with ONLY the JSON object, no prose."
                );
                let raw = self.complete(phase, system, &retry_prompt, token).await?;
                parse_json_block::<T>(&raw)
                    .map_err(|e| CoreError::llm(format!("unparseable structured output: {e}")))
            }
        }
    }

    /// Produce a reasoning artifact for the Reason phase
    pub async fn reason(
        &self,
        loop_id: Uuid,
        observations: &[Observation],
        memories: &[String],
        token: &CancellationToken,
    ) -> Result<Reasoning> {
        let observation_lines: Vec<String> = observations
            .iter()
            .map(|o| format!("- [{}] {}", o.source, o.content))
            .collect();
        let memory_lines = if memories.is_empty() {
            "(none)".to_string()
        } else {
            memories
                .iter()
                .map(|m| format!("- {m}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "Observations:\n{}\n\nRelevant memories:\n{}\n\n\
             Analyze the observations. Respond as JSON: \
             {{\"analysis\": string, \"confidence\": number in [0,1]}}",
            observation_lines.join("\n"),
            memory_lines,
        );

        let dto: ReasoningDto = self
            .complete_structured(
                Phase::Reason,
                "You are the reasoning stage of a cognitive cycle.",
                &prompt,
                token,
            )
            .await?;

        debug!(loop_id = %loop_id, confidence = dto.confidence, "reasoning produced");
        Ok(Reasoning::new(loop_id, dto.analysis, dto.confidence))
    }

    /// Produce a plan from a reasoning artifact for the Plan phase
    pub async fn plan(
        &self,
        reasoning: &Reasoning,
        tools: &[ToolDescriptor],
        memories: &[String],
        token: &CancellationToken,
    ) -> Result<Plan> {
        let tool_lines: Vec<String> = tools
            .iter()
            .map(|t| format!("- {}: {} (parameters: {})", t.name, t.description, t.input_schema))
            .collect();
        let memory_lines = if memories.is_empty() {
            "(none)".to_string()
        } else {
            memories
                .iter()
                .map(|m| format!("- {m}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "Reasoning:\n{}\n\nAvailable tools:\n{}\n\nRelevant memories:\n{}\n\n\
             Produce a plan. Respond as JSON: {{\"goal\": string, \"actions\": \
             [{{\"description\": string, \"tool\": string|null, \
             \"parameters\": object|null, \"priority\": integer}}]}}. \
             At least one action is required.",
            reasoning.analysis,
            tool_lines.join("\n"),
            memory_lines,
        );

        let dto: PlanDto = self
            .complete_structured(
                Phase::Plan,
                "You are the planning stage of a cognitive cycle.",
                &prompt,
                token,
            )
            .await?;

        if dto.actions.is_empty() {
            return Err(CoreError::llm("planner returned an empty action list"));
        }

        let actions = dto
            .actions
            .into_iter()
            .map(|a| {
                let mut action = match a.tool {
                    Some(tool) => PlannedAction::tool_call(
                        a.description,
                        tool,
                        a.parameters.unwrap_or(Value::Null),
                    ),
                    None => PlannedAction::step(a.description),
                };
                action.priority = a.priority;
                action
            })
            .collect();

        Ok(Plan::new(reasoning.id, dto.goal, actions))
    }
}

#[derive(Debug, Deserialize)]
struct ReasoningDto {
    analysis: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct PlanDto {
    goal: String,
    actions: Vec<PlanActionDto>,
}

#[derive(Debug, Deserialize)]
struct PlanActionDto {
    description: String,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    priority: u8,
}

/// Parse a JSON object out of a completion, tolerating code fences
fn parse_json_block<T: for<'de> Deserialize<'de>>(raw: &str) -> std::result::Result<T, String> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_start())
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|e| e.to_string())
}

/// Scripted completion client for tests and examples
///
/// Returns queued responses in order; an exhausted queue is an error
/// (never a simulated response).
#[derive(Default)]
pub struct MockCompletionClient {
    responses: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().push_back(Ok(text.into()));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .push_back(Err(CoreError::llm(message.into())));
    }

    /// Requests seen so far
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.calls.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(CoreError::llm("no scripted response left")))
    }
}
