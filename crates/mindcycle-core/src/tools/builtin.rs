// Built-in internal tools
//
// Registered statically at startup. Small on purpose: enough surface to
// exercise the registry, the validation pipeline, and phase gating the
// way production deployments do.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use mindcycle_contracts::{Phase, PhaseSet};

use super::descriptor::{RiskLevel, ToolDescriptor};
use super::runner::ToolExecutor;
use super::validation::{SemanticRule, ToolValidator};
use crate::error::{CoreError, Result};

/// Executor for the built-in tools
pub struct BuiltinToolExecutor {
    /// Root directory write_file is confined to
    sandbox_root: PathBuf,
}

impl BuiltinToolExecutor {
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
        }
    }

    /// Descriptors for every built-in tool
    pub fn descriptors() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::internal(
                "echo",
                "Echo the parameters back, useful for wiring checks",
                json!({"type": "object"}),
            )
            .with_phases(PhaseSet::all()),
            ToolDescriptor::internal(
                "current_time",
                "Get the current date and time",
                json!({
                    "type": "object",
                    "properties": {
                        "format": {
                            "type": "string",
                            "enum": ["iso8601", "unix"],
                        },
                    },
                    "additionalProperties": false,
                }),
            )
            .with_phases(PhaseSet::of(&[Phase::Observe, Phase::Act])),
            ToolDescriptor::internal(
                "evaluate_math",
                "Evaluate an arithmetic expression",
                json!({
                    "type": "object",
                    "required": ["expression"],
                    "properties": {
                        "expression": { "type": "string", "maxLength": 1024 },
                    },
                    "additionalProperties": false,
                }),
            )
            .with_phases(PhaseSet::of(&[Phase::Reason, Phase::Plan, Phase::Act])),
            ToolDescriptor::internal(
                "write_file",
                "Write text content to a file inside the agent workspace",
                json!({
                    "type": "object",
                    "required": ["path", "content"],
                    "properties": {
                        "path": { "type": "string" },
                        "content": { "type": "string" },
                    },
                    "additionalProperties": false,
                }),
            )
            .with_risk(RiskLevel::High)
            .with_phases(PhaseSet::only(Phase::Act)),
        ]
    }

    /// Semantic rules the built-ins require
    pub fn install_rules(validator: &ToolValidator) {
        validator.add_rules(
            "write_file",
            vec![SemanticRule::SafePath {
                field: "path".into(),
            }],
        );
    }

    fn current_time(&self, params: &Value) -> Result<Value> {
        let now = Utc::now();
        let format = params
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("iso8601");
        let value = match format {
            "unix" => json!(now.timestamp()),
            _ => json!(now.to_rfc3339()),
        };
        Ok(json!({"time": value, "format": format}))
    }

    fn evaluate_math(&self, params: &Value) -> Result<Value> {
        let expression = params
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::tool("evaluate_math: missing expression"))?;

        let result = evalexpr::eval(expression)
            .map_err(|e| CoreError::tool(format!("evaluate_math: {e}")))?;

        let value = match result {
            evalexpr::Value::Int(i) => json!(i),
            evalexpr::Value::Float(f) => json!(f),
            evalexpr::Value::Boolean(b) => json!(b),
            evalexpr::Value::String(s) => json!(s),
            other => json!(other.to_string()),
        };
        Ok(json!({"result": value}))
    }

    async fn write_file(&self, params: &Value) -> Result<Value> {
        let path = params
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::tool("write_file: missing path"))?;
        let content = params
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::tool("write_file: missing content"))?;

        // Confine to the sandbox regardless of how the path was spelled
        let relative = path.trim_start_matches('/');
        let full = self.sandbox_root.join(relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::tool(format!("write_file: {e}")))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| CoreError::tool(format!("write_file: {e}")))?;

        Ok(json!({
            "path": full.to_string_lossy(),
            "bytes_written": content.len(),
        }))
    }
}

#[async_trait]
impl ToolExecutor for BuiltinToolExecutor {
    async fn execute(&self, descriptor: &ToolDescriptor, params: &Value) -> Result<Value> {
        match descriptor.name.as_str() {
            "echo" => Ok(json!({"echo": params})),
            "current_time" => self.current_time(params),
            "evaluate_math" => self.evaluate_math(params),
            "write_file" => self.write_file(params).await,
            other => Err(CoreError::ToolNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> BuiltinToolExecutor {
        BuiltinToolExecutor::new(std::env::temp_dir().join("mindcycle-builtin-tests"))
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        BuiltinToolExecutor::descriptors()
            .into_iter()
            .find(|d| d.name == name)
            .unwrap()
    }

    #[tokio::test]
    async fn test_echo() {
        let result = executor()
            .execute(&descriptor("echo"), &json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(result["echo"]["a"], json!(1));
    }

    #[tokio::test]
    async fn test_evaluate_math() {
        let result = executor()
            .execute(
                &descriptor("evaluate_math"),
                &json!({"expression": "2 + 2 * 3"}),
            )
            .await
            .unwrap();
        assert_eq!(result["result"], json!(8));
    }

    #[tokio::test]
    async fn test_evaluate_math_error() {
        let err = executor()
            .execute(
                &descriptor("evaluate_math"),
                &json!({"expression": "2 +"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolFailure(_)));
    }

    #[tokio::test]
    async fn test_current_time_formats() {
        let iso = executor()
            .execute(&descriptor("current_time"), &json!({}))
            .await
            .unwrap();
        assert!(iso["time"].is_string());

        let unix = executor()
            .execute(&descriptor("current_time"), &json!({"format": "unix"}))
            .await
            .unwrap();
        assert!(unix["time"].is_i64());
    }

    #[tokio::test]
    async fn test_write_file_confined_to_sandbox() {
        let executor = executor();
        let result = executor
            .execute(
                &descriptor("write_file"),
                &json!({"path": "/notes/today.txt", "content": "hello"}),
            )
            .await
            .unwrap();

        let written = result["path"].as_str().unwrap();
        assert!(written.starts_with(executor.sandbox_root.to_str().unwrap()));
        assert_eq!(result["bytes_written"], json!(5));

        let on_disk = tokio::fs::read_to_string(written).await.unwrap();
        assert_eq!(on_disk, "hello");
    }

    #[test]
    fn test_phase_sets() {
        assert!(descriptor("write_file").phase_allowed.contains(Phase::Act));
        assert!(!descriptor("write_file").phase_allowed.contains(Phase::Observe));
        assert!(descriptor("current_time").phase_allowed.contains(Phase::Observe));
    }
}
