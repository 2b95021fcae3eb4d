// Pre-execution validation: schema, semantic rules, risk assessment
//
// Validation depth is selected by the tool's risk level. Async never
// blocks execution (schema check only, recorded for learning), Blocking
// requires a pass, Strict adds per-tool semantic rules and a risk score.

use std::sync::Arc;
use std::sync::OnceLock;

use dashmap::DashMap;
use jsonschema::JSONSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::descriptor::{RiskLevel, ToolDescriptor};

/// How much validation runs before execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Fire-and-forget; never blocks execution
    Async,
    /// A pass is required before the call is admitted
    Blocking,
    /// Schema + semantic rules + risk assessment
    Strict,
}

impl ValidationLevel {
    /// Level selected by a tool's declared risk
    pub fn for_risk(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Low => ValidationLevel::Async,
            RiskLevel::Medium => ValidationLevel::Blocking,
            RiskLevel::High => ValidationLevel::Strict,
        }
    }
}

/// Categorical risk outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Minimal,
    Guarded,
    Elevated,
    Critical,
}

/// Risk assessment result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Score in [0, 1]
    pub score: f64,
    pub category: RiskCategory,
}

impl RiskAssessment {
    fn from_score(score: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        let category = if score < 0.25 {
            RiskCategory::Minimal
        } else if score < 0.5 {
            RiskCategory::Guarded
        } else if score < 0.75 {
            RiskCategory::Elevated
        } else {
            RiskCategory::Critical
        };
        Self { score, category }
    }
}

/// What part of validation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Schema,
    Semantic,
}

/// A validation failure, fed to the correction pipeline
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ValidationFailure {
    fn schema(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Schema,
            detail: detail.into(),
        }
    }

    fn semantic(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Semantic,
            detail: detail.into(),
        }
    }
}

fn traversal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(^|[/\\])\.\.([/\\]|$)").expect("static regex"))
}

/// Per-tool semantic rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SemanticRule {
    /// Field must be a path without traversal segments or NUL bytes
    SafePath { field: String },
    /// String field length bound
    MaxLength { field: String, max: usize },
    /// Field must be one of the allowed values
    OneOf { field: String, allowed: Vec<String> },
    /// Numeric field range
    Range { field: String, min: f64, max: f64 },
    /// If `field` is present, `requires` must be too
    RequiresWith { field: String, requires: String },
}

impl SemanticRule {
    fn check(&self, params: &serde_json::Value) -> Result<(), String> {
        match self {
            SemanticRule::SafePath { field } => {
                let Some(path) = params.get(field).and_then(|v| v.as_str()) else {
                    return Ok(());
                };
                if path.is_empty() {
                    return Err(format!("{field}: path is empty"));
                }
                if path.contains('\0') {
                    return Err(format!("{field}: path contains NUL"));
                }
                if traversal_pattern().is_match(path) {
                    return Err(format!("{field}: path traversal is not allowed"));
                }
                Ok(())
            }
            SemanticRule::MaxLength { field, max } => {
                if let Some(s) = params.get(field).and_then(|v| v.as_str()) {
                    if s.len() > *max {
                        return Err(format!("{field}: length {} exceeds {max}", s.len()));
                    }
                }
                Ok(())
            }
            SemanticRule::OneOf { field, allowed } => {
                if let Some(s) = params.get(field).and_then(|v| v.as_str()) {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(format!("{field}: '{s}' not in {allowed:?}"));
                    }
                }
                Ok(())
            }
            SemanticRule::Range { field, min, max } => {
                if let Some(n) = params.get(field).and_then(|v| v.as_f64()) {
                    if n < *min || n > *max {
                        return Err(format!("{field}: {n} outside [{min}, {max}]"));
                    }
                }
                Ok(())
            }
            SemanticRule::RequiresWith { field, requires } => {
                if params.get(field).is_some() && params.get(requires).is_none() {
                    return Err(format!("{field} requires {requires}"));
                }
                Ok(())
            }
        }
    }
}

/// Validator with compiled-schema caching and per-tool semantic rules
///
/// Registered schemas are stable for a tool name (the registry rejects
/// conflicting re-registration), so the compile cache is keyed by name.
pub struct ToolValidator {
    compiled: DashMap<String, Arc<JSONSchema>>,
    rules: DashMap<String, Vec<SemanticRule>>,
}

impl Default for ToolValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolValidator {
    pub fn new() -> Self {
        Self {
            compiled: DashMap::new(),
            rules: DashMap::new(),
        }
    }

    /// Attach semantic rules to a tool
    pub fn add_rules(&self, tool: impl Into<String>, rules: Vec<SemanticRule>) {
        self.rules.entry(tool.into()).or_default().extend(rules);
    }

    fn schema_for(&self, descriptor: &ToolDescriptor) -> Result<Arc<JSONSchema>, ValidationFailure> {
        if let Some(cached) = self.compiled.get(&descriptor.name) {
            return Ok(cached.clone());
        }
        let compiled = JSONSchema::compile(&descriptor.input_schema)
            .map_err(|e| ValidationFailure::schema(format!("invalid tool schema: {e}")))?;
        let compiled = Arc::new(compiled);
        self.compiled
            .insert(descriptor.name.clone(), compiled.clone());
        Ok(compiled)
    }

    /// Validate parameters at the given level
    pub fn validate(
        &self,
        descriptor: &ToolDescriptor,
        params: &serde_json::Value,
        level: ValidationLevel,
    ) -> Result<RiskAssessment, ValidationFailure> {
        // Schema check runs at every level
        let schema = self.schema_for(descriptor)?;
        if let Err(errors) = schema.validate(params) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ValidationFailure::schema(detail));
        }

        if level == ValidationLevel::Async {
            return Ok(RiskAssessment::from_score(0.0));
        }

        // Semantic rules
        if let Some(rules) = self.rules.get(&descriptor.name) {
            for rule in rules.iter() {
                rule.check(params).map_err(ValidationFailure::semantic)?;
            }
        }

        if level == ValidationLevel::Blocking {
            return Ok(RiskAssessment::from_score(0.0));
        }

        // Strict: score the call
        Ok(self.assess(descriptor, params))
    }

    /// Compute a risk score for an already-valid call
    fn assess(&self, descriptor: &ToolDescriptor, params: &serde_json::Value) -> RiskAssessment {
        let mut score = match descriptor.risk_level {
            RiskLevel::Low => 0.15,
            RiskLevel::Medium => 0.45,
            RiskLevel::High => 0.7,
        };

        if let Some(obj) = params.as_object() {
            // Large payloads and absolute paths raise the score
            for value in obj.values() {
                if let Some(s) = value.as_str() {
                    if s.len() > 4096 {
                        score += 0.1;
                    }
                    if s.starts_with('/') && !s.starts_with("/tmp/") {
                        score += 0.05;
                    }
                }
            }
        }

        RiskAssessment::from_score(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindcycle_contracts::{Phase, PhaseSet};
    use serde_json::json;

    fn write_file_descriptor() -> ToolDescriptor {
        ToolDescriptor::internal(
            "write_file",
            "Write a file",
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
        .with_phases(PhaseSet::only(Phase::Act))
    }

    #[test]
    fn test_level_for_risk() {
        assert_eq!(ValidationLevel::for_risk(RiskLevel::Low), ValidationLevel::Async);
        assert_eq!(
            ValidationLevel::for_risk(RiskLevel::Medium),
            ValidationLevel::Blocking
        );
        assert_eq!(
            ValidationLevel::for_risk(RiskLevel::High),
            ValidationLevel::Strict
        );
    }

    #[test]
    fn test_schema_pass_and_fail() {
        let validator = ToolValidator::new();
        let descriptor = write_file_descriptor();

        let ok = validator.validate(
            &descriptor,
            &json!({"path": "notes.txt", "content": "hi"}),
            ValidationLevel::Blocking,
        );
        assert!(ok.is_ok());

        // content must be a string
        let err = validator
            .validate(
                &descriptor,
                &json!({"path": "notes.txt", "content": 12345}),
                ValidationLevel::Blocking,
            )
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Schema);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let validator = ToolValidator::new();
        validator.add_rules(
            "write_file",
            vec![SemanticRule::SafePath {
                field: "path".into(),
            }],
        );
        let descriptor = write_file_descriptor();

        let err = validator
            .validate(
                &descriptor,
                &json!({"path": "../../etc/passwd", "content": "x"}),
                ValidationLevel::Strict,
            )
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Semantic);
    }

    #[test]
    fn test_async_level_skips_semantic() {
        let validator = ToolValidator::new();
        validator.add_rules(
            "write_file",
            vec![SemanticRule::SafePath {
                field: "path".into(),
            }],
        );
        let descriptor = write_file_descriptor();

        // Traversal path passes at Async level (schema only)
        let ok = validator.validate(
            &descriptor,
            &json!({"path": "../x", "content": "x"}),
            ValidationLevel::Async,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_semantic_rules() {
        let params = json!({"mode": "fast", "count": 5, "path": "a/b.txt"});

        assert!(SemanticRule::OneOf {
            field: "mode".into(),
            allowed: vec!["fast".into(), "slow".into()],
        }
        .check(&params)
        .is_ok());

        assert!(SemanticRule::OneOf {
            field: "mode".into(),
            allowed: vec!["slow".into()],
        }
        .check(&params)
        .is_err());

        assert!(SemanticRule::Range {
            field: "count".into(),
            min: 0.0,
            max: 10.0,
        }
        .check(&params)
        .is_ok());

        assert!(SemanticRule::RequiresWith {
            field: "mode".into(),
            requires: "target".into(),
        }
        .check(&params)
        .is_err());
    }

    #[test]
    fn test_strict_returns_assessment() {
        let validator = ToolValidator::new();
        let descriptor = write_file_descriptor();

        let assessment = validator
            .validate(
                &descriptor,
                &json!({"path": "ok.txt", "content": "small"}),
                ValidationLevel::Strict,
            )
            .unwrap();
        assert!(assessment.score >= 0.7);
        assert_eq!(assessment.category, RiskCategory::Elevated);
    }
}
