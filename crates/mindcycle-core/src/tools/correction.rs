// Auto-correction of failed tool parameters
//
// Runs only on validation failure. Strategies are tried in confidence
// order; a correction is applied only when its confidence clears the
// threshold AND the corrected payload re-validates. The attempt budget
// is enforced by the gated runner.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use std::sync::Arc;

use super::descriptor::ToolDescriptor;
use super::patterns::PatternStore;
use super::validation::{ToolValidator, ValidationFailure, ValidationLevel};

/// The correction strategies, in descending confidence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionStrategy {
    /// Coerce values to the schema's declared primitive type
    TypeCoercion,
    /// Fill missing required fields from learned successful patterns
    PatternInference,
    /// Drop properties the schema does not declare
    UnknownPropertyFilter,
    /// Clamp numbers to range, trim strings to maxLength
    ConstraintNormalization,
}

/// A correction that re-validated successfully
#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    pub params: Value,
    pub strategy: CorrectionStrategy,
    pub confidence: f64,
}

/// Correction configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionConfig {
    /// Minimum confidence to apply a correction
    pub confidence_threshold: f64,
    /// Maximum validation attempts per execution (initial + corrected)
    pub max_retries: u32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            max_retries: 3,
        }
    }
}

impl CorrectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

/// The correction pipeline
pub struct CorrectionEngine {
    config: CorrectionConfig,
    patterns: Arc<PatternStore>,
}

impl CorrectionEngine {
    pub fn new(config: CorrectionConfig, patterns: Arc<PatternStore>) -> Self {
        Self { config, patterns }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Attempt to correct `params` after `failure`
    ///
    /// Returns the first strategy whose output clears the confidence
    /// threshold and re-validates at the given level.
    pub fn correct(
        &self,
        descriptor: &ToolDescriptor,
        params: &Value,
        failure: &ValidationFailure,
        channel_id: Uuid,
        validator: &ToolValidator,
        level: ValidationLevel,
    ) -> Option<CorrectionOutcome> {
        let candidates = [
            (
                CorrectionStrategy::TypeCoercion,
                0.9,
                coerce_types(&descriptor.input_schema, params),
            ),
            (
                CorrectionStrategy::PatternInference,
                // Confidence comes from the pattern store itself
                0.0,
                None,
            ),
            (
                CorrectionStrategy::UnknownPropertyFilter,
                0.8,
                filter_unknown(&descriptor.input_schema, params),
            ),
            (
                CorrectionStrategy::ConstraintNormalization,
                0.75,
                normalize_constraints(&descriptor.input_schema, params),
            ),
        ];

        for (strategy, base_confidence, corrected) in candidates {
            let (corrected, confidence) = match strategy {
                CorrectionStrategy::PatternInference => {
                    match self.infer_missing(descriptor, params, channel_id) {
                        Some(pair) => pair,
                        None => continue,
                    }
                }
                _ => match corrected {
                    Some(c) => (c, base_confidence),
                    None => continue,
                },
            };

            if confidence < self.config.confidence_threshold {
                continue;
            }
            if corrected == *params {
                continue;
            }
            if validator.validate(descriptor, &corrected, level).is_err() {
                continue;
            }

            debug!(
                tool = %descriptor.name,
                strategy = ?strategy,
                confidence,
                original_failure = %failure.detail,
                "correction applied"
            );
            return Some(CorrectionOutcome {
                params: corrected,
                strategy,
                confidence,
            });
        }

        None
    }

    /// Strategy 2: fill every missing required field from learned patterns
    fn infer_missing(
        &self,
        descriptor: &ToolDescriptor,
        params: &Value,
        channel_id: Uuid,
    ) -> Option<(Value, f64)> {
        let obj = params.as_object()?;
        let required = descriptor.input_schema.get("required")?.as_array()?;

        let missing: Vec<&str> = required
            .iter()
            .filter_map(|r| r.as_str())
            .filter(|r| !obj.contains_key(*r))
            .collect();
        if missing.is_empty() {
            return None;
        }

        let mut corrected = obj.clone();
        let mut confidence = 1.0;
        for field in missing {
            let (value, field_confidence) =
                self.patterns
                    .infer_field(channel_id, &descriptor.name, field)?;
            confidence *= field_confidence;
            corrected.insert(field.to_string(), value);
        }
        Some((Value::Object(corrected), confidence))
    }
}

/// Strategy 1: coerce values to the schema's declared primitive type
fn coerce_types(schema: &Value, params: &Value) -> Option<Value> {
    let properties = schema.get("properties")?.as_object()?;
    let obj = params.as_object()?;

    let mut corrected = obj.clone();
    let mut changed = false;

    for (field, spec) in properties {
        let Some(value) = obj.get(field) else {
            continue;
        };
        let Some(expected) = spec.get("type").and_then(|t| t.as_str()) else {
            continue;
        };

        let coerced = match (expected, value) {
            ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
            ("string", Value::Bool(b)) => Some(Value::String(b.to_string())),
            ("number", Value::String(s)) => s.parse::<f64>().ok().and_then(|n| {
                serde_json::Number::from_f64(n).map(Value::Number)
            }),
            ("integer", Value::String(s)) => s
                .parse::<i64>()
                .ok()
                .map(|n| Value::Number(serde_json::Number::from(n))),
            ("boolean", Value::String(s)) => match s.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        };

        if let Some(coerced) = coerced {
            corrected.insert(field.clone(), coerced);
            changed = true;
        }
    }

    changed.then_some(Value::Object(corrected))
}

/// Strategy 3: drop properties the schema does not declare
fn filter_unknown(schema: &Value, params: &Value) -> Option<Value> {
    let properties = schema.get("properties")?.as_object()?;
    let obj = params.as_object()?;

    let mut corrected = serde_json::Map::new();
    let mut changed = false;
    for (field, value) in obj {
        if properties.contains_key(field) {
            corrected.insert(field.clone(), value.clone());
        } else {
            changed = true;
        }
    }

    changed.then_some(Value::Object(corrected))
}

/// Strategy 4: clamp numbers into range, trim strings to maxLength
fn normalize_constraints(schema: &Value, params: &Value) -> Option<Value> {
    let properties = schema.get("properties")?.as_object()?;
    let obj = params.as_object()?;

    let mut corrected = obj.clone();
    let mut changed = false;

    for (field, spec) in properties {
        let Some(value) = obj.get(field) else {
            continue;
        };

        if let Some(n) = value.as_f64() {
            let min = spec.get("minimum").and_then(|v| v.as_f64());
            let max = spec.get("maximum").and_then(|v| v.as_f64());
            let clamped = n.clamp(min.unwrap_or(f64::MIN), max.unwrap_or(f64::MAX));
            if clamped != n {
                if let Some(number) = serde_json::Number::from_f64(clamped) {
                    corrected.insert(field.clone(), Value::Number(number));
                    changed = true;
                }
            }
        } else if let Some(s) = value.as_str() {
            if let Some(max_len) = spec.get("maxLength").and_then(|v| v.as_u64()) {
                if s.len() > max_len as usize {
                    let mut end = max_len as usize;
                    while !s.is_char_boundary(end) {
                        end -= 1;
                    }
                    corrected.insert(field.clone(), Value::String(s[..end].to_string()));
                    changed = true;
                }
            }
        }
    }

    changed.then_some(Value::Object(corrected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::validation::FailureKind;
    use serde_json::json;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor::internal(
            "write_file",
            "Write a file",
            json!({
                "type": "object",
                "required": ["path", "content"],
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" },
                    "mode": { "type": "integer", "minimum": 0, "maximum": 511 },
                },
                "additionalProperties": false,
            }),
        )
    }

    fn failure() -> ValidationFailure {
        ValidationFailure {
            kind: FailureKind::Schema,
            detail: "test".into(),
        }
    }

    fn engine() -> (CorrectionEngine, Arc<PatternStore>, ToolValidator) {
        let patterns = Arc::new(PatternStore::default());
        (
            CorrectionEngine::new(CorrectionConfig::default(), patterns.clone()),
            patterns,
            ToolValidator::new(),
        )
    }

    #[test]
    fn test_numeric_content_coerced_to_string() {
        let (engine, _, validator) = engine();
        let params = json!({"path": "/tmp/x", "content": 12345});

        let outcome = engine
            .correct(
                &descriptor(),
                &params,
                &failure(),
                Uuid::now_v7(),
                &validator,
                ValidationLevel::Blocking,
            )
            .unwrap();

        assert_eq!(outcome.strategy, CorrectionStrategy::TypeCoercion);
        assert_eq!(outcome.params["content"], json!("12345"));
        assert!(outcome.confidence >= 0.9);
    }

    #[test]
    fn test_unknown_property_filtered() {
        let (engine, _, validator) = engine();
        let params = json!({"path": "a", "content": "b", "verbose": true});

        let outcome = engine
            .correct(
                &descriptor(),
                &params,
                &failure(),
                Uuid::now_v7(),
                &validator,
                ValidationLevel::Blocking,
            )
            .unwrap();

        assert_eq!(outcome.strategy, CorrectionStrategy::UnknownPropertyFilter);
        assert!(outcome.params.get("verbose").is_none());
    }

    #[test]
    fn test_missing_field_inferred_from_patterns() {
        let (engine, patterns, validator) = engine();
        let channel = Uuid::now_v7();

        // Learned: path is always "out.txt"
        for _ in 0..3 {
            patterns.record_success(
                channel,
                "write_file",
                &json!({"path": "out.txt", "content": "x"}),
            );
        }

        let params = json!({"content": "hello"});
        let outcome = engine
            .correct(
                &descriptor(),
                &params,
                &failure(),
                channel,
                &validator,
                ValidationLevel::Blocking,
            )
            .unwrap();

        assert_eq!(outcome.strategy, CorrectionStrategy::PatternInference);
        assert_eq!(outcome.params["path"], json!("out.txt"));
        assert_eq!(outcome.confidence, 1.0);
    }

    #[test]
    fn test_low_confidence_inference_rejected() {
        let (engine, patterns, validator) = engine();
        let channel = Uuid::now_v7();

        // Patterns disagree: confidence for any single value is 0.5
        patterns.record_success(channel, "write_file", &json!({"path": "a.txt", "content": "x"}));
        patterns.record_success(channel, "write_file", &json!({"path": "b.txt", "content": "x"}));

        let params = json!({"content": "hello"});
        let outcome = engine.correct(
            &descriptor(),
            &params,
            &failure(),
            channel,
            &validator,
            ValidationLevel::Blocking,
        );
        assert!(outcome.is_none());
    }

    #[test]
    fn test_range_clamped() {
        let (engine, _, validator) = engine();
        let params = json!({"path": "a", "content": "b", "mode": 99999});

        let outcome = engine
            .correct(
                &descriptor(),
                &params,
                &failure(),
                Uuid::now_v7(),
                &validator,
                ValidationLevel::Blocking,
            )
            .unwrap();

        assert_eq!(outcome.strategy, CorrectionStrategy::ConstraintNormalization);
        assert_eq!(outcome.params["mode"], json!(511.0));
    }

    #[test]
    fn test_unfixable_returns_none() {
        let (engine, _, validator) = engine();
        // content is an array; no strategy coerces that
        let params = json!({"path": "a", "content": [1, 2, 3]});

        let outcome = engine.correct(
            &descriptor(),
            &params,
            &failure(),
            Uuid::now_v7(),
            &validator,
            ValidationLevel::Blocking,
        );
        assert!(outcome.is_none());
    }
}
