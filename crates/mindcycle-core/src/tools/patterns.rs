// Learned parameter patterns per (channel, tool)
//
// Successful parameter sets are kept in a bounded window and feed the
// missing-field inference correction strategy. Every correction outcome
// (and every gated execution) updates these counts.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// Success/failure counts for a (channel, tool) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatternStats {
    pub successes: u32,
    pub failures: u32,
}

#[derive(Default)]
struct ToolPatterns {
    /// Recent successful parameter sets, oldest first
    successful: VecDeque<serde_json::Map<String, Value>>,
    stats: PatternStats,
}

/// Store of learned parameter patterns
pub struct PatternStore {
    inner: DashMap<(Uuid, String), ToolPatterns>,
    /// Window of successful examples kept per (channel, tool)
    capacity: usize,
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::new(50)
    }
}

impl PatternStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a successful execution's parameters
    pub fn record_success(&self, channel_id: Uuid, tool: &str, params: &Value) {
        let mut entry = self
            .inner
            .entry((channel_id, tool.to_string()))
            .or_default();
        entry.stats.successes += 1;
        if let Some(obj) = params.as_object() {
            if entry.successful.len() >= self.capacity {
                entry.successful.pop_front();
            }
            entry.successful.push_back(obj.clone());
        }
    }

    /// Record a failed execution or exhausted correction
    pub fn record_failure(&self, channel_id: Uuid, tool: &str) {
        let mut entry = self
            .inner
            .entry((channel_id, tool.to_string()))
            .or_default();
        entry.stats.failures += 1;
    }

    /// Counts for a (channel, tool) pair
    pub fn stats(&self, channel_id: Uuid, tool: &str) -> PatternStats {
        self.inner
            .get(&(channel_id, tool.to_string()))
            .map(|e| e.stats)
            .unwrap_or_default()
    }

    /// Infer a value for a missing field from successful examples
    ///
    /// Returns the modal value for the field and a confidence equal to
    /// its share of the stored examples.
    pub fn infer_field(&self, channel_id: Uuid, tool: &str, field: &str) -> Option<(Value, f64)> {
        let entry = self.inner.get(&(channel_id, tool.to_string()))?;
        if entry.successful.is_empty() {
            return None;
        }

        // Count occurrences of each distinct value the field has taken
        let mut counts: Vec<(&Value, usize)> = Vec::new();
        let mut seen = 0usize;
        for example in &entry.successful {
            let Some(value) = example.get(field) else {
                continue;
            };
            seen += 1;
            match counts.iter_mut().find(|(v, _)| *v == value) {
                Some((_, c)) => *c += 1,
                None => counts.push((value, 1)),
            }
        }
        if seen == 0 {
            return None;
        }

        let (modal, count) = counts.into_iter().max_by_key(|(_, c)| *c)?;
        let confidence = count as f64 / entry.successful.len() as f64;
        Some((modal.clone(), confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counts() {
        let store = PatternStore::default();
        let channel = Uuid::now_v7();

        store.record_success(channel, "write_file", &json!({"path": "a"}));
        store.record_success(channel, "write_file", &json!({"path": "b"}));
        store.record_failure(channel, "write_file");

        let stats = store.stats(channel, "write_file");
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);

        // Other channels are isolated
        let other = store.stats(Uuid::now_v7(), "write_file");
        assert_eq!(other.successes, 0);
    }

    #[test]
    fn test_infer_modal_value() {
        let store = PatternStore::default();
        let channel = Uuid::now_v7();

        store.record_success(channel, "export", &json!({"format": "csv", "path": "a"}));
        store.record_success(channel, "export", &json!({"format": "csv", "path": "b"}));
        store.record_success(channel, "export", &json!({"format": "json", "path": "c"}));

        let (value, confidence) = store.infer_field(channel, "export", "format").unwrap();
        assert_eq!(value, json!("csv"));
        assert!((confidence - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_infer_unknown_field() {
        let store = PatternStore::default();
        let channel = Uuid::now_v7();
        store.record_success(channel, "export", &json!({"format": "csv"}));

        assert!(store.infer_field(channel, "export", "missing").is_none());
        assert!(store.infer_field(channel, "other_tool", "format").is_none());
    }

    #[test]
    fn test_window_bounded() {
        let store = PatternStore::new(3);
        let channel = Uuid::now_v7();

        for i in 0..10 {
            store.record_success(channel, "t", &json!({"n": i}));
        }

        // Only the last 3 examples survive; modal inference reflects them
        let (value, confidence) = store.infer_field(channel, "t", "n").unwrap();
        assert!(value.as_i64().unwrap() >= 7);
        assert!((confidence - 1.0 / 3.0).abs() < 1e-12);
    }
}
