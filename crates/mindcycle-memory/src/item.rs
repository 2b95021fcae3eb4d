// Memory items, scopes, and strata

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default Q-value for newly created items
pub const QVALUE_DEFAULT: f64 = 0.5;

/// Ownership scope of a memory item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// Private to a single agent
    Agent,
    /// Shared across a channel
    Channel,
    /// Tied to a pair relationship (agent <-> agent, agent <-> user)
    Relationship,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Agent => "agent",
            MemoryScope::Channel => "channel",
            MemoryScope::Relationship => "relationship",
        }
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory stratum, ordered by longevity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStratum {
    Working,
    ShortTerm,
    Episodic,
    Semantic,
    LongTerm,
}

impl MemoryStratum {
    /// All strata, shortest-lived first
    pub const ALL: [MemoryStratum; 5] = [
        MemoryStratum::Working,
        MemoryStratum::ShortTerm,
        MemoryStratum::Episodic,
        MemoryStratum::Semantic,
        MemoryStratum::LongTerm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStratum::Working => "working",
            MemoryStratum::ShortTerm => "short_term",
            MemoryStratum::Episodic => "episodic",
            MemoryStratum::Semantic => "semantic",
            MemoryStratum::LongTerm => "long_term",
        }
    }

    /// The next longer-lived stratum, if any
    pub fn promoted(&self) -> Option<MemoryStratum> {
        match self {
            MemoryStratum::Working => Some(MemoryStratum::ShortTerm),
            MemoryStratum::ShortTerm => Some(MemoryStratum::Episodic),
            MemoryStratum::Episodic => Some(MemoryStratum::Semantic),
            MemoryStratum::Semantic => Some(MemoryStratum::LongTerm),
            MemoryStratum::LongTerm => None,
        }
    }

    /// The next shorter-lived stratum; `None` means the item falls out of
    /// the active store (archival is the persistence collaborator's job)
    pub fn demoted(&self) -> Option<MemoryStratum> {
        match self {
            MemoryStratum::Working => None,
            MemoryStratum::ShortTerm => Some(MemoryStratum::Working),
            MemoryStratum::Episodic => Some(MemoryStratum::ShortTerm),
            MemoryStratum::Semantic => Some(MemoryStratum::Episodic),
            MemoryStratum::LongTerm => Some(MemoryStratum::Semantic),
        }
    }
}

impl std::fmt::Display for MemoryStratum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single memory item
///
/// `q_value` stays in [0, 1] and changes only through the EMA rule in
/// [`crate::muls::q_update`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub memory_id: Uuid,
    pub scope: MemoryScope,
    /// The entity the scope refers to (agent id, channel id, or pair id)
    pub target_id: Uuid,
    pub stratum: MemoryStratum,
    pub key: String,
    pub value: serde_json::Value,
    /// Embedding vector maintained by the search backend, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub q_value: f64,
    pub access_count: u64,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_accessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Time-to-live in seconds; expired items are swept from Working strata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl MemoryItem {
    /// Create a new item with the default Q-value
    pub fn new(
        scope: MemoryScope,
        target_id: Uuid,
        stratum: MemoryStratum,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            memory_id: Uuid::now_v7(),
            scope,
            target_id,
            stratum,
            key: key.into(),
            value,
            embedding: None,
            q_value: QVALUE_DEFAULT,
            access_count: 0,
            success_count: 0,
            failure_count: 0,
            last_accessed_at: now,
            created_at: now,
            ttl_secs: None,
        }
    }

    /// Set a TTL (builder style)
    pub fn with_ttl_secs(mut self, secs: u64) -> Self {
        self.ttl_secs = Some(secs);
        self
    }

    /// Attach an embedding (builder style)
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Whether the item's TTL has elapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_secs {
            Some(secs) => now >= self.created_at + Duration::seconds(secs as i64),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_defaults() {
        let item = MemoryItem::new(
            MemoryScope::Agent,
            Uuid::now_v7(),
            MemoryStratum::Working,
            "greeting",
            serde_json::json!("hello"),
        );
        assert_eq!(item.q_value, QVALUE_DEFAULT);
        assert_eq!(item.access_count, 0);
        assert!(item.ttl_secs.is_none());
    }

    #[test]
    fn test_stratum_promotion_chain() {
        let mut stratum = MemoryStratum::Working;
        let mut chain = vec![stratum];
        while let Some(next) = stratum.promoted() {
            chain.push(next);
            stratum = next;
        }
        assert_eq!(chain, MemoryStratum::ALL.to_vec());
    }

    #[test]
    fn test_stratum_demotion_floor() {
        assert_eq!(MemoryStratum::Working.demoted(), None);
        assert_eq!(
            MemoryStratum::LongTerm.demoted(),
            Some(MemoryStratum::Semantic)
        );
    }

    #[test]
    fn test_ttl_expiry() {
        let mut item = MemoryItem::new(
            MemoryScope::Agent,
            Uuid::now_v7(),
            MemoryStratum::Working,
            "ephemeral",
            serde_json::json!(1),
        )
        .with_ttl_secs(60);
        item.created_at = Utc::now() - Duration::seconds(120);

        assert!(item.is_expired(Utc::now()));

        item.ttl_secs = None;
        assert!(!item.is_expired(Utc::now()));
    }
}
