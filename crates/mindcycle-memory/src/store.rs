// Memory store trait and the in-memory implementation
//
// The store exclusively owns MemoryItem state. Writes serialize per
// (scope, target) partition, so concurrent Q-value updates for the same
// target never interleave; reads across partitions run freely.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::item::{MemoryItem, MemoryScope, MemoryStratum};
use crate::muls::q_update;

/// Storage interface for memory items
///
/// Implementations can keep items in memory, in a database, or behind a
/// remote service. Only the store mutates items; every other component
/// holds ids and goes through these operations.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or replace an item, returning its id
    async fn put(&self, item: MemoryItem) -> Result<Uuid>;

    /// Fetch an item by id
    async fn get(&self, memory_id: Uuid) -> Result<Option<MemoryItem>>;

    /// Fetch an item by its (scope, target, key) secondary index
    async fn find(
        &self,
        scope: MemoryScope,
        target_id: Uuid,
        key: &str,
    ) -> Result<Option<MemoryItem>>;

    /// List items for a target, filtered by strata (empty = all strata)
    async fn list(
        &self,
        scope: MemoryScope,
        target_id: Uuid,
        strata: &[MemoryStratum],
    ) -> Result<Vec<MemoryItem>>;

    /// Apply a reward through the EMA rule, returning the new Q-value
    ///
    /// This is the only way a Q-value changes. The update serializes
    /// against the item's (scope, target) partition.
    async fn apply_reward(&self, memory_id: Uuid, reward: f64, learning_rate: f64) -> Result<f64>;

    /// Record a retrieval access (bumps access_count and last_accessed_at)
    async fn record_access(&self, memory_id: Uuid) -> Result<()>;

    /// Record a success or failure outcome for consolidation counting
    async fn record_outcome(&self, memory_id: Uuid, success: bool) -> Result<()>;

    /// Move an item to a different stratum
    async fn set_stratum(&self, memory_id: Uuid, stratum: MemoryStratum) -> Result<()>;

    /// Remove an item, returning it if present
    async fn remove(&self, memory_id: Uuid) -> Result<Option<MemoryItem>>;

    /// Drop all items whose TTL has elapsed; returns the count removed
    async fn sweep_expired(&self) -> Result<usize>;
}

type Partition = Arc<RwLock<HashMap<Uuid, MemoryItem>>>;

/// In-memory store used in tests, examples, and single-node deployments
///
/// Items are partitioned by (scope, target); a directory maps item ids to
/// their partition so id-keyed operations stay O(1).
#[derive(Default)]
pub struct InMemoryMemoryStore {
    partitions: DashMap<(MemoryScope, Uuid), Partition>,
    directory: DashMap<Uuid, (MemoryScope, Uuid)>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, scope: MemoryScope, target_id: Uuid) -> Partition {
        self.partitions
            .entry((scope, target_id))
            .or_insert_with(|| Arc::new(RwLock::new(HashMap::new())))
            .value()
            .clone()
    }

    fn locate(&self, memory_id: Uuid) -> Result<Partition> {
        let key = self
            .directory
            .get(&memory_id)
            .map(|e| *e.value())
            .ok_or(MemoryError::NotFound(memory_id))?;
        Ok(self.partition(key.0, key.1))
    }

    /// Total number of items across all partitions (test helper)
    pub async fn len(&self) -> usize {
        self.directory.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn put(&self, item: MemoryItem) -> Result<Uuid> {
        let id = item.memory_id;
        let partition = self.partition(item.scope, item.target_id);
        self.directory.insert(id, (item.scope, item.target_id));
        partition.write().await.insert(id, item);
        Ok(id)
    }

    async fn get(&self, memory_id: Uuid) -> Result<Option<MemoryItem>> {
        match self.locate(memory_id) {
            Ok(partition) => Ok(partition.read().await.get(&memory_id).cloned()),
            Err(MemoryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find(
        &self,
        scope: MemoryScope,
        target_id: Uuid,
        key: &str,
    ) -> Result<Option<MemoryItem>> {
        let partition = self.partition(scope, target_id);
        let items = partition.read().await;
        Ok(items.values().find(|i| i.key == key).cloned())
    }

    async fn list(
        &self,
        scope: MemoryScope,
        target_id: Uuid,
        strata: &[MemoryStratum],
    ) -> Result<Vec<MemoryItem>> {
        let partition = self.partition(scope, target_id);
        let items = partition.read().await;
        let mut out: Vec<MemoryItem> = items
            .values()
            .filter(|i| strata.is_empty() || strata.contains(&i.stratum))
            .cloned()
            .collect();
        // Stable ordering for callers: newest first (v7 ids are time-ordered)
        out.sort_by(|a, b| b.memory_id.cmp(&a.memory_id));
        Ok(out)
    }

    async fn apply_reward(&self, memory_id: Uuid, reward: f64, learning_rate: f64) -> Result<f64> {
        let partition = self.locate(memory_id)?;
        let mut items = partition.write().await;
        let item = items
            .get_mut(&memory_id)
            .ok_or(MemoryError::NotFound(memory_id))?;
        item.q_value = q_update(item.q_value, reward, learning_rate);
        debug!(memory_id = %memory_id, q_value = item.q_value, "applied reward");
        Ok(item.q_value)
    }

    async fn record_access(&self, memory_id: Uuid) -> Result<()> {
        let partition = self.locate(memory_id)?;
        let mut items = partition.write().await;
        let item = items
            .get_mut(&memory_id)
            .ok_or(MemoryError::NotFound(memory_id))?;
        item.access_count += 1;
        item.last_accessed_at = Utc::now();
        Ok(())
    }

    async fn record_outcome(&self, memory_id: Uuid, success: bool) -> Result<()> {
        let partition = self.locate(memory_id)?;
        let mut items = partition.write().await;
        let item = items
            .get_mut(&memory_id)
            .ok_or(MemoryError::NotFound(memory_id))?;
        if success {
            item.success_count += 1;
        } else {
            item.failure_count += 1;
        }
        Ok(())
    }

    async fn set_stratum(&self, memory_id: Uuid, stratum: MemoryStratum) -> Result<()> {
        let partition = self.locate(memory_id)?;
        let mut items = partition.write().await;
        let item = items
            .get_mut(&memory_id)
            .ok_or(MemoryError::NotFound(memory_id))?;
        item.stratum = stratum;
        Ok(())
    }

    async fn remove(&self, memory_id: Uuid) -> Result<Option<MemoryItem>> {
        match self.locate(memory_id) {
            Ok(partition) => {
                self.directory.remove(&memory_id);
                Ok(partition.write().await.remove(&memory_id))
            }
            Err(MemoryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        let keys: Vec<(MemoryScope, Uuid)> =
            self.partitions.iter().map(|e| *e.key()).collect();

        for key in keys {
            let partition = self.partition(key.0, key.1);
            let mut items = partition.write().await;
            let expired: Vec<Uuid> = items
                .values()
                .filter(|i| i.is_expired(now))
                .map(|i| i.memory_id)
                .collect();
            for id in expired {
                items.remove(&id);
                self.directory.remove(&id);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "swept expired memory items");
        }
        Ok(removed)
    }
}
