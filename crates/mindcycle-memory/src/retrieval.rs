// Two-phase retrieval: similarity candidates, then utility re-ranking
//
// The similarity backend is an opaque collaborator (a vector index in
// production). When it is unavailable the retriever degrades to listing
// the routed strata and ranking by utility alone - a loop never dies
// because search is down.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::error::{MemoryError, Result};
use crate::item::{MemoryItem, MemoryScope, MemoryStratum};
use crate::router::RoutePlan;
use crate::store::MemoryStore;

/// One candidate from the similarity backend
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityHit {
    pub memory_id: Uuid,
    /// Similarity score in [0, 1]
    pub similarity: f64,
}

/// Opaque similarity search collaborator
#[async_trait]
pub trait SimilarityBackend: Send + Sync {
    /// Return the top-k most similar items within the given strata
    async fn top_k(
        &self,
        scope: MemoryScope,
        target_id: Uuid,
        strata: &[MemoryStratum],
        query: &str,
        k: usize,
    ) -> Result<Vec<SimilarityHit>>;
}

/// A retrieved item with its blended score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub item: MemoryItem,
    pub similarity: f64,
    /// `(1 - lambda) * similarity + lambda * q_normalized`
    pub score: f64,
}

/// The utility-weighted retriever
pub struct Retriever {
    store: Arc<dyn MemoryStore>,
    backend: Arc<dyn SimilarityBackend>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        backend: Arc<dyn SimilarityBackend>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            backend,
            config,
        }
    }

    /// Retrieve memories for a caller operating in `caller_channel`
    ///
    /// Cross-channel reads are denied unless the read is an explicit
    /// Channel-scope read on the shared Semantic stratum.
    pub async fn retrieve(
        &self,
        caller_channel: Uuid,
        scope: MemoryScope,
        target_id: Uuid,
        query: &str,
        plan: &RoutePlan,
    ) -> Result<Vec<ScoredMemory>> {
        if scope == MemoryScope::Channel && target_id != caller_channel {
            let shared_only = !plan.strata.is_empty()
                && plan.strata.iter().all(|s| *s == MemoryStratum::Semantic);
            if !shared_only {
                return Err(MemoryError::scope_denied(format!(
                    "channel {caller_channel} may not read channel {target_id} outside the shared stratum"
                )));
            }
        }

        let candidates = match self
            .backend
            .top_k(scope, target_id, &plan.strata, query, self.config.top_k)
            .await
        {
            Ok(hits) => hits,
            Err(MemoryError::BackendUnavailable(reason)) => {
                warn!(%reason, "similarity backend unavailable, degrading to utility-only retrieval");
                self.store
                    .list(scope, target_id, &plan.strata)
                    .await?
                    .into_iter()
                    .take(self.config.top_k)
                    .map(|item| SimilarityHit {
                        memory_id: item.memory_id,
                        similarity: 0.0,
                    })
                    .collect()
            }
            Err(e) => return Err(e),
        };

        // Resolve hits to items, dropping any that vanished since indexing
        let mut resolved: Vec<(MemoryItem, f64)> = Vec::with_capacity(candidates.len());
        for hit in candidates {
            if let Some(item) = self.store.get(hit.memory_id).await? {
                if plan.strata.is_empty() || plan.strata.contains(&item.stratum) {
                    resolved.push((item, hit.similarity.clamp(0.0, 1.0)));
                }
            }
        }

        let scored = rank(resolved, plan.lambda, self.config.normalize_q);

        let top: Vec<ScoredMemory> = scored.into_iter().take(self.config.top_n).collect();
        for memory in &top {
            self.store.record_access(memory.item.memory_id).await?;
        }

        debug!(
            count = top.len(),
            lambda = plan.lambda,
            "retrieval complete"
        );
        Ok(top)
    }
}

/// Blend similarity and utility, sort descending
fn rank(candidates: Vec<(MemoryItem, f64)>, lambda: f64, normalize_q: bool) -> Vec<ScoredMemory> {
    let (q_min, q_max) = candidates
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), (item, _)| {
            (lo.min(item.q_value), hi.max(item.q_value))
        });
    let q_span = q_max - q_min;

    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .map(|(item, similarity)| {
            // Min-max normalization falls back to identity when the
            // candidate set has a degenerate Q spread
            let q_norm = if normalize_q && q_span > f64::EPSILON {
                (item.q_value - q_min) / q_span
            } else {
                item.q_value
            };
            let score = (1.0 - lambda) * similarity + lambda * q_norm;
            ScoredMemory {
                item,
                similarity,
                score,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

/// Deterministic token-overlap backend for tests and single-node use
///
/// Similarity is the fraction of query tokens present in the item's key
/// and value text. Not a real vector index, but stable and dependency-free.
pub struct KeywordSimilarityBackend {
    store: Arc<dyn MemoryStore>,
}

impl KeywordSimilarityBackend {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

#[async_trait]
impl SimilarityBackend for KeywordSimilarityBackend {
    async fn top_k(
        &self,
        scope: MemoryScope,
        target_id: Uuid,
        strata: &[MemoryStratum],
        query: &str,
        k: usize,
    ) -> Result<Vec<SimilarityHit>> {
        let query_tokens = Self::tokens(query);
        let items = self.store.list(scope, target_id, strata).await?;

        let mut hits: Vec<SimilarityHit> = items
            .into_iter()
            .map(|item| {
                let doc = format!("{} {}", item.key, item.value);
                let doc_tokens = Self::tokens(&doc);
                let overlap = query_tokens
                    .iter()
                    .filter(|t| doc_tokens.contains(t))
                    .count();
                let similarity = if query_tokens.is_empty() {
                    0.0
                } else {
                    overlap as f64 / query_tokens.len() as f64
                };
                SimilarityHit {
                    memory_id: item.memory_id,
                    similarity,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Backend that is always down; exercises the degraded retrieval path
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSimilarityBackend;

#[async_trait]
impl SimilarityBackend for UnavailableSimilarityBackend {
    async fn top_k(
        &self,
        _scope: MemoryScope,
        _target_id: Uuid,
        _strata: &[MemoryStratum],
        _query: &str,
        _k: usize,
    ) -> Result<Vec<SimilarityHit>> {
        Err(MemoryError::backend("search index offline"))
    }
}
