// Per-socket outbound batching queue
//
// Coalesces bursts behind a small flush delay, sends bounded batches
// with exponential-backoff retries, and drains pending frames for a
// grace period after disconnect before discarding the rest. Non-critical
// overflow is dropped with a counter; critical events always queue.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mindcycle_contracts::EventEnvelope;

use crate::config::OutboundConfig;
use crate::error::{BridgeError, Result};

/// Abstraction over the socket writer, batch-at-a-time
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_batch(&self, envelopes: Vec<serde_json::Value>) -> Result<()>;
}

/// Counters for one socket's outbound path
#[derive(Debug, Default)]
pub struct OutboundMetrics {
    pub enqueued: AtomicU64,
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
    pub failed_batches: AtomicU64,
}

/// Handle used by the fanout task to enqueue envelopes
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<EventEnvelope>,
    pending: Arc<AtomicUsize>,
    disconnected: CancellationToken,
    metrics: Arc<OutboundMetrics>,
    depth: usize,
}

impl OutboundHandle {
    /// Enqueue an envelope for delivery
    ///
    /// Non-critical envelopes past the queue depth are dropped; critical
    /// ones always queue.
    pub fn enqueue(&self, envelope: EventEnvelope) {
        if self.disconnected.is_cancelled() {
            return;
        }
        let pending = self.pending.load(Ordering::Relaxed);
        if pending >= self.depth && !envelope.name().is_critical() {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(event = %envelope.name(), "outbound queue full, dropped non-critical event");
            return;
        }
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(envelope);
    }

    /// Begin the disconnect drain; pending frames are delivered for the
    /// grace period, then discarded
    pub fn disconnect(&self) {
        self.disconnected.cancel();
    }

    pub fn metrics(&self) -> &Arc<OutboundMetrics> {
        &self.metrics
    }
}

/// Spawn the outbound worker for one socket
pub fn spawn_outbound(config: OutboundConfig, sink: Arc<dyn FrameSink>) -> OutboundHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let disconnected = CancellationToken::new();
    let metrics = Arc::new(OutboundMetrics::default());

    let handle = OutboundHandle {
        tx,
        pending: pending.clone(),
        disconnected: disconnected.clone(),
        metrics: metrics.clone(),
        depth: config.queue_depth,
    };

    tokio::spawn(worker(config, sink, rx, pending, disconnected, metrics));
    handle
}

async fn worker(
    config: OutboundConfig,
    sink: Arc<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<EventEnvelope>,
    pending: Arc<AtomicUsize>,
    disconnected: CancellationToken,
    metrics: Arc<OutboundMetrics>,
) {
    // Far enough out to mean "not draining yet" (tokio caps sleep durations)
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(86_400 * 365));
    tokio::pin!(drain_deadline);
    let mut draining = false;

    loop {
        // Wait for the first envelope of the next batch
        let first = tokio::select! {
            item = rx.recv() => match item {
                Some(envelope) => envelope,
                None => return,
            },
            _ = disconnected.cancelled(), if !draining => {
                draining = true;
                drain_deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + config.disconnect_grace);
                continue;
            }
            _ = &mut drain_deadline, if draining => {
                let discarded = pending.swap(0, Ordering::Relaxed);
                if discarded > 0 {
                    debug!(discarded, "disconnect grace elapsed, discarding pending frames");
                }
                return;
            }
        };

        // Coalesce a batch within the flush window
        let mut batch = vec![first];
        let flush_at = tokio::time::Instant::now() + config.flush_delay;
        while batch.len() < config.max_batch {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(envelope) => batch.push(envelope),
                    None => break,
                },
                _ = tokio::time::sleep_until(flush_at) => break,
            }
        }

        let count = batch.len();
        pending.fetch_sub(count.min(pending.load(Ordering::Relaxed)), Ordering::Relaxed);
        let values: Vec<serde_json::Value> = batch.iter().map(|e| e.to_value()).collect();

        match send_with_retries(&config, sink.as_ref(), values).await {
            Ok(()) => {
                metrics.sent.fetch_add(count as u64, Ordering::Relaxed);
            }
            Err(e) => {
                metrics.failed_batches.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, count, "outbound batch delivery failed");
                if draining {
                    return;
                }
            }
        }
    }
}

async fn send_with_retries(
    config: &OutboundConfig,
    sink: &dyn FrameSink,
    values: Vec<serde_json::Value>,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match sink.send_batch(values.clone()).await {
            Ok(()) => return Ok(()),
            Err(_) if attempt < config.max_retries => {
                let backoff = config.backoff_base * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
            Err(_) => {
                return Err(BridgeError::DeliveryFailed { attempts: attempt });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindcycle_contracts::{EventPayload, LoopStatus, MetadataMap};
    use parking_lot::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct RecordingSink {
        batches: Mutex<Vec<Vec<serde_json::Value>>>,
        failures_left: AtomicUsize,
    }

    impl RecordingSink {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(failures),
            })
        }

        fn batch_count(&self) -> usize {
            self.batches.lock().len()
        }

        fn total_sent(&self) -> usize {
            self.batches.lock().iter().map(|b| b.len()).sum()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_batch(&self, envelopes: Vec<serde_json::Value>) -> Result<()> {
            let failing = self.failures_left.load(Ordering::Relaxed);
            if failing > 0 {
                self.failures_left.store(failing - 1, Ordering::Relaxed);
                return Err(BridgeError::transport("scripted failure"));
            }
            self.batches.lock().push(envelopes);
            Ok(())
        }
    }

    fn hint() -> EventEnvelope {
        EventEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            EventPayload::Hint {
                loop_id: None,
                hint: "h".into(),
                metadata: MetadataMap::new(),
            },
        )
    }

    fn started() -> EventEnvelope {
        EventEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            EventPayload::Started {
                loop_id: Uuid::now_v7(),
                status: LoopStatus::Starting,
            },
        )
    }

    fn fast_config() -> OutboundConfig {
        OutboundConfig {
            flush_delay: Duration::from_millis(10),
            max_batch: 8,
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
            disconnect_grace: Duration::from_millis(100),
            queue_depth: 4,
        }
    }

    async fn wait_for<F: Fn() -> bool>(f: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !f() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_batch() {
        let sink = RecordingSink::new(0);
        let handle = spawn_outbound(fast_config(), sink.clone());

        for _ in 0..5 {
            handle.enqueue(started());
        }

        wait_for(|| sink.total_sent() == 5).await;
        // The burst arrived inside one flush window
        assert_eq!(sink.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_delivers() {
        let sink = RecordingSink::new(2);
        let handle = spawn_outbound(fast_config(), sink.clone());

        handle.enqueue(started());
        wait_for(|| sink.total_sent() == 1).await;
        assert_eq!(handle.metrics().failed_batches.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_retries() {
        let sink = RecordingSink::new(100);
        let handle = spawn_outbound(fast_config(), sink.clone());

        handle.enqueue(started());
        wait_for(|| handle.metrics().failed_batches.load(Ordering::Relaxed) == 1).await;
        assert_eq!(sink.total_sent(), 0);
    }

    #[tokio::test]
    async fn test_overflow_drops_non_critical_only() {
        // A sink that blocks forever keeps the queue backed up
        struct StuckSink;
        #[async_trait]
        impl FrameSink for StuckSink {
            async fn send_batch(&self, _: Vec<serde_json::Value>) -> Result<()> {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }

        let handle = spawn_outbound(fast_config(), Arc::new(StuckSink));

        // Fill past the depth of 4 with hints (non-critical)
        for _ in 0..10 {
            handle.enqueue(hint());
        }
        assert!(handle.metrics().dropped.load(Ordering::Relaxed) > 0);

        // Criticals still queue past the bound
        let before = handle.metrics().enqueued.load(Ordering::Relaxed);
        handle.enqueue(started());
        assert_eq!(handle.metrics().enqueued.load(Ordering::Relaxed), before + 1);
    }

    #[tokio::test]
    async fn test_disconnect_drains_then_discards() {
        let sink = RecordingSink::new(0);
        let handle = spawn_outbound(fast_config(), sink.clone());

        handle.enqueue(started());
        wait_for(|| sink.total_sent() == 1).await;

        handle.disconnect();
        // Enqueues after disconnect are ignored
        handle.enqueue(started());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.total_sent(), 1);
    }
}
