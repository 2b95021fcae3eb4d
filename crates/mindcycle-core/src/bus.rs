// In-process typed event bus
//
// emit() validates the envelope against the schema registry and fails
// fast; delivery is inline for sync topics and through a bounded queue
// drained by a worker task for topics marked async. Critical events
// (phase transitions, lifecycle) are never dropped - on overflow they
// spill to an unbounded side buffer instead.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

use mindcycle_contracts::{EventEnvelope, EventName, SchemaRegistry};

use crate::error::Result;

/// Bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Topics delivered through the bounded async queue instead of inline
    pub async_topics: HashSet<EventName>,

    /// Queue depth per async topic
    pub queue_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            async_topics: HashSet::new(),
            queue_depth: 256,
        }
    }
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a topic for async (queued) delivery
    pub fn with_async_topic(mut self, name: EventName) -> Self {
        self.async_topics.insert(name);
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }
}

/// Counters observable by operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusMetrics {
    pub emitted: u64,
    pub delivered: u64,
    pub dropped: u64,
}

type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

#[derive(Default)]
struct SubscriberList {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

impl SubscriberList {
    fn add(&mut self, handler: Handler) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.push((id, handler));
        id
    }

    fn remove(&mut self, id: u64) {
        self.handlers.retain(|(h, _)| *h != id);
    }
}

/// Guard returned by subscribe; dropping it unsubscribes
pub struct Subscription {
    list: Arc<RwLock<SubscriberList>>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.list.write().remove(self.id);
    }
}

/// Outcome of pushing into an async topic queue (exposed for tests)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// A non-critical event was evicted to make room
    DroppedOldest,
    /// The queue was full of critical events; this one spilled to the
    /// overflow buffer
    Spilled,
}

struct AsyncTopicQueue {
    main: Mutex<VecDeque<EventEnvelope>>,
    overflow: Mutex<VecDeque<EventEnvelope>>,
    notify: Notify,
    depth: usize,
}

impl AsyncTopicQueue {
    fn new(depth: usize) -> Self {
        Self {
            main: Mutex::new(VecDeque::new()),
            overflow: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            depth,
        }
    }

    fn push(&self, envelope: EventEnvelope) -> PushOutcome {
        let critical = envelope.name().is_critical();
        let mut main = self.main.lock();

        let outcome = if main.len() < self.depth {
            main.push_back(envelope);
            PushOutcome::Queued
        } else if critical {
            // Criticals are never dropped; spill past the bound
            self.overflow.lock().push_back(envelope);
            PushOutcome::Spilled
        } else {
            // Evict the oldest non-critical entry
            let evict_at = main.iter().position(|e| !e.name().is_critical());
            match evict_at {
                Some(idx) => {
                    main.remove(idx);
                    main.push_back(envelope);
                    PushOutcome::DroppedOldest
                }
                None => {
                    // Queue is all criticals; spill the newcomer instead
                    self.overflow.lock().push_back(envelope);
                    PushOutcome::Spilled
                }
            }
        };

        drop(main);
        self.notify.notify_one();
        outcome
    }

    fn pop(&self) -> Option<EventEnvelope> {
        if let Some(e) = self.overflow.lock().pop_front() {
            return Some(e);
        }
        self.main.lock().pop_front()
    }
}

/// Subscriber lists and the delivered counter, shared with drain workers
struct Delivery {
    topics: DashMap<EventName, Arc<RwLock<SubscriberList>>>,
    wildcard: Arc<RwLock<SubscriberList>>,
    delivered: AtomicU64,
}

impl Delivery {
    fn deliver(&self, envelope: &EventEnvelope) {
        let name = envelope.name();
        // Drop the map guard before running handlers, so a handler that
        // subscribes does not deadlock against the shard lock
        let subscribers = self.topics.get(&name).map(|l| l.value().clone());
        if let Some(list) = subscribers {
            let list = list.read();
            for (_, handler) in &list.handlers {
                handler(envelope);
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
        let wildcard = self.wildcard.read();
        for (_, handler) in &wildcard.handlers {
            handler(envelope);
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The in-process event bus
pub struct EventBus {
    registry: Arc<SchemaRegistry>,
    delivery: Arc<Delivery>,
    queues: DashMap<EventName, Arc<AsyncTopicQueue>>,
    config: BusConfig,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(SchemaRegistry::with_defaults()),
            delivery: Arc::new(Delivery {
                topics: DashMap::new(),
                wildcard: Arc::new(RwLock::new(SubscriberList::default())),
                delivered: AtomicU64::new(0),
            }),
            queues: DashMap::new(),
            config,
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// The schema registry envelopes are validated against
    pub fn registry(&self) -> Arc<SchemaRegistry> {
        self.registry.clone()
    }

    fn subscribers(&self, name: EventName) -> Arc<RwLock<SubscriberList>> {
        self.delivery
            .topics
            .entry(name)
            .or_insert_with(|| Arc::new(RwLock::new(SubscriberList::default())))
            .value()
            .clone()
    }

    /// Subscribe to one topic; the handler runs in the emitter's context
    /// unless the topic is configured async
    pub fn subscribe<F>(&self, name: EventName, handler: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let list = self.subscribers(name);
        let id = list.write().add(Arc::new(handler));
        Subscription { list, id }
    }

    /// Subscribe to every topic
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let list = self.delivery.wildcard.clone();
        let id = list.write().add(Arc::new(handler));
        Subscription { list, id }
    }

    /// Validate and emit an envelope
    ///
    /// Fails fast with a schema violation if the payload does not match
    /// the schema bound to its event name.
    pub fn emit(&self, envelope: EventEnvelope) -> Result<()> {
        self.registry.check(&envelope)?;
        self.emitted.fetch_add(1, Ordering::Relaxed);

        let name = envelope.name();
        if self.config.async_topics.contains(&name) {
            let queue = self.async_queue(name);
            match queue.push(envelope) {
                PushOutcome::DroppedOldest => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %name, "async topic overflow, dropped oldest non-critical event");
                }
                PushOutcome::Spilled => {
                    debug!(topic = %name, "async topic overflow, spilled critical event");
                }
                PushOutcome::Queued => {}
            }
        } else {
            self.delivery.deliver(&envelope);
        }
        Ok(())
    }

    fn async_queue(&self, name: EventName) -> Arc<AsyncTopicQueue> {
        if let Some(queue) = self.queues.get(&name) {
            return queue.value().clone();
        }

        let queue = Arc::new(AsyncTopicQueue::new(self.config.queue_depth));
        self.queues.insert(name, queue.clone());

        // One drain worker per async topic preserves per-topic ordering
        let delivery = Arc::downgrade(&self.delivery);
        let worker_queue = queue.clone();
        tokio::spawn(async move {
            loop {
                match worker_queue.pop() {
                    Some(envelope) => match delivery.upgrade() {
                        Some(delivery) => delivery.deliver(&envelope),
                        None => break,
                    },
                    None => {
                        if delivery.strong_count() == 0 {
                            break;
                        }
                        worker_queue.notify.notified().await;
                    }
                }
            }
        });

        queue
    }

    /// Snapshot of the bus counters
    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            emitted: self.emitted.load(Ordering::Relaxed),
            delivered: self.delivery.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
