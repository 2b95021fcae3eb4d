// The event bridge between the in-process bus and the room transport
//
// Server bus -> transport: every emitted envelope fans out to its
// channel's room. Transport -> server: inbound payloads are re-validated
// and routed through the engine; the server is authoritative, so phase
// events arriving from clients are refused. Duplicate deliveries are
// suppressed by correlation id.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use mindcycle_contracts::{CorrelationWindow, EventEnvelope, EventPayload, SchemaRegistry};
use mindcycle_core::{EventBus, LoopManager, Subscription};

use crate::auth::RejectReason;
use crate::error::{BridgeError, Result};
use crate::rooms::RoomRegistry;

/// The bus <-> room bridge
pub struct NetworkBridge {
    bus: Arc<EventBus>,
    rooms: Arc<RoomRegistry>,
    manager: Arc<LoopManager>,
    schema: Arc<SchemaRegistry>,
    dedupe: Mutex<CorrelationWindow>,
    _fanout: Subscription,
}

impl NetworkBridge {
    /// Wire the bridge; fanout starts immediately
    pub fn new(bus: Arc<EventBus>, rooms: Arc<RoomRegistry>, manager: Arc<LoopManager>) -> Self {
        let fanout_rooms = rooms.clone();
        let fanout = bus.subscribe_all(move |envelope| {
            fanout_rooms.publish(envelope.channel_id, envelope.clone());
        });

        Self {
            schema: bus.registry(),
            bus,
            rooms,
            manager,
            dedupe: Mutex::new(CorrelationWindow::new(4096)),
            _fanout: fanout,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn manager(&self) -> &Arc<LoopManager> {
        &self.manager
    }

    /// Handle an inbound envelope from a socket joined to `channel_id`
    ///
    /// Re-validates the raw payload, suppresses duplicates, and routes
    /// client requests into the engine. Phase events are server-authored
    /// only and are refused here.
    pub async fn handle_inbound(
        &self,
        channel_id: Uuid,
        value: serde_json::Value,
    ) -> Result<()> {
        let envelope = self.schema.decode(value)?;

        if envelope.channel_id != channel_id {
            return Err(BridgeError::AuthRejected(RejectReason::ChannelMismatch));
        }

        if !self.dedupe.lock().observe(&envelope) {
            debug!(
                correlation_id = ?envelope.correlation_id,
                "duplicate inbound envelope suppressed"
            );
            return Ok(());
        }

        self.route(envelope).await
    }

    async fn route(&self, envelope: EventEnvelope) -> Result<()> {
        match &envelope.payload {
            // Client-submitted observations go through the engine
            EventPayload::Observation {
                loop_id,
                observation,
            } => {
                self.manager.submit(*loop_id, observation.clone()).await?;
                Ok(())
            }
            // Action updates from externally executed actions
            EventPayload::Action {
                loop_id,
                action,
                status,
            } => {
                self.manager
                    .update_action(
                        *loop_id,
                        action.id,
                        *status,
                        action.result.clone(),
                        action.error.clone(),
                    )
                    .await?;
                Ok(())
            }
            // Hints are relayed to everyone on the channel
            EventPayload::Hint { .. } => {
                self.bus.emit(envelope)?;
                Ok(())
            }
            // Everything else is authored by the server-side engine only
            other => {
                warn!(
                    event = %other.name(),
                    agent = %envelope.agent_id,
                    "refused client-authored server event"
                );
                Err(BridgeError::transport(format!(
                    "event '{}' is server-authoritative",
                    other.name()
                )))
            }
        }
    }
}
