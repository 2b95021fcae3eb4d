// WebSocket endpoint
//
// Handshake first (auth + channel), then the socket joins its room and
// traffic flows: room fanout through the per-socket outbound queue,
// inbound frames through re-validation into the bridge. A heartbeat
// pings on a period and closes the socket after the silence threshold.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthStore, Principal, RejectReason};
use crate::bridge::NetworkBridge;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::outbound::{spawn_outbound, FrameSink};
use crate::protocol::Frame;

/// Shared state for the transport layer
pub struct TransportState {
    pub bridge: Arc<NetworkBridge>,
    pub auth: Arc<AuthStore>,
    pub agents: Arc<crate::agents::AgentDirectory>,
    pub config: BridgeConfig,
}

/// Build the axum router for the transport
pub fn router(state: Arc<TransportState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<TransportState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, state).await {
            debug!(error = %e, "socket session ended with error");
        }
    })
}

/// Sink adapter writing batches to the socket
struct WsSink {
    writer: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

#[async_trait::async_trait]
impl FrameSink for WsSink {
    async fn send_batch(&self, envelopes: Vec<serde_json::Value>) -> Result<()> {
        let mut envelopes = envelopes;
        let frame = if envelopes.len() == 1 {
            Frame::Event {
                envelope: envelopes.remove(0),
            }
        } else {
            Frame::Batch { envelopes }
        };
        self.writer
            .lock()
            .await
            .send(Message::Text(frame.to_text()))
            .await
            .map_err(|e| crate::error::BridgeError::transport(e.to_string()))
    }
}

async fn send_frame(
    writer: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    frame: Frame,
) -> Result<()> {
    writer
        .lock()
        .await
        .send(Message::Text(frame.to_text()))
        .await
        .map_err(|e| crate::error::BridgeError::transport(e.to_string()))
}

async fn handle_socket(socket: WebSocket, state: Arc<TransportState>) -> Result<()> {
    let (writer, mut reader) = socket.split();
    let writer = Arc::new(Mutex::new(writer));

    // Handshake must arrive promptly
    let (principal, channel_id) = match tokio::time::timeout(
        std::time::Duration::from_secs(10),
        read_handshake(&mut reader),
    )
    .await
    {
        Ok(Some((credential_frame, channel_id))) => {
            match state.auth.authenticate(&credential_frame) {
                Ok(principal) => {
                    // Agent sockets bind to their primary channel
                    if let Principal::Agent { agent_id } = &principal {
                        if let Err(reason) = state.agents.connect(*agent_id, channel_id) {
                            send_frame(&writer, Frame::HandshakeRejected { reason }).await?;
                            return Err(crate::error::BridgeError::AuthRejected(reason));
                        }
                    }
                    let session_id = Uuid::now_v7();
                    send_frame(&writer, Frame::HandshakeAck { session_id }).await?;
                    (principal, channel_id)
                }
                Err(reason) => {
                    send_frame(&writer, Frame::HandshakeRejected { reason }).await?;
                    return Err(crate::error::BridgeError::AuthRejected(reason));
                }
            }
        }
        _ => {
            send_frame(
                &writer,
                Frame::HandshakeRejected {
                    reason: RejectReason::MalformedCredential,
                },
            )
            .await
            .ok();
            return Err(crate::error::BridgeError::ConnectionClosed);
        }
    };

    info!(?principal, channel = %channel_id, "socket authenticated");

    // Join the channel room and start the outbound path
    let mut room_rx = state.bridge.rooms().join(channel_id);
    let outbound = Arc::new(spawn_outbound(
        state.config.outbound.clone(),
        Arc::new(WsSink {
            writer: writer.clone(),
        }),
    ));

    let fanout_outbound = outbound.clone();
    let fanout = tokio::spawn(async move {
        loop {
            match room_rx.recv().await {
                Ok(envelope) => fanout_outbound.enqueue(envelope),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "room receiver lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Read loop with heartbeat
    let mut ping_interval = tokio::time::interval(state.config.heartbeat_period);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seen = tokio::time::Instant::now();
    let mut ping_seq = 0u64;

    let session_result: Result<()> = loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if last_seen.elapsed() >= state.config.heartbeat_timeout {
                    break Err(crate::error::BridgeError::transport("heartbeat timeout"));
                }
                ping_seq += 1;
                if send_frame(&writer, Frame::Ping { seq: ping_seq }).await.is_err() {
                    break Err(crate::error::BridgeError::ConnectionClosed);
                }
            }
            message = reader.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = tokio::time::Instant::now();
                        handle_text(&state, &writer, channel_id, &text).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_seen = tokio::time::Instant::now();
                        let _ = writer.lock().await.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = tokio::time::Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Err(crate::error::BridgeError::transport(e.to_string()));
                    }
                }
            }
        }
    };

    // Drain pending forwards for the grace period, then discard
    outbound.disconnect();
    fanout.abort();
    if let Principal::Agent { agent_id } = &principal {
        state.agents.disconnect(*agent_id);
    }
    info!(channel = %channel_id, "socket session ended");
    session_result
}

async fn read_handshake(
    reader: &mut SplitStream<WebSocket>,
) -> Option<(crate::auth::Credential, Uuid)> {
    while let Some(message) = reader.next().await {
        match message.ok()? {
            Message::Text(text) => {
                return match Frame::from_text(&text)? {
                    Frame::Handshake {
                        auth, channel_id, ..
                    } => Some((auth, channel_id)),
                    _ => None,
                };
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

async fn handle_text(
    state: &Arc<TransportState>,
    writer: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    channel_id: Uuid,
    text: &str,
) {
    let Some(frame) = Frame::from_text(text) else {
        debug!("unparseable frame ignored");
        return;
    };

    match frame {
        Frame::Event { envelope } => {
            if let Err(e) = state.bridge.handle_inbound(channel_id, envelope).await {
                warn!(error = %e, "inbound event rejected");
            }
        }
        Frame::Batch { envelopes } => {
            for envelope in envelopes {
                if let Err(e) = state.bridge.handle_inbound(channel_id, envelope).await {
                    warn!(error = %e, "inbound event rejected");
                }
            }
        }
        Frame::Ping { seq } => {
            let _ = send_frame(writer, Frame::Pong { seq }).await;
        }
        Frame::Pong { .. } => {}
        // A second handshake or server-only frame is ignored
        _ => debug!("unexpected frame ignored"),
    }
}
