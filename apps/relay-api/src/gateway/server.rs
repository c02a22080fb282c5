//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use crate::AppState;

use super::events::{
    ClientEvent, ClientMessage, EventName, GatewayMessage, HeartbeatPayload, OutboundEvent,
    ParseError, OP_HEARTBEAT,
};
use super::handler::handle_event;
use super::hub::Hub;
use super::session::channel_sink;
use super::sessions::SessionManager;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();

    let (sink, outbound_rx) = channel_sink(state.config.outbound_buffer);
    let session_id = state.hub.connect(sink);

    tracing::info!(%session_id, "gateway connection opened");

    let mut conn = Connection {
        hub: state.hub.clone(),
        session_id: session_id.clone(),
        ws_tx,
        seq: 0,
    };
    conn.run(
        ws_rx,
        outbound_rx,
        state.config.heartbeat_interval_ms,
        state.config.identify_timeout_secs,
    )
    .await;

    state.hub.disconnect(&session_id);

    tracing::info!(%session_id, "gateway connection closed");
}

/// Per-socket state owned by the connection task.
struct Connection {
    hub: Arc<Hub>,
    session_id: String,
    ws_tx: WsSink,
    /// Last sequence number used for a dispatch to this client.
    seq: u64,
}

impl Connection {
    /// Main session event loop: read client frames, forward queued events,
    /// enforce heartbeat and identify deadlines.
    async fn run(
        &mut self,
        mut ws_rx: WsStream,
        mut outbound_rx: mpsc::Receiver<OutboundEvent>,
        heartbeat_interval_ms: u64,
        identify_timeout_secs: u64,
    ) {
        let ready = OutboundEvent::new(
            EventName::READY,
            serde_json::json!({
                "session_id": self.session_id,
                "heartbeat_interval": heartbeat_interval_ms,
            }),
        );
        if self.dispatch(&ready).await.is_err() {
            return;
        }

        // Heartbeat deadline: client must heartbeat within 1.5× the interval.
        let heartbeat_deadline = Duration::from_millis((heartbeat_interval_ms * 3 / 2).max(1));
        let mut heartbeat_timer = time::interval(heartbeat_deadline);
        heartbeat_timer.tick().await; // First tick fires immediately; skip it.
        let mut got_heartbeat = true;

        let identify_deadline = time::sleep(Duration::from_secs(identify_timeout_secs));
        tokio::pin!(identify_deadline);
        let mut identify_checked = false;

        loop {
            tokio::select! {
                // Client sends us a frame.
                msg = ws_rx.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::debug!(?e, session_id = %self.session_id, "ws read error");
                            break;
                        }
                        _ => continue,
                    };

                    let client_msg: ClientMessage = match serde_json::from_str(&text) {
                        Ok(m) => m,
                        Err(_) => {
                            let _ = self.close(CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                            break;
                        }
                    };

                    if client_msg.op == OP_HEARTBEAT {
                        got_heartbeat = true;
                        let payload: HeartbeatPayload = serde_json::from_value(client_msg.d)
                            .unwrap_or(HeartbeatPayload { seq: 0 });
                        if self.send(&GatewayMessage::heartbeat_ack(payload.seq)).await.is_err() {
                            break;
                        }
                        continue;
                    }

                    let replies = match ClientEvent::parse(client_msg) {
                        Ok(event) => {
                            // Detached so that a closing socket cannot cancel a
                            // send between persistence and fan-out.
                            let task = tokio::spawn(handle_event(
                                self.hub.clone(),
                                self.session_id.clone(),
                                event,
                            ));
                            match task.await {
                                Ok(replies) => replies,
                                Err(e) => {
                                    tracing::error!(?e, session_id = %self.session_id, "event handler panicked");
                                    vec![OutboundEvent::error("INTERNAL_ERROR", "Internal error", 0)]
                                }
                            }
                        }
                        Err(ParseError::UnknownOp(op)) => {
                            tracing::debug!(op, session_id = %self.session_id, "unknown opcode");
                            let _ = self.close(CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                            break;
                        }
                        Err(ParseError::InvalidPayload(op, reason)) => {
                            vec![OutboundEvent::error("INVALID_PAYLOAD", &reason, op)]
                        }
                    };

                    if self.dispatch_all(&replies).await.is_err() {
                        break;
                    }
                }

                // Event fanned out to this session by another session's action.
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    if self.dispatch(&event).await.is_err() {
                        break;
                    }
                }

                // Heartbeat timeout check.
                _ = heartbeat_timer.tick() => {
                    if !got_heartbeat {
                        tracing::debug!(
                            session_id = %self.session_id,
                            "heartbeat timeout, closing connection"
                        );
                        let _ = self.close(CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                        break;
                    }
                    got_heartbeat = false;
                }

                // Unauthenticated connections do not linger.
                _ = &mut identify_deadline, if !identify_checked => {
                    identify_checked = true;
                    if !is_authenticated(&self.hub.sessions, &self.session_id) {
                        tracing::debug!(session_id = %self.session_id, "identify timeout");
                        let _ = self.close(CLOSE_NOT_AUTHENTICATED, "Identify timeout").await;
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch_all(&mut self, events: &[OutboundEvent]) -> Result<(), axum::Error> {
        for event in events {
            self.dispatch(event).await?;
        }
        Ok(())
    }

    /// Send a DISPATCH frame with the next sequence number.
    async fn dispatch(&mut self, event: &OutboundEvent) -> Result<(), axum::Error> {
        self.seq += 1;
        let msg = GatewayMessage::dispatch(event.name, self.seq, (*event.data).clone());
        self.send(&msg).await
    }

    async fn send(&mut self, msg: &GatewayMessage) -> Result<(), axum::Error> {
        let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
        self.ws_tx.send(Message::Text(json.into())).await
    }

    /// Send a WebSocket close frame with a code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), axum::Error> {
        let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
            code,
            reason: reason.to_string().into(),
        }));
        self.ws_tx.send(close_msg).await
    }
}

fn is_authenticated(sessions: &SessionManager, session_id: &str) -> bool {
    sessions.identity_of(session_id).is_ok()
}
