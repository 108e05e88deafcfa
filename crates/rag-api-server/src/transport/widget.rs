use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::security::{OriginAllowlist, RateLimiter};
use crate::services::rag_orchestrator::StreamEvent;
use crate::services::retrieval::RetrievalMode;
use crate::services::{EmbedCodeIssuer, RagOrchestrator};
use crate::database::Repository;

const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-session fan-out for frames one widget connection wants every
/// other connection on the same chat session to see — today just
/// `typing`, which has no persistence and no business meaning once a
/// peer connection is gone.
pub struct WidgetHub {
    channels: DashMap<Uuid, broadcast::Sender<String>>,
}

impl WidgetHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    fn sender_for(&self, session_id: Uuid) -> broadcast::Sender<String> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(32).0)
            .clone()
    }

    fn publish(&self, session_id: Uuid, frame: &str) {
        if let Some(tx) = self.channels.get(&session_id) {
            let _ = tx.send(frame.to_string());
        }
    }
}

impl Default for WidgetHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WidgetState {
    pub embed_issuer: Arc<EmbedCodeIssuer>,
    pub orchestrator: Arc<RagOrchestrator>,
    pub repository: Arc<Repository>,
    pub hub: Arc<WidgetHub>,
    pub rate_limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
pub struct WidgetConnectQuery {
    pub key: String,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Pong {
        ts: i64,
    },
    Heartbeat {
        server_ts: i64,
    },
    Typing {
        session_id: Uuid,
    },
    ChatChunk {
        id: &'a str,
        delta: &'a str,
    },
    ChatComplete {
        id: &'a str,
        content: String,
        sources: Vec<crate::domain::Citation>,
    },
    Error {
        message: String,
    },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WidgetConnectQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<WidgetState>>,
) -> impl IntoResponse {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // 1. Resolve API key -> embed code; reject if not found or revoked.
    let embed_code = match state.embed_issuer.resolve(&params.key).await {
        Ok(Some(code)) => code,
        _ => {
            return ws.on_upgrade(move |socket| reject(socket, 4401, "unauthorized"));
        }
    };

    // 2. Check Origin against the embed's allowed origins (empty = allow any).
    let allowlist = OriginAllowlist::new(&embed_code.allowed_origins);
    if !origin.is_empty() && !allowlist.is_allowed(&origin) {
        return ws.on_upgrade(move |socket| reject(socket, 4403, "origin not allowed"));
    }

    // 3. Per-IP rate limit.
    let rate_key = format!("{}:{}", embed_code.id, addr.ip());
    if !state.rate_limiter.check(&rate_key) {
        return ws.on_upgrade(move |socket| reject(socket, 4429, "rate limited"));
    }

    let workspace_id = embed_code.workspace_id;
    let requested_session = params.session_id;
    ws.on_upgrade(move |socket| handle_socket(socket, state, workspace_id, requested_session))
}

async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Message loop for one widget connection. Processing happens
/// sequentially in receive order — a `chat_message` is fully answered
/// (including persistence and quota commit) before the next inbound
/// frame is read — while typing broadcasts from sibling connections on
/// the same session arrive concurrently on a second task, matching the
/// split send/receive shape this codebase already uses for its other
/// real-time surface.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<WidgetState>,
    workspace_id: Uuid,
    requested_session: Option<Uuid>,
) {
    let session_id = match resolve_session(&state, workspace_id, requested_session).await {
        Ok(id) => id,
        Err(_) => {
            reject(socket, 1011, "server error").await;
            return;
        }
    };

    let mut broadcast_rx = state.hub.sender_for(session_id).subscribe();
    let (direct_tx, mut direct_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                direct = direct_rx.recv() => {
                    match direct {
                        Some(frame) => {
                            if sender.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                broadcast = broadcast_rx.recv() => {
                    match broadcast {
                        Ok(frame) => {
                            if sender.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    let hub = state.hub.clone();
    let orchestrator = state.orchestrator.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let next = tokio::time::timeout(IDLE_TIMEOUT, receiver.next()).await;
            let msg = match next {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_) => break,
            };

            let Message::Text(text) = msg else {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
                continue;
            };

            let frame: InboundFrame = match serde_json::from_str(&text) {
                Ok(f) => f,
                Err(_) => continue,
            };

            match frame.kind.as_str() {
                "ping" => {
                    let frame = OutboundFrame::Pong {
                        ts: chrono::Utc::now().timestamp_millis(),
                    };
                    let _ = direct_tx.send(serde_json::to_string(&frame).unwrap_or_default());
                }
                "heartbeat" => {
                    let frame = OutboundFrame::Heartbeat {
                        server_ts: chrono::Utc::now().timestamp_millis(),
                    };
                    let _ = direct_tx.send(serde_json::to_string(&frame).unwrap_or_default());
                }
                "typing" => {
                    // The only frame broadcast to other connections on
                    // this session — every other frame type is a direct
                    // reply to the connection that asked for it.
                    let frame = OutboundFrame::Typing { session_id };
                    hub.publish(session_id, &serde_json::to_string(&frame).unwrap_or_default());
                }
                "chat_message" => {
                    let query = frame
                        .data
                        .get("content")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let frame_id = frame.id.clone().unwrap_or_default();
                    let mode: RetrievalMode = frame
                        .data
                        .get("mode")
                        .and_then(|v| serde_json::from_value(v.clone()).ok())
                        .unwrap_or_default();
                    let document_ids: Option<Vec<Uuid>> = frame
                        .data
                        .get("document_ids")
                        .and_then(|v| serde_json::from_value(v.clone()).ok());

                    let mut events = orchestrator.answer_stream(
                        workspace_id,
                        session_id,
                        query,
                        mode,
                        document_ids,
                    );
                    while let Some(event) = events.recv().await {
                        match event {
                            StreamEvent::Delta(delta) => {
                                let out = OutboundFrame::ChatChunk {
                                    id: &frame_id,
                                    delta: &delta,
                                };
                                let _ = direct_tx.send(serde_json::to_string(&out).unwrap_or_default());
                            }
                            StreamEvent::Done(answer) => {
                                let out = OutboundFrame::ChatComplete {
                                    id: &frame_id,
                                    content: answer.content,
                                    sources: answer.sources,
                                };
                                let _ = direct_tx.send(serde_json::to_string(&out).unwrap_or_default());
                            }
                            StreamEvent::Error(e) => {
                                let out = OutboundFrame::Error {
                                    message: e.to_string(),
                                };
                                let _ = direct_tx.send(serde_json::to_string(&out).unwrap_or_default());
                            }
                        }
                    }
                }
                "close" => break,
                other => {
                    tracing::debug!(frame_type = other, "unrecognized widget frame");
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn resolve_session(
    state: &WidgetState,
    workspace_id: Uuid,
    requested: Option<Uuid>,
) -> Result<Uuid, crate::utils::error::ApiError> {
    if let Some(id) = requested {
        let found = state
            .repository
            .get_session(workspace_id, id)
            .await
            .map_err(|e| crate::utils::error::ApiError::Unavailable(e.to_string()))?;
        if let Some(session) = found {
            return Ok(session.id);
        }
    }
    let session = state
        .repository
        .create_session(workspace_id)
        .await
        .map_err(|e| crate::utils::error::ApiError::Unavailable(e.to_string()))?;
    Ok(session.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_frames_are_tagged_on_the_wire() {
        let value = serde_json::to_value(OutboundFrame::Pong { ts: 42 }).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["ts"], 42);
    }
}
