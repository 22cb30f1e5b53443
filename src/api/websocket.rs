//! WebSocket chat with token streaming.
//!
//! `GET /api/sessions/:id/chat/ws` upgrades to a socket bound to one
//! session. Each `Ask` message runs the same turn as `POST /chat`, but
//! completion tokens are forwarded as they arrive, followed by a
//! `Complete` message with the sources.
//!
//! Per-connection rate limit: 10 incoming messages per second.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::endpoints::chat::{prepare_turn, record_turn};
use crate::api::endpoints::parse_session_id;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;
use crate::models::Source;
use crate::pipeline::rag::types::{AnswerRoute, ChatAnswer};

/// Maximum incoming messages per second per connection.
const MAX_INCOMING_PER_SECOND: u32 = 10;

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsIncoming {
    Ask { question: String },
    Ping {},
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum WsOutgoing {
    Token {
        token: String,
    },
    Complete {
        answer: String,
        sources: Vec<Source>,
        route: AnswerRoute,
        chunks_used: usize,
    },
    Error {
        code: String,
        message: String,
    },
    Pong {},
}

impl WsOutgoing {
    fn complete(answer: &ChatAnswer) -> Self {
        WsOutgoing::Complete {
            answer: answer.text.clone(),
            sources: answer.sources.clone(),
            route: answer.route.clone(),
            chunks_used: answer.chunks_used,
        }
    }

    fn error(err: &ApiError) -> Self {
        WsOutgoing::Error {
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

/// WebSocket upgrade handler. The session must exist before upgrading.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = parse_session_id(&id)?;
    ctx.core.read_sessions()?.get(&session_id)?;

    tracing::info!(session = %session_id, "WebSocket upgrade accepted");
    let core = ctx.core.clone();
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, core, session_id)))
}

/// Main connection loop: a sender task drains the outgoing channel,
/// this task reads client messages until close.
async fn handle_ws(socket: WebSocket, core: Arc<CoreState>, session_id: Uuid) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<WsOutgoing>(64);

    let sender_handle = tokio::spawn(async move {
        let mut sink = ws_sink;
        let mut rx = rx;
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut incoming_times = VecDeque::new();

    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if !check_incoming_rate(&mut incoming_times) {
                    let _ = tx
                        .send(WsOutgoing::error(&ApiError::RateLimited { retry_after: 1 }))
                        .await;
                    continue;
                }
                match serde_json::from_str::<WsIncoming>(&text) {
                    Ok(WsIncoming::Ask { question }) => {
                        handle_ask(&core, session_id, question, &tx).await;
                    }
                    Ok(WsIncoming::Ping {}) => {
                        let _ = tx.send(WsOutgoing::Pong {}).await;
                    }
                    Err(e) => {
                        let err = ApiError::BadRequest(format!("Unrecognized message: {e}"));
                        let _ = tx.send(WsOutgoing::error(&err)).await;
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {} // Ping/Pong frames handled by axum
        }
    }

    drop(tx);
    let _ = sender_handle.await;
    tracing::info!(session = %session_id, "WebSocket disconnected");
}

/// Check if an incoming message is within the rate limit.
fn check_incoming_rate(timestamps: &mut VecDeque<Instant>) -> bool {
    let now = Instant::now();
    let one_sec_ago = now - Duration::from_secs(1);

    while let Some(&front) = timestamps.front() {
        if front < one_sec_ago {
            timestamps.pop_front();
        } else {
            break;
        }
    }

    if timestamps.len() as u32 >= MAX_INCOMING_PER_SECOND {
        return false;
    }

    timestamps.push_back(now);
    true
}

/// Answer one question, streaming tokens back over the socket.
async fn handle_ask(
    core: &Arc<CoreState>,
    session_id: Uuid,
    question: String,
    tx: &mpsc::Sender<WsOutgoing>,
) {
    let core = core.clone();
    let tx_blocking = tx.clone();

    let result = tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let tx = tx_blocking;
        let request = prepare_turn(&core, session_id, &question)?;
        let roster = core.roster()?;
        let pipeline = core.pipeline(&roster);

        let (token_tx, token_rx) = std::sync::mpsc::channel::<String>();
        let answer = std::thread::scope(|scope| {
            let worker = scope.spawn(|| pipeline.answer_streaming(&request, token_tx));
            for token in token_rx {
                let _ = tx.blocking_send(WsOutgoing::Token { token });
            }
            worker.join()
        })
        .map_err(|_| ApiError::Internal("answer worker panicked".into()))??;

        record_turn(&core, session_id, &request, &answer)?;
        let _ = tx.blocking_send(WsOutgoing::complete(&answer));
        Ok(())
    })
    .await;

    let err = match result {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => ApiError::from(e),
    };
    tracing::warn!(session = %session_id, code = err.code(), "WebSocket question failed");
    let _ = tx.send(WsOutgoing::error(&err)).await;
}
