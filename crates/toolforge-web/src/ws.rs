//! WebSocket handler for streaming question traces.
//!
//! Clients connect to `/ws` and send one JSON request per question:
//! `{"question": "...", "history": [...], "options": {...}}`. The server
//! replies with the ordered event trace as JSON text frames, ending with a
//! terminal event, and then waits for the next question on the same
//! connection.
//!
//! A bounded channel sits between the agent and the socket: a stalled
//! consumer eventually blocks the agent, and a disconnected consumer drops
//! the receiver, which cancels the run after its in-flight call completes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, SplitStream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use toolforge_agent::{AgentEvent, AskOptions, HistoryTurn};

use crate::state::AppState;

/// Minimum guaranteed buffering between the agent and a slow consumer.
const EVENT_BUFFER: usize = 64;

/// Inbound question request.
#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    history: Vec<HistoryTurn>,
    #[serde(default)]
    options: AskOverrides,
}

#[derive(Deserialize, Default)]
struct AskOverrides {
    iter_max: Option<u32>,
    t_max_secs: Option<u64>,
}

/// Axum handler that upgrades the HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Process a single WebSocket connection: one question at a time, in order.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("websocket client connected");

    // Split so the event-forwarding loop can send while also watching for a
    // client disconnect.
    let (mut sender, mut receiver) = socket.split();

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let request: AskRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                let frame = serde_json::json!({
                    "kind": "error",
                    "message": format!("invalid request: {e}"),
                    "where": "transport",
                });
                if sender
                    .send(Message::Text(frame.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        if stream_question(&mut sender, &mut receiver, &state, request)
            .await
            .is_err()
        {
            break;
        }
    }

    tracing::info!("websocket client disconnected");
}

/// Run one question, forwarding events to the socket in order.
///
/// Returns `Err(())` when the connection is gone and the loop should stop.
async fn stream_question(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    state: &Arc<AppState>,
    request: AskRequest,
) -> Result<(), ()> {
    let options = AskOptions {
        iter_max: request.options.iter_max,
        t_max: request.options.t_max_secs.map(Duration::from_secs),
        history: request.history,
    };

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(EVENT_BUFFER);
    let agent = state.agent.clone();
    let question = request.question;
    let handle = tokio::spawn(async move { agent.run(&question, options, tx).await });

    let mut connection_lost = false;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    // Agent finished; the terminal event was already sent.
                    break;
                };
                let frame = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize event");
                        continue;
                    }
                };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    connection_lost = true;
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        connection_lost = true;
                        break;
                    }
                    // Ignore client frames sent mid-question.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Dropping the receiver signals cancellation; the agent completes its
    // in-flight call and emits nothing further.
    drop(rx);
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "agent task panicked");
    }

    if connection_lost { Err(()) } else { Ok(()) }
}
