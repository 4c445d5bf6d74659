//! The streaming channel: inbound commands in, ordered pipeline events out.
//!
//! One socket can multiplex several conversations. Each pipeline appends its
//! events to a shared channel in causal order; a single writer task forwards
//! them, applying the [`EventBuffer`] backpressure policy when the peer
//! cannot keep up. A malformed frame produces an `error` event and leaves
//! the channel open.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gavel_core::{ConversationMode, PipelineEvent, TurnRequest};

use super::buffer::EventBuffer;
use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum InboundCommand {
    UserMessage {
        message: String,
        conversation_id: Option<String>,
        #[serde(default = "default_mode")]
        mode: ConversationMode,
        message_id: Option<String>,
        #[serde(default)]
        skip_user_evaluation: bool,
    },
    Cancel {
        conversation_id: String,
    },
}

fn default_mode() -> ConversationMode {
    ConversationMode::InputCritique
}

pub async fn websocket_chat(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (events_tx, events_rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let writer = tokio::spawn(forward_events(sink, events_rx));

    while let Some(frame) = stream.next().await {
        let Ok(frame) = frame else {
            break;
        };
        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<InboundCommand>(&text) {
                Ok(InboundCommand::UserMessage {
                    message,
                    conversation_id,
                    mode,
                    message_id,
                    skip_user_evaluation,
                }) => {
                    let mut request = TurnRequest::new(message).with_mode(mode);
                    if let Some(conversation_id) = conversation_id {
                        request = request.with_conversation(conversation_id);
                    }
                    if let Some(message_id) = message_id {
                        request = request.with_message_id(message_id);
                    }
                    if skip_user_evaluation {
                        request = request.skip_input_critique();
                    }

                    debug!("Starting pipeline from websocket command");
                    let orchestrator = state.orchestrator.clone();
                    let events = events_tx.clone();
                    tokio::spawn(async move {
                        // failures already surface as error/cancelled events
                        let _ = orchestrator.process_message(request, Some(events)).await;
                    });
                }
                Ok(InboundCommand::Cancel { conversation_id }) => {
                    if let Err(err) = state.orchestrator.cancel(&conversation_id) {
                        let _ = events_tx.send(PipelineEvent::Error {
                            conversation_id,
                            error: err.to_string(),
                        });
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Malformed websocket command");
                    let _ = events_tx.send(PipelineEvent::Error {
                        conversation_id: String::new(),
                        error: format!("malformed command: {err}"),
                    });
                }
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // closing the socket ends the writer; in-flight pipelines keep running
    // against a dead channel and their sends are dropped
    writer.abort();
}

async fn forward_events(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<PipelineEvent>,
) {
    let mut buffer = EventBuffer::new();

    while let Some(event) = rx.recv().await {
        buffer.push(event);
        // everything that queued up while the last send was in flight gets
        // the coalescing treatment before it goes out
        while let Ok(more) = rx.try_recv() {
            buffer.push(more);
        }

        while let Some(next) = buffer.pop() {
            let Ok(json) = serde_json::to_string(&next) else {
                continue;
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                return;
            }
            while let Ok(more) = rx.try_recv() {
                buffer.push(more);
            }
        }
    }
}
