//! Chat WebSocket: one conversation per connection.
//!
//! Inbound frames are `{"message": "..."}`. Outbound frames are
//! [`ChatEvent`]s serialized as JSON; transcript events additionally carry
//! the rendered display blocks so the client never parses markdown itself.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::conversation::{ChatEvent, Conversation, Role};
use crate::error::ApiError;
use crate::markdown::{self, Block};
use crate::validation::validate_user_message;
use crate::{build_backend, AppState};

#[derive(Deserialize)]
struct Inbound {
    message: String,
}

/// A [`ChatEvent`] plus the rendered blocks for transcript frames.
#[derive(Serialize)]
struct Outbound<'a> {
    #[serde(flatten)]
    event: &'a ChatEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocks: Option<Vec<Block>>,
}

pub async fn chat_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("chat socket opened");
    let conversation = Conversation::new(build_backend(&state.config));
    let mut events = conversation.subscribe();
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    // Replay the seeded transcript before forwarding live events.
    for (index, message) in conversation.messages().into_iter().enumerate() {
        let event = ChatEvent::MessageAppended { index, message };
        if !send_event(&sender, &event).await {
            return;
        }
    }

    let forward = tokio::spawn({
        let sender = Arc::clone(&sender);
        async move {
            while let Ok(event) = events.recv().await {
                if !send_event(&sender, &event).await {
                    break;
                }
            }
        }
    });

    while let Some(Ok(frame)) = receiver.next().await {
        match frame {
            WsMessage::Text(text) => {
                let inbound: Inbound = match serde_json::from_str(text.as_str()) {
                    Ok(inbound) => inbound,
                    Err(e) => {
                        debug!("malformed chat frame: {e}");
                        let error = ApiError::InvalidInput("Malformed message frame".to_string());
                        if !send_json(&sender, &error.to_frame()).await {
                            break;
                        }
                        continue;
                    }
                };
                if let Err(error) = validate_user_message(&inbound.message) {
                    if !send_json(&sender, &error.to_frame()).await {
                        break;
                    }
                    continue;
                }
                // Non-blocking: the turn runs on its own task, so frames
                // arriving mid-turn reach the loading guard and are ignored
                // instead of piling up behind the stream.
                conversation.send(&inbound.message);
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    forward.abort();
    info!("chat socket closed");
}

async fn send_event(
    sender: &Arc<Mutex<SplitSink<WebSocket, WsMessage>>>,
    event: &ChatEvent,
) -> bool {
    let blocks = match event {
        ChatEvent::MessageAppended { message, .. } => Some(markdown::render(
            &message.text,
            message.role == Role::User,
        )),
        // Only model messages grow in place.
        ChatEvent::MessageUpdated { text, .. } => Some(markdown::render(text, false)),
        _ => None,
    };
    send_json(sender, &Outbound { event, blocks }).await
}

async fn send_json<T: Serialize>(
    sender: &Arc<Mutex<SplitSink<WebSocket, WsMessage>>>,
    payload: &T,
) -> bool {
    let json = match serde_json::to_string(payload) {
        Ok(json) => json,
        Err(e) => {
            // The payload is lost; tell the client with an error frame,
            // whose fixed shape always serializes.
            let frame =
                ApiError::InternalError(format!("Failed to serialize outbound frame: {e}"))
                    .to_frame();
            match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(_) => return false,
            }
        }
    };
    sender.lock().await.send(WsMessage::text(json)).await.is_ok()
}
