//! WebSocket fan-out: one router subscription per connected peer.
//!
//! The socket task is the only reader and writer for its peer. Ticks come
//! out of the subscriber outbox; control messages come off the socket; a
//! periodic protocol ping keeps NATs from reaping quiet connections. When
//! the router cancels the subscription the task sends a close frame whose
//! code encodes the reason, then exits.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tickfan_core::cache::SymbolCache;
use tickfan_core::metrics;
use tickfan_core::router::{CancelReason, DropPolicy, Router, SubscriberId};
use tickfan_core::tick::SubscriberKind;

use crate::messages::{ClientMessage, ServerMessage, ALL_SYMBOLS};

/// Peers that keep sending unparseable frames get closed as malformed
/// after this many strikes. Well-formed JSON with an unknown `type` only
/// draws an error reply.
const MAX_MALFORMED_MESSAGES: u32 = 3;

const CLOSE_MALFORMED_CLIENT: u16 = 4002;

#[derive(Clone)]
pub struct GatewayState {
    pub cache: Arc<SymbolCache>,
    pub router: Arc<Router>,
    pub drop_policy: DropPolicy,
    pub ping_interval: Duration,
}

pub async fn ws_handler(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let mut handle = state
        .router
        .register(SubscriberKind::WebSocket, state.drop_policy);
    let id = handle.id();
    tracing::info!(subscriber = %id, "websocket peer connected");

    let (mut sender, mut receiver) = socket.split();
    let mut ping = tokio::time::interval(state.ping_interval);
    let mut malformed: u32 = 0;

    loop {
        tokio::select! {
            tick = handle.recv() => match tick {
                Some(tick) => {
                    let msg = ServerMessage::stock_data(tick.symbol.clone(), Some(tick.as_ref()));
                    if send_json(&mut sender, &msg).await.is_err() {
                        state.router.cancel(id, CancelReason::Disconnect);
                        break;
                    }
                }
                None => {
                    // Router cancelled us; tell the peer why and stop.
                    let reason = handle.cancel_reason().unwrap_or(CancelReason::Disconnect);
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: reason.close_code(),
                            reason: reason.as_str().into(),
                        })))
                        .await;
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(request) => handle_request(&state, id, request),
                        Err(e) => {
                            if serde_json::from_str::<serde_json::Value>(&text).is_ok() {
                                // Valid JSON, unrecognised shape.
                                ServerMessage::Error {
                                    code: CLOSE_MALFORMED_CLIENT,
                                    message: format!("unrecognised message: {e}"),
                                }
                            } else {
                                metrics::inc_malformed_client_message();
                                malformed += 1;
                                tracing::debug!(subscriber = %id, "malformed client frame ignored");
                                if malformed >= MAX_MALFORMED_MESSAGES {
                                    let _ = sender
                                        .send(Message::Close(Some(CloseFrame {
                                            code: CLOSE_MALFORMED_CLIENT,
                                            reason: "malformed client".into(),
                                        })))
                                        .await;
                                    state.router.cancel(id, CancelReason::Disconnect);
                                    break;
                                }
                                continue;
                            }
                        }
                    };
                    if send_json(&mut sender, &reply).await.is_err() {
                        state.router.cancel(id, CancelReason::Disconnect);
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sender.send(Message::Pong(payload)).await.is_err() {
                        state.router.cancel(id, CancelReason::Disconnect);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    state.router.cancel(id, CancelReason::Disconnect);
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    state.router.cancel(id, CancelReason::Disconnect);
                    break;
                }
            }
        }
    }

    tracing::info!(subscriber = %id, "websocket peer gone");
}

fn handle_request(state: &GatewayState, id: SubscriberId, request: ClientMessage) -> ServerMessage {
    match request {
        ClientMessage::Subscribe { symbol } => {
            if symbol == ALL_SYMBOLS {
                state.router.subscribe_all(id);
            } else {
                state.router.subscribe(id, &symbol);
            }
            ServerMessage::SubscriptionConfirmed { symbol }
        }
        ClientMessage::Unsubscribe { symbol } => {
            state.router.unsubscribe(id, &symbol);
            ServerMessage::UnsubscriptionConfirmed { symbol }
        }
        ClientMessage::Ping => ServerMessage::Pong {
            server_time: chrono::Utc::now().timestamp_millis(),
        },
        ClientMessage::GetStock { symbol } => {
            let tick = state.cache.get(&symbol);
            ServerMessage::stock_data(symbol, tick.as_deref())
        }
    }
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let body = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(body)).await
}
