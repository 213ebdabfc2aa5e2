//! The persistent WebSocket connection: handshake authentication, frame
//! dispatch, and the outbound pump that drains the broker channel.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::protocol::{ClientFrame, ServerFrame};
use parley_shared::UserId;

use crate::api::AppState;
use crate::auth::bearer_token;
use crate::broker::{Subscriber, SUBSCRIBER_BUFFER};
use crate::dispatch;

/// Who a connection speaks as.  Handshake authentication is soft-fail: a
/// missing or invalid token still gets a connection, it just cannot send.
#[derive(Debug, Clone, Copy)]
enum Principal {
    Anonymous,
    Authenticated(UserId),
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let principal = match bearer_token(&headers) {
        Some(token) => match state.tokens.verify(token) {
            Ok(user) => Principal::Authenticated(user),
            Err(_) => {
                warn!("websocket handshake with invalid token, continuing anonymous");
                Principal::Anonymous
            }
        },
        None => Principal::Anonymous,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, principal))
}

async fn handle_socket(socket: WebSocket, state: AppState, principal: Principal) {
    let conn_id = Uuid::new_v4();
    info!(connection = %conn_id, ?principal, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(SUBSCRIBER_BUFFER);
    let subscriber = Arc::new(Subscriber::new(conn_id, tx.clone()));

    // Single writer: everything the client sees goes through this pump.
    let pump = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Ping/pong are handled by axum; binary frames are ignored.
            _ => continue,
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection = %conn_id, error = %e, "unparseable client frame");
                send_frame(
                    &tx,
                    &ServerFrame::Error {
                        code: "badFrame".into(),
                        message: "could not parse frame".into(),
                    },
                )
                .await;
                continue;
            }
        };

        match frame {
            ClientFrame::Subscribe { chat_id } => {
                state.broker.subscribe(chat_id, Arc::clone(&subscriber)).await;
                debug!(connection = %conn_id, topic = %chat_id.to_topic(), "subscribed");
                send_frame(&tx, &ServerFrame::Subscribed { chat_id }).await;
            }
            ClientFrame::SendMessage { receiver_id, content } => {
                let Principal::Authenticated(sender) = principal else {
                    send_frame(
                        &tx,
                        &ServerFrame::Error {
                            code: "unauthorized".into(),
                            message: "authentication required to send".into(),
                        },
                    )
                    .await;
                    continue;
                };
                if let Err(e) =
                    dispatch::send_message(&state.db, &state.broker, sender, receiver_id, &content)
                        .await
                {
                    send_frame(
                        &tx,
                        &ServerFrame::Error {
                            code: "sendFailed".into(),
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        }
    }

    state.broker.unsubscribe_all(conn_id).await;
    pump.abort();
    info!(connection = %conn_id, "websocket disconnected");
}

async fn send_frame(tx: &mpsc::Sender<Arc<String>>, frame: &ServerFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            let _ = tx.send(Arc::new(json)).await;
        }
        Err(e) => warn!(error = %e, "failed to serialize server frame"),
    }
}
