use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::session::ControlChannel;
use crate::signaling::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// WebSocket upgrade handler for control channels
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

/// Drive one control channel until the client goes away.
async fn handle_socket(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let channel = ControlChannel::new(tx);
    let channel_id = channel.id();

    // Forward queued messages to the socket
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to encode server message: {}", e),
            }
        }
        let _ = sender.close().await;
        debug!("Message sender task ended for channel {}", channel_id);
    });

    info!(channel = %channel_id, remote = %remote_addr, "control channel connected");

    while let Some(msg_result) = receiver.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "control channel read failed");
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            // Some clients send JSON in binary frames
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Ignoring non-UTF8 binary frame from channel {}", channel_id);
                    continue;
                }
            },
            Message::Close(_) => {
                debug!("Received Close frame from channel {}", channel_id);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(client_msg) => handle_client_message(client_msg, &channel, &state).await,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "invalid control message");
                channel.send(ServerMessage::Error {
                    message: format!("Invalid message format: {}", e),
                });
            }
        }
    }

    state.lifecycle.disconnect(channel_id).await;
    drop(channel);
    let _ = writer.await;

    info!(channel = %channel_id, remote = %remote_addr, "control channel disconnected");
}

/// Handle one client event. Failures are reported to the client where it
/// makes sense and never end the connection.
async fn handle_client_message(message: ClientMessage, channel: &ControlChannel, state: &AppState) {
    match message {
        ClientMessage::Register { identity } => {
            if identity.trim().is_empty() {
                channel.send(ServerMessage::Error {
                    message: "identity must not be empty".to_string(),
                });
                return;
            }
            match state.relay.register(&identity, channel).await {
                Ok(_) => {
                    channel.send(ServerMessage::Registered { identity });
                }
                Err(e) => {
                    error!(identity = %identity, error = %e, "failed to create peer connection");
                    channel.send(ServerMessage::Error {
                        message: format!("Failed to register {}: {}", identity, e),
                    });
                }
            }
        }

        ClientMessage::Signal { identity, signal } => {
            // Stale and rejected signals are logged by the relay and dropped.
            let _ = state.relay.signal(&identity, signal).await;
        }

        ClientMessage::Ping => {
            channel.send(ServerMessage::Pong);
        }
    }
}
