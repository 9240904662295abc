//! WebSocket handler for hub connections.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use keysync_engine::{ClientFrame, HubCommand, ServerFrame};
use tokio::sync::mpsc;

use crate::hub::{Hub, Session};

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing frames
/// 3. Executes incoming invocations in order
/// 4. Cleans up on disconnect
pub async fn handle_hub_connection(socket: WebSocket, hub: Arc<Hub>, collection: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let conn_manager = hub.connections().clone();
    let conn_id = conn_manager.register(&collection, tx);
    let mut session = Session::new(conn_id.clone(), collection.clone());

    tracing::info!(
        conn_id = %conn_id,
        collection = %collection,
        "Hub client connected"
    );

    // Forward frames from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket frame: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_frame(text.as_str(), &hub, &mut session).await;
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        collection = %collection,
        active_connections = conn_manager.connection_count(),
        "Hub client disconnected"
    );
}

/// Process one client frame and return the reply.
async fn process_frame(text: &str, hub: &Hub, session: &mut Session) -> ServerFrame {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            return ServerFrame::Error {
                message: format!("Invalid frame: {}", e),
            };
        }
    };

    match frame {
        ClientFrame::Ping => ServerFrame::Pong,
        ClientFrame::Invocation {
            invocation_id,
            target,
            arguments,
        } => {
            let command = match HubCommand::parse(&target, arguments) {
                Ok(command) => command,
                Err(e) => return ServerFrame::failed(invocation_id, e.to_string()),
            };

            match hub.execute(session, command).await {
                Ok(result) => ServerFrame::completed(invocation_id, result),
                Err(e) => {
                    tracing::warn!(
                        conn_id = %session.conn_id(),
                        command = %target,
                        error = %e,
                        "Invocation failed"
                    );
                    ServerFrame::failed(invocation_id, e.to_string())
                }
            }
        }
    }
}
