//! WebSocket transport.
//!
//! One supervisor task owns the socket. Invocations are written through a
//! channel and matched with their completions by invocation id. When the
//! socket drops, every pending invocation fails with
//! [`TransportError::Closed`] and the supervisor reconnects with exponential
//! backoff, firing the reconnected handlers once a new socket is up.

use super::{backoff_delay, PushHandler, ReconnectHandler, Transport};
use crate::config::TransportConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use keysync_engine::{ClientFrame, ServerFrame};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Completion = oneshot::Sender<Result<Value, TransportError>>;

struct Shared {
    config: TransportConfig,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Completion>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    push_handlers: RwLock<HashMap<String, Vec<PushHandler>>>,
    reconnect_handlers: RwLock<Vec<ReconnectHandler>>,
    shutdown: watch::Sender<bool>,
}

/// [`Transport`] over a WebSocket connection to a keysync hub.
pub struct WsTransport {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Connect to the hub. The first connection attempt must succeed;
    /// later drops are retried in the background.
    pub async fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        let socket = open(&config.url).await?;
        tracing::info!(url = %config.url, "Connected to hub");

        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            config,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            push_handlers: RwLock::new(HashMap::new()),
            reconnect_handlers: RwLock::new(Vec::new()),
            shutdown,
        });

        let supervisor = tokio::spawn(supervise(shared.clone(), socket));

        Ok(Self {
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Whether a socket is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.outbound.lock().is_some()
    }
}

async fn open(url: &str) -> Result<Socket, TransportError> {
    let (socket, _response) = connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    Ok(socket)
}

async fn supervise(shared: Arc<Shared>, first: Socket) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut socket = Some(first);
    let mut resumed = false;

    loop {
        if let Some(active) = socket.take() {
            run_connection(&shared, active, resumed).await;
            fail_pending(&shared);
        }

        if *shutdown.borrow() {
            break;
        }

        let mut attempt = 0u32;
        let reconnected = loop {
            let delay = backoff_delay(
                attempt,
                shared.config.reconnect_min_delay,
                shared.config.reconnect_max_delay,
            );
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break None,
            }

            match open(&shared.config.url).await {
                Ok(active) => break Some(active),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        };

        match reconnected {
            Some(active) => {
                tracing::info!(url = %shared.config.url, attempts = attempt + 1, "Reconnected to hub");
                socket = Some(active);
                resumed = true;
            }
            None => break,
        }
    }

    tracing::debug!("Transport supervisor stopped");
}

/// Pump one socket until it closes or shutdown is requested.
///
/// Reconnected handlers fire once the socket accepts invocations.
async fn run_connection(shared: &Arc<Shared>, socket: Socket, resumed: bool) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientFrame>();
    *shared.outbound.lock() = Some(tx);

    let mut shutdown = shared.shutdown.subscribe();
    if *shutdown.borrow() {
        *shared.outbound.lock() = None;
        return;
    }
    if resumed {
        notify_reconnected(shared);
    }
    let mut keep_alive = tokio::time::interval(shared.config.keep_alive);
    keep_alive.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if let Err(e) = ws_sender.send(Message::Text(text)).await {
                            tracing::warn!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize frame: {}", e),
                }
            }
            message = ws_receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => handle_frame(shared, &text),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Hub closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            _ = keep_alive.tick() => {
                if let Ok(text) = serde_json::to_string(&ClientFrame::Ping) {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    *shared.outbound.lock() = None;
}

fn decode_frame(text: &str) -> Result<ServerFrame, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Codec(e.to_string()))
}

fn handle_frame(shared: &Shared, text: &str) {
    let frame = match decode_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid frame from hub");
            return;
        }
    };

    match frame {
        ServerFrame::Completion {
            invocation_id,
            result,
            error,
        } => {
            let Some(waiter) = shared.pending.lock().remove(&invocation_id) else {
                tracing::debug!(invocation_id, "Completion for unknown invocation");
                return;
            };
            let outcome = match error {
                Some(message) => Err(TransportError::Remote(message)),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = waiter.send(outcome);
        }
        ServerFrame::Push { event, payload } => {
            let handlers = shared
                .push_handlers
                .read()
                .get(&event)
                .cloned()
                .unwrap_or_default();
            for handler in handlers {
                handler(payload.clone());
            }
        }
        ServerFrame::Pong => tracing::trace!("Received pong"),
        ServerFrame::Error { message } => tracing::warn!(%message, "Hub reported an error"),
    }
}

fn fail_pending(shared: &Shared) {
    let pending: Vec<Completion> = shared.pending.lock().drain().map(|(_, tx)| tx).collect();
    for waiter in pending {
        let _ = waiter.send(Err(TransportError::Closed));
    }
}

fn notify_reconnected(shared: &Shared) {
    let handlers = shared.reconnect_handlers.read().clone();
    for handler in handlers {
        handler();
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn invoke(&self, command: &str, arguments: Vec<Value>) -> Result<Value, TransportError> {
        let invocation_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(invocation_id, tx);

        let frame = ClientFrame::Invocation {
            invocation_id,
            target: command.to_string(),
            arguments,
        };

        let sent = match self.shared.outbound.lock().as_ref() {
            Some(outbound) => outbound.send(frame).is_ok(),
            None => false,
        };
        if !sent {
            self.shared.pending.lock().remove(&invocation_id);
            return Err(TransportError::NotConnected);
        }

        match tokio::time::timeout(self.shared.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.shared.pending.lock().remove(&invocation_id);
                Err(TransportError::Timeout)
            }
        }
    }

    fn on_push(&self, event: &str, handler: PushHandler) {
        self.shared
            .push_handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn on_reconnected(&self, handler: ReconnectHandler) {
        self.shared.reconnect_handlers.write().push(handler);
    }

    async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        let supervisor = self.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.await;
        }
        fail_pending(&self.shared);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}
