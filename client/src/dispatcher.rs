//! Fire-and-forget delivery of mutation intents to the hub.
//!
//! Edits apply locally first and never wait for the network. The dispatcher
//! queues each intent and a single worker invokes them in order, so the hub
//! sees one client's intents in the order they were issued. Failures are
//! logged and dropped; a later resync repairs any divergence.

use crate::error::Error;
use crate::transport::Transport;
use keysync_engine::HubCommand;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Ordered queue of remote intents.
#[derive(Debug)]
pub struct Dispatcher {
    tx: Mutex<Option<mpsc::UnboundedSender<HubCommand>>>,
}

impl Dispatcher {
    /// Start the worker. Must be called within a tokio runtime.
    pub fn spawn(transport: Arc<dyn Transport>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(transport, rx));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            worker,
        )
    }

    /// Queue `command`. Never blocks and never fails the caller.
    pub fn dispatch(&self, command: HubCommand) {
        let target = command.target();
        let queued = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        };
        if !queued {
            let err = Error::RemoteDispatch {
                command: target.to_string(),
                message: "dispatcher closed".to_string(),
            };
            tracing::warn!(error = %err, "Dropping remote intent");
        }
    }

    /// Stop accepting intents. Already queued intents are still delivered.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

async fn run(transport: Arc<dyn Transport>, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
    while let Some(command) = rx.recv().await {
        let target = command.target();
        if let Err(e) = transport.invoke(target, command.into_arguments()).await {
            let err = Error::RemoteDispatch {
                command: target.to_string(),
                message: e.to_string(),
            };
            tracing::warn!(error = %err, "Remote dispatch failed");
        } else {
            tracing::trace!(command = target, "Remote intent delivered");
        }
    }
}
