//! In-process relay endpoint
//!
//! [`MemoryConnector`] hands out links whose far end is a [`MemoryPeer`]
//! delivered through a [`MemoryListener`]. Useful for loopback runs and for
//! exercising the channel without a network.

use crate::transport::{RelayConnector, RelayLink};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// How the connector answers connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    /// Establish the link
    #[default]
    Accept,
    /// Fail immediately
    Refuse,
    /// Never complete
    Hang,
}

/// Connector producing in-memory links
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    mode: Arc<Mutex<ConnectMode>>,
    attempts: Arc<AtomicUsize>,
}

/// Receives the far end of each accepted link
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// The relay side of one in-memory link
pub struct MemoryPeer {
    url: Url,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl MemoryConnector {
    /// Create a connector and the listener that receives its links
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded();
        (
            Self {
                accept_tx,
                mode: Arc::new(Mutex::new(ConnectMode::Accept)),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            MemoryListener { accept_rx },
        )
    }

    /// Change how future attempts are answered
    pub fn set_mode(&self, mode: ConnectMode) {
        *self.mode.lock() = mode;
    }

    /// Number of connection attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayConnector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<RelayLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let mode = *self.mode.lock();
        match mode {
            ConnectMode::Accept => {}
            ConnectMode::Refuse => {
                return Err(Error::ConnectionFailed("connection refused".to_string()));
            }
            ConnectMode::Hang => futures::future::pending::<()>().await,
        }

        let (client_tx, from_client) = mpsc::unbounded::<String>();
        let (to_client, client_rx) = mpsc::unbounded::<String>();

        let peer = MemoryPeer {
            url: url.clone(),
            from_client,
            to_client,
        };
        self.accept_tx
            .unbounded_send(peer)
            .map_err(|_| Error::ConnectionFailed("memory listener dropped".to_string()))?;

        let sink = client_tx
            .sink_map_err(|e| Error::ConnectionClosed(format!("memory peer gone: {}", e)));

        Ok(RelayLink {
            sink: Box::pin(sink),
            stream: Box::pin(client_rx.map(Ok)),
        })
    }
}

impl MemoryListener {
    /// Wait for the next accepted link
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.next().await
    }
}

impl MemoryPeer {
    /// URL the client connected to
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next text frame written by the client, `None` once it hung up
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Next frame whose `type` is not `ping`
    pub async fn recv_non_ping(&mut self) -> Option<serde_json::Value> {
        while let Some(text) = self.recv().await {
            let value: serde_json::Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if value["type"] != "ping" {
                return Some(value);
            }
        }
        None
    }

    /// A frame already written by the client, without waiting
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_next().ok().flatten()
    }

    /// Deliver a text frame to the client
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client.unbounded_send(text.into()).is_ok()
    }

    /// Deliver a JSON value to the client
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send(value.to_string())
    }

    /// Close the link from the relay side
    pub fn close(self) {
        drop(self);
    }
}
