//! Call negotiation test harness
//!
//! Provides infrastructure for integration testing of the call engine and
//! room coordinator without a network or a WebRTC stack:
//! - In-memory relay (one [`MemoryPeer`] per connected client)
//! - Scripted peer transports that record negotiation
//! - A media source that can be slowed down or made to fail
//!
//! Tests run on a paused clock; use [`settle`] to let spawned tasks run.

#![allow(dead_code)]

pub mod media;
pub mod transport;

use pairlink_core::{MemoryConnector, MemoryListener, MemoryPeer, RelayChannel, RelayConfig};
use pairlink_webrtc::{CallConfig, CallEngine, CallRole, MemoryStateStore};
use std::sync::Arc;
use std::time::Duration;

pub use media::FakeMediaSource;
pub use transport::{FakeTransport, FakeTransportFactory};

pub const ROOM_ID: &str = "room-1";
pub const USER_ID: &str = "user-a";
pub const PARTNER_ID: &str = "user-b";

/// A relay channel connected to an in-memory relay
pub struct RelayFixture {
    pub channel: RelayChannel,
    pub peer: MemoryPeer,
    pub connector: MemoryConnector,
    pub listener: MemoryListener,
}

impl RelayFixture {
    /// Connect `identity` and wait until the channel is open
    pub async fn connect(identity: &str) -> Self {
        init_logging();
        let (connector, mut listener) = MemoryConnector::new();
        let channel = RelayChannel::new(RelayConfig::default(), Arc::new(connector.clone()))
            .expect("Failed to create channel");
        channel.connect(identity).expect("Failed to connect");

        let peer = listener.accept().await.expect("No connection");
        channel
            .connected()
            .wait_for(|c| *c)
            .await
            .expect("Channel dropped");

        Self {
            channel,
            peer,
            connector,
            listener,
        }
    }

    /// Next non-heartbeat frame the client sent
    pub async fn next_frame(&mut self) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(60), self.peer.recv_non_ping())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Connection closed")
    }

    /// Every non-heartbeat frame sent so far, without waiting
    pub fn drain_frames(&mut self) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Some(text) = self.peer.try_recv() {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                if value["type"] != "ping" {
                    frames.push(value);
                }
            }
        }
        frames
    }

    /// Frames of `kind` sent so far
    pub fn drain_kind(&mut self, kind: &str) -> Vec<serde_json::Value> {
        self.drain_frames()
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }

    /// Deliver a frame to the client as the relay would
    pub fn deliver(&self, frame: serde_json::Value) {
        assert!(self.peer.send_json(&frame), "Client hung up");
    }
}

/// Engine wired to fakes
pub struct EngineFixture {
    pub engine: CallEngine,
    pub relay: RelayFixture,
    pub transports: Arc<FakeTransportFactory>,
    pub media: Arc<FakeMediaSource>,
    pub store: Arc<MemoryStateStore>,
}

impl EngineFixture {
    pub async fn new(role: CallRole) -> Self {
        Self::with_store(role, Arc::new(MemoryStateStore::new())).await
    }

    pub async fn with_store(role: CallRole, store: Arc<MemoryStateStore>) -> Self {
        Self::with_parts(role, store, Arc::new(FakeMediaSource::new())).await
    }

    pub async fn with_parts(
        role: CallRole,
        store: Arc<MemoryStateStore>,
        media: Arc<FakeMediaSource>,
    ) -> Self {
        let relay = RelayFixture::connect(USER_ID).await;
        let transports = Arc::new(FakeTransportFactory::new());

        let engine = CallEngine::builder(ROOM_ID, USER_ID)
            .role(role)
            .config(CallConfig::default())
            .channel(relay.channel.clone())
            .transport_factory(transports.clone())
            .media_source(media.clone())
            .state_store(store.clone())
            .build()
            .expect("Failed to build engine");

        settle().await;

        Self {
            engine,
            relay,
            transports,
            media,
            store,
        }
    }

    /// The transport of the current session
    pub fn transport(&self) -> Arc<FakeTransport> {
        self.transports.last().expect("No transport created")
    }
}

/// Route engine logs to the test output (`RUST_LOG` overrides)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks run without advancing the clock meaningfully
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
