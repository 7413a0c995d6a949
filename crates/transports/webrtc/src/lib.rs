//! PairLink call negotiation
//!
//! Two-party WebRTC call negotiation over the PairLink relay channel.
//!
//! - [`engine::CallEngine`] negotiates one call (offer/answer, candidates,
//!   retries, teardown) and exposes its state as a [`engine::CallSnapshot`].
//! - [`room::RoomCoordinator`] owns the room lifecycle around the engine.
//! - [`peer`] abstracts the peer connection; [`peer::RtcPeerTransport`] is
//!   the `webrtc`-crate implementation.
//!
//! # Example
//!
//! ```no_run
//! use pairlink_core::{RelayChannel, RelayConfig};
//! use pairlink_webrtc::{CallEngine, CallRole, RoomConfig, RoomCoordinator};
//!
//! # async fn example() -> pairlink_webrtc::Result<()> {
//! let channel = RelayChannel::websocket(RelayConfig::from_env())?;
//! channel.connect("user-1")?;
//!
//! let engine = CallEngine::builder("room-1", "user-1")
//!     .role(CallRole::Caller)
//!     .channel(channel.clone())
//!     .build()?;
//!
//! let room = RoomCoordinator::new(engine.clone(), channel, RoomConfig::default())?;
//! room.start();
//!
//! let mut status = room.subscribe();
//! while status.changed().await.is_ok() {
//!     if status.borrow().complete {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod peer;
pub mod room;
pub mod store;

pub use config::{CallConfig, RoomConfig, TurnServerConfig};
pub use engine::{CallEngine, CallEngineBuilder, CallPhase, CallRole, CallSnapshot};
pub use error::{Error, Result};
pub use media::{
    LocalStream, LocalTrack, MediaConstraints, MediaSource, RemoteStream, RemoteTrack,
    SampleMediaSource, TrackKind,
};
pub use peer::{
    PeerConnectionState, PeerTransport, PeerTransportFactory, RtcPeerTransport,
    RtcTransportFactory, SignalingState, TransportEvent,
};
pub use room::{EndReason, RoomCoordinator, RoomStatus};
pub use store::{FileStateStore, MediaStatePersistence, MediaStateStore, MemoryStateStore};
