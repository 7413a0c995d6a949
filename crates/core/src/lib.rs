//! PairLink relay channel
//!
//! Resilient, reconnecting message channel to the PairLink relay. Frames are
//! JSON objects tagged by a `type` field; listeners subscribe per type.
//!
//! # Example
//!
//! ```no_run
//! use pairlink_core::{RelayChannel, RelayConfig};
//! use serde_json::json;
//!
//! # async fn example() -> pairlink_core::Result<()> {
//! let channel = RelayChannel::websocket(RelayConfig::from_env())?;
//! channel.connect("user-1")?;
//!
//! channel.on("call_ended", |frame| {
//!     println!("call ended by {:?}", frame.from());
//! });
//!
//! // Queued until the connection opens
//! channel.send("call_ended", json!({ "roomId": "room-1" }));
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod transport;

pub use backoff::{Backoff, ReconnectPolicy};
pub use channel::{ChannelState, RelayChannel};
pub use config::RelayConfig;
pub use error::{Error, Result};
pub use memory::{ConnectMode, MemoryConnector, MemoryListener, MemoryPeer};
pub use protocol::{message_types, Frame, SignalMessage};
pub use queue::{OutboundQueue, OverflowPolicy, QueuePolicy};
pub use registry::{HandlerId, HandlerRegistry};
pub use transport::{RelayConnector, RelayLink, WebSocketConnector};
