//! Peer transport abstraction
//!
//! The engine drives negotiation through [`PeerTransport`]; the WebRTC-backed
//! implementation lives in [`rtc`]. Transport callbacks (remote tracks, local
//! candidates, connection state) are delivered as [`TransportEvent`]s on a
//! channel handed to the factory.

pub mod rtc;

pub use rtc::{RtcPeerTransport, RtcTransportFactory};

use crate::config::CallConfig;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::Result;
use async_trait::async_trait;
use pairlink_core::protocol::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

/// Connection state of the peer transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    /// Created, nothing negotiated yet
    #[default]
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity lost for good
    Failed,
    /// Closed locally
    Closed,
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                PeerConnectionState::New
            }
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        }
    }
}

/// Offer/answer state of the peer transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    /// No negotiation in progress
    #[default]
    Stable,
    /// Local offer applied, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied, answer not yet created
    HaveRemoteOffer,
    /// Local provisional answer applied
    HaveLocalPranswer,
    /// Remote provisional answer applied
    HaveRemotePranswer,
    /// Transport closed
    Closed,
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::Unspecified | RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
        }
    }
}

/// Callback raised by a peer transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The partner's media arrived
    RemoteTrack(RemoteTrack),
    /// A local network candidate was gathered
    LocalCandidate(IceCandidate),
    /// Connection state changed
    ConnectionState(PeerConnectionState),
}

/// Where a transport delivers its events
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// One peer-to-peer media session with the partner
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach a local track for sending
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    /// Create an offer and apply it locally
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a remote offer, then create and apply the answer
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    /// Apply the partner's answer
    async fn apply_answer(&self, answer: SessionDescription) -> Result<()>;

    /// Add a remote network candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Current offer/answer state
    fn signaling_state(&self) -> SignalingState;

    /// Current connection state
    fn connection_state(&self) -> PeerConnectionState;

    /// Enable or disable the sender carrying `kind`
    async fn set_sender_enabled(&self, kind: TrackKind, enabled: bool);

    /// Tear the session down
    async fn close(&self) -> Result<()>;
}

/// Creates peer transports for the engine
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    /// Create a transport that reports to `events`
    async fn create(
        &self,
        config: &CallConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>>;
}
