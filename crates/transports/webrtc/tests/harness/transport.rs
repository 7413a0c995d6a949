//! Scripted peer transports
//!
//! [`FakeTransport`] keeps just enough offer/answer state to exercise the
//! engine's race handling and lets tests drive connection state and
//! transport callbacks by hand.

use async_trait::async_trait;
use pairlink_core::protocol::{IceCandidate, SdpType, SessionDescription};
use pairlink_webrtc::peer::TransportEventSender;
use pairlink_webrtc::{
    CallConfig, Error, LocalTrack, PeerConnectionState, PeerTransport, PeerTransportFactory,
    RemoteTrack, Result, SignalingState, TrackKind, TransportEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Factory recording every transport it creates
#[derive(Default)]
pub struct FakeTransportFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make creation fail until turned off again
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next creation take `delay`
    pub fn delay_next(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of transports created so far
    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recently created transport
    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl PeerTransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        _config: &CallConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>> {
        let delay = self.delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::PeerConnectionError(
                "Failed to create peer connection: no ICE agent".to_string(),
            ));
        }
        let transport = Arc::new(FakeTransport::new(events));
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

/// Peer transport that records negotiation instead of performing it
pub struct FakeTransport {
    events: TransportEventSender,
    signaling: Mutex<SignalingState>,
    connection: Mutex<PeerConnectionState>,
    offers_created: AtomicUsize,
    offers_accepted: AtomicUsize,
    answers_applied: AtomicUsize,
    candidates: Mutex<Vec<IceCandidate>>,
    tracks: Mutex<Vec<TrackKind>>,
    senders: Mutex<HashMap<TrackKind, bool>>,
    closed: AtomicBool,
}

impl FakeTransport {
    fn new(events: TransportEventSender) -> Self {
        Self {
            events,
            signaling: Mutex::new(SignalingState::Stable),
            connection: Mutex::new(PeerConnectionState::New),
            offers_created: AtomicUsize::new(0),
            offers_accepted: AtomicUsize::new(0),
            answers_applied: AtomicUsize::new(0),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            senders: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn offers_created(&self) -> usize {
        self.offers_created.load(Ordering::SeqCst)
    }

    pub fn offers_accepted(&self) -> usize {
        self.offers_accepted.load(Ordering::SeqCst)
    }

    pub fn answers_applied(&self) -> usize {
        self.answers_applied.load(Ordering::SeqCst)
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.tracks.lock().clone()
    }

    pub fn sender_enabled(&self, kind: TrackKind) -> Option<bool> {
        self.senders.lock().get(&kind).copied()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Move to `state` and report it like a real transport would
    pub fn set_connection_state(&self, state: PeerConnectionState) {
        *self.connection.lock() = state;
        let _ = self.events.send(TransportEvent::ConnectionState(state));
    }

    /// Report a gathered local candidate
    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(TransportEvent::LocalCandidate(candidate));
    }

    /// Report the partner's media
    pub fn emit_remote_track(&self, kind: TrackKind) {
        let track = RemoteTrack::new(format!("remote-{}", kind), kind, "remote-stream");
        let _ = self.events.send(TransportEvent::RemoteTrack(track));
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.tracks.lock().push(track.kind());
        self.senders.lock().insert(track.kind(), track.is_enabled());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers_created.fetch_add(1, Ordering::SeqCst) + 1;
        *self.signaling.lock() = SignalingState::HaveLocalOffer;
        Ok(SessionDescription::offer(format!("v=0 fake-offer-{}", n)))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        if offer.sdp_type != SdpType::Offer {
            return Err(Error::SdpError("expected an offer".to_string()));
        }
        self.offers_accepted.fetch_add(1, Ordering::SeqCst);
        *self.signaling.lock() = SignalingState::Stable;
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        if answer.sdp_type != SdpType::Answer {
            return Err(Error::SdpError("expected an answer".to_string()));
        }
        let mut signaling = self.signaling.lock();
        if *signaling != SignalingState::HaveLocalOffer {
            return Err(Error::SdpError(format!(
                "answer in signaling state {:?}",
                *signaling
            )));
        }
        *signaling = SignalingState::Stable;
        self.answers_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        *self.signaling.lock()
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.connection.lock()
    }

    async fn set_sender_enabled(&self, kind: TrackKind, enabled: bool) {
        self.senders.lock().insert(kind, enabled);
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        *self.signaling.lock() = SignalingState::Closed;
        *self.connection.lock() = PeerConnectionState::Closed;
        Ok(())
    }
}
