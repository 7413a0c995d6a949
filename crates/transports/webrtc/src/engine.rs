//! Peer negotiation engine
//!
//! [`CallEngine`] runs one two-party call over the relay. The caller sends
//! offers (after a grace period, retried a bounded number of times), the
//! callee answers, both trickle candidates. Inbound signaling is processed
//! in arrival order by a single task; transport callbacks are processed by a
//! per-session task. A session generation counter invalidates retries and
//! callbacks that outlive `end_call`.
//!
//! Phases: `Idle -> AcquiringMedia -> Connecting -> Connected`, with
//! `Disconnected` / `Failed` mirrored from the transport and `Ended` after
//! `end_call`.

use crate::config::CallConfig;
use crate::media::{LocalStream, MediaSource, RemoteStream, SampleMediaSource, TrackKind};
use crate::peer::{
    PeerConnectionState, PeerTransport, PeerTransportFactory, RtcTransportFactory,
    SignalingState, TransportEvent,
};
use crate::store::{MediaStatePersistence, MediaStateStore, MediaToggleState, MemoryStateStore};
use crate::{Error, Result};
use pairlink_core::protocol::{
    message_types, Frame, IceCandidateMessage, MediaStateMessage, SessionDescriptionMessage,
    SignalMessage,
};
use pairlink_core::{HandlerId, RelayChannel};
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Which side initiates negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallRole {
    /// Sends the offer
    #[default]
    Caller,
    /// Waits for the offer and answers
    Callee,
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallRole::Caller => write!(f, "caller"),
            CallRole::Callee => write!(f, "callee"),
        }
    }
}

impl FromStr for CallRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "caller" => Ok(CallRole::Caller),
            "callee" => Ok(CallRole::Callee),
            other => Err(Error::InvalidConfig(format!(
                "role must be caller or callee, got {}",
                other
            ))),
        }
    }
}

/// Lifecycle phase of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallPhase {
    /// Nothing started
    #[default]
    Idle,
    /// Waiting for local capture
    AcquiringMedia,
    /// Transport exists, negotiation or ICE in progress
    Connecting,
    /// Media flowing
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity lost for good
    Failed,
    /// Torn down by `end_call`
    Ended,
}

/// Observable state of the engine
#[derive(Debug, Clone, Default)]
pub struct CallSnapshot {
    /// Lifecycle phase
    pub phase: CallPhase,
    /// Local capture, if acquired
    pub local_stream: Option<LocalStream>,
    /// Partner media received so far
    pub remote_stream: Option<RemoteStream>,
    /// Partner media is (or was last seen) flowing
    pub is_call_active: bool,
    /// Local microphone muted
    pub is_muted: bool,
    /// Local camera off
    pub is_video_off: bool,
    /// Partner reported a muted microphone
    pub remote_audio_muted: bool,
    /// Partner reported the camera off
    pub remote_video_off: bool,
    /// Transport connection state
    pub connection_state: PeerConnectionState,
    /// Why local capture is unavailable, if it is
    pub media_error: Option<String>,
}

/// Builder for [`CallEngine`]
pub struct CallEngineBuilder {
    room_id: String,
    user_id: String,
    role: CallRole,
    config: CallConfig,
    channel: Option<RelayChannel>,
    transports: Option<Arc<dyn PeerTransportFactory>>,
    media: Option<Arc<dyn MediaSource>>,
    store: Option<Arc<dyn MediaStateStore>>,
}

impl CallEngineBuilder {
    /// Negotiation side (default: caller)
    pub fn role(mut self, role: CallRole) -> Self {
        self.role = role;
        self
    }

    /// Negotiation settings
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Relay channel carrying the signaling (required)
    pub fn channel(mut self, channel: RelayChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Peer transport factory (default: WebRTC)
    pub fn transport_factory(mut self, factory: Arc<dyn PeerTransportFactory>) -> Self {
        self.transports = Some(factory);
        self
    }

    /// Local capture provider (default: sample-fed tracks)
    pub fn media_source(mut self, media: Arc<dyn MediaSource>) -> Self {
        self.media = Some(media);
        self
    }

    /// Toggle-state store (default: in memory)
    pub fn state_store(mut self, store: Arc<dyn MediaStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the engine and start following the channel.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<CallEngine> {
        if self.room_id.is_empty() {
            return Err(Error::InvalidConfig("room_id must not be empty".to_string()));
        }
        if self.user_id.is_empty() {
            return Err(Error::InvalidConfig("user_id must not be empty".to_string()));
        }
        self.config.validate()?;

        let channel = self
            .channel
            .ok_or_else(|| Error::InvalidConfig("a relay channel is required".to_string()))?;
        let transports = self
            .transports
            .unwrap_or_else(|| Arc::new(RtcTransportFactory::new()));
        let media = self
            .media
            .unwrap_or_else(|| Arc::new(SampleMediaSource::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()));

        let persistence = MediaStatePersistence::new(store, &self.room_id, &self.user_id);
        let saved = persistence.read();
        let (snapshot, _) = watch::channel(CallSnapshot {
            is_muted: saved.is_muted,
            is_video_off: saved.is_video_off,
            ..Default::default()
        });
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(EngineInner {
            room_id: self.room_id,
            user_id: self.user_id,
            role: self.role,
            config: self.config,
            channel,
            transports,
            media,
            persistence,
            started: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            session: Mutex::new(Session::default()),
            snapshot,
            signal_tx,
            listeners: parking_lot::Mutex::new(Vec::new()),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        let signal_task = tokio::spawn(Arc::clone(&inner).run_signals(signal_rx));
        let follow_task = tokio::spawn(Arc::clone(&inner).follow_channel());
        inner.tasks.lock().extend([signal_task, follow_task]);

        info!(
            room_id = %inner.room_id,
            user_id = %inner.user_id,
            role = %inner.role,
            "Call engine created"
        );

        Ok(CallEngine { inner })
    }
}

/// Two-party call negotiation engine.
///
/// Cheap to clone; clones drive the same call.
#[derive(Clone)]
pub struct CallEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    room_id: String,
    user_id: String,
    role: CallRole,
    config: CallConfig,
    channel: RelayChannel,
    transports: Arc<dyn PeerTransportFactory>,
    media: Arc<dyn MediaSource>,
    persistence: MediaStatePersistence,
    /// Guards against concurrent or repeated `start_call`
    started: AtomicBool,
    /// Bumped by `end_call`
    generation: AtomicU64,
    session: Mutex<Session>,
    snapshot: watch::Sender<CallSnapshot>,
    signal_tx: mpsc::UnboundedSender<InboundSignal>,
    listeners: parking_lot::Mutex<Vec<(&'static str, HandlerId)>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct Session {
    local: Option<LocalStream>,
    transport: Option<Arc<dyn PeerTransport>>,
    offer_task: Option<JoinHandle<()>>,
    event_task: Option<JoinHandle<()>>,
}

enum InboundSignal {
    Offer(SessionDescriptionMessage),
    Answer(SessionDescriptionMessage),
    Candidate(IceCandidateMessage),
    MediaState(MediaStateMessage),
}

impl CallEngine {
    /// Start building an engine for `user_id` in `room_id`
    pub fn builder(room_id: impl Into<String>, user_id: impl Into<String>) -> CallEngineBuilder {
        CallEngineBuilder {
            room_id: room_id.into(),
            user_id: user_id.into(),
            role: CallRole::default(),
            config: CallConfig::default(),
            channel: None,
            transports: None,
            media: None,
            store: None,
        }
    }

    /// Room this engine negotiates in
    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    /// Local identity
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Negotiation side
    pub fn role(&self) -> CallRole {
        self.inner.role
    }

    /// Current observable state
    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Watch observable state
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Whether a call has been started and not ended
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Start the call. Repeated or concurrent calls are no-ops.
    ///
    /// Missing local media is not an error: the call continues receive-only
    /// and `media_error` is set. On failure the started guard is cleared so
    /// the call can be started again.
    pub async fn start_call(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            debug!(room_id = %inner.room_id, "Call already started");
            return Ok(());
        }

        let generation = inner.generation.load(Ordering::SeqCst);
        info!(room_id = %inner.room_id, role = %inner.role, "Starting call");
        inner.snapshot.send_modify(|s| s.phase = CallPhase::AcquiringMedia);

        let local = inner.acquire_local_stream().await;

        if inner.generation.load(Ordering::SeqCst) != generation {
            if let Some(stream) = local {
                stream.stop_all();
            }
            debug!(room_id = %inner.room_id, "Call ended while acquiring media");
            return Ok(());
        }

        if let Some(stream) = &local {
            let mut session = inner.session.lock().await;
            if !inner.is_current(generation) {
                drop(session);
                stream.stop_all();
                debug!(room_id = %inner.room_id, "Call ended before media was installed");
                return Ok(());
            }
            if let Some(previous) = session.local.replace(stream.clone()) {
                previous.stop_all();
            }
            let saved = inner.persistence.read();
            inner.snapshot.send_modify(|s| {
                s.local_stream = Some(stream.clone());
                s.is_muted = saved.is_muted;
                s.is_video_off = saved.is_video_off;
                s.media_error = None;
            });
        }

        let result = Arc::clone(inner).begin_negotiation(generation).await;
        if let Err(e) = &result {
            error!(room_id = %inner.room_id, "Error starting call: {}", e);
            inner.started.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Toggle the microphone. Returns the new muted flag, or `None` without
    /// a local audio track.
    pub async fn toggle_mute(&self) -> Option<bool> {
        let enabled = self.inner.toggle_track(TrackKind::Audio).await?;
        let muted = !enabled;
        let video_off = self.inner.snapshot.borrow().is_video_off;

        self.inner.snapshot.send_modify(|s| s.is_muted = muted);
        self.inner.publish_media_state(MediaToggleState {
            is_muted: muted,
            is_video_off: video_off,
        });
        Some(muted)
    }

    /// Toggle the camera. Returns the new video-off flag, or `None` without
    /// a local video track.
    pub async fn toggle_video(&self) -> Option<bool> {
        let enabled = self.inner.toggle_track(TrackKind::Video).await?;
        let video_off = !enabled;
        let muted = self.inner.snapshot.borrow().is_muted;

        self.inner.snapshot.send_modify(|s| s.is_video_off = video_off);
        self.inner.publish_media_state(MediaToggleState {
            is_muted: muted,
            is_video_off: video_off,
        });
        Some(video_off)
    }

    /// End the call: stop capture, close the transport, cancel retries,
    /// clear streams and forget the persisted toggle state.
    pub async fn end_call(&self) {
        self.inner.end_call().await;
    }

    /// End the call and stop following the channel
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.inner.detach_listeners();
        self.inner.end_call().await;
    }
}

impl EngineInner {
    fn is_self(&self, from: Option<&str>) -> bool {
        from == Some(self.user_id.as_str())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn acquire_local_stream(&self) -> Option<LocalStream> {
        match self.media.acquire(&self.config.media).await {
            Ok(stream) => {
                let saved = self.persistence.read();
                if let Some(audio) = stream.audio_track() {
                    audio.set_enabled(!saved.is_muted);
                }
                if let Some(video) = stream.video_track() {
                    video.set_enabled(!saved.is_video_off);
                }
                info!(tracks = stream.tracks().len(), "Local media acquired");
                Some(stream)
            }
            Err(e) => {
                warn!("Local media unavailable, continuing receive-only: {}", e);
                let reason = e.to_string();
                self.snapshot.send_modify(|s| s.media_error = Some(reason));
                None
            }
        }
    }

    async fn begin_negotiation(self: Arc<Self>, generation: u64) -> Result<()> {
        if self.ensure_transport(generation).await?.is_none() {
            debug!(room_id = %self.room_id, "Call ended before the transport was created");
            return Ok(());
        }

        match self.role {
            CallRole::Caller => {
                let task = tokio::spawn(Arc::clone(&self).run_offer_attempts(generation));
                let mut session = self.session.lock().await;
                if !self.is_current(generation) {
                    task.abort();
                    return Ok(());
                }
                if let Some(previous) = session.offer_task.replace(task) {
                    previous.abort();
                }
            }
            CallRole::Callee => {
                info!(room_id = %self.room_id, "Peer transport ready, waiting for offer");
            }
        }
        Ok(())
    }

    /// Get or lazily create the session's transport. Returns `None` once
    /// `generation` has been ended.
    async fn ensure_transport(
        self: &Arc<Self>,
        generation: u64,
    ) -> Result<Option<Arc<dyn PeerTransport>>> {
        let mut session = self.session.lock().await;
        if !self.is_current(generation) {
            return Ok(None);
        }
        if let Some(transport) = &session.transport {
            return Ok(Some(Arc::clone(transport)));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.transports.create(&self.config, events_tx).await?;

        if let Some(local) = &session.local {
            for track in local.tracks() {
                if let Err(e) = transport.add_track(track).await {
                    warn!(kind = %track.kind(), "Failed to attach local track: {}", e);
                }
            }
        }

        session.event_task = Some(tokio::spawn(
            Arc::clone(self).run_transport_events(generation, events_rx),
        ));
        session.transport = Some(Arc::clone(&transport));
        self.snapshot.send_modify(|s| {
            if matches!(
                s.phase,
                CallPhase::Idle | CallPhase::AcquiringMedia | CallPhase::Ended
            ) {
                s.phase = CallPhase::Connecting;
            }
        });
        drop(session);

        info!(room_id = %self.room_id, "Peer transport created");

        Ok(Some(transport))
    }

    async fn current_transport(&self) -> Option<Arc<dyn PeerTransport>> {
        self.session.lock().await.transport.clone()
    }

    async fn run_transport_events(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                break;
            }

            match event {
                TransportEvent::RemoteTrack(track) => {
                    info!(kind = %track.kind(), track_id = track.id(), "Remote track received");
                    self.snapshot.send_modify(|s| {
                        s.remote_stream
                            .get_or_insert_with(RemoteStream::default)
                            .add_track(track);
                        s.is_call_active = true;
                    });
                }
                TransportEvent::LocalCandidate(candidate) => {
                    let message = SignalMessage::IceCandidate(IceCandidateMessage {
                        to: Some(self.room_id.clone()),
                        from: None,
                        candidate: Some(candidate),
                    });
                    if !self.channel.send_message(&message) {
                        debug!("Relay not open, candidate queued");
                    }
                }
                TransportEvent::ConnectionState(state) => {
                    info!(room_id = %self.room_id, ?state, "Connection state changed");
                    self.snapshot.send_modify(|s| {
                        s.connection_state = state;
                        match state {
                            PeerConnectionState::Connecting => s.phase = CallPhase::Connecting,
                            PeerConnectionState::Connected => {
                                s.phase = CallPhase::Connected;
                                s.is_call_active = true;
                            }
                            PeerConnectionState::Disconnected => {
                                s.phase = CallPhase::Disconnected;
                                s.is_call_active = false;
                            }
                            PeerConnectionState::Failed => {
                                s.phase = CallPhase::Failed;
                                s.is_call_active = false;
                            }
                            PeerConnectionState::New | PeerConnectionState::Closed => {}
                        }
                    });
                }
            }
        }
    }

    /// Caller side: offer after the grace period, re-offer while the
    /// transport has not started connecting
    async fn run_offer_attempts(self: Arc<Self>, generation: u64) {
        let max_attempts = self.config.max_offer_attempts;
        sleep(self.config.offer_grace()).await;

        for attempt in 1..=max_attempts {
            if !self.is_current(generation) {
                return;
            }

            let Some(transport) = self.current_transport().await else {
                return;
            };
            let state = transport.connection_state();
            if matches!(
                state,
                PeerConnectionState::Connecting | PeerConnectionState::Connected
            ) {
                debug!(?state, "Peer connection progressing, no further offers");
                return;
            }

            info!(attempt, max_attempts, "Sending offer");
            if let Err(e) = self.send_offer(transport.as_ref()).await {
                warn!(attempt, "Failed to send offer: {}", e);
            }

            sleep(self.config.offer_retry_interval()).await;
        }

        if let Some(transport) = self.current_transport().await {
            let state = transport.connection_state();
            if !matches!(
                state,
                PeerConnectionState::Connecting | PeerConnectionState::Connected
            ) {
                warn!(attempts = max_attempts, ?state, "Offer attempts exhausted");
            }
        }
    }

    async fn send_offer(&self, transport: &dyn PeerTransport) -> Result<()> {
        let offer = transport.create_offer().await?;
        let message = SignalMessage::WebrtcOffer(SessionDescriptionMessage {
            to: Some(self.room_id.clone()),
            from: None,
            sdp: Some(offer),
        });
        if !self.channel.send_message(&message) {
            debug!("Relay not open, offer queued");
        }
        Ok(())
    }

    async fn run_signals(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<InboundSignal>) {
        while let Some(signal) = signals.recv().await {
            let (kind, result) = match signal {
                InboundSignal::Offer(message) => {
                    (message_types::WEBRTC_OFFER, self.handle_offer(message).await)
                }
                InboundSignal::Answer(message) => {
                    (message_types::WEBRTC_ANSWER, self.handle_answer(message).await)
                }
                InboundSignal::Candidate(message) => {
                    (message_types::ICE_CANDIDATE, self.handle_candidate(message).await)
                }
                InboundSignal::MediaState(message) => {
                    self.handle_media_state(message);
                    (message_types::MEDIA_STATE_CHANGED, Ok(()))
                }
            };

            if let Err(e) = result {
                error!(kind, room_id = %self.room_id, "Error handling signaling message: {}", e);
            }
        }
    }

    async fn handle_offer(self: &Arc<Self>, message: SessionDescriptionMessage) -> Result<()> {
        if self.is_self(message.from.as_deref()) {
            debug!("Ignoring own offer");
            return Ok(());
        }
        let Some(offer) = message.sdp else {
            warn!("Offer without SDP, discarding");
            return Ok(());
        };

        info!(from = ?message.from, "Received offer");
        let generation = self.generation.load(Ordering::SeqCst);
        let Some(transport) = self.ensure_transport(generation).await? else {
            debug!("Call ended while answering, discarding offer");
            return Ok(());
        };
        let answer = transport.accept_offer(offer).await?;

        let reply = SignalMessage::WebrtcAnswer(SessionDescriptionMessage {
            to: Some(self.room_id.clone()),
            from: None,
            sdp: Some(answer),
        });
        if !self.channel.send_message(&reply) {
            debug!("Relay not open, answer queued");
        }
        info!("Answer sent");
        Ok(())
    }

    async fn handle_answer(&self, message: SessionDescriptionMessage) -> Result<()> {
        if self.is_self(message.from.as_deref()) {
            debug!("Ignoring own answer");
            return Ok(());
        }
        let Some(answer) = message.sdp else {
            warn!("Answer without SDP, discarding");
            return Ok(());
        };
        let Some(transport) = self.current_transport().await else {
            debug!("No peer transport for answer, discarding");
            return Ok(());
        };

        let state = transport.signaling_state();
        if state != SignalingState::HaveLocalOffer {
            debug!(?state, "Answer outside have-local-offer, discarding");
            return Ok(());
        }

        transport.apply_answer(answer).await?;
        info!(from = ?message.from, "Remote answer applied");
        Ok(())
    }

    async fn handle_candidate(&self, message: IceCandidateMessage) -> Result<()> {
        if self.is_self(message.from.as_deref()) {
            return Ok(());
        }
        let Some(candidate) = message.candidate else {
            debug!("Candidate frame without candidate, discarding");
            return Ok(());
        };
        let Some(transport) = self.current_transport().await else {
            debug!("No peer transport for candidate, discarding");
            return Ok(());
        };

        transport.add_ice_candidate(candidate).await
    }

    fn handle_media_state(&self, message: MediaStateMessage) {
        if message.room_id != self.room_id || self.is_self(message.from.as_deref()) {
            return;
        }

        debug!(
            is_muted = ?message.is_muted,
            is_video_off = ?message.is_video_off,
            "Remote media state changed"
        );
        self.snapshot.send_modify(|s| {
            if let Some(muted) = message.is_muted {
                s.remote_audio_muted = muted;
            }
            if let Some(video_off) = message.is_video_off {
                s.remote_video_off = video_off;
            }
        });
    }

    /// Flip the local track of `kind` and its sender. Returns the new
    /// enabled flag.
    async fn toggle_track(&self, kind: TrackKind) -> Option<bool> {
        let session = self.session.lock().await;
        let Some(local) = &session.local else {
            debug!(%kind, "No local stream to toggle");
            return None;
        };
        let track = match kind {
            TrackKind::Audio => local.audio_track(),
            TrackKind::Video => local.video_track(),
        };
        let Some(track) = track else {
            debug!(%kind, "No local track to toggle");
            return None;
        };

        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        if let Some(transport) = &session.transport {
            transport.set_sender_enabled(kind, enabled).await;
        }
        debug!(%kind, enabled, "Local track toggled");
        Some(enabled)
    }

    fn publish_media_state(&self, state: MediaToggleState) {
        self.persistence.write(state);
        let message = SignalMessage::MediaStateChanged(MediaStateMessage {
            room_id: self.room_id.clone(),
            from: None,
            is_muted: Some(state.is_muted),
            is_video_off: Some(state.is_video_off),
        });
        self.channel.send_message(&message);
    }

    async fn end_call(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let (local, transport) = {
            let mut session = self.session.lock().await;
            if let Some(task) = session.offer_task.take() {
                task.abort();
            }
            if let Some(task) = session.event_task.take() {
                task.abort();
            }
            (session.local.take(), session.transport.take())
        };

        if let Some(local) = &local {
            local.stop_all();
        }
        let had_transport = transport.is_some();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!("Failed to close peer transport: {}", e);
            }
        }

        self.snapshot.send_modify(|s| {
            s.local_stream = None;
            s.remote_stream = None;
            s.is_call_active = false;
            s.phase = CallPhase::Ended;
            if had_transport {
                s.connection_state = PeerConnectionState::Closed;
            }
        });
        self.started.store(false, Ordering::SeqCst);
        self.persistence.clear();

        info!(room_id = %self.room_id, "Call ended");
    }

    /// Attach signaling listeners while the relay is connected, detach them
    /// while it is not
    async fn follow_channel(self: Arc<Self>) {
        let mut connected = self.channel.connected();
        loop {
            if *connected.borrow_and_update() {
                self.attach_listeners();
            } else {
                self.detach_listeners();
            }
            if connected.changed().await.is_err() {
                break;
            }
        }
    }

    fn attach_listeners(&self) {
        let mut listeners = self.listeners.lock();
        if !listeners.is_empty() {
            return;
        }

        listeners.push(self.forward(message_types::WEBRTC_OFFER, InboundSignal::Offer));
        listeners.push(self.forward(message_types::WEBRTC_ANSWER, InboundSignal::Answer));
        listeners.push(self.forward(message_types::ICE_CANDIDATE, InboundSignal::Candidate));
        listeners.push(self.forward(message_types::MEDIA_STATE_CHANGED, InboundSignal::MediaState));
        debug!(room_id = %self.room_id, "Signaling listeners attached");
    }

    fn detach_listeners(&self) {
        let listeners: Vec<(&'static str, HandlerId)> = self.listeners.lock().drain(..).collect();
        if listeners.is_empty() {
            return;
        }
        for (kind, id) in listeners {
            self.channel.off(kind, Some(id));
        }
        debug!(room_id = %self.room_id, "Signaling listeners detached");
    }

    /// Register a listener that decodes `kind` frames and queues them for
    /// the signal task
    fn forward<T, F>(&self, kind: &'static str, wrap: F) -> (&'static str, HandlerId)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> InboundSignal + Send + Sync + 'static,
    {
        let signals = self.signal_tx.clone();
        let id = self.channel.on(kind, move |frame: &Frame| match frame.decode::<T>() {
            Ok(message) => {
                let _ = signals.send(wrap(message));
            }
            Err(e) => debug!(kind, "Discarding malformed signaling frame: {}", e),
        });
        (kind, id)
    }
}
