//! Local and remote media tracks

use crate::Result;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone audio
    Audio,
    /// Camera video
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

impl TrackKind {
    /// Codec used when sending this kind
    pub fn codec_capability(&self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }
}

/// A locally captured track.
///
/// Clones share the enabled/stopped flags, so the copy held by the peer
/// transport and the copy in the engine's local stream always agree.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<LocalTrackInner>,
}

struct LocalTrackInner {
    kind: TrackKind,
    rtp: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    /// Create a sample-fed track of `kind` belonging to `stream_id`
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let rtp = Arc::new(TrackLocalStaticSample::new(
            kind.codec_capability(),
            format!("{}-{}", kind, uuid::Uuid::new_v4()),
            stream_id.to_string(),
        ));
        Self::from_rtp(kind, rtp)
    }

    /// Wrap an existing sample track
    pub fn from_rtp(kind: TrackKind, rtp: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            inner: Arc::new(LocalTrackInner {
                kind,
                rtp,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Track id
    pub fn id(&self) -> &str {
        webrtc::track::track_local::TrackLocal::id(self.inner.rtp.as_ref())
    }

    /// Audio or video
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    /// Whether samples are currently transmitted
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable transmission
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Release the track; it never transmits again
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            debug!(track_id = self.id(), kind = %self.kind(), "Local track stopped");
        }
    }

    /// Whether the track was stopped
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Underlying RTP track for attaching to a peer connection
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.inner.rtp)
    }

    /// Write one encoded sample.
    ///
    /// Returns `Ok(false)` when the sample was dropped because the track is
    /// disabled or stopped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }
        self.inner.rtp.write_sample(sample).await.map_err(|e| {
            crate::Error::MediaTrackError(format!("Failed to write {} sample: {}", self.kind(), e))
        })?;
        Ok(true)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Local capture: at most one audio and one video track
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    /// Create a stream from its tracks
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Stream id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// The audio track, if captured
    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    /// The video track, if captured
    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// Stop every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// A track received from the partner
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    kind: TrackKind,
    stream_id: String,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    /// Describe a remote track without an RTP source
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            stream_id: stream_id.into(),
            track: None,
        }
    }

    /// Wrap a track delivered by the WebRTC stack
    pub fn from_rtp(kind: TrackKind, track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            kind,
            stream_id: track.stream_id(),
            track: Some(track),
        }
    }

    /// Track id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Audio or video
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Id of the remote stream this track belongs to
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// RTP source for reading packets, when backed by the WebRTC stack
    pub fn rtp_track(&self) -> Option<Arc<TrackRemote>> {
        self.track.clone()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// Tracks received from the partner, accumulated as they arrive
#[derive(Debug, Clone, Default)]
pub struct RemoteStream {
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Add a track; a track id already present is ignored
    pub fn add_track(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    /// All tracks
    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    /// First audio track
    pub fn audio_track(&self) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Audio)
    }

    /// First video track
    pub fn video_track(&self) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }

    /// True when no track has arrived
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
