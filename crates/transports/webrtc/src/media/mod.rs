//! Local capture and remote media
//!
//! Capture is abstracted behind [`MediaSource`]; the engine only needs a
//! [`LocalStream`] whose tracks can be enabled, disabled and stopped.

pub mod track;

pub use track::{LocalStream, LocalTrack, RemoteStream, RemoteTrack, TrackKind};

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Capture preferences passed to a [`MediaSource`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    /// Audio capture, `None` for no audio
    pub audio: Option<AudioConstraints>,
    /// Video capture, `None` for no video
    pub video: Option<VideoConstraints>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: Some(AudioConstraints::default()),
            video: Some(VideoConstraints::default()),
        }
    }
}

/// Audio capture preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConstraints {
    /// Echo cancellation (default: true)
    pub echo_cancellation: bool,
    /// Noise suppression (default: true)
    pub noise_suppression: bool,
    /// Automatic gain control (default: true)
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Video capture preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConstraints {
    /// Preferred width in pixels (default: 1280)
    pub ideal_width: u32,
    /// Preferred height in pixels (default: 720)
    pub ideal_height: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

/// Provider of local capture
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a local stream honoring `constraints`
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream>;
}

/// Media source producing sample-fed Opus/VP8 tracks.
///
/// The application writes encoded samples into the returned tracks with
/// [`LocalTrack::write_sample`].
///
/// ```
/// use pairlink_webrtc::{MediaConstraints, MediaSource, SampleMediaSource};
///
/// # tokio_test::block_on(async {
/// let stream = SampleMediaSource::new()
///     .acquire(&MediaConstraints::default())
///     .await
///     .unwrap();
/// assert!(stream.audio_track().is_some());
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct SampleMediaSource;

impl SampleMediaSource {
    /// Create a source
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream> {
        let stream_id = format!("stream-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::with_capacity(2);

        if constraints.audio.is_some() {
            tracks.push(LocalTrack::new(TrackKind::Audio, &stream_id));
        }
        if let Some(video) = &constraints.video {
            info!(
                width = video.ideal_width,
                height = video.ideal_height,
                "Creating sample video track"
            );
            tracks.push(LocalTrack::new(TrackKind::Video, &stream_id));
        }

        if tracks.is_empty() {
            return Err(Error::MediaAcquisition(
                "neither audio nor video requested".to_string(),
            ));
        }

        Ok(LocalStream::new(stream_id, tracks))
    }
}
