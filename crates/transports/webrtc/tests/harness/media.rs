//! Scripted local capture

use async_trait::async_trait;
use pairlink_webrtc::{Error, LocalStream, LocalTrack, MediaConstraints, MediaSource, Result, TrackKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Media source producing an audio + video pair, optionally slow or failing
#[derive(Default)]
pub struct FakeMediaSource {
    acquisitions: AtomicUsize,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    last: Mutex<Option<LocalStream>>,
}

impl FakeMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that denies access, like a user refusing the permission prompt
    pub fn failing() -> Self {
        let source = Self::default();
        source.fail.store(true, Ordering::SeqCst);
        source
    }

    /// Source that takes `delay` to produce a stream
    pub fn slow(delay: Duration) -> Self {
        let source = Self::default();
        *source.delay.lock() = Some(delay);
        source
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// The most recently produced stream
    pub fn last_stream(&self) -> Option<LocalStream> {
        self.last.lock().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<LocalStream> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::MediaAcquisition("Permission denied".to_string()));
        }

        let stream_id = "fake-stream";
        let stream = LocalStream::new(
            stream_id,
            vec![
                LocalTrack::new(TrackKind::Audio, stream_id),
                LocalTrack::new(TrackKind::Video, stream_id),
            ],
        );
        *self.last.lock() = Some(stream.clone());
        Ok(stream)
    }
}
