//! WebRTC-backed peer transport

use super::{
    PeerConnectionState, PeerTransport, PeerTransportFactory, SignalingState, TransportEvent,
    TransportEventSender,
};
use crate::config::CallConfig;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::{Error, Result};
use async_trait::async_trait;
use pairlink_core::protocol::{IceCandidate, SdpType, SessionDescription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Creates [`RtcPeerTransport`]s
#[derive(Debug, Clone, Default)]
pub struct RtcTransportFactory;

impl RtcTransportFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerTransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        config: &CallConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = RtcPeerTransport::new(config, events).await?;
        Ok(Arc::new(transport))
    }
}

/// Peer transport wrapping a `webrtc` RTCPeerConnection
pub struct RtcPeerTransport {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Attached local tracks
    senders: Mutex<Vec<LocalTrack>>,

    /// Receive-only transceivers were added for missing local kinds
    receivers_added: AtomicBool,
}

impl RtcPeerTransport {
    /// Create a peer connection with the configured ICE servers
    #[instrument(skip_all)]
    pub async fn new(config: &CallConfig, events: TransportEventSender) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        info!(connection_id = %connection_id, "Creating peer connection");

        // Opus for audio, VP8/VP9/H.264 for video
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        Self::register_callbacks(&peer_connection, &connection_id, events);

        Ok(Self {
            connection_id,
            peer_connection,
            senders: Mutex::new(Vec::new()),
            receivers_added: AtomicBool::new(false),
        })
    }

    fn register_callbacks(
        peer_connection: &RTCPeerConnection,
        connection_id: &str,
        events: TransportEventSender,
    ) {
        let track_events = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        _ => return,
                    };
                    info!(track_id = %track.id(), %kind, "Remote track received");
                    let _ = events.send(TransportEvent::RemoteTrack(RemoteTrack::from_rtp(
                        kind, track,
                    )));
                })
            },
        ));

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let state_connection_id = connection_id.to_string();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let events = events.clone();
                let connection_id = state_connection_id.clone();
                Box::pin(async move {
                    let state = PeerConnectionState::from(state);
                    debug!(connection_id = %connection_id, ?state, "Peer connection state changed");
                    let _ = events.send(TransportEvent::ConnectionState(state));
                })
            },
        ));
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Receive media of kinds we are not sending ourselves
    async fn ensure_receivers(&self) -> Result<()> {
        if self.receivers_added.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sending: Vec<TrackKind> = self.senders.lock().iter().map(LocalTrack::kind).collect();
        for (kind, codec_type) in [
            (TrackKind::Audio, RTPCodecType::Audio),
            (TrackKind::Video, RTPCodecType::Video),
        ] {
            if sending.contains(&kind) {
                continue;
            }
            self.peer_connection
                .add_transceiver_from_kind(
                    codec_type,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    Error::PeerConnectionError(format!(
                        "Failed to add {} receiver: {}",
                        kind, e
                    ))
                })?;
            debug!(%kind, "Added receive-only transceiver");
        }
        Ok(())
    }

    async fn local_description(&self, what: &str) -> Result<String> {
        self.peer_connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| Error::SdpError(format!("No local description after setting {}", what)))
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        info!(kind = %track.kind(), track_id = track.id(), "Adding local track");

        let sender = self
            .peer_connection
            .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind(), e))
            })?;

        // RTCP has to be drained for the interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().push(track.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_receivers().await?;

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let sdp = self.local_description("offer").await?;
        debug!(connection_id = %self.connection_id, "Created SDP offer");
        Ok(SessionDescription::offer(sdp))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        if offer.sdp_type != SdpType::Offer {
            return Err(Error::SdpError(format!(
                "Expected an offer, got {:?}",
                offer.sdp_type
            )));
        }

        let offer = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let sdp = self.local_description("answer").await?;
        debug!(connection_id = %self.connection_id, "Created SDP answer");
        Ok(SessionDescription::answer(sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        if answer.sdp_type != SdpType::Answer {
            return Err(Error::SdpError(format!(
                "Expected an answer, got {:?}",
                answer.sdp_type
            )));
        }

        let answer = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    fn signaling_state(&self) -> SignalingState {
        self.peer_connection.signaling_state().into()
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.peer_connection.connection_state().into()
    }

    async fn set_sender_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.senders.lock().iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    async fn close(&self) -> Result<()> {
        info!(connection_id = %self.connection_id, "Closing peer connection");

        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_peer_transport_creation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = RtcPeerTransport::new(&CallConfig::default(), tx).await.unwrap();

        assert_eq!(transport.signaling_state(), SignalingState::Stable);
        assert_eq!(transport.connection_state(), PeerConnectionState::New);
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_transports() {
        let (caller_tx, _caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, _callee_rx) = mpsc::unbounded_channel();
        let caller = RtcPeerTransport::new(&CallConfig::default(), caller_tx).await.unwrap();
        let callee = RtcPeerTransport::new(&CallConfig::default(), callee_tx).await.unwrap();

        caller
            .add_track(&LocalTrack::new(TrackKind::Audio, "stream-caller"))
            .await
            .unwrap();

        let offer = caller.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert_eq!(caller.signaling_state(), SignalingState::HaveLocalOffer);

        let answer = callee.accept_offer(offer).await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        assert_eq!(callee.signaling_state(), SignalingState::Stable);

        caller.apply_answer(answer).await.unwrap();
        assert_eq!(caller.signaling_state(), SignalingState::Stable);

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_offer_rejects_answer_type() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = RtcPeerTransport::new(&CallConfig::default(), tx).await.unwrap();

        let result = transport
            .accept_offer(SessionDescription::answer("v=0"))
            .await;
        assert!(matches!(result, Err(Error::SdpError(_))));
    }
}
