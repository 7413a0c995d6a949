//! Relay wire protocol
//!
//! Every frame on the relay is a JSON object with a string `type` field; the
//! remaining fields are the payload. Generic traffic is carried as [`Frame`],
//! the call signaling vocabulary as [`SignalMessage`].

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message type strings used on the relay
pub mod message_types {
    /// SDP offer from the caller
    pub const WEBRTC_OFFER: &str = "webrtc_offer";
    /// SDP answer from the callee
    pub const WEBRTC_ANSWER: &str = "webrtc_answer";
    /// Trickled network candidate
    pub const ICE_CANDIDATE: &str = "ice_candidate";
    /// Mute / camera-off broadcast
    pub const MEDIA_STATE_CHANGED: &str = "media_state_changed";
    /// Participant ended the call
    pub const CALL_ENDED: &str = "call_ended";
    /// Relay noticed the partner's connection dropped
    pub const PARTNER_DISCONNECTED: &str = "partner_disconnected";
    /// Heartbeat request
    pub const PING: &str = "ping";
    /// Heartbeat reply, consumed by the channel
    pub const PONG: &str = "pong";
    /// Relay greeting, consumed by the channel
    pub const CONNECTED: &str = "connected";
}

/// A single relay frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Value of the `type` field
    pub kind: String,
    /// All other top-level fields
    pub fields: Map<String, Value>,
}

impl Frame {
    /// Build a frame from a type and a payload.
    ///
    /// Object payloads are spread into the frame, `null` yields an empty
    /// payload and any other value is carried under `data`. A `type` key in
    /// the payload never overrides `kind`.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        let mut fields = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        fields.remove("type");

        Self {
            kind: kind.into(),
            fields,
        }
    }

    /// Parse a text frame received from the relay
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidFrame("frame is not a JSON object".to_string()));
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(_) => {
                return Err(Error::InvalidFrame("`type` is not a string".to_string()));
            }
            None => return Err(Error::InvalidFrame("missing `type`".to_string())),
        };

        Ok(Self { kind, fields })
    }

    /// Serialize as `{"type": kind, ...fields}`
    pub fn to_json(&self) -> Result<String> {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    /// String field accessor
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Sender identity stamped by the relay, if any
    pub fn from(&self) -> Option<&str> {
        self.get_str("from")
    }

    /// Decode the payload into a typed message body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// Decode into the signaling vocabulary
    pub fn to_message(&self) -> Result<SignalMessage> {
        let mut object = self.fields.clone();
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

impl TryFrom<&SignalMessage> for Frame {
    type Error = Error;

    fn try_from(message: &SignalMessage) -> Result<Self> {
        let value = serde_json::to_value(message)?;
        let kind = message.kind().to_string();
        Ok(Frame::new(kind, value))
    }
}

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Rollback
    Rollback,
}

/// Session description as exchanged over the relay: `{type, sdp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network candidate in browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Body of `webrtc_offer` / `webrtc_answer`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptionMessage {
    /// Routing target (the room id) on outbound frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Sender identity on inbound frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// The description; inbound frames without one are discarded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
}

/// Body of `ice_candidate`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateMessage {
    /// Routing target (the room id) on outbound frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Sender identity on inbound frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// The candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

/// Body of `media_state_changed`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStateMessage {
    /// Room the state belongs to
    #[serde(default)]
    pub room_id: String,
    /// Sender identity on inbound frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Microphone muted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
    /// Camera off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_video_off: Option<bool>,
}

/// Body of `call_ended` / `partner_disconnected`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEventMessage {
    /// Room the event belongs to
    #[serde(default)]
    pub room_id: String,
    /// Sender identity on inbound frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Signaling vocabulary spoken on the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// `webrtc_offer`
    WebrtcOffer(SessionDescriptionMessage),
    /// `webrtc_answer`
    WebrtcAnswer(SessionDescriptionMessage),
    /// `ice_candidate`
    IceCandidate(IceCandidateMessage),
    /// `media_state_changed`
    MediaStateChanged(MediaStateMessage),
    /// `call_ended`
    CallEnded(RoomEventMessage),
    /// `partner_disconnected`
    PartnerDisconnected(RoomEventMessage),
    /// `ping`
    Ping,
    /// `pong`
    Pong,
    /// `connected`
    Connected,
}

impl SignalMessage {
    /// Wire type string of this message
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::WebrtcOffer(_) => message_types::WEBRTC_OFFER,
            SignalMessage::WebrtcAnswer(_) => message_types::WEBRTC_ANSWER,
            SignalMessage::IceCandidate(_) => message_types::ICE_CANDIDATE,
            SignalMessage::MediaStateChanged(_) => message_types::MEDIA_STATE_CHANGED,
            SignalMessage::CallEnded(_) => message_types::CALL_ENDED,
            SignalMessage::PartnerDisconnected(_) => message_types::PARTNER_DISCONNECTED,
            SignalMessage::Ping => message_types::PING,
            SignalMessage::Pong => message_types::PONG,
            SignalMessage::Connected => message_types::CONNECTED,
        }
    }

    /// Sender identity, for messages that carry one
    pub fn from(&self) -> Option<&str> {
        match self {
            SignalMessage::WebrtcOffer(m) | SignalMessage::WebrtcAnswer(m) => m.from.as_deref(),
            SignalMessage::IceCandidate(m) => m.from.as_deref(),
            SignalMessage::MediaStateChanged(m) => m.from.as_deref(),
            SignalMessage::CallEnded(m) | SignalMessage::PartnerDisconnected(m) => {
                m.from.as_deref()
            }
            SignalMessage::Ping | SignalMessage::Pong | SignalMessage::Connected => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_parse() {
        let frame = Frame::parse(r#"{"type":"webrtc_offer","from":"u2","sdp":{"type":"offer","sdp":"v=0"}}"#)
            .unwrap();
        assert_eq!(frame.kind, "webrtc_offer");
        assert_eq!(frame.from(), Some("u2"));
        assert!(frame.fields.get("type").is_none());
    }

    #[test]
    fn test_frame_parse_rejects_malformed() {
        assert!(Frame::parse("not json").is_err());
        assert!(Frame::parse("[1,2,3]").is_err());
        assert!(Frame::parse(r#"{"from":"u2"}"#).is_err());
        assert!(matches!(
            Frame::parse(r#"{"type":42}"#),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_frame_type_is_authoritative() {
        let frame = Frame::new("call_ended", json!({"type": "spoofed", "roomId": "r1"}));
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "call_ended");
        assert_eq!(value["roomId"], "r1");
    }

    #[test]
    fn test_frame_non_object_payload() {
        let frame = Frame::new("note", json!("hello"));
        assert_eq!(frame.get_str("data"), Some("hello"));

        let frame = Frame::new("ping", Value::Null);
        assert_eq!(frame.to_json().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_signal_message_wire_names() {
        let offer = SignalMessage::WebrtcOffer(SessionDescriptionMessage {
            to: Some("room-1".to_string()),
            from: None,
            sdp: Some(SessionDescription::offer("v=0")),
        });
        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(
            value,
            json!({"type": "webrtc_offer", "to": "room-1", "sdp": {"type": "offer", "sdp": "v=0"}})
        );

        let state = SignalMessage::MediaStateChanged(MediaStateMessage {
            room_id: "room-1".to_string(),
            from: None,
            is_muted: Some(true),
            is_video_off: Some(false),
        });
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            json!({"type": "media_state_changed", "roomId": "room-1", "isMuted": true, "isVideoOff": false})
        );

        assert_eq!(serde_json::to_value(SignalMessage::Ping).unwrap(), json!({"type": "ping"}));
    }

    #[test]
    fn test_candidate_field_names() {
        let frame = Frame::parse(
            r#"{"type":"ice_candidate","from":"u2","candidate":{"candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        let message: IceCandidateMessage = frame.decode().unwrap();
        let candidate = message.candidate.unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment, None);
    }

    #[test]
    fn test_frame_to_message() {
        let frame = Frame::parse(r#"{"type":"partner_disconnected","roomId":"r1","from":"u2"}"#).unwrap();
        let message = frame.to_message().unwrap();
        assert_eq!(message.kind(), message_types::PARTNER_DISCONNECTED);
        assert_eq!(message.from(), Some("u2"));

        let frame = Frame::try_from(&message).unwrap();
        assert_eq!(frame.kind, "partner_disconnected");
        assert_eq!(frame.get_str("roomId"), Some("r1"));
    }
}
