use crate::error::CallError;
use crate::peer::types::{IceCandidate, IceServer, PeerId};
use serde::{Deserialize, Serialize};

/// Heartbeat сервера; возвращается эхом как есть
pub const HEARTBEAT: &str = "\n";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HelloPayload {
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceServersPayload {
    pub ice_servers: Vec<IceServer>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SdpPayload {
    pub id: PeerId,
    pub sdp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidatePayload {
    pub id: PeerId,
    pub candidate: IceCandidate,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ByePayload {
    pub id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Сообщения сигнального канала: `{"type": ..., "payload": {...}}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SignalingMessage {
    Hello(HelloPayload),
    IceServers(IceServersPayload),
    Offer(SdpPayload),
    Answer(SdpPayload),
    Candidate(CandidatePayload),
    Bye(ByePayload),
}

impl SignalingMessage {
    pub const KNOWN_TYPES: [&'static str; 6] =
        ["hello", "iceServers", "offer", "answer", "candidate", "bye"];

    pub fn offer(id: PeerId, sdp: impl Into<String>) -> Self {
        Self::Offer(SdpPayload { id, sdp: sdp.into() })
    }

    pub fn answer(id: PeerId, sdp: impl Into<String>) -> Self {
        Self::Answer(SdpPayload { id, sdp: sdp.into() })
    }

    pub fn candidate(id: PeerId, candidate: IceCandidate) -> Self {
        Self::Candidate(CandidatePayload { id, candidate })
    }

    pub fn bye(id: PeerId) -> Self {
        Self::Bye(ByePayload { id, error: None })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::IceServers(_) => "iceServers",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::Bye(_) => "bye",
        }
    }

    /// Пир, к которому относится сообщение
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            Self::Offer(p) | Self::Answer(p) => Some(&p.id),
            Self::Candidate(p) => Some(&p.id),
            Self::Bye(p) => Some(&p.id),
            Self::Hello(_) | Self::IceServers(_) => None,
        }
    }
}

/// Один текстовый кадр сигнального канала
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Heartbeat,
    Message(SignalingMessage),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Frame, CallError> {
        if text == HEARTBEAT {
            return Ok(Frame::Heartbeat);
        }

        // тип проверяем отдельно, чтобы отличать неизвестный тип от битого payload
        let envelope: Envelope = serde_json::from_str(text)?;
        if !SignalingMessage::KNOWN_TYPES.contains(&envelope.kind.as_str()) {
            return Err(CallError::UnknownMessageType(envelope.kind));
        }
        Ok(Frame::Message(serde_json::from_str(text)?))
    }

    pub fn encode(&self) -> Result<String, CallError> {
        match self {
            Frame::Heartbeat => Ok(HEARTBEAT.to_owned()),
            Frame::Message(message) => Ok(serde_json::to_string(message)?),
        }
    }
}

impl From<SignalingMessage> for Frame {
    fn from(message: SignalingMessage) -> Self {
        Frame::Message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat() {
        assert_eq!(Frame::parse("\n").unwrap(), Frame::Heartbeat);
        assert_eq!(Frame::Heartbeat.encode().unwrap(), "\n");
    }

    #[test]
    fn test_parse_offer() {
        let text = json!({"type": "offer", "payload": {"id": "peer-1", "sdp": "v=0\r\n"}}).to_string();
        match Frame::parse(&text).unwrap() {
            Frame::Message(SignalingMessage::Offer(p)) => {
                assert_eq!(p.id, PeerId::from("peer-1"));
                assert_eq!(p.sdp, "v=0\r\n");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ice_servers_and_bye() {
        let text = json!({
            "type": "iceServers",
            "payload": {"iceServers": [{"urls": "stun:stun.example.org"}, {"urls": ["turn:t.example.org"], "username": "u", "credential": "c"}]}
        })
        .to_string();
        let Frame::Message(SignalingMessage::IceServers(p)) = Frame::parse(&text).unwrap() else {
            panic!("expected iceServers");
        };
        assert_eq!(p.ice_servers.len(), 2);

        let text = json!({"type": "bye", "payload": {"id": "p", "error": "busy"}}).to_string();
        let Frame::Message(SignalingMessage::Bye(p)) = Frame::parse(&text).unwrap() else {
            panic!("expected bye");
        };
        assert_eq!(p.error.as_deref(), Some("busy"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let text = json!({"type": "renegotiate", "payload": {}}).to_string();
        assert!(matches!(
            Frame::parse(&text),
            Err(CallError::UnknownMessageType(t)) if t == "renegotiate"
        ));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(matches!(Frame::parse("{not json"), Err(CallError::MalformedMessage(_))));
        let text = json!({"type": "offer", "payload": {"id": "p"}}).to_string();
        assert!(matches!(Frame::parse(&text), Err(CallError::MalformedMessage(_))));
    }

    #[test]
    fn test_outbound_shapes() {
        let bye = Frame::from(SignalingMessage::bye("p".into())).encode().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&bye).unwrap(),
            json!({"type": "bye", "payload": {"id": "p"}})
        );

        let mut candidate = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host");
        candidate.sdp_mid = Some("0".into());
        candidate.sdp_mline_index = Some(0);
        let text = Frame::from(SignalingMessage::candidate("p".into(), candidate))
            .encode()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["payload"]["candidate"]["sdpMLineIndex"], 0);
        assert_eq!(SignalingMessage::KNOWN_TYPES.len(), 6);
    }
}
