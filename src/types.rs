//! Wire types shared by the relay transport and the negotiation layer

use serde::{Deserialize, Serialize};

/// Kind of a session description in the two-step handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// Negotiation payload produced and consumed by the peer-connection engine.
///
/// Opaque to the signaling layer except for branching on `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

impl SessionDescription {
    pub fn new(sdp: impl Into<String>, kind: SdpKind) -> Self {
        Self {
            sdp: sdp.into(),
            kind,
        }
    }
}

/// Relay wire convention, selected per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    /// Action-tagged envelopes: register / send / receive
    ActionEnvelope,
    /// Maps keyed by endpoint ID; delivery is elicited by polling
    IdMap,
}

/// One message unit exchanged with an action-envelope relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Envelope {
    Register {
        id: String,
    },
    Send {
        from: String,
        target: String,
        data: String,
    },
    Receive {
        from: String,
        data: String,
    },
}

impl Envelope {
    pub fn action(&self) -> &'static str {
        match self {
            Envelope::Register { .. } => "register",
            Envelope::Send { .. } => "send",
            Envelope::Receive { .. } => "receive",
        }
    }
}

/// An inbound negotiation payload surfaced by the relay link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: String,
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdp_kind_serializes_lowercase() {
        let desc = SessionDescription::new("v=0", SdpKind::Offer);
        let json = serde_json::to_string(&desc).unwrap();
        assert_eq!(json, r#"{"sdp":"v=0","type":"offer"}"#);

        let back: SessionDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope::Send {
            from: "me".to_string(),
            target: "you".to_string(),
            data: "payload".to_string(),
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.action(), "send");
    }

    #[test]
    fn envelope_register_wire_shape() {
        let json = serde_json::to_string(&Envelope::Register {
            id: "me".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"action":"register","id":"me"}"#);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result = serde_json::from_str::<Envelope>(r#"{"action":"ack","id":"me"}"#);
        assert!(result.is_err());
    }
}
