//! Client to hub control frames.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A subscription change requested by a client.
///
/// Wire form: `{"action": "subscribe", "channel": "seatUpdate:42"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

impl ControlMessage {
    pub fn subscribe(channel: impl Into<String>) -> Self {
        ControlMessage::Subscribe {
            channel: channel.into(),
        }
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        ControlMessage::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Parse a text frame.
    ///
    /// Unknown actions, missing or non-string channels and empty channel
    /// names are all reported as [`Error::InvalidMessage`].
    pub fn parse(text: &str) -> Result<Self, Error> {
        let message: ControlMessage = serde_json::from_str(text)
            .map_err(|e| Error::InvalidMessage(format!("control frame: {e}")))?;

        if message.channel().is_empty() {
            return Err(Error::InvalidMessage("control frame: empty channel".to_string()));
        }

        Ok(message)
    }

    pub fn channel(&self) -> &str {
        match self {
            ControlMessage::Subscribe { channel } | ControlMessage::Unsubscribe { channel } => channel,
        }
    }

    /// Encode the frame as JSON text.
    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl FromStr for ControlMessage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe() {
        let msg = ControlMessage::parse(r#"{"action":"subscribe","channel":"seatUpdate:42"}"#).unwrap();
        assert_eq!(msg, ControlMessage::subscribe("seatUpdate:42"));
        assert_eq!(msg.channel(), "seatUpdate:42");
    }

    #[test]
    fn test_parse_unsubscribe_ignores_extra_fields() {
        let msg: ControlMessage = r#"{"channel":"bookingStatus:7","action":"unsubscribe","id":3}"#
            .parse()
            .unwrap();
        assert_eq!(msg, ControlMessage::unsubscribe("bookingStatus:7"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let cases = [
            "not json",
            "[]",
            r#"{"channel":"seatUpdate:42"}"#,
            r#"{"action":"ping"}"#,
            r#"{"action":"publish","channel":"seatUpdate:42"}"#,
            r#"{"action":"subscribe"}"#,
            r#"{"action":"subscribe","channel":42}"#,
            r#"{"action":"subscribe","channel":""}"#,
            r#"{"action":"SUBSCRIBE","channel":"seatUpdate:42"}"#,
        ];

        for case in cases {
            assert!(
                matches!(ControlMessage::parse(case), Err(Error::InvalidMessage(_))),
                "expected rejection for {case}"
            );
        }
    }

    #[test]
    fn test_encode() {
        let text = ControlMessage::subscribe("priceTick:h1").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["action"], "subscribe");
        assert_eq!(value["channel"], "priceTick:h1");
    }
}
