//! Wire envelope and message-type discriminants.
//!
//! Every frame on the socket is a JSON object `{ "type": <int>, "payload": <json> }`.
//! Client and server discriminants live in disjoint ranges (1.. and 50..) so a
//! misrouted frame is never mistaken for a valid one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Message types a client may send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientMessageType {
    Connect,
    Attack,
    ChangePokemon,
    Surrender,
    Status,
    Match,
}

impl ClientMessageType {
    pub fn code(self) -> i64 {
        match self {
            Self::Connect => 1,
            Self::Attack => 2,
            Self::ChangePokemon => 3,
            Self::Surrender => 4,
            Self::Status => 5,
            Self::Match => 6,
        }
    }
}

/// Raised for a discriminant outside [`ClientMessageType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type: {0}")]
pub struct UnknownMessageType(pub i64);

impl TryFrom<i64> for ClientMessageType {
    type Error = UnknownMessageType;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Connect),
            2 => Ok(Self::Attack),
            3 => Ok(Self::ChangePokemon),
            4 => Ok(Self::Surrender),
            5 => Ok(Self::Status),
            6 => Ok(Self::Match),
            other => Err(UnknownMessageType(other)),
        }
    }
}

/// Message types the server emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerMessageType {
    AcceptConnection,
    Attack,
    ChangePokemon,
    Status,
    BattleEnded,
    Disconnect,
    Error,
    MatchFound,
    QueueJoined,
}

impl ServerMessageType {
    pub fn code(self) -> i64 {
        match self {
            Self::AcceptConnection => 50,
            Self::Attack => 51,
            Self::ChangePokemon => 52,
            Self::Status => 53,
            Self::BattleEnded => 54,
            Self::Disconnect => 55,
            Self::Error => 56,
            Self::MatchFound => 57,
            Self::QueueJoined => 58,
        }
    }
}

/// One frame on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Build a server frame. Payload types in this crate always serialize;
    /// a failure is logged and sent as a null payload.
    pub fn server(kind: ServerMessageType, payload: impl Serialize) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            tracing::error!(error = %e, message_type = kind.code(), "failed to encode payload");
            serde_json::Value::Null
        });
        Self {
            message_type: kind.code(),
            payload,
        }
    }

    pub fn client(kind: ClientMessageType, payload: impl Serialize) -> Self {
        Self {
            message_type: kind.code(),
            payload: serde_json::to_value(payload).unwrap_or_default(),
        }
    }

    pub fn client_type(&self) -> Result<ClientMessageType, UnknownMessageType> {
        ClientMessageType::try_from(self.message_type)
    }

    pub fn is(&self, kind: ServerMessageType) -> bool {
        self.message_type == kind.code()
    }

    /// Decode the payload into a typed request.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_codes_match_try_from() {
        for kind in [
            ClientMessageType::Connect,
            ClientMessageType::Attack,
            ClientMessageType::ChangePokemon,
            ClientMessageType::Surrender,
            ClientMessageType::Status,
            ClientMessageType::Match,
        ] {
            assert_eq!(ClientMessageType::try_from(kind.code()), Ok(kind));
        }
    }

    #[test]
    fn unknown_client_code_rejected() {
        assert_eq!(ClientMessageType::try_from(0), Err(UnknownMessageType(0)));
        assert_eq!(ClientMessageType::try_from(51), Err(UnknownMessageType(51)));
    }

    #[test]
    fn server_codes() {
        assert_eq!(ServerMessageType::AcceptConnection.code(), 50);
        assert_eq!(ServerMessageType::Error.code(), 56);
        assert_eq!(ServerMessageType::QueueJoined.code(), 58);
    }

    #[test]
    fn envelope_wire_shape() {
        let env = Envelope::server(ServerMessageType::Status, json!({"status": "connected"}));
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], 53);
        assert_eq!(value["payload"]["status"], "connected");
    }

    #[test]
    fn envelope_without_payload_parses() {
        let env = Envelope::from_json(r#"{"type": 5}"#).unwrap();
        assert_eq!(env.client_type(), Ok(ClientMessageType::Status));
        assert!(env.payload.is_null());
    }

    #[test]
    fn envelope_missing_type_fails() {
        assert!(Envelope::from_json(r#"{"payload": {}}"#).is_err());
        assert!(Envelope::from_json("not json").is_err());
    }
}
