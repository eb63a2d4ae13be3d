//! Wire codec for the consoled line protocol.
//!
//! Protocol: one JSON object per frame, terminated by CR LF.
//!
//! Every frame carries a numeric `version` (MAJOR + MINOR/100) and a string
//! `identifier` selecting the message kind. The codec is pure and stateless;
//! frame splitting is the router's concern, but every encoded frame ends with
//! the terminator.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::Transience;

pub const PROTOCOL_MAJOR: u64 = 0;
pub const PROTOCOL_MINOR: u64 = 51;

/// TCP port consoled listens on.
pub const DEFAULT_PORT: u16 = 29168;

/// End-of-frame sequence between frames on the wire.
pub const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// The local protocol version as transmitted: MAJOR + MINOR/100.
pub fn protocol_version() -> f64 {
    PROTOCOL_MAJOR as f64 + PROTOCOL_MINOR as f64 / 100.0
}

// =============================================================================
// Messages
// =============================================================================

/// A decoded frame: the transmitted version plus the typed message.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub version: f64,
    pub message: Message,
}

/// Protocol message, keyed by the wire `identifier`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "identifier", rename_all = "kebab-case")]
pub enum Message {
    /// Request server/stream status.
    Status,
    /// Subscribe to a stream with the given mode string.
    Open { stream: String, mode: String },
    /// Drop a subscription.
    Close { stream: String },
    /// Inject data into a stream.
    Write { stream: String, data: String },
    /// Server liveness probe.
    PingRequest,
    /// Autonomous reply to a ping; never reaches the session.
    PingResponse,
    /// Raw stream bytes from the server.
    Data { stream: String, data: String },
    /// Acknowledgement; fields depend on `command`.
    Ok(OkBody),
    /// Server-side failure.
    Fail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        error: String,
    },
}

impl Message {
    pub fn identifier(&self) -> &'static str {
        match self {
            Message::Status => "status",
            Message::Open { .. } => "open",
            Message::Close { .. } => "close",
            Message::Write { .. } => "write",
            Message::PingRequest => "ping-request",
            Message::PingResponse => "ping-response",
            Message::Data { .. } => "data",
            Message::Ok(_) => "ok",
            Message::Fail { .. } => "fail",
        }
    }

    fn known_identifier(raw: &str) -> bool {
        matches!(
            raw,
            "status"
                | "open"
                | "close"
                | "write"
                | "ping-request"
                | "ping-response"
                | "data"
                | "ok"
                | "fail"
        )
    }
}

/// Body of an `ok` acknowledgement.
///
/// `open`/`close` carry `stream` (and `mode` for `open`); a stream-specific
/// `status` carries `listener_count` and `writer`; a general `status` carries
/// `streams`, `uptime`, and `client_count`; `write` carries nothing extra.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OkBody {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streams: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<String>,
}

// =============================================================================
// Mode - stream permission set
// =============================================================================

/// Permissions held on a subscription: any subset of {read, write}.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mode {
    pub read: bool,
    pub write: bool,
}

impl Mode {
    pub const READ: Mode = Mode {
        read: true,
        write: false,
    };
    pub const WRITE: Mode = Mode {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Mode = Mode {
        read: true,
        write: true,
    };

    /// Parse a server mode string on whitespace, comma, and hyphen
    /// boundaries. Unknown tokens are ignored.
    pub fn parse(raw: &str) -> Mode {
        let mut mode = Mode::default();
        for token in raw.split(|c: char| c.is_whitespace() || c == ',' || c == '-') {
            match token.to_ascii_lowercase().as_str() {
                "read" => mode.read = true,
                "write" => mode.write = true,
                _ => {}
            }
        }
        mode
    }

    /// True when every permission in `requested` is held.
    pub fn contains(self, requested: Mode) -> bool {
        (!requested.read || self.read) && (!requested.write || self.write)
    }

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.read, self.write) {
            (true, true) => f.write_str("read write"),
            (true, false) => f.write_str("read"),
            (false, true) => f.write_str("write"),
            (false, false) => Ok(()),
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame missing numeric version field")]
    MissingVersion,
    #[error("frame missing identifier field")]
    MissingIdentifier,
    #[error("unsupported protocol version {version} (local major {local})")]
    VersionUnsupported { version: f64, local: u64 },
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
}

impl ProtoError {
    /// Protocol errors are never cured by retrying the same frame.
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}

/// Serialize a message to a wire frame: compact JSON with the local protocol
/// version injected, terminated by CR LF.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtoError> {
    let mut value = serde_json::to_value(message).map_err(ProtoError::Encode)?;
    let Value::Object(map) = &mut value else {
        return Err(ProtoError::NotAnObject);
    };
    let version = serde_json::Number::from_f64(protocol_version()).ok_or_else(|| {
        ProtoError::VersionUnsupported {
            version: protocol_version(),
            local: PROTOCOL_MAJOR,
        }
    })?;
    map.insert("version".to_string(), Value::Number(version));
    let mut bytes = serde_json::to_vec(&value).map_err(ProtoError::Encode)?;
    bytes.extend_from_slice(FRAME_TERMINATOR);
    Ok(bytes)
}

/// Parse a single frame body (terminator already stripped) into a JSON value.
pub fn decode_value(bytes: &[u8]) -> Result<Value, ProtoError> {
    let value: Value = serde_json::from_slice(bytes).map_err(ProtoError::Decode)?;
    if !value.is_object() {
        return Err(ProtoError::NotAnObject);
    }
    Ok(value)
}

/// Check the protocol header fields: a numeric `version` whose integer part
/// is at most the local major, and a string `identifier`. Returns the
/// transmitted version.
///
/// A version sent as a dotted string is tolerated when it parses as a number.
pub fn validate(value: &Value) -> Result<f64, ProtoError> {
    let version = match value.get("version") {
        Some(Value::Number(number)) => number.as_f64().ok_or(ProtoError::MissingVersion)?,
        Some(Value::String(raw)) => raw
            .parse::<f64>()
            .map_err(|_| ProtoError::MissingVersion)?,
        _ => return Err(ProtoError::MissingVersion),
    };
    if version.trunc() as u64 > PROTOCOL_MAJOR {
        return Err(ProtoError::VersionUnsupported {
            version,
            local: PROTOCOL_MAJOR,
        });
    }
    match value.get("identifier") {
        Some(Value::String(_)) => Ok(version),
        _ => Err(ProtoError::MissingIdentifier),
    }
}

/// Decode, validate, and type a single inbound frame body.
pub fn decode_frame(bytes: &[u8]) -> Result<Envelope, ProtoError> {
    let value = decode_value(bytes)?;
    let version = validate(&value)?;
    let identifier = value
        .get("identifier")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !Message::known_identifier(identifier) {
        return Err(ProtoError::UnknownIdentifier(identifier.to_string()));
    }
    let message = serde_json::from_value(value).map_err(ProtoError::Decode)?;
    Ok(Envelope { version, message })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_injects_version_and_terminator() {
        let bytes = encode_frame(&Message::Status).expect("encode");
        assert!(bytes.ends_with(FRAME_TERMINATOR));
        let value: Value =
            serde_json::from_slice(&bytes[..bytes.len() - FRAME_TERMINATOR.len()]).expect("json");
        assert_eq!(value["identifier"], "status");
        assert_eq!(value["version"], json!(0.51));
    }

    #[test]
    fn decode_encode_round_trip_preserves_message_and_version() {
        let messages = [
            Message::Status,
            Message::Open {
                stream: "CON1".into(),
                mode: "read write".into(),
            },
            Message::Close {
                stream: "CON1".into(),
            },
            Message::Write {
                stream: "CON1".into(),
                data: "reboot\r\n".into(),
            },
            Message::PingResponse,
            Message::Data {
                stream: "CON1".into(),
                data: "hello\n".into(),
            },
            Message::Ok(OkBody {
                command: "open".into(),
                stream: Some("CON1".into()),
                mode: Some("read".into()),
                ..OkBody::default()
            }),
            Message::Fail {
                command: Some("open".into()),
                error: "no such stream".into(),
            },
        ];
        for message in messages {
            let bytes = encode_frame(&message).expect("encode");
            let body = &bytes[..bytes.len() - FRAME_TERMINATOR.len()];
            let envelope = decode_frame(body).expect("decode");
            assert_eq!(envelope.message, message);
            assert_eq!(envelope.version, protocol_version());
        }
    }

    #[test]
    fn decode_rejects_non_object() {
        assert!(matches!(
            decode_frame(b"[1,2,3]"),
            Err(ProtoError::NotAnObject)
        ));
        assert!(matches!(
            decode_frame(b"not json"),
            Err(ProtoError::Decode(_))
        ));
    }

    #[test]
    fn validate_requires_version_and_identifier() {
        let missing_version = json!({"identifier": "status"});
        assert!(matches!(
            validate(&missing_version),
            Err(ProtoError::MissingVersion)
        ));

        let missing_identifier = json!({"version": 0.51});
        assert!(matches!(
            validate(&missing_identifier),
            Err(ProtoError::MissingIdentifier)
        ));

        let non_string_identifier = json!({"version": 0.51, "identifier": 7});
        assert!(matches!(
            validate(&non_string_identifier),
            Err(ProtoError::MissingIdentifier)
        ));
    }

    #[test]
    fn validate_rejects_newer_major() {
        let too_new = json!({"version": 1.02, "identifier": "status"});
        assert!(matches!(
            validate(&too_new),
            Err(ProtoError::VersionUnsupported { .. })
        ));

        let same_major = json!({"version": 0.99, "identifier": "status"});
        assert_eq!(validate(&same_major).expect("accepted"), 0.99);
    }

    #[test]
    fn validate_tolerates_dotted_string_version() {
        let stringly = json!({"version": "0.51", "identifier": "status"});
        assert_eq!(validate(&stringly).expect("accepted"), 0.51);

        let garbage = json!({"version": "zero", "identifier": "status"});
        assert!(matches!(
            validate(&garbage),
            Err(ProtoError::MissingVersion)
        ));
    }

    #[test]
    fn decode_flags_unknown_identifier() {
        let frame = br#"{"version":0.51,"identifier":"reboot"}"#;
        match decode_frame(frame) {
            Err(ProtoError::UnknownIdentifier(id)) => assert_eq!(id, "reboot"),
            other => panic!("expected unknown identifier, got {other:?}"),
        }
    }

    #[test]
    fn decode_ok_status_general() {
        let frame = br#"{"version":0.51,"identifier":"ok","command":"status","streams":["A","B"],"uptime":10,"client_count":1}"#;
        let envelope = decode_frame(frame).expect("decode");
        let Message::Ok(body) = envelope.message else {
            panic!("expected ok");
        };
        assert_eq!(body.command, "status");
        assert_eq!(body.streams.as_deref(), Some(&["A".to_string(), "B".to_string()][..]));
        assert_eq!(body.uptime, Some(10));
        assert_eq!(body.client_count, Some(1));
        assert_eq!(body.stream, None);
    }

    #[test]
    fn mode_parses_separators_and_ignores_unknown_tokens() {
        assert_eq!(Mode::parse("read"), Mode::READ);
        assert_eq!(Mode::parse("read write"), Mode::READ_WRITE);
        assert_eq!(Mode::parse("read,write"), Mode::READ_WRITE);
        assert_eq!(Mode::parse("read-write"), Mode::READ_WRITE);
        assert_eq!(Mode::parse("WRITE"), Mode::WRITE);
        assert_eq!(Mode::parse("spectate"), Mode::default());
        assert!(Mode::parse("").is_empty());
    }

    #[test]
    fn mode_containment() {
        assert!(Mode::READ_WRITE.contains(Mode::READ));
        assert!(Mode::READ_WRITE.contains(Mode::WRITE));
        assert!(!Mode::READ.contains(Mode::WRITE));
        assert!(Mode::READ.contains(Mode::default()));
    }

    #[test]
    fn mode_display_renders_wire_form() {
        assert_eq!(Mode::READ.to_string(), "read");
        assert_eq!(Mode::READ_WRITE.to_string(), "read write");
        assert_eq!(Mode::default().to_string(), "");
    }
}
