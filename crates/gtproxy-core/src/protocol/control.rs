//! Extension text lane (JSON control messages).
//!
//! `interests` is kept as an untyped JSON value so the broker owns the
//! interest schema and can reject it with its own error.

use serde::{Deserialize, Serialize};

/// Supported control protocol version.
pub const CONTROL_VERSION: u8 = 1;

/// Control message (Text frame). Field name of the tag is `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ControlMessage {
    /// ext → broker: first message on a new connection.
    Handshake { v: u8, name: String },
    /// broker → ext: declare your interests.
    CapabilityRequest,
    /// ext → broker: the interest list.
    CapabilityResponse { interests: serde_json::Value },
    /// broker → ext: registration complete, packets may flow.
    Connected,
    /// Either side: orderly shutdown.
    Disconnect,
    /// broker → ext: a request was rejected.
    Error { code: String, msg: String },
}

impl ControlMessage {
    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        ControlMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Only strings, integers and JSON values: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"type":"disconnect"}"#))
    }
}
