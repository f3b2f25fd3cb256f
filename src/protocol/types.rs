//! Command and Response Types
//!
//! Frame bodies are JSON objects. Requests:
//!
//! ```text
//! {"command":"get","key":"<k>"}
//! {"command":"set","key":"<k>","value":"<v>"}
//! ```
//!
//! Responses always carry `ok` and the per-key `stat` of the key just touched.
//! A `get` response also carries `key`, `found` and, if found, `value`:
//!
//! ```text
//! {"ok":true,"stat":{"get_count":1,"set_count":0},"key":"a","found":true,"value":"1"}
//! {"ok":true,"stat":{"get_count":0,"set_count":1}}
//! ```
//!
//! Bad requests are answered with the bare body `ERROR`.

use crate::protocol::codec::{encode_frame, ProtocolError};
use crate::storage::Stat;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body sent back for malformed frames and unknown commands.
pub const ERROR_BODY: &[u8] = b"ERROR";

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// `{"command":"get","key":...}`
    Get { key: String },

    /// `{"command":"set","key":...,"value":...}`
    Set { key: String, value: String },

    /// Any other string in the `command` field
    #[serde(other)]
    Unknown,
}

impl Command {
    pub fn get(key: impl Into<String>) -> Self {
        Command::Get { key: key.into() }
    }

    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Command::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Serializes the command into a complete frame.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let body = serde_json::to_vec(self)?;
        Ok(encode_frame(&body))
    }
}

/// A successful response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,

    /// Counters of the key the request touched
    pub stat: Stat,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Response {
    /// Response to a `get`.
    pub fn get(key: impl Into<String>, value: Option<String>, stat: Stat) -> Self {
        Self {
            ok: true,
            stat,
            key: Some(key.into()),
            found: Some(value.is_some()),
            value,
        }
    }

    /// Response to a `set`.
    pub fn set(stat: Stat) -> Self {
        Self {
            ok: true,
            stat,
            key: None,
            found: None,
            value: None,
        }
    }
}

/// What the server writes back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Response(Response),
    /// The literal `ERROR` body
    Error,
}

impl Reply {
    /// Serializes the reply into a complete frame.
    pub fn encode(&self) -> Bytes {
        match self {
            // A struct of strings, bools and integers always serializes.
            Reply::Response(response) => match serde_json::to_vec(response) {
                Ok(body) => encode_frame(&body),
                Err(_) => encode_frame(ERROR_BODY),
            },
            Reply::Error => encode_frame(ERROR_BODY),
        }
    }

    /// Parses a frame body received from the server.
    pub fn from_body(body: &[u8]) -> Result<Self, ProtocolError> {
        if body == ERROR_BODY {
            return Ok(Reply::Error);
        }
        Ok(Reply::Response(serde_json::from_slice(body)?))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Response(response) => match serde_json::to_string(response) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => write!(f, "{:?}", response),
            },
            Reply::Error => write!(f, "ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_string(&Command::set("k", "v")).unwrap();
        assert_eq!(json, r#"{"command":"set","key":"k","value":"v"}"#);

        let json = serde_json::to_string(&Command::get("k")).unwrap();
        assert_eq!(json, r#"{"command":"get","key":"k"}"#);
    }

    #[test]
    fn test_unknown_command() {
        let cmd: Command = serde_json::from_str(r#"{"command":"del","key":"k"}"#).unwrap();
        assert_eq!(cmd, Command::Unknown);
    }

    #[test]
    fn test_schema_violations() {
        assert!(serde_json::from_str::<Command>(r#"{"key":"k"}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"command":"get"}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"command":"set","key":"k"}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"command":"get","key":5}"#).is_err());
    }

    #[test]
    fn test_get_response_shape() {
        let found = Response::get("a", Some("1".to_string()), Stat::new(1, 0));
        assert_eq!(
            serde_json::to_string(&found).unwrap(),
            r#"{"ok":true,"stat":{"get_count":1,"set_count":0},"key":"a","found":true,"value":"1"}"#
        );

        let missing = Response::get("c", None, Stat::new(1, 0));
        assert_eq!(
            serde_json::to_string(&missing).unwrap(),
            r#"{"ok":true,"stat":{"get_count":1,"set_count":0},"key":"c","found":false}"#
        );
    }

    #[test]
    fn test_set_response_shape() {
        let response = Response::set(Stat::new(0, 1));
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"ok":true,"stat":{"get_count":0,"set_count":1}}"#
        );
    }

    #[test]
    fn test_error_reply_encoding() {
        assert_eq!(&Reply::Error.encode()[..], b"\x00\x00\x00\x05ERROR");
        assert_eq!(Reply::from_body(b"ERROR").unwrap(), Reply::Error);
    }

    #[test]
    fn test_reply_from_body() {
        let response = Response::set(Stat::new(0, 3));
        let body = serde_json::to_vec(&response).unwrap();
        assert_eq!(Reply::from_body(&body).unwrap(), Reply::Response(response));
        assert!(Reply::from_body(b"{oops").is_err());
    }
}
