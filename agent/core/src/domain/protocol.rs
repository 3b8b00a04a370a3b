// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinator wire protocol
//!
//! Both directions carry one UTF-8 JSON document per frame, terminated by the
//! configured delimiter (`\r\n` by default). Inbound frames are commands,
//! outbound frames are heartbeats.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// `call` value carried by every heartbeat
pub const HEARTBEAT_CALL: &str = "heart beat";

/// Reply written back on a connection that delivered a malformed frame
pub const MALFORMED_REQUEST_REPLY: &str = "invalid request format";

/// Inbound protocol unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Action the Task Registry should perform
    pub call: String,
    /// Opaque payload, forwarded verbatim
    pub params: Value,
}

impl CommandMessage {
    pub fn new(call: impl Into<String>, params: Value) -> Self {
        Self {
            call: call.into(),
            params,
        }
    }

    /// Parse and validate a frame body.
    ///
    /// Both fields must be present and non-null and `call` must be a string.
    /// `params` may be any JSON value.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(frame)
            .map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let call = match fields.remove("call") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingField("call")),
            Some(Value::String(call)) => call,
            Some(_) => return Err(ProtocolError::InvalidCall),
        };

        let params = match fields.remove("params") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingField("params")),
            Some(params) => params,
        };

        Ok(Self { call, params })
    }
}

/// Liveness announcement sent to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub call: String,
    pub params: HeartbeatParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatParams {
    pub hostname: String,
    pub ip: String,
    pub port: u16,
}

impl HeartbeatMessage {
    pub fn new(hostname: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            call: HEARTBEAT_CALL.to_string(),
            params: HeartbeatParams {
                hostname: hostname.into(),
                ip: ip.into(),
                port,
            },
        }
    }

    /// Serialized frame body, without delimiter
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Frame is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Field 'call' must be a string")]
    InvalidCall,

    #[error("Frame exceeds {limit} bytes without a delimiter")]
    FrameTooLong { limit: usize },

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_command() {
        let msg = CommandMessage::parse(br#"{"call":"ping","params":{}}"#).unwrap();
        assert_eq!(msg.call, "ping");
        assert_eq!(msg.params, json!({}));
    }

    #[test]
    fn test_params_forwarded_verbatim() {
        let msg = CommandMessage::parse(
            br#"{"call":"run","params":{"job":"backup","args":[1,2,{"deep":true}]},"extra":1}"#,
        )
        .unwrap();
        assert_eq!(msg.params, json!({"job":"backup","args":[1,2,{"deep":true}]}));
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        assert!(matches!(
            CommandMessage::parse(br#"{"call":"ping"}"#),
            Err(ProtocolError::MissingField("params"))
        ));
        assert!(matches!(
            CommandMessage::parse(br#"{"params":{}}"#),
            Err(ProtocolError::MissingField("call"))
        ));
        assert!(matches!(
            CommandMessage::parse(br#"{"call":null,"params":{}}"#),
            Err(ProtocolError::MissingField("call"))
        ));
        assert!(matches!(
            CommandMessage::parse(br#"{"call":"ping","params":null}"#),
            Err(ProtocolError::MissingField("params"))
        ));
    }

    #[test]
    fn test_invalid_payloads_are_rejected() {
        assert!(matches!(
            CommandMessage::parse(b"not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            CommandMessage::parse(b"[1,2,3]"),
            Err(ProtocolError::NotAnObject)
        ));
        assert!(matches!(
            CommandMessage::parse(br#"{"call":42,"params":{}}"#),
            Err(ProtocolError::InvalidCall)
        ));
    }

    #[test]
    fn test_heartbeat_shape() {
        let hb = HeartbeatMessage::new("worker-07", "192.168.1.20", 9501);
        let value: Value = serde_json::from_str(&hb.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "call": "heart beat",
                "params": {"hostname": "worker-07", "ip": "192.168.1.20", "port": 9501}
            })
        );
    }
}
