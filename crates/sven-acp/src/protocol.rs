// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSON-RPC 2.0 wire types.
//!
//! Framing is line-delimited: one JSON object per line on stdin/stdout (see
//! `crate::transport`). This module only covers the message shapes, not the
//! I/O loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32000;

/// A JSON-RPC id: either an integer or a string, per the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{n}"),
            Id::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, msg.into())
    }

    pub fn server_error(msg: impl Into<String>) -> Self {
        Self::new(SERVER_ERROR, msg.into())
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// An inbound line, before we know whether it's a client request or a
/// client's response to one of our server→client requests.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl InboundMessage {
    /// A response to one of *our* server→client requests carries no `method`
    /// but does carry an `id` the client is echoing back.
    pub fn is_response(&self) -> bool {
        self.method.is_none() && self.id.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Request {
        jsonrpc: &'static str,
        id: Id,
        method: &'static str,
        params: Value,
    },
    Notification {
        jsonrpc: &'static str,
        method: &'static str,
        params: Value,
    },
    Response {
        jsonrpc: &'static str,
        id: Option<Id>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
}

impl OutboundMessage {
    pub fn notification(method: &'static str, params: Value) -> Self {
        Self::Notification {
            jsonrpc: "2.0",
            method,
            params,
        }
    }

    pub fn request(id: Id, method: &'static str, params: Value) -> Self {
        Self::Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }

    pub fn ok(id: Id, result: Value) -> Self {
        Self::Response {
            jsonrpc: "2.0",
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Id, error: RpcError) -> Self {
        Self::Response {
            jsonrpc: "2.0",
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }

    /// `id: null` response for transport-level parse errors, per spec.md §6.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::Response {
            jsonrpc: "2.0",
            id: None,
            result: None,
            error: Some(RpcError::new(PARSE_ERROR, message.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_request_is_not_a_response() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"opal/ping","params":{}}"#)
                .unwrap();
        assert!(!msg.is_response());
    }

    #[test]
    fn inbound_client_answer_is_a_response() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"s2c-1","result":"yes"}"#).unwrap();
        assert!(msg.is_response());
    }

    #[test]
    fn id_roundtrips_both_variants() {
        let n: Id = serde_json::from_str("7").unwrap();
        assert_eq!(n, Id::Number(7));
        let s: Id = serde_json::from_str("\"s2c-3\"").unwrap();
        assert_eq!(s, Id::String("s2c-3".to_string()));
    }

    #[test]
    fn notification_serializes_without_id() {
        let msg = OutboundMessage::notification("agent/event", serde_json::json!({"type": "x"}));
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["method"], "agent/event");
    }
}
