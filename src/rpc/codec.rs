//! Encoding and decoding of JSON-RPC 2.0 messages.
//!
//! Outgoing requests use the fixed envelope
//! `{"jsonrpc":"2.0","id":N,"method":...,"params":...}`; notifications omit
//! `id`. Inbound lines are classified so that only responses reach the
//! correlator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const JSONRPC_VERSION: &str = "2.0";

/// Outgoing JSON-RPC envelope. Field order is the wire order.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    params: &'a Value,
}

/// Error object carried by a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A classified inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// Response whose id we could never have issued (string, negative, null...).
    ForeignResponse { id: Value },
    /// Server-initiated notification.
    Notification { method: String },
    /// Server-initiated request. Not expected; logged and dropped.
    Request { id: Value, method: String },
}

/// Failure to make sense of an inbound line.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a JSON object")]
    NotAnObject,

    #[error("message has neither a method nor a result/error")]
    Unclassifiable,

    #[error("malformed error object: {0}")]
    MalformedError(String),
}

/// Encode a request as one newline-terminated line.
pub fn encode_request(id: u64, method: &str, params: &Value) -> Result<String, serde_json::Error> {
    encode(Some(id), method, params)
}

/// Encode a notification (no `id`, no response expected).
pub fn encode_notification(method: &str, params: &Value) -> Result<String, serde_json::Error> {
    encode(None, method, params)
}

fn encode(id: Option<u64>, method: &str, params: &Value) -> Result<String, serde_json::Error> {
    let envelope = Envelope {
        jsonrpc: JSONRPC_VERSION,
        id,
        method,
        params,
    };
    let mut line = serde_json::to_string(&envelope)?;
    line.push('\n');
    Ok(line)
}

/// Classify one framed line.
///
/// Never panics. Callers log the error and keep reading.
pub fn decode_line(line: &str) -> Result<Inbound, CodecError> {
    let value: Value = serde_json::from_str(line.trim())?;
    let Value::Object(mut obj) = value else {
        return Err(CodecError::NotAnObject);
    };

    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let id = obj.remove("id");

    match (method, id) {
        (Some(method), Some(id)) => Ok(Inbound::Request { id, method }),
        (Some(method), None) => Ok(Inbound::Notification { method }),
        (None, Some(id)) => {
            // Some servers send `"error": null` alongside a result.
            let error = obj.remove("error").filter(|e| !e.is_null());
            let outcome = if let Some(error) = error {
                let error: RpcError = serde_json::from_value(error)
                    .map_err(|e| CodecError::MalformedError(e.to_string()))?;
                Err(error)
            } else if let Some(result) = obj.remove("result") {
                Ok(result)
            } else {
                return Err(CodecError::Unclassifiable);
            };

            match id.as_u64() {
                Some(id) => Ok(Inbound::Response { id, outcome }),
                None => Ok(Inbound::ForeignResponse { id }),
            }
        }
        (None, None) => Err(CodecError::Unclassifiable),
    }
}
