//! Capability negotiation run after every process start.
//!
//! ```text
//! gateway                          child
//!   │ ── initialize (id) ──────────► │
//!   │ ◄───────────── result (id) ─── │
//!   │ ── notifications/initialized ► │
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::rpc::Correlator;

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name announced in `initialize`.
pub const CLIENT_NAME: &str = "mcp-gateway";

/// Identity reported by the child.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// The parts of the `initialize` result the gateway cares about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_info: ServerInfo,
    #[serde(default)]
    pub capabilities: Value,
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Run the handshake over an attached correlator.
///
/// # Errors
///
/// Any correlation error from `initialize` (timeout, error response, session
/// lost), a result that is not an object, or a failure writing the
/// `initialized` notification.
pub async fn perform_handshake(
    correlator: &Correlator,
    wait: Duration,
) -> Result<InitializeResult, GatewayError> {
    let result = correlator
        .send("initialize", initialize_params(), wait)
        .await?;

    if !result.is_object() {
        return Err(GatewayError::Protocol(format!(
            "initialize returned a non-object result: {}",
            result
        )));
    }
    let init: InitializeResult = serde_json::from_value(result)
        .map_err(|e| GatewayError::Protocol(format!("Malformed initialize result: {}", e)))?;

    correlator
        .notify("notifications/initialized", json!({}))
        .await?;

    Ok(init)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, BufReader};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_initialize_params_shape() {
        let params = initialize_params();
        assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(params["clientInfo"]["name"], CLIENT_NAME);
        assert!(params["capabilities"].is_object());
    }

    #[tokio::test]
    async fn test_handshake_sends_initialize_then_initialized() {
        let correlator = Correlator::spawn();
        let (ours, theirs) = tokio::io::duplex(4096);
        correlator.attach(Box::new(ours));
        let mut lines = BufReader::new(theirs).lines();

        let handshake = {
            let correlator = correlator.clone();
            tokio::spawn(async move { perform_handshake(&correlator, TEST_TIMEOUT).await })
        };

        let request: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(request["method"], "initialize");
        correlator.resolve(
            request["id"].as_u64().unwrap(),
            Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {"name": "example-servers/postgres", "version": "0.1.0"},
                "capabilities": {"tools": {}, "resources": {}}
            })),
        );

        let init = handshake.await.unwrap().unwrap();
        assert_eq!(init.server_info.name, "example-servers/postgres");
        assert_eq!(init.protocol_version.as_deref(), Some(PROTOCOL_VERSION));

        let notification: Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(notification["method"], "notifications/initialized");
        assert!(notification.get("id").is_none());
    }

    #[tokio::test]
    async fn test_handshake_error_response_fails() {
        let correlator = Correlator::spawn();
        let (ours, theirs) = tokio::io::duplex(4096);
        correlator.attach(Box::new(ours));
        let mut lines = BufReader::new(theirs).lines();

        let handshake = {
            let correlator = correlator.clone();
            tokio::spawn(async move { perform_handshake(&correlator, TEST_TIMEOUT).await })
        };

        let request: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        correlator.resolve(
            request["id"].as_u64().unwrap(),
            Err(crate::rpc::RpcError {
                code: -32602,
                message: "unsupported protocol version".to_string(),
                data: None,
            }),
        );

        assert!(matches!(
            handshake.await.unwrap(),
            Err(GatewayError::Rpc(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out_without_answer() {
        let correlator = Correlator::spawn();
        let (ours, _theirs) = tokio::io::duplex(4096);
        correlator.attach(Box::new(ours));

        let result = perform_handshake(&correlator, Duration::from_millis(30)).await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
    }
}
