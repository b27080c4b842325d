//! JSON-RPC plumbing for the data-access child process.
//!
//! The child speaks newline-delimited JSON-RPC 2.0 on its standard streams:
//!
//! ```text
//! ┌─────────────────┐        stdin / stdout         ┌─────────────────────┐
//! │   mcp-gateway   │  ◄──────────────────────────► │  data-access server │
//! │  (Correlator)   │   JSON-RPC 2.0, one per line  │    (child process)  │
//! └─────────────────┘                               └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Every message is a single JSON object terminated by `\n`:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mcp_gateway::rpc::Correlator;
//! use serde_json::json;
//!
//! let correlator = Correlator::spawn();
//! correlator.attach(Box::new(child_stdin));
//! let tools = correlator.send("tools/list", json!({}), timeout).await?;
//! ```

mod codec;
mod correlator;
mod framing;
mod reader;

pub use codec::{decode_line, encode_notification, encode_request, CodecError, Inbound, RpcError};
pub use correlator::{Correlator, DEFAULT_TIMEOUT};
pub use framing::LineFramer;
pub use reader::spawn_reader;
