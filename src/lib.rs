//! MCP Gateway Library
//!
//! HTTP front door for a single stdio JSON-RPC data-access server:
//!
//! - `rpc` - line framing, message codec and request correlation
//! - `session` - child process supervision and the MCP handshake
//! - `server` - axum router, CORS and error mapping
//! - `sql_guard` - read-only SQL validation for `/query`
//! - `calc` - sandboxed arithmetic for `/calculate`
//! - `config` - environment configuration
//!
//! # Session Module
//!
//! The supervisor owns the child and restarts it forever; handlers only
//! ever see a cloneable [`session::SessionHandle`]:
//!
//! ```ignore
//! use mcp_gateway::session::{CommandLauncher, Supervisor, SupervisorConfig};
//!
//! let launcher = CommandLauncher::new("npx", vec!["-y".into(), "server".into()]);
//! let (supervisor, session) = Supervisor::new(launcher, SupervisorConfig::default());
//! supervisor.spawn();
//! let tools = session.call("tools/list", serde_json::json!({})).await?;
//! ```

pub mod calc;
pub mod config;
pub mod error;
pub mod rpc;
pub mod server;
pub mod session;
pub mod sql_guard;
