//! Gateway configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | required |
//! | `PORT` | `3100` |
//! | `BIND_ADDR` | `0.0.0.0` |
//! | `MCP_SERVER_COMMAND` | `npx -y @modelcontextprotocol/server-postgres` |
//! | `MCP_REQUEST_TIMEOUT_SECS` | `30` |
//! | `MCP_RESTART_DELAY_SECS` | `5` |

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::session::SupervisorConfig;

pub const DEFAULT_PORT: u16 = 3100;
pub const DEFAULT_SERVER_COMMAND: &str = "npx -y @modelcontextprotocol/server-postgres";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RESTART_DELAY_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is required")]
    MissingDatabaseUrl,

    #[error("DATABASE_URL is not a valid URL: {0}")]
    InvalidDatabaseUrl(#[source] url::ParseError),

    #[error("{var} must be a number, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("BIND_ADDR is not an IP address: '{0}'")]
    InvalidBindAddr(String),

    #[error("MCP_SERVER_COMMAND is empty")]
    EmptyCommand,

    #[error("MCP_REQUEST_TIMEOUT_SECS must be greater than zero")]
    ZeroTimeout,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Connection string handed to the child. Contains credentials; log
    /// [`GatewayConfig::redacted_database_url`] instead.
    pub database_url: Url,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub server_program: String,
    pub server_args: Vec<String>,
    pub request_timeout: Duration,
    pub restart_delay: Duration,
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;
        let database_url =
            Url::parse(database_url.trim()).map_err(ConfigError::InvalidDatabaseUrl)?;

        let port = match get("PORT") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { var: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        let bind_addr = match get("BIND_ADDR") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddr(value))?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let command = get("MCP_SERVER_COMMAND").unwrap_or_else(|| DEFAULT_SERVER_COMMAND.to_string());
        let mut words = command.split_whitespace().map(str::to_string);
        let server_program = words.next().ok_or(ConfigError::EmptyCommand)?;
        let server_args = words.collect();

        let request_timeout = secs(&get, "MCP_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        let restart_delay = secs(&get, "MCP_RESTART_DELAY_SECS", DEFAULT_RESTART_DELAY_SECS)?;

        Ok(Self {
            database_url,
            bind_addr,
            port,
            server_program,
            server_args,
            request_timeout,
            restart_delay,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Connection string with any password removed, for logs.
    pub fn redacted_database_url(&self) -> String {
        let mut url = self.database_url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("****"));
        }
        url.to_string()
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            request_timeout: self.request_timeout,
            restart_delay: self.restart_delay,
        }
    }
}

fn secs<G>(get: &G, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(Duration::from_secs(default)),
    }
}
