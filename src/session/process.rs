//! Launching the data-access child process.
//!
//! The supervisor only sees [`ChildIo`]: three byte streams and a future that
//! resolves when the process is gone. That keeps the restart logic testable
//! with an in-memory fake in place of a real process.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::GatewayConfig;

/// Resolves with a description of how the process ended.
///
/// Dropping it before it resolves kills the process.
pub type ExitFuture = Pin<Box<dyn Future<Output = String> + Send>>;

/// Handles to one running child.
pub struct ChildIo {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub pid: Option<u32>,
    pub exited: ExitFuture,
}

/// Trait for starting the child process.
///
/// This trait abstracts process creation to enable:
/// - Dependency injection of an in-process fake server for tests
/// - Exercising crash/restart handling without spawning anything
pub trait ChildLauncher: Send + Sync + 'static {
    /// Start one instance of the child.
    fn launch(&self) -> impl Future<Output = Result<ChildIo>> + Send;
}

/// Launches the child as a real OS process.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Configured command with the connection string appended as the last argument.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut args = config.server_args.clone();
        args.push(config.database_url.to_string());
        Self::new(config.server_program.clone(), args)
    }
}

impl ChildLauncher for CommandLauncher {
    async fn launch(&self) -> Result<ChildIo> {
        info!("Starting data-access server: {}", self.program);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn data-access server '{}'", self.program))?;

        let stdin = child
            .stdin
            .take()
            .context("Failed to get stdin handle for data-access server")?;
        let stdout = child
            .stdout
            .take()
            .context("Failed to get stdout handle for data-access server")?;
        let stderr = child.stderr.take();
        let pid = child.id();

        let exited: ExitFuture = Box::pin(async move {
            match child.wait().await {
                Ok(status) => format!("exited with {}", status),
                Err(e) => format!("could not be waited on: {}", e),
            }
        });

        Ok(ChildIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
            pid,
            exited,
        })
    }
}

/// Log every line the child writes to stderr. Never triggers a restart.
pub fn spawn_stderr_logger<R>(stderr: R) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => warn!(child_stderr = %line, "Data-access server stderr"),
                Ok(None) => return,
                Err(e) => {
                    warn!("Stopped reading data-access server stderr: {}", e);
                    return;
                }
            }
        }
    })
}
