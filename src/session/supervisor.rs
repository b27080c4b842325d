//! Lifecycle supervision for the single child session.
//!
//! ```text
//!            spawned            handshake ok
//! Starting ──────────► Handshaking ──────────► Ready
//!    ▲                      │                    │
//!    │ delay elapsed        │ failed / exited    │ exited
//!    │                      ▼                    ▼
//! Restarting ◄──────────────────── Crashed ◄─────┘
//! ```
//!
//! Restarts are unconditional, with a fixed delay and no retry limit.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use super::handshake::perform_handshake;
use super::process::{spawn_stderr_logger, ChildIo, ChildLauncher};
use crate::error::GatewayError;
use crate::rpc::{spawn_reader, Correlator, DEFAULT_TIMEOUT};

/// Default pause between a crash and the next start.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Lifecycle state of the child session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Handshaking,
    Ready,
    Crashed,
    Restarting,
}

/// Things that move the session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Spawned,
    SpawnFailed,
    HandshakeSucceeded,
    HandshakeFailed,
    Exited,
    RestartScheduled,
    DelayElapsed,
}

impl SessionState {
    /// The state `event` leads to, or `None` if it cannot happen here.
    pub fn on(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Starting, Spawned) => Some(Handshaking),
            (Starting, SpawnFailed) => Some(Crashed),
            (Handshaking, HandshakeSucceeded) => Some(Ready),
            (Handshaking, HandshakeFailed) => Some(Crashed),
            (_, Exited) => Some(Crashed),
            (Crashed, RestartScheduled) => Some(Restarting),
            (Restarting, DelayElapsed) => Some(Starting),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Crashed => "crashed",
            SessionState::Restarting => "restarting",
        }
    }
}

/// Snapshot published on every transition.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Restarts after the first start.
    pub restarts: u64,
    pub since: DateTime<Utc>,
}

impl SessionStatus {
    fn initial() -> Self {
        Self {
            state: SessionState::Starting,
            restarts: 0,
            since: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub request_timeout: Duration,
    pub restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }
}

/// Owns the child lifecycle. Run it with [`Supervisor::spawn`].
pub struct Supervisor<L> {
    launcher: L,
    correlator: Correlator,
    status: watch::Sender<SessionStatus>,
    config: SupervisorConfig,
}

/// What HTTP handlers use to reach the child.
#[derive(Clone)]
pub struct SessionHandle {
    correlator: Correlator,
    status: watch::Receiver<SessionStatus>,
    request_timeout: Duration,
}

impl<L: ChildLauncher> Supervisor<L> {
    /// Create the supervisor and the handle callers share.
    ///
    /// Must be called inside a tokio runtime (the correlator actor starts here).
    pub fn new(launcher: L, config: SupervisorConfig) -> (Self, SessionHandle) {
        let correlator = Correlator::spawn();
        let (status, status_rx) = watch::channel(SessionStatus::initial());
        let handle = SessionHandle {
            correlator: correlator.clone(),
            status: status_rx,
            request_timeout: config.request_timeout,
        };
        let supervisor = Self {
            launcher,
            correlator,
            status,
            config,
        };
        (supervisor, handle)
    }

    /// Run forever on a background task. Aborting the task kills the child.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        loop {
            self.run_once().await;

            self.apply(SessionEvent::RestartScheduled);
            info!(
                "Restarting data-access server in {}s",
                self.config.restart_delay.as_secs_f32()
            );
            tokio::time::sleep(self.config.restart_delay).await;
            self.apply(SessionEvent::DelayElapsed);
        }
    }

    /// One process run, from spawn to crash.
    async fn run_once(&self) {
        let ChildIo {
            stdin,
            stdout,
            stderr,
            pid,
            mut exited,
        } = match self.launcher.launch().await {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start data-access server: {:#}", e);
                self.apply(SessionEvent::SpawnFailed);
                return;
            }
        };
        info!(?pid, "Data-access server spawned");

        self.correlator.attach(stdin);
        let mut reader = spawn_reader(stdout, self.correlator.clone());
        let stderr_task = stderr.map(spawn_stderr_logger);
        self.apply(SessionEvent::Spawned);

        let ended = tokio::select! {
            reason = &mut exited => Some(reason),
            _ = &mut reader => Some("closed its stdout".to_string()),
            outcome = perform_handshake(&self.correlator, self.config.request_timeout) => {
                match outcome {
                    Ok(init) => {
                        info!(
                            server = %init.server_info.name,
                            version = %init.server_info.version,
                            protocol = ?init.protocol_version,
                            "Handshake complete"
                        );
                        self.apply(SessionEvent::HandshakeSucceeded);
                        None
                    }
                    Err(e) => {
                        error!("Handshake with data-access server failed: {}", e);
                        self.apply(SessionEvent::HandshakeFailed);
                        Some(format!("failed its handshake ({})", e))
                    }
                }
            }
        };

        let reason = match ended {
            Some(reason) => reason,
            None => tokio::select! {
                reason = &mut exited => reason,
                _ = &mut reader => "closed its stdout".to_string(),
            },
        };

        warn!(reason = %reason, "Data-access server session ended");
        self.apply(SessionEvent::Exited);
        self.correlator.detach();
        self.correlator
            .fail_all(&format!("data-access server {}", reason));

        reader.abort();
        if let Some(task) = stderr_task {
            task.abort();
        }
        // Kills the child if it is still running.
        drop(exited);
    }

    fn apply(&self, event: SessionEvent) {
        self.status.send_modify(|status| match status.state.on(event) {
            Some(next) => {
                if next == SessionState::Restarting {
                    status.restarts += 1;
                }
                if next != status.state {
                    info!(from = status.state.as_str(), to = next.as_str(), "Session transition");
                }
                status.state = next;
                status.since = Utc::now();
            }
            None => warn!(state = status.state.as_str(), ?event, "Ignoring impossible transition"),
        });
    }
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status.borrow().state == SessionState::Ready
    }

    /// Call the child, waiting for the session to be Ready first.
    ///
    /// Waiting for Ready and waiting for the response share one timeout budget.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let started = Instant::now();
        let mut status = self.status.clone();

        let ready = timeout(
            self.request_timeout,
            status.wait_for(|s| s.state == SessionState::Ready),
        )
        .await
        .map(|waited| waited.is_ok());

        match ready {
            Ok(true) => {}
            Ok(false) => return Err(GatewayError::SessionLost("supervisor stopped".to_string())),
            Err(_) => return Err(GatewayError::NotReady(self.request_timeout)),
        }

        let remaining = self.request_timeout.saturating_sub(started.elapsed());
        self.correlator.send(method, params, remaining).await
    }

    /// Requests currently awaiting a response from the child.
    pub async fn pending_requests(&self) -> usize {
        self.correlator.pending_count().await
    }
}
