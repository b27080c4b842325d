//! Request/response correlation for the child session.
//!
//! A single actor task owns both the pending-request table and the child's
//! stdin. Callers and the stdout reader talk to it only through a channel, so
//! there is exactly one writer to the table and one writer to the pipe, and
//! request lines reach the child in the order their commands were queued.
//!
//! Responses may come back in any order; they are matched by `id`.
//!
//! Deadlines live in the table too. The actor expires entries itself, so a
//! caller that goes away mid-wait still has its entry removed on time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use super::codec::{encode_notification, encode_request, RpcError};
use crate::error::GatewayError;

/// Default time a caller waits for its response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type Reply = oneshot::Sender<Result<Value, GatewayError>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// One in-flight call.
struct PendingRequest {
    method: String,
    created_at: Instant,
    wait: Duration,
    deadline: Instant,
    reply: Reply,
}

enum Command {
    Dispatch {
        id: u64,
        method: String,
        params: Value,
        wait: Duration,
        reply: Reply,
    },
    Notify {
        method: String,
        params: Value,
        done: oneshot::Sender<Result<(), GatewayError>>,
    },
    Resolve {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    FailAll {
        reason: String,
    },
    Attach(Writer),
    Detach,
    PendingCount(oneshot::Sender<usize>),
}

/// Cloneable handle to the correlator actor.
///
/// # Example
///
/// ```ignore
/// let correlator = Correlator::spawn();
/// correlator.attach(Box::new(stdin));
/// let result = correlator.send("tools/list", json!({}), DEFAULT_TIMEOUT).await?;
/// ```
#[derive(Clone)]
pub struct Correlator {
    tx: mpsc::UnboundedSender<Command>,
    /// Monotonically increasing request ID counter.
    next_id: Arc<AtomicU64>,
}

impl Correlator {
    /// Start the actor on the current tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a request and wait up to `wait` for its response.
    ///
    /// The pending entry is removed whatever the outcome, including when the
    /// returned future is dropped before it completes.
    ///
    /// # Errors
    ///
    /// - `GatewayError::Timeout` if no response arrives in time
    /// - `GatewayError::Rpc` if the child answered with an error object
    /// - `GatewayError::SessionLost` if the session ended mid-wait
    /// - `GatewayError::NotConnected` / `Transport` if the line could not be written
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        wait: Duration,
    ) -> Result<Value, GatewayError> {
        let id = self.next_id();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Dispatch {
                id,
                method: method.to_string(),
                params,
                wait,
                reply,
            })
            .map_err(|_| GatewayError::CorrelatorStopped)?;

        rx.await.map_err(|_| GatewayError::CorrelatorStopped)?
    }

    /// Write a notification. Returns once the line has been flushed.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), GatewayError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Command::Notify {
                method: method.to_string(),
                params,
                done,
            })
            .map_err(|_| GatewayError::CorrelatorStopped)?;
        rx.await.map_err(|_| GatewayError::CorrelatorStopped)?
    }

    /// Deliver a decoded response. Unknown ids are logged and discarded.
    pub fn resolve(&self, id: u64, outcome: Result<Value, RpcError>) {
        let _ = self.tx.send(Command::Resolve { id, outcome });
    }

    /// Fail every pending request with a "session lost" error.
    pub fn fail_all(&self, reason: &str) {
        let _ = self.tx.send(Command::FailAll {
            reason: reason.to_string(),
        });
    }

    /// Route future requests to a new child stdin.
    pub fn attach(&self, writer: Writer) {
        let _ = self.tx.send(Command::Attach(writer));
    }

    /// Drop the current child stdin. Subsequent sends fail with `NotConnected`.
    pub fn detach(&self) {
        let _ = self.tx.send(Command::Detach);
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::PendingCount(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[derive(Default)]
struct Actor {
    pending: HashMap<u64, PendingRequest>,
    writer: Option<Writer>,
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut actor = Actor::default();
    loop {
        let deadline = actor.next_deadline();
        let expiry = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = rx.recv() => match command {
                Some(command) => actor.handle(command).await,
                None => break,
            },
            _ = expiry => actor.expire_due(Instant::now()),
        }
    }
    actor.fail_all("correlator shut down");
}

impl Actor {
    async fn handle(&mut self, command: Command) {
        match command {
            Command::Dispatch {
                id,
                method,
                params,
                wait,
                reply,
            } => self.dispatch(id, method, params, wait, reply).await,
            Command::Notify {
                method,
                params,
                done,
            } => {
                let result = match encode_notification(&method, &params) {
                    Ok(line) => self.write_line(&line).await,
                    Err(e) => Err(GatewayError::Transport(e.to_string())),
                };
                let _ = done.send(result);
            }
            Command::Resolve { id, outcome } => match self.pending.remove(&id) {
                Some(pending) => {
                    debug!(
                        id,
                        method = %pending.method,
                        elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                        "Resolved request"
                    );
                    let _ = pending.reply.send(outcome.map_err(GatewayError::Rpc));
                }
                None => warn!(id, "Discarding response for unknown request id"),
            },
            Command::FailAll { reason } => self.fail_all(&reason),
            Command::Attach(writer) => self.writer = Some(writer),
            Command::Detach => self.writer = None,
            Command::PendingCount(tx) => {
                let _ = tx.send(self.pending.len());
            }
        }
    }

    async fn dispatch(
        &mut self,
        id: u64,
        method: String,
        params: Value,
        wait: Duration,
        reply: Reply,
    ) {
        let created_at = Instant::now();
        let line = match encode_request(id, &method, &params) {
            Ok(line) => line,
            Err(e) => {
                let _ = reply.send(Err(GatewayError::Transport(e.to_string())));
                return;
            }
        };

        if let Err(e) = self.write_line(&line).await {
            let _ = reply.send(Err(e));
            return;
        }

        debug!(id, method = %method, "Dispatched request");
        self.pending.insert(
            id,
            PendingRequest {
                method,
                created_at,
                wait,
                deadline: created_at + wait,
                reply,
            },
        );
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Time out every entry whose deadline has passed.
    fn expire_due(&mut self, now: Instant) {
        let due: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            warn!(id, method = %pending.method, "Request timed out after {:?}", pending.wait);
            let _ = pending.reply.send(Err(GatewayError::Timeout {
                method: pending.method,
                after: pending.wait,
            }));
        }
    }

    /// Write one whole line. A failed write drops the writer.
    async fn write_line(&mut self, line: &str) -> Result<(), GatewayError> {
        let writer = self.writer.as_mut().ok_or(GatewayError::NotConnected)?;

        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| {
            error!("Failed to write to data-access server: {}", e);
            self.writer = None;
            GatewayError::Transport(e.to_string())
        })
    }

    fn fail_all(&mut self, reason: &str) {
        if self.pending.is_empty() {
            return;
        }
        warn!(count = self.pending.len(), reason, "Failing all pending requests");
        for (_, pending) in self.pending.drain() {
            let _ = pending
                .reply
                .send(Err(GatewayError::SessionLost(reason.to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Correlator attached to an in-memory pipe standing in for child stdin.
    fn attached() -> (Correlator, Lines<BufReader<DuplexStream>>) {
        let correlator = Correlator::spawn();
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        correlator.attach(Box::new(ours));
        (correlator, BufReader::new(theirs).lines())
    }

    async fn next_request(lines: &mut Lines<BufReader<DuplexStream>>) -> Value {
        let line = timeout(TEST_TIMEOUT, lines.next_line())
            .await
            .expect("Test timed out")
            .expect("Read failed")
            .expect("Pipe closed");
        serde_json::from_str(&line).expect("Request line is not JSON")
    }

    #[tokio::test]
    async fn test_send_and_resolve_roundtrip() {
        let (correlator, mut lines) = attached();

        let caller = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .send("tools/list", json!({}), TEST_TIMEOUT)
                    .await
            })
        };

        let request = next_request(&mut lines).await;
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "tools/list");
        let id = request["id"].as_u64().unwrap();

        correlator.resolve(id, Ok(json!({"tools": ["query"]})));

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result, json!({"tools": ["query"]}));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_the_right_callers() {
        let (correlator, mut lines) = attached();

        let mut callers = Vec::new();
        for n in 0..3 {
            let correlator = correlator.clone();
            callers.push(tokio::spawn(async move {
                correlator
                    .send("echo", json!({ "n": n }), TEST_TIMEOUT)
                    .await
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(next_request(&mut lines).await);
        }
        for request in requests.iter().rev() {
            correlator.resolve(request["id"].as_u64().unwrap(), Ok(request["params"].clone()));
        }

        for (n, caller) in callers.into_iter().enumerate() {
            assert_eq!(caller.await.unwrap().unwrap(), json!({ "n": n }));
        }
    }

    #[tokio::test]
    async fn test_error_response_is_typed() {
        let (correlator, mut lines) = attached();

        let caller = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.send("bad", json!({}), TEST_TIMEOUT).await })
        };
        let id = next_request(&mut lines).await["id"].as_u64().unwrap();
        correlator.resolve(
            id,
            Err(RpcError {
                code: -32601,
                message: "Method not found".to_string(),
                data: None,
            }),
        );

        match caller.await.unwrap() {
            Err(GatewayError::Rpc(err)) => assert_eq!(err.code, -32601),
            other => panic!("Expected Rpc error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_pending_entry() {
        let (correlator, mut lines) = attached();

        let result = correlator
            .send("slow", json!({}), Duration::from_millis(50))
            .await;
        match result {
            Err(GatewayError::Timeout { method, after }) => {
                assert_eq!(method, "slow");
                assert_eq!(after, Duration::from_millis(50));
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }

        // The line was still written.
        assert_eq!(next_request(&mut lines).await["method"], "slow");
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_discarded() {
        let (correlator, mut lines) = attached();

        let result = correlator
            .send("slow", json!({}), Duration::from_millis(20))
            .await;
        assert!(result.is_err());
        let id = next_request(&mut lines).await["id"].as_u64().unwrap();

        correlator.resolve(id, Ok(json!("late")));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_caller_entry_still_expires() {
        let (correlator, mut lines) = attached();

        let caller = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .send("tools/call", json!({}), Duration::from_millis(100))
                    .await
            })
        };
        next_request(&mut lines).await;
        assert_eq!(correlator.pending_count().await, 1);

        // The HTTP client hung up; nobody is waiting on the reply any more.
        caller.abort();
        let _ = caller.await;
        assert_eq!(correlator.pending_count().await, 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_only_touches_due_entries() {
        let (correlator, mut lines) = attached();

        let short = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .send("short", json!({}), Duration::from_millis(50))
                    .await
            })
        };
        next_request(&mut lines).await;
        let long = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .send("long", json!({}), Duration::from_secs(10))
                    .await
            })
        };
        let long_id = next_request(&mut lines).await["id"].as_u64().unwrap();

        assert!(matches!(
            short.await.unwrap(),
            Err(GatewayError::Timeout { .. })
        ));
        assert_eq!(correlator.pending_count().await, 1);

        correlator.resolve(long_id, Ok(json!("done")));
        assert_eq!(long.await.unwrap().unwrap(), json!("done"));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_resolve_is_at_most_once() {
        let (correlator, mut lines) = attached();

        let caller = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.send("once", json!({}), TEST_TIMEOUT).await })
        };
        let id = next_request(&mut lines).await["id"].as_u64().unwrap();

        correlator.resolve(id, Ok(json!("first")));
        correlator.resolve(id, Ok(json!("second")));

        assert_eq!(caller.await.unwrap().unwrap(), json!("first"));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_ignored() {
        let (correlator, _lines) = attached();
        correlator.resolve(4242, Ok(json!(null)));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_fail_all_delivers_session_lost_once() {
        let (correlator, mut lines) = attached();

        let mut callers = Vec::new();
        for _ in 0..4 {
            let correlator = correlator.clone();
            callers.push(tokio::spawn(async move {
                correlator.send("hang", json!({}), TEST_TIMEOUT).await
            }));
        }
        for _ in 0..4 {
            next_request(&mut lines).await;
        }
        assert_eq!(correlator.pending_count().await, 4);

        correlator.fail_all("process exited");
        correlator.fail_all("process exited");

        for caller in callers {
            assert!(matches!(
                caller.await.unwrap(),
                Err(GatewayError::SessionLost(_))
            ));
        }
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_fail_all_on_empty_table_is_noop() {
        let correlator = Correlator::spawn();
        correlator.fail_all("nothing pending");
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_without_writer_fails_fast() {
        let correlator = Correlator::spawn();
        let result = correlator.send("tools/list", json!({}), TEST_TIMEOUT).await;
        assert!(matches!(result, Err(GatewayError::NotConnected)));

        let (correlator, _lines) = attached();
        correlator.detach();
        let result = correlator.send("tools/list", json!({}), TEST_TIMEOUT).await;
        assert!(matches!(result, Err(GatewayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_write_failure_is_transport_error() {
        let correlator = Correlator::spawn();
        let (ours, theirs) = tokio::io::duplex(64);
        drop(theirs);
        correlator.attach(Box::new(ours));

        let result = correlator.send("tools/list", json!({}), TEST_TIMEOUT).await;
        assert!(matches!(result, Err(GatewayError::Transport(_))));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_notification_has_no_id() {
        let (correlator, mut lines) = attached();
        correlator
            .notify("notifications/initialized", json!({}))
            .await
            .unwrap();

        let line = next_request(&mut lines).await;
        assert!(line.get("id").is_none());
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_sends_get_unique_ids_and_whole_lines() {
        let (correlator, mut lines) = attached();

        for n in 0..20 {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                let _ = correlator
                    .send("bulk", json!({ "payload": "x".repeat(512 + n) }), TEST_TIMEOUT)
                    .await;
            });
        }

        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let request = next_request(&mut lines).await;
            assert!(ids.insert(request["id"].as_u64().unwrap()));
        }
        assert_eq!(correlator.pending_count().await, 20);
    }
}
