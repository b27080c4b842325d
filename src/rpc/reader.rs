//! Background task reading the child's stdout.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::codec::{decode_line, Inbound};
use super::correlator::Correlator;
use super::framing::LineFramer;

const READ_CHUNK: usize = 8 * 1024;

/// Spawn the reader for one process run.
///
/// Frames stdout into lines, decodes each one and routes responses to the
/// correlator. Anything else is logged and dropped. The task ends at EOF or
/// on a read error, which the supervisor treats as the session ending.
pub fn spawn_reader<R>(stdout: R, correlator: Correlator) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(read_loop(stdout, correlator))
}

async fn read_loop<R>(mut stdout: R, correlator: Correlator)
where
    R: AsyncRead + Send + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => {
                info!("Data-access server stdout closed");
                if framer.pending_len() > 0 {
                    warn!(bytes = framer.pending_len(), "Discarding unterminated output");
                }
                return;
            }
            Ok(n) => n,
            Err(e) => {
                error!("Failed to read from data-access server: {}", e);
                return;
            }
        };

        for line in framer.push(&chunk[..n]) {
            dispatch_line(&line, &correlator);
        }
    }
}

fn dispatch_line(line: &str, correlator: &Correlator) {
    debug!(line, "Received line");
    match decode_line(line) {
        Ok(Inbound::Response { id, outcome }) => correlator.resolve(id, outcome),
        Ok(Inbound::ForeignResponse { id }) => {
            warn!(%id, "Dropping response with an id we never issue");
        }
        Ok(Inbound::Notification { method }) => {
            debug!(method = %method, "Ignoring server notification");
        }
        Ok(Inbound::Request { id, method }) => {
            warn!(%id, method = %method, "Ignoring server-initiated request");
        }
        Err(e) => warn!(line, "Dropping undecodable line: {}", e),
    }
}
