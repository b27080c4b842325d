//! Newline framing for the child's standard output.
//!
//! Bytes arrive in arbitrary chunks. [`LineFramer`] buffers them and hands
//! back only complete lines, keeping any unterminated tail for the next chunk.
//!
//! # Wire Format
//!
//! ```text
//! <json>\n<json>\n<partial json...
//! ```
//!
//! A trailing `\r` is stripped so CRLF output behaves like LF output.
//! Whitespace-only lines carry no message and are skipped.

/// Splits a byte stream into complete text lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    ///
    /// Never returns a partial line. The buffer has no upper bound: a child
    /// that never writes a newline keeps growing it until it exits.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut raw = &self.buf[start..end];
            if let Some(stripped) = raw.strip_suffix(b"\r") {
                raw = stripped;
            }
            let line = String::from_utf8_lossy(raw);
            if !line.trim().is_empty() {
                lines.push(line.into_owned());
            }
            start = end + 1;
        }
        self.buf.drain(..start);

        lines
    }

    /// Number of buffered bytes not yet terminated by a newline.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}
