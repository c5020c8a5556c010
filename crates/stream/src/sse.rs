//! Incremental decoder for the backend's server-sent-event framing.
//!
//! Chunks arrive with arbitrary boundaries; a frame is one or more `data:`
//! lines terminated by a blank line. `event:`/`id:`/`retry:` fields and
//! comment lines are tolerated and ignored — for this protocol the payload
//! is always the JSON message carried on the data lines.

use bytes::BytesMut;

pub struct FrameDecoder {
    buf: BytesMut,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: BytesMut::new(), data: Vec::new() }
    }

    /// Feed one chunk; returns the payload of every frame the chunk
    /// completes. Partial lines stay buffered until the newline arrives.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let line = &line[..line.len() - 1];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            self.push_line(line, &mut out);
        }
        out
    }

    fn push_line(&mut self, line: &[u8], out: &mut Vec<String>) {
        if line.is_empty() {
            // frame boundary
            if !self.data.is_empty() {
                out.push(self.data.join("\n"));
                self.data.clear();
            }
            return;
        }
        if line.starts_with(b":") {
            // keep-alive comment
            return;
        }
        let text = String::from_utf8_lossy(line);
        if let Some(rest) = text.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
