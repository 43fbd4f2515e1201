//! Server-sent event framing.
//!
//! Decodes the `event:`/`data:` line protocol from raw byte chunks. Chunks
//! may split lines (and multi-byte characters) anywhere, so bytes are
//! buffered until a complete line is available.

/// One decoded SSE record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    /// Event type from the preceding `event:` line (may be empty).
    pub event: String,
    /// Raw payload of the `data:` line.
    pub data: String,
}

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event_type: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a byte chunk and returns every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim();

            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(event) = line.strip_prefix("event:") {
                self.event_type = event.trim().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                records.push(SseRecord {
                    event: self.event_type.clone(),
                    data: data.trim_start().to_string(),
                });
            }
        }

        records
    }
}
