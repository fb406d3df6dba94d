use std::time::{Duration, Instant};

use super::circular_buffer::CircularBuffer;
use super::types::StreamStats;

const MAX_RECENT_ERRORS: usize = 32;
const MAX_ERROR_TEXT_BYTES: usize = 512;

/// One skipped frame, as reported by [`GetRecentDecodeErrors`](crate::GetRecentDecodeErrors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeErrorRecord {
    pub at: Instant,
    pub error: String,
}

fn truncate_string(s: &str) -> String {
    if s.len() <= MAX_ERROR_TEXT_BYTES {
        return s.to_string();
    }

    let mut end = MAX_ERROR_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Inbound activity and error counters for one connection manager.
///
/// Owned by the session task and published to readers as a cloned snapshot.
#[derive(Debug, Clone)]
pub struct StreamHealth {
    connection_started: Instant,
    last_frame_received: Instant,
    frames: u64,
    messages: u64,
    decode_errors: u64,
    reconnects: u64,
    bytes_in: u64,
    recent_decode_errors: CircularBuffer<DecodeErrorRecord>,
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHealth {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            connection_started: now,
            last_frame_received: now,
            frames: 0,
            messages: 0,
            decode_errors: 0,
            reconnects: 0,
            bytes_in: 0,
            recent_decode_errors: CircularBuffer::new(MAX_RECENT_ERRORS),
        }
    }

    /// Called when a connection is established.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.connection_started = now;
        self.last_frame_received = now;
    }

    pub fn record_frame(&mut self, payload_len: usize) {
        self.last_frame_received = Instant::now();
        self.frames = self.frames.saturating_add(1);
        self.bytes_in = self.bytes_in.saturating_add(payload_len as u64);
    }

    pub fn record_message(&mut self) {
        self.messages = self.messages.saturating_add(1);
    }

    pub fn record_decode_error(&mut self, error: &str) {
        self.decode_errors = self.decode_errors.saturating_add(1);
        self.recent_decode_errors.push(DecodeErrorRecord {
            at: Instant::now(),
            error: truncate_string(error),
        });
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    pub fn idle_for(&self) -> Duration {
        self.last_frame_received.elapsed()
    }

    /// Oldest first.
    pub fn recent_decode_errors(&self) -> impl DoubleEndedIterator<Item = &DecodeErrorRecord> {
        self.recent_decode_errors.iter()
    }

    pub fn get_stats(&self) -> StreamStats {
        StreamStats {
            frames: self.frames,
            messages: self.messages,
            decode_errors: self.decode_errors,
            reconnects: self.reconnects,
            bytes_in: self.bytes_in,
            uptime: self.connection_started.elapsed(),
            last_frame_age: self.idle_for(),
        }
    }
}
