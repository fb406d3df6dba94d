//! Reassembly and parsing of inbound notification frames.

use bytes::BytesMut;
use chrono::Utc;

use super::frame::WsFrame;
use super::message::{NotificationMessage, WireMessage};
use super::types::DecodeError;

/// Accumulates fragments into logical messages and parses them into notifications.
///
/// The decoder never panics on bad input: every failure is reported as a [`DecodeError`] and the
/// partial buffer is discarded so the next message starts clean.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096.min(max_message_bytes)),
            max_message_bytes,
        }
    }

    /// Feed one transport frame.
    ///
    /// Returns `None` while a logical message is still incomplete and for frames without
    /// application payload (ping/pong/close).
    pub fn push(&mut self, frame: &WsFrame) -> Option<Result<NotificationMessage, DecodeError>> {
        let (payload, is_final) = match frame {
            WsFrame::Text(bytes) | WsFrame::Binary(bytes) => (bytes.as_ref(), true),
            WsFrame::Continuation(bytes) => (bytes.as_ref(), false),
            WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Close(_) => return None,
        };

        let len = self.buffer.len() + payload.len();
        if len > self.max_message_bytes {
            self.buffer.clear();
            return Some(Err(DecodeError::TooLarge {
                len,
                max: self.max_message_bytes,
            }));
        }
        self.buffer.extend_from_slice(payload);

        if !is_final {
            return None;
        }

        let result = Self::decode(&self.buffer);
        self.buffer.clear();
        Some(result)
    }

    /// Parse one complete logical message.
    pub fn decode(payload: &[u8]) -> Result<NotificationMessage, DecodeError> {
        let trimmed = payload.trim_ascii();
        if trimmed.first() != Some(&b'{') {
            return Err(DecodeError::NotAMessage);
        }
        let wire: WireMessage = sonic_rs::from_slice(trimmed)
            .map_err(|err| DecodeError::Malformed(err.to_string()))?;
        wire.into_message(Utc::now())
            .ok_or(DecodeError::NotAMessage)
    }

    /// Drop any partially accumulated message.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"{"id":1,"appid":2,"message":"hi","title":"t","priority":3,"date":"2024-01-01T00:00:00Z"}"#;

    #[test]
    fn reassembles_message_split_across_fragments() {
        let mut decoder = FrameDecoder::new(1024);
        let (head, tail) = SAMPLE.split_at(30);

        assert!(decoder.push(&WsFrame::continuation(head)).is_none());
        assert_eq!(decoder.pending_bytes(), 30);

        let msg = decoder
            .push(&WsFrame::text(tail))
            .expect("final fragment flushes")
            .expect("valid message");
        assert_eq!(msg.id(), 1);
        assert_eq!(msg.app_id(), 2);
        assert_eq!(msg.body(), "hi");
        assert_eq!(msg.title(), "t");
        assert_eq!(msg.priority(), 3);
        assert_eq!(
            msg.timestamp(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let msg = FrameDecoder::decode(br#"{"id":9,"extras":{"client::display":{}}}"#)
            .expect("id alone is enough");
        assert_eq!(msg.title(), "");
        assert_eq!(msg.body(), "");
        assert_eq!(msg.priority(), 0);
        assert_eq!(msg.app_id(), 0);
        assert!(msg.app_name().is_none());
    }

    #[test]
    fn offset_dates_are_normalized_to_utc() {
        let msg = FrameDecoder::decode(
            br#"{"id":3,"appid":1,"date":"2018-02-27T19:36:10.5045044+01:00"}"#,
        )
        .unwrap();
        assert_eq!(
            msg.timestamp().format("%H:%M:%S").to_string(),
            "18:36:10"
        );
    }

    #[test]
    fn wire_app_name_is_kept() {
        let msg = FrameDecoder::decode(br#"{"id":3,"appid":1,"appname":"backup"}"#).unwrap();
        assert_eq!(msg.app_name(), Some("backup"));
    }

    #[test]
    fn malformed_and_foreign_payloads_are_typed_errors() {
        assert!(matches!(
            FrameDecoder::decode(b"{\"id\":"),
            Err(DecodeError::Malformed(_))
        ));
        assert_eq!(FrameDecoder::decode(b"null"), Err(DecodeError::NotAMessage));
        assert_eq!(FrameDecoder::decode(b"[1,2]"), Err(DecodeError::NotAMessage));
        assert_eq!(
            FrameDecoder::decode(br#"{"type":"heartbeat"}"#),
            Err(DecodeError::NotAMessage)
        );
        assert!(matches!(
            FrameDecoder::decode(br#"{"id":"one"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn oversize_message_is_rejected_and_buffer_cleared() {
        let mut decoder = FrameDecoder::new(16);
        assert!(decoder.push(&WsFrame::continuation("0123456789")).is_none());
        let result = decoder.push(&WsFrame::continuation("0123456789"));
        assert_eq!(result, Some(Err(DecodeError::TooLarge { len: 20, max: 16 })));
        assert_eq!(decoder.pending_bytes(), 0);

        let ok = decoder.push(&WsFrame::text(r#"{"id":5}"#)).unwrap();
        assert_eq!(ok.unwrap().id(), 5);
    }

    #[test]
    fn control_frames_are_not_data() {
        let mut decoder = FrameDecoder::new(64);
        assert!(decoder.push(&WsFrame::Ping(Default::default())).is_none());
        assert!(decoder.push(&WsFrame::close(1000, "bye")).is_none());
    }
}
