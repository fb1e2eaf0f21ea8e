use bytes::{Buf, BytesMut};
use tracing::debug;

use crate::codec::{decode, line_text, FrameConfig, DELIMITER};
use crate::error::{FrameError, Result};
use crate::message::Message;

/// Newline scanning state shared by [`LineBuffer`] and the async line codec.
///
/// Remembers how far the pending bytes were already searched so that a line
/// arriving one byte at a time is scanned once, not once per chunk.
#[derive(Debug, Clone, Default)]
pub(crate) struct LineScanner {
    next_index: usize,
    discarding: bool,
    max_line_length: Option<usize>,
}

impl LineScanner {
    pub(crate) fn new(config: &FrameConfig) -> Self {
        Self {
            next_index: 0,
            discarding: false,
            max_line_length: config.max_line_length,
        }
    }

    pub(crate) fn is_discarding(&self) -> bool {
        self.discarding
    }

    pub(crate) fn reset(&mut self) {
        self.next_index = 0;
        self.discarding = false;
    }

    /// Take the next complete line out of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched (apart from an overlong
    /// line being dropped) when no `\n` is pending.
    pub(crate) fn extract(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == DELIMITER)
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(idx)) => {
                    debug!(skipped = idx + 1, "resynchronized after overlong line");
                    src.advance(idx + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(idx)) => {
                    let line = src.split_to(idx + 1);
                    self.next_index = 0;
                    if let Some(max) = self.max_line_length {
                        if idx > max {
                            return Err(FrameError::LineTooLong { len: idx, max });
                        }
                    }
                    return Ok(Some(line_text(&line[..idx])));
                }
                (false, None) => {
                    if let Some(max) = self.max_line_length {
                        if src.len() > max {
                            let len = src.len();
                            debug!(len, max, "discarding overlong line");
                            src.clear();
                            self.next_index = 0;
                            self.discarding = true;
                            return Err(FrameError::LineTooLong { len, max });
                        }
                    }
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }
}

/// Incremental accumulator that turns arbitrary byte chunks into lines.
///
/// Chunks carry no alignment guarantee with line boundaries. Bytes are held
/// until their terminating `\n` arrives; when nothing is pending the backing
/// allocation is released.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    scanner: LineScanner,
    config: FrameConfig,
}

impl LineBuffer {
    /// Create an empty buffer with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create an empty buffer with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::new(),
            scanner: LineScanner::new(&config),
            config,
        }
    }

    /// Concatenate a chunk onto the pending tail.
    pub fn append(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete line, without its terminator.
    ///
    /// A trailing `\r` is stripped. `Ok(None)` means no `\n` is pending yet.
    /// A [`FrameError::LineTooLong`] only affects the offending line; keep
    /// extracting afterwards.
    pub fn extract_frame(&mut self) -> Result<Option<String>> {
        let result = self.scanner.extract(&mut self.buf);
        self.release_if_empty();
        result
    }

    /// Extract and decode the next complete line.
    ///
    /// An empty line decodes as [`FrameError::MalformedFrame`]: at the byte
    /// level it cannot be told apart from a corrupt one.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        match self.extract_frame()? {
            Some(line) => decode(&line).map(Some),
            None => Ok(None),
        }
    }

    /// Drain every complete line currently pending, decoding each one.
    ///
    /// A failure on one line does not stop the iteration.
    pub fn messages(&mut self) -> Messages<'_> {
        Messages { buffer: self }
    }

    /// Drop all pending bytes.
    pub fn clear(&mut self) {
        self.buf = BytesMut::new();
        self.scanner.reset();
    }

    /// Number of bytes pending.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes currently reserved for pending data.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Current buffer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn release_if_empty(&mut self) {
        if self.buf.is_empty() && self.buf.capacity() > 0 {
            self.buf = BytesMut::new();
        }
    }
}

/// Iterator returned by [`LineBuffer::messages`].
pub struct Messages<'a> {
    buffer: &'a mut LineBuffer,
}

impl Iterator for Messages<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.next_message().transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::encode;

    fn wire(messages: &[Message]) -> Vec<u8> {
        messages
            .iter()
            .flat_map(|m| encode(m).unwrap().into_bytes())
            .collect()
    }

    fn sample() -> Vec<Message> {
        vec![
            Message::request(1, "initialize", Some(json!({"protocolVersion": "2024-11-05"}))),
            Message::notification("notifications/initialized", None),
            Message::response(1, json!({"capabilities": {}})),
            Message::notification("log", Some(json!({"text": "ünïcödé ✓"}))),
        ]
    }

    fn collect(buffer: &mut LineBuffer) -> Vec<Message> {
        buffer.messages().map(|m| m.unwrap()).collect()
    }

    #[test]
    fn single_chunk_yields_every_frame_in_order() {
        let messages = sample();
        let mut buffer = LineBuffer::new();
        buffer.append(&wire(&messages));

        assert_eq!(collect(&mut buffer), messages);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn every_two_way_split_yields_same_frames() {
        let messages = sample();
        let bytes = wire(&messages);

        for split in 1..bytes.len() {
            let mut buffer = LineBuffer::new();
            let mut out = Vec::new();
            buffer.append(&bytes[..split]);
            out.extend(collect(&mut buffer));
            buffer.append(&bytes[split..]);
            out.extend(collect(&mut buffer));
            assert_eq!(out, messages, "split at {split}");
        }
    }

    #[test]
    fn byte_by_byte_delivery() {
        let messages = sample();
        let mut buffer = LineBuffer::new();
        let mut out = Vec::new();
        for byte in wire(&messages) {
            buffer.append(&[byte]);
            out.extend(collect(&mut buffer));
        }
        assert_eq!(out, messages);
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_frame_is_retained() {
        let mut buffer = LineBuffer::new();
        buffer.append(br#"{"jsonrpc":"2.0","method":"a"}"#);
        assert!(buffer.extract_frame().unwrap().is_none());
        assert_eq!(buffer.len(), 30);

        buffer.append(b"\n");
        let line = buffer.extract_frame().unwrap().unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","method":"a"}"#);
        assert!(buffer.extract_frame().unwrap().is_none());
    }

    #[test]
    fn partial_object_then_newline() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"{\"a\":1}");
        assert!(buffer.extract_frame().unwrap().is_none());
        buffer.append(b"\n");
        assert_eq!(buffer.extract_frame().unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn crlf_terminated_lines_decode_the_same() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\r\n");
        let msg = buffer.next_message().unwrap().unwrap();
        assert_eq!(msg, Message::request(1, "ping", None));
    }

    #[test]
    fn carriage_return_split_from_newline() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\r");
        assert!(buffer.next_message().unwrap().is_none());
        buffer.append(b"\n");
        assert_eq!(
            buffer.next_message().unwrap().unwrap(),
            Message::notification("ping", None)
        );
    }

    #[test]
    fn malformed_line_does_not_stop_drain() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"not json\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n");

        let results: Vec<_> = buffer.messages().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FrameError::MalformedFrame { .. })));
        assert_eq!(
            results[1].as_ref().unwrap(),
            &Message::notification("ping", None)
        );
    }

    #[test]
    fn empty_line_is_malformed() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"\n\n");
        assert_eq!(buffer.extract_frame().unwrap().as_deref(), Some(""));
        assert!(matches!(
            buffer.next_message(),
            Err(FrameError::MalformedFrame { .. })
        ));
        assert!(buffer.next_message().unwrap().is_none());
    }

    #[test]
    fn invalid_utf8_surfaces_as_malformed() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"\xff\xfe\n");
        assert!(matches!(
            buffer.next_message(),
            Err(FrameError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn clear_drops_pending_bytes() {
        let mut buffer = LineBuffer::new();
        buffer.append(b"{\"partial\":");
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.append(b"{\"jsonrpc\":\"2.0\",\"method\":\"x\"}\n");
        assert_eq!(
            buffer.next_message().unwrap().unwrap(),
            Message::notification("x", None)
        );
    }

    #[test]
    fn overlong_pending_line_is_discarded_until_newline() {
        let mut buffer = LineBuffer::with_config(FrameConfig::with_max_line_length(8));
        buffer.append(b"0123456789");
        let err = buffer.extract_frame().unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { len: 10, max: 8 }));
        assert!(buffer.is_empty());

        buffer.append(b"still the same line\n{\"a\":1}\n");
        assert_eq!(buffer.extract_frame().unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(buffer.extract_frame().unwrap().is_none());
    }

    #[test]
    fn overlong_complete_line_is_skipped() {
        let mut buffer = LineBuffer::with_config(FrameConfig::with_max_line_length(4));
        buffer.append(b"abcdefgh\nok\n");
        assert!(matches!(
            buffer.extract_frame(),
            Err(FrameError::LineTooLong { len: 8, max: 4 })
        ));
        assert_eq!(buffer.extract_frame().unwrap().as_deref(), Some("ok"));
    }
}
