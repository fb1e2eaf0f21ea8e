use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::buffer::LineScanner;
use crate::codec::{encode_into, line_text, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Message;

/// `tokio_util` codec for newline-delimited text.
///
/// Decoding splits a byte stream into lines with the same newline and `\r`
/// rules as [`crate::LineBuffer`]; at end of stream a final unterminated line
/// is still yielded. Encoding writes one [`Message`] per line.
#[derive(Debug, Clone, Default)]
pub struct LineCodec {
    scanner: LineScanner,
}

impl LineCodec {
    /// Create a codec with no line length cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            scanner: LineScanner::new(&config),
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        self.scanner.extract(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() || self.scanner.is_discarding() {
            src.clear();
            return Ok(None);
        }
        let rest = src.split();
        self.scanner.reset();
        Ok(Some(line_text(&rest)))
    }
}

impl Encoder<&Message> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<()> {
        encode_into(item, dst)
    }
}
