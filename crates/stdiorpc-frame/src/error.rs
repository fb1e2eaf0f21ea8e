/// Errors that can occur during line framing and JSON-RPC decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A line is not valid JSON or does not match any JSON-RPC envelope.
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// Pending bytes exceeded the configured line limit before a newline arrived.
    #[error("line too long ({len} bytes, max {max})")]
    LineTooLong { len: usize, max: usize },

    /// Serializing an outbound message failed.
    #[error("frame encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// An I/O error surfaced through the async line codec.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
