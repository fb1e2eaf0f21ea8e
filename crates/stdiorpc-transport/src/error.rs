/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `start()` was called on a transport that was already started.
    #[error("transport already started")]
    AlreadyStarted,

    /// The operation needs a running session.
    #[error("transport not started")]
    NotStarted,

    /// Host binding failure (spawn, write, kill).
    #[error("host error: {0}")]
    Host(#[from] stdiorpc_host::HostError),

    /// Frame-level error (malformed line, line too long).
    #[error("frame error: {0}")]
    Frame(#[from] stdiorpc_frame::FrameError),
}

impl TransportError {
    /// True for errors caused by calling an operation in the wrong state.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::AlreadyStarted | Self::NotStarted)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
