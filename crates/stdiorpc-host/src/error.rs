use crate::binding::Handle;

/// Errors that can occur in host binding operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The child process could not be spawned.
    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    /// The handle does not refer to a live process.
    #[error("process {0} is not running")]
    NotRunning(Handle),

    /// A stdio pipe was not available after spawning.
    #[error("could not open {0} pipe")]
    Pipe(&'static str),

    /// Another live process already uses this name.
    #[error("process name '{0}' is already in use")]
    NameInUse(String),

    /// The event stream for this handle was already taken.
    #[error("process {0} already has a subscriber")]
    AlreadySubscribed(Handle),

    /// An I/O error occurred while talking to the process.
    #[error("host I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
