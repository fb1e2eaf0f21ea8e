//! JSON-RPC 2.0 over the stdin/stdout of a child process.
//!
//! The usual client-to-local-server setup: spawn the server, write one JSON
//! line per message to its stdin, read one JSON line per message from its
//! stdout, treat stderr as diagnostics.
//!
//! # Crate Structure
//!
//! - [`frame`]: message model, line codec and reassembly buffer
//! - [`host`]: process host contract and the tokio implementation
//! - [`transport`]: the lifecycle-managed transport built on both
//! - `logging`: tracing subscriber setup (behind the `logging` feature)

/// Re-export frame types.
pub mod frame {
    pub use stdiorpc_frame::*;
}

/// Re-export host binding types.
pub mod host {
    pub use stdiorpc_host::*;
}

/// Re-export transport types.
pub mod transport {
    pub use stdiorpc_transport::*;
}

#[cfg(feature = "logging")]
pub mod logging;

pub use stdiorpc_frame::Message;
pub use stdiorpc_host::{ProcessHost, SpawnParams};
pub use stdiorpc_transport::{Callbacks, Transport, TransportError, TransportState};
