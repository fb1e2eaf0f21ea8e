//! JSON-RPC transport over a child process's stdio.
//!
//! A [`Transport`] owns one child for its lifetime: `start()` spawns it
//! through a [`stdiorpc_host::HostBinding`], stdout is reassembled into
//! newline-delimited messages and handed to [`Callbacks`], and `close()`
//! or the child's exit ends the session for good.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stdiorpc_frame::Message;
//! use stdiorpc_host::{ProcessHost, SpawnParams};
//! use stdiorpc_transport::{Callbacks, Transport};
//!
//! # async fn run() -> stdiorpc_transport::Result<()> {
//! let host = Arc::new(ProcessHost::new());
//! let transport = Transport::new(host, SpawnParams::new("my-server").arg("--stdio"))
//!     .with_callbacks(Callbacks::new().on_message(|msg| println!("{msg:?}")));
//!
//! transport.start().await?;
//! transport.send(&Message::request(1, "ping", None)).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod error;
pub mod transport;

pub use callbacks::Callbacks;
pub use error::{Result, TransportError};
pub use transport::{Transport, TransportConfig, TransportState};
