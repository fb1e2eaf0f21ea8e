//! Host binding for supervised child processes.
//!
//! Defines what a transport needs from its runtime:
//! - spawn a process from a command, argument list and environment
//! - write raw payloads to its stdin
//! - kill it by handle
//! - subscribe to its stdout, stderr and exit notifications
//!
//! [`ProcessHost`] implements the contract on top of `tokio::process`.

pub mod binding;
pub mod error;
pub mod process;

pub use binding::{Event, Handle, HostBinding, SpawnParams, Subscription};
pub use error::{HostError, Result};
pub use process::{HostConfig, OutputMode, ProcessHost};
