use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque identifier of one spawned process.
///
/// Unique within the host that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u64);

impl Handle {
    /// Wrap a host-assigned id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// What to run: command, arguments and extra environment.
///
/// Deserializes from the usual stdio server configuration shape, e.g.
/// `{"command": "node", "args": ["server.js"], "env": {"DEBUG": "1"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Added on top of the supervisor's own environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory; inherited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Optional unique name among live processes of one host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SpawnParams {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Notification emitted by a host for one process.
///
/// A host delivers either `Stdout` chunks or pre-split `Line`s, depending on
/// how it reads the child's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// Raw stdout bytes with no alignment to line boundaries.
    Stdout(Bytes),
    /// One complete stdout line, terminator removed.
    Line(String),
    /// Raw stderr bytes.
    Stderr(Bytes),
    /// The process exited; `None` when it was ended by a signal.
    Exit(Option<i32>),
}

impl Event {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Stdout(_) => "stdout",
            Event::Line(_) => "line",
            Event::Stderr(_) => "stderr",
            Event::Exit(_) => "exit",
        }
    }
}

/// Event stream for one process handle.
///
/// Dropping the subscription unsubscribes; the host keeps draining the
/// child's output without delivering it.
#[derive(Debug)]
pub struct Subscription {
    handle: Handle,
    events: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Wrap the receiving side of a host's event channel.
    pub fn new(handle: Handle, events: mpsc::Receiver<Event>) -> Self {
        Self { handle, events }
    }

    /// The handle this subscription belongs to.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Wait for the next event. `None` once the host has nothing more to send.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.events.poll_recv(cx)
    }
}

/// Process primitives a transport needs from its runtime.
///
/// Implementations own the handle-to-process table: an entry is inserted by
/// `spawn` and removed on exit or `kill`.
pub trait HostBinding: Send + Sync + 'static {
    /// Start a child process with piped stdio.
    fn spawn(&self, params: &SpawnParams) -> impl Future<Output = Result<Handle>> + Send;

    /// Write one payload to the child's stdin.
    fn write(&self, handle: &Handle, payload: &str) -> impl Future<Output = Result<()>> + Send;

    /// Request termination. Best-effort: callers must not depend on success.
    fn kill(&self, handle: &Handle) -> impl Future<Output = Result<()>> + Send;

    /// Take the event stream for `handle`. Events emitted before this call are
    /// queued, not lost.
    fn subscribe(&self, handle: &Handle) -> impl Future<Output = Result<Subscription>> + Send;
}
