use std::fmt;

use stdiorpc_frame::Message;
use tracing::warn;

use crate::error::TransportError;

type MessageFn = dyn Fn(Message) + Send + Sync;
type ErrorFn = dyn Fn(TransportError) + Send + Sync;
type CloseFn = dyn Fn() + Send + Sync;
type StderrFn = dyn Fn(&str) + Send + Sync;

/// User hooks invoked by a [`crate::Transport`].
///
/// Hooks run on the transport's dispatch task (or inside `close()`), never
/// while transport state is locked, so they may call back into the
/// transport. They should not block.
#[derive(Default)]
pub struct Callbacks {
    on_message: Option<Box<MessageFn>>,
    on_error: Option<Box<ErrorFn>>,
    on_close: Option<Box<CloseFn>>,
    on_stderr: Option<Box<StderrFn>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per decoded message, in arrival order.
    pub fn on_message(mut self, f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Called for frame errors and for kill failures during `close()`.
    pub fn on_error(mut self, f: impl Fn(TransportError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called exactly once when the session ends, by `close()` or child exit.
    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    /// Called with each stderr chunk as text.
    pub fn on_stderr(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stderr = Some(Box::new(f));
        self
    }

    pub(crate) fn message(&self, message: Message) {
        if let Some(f) = &self.on_message {
            f(message);
        }
    }

    pub(crate) fn error(&self, err: TransportError) {
        match &self.on_error {
            Some(f) => f(err),
            None => warn!(error = %err, "unhandled transport error"),
        }
    }

    pub(crate) fn close(&self) {
        if let Some(f) = &self.on_close {
            f();
        }
    }

    pub(crate) fn stderr(&self, text: &str) {
        if let Some(f) = &self.on_stderr {
            f(text);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .finish()
    }
}
