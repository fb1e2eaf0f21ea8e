use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, BytesMut};
use stdiorpc_frame::{decode, encode, FrameConfig, LineBuffer, Message};
use stdiorpc_host::{Event, Handle, HostBinding, SpawnParams, Subscription};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::callbacks::Callbacks;
use crate::error::{Result, TransportError};

/// Transport behavior configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Line framing for raw stdout chunks.
    pub frame: FrameConfig,
    /// Log child stderr through `tracing` in addition to the stderr callback.
    pub log_stderr: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            log_stderr: true,
        }
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Constructed, not started.
    Idle,
    /// `start()` is waiting for the host to spawn the child.
    Starting,
    /// Child running; sends are accepted.
    Active,
    /// Terminal. Construct a new transport to run the child again.
    Closed,
}

struct ActiveSession {
    handle: Handle,
    buffer: LineBuffer,
    /// Trailing bytes of a UTF-8 sequence split across stderr chunks.
    stderr: BytesMut,
    dispatch: CancellationToken,
}

enum Session {
    Idle,
    Starting,
    Active(ActiveSession),
    Closed,
}

impl Session {
    fn state(&self) -> TransportState {
        match self {
            Session::Idle => TransportState::Idle,
            Session::Starting => TransportState::Starting,
            Session::Active(_) => TransportState::Active,
            Session::Closed => TransportState::Closed,
        }
    }
}

type SharedSession = Arc<Mutex<Session>>;

/// Held while a user callback runs for the session, and by `close()` before
/// it fires `on_close`, so no callback can follow `on_close`.
type DeliveryGate = Arc<AsyncMutex<()>>;

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// JSON-RPC transport bound to one child process.
///
/// Lifecycle is `Idle → Active → Closed`, one way. Inbound messages arrive
/// through [`Callbacks`]; outbound messages go through [`Transport::send`].
pub struct Transport<H: HostBinding> {
    host: Arc<H>,
    params: SpawnParams,
    config: TransportConfig,
    callbacks: Arc<Callbacks>,
    session: SharedSession,
    delivery: DeliveryGate,
}

impl<H: HostBinding> Transport<H> {
    /// Create an idle transport that will run `params` on `host`.
    pub fn new(host: Arc<H>, params: SpawnParams) -> Self {
        Self::with_config(host, params, TransportConfig::default())
    }

    /// Create an idle transport with explicit configuration.
    pub fn with_config(host: Arc<H>, params: SpawnParams, config: TransportConfig) -> Self {
        Self {
            host,
            params,
            config,
            callbacks: Arc::new(Callbacks::default()),
            session: Arc::new(Mutex::new(Session::Idle)),
            delivery: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Install user callbacks. Takes effect for the next `start()`.
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = Arc::new(callbacks);
        self
    }

    /// Spawn the child and begin dispatching its output.
    ///
    /// Resolves once the host has a handle, not once the child writes
    /// anything. Fails with [`TransportError::AlreadyStarted`] unless idle.
    /// A failed spawn leaves the transport idle.
    pub async fn start(&self) -> Result<()> {
        {
            let mut session = lock(&self.session);
            match *session {
                Session::Idle => *session = Session::Starting,
                _ => return Err(TransportError::AlreadyStarted),
            }
        }
        let mut guard = StartGuard {
            session: &self.session,
            armed: true,
        };

        let (handle, subscription) = self.spawn_and_subscribe().await?;

        let dispatch = CancellationToken::new();
        {
            let mut session = lock(&self.session);
            *session = Session::Active(ActiveSession {
                handle: handle.clone(),
                buffer: LineBuffer::with_config(self.config.frame.clone()),
                stderr: BytesMut::new(),
                dispatch: dispatch.clone(),
            });
        }
        guard.armed = false;

        let dispatcher = Dispatcher {
            session: Arc::clone(&self.session),
            callbacks: Arc::clone(&self.callbacks),
            delivery: Arc::clone(&self.delivery),
            handle: handle.clone(),
            log_stderr: self.config.log_stderr,
        };
        tokio::spawn(dispatcher.run(subscription, dispatch));

        info!(handle = %handle, command = %self.params.command, "transport started");
        Ok(())
    }

    async fn spawn_and_subscribe(&self) -> Result<(Handle, Subscription)> {
        let handle = self.host.spawn(&self.params).await?;
        match self.host.subscribe(&handle).await {
            Ok(subscription) => Ok((handle, subscription)),
            Err(err) => {
                if let Err(kill_err) = self.host.kill(&handle).await {
                    warn!(handle = %handle, error = %kill_err, "failed to kill unsubscribed child");
                }
                Err(err.into())
            }
        }
    }

    /// Encode `message` and write it to the child's stdin as one payload.
    ///
    /// Fails with [`TransportError::NotStarted`] unless active.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let handle = self.active_handle()?;
        let payload = encode(message)?;
        trace!(handle = %handle, kind = message.kind(), bytes = payload.len(), "sending message");
        self.host.write(&handle, &payload).await?;
        Ok(())
    }

    /// Kill the child and end the session.
    ///
    /// Local state becomes [`TransportState::Closed`] even when the kill
    /// request fails; that failure goes to the error callback. Fails with
    /// [`TransportError::NotStarted`] unless active, including after the
    /// child already exited.
    pub async fn close(&self) -> Result<()> {
        let active = {
            let mut session = lock(&self.session);
            match std::mem::replace(&mut *session, Session::Closed) {
                Session::Active(active) => active,
                other => {
                    *session = other;
                    return Err(TransportError::NotStarted);
                }
            }
        };
        active.dispatch.cancel();
        if !active.buffer.is_empty() {
            debug!(
                handle = %active.handle,
                bytes = active.buffer.len(),
                "discarding unterminated output on close"
            );
        }
        debug!(handle = %active.handle, "closing transport");

        if let Err(err) = self.host.kill(&active.handle).await {
            warn!(handle = %active.handle, error = %err, "failed to kill child process");
            self.callbacks.error(TransportError::Host(err));
        }

        // Wait out a callback the dispatcher may be running right now.
        let _gate = self.delivery.lock().await;
        info!(handle = %active.handle, "transport closed");
        self.callbacks.close();
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransportState {
        lock(&self.session).state()
    }

    /// Handle of the running child, while active.
    pub fn handle(&self) -> Option<Handle> {
        match &*lock(&self.session) {
            Session::Active(active) => Some(active.handle.clone()),
            _ => None,
        }
    }

    /// What this transport runs.
    pub fn params(&self) -> &SpawnParams {
        &self.params
    }

    /// The host binding in use.
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    fn active_handle(&self) -> Result<Handle> {
        self.handle().ok_or(TransportError::NotStarted)
    }
}

impl<H: HostBinding> Drop for Transport<H> {
    fn drop(&mut self) {
        if let Session::Active(active) = &*lock(&self.session) {
            active.dispatch.cancel();
        }
    }
}

impl<H: HostBinding> std::fmt::Debug for Transport<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("command", &self.params.command)
            .field("state", &self.state())
            .field("config", &self.config)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Puts a `Starting` session back to `Idle` if `start()` fails or is dropped
/// before the child is running.
struct StartGuard<'a> {
    session: &'a Mutex<Session>,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut session = lock(self.session);
            if matches!(*session, Session::Starting) {
                *session = Session::Idle;
            }
        }
    }
}

/// Routes host events for one session into the callbacks.
struct Dispatcher {
    session: SharedSession,
    callbacks: Arc<Callbacks>,
    delivery: DeliveryGate,
    handle: Handle,
    log_stderr: bool,
}

impl Dispatcher {
    async fn run(self, mut subscription: Subscription, dispatch: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = dispatch.cancelled() => break,
                event = subscription.recv() => event,
            };

            match event {
                Some(Event::Stdout(chunk)) => self.on_stdout(&chunk).await,
                Some(Event::Line(line)) => self.on_line(line).await,
                Some(Event::Stderr(chunk)) => self.on_stderr(&chunk).await,
                Some(Event::Exit(code)) => {
                    self.on_exit(code).await;
                    break;
                }
                None => {
                    debug!(handle = %self.handle, "event stream ended without exit");
                    self.on_exit(None).await;
                    break;
                }
            }
        }
        debug!(handle = %self.handle, "dispatch stopped");
    }

    async fn on_stdout(&self, chunk: &[u8]) {
        let decoded: Vec<_> = {
            let mut session = lock(&self.session);
            let Session::Active(active) = &mut *session else {
                return;
            };
            active.buffer.append(chunk);
            active.buffer.messages().collect()
        };

        for result in decoded {
            let _gate = self.delivery.lock().await;
            if !self.is_active() {
                trace!(handle = %self.handle, "session ended; dropping decoded frames");
                return;
            }
            match result {
                Ok(message) => self.deliver(message),
                Err(err) => self.reject(err.into()),
            }
        }
    }

    async fn on_line(&self, line: String) {
        if line.is_empty() {
            trace!(handle = %self.handle, "skipping empty line");
            return;
        }
        let decoded = decode(&line);
        let _gate = self.delivery.lock().await;
        if !self.is_active() {
            return;
        }
        match decoded {
            Ok(message) => self.deliver(message),
            Err(err) => self.reject(err.into()),
        }
    }

    async fn on_stderr(&self, chunk: &[u8]) {
        let _gate = self.delivery.lock().await;
        let text = {
            let mut session = lock(&self.session);
            let Session::Active(active) = &mut *session else {
                return;
            };
            active.stderr.extend_from_slice(chunk);
            let complete = complete_utf8_len(&active.stderr);
            let text = String::from_utf8_lossy(&active.stderr[..complete]).into_owned();
            active.stderr.advance(complete);
            text
        };
        self.emit_stderr(&text);
    }

    fn emit_stderr(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.log_stderr {
            info!(handle = %self.handle, stderr = %text.trim_end(), "child stderr");
        }
        self.callbacks.stderr(text);
    }

    async fn on_exit(&self, code: Option<i32>) {
        let _gate = self.delivery.lock().await;
        let ended = {
            let mut session = lock(&self.session);
            match std::mem::replace(&mut *session, Session::Closed) {
                Session::Active(active) => Some(active),
                other => {
                    *session = other;
                    None
                }
            }
        };

        let Some(active) = ended else {
            return;
        };
        if !active.buffer.is_empty() {
            debug!(
                handle = %self.handle,
                bytes = active.buffer.len(),
                "discarding unterminated output on exit"
            );
        }
        self.emit_stderr(&String::from_utf8_lossy(&active.stderr));
        info!(handle = %self.handle, code = ?code, "child exited; transport closed");
        self.callbacks.close();
    }

    fn deliver(&self, message: Message) {
        trace!(handle = %self.handle, kind = message.kind(), "dispatching message");
        self.callbacks.message(message);
    }

    fn reject(&self, err: TransportError) {
        warn!(handle = %self.handle, error = %err, "dropping undecodable frame");
        self.callbacks.error(err);
    }

    fn is_active(&self) -> bool {
        matches!(*lock(&self.session), Session::Active(_))
    }
}

/// Length of the prefix of `bytes` that does not end inside a UTF-8
/// sequence. Invalid bytes count as complete; lossy decoding replaces them.
fn complete_utf8_len(bytes: &[u8]) -> usize {
    let tail_start = bytes.len().saturating_sub(3);
    for idx in (tail_start..bytes.len()).rev() {
        let byte = bytes[idx];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return bytes.len(),
        };
        return if bytes.len() - idx < width {
            idx
        } else {
            bytes.len()
        };
    }
    bytes.len()
}
