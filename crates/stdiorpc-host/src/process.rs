use std::borrow::Cow;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use stdiorpc_frame::LineCodec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::binding::{Event, Handle, HostBinding, SpawnParams, Subscription};
use crate::error::{HostError, Result};

const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;
const DEFAULT_EVENT_CAPACITY: usize = 64;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How the host reads a child's stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Deliver raw chunks as [`Event::Stdout`]; the consumer reassembles lines.
    #[default]
    Chunks,
    /// Split lines here and deliver [`Event::Line`].
    Lines,
}

/// Configuration for [`ProcessHost`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Stdout delivery mode.
    pub output: OutputMode,
    /// Maximum bytes read from a pipe per chunk.
    pub read_chunk_size: usize,
    /// Events buffered per process before the child is back-pressured.
    pub event_capacity: usize,
    /// Kill live children when the host is dropped.
    pub kill_on_drop: bool,
    /// How long to wait for stdout/stderr EOF after the child exited.
    pub drain_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            output: OutputMode::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            kill_on_drop: true,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

type KillReply = oneshot::Sender<std::io::Result<()>>;
type ProcessTable = Arc<Mutex<HashMap<Handle, ManagedProcess>>>;

struct ManagedProcess {
    name: Option<String>,
    pid: Option<u32>,
    running: bool,
    stdin: Option<Arc<Mutex<ChildStdin>>>,
    kill: Option<oneshot::Sender<KillReply>>,
    events: Option<mpsc::Receiver<Event>>,
}

/// Host binding backed by tokio child processes.
///
/// Each spawned child gets three background tasks: a stdout pump, a stderr
/// pump and a supervisor that waits for exit (or a kill request) and emits
/// [`Event::Exit`] once both pipes reached EOF.
pub struct ProcessHost {
    processes: ProcessTable,
    next_id: AtomicU64,
    config: HostConfig,
}

impl ProcessHost {
    /// Create a host with default configuration (raw stdout chunks).
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    /// Create a host with explicit configuration.
    pub fn with_config(config: HostConfig) -> Self {
        Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Current host configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// OS process id of a live child.
    pub async fn pid(&self, handle: &Handle) -> Option<u32> {
        let table = self.processes.lock().await;
        table
            .get(handle)
            .filter(|process| process.running)
            .and_then(|process| process.pid)
    }

    /// True while the child behind `handle` has not exited.
    pub async fn is_running(&self, handle: &Handle) -> bool {
        let table = self.processes.lock().await;
        table.get(handle).is_some_and(|process| process.running)
    }
}

impl Default for ProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBinding for ProcessHost {
    async fn spawn(&self, params: &SpawnParams) -> Result<Handle> {
        let mut table = self.processes.lock().await;

        if let Some(name) = &params.name {
            let taken = table
                .values()
                .any(|process| process.running && process.name.as_ref() == Some(name));
            if taken {
                return Err(HostError::NameInUse(name.clone()));
            }
        }

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .envs(&params.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(self.config.kill_on_drop);
        if let Some(cwd) = &params.cwd {
            cmd.current_dir(cwd);
        }
        // CREATE_NO_WINDOW
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000);

        let mut child = cmd.spawn().map_err(|source| HostError::SpawnFailed {
            command: params.command.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(HostError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(HostError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(HostError::Pipe("stderr"))?;
        let pid = child.id();

        let handle = Handle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity.max(1));
        let (kill_tx, kill_rx) = oneshot::channel();

        let stdout_task = tokio::spawn(pump_stdout(
            stdout,
            self.config.output,
            self.config.read_chunk_size,
            event_tx.clone(),
            handle.clone(),
        ));
        let stderr_task = tokio::spawn(pump_chunks(
            stderr,
            self.config.read_chunk_size,
            event_tx.clone(),
            Event::Stderr,
            handle.clone(),
            "stderr",
        ));
        tokio::spawn(supervise(
            child,
            kill_rx,
            [stdout_task, stderr_task],
            self.config.drain_timeout,
            event_tx,
            Arc::clone(&self.processes),
            handle.clone(),
        ));

        table.insert(
            handle.clone(),
            ManagedProcess {
                name: params.name.clone(),
                pid,
                running: true,
                stdin: Some(Arc::new(Mutex::new(stdin))),
                kill: Some(kill_tx),
                events: Some(event_rx),
            },
        );

        info!(
            handle = %handle,
            pid = ?pid,
            command = %params.command,
            "spawned child process"
        );
        Ok(handle)
    }

    async fn write(&self, handle: &Handle, payload: &str) -> Result<()> {
        let stdin = {
            let table = self.processes.lock().await;
            table
                .get(handle)
                .filter(|process| process.running)
                .and_then(|process| process.stdin.clone())
                .ok_or_else(|| HostError::NotRunning(handle.clone()))?
        };

        let line = if payload.ends_with('\n') {
            Cow::Borrowed(payload)
        } else {
            Cow::Owned(format!("{payload}\n"))
        };

        let mut stdin = stdin.lock().await;
        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        result.map_err(|err| match err.kind() {
            ErrorKind::BrokenPipe => HostError::NotRunning(handle.clone()),
            _ => HostError::Io(err),
        })
    }

    async fn kill(&self, handle: &Handle) -> Result<()> {
        let process = {
            let mut table = self.processes.lock().await;
            table
                .remove(handle)
                .ok_or_else(|| HostError::NotRunning(handle.clone()))?
        };

        if !process.running {
            debug!(handle = %handle, "kill after exit; entry released");
            return Ok(());
        }

        let kill = process
            .kill
            .ok_or_else(|| HostError::NotRunning(handle.clone()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        kill.send(reply_tx)
            .map_err(|_| HostError::NotRunning(handle.clone()))?;

        match reply_rx.await {
            Ok(Ok(())) => {
                info!(handle = %handle, "killed child process");
                Ok(())
            }
            Ok(Err(err)) => Err(HostError::Io(err)),
            // Supervisor saw the exit before the kill request.
            Err(_) => Ok(()),
        }
    }

    async fn subscribe(&self, handle: &Handle) -> Result<Subscription> {
        let mut table = self.processes.lock().await;
        let process = table
            .get_mut(handle)
            .ok_or_else(|| HostError::NotRunning(handle.clone()))?;
        let events = process
            .events
            .take()
            .ok_or_else(|| HostError::AlreadySubscribed(handle.clone()))?;
        if !process.running {
            table.remove(handle);
        }
        debug!(handle = %handle, "subscribed to process events");
        Ok(Subscription::new(handle.clone(), events))
    }
}

impl Drop for ProcessHost {
    fn drop(&mut self) {
        if !self.config.kill_on_drop {
            return;
        }
        let Ok(mut table) = self.processes.try_lock() else {
            warn!("process table busy on host drop; live children were not killed");
            return;
        };
        for (handle, process) in table.drain() {
            if let (true, Some(kill)) = (process.running, process.kill) {
                debug!(handle = %handle, "killing child on host drop");
                let (reply_tx, _reply_rx) = oneshot::channel();
                let _ = kill.send(reply_tx);
            }
        }
    }
}

async fn pump_stdout(
    stdout: ChildStdout,
    mode: OutputMode,
    chunk_size: usize,
    events: mpsc::Sender<Event>,
    handle: Handle,
) {
    match mode {
        OutputMode::Chunks => {
            pump_chunks(stdout, chunk_size, events, Event::Stdout, handle, "stdout").await
        }
        OutputMode::Lines => pump_lines(stdout, events, handle).await,
    }
}

async fn pump_lines(stdout: ChildStdout, events: mpsc::Sender<Event>, handle: Handle) {
    let mut lines = FramedRead::new(stdout, LineCodec::new());
    let mut subscribed = true;
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if subscribed && events.send(Event::Line(line)).await.is_err() {
                    subscribed = false;
                }
            }
            Err(err) => {
                warn!(handle = %handle, error = %err, "stdout read failed");
                break;
            }
        }
    }
    debug!(handle = %handle, stream = "stdout", "stream closed");
}

async fn pump_chunks<R: AsyncRead + Unpin>(
    mut reader: R,
    chunk_size: usize,
    events: mpsc::Sender<Event>,
    wrap: fn(Bytes) -> Event,
    handle: Handle,
    stream: &'static str,
) {
    let chunk_size = chunk_size.max(1);
    let mut buf = BytesMut::with_capacity(chunk_size);
    let mut subscribed = true;
    loop {
        buf.reserve(chunk_size);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let chunk = buf.split().freeze();
                if subscribed && events.send(wrap(chunk)).await.is_err() {
                    // Keep draining so the child never blocks on a full pipe.
                    subscribed = false;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(handle = %handle, stream, error = %err, "pipe read failed");
                break;
            }
        }
    }
    debug!(handle = %handle, stream, "stream closed");
}

async fn supervise(
    mut child: Child,
    kill: oneshot::Receiver<KillReply>,
    pumps: [JoinHandle<()>; 2],
    drain_timeout: Duration,
    events: mpsc::Sender<Event>,
    processes: ProcessTable,
    handle: Handle,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        request = kill => match request {
            Ok(reply) => {
                let result = child.kill().await;
                let status = child.wait().await;
                let _ = reply.send(result);
                status
            }
            Err(_) => child.wait().await,
        },
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(handle = %handle, error = %err, "failed to reap child process");
            None
        }
    };

    for mut pump in pumps {
        if tokio::time::timeout(drain_timeout, &mut pump).await.is_err() {
            debug!(handle = %handle, "pipe still open after exit; abandoning reader");
            pump.abort();
        }
    }

    {
        let mut table = processes.lock().await;
        if let Some(process) = table.get_mut(&handle) {
            process.running = false;
            process.stdin = None;
            process.kill = None;
            if process.events.is_none() {
                table.remove(&handle);
            }
        }
    }

    info!(handle = %handle, code = ?code, "child process exited");
    let _ = events.send(Event::Exit(code)).await;
}
