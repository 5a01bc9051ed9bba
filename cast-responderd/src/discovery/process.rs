use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use shared::protocol::{ControlRequest, ServiceMessage};
use crate::discovery::{DiscoveryService, LaunchArgs};
use crate::dispatcher::EventDispatcher;

/// How long a stopped instance gets to exit on its own before it is killed
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Control requests waiting for the child to read its stdin
const REQUEST_QUEUE_CAPACITY: usize = 64;

struct Session {
    pid: Option<u32>,
    stdin_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    exited: Arc<AtomicBool>,
    protocol_version: Arc<Mutex<Option<String>>>,
}

/// Runs the discovery service as a child process speaking line-delimited
/// JSON: control requests on stdin, events on stdout.
pub struct ProcessDiscoveryService {
    program: PathBuf,
    dispatcher: EventDispatcher,
    session: Option<Session>,
}

impl ProcessDiscoveryService {
    pub fn new(program: PathBuf, dispatcher: EventDispatcher) -> Self {
        Self {
            program,
            dispatcher,
            session: None,
        }
    }
}

impl DiscoveryService for ProcessDiscoveryService {
    fn start(&mut self, args: &LaunchArgs) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.stop();

        let argv = args.to_argv();
        tracing::info!("Starting discovery service: {} {}", self.program.display(), argv.join(" "));

        let mut child = Command::new(&self.program)
            .args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        let stdin = child.stdin.take().context("discovery service stdin not captured")?;
        let stdout = child.stdout.take().context("discovery service stdout not captured")?;
        let pid = child.id();
        tracing::info!("Discovery service started with PID: {:?}", pid);

        let cancel = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));
        let protocol_version = Arc::new(Mutex::new(None));
        let (stdin_tx, stdin_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);

        tokio::spawn(write_requests(stdin, stdin_rx, cancel.clone()));
        tokio::spawn(read_messages(
            stdout,
            self.dispatcher.clone(),
            protocol_version.clone(),
            cancel.clone(),
        ));
        tokio::spawn(wait_for_exit(child, exited.clone(), cancel.clone()));

        self.session = Some(Session {
            pid,
            stdin_tx,
            cancel,
            exited,
            protocol_version,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            if !session.exited.load(Ordering::SeqCst) {
                tracing::info!("Stopping discovery service (PID {:?})", session.pid);
                if let Ok(line) = serde_json::to_string(&ControlRequest::Shutdown) {
                    if session.stdin_tx.try_send(line).is_err() {
                        tracing::warn!("Request queue full, discovery service will be killed after the grace period");
                    }
                }
            }
            session.cancel.cancel();
        }
    }

    fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.exited.load(Ordering::SeqCst))
    }

    fn send(&mut self, request: ControlRequest) -> Result<()> {
        let Some(session) = self.session.as_ref().filter(|s| !s.exited.load(Ordering::SeqCst)) else {
            bail!("discovery service is not running");
        };
        let line = serde_json::to_string(&request).context("Failed to encode control request")?;
        match session.stdin_tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Discovery service is not reading its input, dropping {:?}", request);
                bail!("discovery service request queue is full")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => bail!("discovery service stdin closed"),
        }
    }

    fn protocol_version(&self) -> Option<String> {
        let session = self.session.as_ref()?;
        session
            .protocol_version
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Drop for ProcessDiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

async fn write_requests(
    mut stdin: ChildStdin,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            line = rx.recv() => {
                let Some(line) = line else { break };
                tracing::debug!("Sending to discovery service: {}", line);
                if let Err(e) = write_line(&mut stdin, &line).await {
                    tracing::error!("Failed to write to discovery service: {}", e);
                    return;
                }
            }
            _ = cancel.cancelled() => {
                // flush whatever was queued before the stop
                while let Ok(line) = rx.try_recv() {
                    if write_line(&mut stdin, &line).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    tracing::debug!("Discovery service writer finished");
}

async fn read_messages(
    stdout: ChildStdout,
    dispatcher: EventDispatcher,
    protocol_version: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = cancel.cancelled() => break,
        };

        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let message: ServiceMessage = match serde_json::from_str(line) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Ignoring unrecognised discovery service output {:?}: {}", line, e);
                        continue;
                    }
                };
                if let ServiceMessage::Ready { protocol_version: version } = &message {
                    tracing::info!("Discovery service ready, protocol version {}", version);
                    *protocol_version.lock().unwrap_or_else(|e| e.into_inner()) = Some(version.clone());
                }
                if let Some(event) = message.into_event() {
                    if let Err(e) = dispatcher.dispatch(event).await {
                        tracing::error!("Failed to dispatch cast event: {}", e);
                    }
                }
            }
            Ok(None) => {
                tracing::info!("Discovery service closed its output");
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read from discovery service: {}", e);
                break;
            }
        }
    }
}

async fn wait_for_exit(mut child: Child, exited: Arc<AtomicBool>, cancel: CancellationToken) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::warn!("Discovery service exited: {}", status),
                Err(e) => tracing::error!("Failed to wait for discovery service: {}", e),
            }
        }
        _ = cancel.cancelled() => {
            if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
                tracing::warn!("Discovery service did not exit in time, killing it");
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill discovery service: {}", e);
                }
            }
        }
    }
    exited.store(true, Ordering::SeqCst);
}
