//! Child process transport.
//!
//! Spawns a program and speaks newline-delimited JSON over its stdin and
//! stdout. Framing is delegated to [`LineTransport`], so the readiness
//! guarantee holds here too: [`ProcessTransportBuilder::spawn`] returns only
//! once both pumps are running.
//!
//! # Example
//!
//! ```no_run
//! use wirekit_transport::{ProcessTransport, Transport};
//!
//! # async fn example() -> Result<(), wirekit_transport::TransportError> {
//! let transport = ProcessTransport::builder("my-server")
//!     .arg("--verbose")
//!     .env("RUST_LOG", "debug")
//!     .spawn()
//!     .await?;
//! assert!(transport.is_connected());
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_lock::Mutex as AsyncMutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use wirekit_core::protocol::Message;

use crate::error::TransportError;
use crate::line::{LineTransport, LineTransportConfig};
use crate::traits::{Transport, TransportMetadata};

/// Default grace period between closing stdin and killing the child.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do with the child's stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StderrMode {
    /// Share this process's stderr.
    #[default]
    Inherit,
    /// Discard it.
    Null,
    /// Forward each line to `tracing` at debug level.
    Log,
}

/// A transport talking to a spawned child process.
pub struct ProcessTransport {
    lines: LineTransport,
    child: AsyncMutex<Child>,
    pid: Option<u32>,
    command: String,
    close_timeout: Duration,
}

impl ProcessTransport {
    /// Spawn `program` with `args` using default settings.
    pub async fn spawn<S, I, A>(program: S, args: I) -> Result<Self, TransportError>
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        ProcessTransportBuilder::new(program).args(args).spawn().await
    }

    /// Start building a process transport.
    #[must_use]
    pub fn builder<S: AsRef<OsStr>>(program: S) -> ProcessTransportBuilder {
        ProcessTransportBuilder::new(program)
    }

    /// The child's process id, captured at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The command line used to spawn the child.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Check whether the child is still running.
    pub async fn is_running(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Wait for the child to exit.
    pub async fn wait(&self) -> Result<ExitStatus, TransportError> {
        Ok(self.child.lock().await.wait().await?)
    }

    /// Kill the child immediately.
    pub async fn kill(&self) -> Result<(), TransportError> {
        Ok(self.child.lock().await.kill().await?)
    }
}

impl Transport for ProcessTransport {
    type Error = TransportError;

    async fn send(&self, msg: Message) -> Result<(), Self::Error> {
        self.lines.send(msg).await
    }

    async fn recv(&self) -> Result<Option<Message>, Self::Error> {
        self.lines.recv().await
    }

    /// Flush and close stdin, give the child the rest of the grace period
    /// to exit, then kill it.
    ///
    /// The grace period bounds the whole call: a child that stopped reading
    /// its stdin cannot hold up the kill.
    async fn close(&self) -> Result<(), Self::Error> {
        let deadline = Instant::now() + self.close_timeout;
        if !self.lines.shut_down_by(deadline).await {
            tracing::debug!(pid = ?self.pid, "stdin closed with messages still queued");
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(pid = ?self.pid, %status, "child exited");
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::warn!(
                    pid = ?self.pid,
                    timeout = ?self.close_timeout,
                    "child did not exit after stdin closed; killing"
                );
                child.kill().await?;
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lines.is_connected()
    }

    fn metadata(&self) -> TransportMetadata {
        self.lines.metadata()
    }
}

/// Builder for [`ProcessTransport`].
#[derive(Debug, Clone)]
pub struct ProcessTransportBuilder {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    clear_env: bool,
    stderr: StderrMode,
    line_config: LineTransportConfig,
    close_timeout: Duration,
}

impl ProcessTransportBuilder {
    /// Create a builder for the given program.
    #[must_use]
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: PathBuf::from(program.as_ref()),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            clear_env: false,
            stderr: StderrMode::default(),
            line_config: LineTransportConfig::default(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg<S: AsRef<str>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env<K: AsRef<str>, V: AsRef<str>>(mut self, key: K, value: V) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Set the working directory for the child.
    #[must_use]
    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Start the child with an empty environment.
    #[must_use]
    pub const fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// Choose how the child's stderr is handled.
    #[must_use]
    pub const fn stderr(mut self, mode: StderrMode) -> Self {
        self.stderr = mode;
        self
    }

    /// Set the line framing configuration.
    #[must_use]
    pub fn line_config(mut self, config: LineTransportConfig) -> Self {
        self.line_config = config;
        self
    }

    /// Set how long `close` waits for the child before killing it.
    #[must_use]
    pub const fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Spawn the process and start the transport.
    pub async fn spawn(self) -> Result<ProcessTransport, TransportError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        command.stderr(match self.stderr {
            StderrMode::Inherit => Stdio::inherit(),
            StderrMode::Null => Stdio::null(),
            StderrMode::Log => Stdio::piped(),
        });

        if self.clear_env {
            command.env_clear();
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            TransportError::connection(format!(
                "failed to spawn process '{}': {e}",
                self.program.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::protocol("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::protocol("failed to capture child stdout"))?;

        let pid = child.id();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "wirekit::child_stderr", pid = ?pid, "{line}");
                }
            });
        }

        let command_line = if self.args.is_empty() {
            self.program.display().to_string()
        } else {
            format!("{} {}", self.program.display(), self.args.join(" "))
        };

        let metadata = TransportMetadata::new("process")
            .with_peer(pid.map_or_else(|| "pid:unknown".to_string(), |id| format!("pid:{id}")))
            .with_extra(serde_json::json!({ "command": command_line }));

        let lines = LineTransport::start(stdout, stdin, self.line_config, metadata).await?;

        tracing::debug!(pid = ?pid, command = %command_line, "spawned child process");

        Ok(ProcessTransport {
            lines,
            child: AsyncMutex::new(child),
            pid,
            command: command_line,
            close_timeout: self.close_timeout,
        })
    }
}
