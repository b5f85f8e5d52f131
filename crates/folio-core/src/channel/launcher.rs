//! Launchers create a fresh execution context and hand back its byte streams.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{EvalError, EvalResult};
use crate::worker::{self, RenderBackend};

/// Buffer size of the in-memory pipe used by [`InProcessLauncher`].
const DUPLEX_CAPACITY: usize = 256 * 1024;

/// Live streams of a launched context plus whatever keeps it alive.
pub struct ContextLink {
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub guard: ContextGuard,
}

/// Owns the context's process or task. Dropping it stops the context.
#[derive(Debug, Default)]
pub struct ContextGuard {
    child: Option<Child>,
    tasks: Vec<JoinHandle<()>>,
}

impl ContextGuard {
    pub fn process(child: Child) -> Self {
        Self {
            child: Some(child),
            tasks: Vec::new(),
        }
    }

    pub fn task(handle: JoinHandle<()>) -> Self {
        Self {
            child: None,
            tasks: vec![handle],
        }
    }

    fn with_task(mut self, handle: JoinHandle<()>) -> Self {
        self.tasks.push(handle);
        self
    }

    /// Stop the context and wait briefly for a child process to exit.
    pub async fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();
        if let Err(err) = child.start_kill() {
            debug!(context_pid = ?pid, error = %err, "execution context already gone");
            return;
        }
        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(Ok(status)) => debug!(context_pid = ?pid, %status, "execution context exited"),
            Ok(Err(err)) => {
                warn!(context_pid = ?pid, error = %err, "failed waiting for execution context exit")
            }
            Err(_) => warn!(context_pid = ?pid, "execution context did not exit after kill"),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
pub trait ContextLauncher: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    async fn launch(&self) -> EvalResult<ContextLink>;
}

/// Runs the renderer as a child process speaking the protocol on stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a command line split on whitespace, e.g. `node worker.mjs`.
    pub fn from_command(command: &[String]) -> EvalResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| EvalError::Launch("renderer command is empty".into()))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl ContextLauncher for ProcessLauncher {
    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn launch(&self) -> EvalResult<ContextLink> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| EvalError::Launch(format!("{}: {err}", self.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EvalError::Launch("execution context missing stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EvalError::Launch("execution context missing stdout".into()))?;

        let mut guard = ContextGuard::process(child);
        if let Some(stderr) = guard.child.as_mut().and_then(|c| c.stderr.take()) {
            guard = guard.with_task(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "folio::context_stderr", "{line}");
                }
            }));
        }

        Ok(ContextLink {
            writer: Box::new(stdin),
            reader: Box::new(stdout),
            guard,
        })
    }
}

/// Runs an in-process [`RenderBackend`] on its own task, connected through
/// an in-memory pipe so it still speaks the wire protocol.
#[derive(Clone)]
pub struct InProcessLauncher {
    backend: Arc<dyn RenderBackend>,
}

impl InProcessLauncher {
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ContextLauncher for InProcessLauncher {
    fn describe(&self) -> String {
        "in-process".to_string()
    }

    async fn launch(&self) -> EvalResult<ContextLink> {
        let (host, context) = tokio::io::duplex(DUPLEX_CAPACITY);
        let (host_read, host_write) = tokio::io::split(host);
        let (context_read, context_write) = tokio::io::split(context);

        let backend = Arc::clone(&self.backend);
        let task = tokio::spawn(async move {
            if let Err(err) = worker::serve(context_read, context_write, backend).await {
                debug!(error = %err, "in-process context stopped");
            }
        });

        Ok(ContextLink {
            writer: Box::new(host_write),
            reader: Box::new(host_read),
            guard: ContextGuard::task(task),
        })
    }
}
