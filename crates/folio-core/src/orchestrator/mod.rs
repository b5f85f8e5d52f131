//! Evaluation orchestrator.
//!
//! A single actor task owns the [`EvaluationChannel`] and decides when to
//! evaluate. Callers talk to it through a cloneable [`OrchestratorHandle`]
//! and read results from a `watch` channel of [`PreviewState`]; layout
//! snapshots go to the shared [`DebuggerState`].
//!
//! Commands queued together are applied together, so a burst of edits
//! produces one evaluation carrying the latest values. Every evaluation gets
//! a sequence number and only the latest one may publish.

mod actor;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::channel::{ArtifactRef, EvaluationChannel, PublishedError};
use crate::diagnostics::DiagnosticSink;
use crate::session::ResolvedSession;
use crate::state::{DebuggerState, PaginationState};

use actor::Actor;

/// Orchestration knobs, usually derived from [`crate::config::FolioConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Evaluation timeout after start and after [`OrchestratorHandle::reset_timeout`].
    pub timeout_ms: u64,
    /// Pause before the first evaluation on a fresh context.
    pub settle_delay_ms: u64,
    /// Playground URL used for links in fatal reports.
    pub base_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            settle_delay_ms: 100,
            base_url: "http://localhost:3000/".to_string(),
        }
    }
}

/// What the preview surface shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreviewState {
    /// Latest rendered artifact; survives failed evaluations.
    pub artifact: Option<ArtifactRef>,
    /// Duration of the last applied evaluation.
    pub elapsed_ms: Option<u64>,
    pub error: Option<PublishedError>,
    /// Renderer version reported by the current context.
    pub version: Option<String>,
    pub debugging_supported: bool,
    /// Whether the context is up and initialised.
    pub ready: bool,
    /// Generation of the context the state refers to.
    pub generation: u64,
    /// Timeout the next evaluation will use.
    pub timeout_ms: u64,
    /// Sequence number of the last applied evaluation result.
    pub applied_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("orchestrator has shut down")]
pub struct OrchestratorStopped;

#[derive(Debug)]
pub(crate) enum Command {
    SetCode(String),
    SetModules(bool),
    Rerun,
    Restart,
    IncreaseTimeoutAndRestart,
    ResetTimeout,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable control surface of a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PreviewState>,
    debugger: Arc<DebuggerState>,
    pagination: Arc<PaginationState>,
    session_id: Uuid,
}

/// Entry point: spawns the actor and returns its handle.
pub struct Orchestrator;

impl Orchestrator {
    /// Start orchestrating `channel`. The actor brings the context up and
    /// evaluates `session.code` right away.
    pub fn spawn(
        channel: EvaluationChannel,
        config: OrchestratorConfig,
        session: ResolvedSession,
        sink: Arc<dyn DiagnosticSink>,
    ) -> OrchestratorHandle {
        let session_id = Uuid::new_v4();
        let (commands, inbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PreviewState {
            timeout_ms: config.timeout_ms,
            ..PreviewState::default()
        });
        let debugger = Arc::new(DebuggerState::new());
        let pagination = Arc::new(PaginationState::new());

        let actor = Actor::new(
            session_id,
            Arc::new(channel),
            config,
            session,
            sink,
            state_tx,
            Arc::clone(&debugger),
            Arc::clone(&pagination),
        );
        actor::spawn(actor, inbox);

        OrchestratorHandle {
            commands,
            state,
            debugger,
            pagination,
            session_id,
        }
    }
}

impl OrchestratorHandle {
    fn send(&self, command: Command) -> Result<(), OrchestratorStopped> {
        self.commands.send(command).map_err(|_| OrchestratorStopped)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn set_code(&self, code: impl Into<String>) -> Result<(), OrchestratorStopped> {
        self.send(Command::SetCode(code.into()))
    }

    pub fn set_modules(&self, modules: bool) -> Result<(), OrchestratorStopped> {
        self.send(Command::SetModules(modules))
    }

    /// Evaluate the current code again.
    pub fn rerun(&self) -> Result<(), OrchestratorStopped> {
        self.send(Command::Rerun)
    }

    /// Replace the execution context, then evaluate.
    pub fn restart(&self) -> Result<(), OrchestratorStopped> {
        self.send(Command::Restart)
    }

    /// Double the timeout (saturating), replace the context, then evaluate.
    pub fn increase_timeout_and_restart(&self) -> Result<(), OrchestratorStopped> {
        self.send(Command::IncreaseTimeoutAndRestart)
    }

    /// Return to the configured timeout without evaluating.
    pub fn reset_timeout(&self) -> Result<(), OrchestratorStopped> {
        self.send(Command::ResetTimeout)
    }

    /// Stop the actor and release the context. Waits for acknowledgement.
    pub async fn shutdown(&self) -> Result<(), OrchestratorStopped> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| OrchestratorStopped)
    }

    pub fn state(&self) -> PreviewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreviewState> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&PreviewState) -> bool,
    ) -> Result<PreviewState, OrchestratorStopped> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(predicate).await.map_err(|_| OrchestratorStopped)?;
        Ok(state.clone())
    }

    pub fn debugger(&self) -> &Arc<DebuggerState> {
        &self.debugger
    }

    pub fn pagination(&self) -> &Arc<PaginationState> {
        &self.pagination
    }
}
