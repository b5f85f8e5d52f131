use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};
use url::Url;
use uuid::Uuid;

use super::{Command, OrchestratorConfig, PreviewState};
use crate::channel::{
    EvalError, EvalResult, EvaluateOptions, EvaluationChannel, EvaluationRequest, PublishedError,
    RenderOutput,
};
use crate::diagnostics::{DiagnosticSink, FatalReport};
use crate::metrics::METRICS;
use crate::obs;
use crate::session::{create_link, ResolvedSession};
use crate::state::{DebuggerState, PaginationState};

/// A finished evaluation on its way back to the actor.
struct Completed {
    seq: u64,
    generation: u64,
    elapsed_ms: u64,
    code: String,
    options: EvaluateOptions,
    result: EvalResult<RenderOutput>,
}

pub(super) struct Actor {
    session_id: Uuid,
    channel: Arc<EvaluationChannel>,
    config: OrchestratorConfig,
    sink: Arc<dyn DiagnosticSink>,
    state: watch::Sender<PreviewState>,
    debugger: Arc<DebuggerState>,
    pagination: Arc<PaginationState>,

    code: String,
    modules: bool,
    timeout_ms: u64,
    /// Last issued evaluation sequence number.
    seq: u64,
    /// The next evaluation is the first on a fresh context.
    settle: bool,
    completed_tx: mpsc::UnboundedSender<Completed>,
    completed_rx: mpsc::UnboundedReceiver<Completed>,
    reports: Vec<JoinHandle<()>>,
}

enum Flow {
    Continue,
    Stop,
}

pub(super) fn spawn(actor: Actor, inbox: mpsc::UnboundedReceiver<Command>) {
    let span = obs::session_span(&actor.session_id.to_string());
    tokio::spawn(actor.run(inbox).instrument(span));
}

impl Actor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        session_id: Uuid,
        channel: Arc<EvaluationChannel>,
        config: OrchestratorConfig,
        session: ResolvedSession,
        sink: Arc<dyn DiagnosticSink>,
        state: watch::Sender<PreviewState>,
        debugger: Arc<DebuggerState>,
        pagination: Arc<PaginationState>,
    ) -> Self {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        Self {
            session_id,
            channel,
            timeout_ms: config.timeout_ms,
            config,
            sink,
            state,
            debugger,
            pagination,
            code: session.code,
            modules: session.modules,
            seq: 0,
            settle: false,
            completed_tx,
            completed_rx,
            reports: Vec::new(),
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        self.bring_up().await;
        if self.ready() {
            self.schedule();
        }

        loop {
            tokio::select! {
                command = inbox.recv() => {
                    let Some(command) = command else { break };
                    let mut batch = vec![command];
                    while let Ok(next) = inbox.try_recv() {
                        batch.push(next);
                    }
                    if let Flow::Stop = self.apply(batch).await {
                        return;
                    }
                }
                Some(done) = self.completed_rx.recv() => self.complete(done),
            }
        }

        // Every handle is gone.
        self.stop().await;
    }

    async fn apply(&mut self, batch: Vec<Command>) -> Flow {
        let mut evaluate = false;
        let mut restart = false;
        let mut acks = Vec::new();

        for command in batch {
            match command {
                Command::SetCode(code) => {
                    if code != self.code {
                        self.code = code;
                        evaluate = true;
                    }
                }
                Command::SetModules(modules) => {
                    if modules != self.modules {
                        self.modules = modules;
                        self.publish_capability();
                        evaluate = true;
                    }
                }
                Command::Rerun => evaluate = true,
                Command::Restart => restart = true,
                Command::IncreaseTimeoutAndRestart => {
                    self.timeout_ms = self.timeout_ms.saturating_mul(2);
                    restart = true;
                }
                Command::ResetTimeout => self.timeout_ms = self.config.timeout_ms,
                Command::Shutdown(ack) => acks.push(ack),
            }
        }

        if !acks.is_empty() {
            self.stop().await;
            for ack in acks {
                let _ = ack.send(());
            }
            return Flow::Stop;
        }

        let timeout_ms = self.timeout_ms;
        self.state.send_if_modified(|s| {
            let changed = s.timeout_ms != timeout_ms;
            s.timeout_ms = timeout_ms;
            changed
        });

        if restart {
            obs::emit_context_restart(self.timeout_ms);
            METRICS.inc_restarts();
            self.bring_up().await;
            evaluate = true;
        } else if evaluate && !self.ready() {
            // The context died since the last evaluation.
            self.bring_up().await;
        }
        if evaluate && self.ready() {
            self.schedule();
        }
        Flow::Continue
    }

    /// Start a fresh context and run the bring-up exchange.
    async fn bring_up(&mut self) {
        // Whatever the old context still answers must not publish.
        self.seq += 1;
        let result = match self.channel.start().await {
            Ok(()) => self.channel.init().await,
            Err(err) => Err(err),
        };
        let generation = self.channel.generation();

        match result {
            Ok(_) => {
                self.settle = true;
                self.state.send_modify(|s| {
                    s.ready = true;
                    s.generation = generation;
                });
                self.publish_capability();
            }
            Err(err) => {
                warn!(generation, error = %err, "execution context failed to come up");
                self.state.send_modify(|s| {
                    s.ready = false;
                    s.generation = generation;
                    s.version = None;
                    s.debugging_supported = false;
                    s.error = Some(PublishedError::from(&err));
                });
                if err.is_fatal() {
                    let options = self.options();
                    let code = self.code.clone();
                    self.report(&err, &code, options, generation);
                }
            }
        }
    }

    fn publish_capability(&self) {
        let capability = self.channel.capability();
        let modules = self.modules;
        self.state.send_modify(|s| {
            s.version = capability.as_ref().map(|c| c.version.clone());
            s.debugging_supported = modules && capability.is_some_and(|c| c.debugging_supported);
        });
    }

    fn options(&self) -> EvaluateOptions {
        EvaluateOptions {
            modules: self.modules,
        }
    }

    fn ready(&self) -> bool {
        self.channel.state().accepts_evaluations()
    }

    /// Issue one evaluation with the current code, options and timeout.
    fn schedule(&mut self) {
        self.seq += 1;
        let seq = self.seq;
        let generation = self.channel.generation();
        let delay = if std::mem::take(&mut self.settle) {
            Duration::from_millis(self.config.settle_delay_ms)
        } else {
            Duration::ZERO
        };
        let request = EvaluationRequest {
            code: self.code.clone(),
            options: self.options(),
            timeout_ms: self.timeout_ms,
        };

        let channel = Arc::clone(&self.channel);
        let completed = self.completed_tx.clone();
        tokio::spawn(
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                obs::emit_evaluation_started(
                    seq,
                    request.code.len(),
                    request.timeout_ms,
                    request.options.modules,
                );
                METRICS.inc_evaluations_started();

                let code = request.code.clone();
                let options = request.options;
                let started = Instant::now();
                let result = channel.evaluate(request).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                let _ = completed.send(Completed {
                    seq,
                    generation,
                    elapsed_ms,
                    code,
                    options,
                    result,
                });
            }
            .in_current_span(),
        );
    }

    fn complete(&mut self, done: Completed) {
        if done.seq != self.seq {
            METRICS.inc_superseded();
            obs::emit_evaluation_superseded(done.seq, self.seq);
            return;
        }

        match done.result {
            Ok(output) => {
                obs::emit_evaluation_finished(done.seq, done.elapsed_ms, output.layout.is_some());
                self.debugger.replace_layout(output.layout);
                self.pagination.reset_pages_count();
                self.state.send_modify(|s| {
                    s.artifact = Some(output.artifact);
                    s.elapsed_ms = Some(done.elapsed_ms);
                    s.error = None;
                    s.applied_seq = done.seq;
                });
            }
            Err(err) => {
                METRICS.inc_evaluations_failed();
                if err.is_timeout() {
                    METRICS.inc_timeouts();
                }
                obs::emit_evaluation_failed(
                    done.seq,
                    done.elapsed_ms,
                    err.kind().as_str(),
                    &err,
                );

                let ready = self.ready();
                self.state.send_modify(|s| {
                    s.elapsed_ms = Some(done.elapsed_ms);
                    s.error = Some(PublishedError::from(&err));
                    s.applied_seq = done.seq;
                    s.ready = ready;
                });
                if err.is_fatal() {
                    self.report(&err, &done.code, done.options, done.generation);
                }
            }
        }
    }

    /// Hand a fatal failure to the sink without waiting for it.
    fn report(&mut self, err: &EvalError, code: &str, options: EvaluateOptions, generation: u64) {
        let link = Url::parse(&self.config.base_url)
            .ok()
            .and_then(|base| create_link(&base, code, options.modules).ok())
            .map(String::from);
        let report = FatalReport::new(self.session_id, err, code, options, link, generation);
        let sink = Arc::clone(&self.sink);

        self.reports.retain(|task| !task.is_finished());
        self.reports.push(tokio::spawn(
            async move { sink.report(report).await }.in_current_span(),
        ));
    }

    async fn stop(&mut self) {
        self.channel.terminate().await;
        self.state.send_modify(|s| s.ready = false);
        futures::future::join_all(self.reports.drain(..)).await;
        METRICS.flush();
        debug!("orchestrator stopped");
    }
}
