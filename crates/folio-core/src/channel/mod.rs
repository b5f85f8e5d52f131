//! Evaluation channel: request/response messaging with one isolated
//! execution context.
//!
//! The channel owns at most one live context at a time. Requests carry a
//! correlation id drawn from a counter that keeps increasing across context
//! generations, so a reply from a torn-down context can never be mistaken
//! for an answer to a newer request. Every call is raced against a deadline
//! with `tokio::time::timeout_at`; a late reply is dropped and counted.
//!
//! ```text
//! Uninitialized → Starting → Ready ⇄ Evaluating
//!                     ↑         ↓         ↓
//!                     └──── Terminated ←──┘
//! ```

pub mod error;
pub mod launcher;
pub mod protocol;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::layout::{self, LayoutTree};
use crate::metrics::METRICS;
use crate::obs;

pub use error::{ErrorKind, EvalError, EvalResult, PublishedError};
pub use launcher::{ContextGuard, ContextLauncher, ContextLink, InProcessLauncher, ProcessLauncher};
pub use protocol::{
    ArtifactRef, Capability, ContextToHost, CorrelationId, EvaluateOptions, EvaluateReply,
    EvaluationRequest, HostToContext, ReplyOutcome, WireError,
};

/// Lifecycle of the channel's current execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Uninitialized,
    Starting,
    Ready,
    Evaluating,
    Terminated,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::Starting => "starting",
            ChannelState::Ready => "ready",
            ChannelState::Evaluating => "evaluating",
            ChannelState::Terminated => "terminated",
        }
    }

    /// Whether `evaluate` may be called.
    pub fn accepts_evaluations(&self) -> bool {
        matches!(self, ChannelState::Ready | ChannelState::Evaluating)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Budget for the whole `init` + `version` bring-up exchange.
    pub init_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 10_000,
        }
    }
}

/// A successful evaluation: the artifact plus its indexed layout snapshot.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub artifact: ArtifactRef,
    pub layout: Option<LayoutTree>,
}

struct Pending {
    generation: u64,
    tx: oneshot::Sender<EvalResult<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<CorrelationId, Pending>>>;
type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

struct LiveContext {
    generation: u64,
    writer: SharedWriter,
    in_flight: Arc<AtomicUsize>,
    /// Set once the context's output stream has closed.
    closed: Arc<AtomicBool>,
    guard: ContextGuard,
    reader: JoinHandle<()>,
}

impl Drop for LiveContext {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// What a single call needs from the live context, cloned out so the
/// context lock is not held while waiting for a reply.
struct Connection {
    generation: u64,
    writer: SharedWriter,
    in_flight: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

pub struct EvaluationChannel {
    launcher: Arc<dyn ContextLauncher>,
    config: ChannelConfig,
    live: Mutex<Option<LiveContext>>,
    pending: PendingMap,
    next_id: AtomicU64,
    generation: Arc<AtomicU64>,
    state: Arc<watch::Sender<ChannelState>>,
    capability: watch::Sender<Option<Capability>>,
}

impl EvaluationChannel {
    pub fn new(launcher: Arc<dyn ContextLauncher>, config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::Uninitialized);
        let (capability, _) = watch::channel(None);
        Self {
            launcher,
            config,
            live: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            generation: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
            capability,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Capability reported by the current context, if `init` succeeded.
    pub fn capability(&self) -> Option<Capability> {
        self.capability.borrow().clone()
    }

    /// Generation number of the most recently started context.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn launcher(&self) -> &dyn ContextLauncher {
        self.launcher.as_ref()
    }

    /// (Re)create the execution context, tearing down a running one first.
    pub async fn start(&self) -> EvalResult<()> {
        let mut live = self.live.lock().await;
        if let Some(old) = live.take() {
            self.teardown(old).await;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.capability.send_replace(None);
        self.state.send_replace(ChannelState::Starting);

        let link = match self.launcher.launch().await {
            Ok(link) => link,
            Err(err) => {
                self.state.send_replace(ChannelState::Terminated);
                return Err(err);
            }
        };

        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_replies(
            link.reader,
            generation,
            Arc::clone(&closed),
            Arc::clone(&self.pending),
            Arc::clone(&self.state),
            Arc::clone(&self.generation),
        ));

        *live = Some(LiveContext {
            generation,
            writer: Arc::new(Mutex::new(link.writer)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed,
            guard: link.guard,
            reader,
        });
        debug!(generation, launcher = %self.launcher.describe(), "execution context launched");
        Ok(())
    }

    /// Bring-up exchange: `init`, then `version`, within `init_timeout_ms`.
    pub async fn init(&self) -> EvalResult<Capability> {
        let state = self.state();
        if state != ChannelState::Starting && !state.accepts_evaluations() {
            return Err(EvalError::NotReady { state });
        }

        let conn = self.connection().await?;
        let limit_ms = self.config.init_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(limit_ms);

        self.call(&conn, |id| HostToContext::Init { id }, deadline, limit_ms)
            .await?;
        let value = self
            .call(&conn, |id| HostToContext::Version { id }, deadline, limit_ms)
            .await?;
        let capability: Capability = serde_json::from_value(value)
            .map_err(|err| EvalError::Protocol(format!("invalid version reply: {err}")))?;

        if self.generation() == conn.generation {
            self.capability.send_replace(Some(capability.clone()));
            self.state.send_if_modified(|state| {
                if *state == ChannelState::Starting {
                    *state = ChannelState::Ready;
                    true
                } else {
                    false
                }
            });
            obs::emit_context_ready(
                conn.generation,
                &self.launcher.describe(),
                &capability.version,
                capability.debugging_supported,
            );
        }
        Ok(capability)
    }

    /// Evaluate one request, racing the reply against `request.timeout_ms`.
    ///
    /// A timeout leaves the context running; whatever it eventually answers
    /// is discarded.
    pub async fn evaluate(&self, request: EvaluationRequest) -> EvalResult<RenderOutput> {
        let state = self.state();
        if !state.accepts_evaluations() {
            return Err(EvalError::NotReady { state });
        }

        let conn = self.connection().await?;
        let _busy = BusyGuard::enter(&conn, &self.state, &self.generation);

        let limit_ms = request.timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(limit_ms);
        let value = self
            .call(
                &conn,
                |id| HostToContext::Evaluate {
                    id,
                    payload: request,
                },
                deadline,
                limit_ms,
            )
            .await?;

        let reply: EvaluateReply = serde_json::from_value(value)
            .map_err(|err| EvalError::Protocol(format!("invalid evaluate reply: {err}")))?;
        let layout = reply
            .layout
            .filter(|raw| !raw.is_null())
            .map(layout::index_value)
            .transpose()
            .map_err(|err| EvalError::Protocol(format!("invalid layout snapshot: {err}")))?;

        Ok(RenderOutput {
            artifact: reply.url,
            layout,
        })
    }

    /// Release the context. Pending calls resolve as [`EvalError::Terminated`].
    pub async fn terminate(&self) {
        let mut live = self.live.lock().await;
        if let Some(old) = live.take() {
            self.teardown(old).await;
        }
        self.capability.send_replace(None);
        self.state.send_replace(ChannelState::Terminated);
    }

    async fn connection(&self) -> EvalResult<Connection> {
        let live = self.live.lock().await;
        let live = live.as_ref().ok_or(EvalError::NotReady {
            state: self.state(),
        })?;
        Ok(Connection {
            generation: live.generation,
            writer: Arc::clone(&live.writer),
            in_flight: Arc::clone(&live.in_flight),
            closed: Arc::clone(&live.closed),
        })
    }

    async fn call(
        &self,
        conn: &Connection,
        build: impl FnOnce(CorrelationId) -> HostToContext,
        deadline: Instant,
        limit_ms: u64,
    ) -> EvalResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = build(id);
        let kind = message.kind();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            Pending {
                generation: conn.generation,
                tx,
            },
        );

        // The reader may already have drained the table on its way out.
        if conn.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(context_exited());
        }

        // The write shares the deadline: a context stuck in user code stops
        // draining its input, and a full pipe must not outlive the timeout.
        let mut sent = false;
        let exchange = async {
            write_message(&conn.writer, &message)
                .await
                .map_err(|err| EvalError::ContextFault {
                    message: format!("failed to send {kind} request: {err}"),
                })?;
            sent = true;
            trace!(id, kind, generation = conn.generation, "request sent");
            rx.await.unwrap_or(Err(EvalError::Terminated))
        };

        let result = tokio::time::timeout_at(deadline, exchange).await;
        let outcome = match result {
            Ok(reply) => reply,
            Err(_) => {
                if !sent {
                    warn!(id, kind, generation = conn.generation, "request write timed out");
                }
                Err(EvalError::Timeout { limit_ms })
            }
        };
        if outcome.is_err() {
            self.pending.lock().await.remove(&id);
        }
        outcome
    }

    async fn teardown(&self, mut old: LiveContext) {
        old.closed.store(true, Ordering::SeqCst);
        old.reader.abort();
        old.guard.shutdown().await;
        let orphaned = drain_generation(&self.pending, old.generation).await;
        let count = orphaned.len();
        for pending in orphaned {
            let _ = pending.tx.send(Err(EvalError::Terminated));
        }
        obs::emit_context_terminated(old.generation, count);
    }
}

/// Marks the channel `Evaluating` while at least one evaluate call is out.
struct BusyGuard<'a> {
    generation: u64,
    in_flight: Arc<AtomicUsize>,
    state: &'a watch::Sender<ChannelState>,
    current: &'a AtomicU64,
}

impl<'a> BusyGuard<'a> {
    fn enter(
        conn: &Connection,
        state: &'a watch::Sender<ChannelState>,
        current: &'a AtomicU64,
    ) -> Self {
        conn.in_flight.fetch_add(1, Ordering::SeqCst);
        state.send_if_modified(|s| {
            if *s == ChannelState::Ready {
                *s = ChannelState::Evaluating;
                true
            } else {
                false
            }
        });
        Self {
            generation: conn.generation,
            in_flight: Arc::clone(&conn.in_flight),
            state,
            current,
        }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let idle = self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1;
        if idle && self.current.load(Ordering::SeqCst) == self.generation {
            self.state.send_if_modified(|s| {
                if *s == ChannelState::Evaluating {
                    *s = ChannelState::Ready;
                    true
                } else {
                    false
                }
            });
        }
    }
}

async fn write_message(writer: &SharedWriter, message: &HostToContext) -> std::io::Result<()> {
    let mut encoded = serde_json::to_string(message).map_err(std::io::Error::other)?;
    encoded.push('\n');
    let mut writer = writer.lock().await;
    writer.write_all(encoded.as_bytes()).await?;
    writer.flush().await
}

async fn drain_generation(pending: &PendingMap, generation: u64) -> Vec<Pending> {
    let mut map = pending.lock().await;
    let ids: Vec<CorrelationId> = map
        .iter()
        .filter(|(_, p)| p.generation == generation)
        .map(|(id, _)| *id)
        .collect();
    ids.into_iter().filter_map(|id| map.remove(&id)).collect()
}

fn context_exited() -> EvalError {
    EvalError::ContextFault {
        message: "execution context exited".to_string(),
    }
}

async fn read_replies(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    generation: u64,
    closed: Arc<AtomicBool>,
    pending: PendingMap,
    state: Arc<watch::Sender<ChannelState>>,
    current: Arc<AtomicU64>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(generation, error = %err, "failed reading from execution context");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply: ContextToHost = match serde_json::from_str(&line) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(generation, error = %err, "ignoring unparseable line from execution context");
                continue;
            }
        };

        let waiter = {
            let mut map = pending.lock().await;
            match map.get(&reply.id) {
                Some(p) if p.generation == generation => map.remove(&reply.id),
                _ => None,
            }
        };
        let Some(waiter) = waiter else {
            trace!(generation, id = reply.id, "dropping stale reply");
            METRICS.inc_stale_replies();
            continue;
        };

        let result = match reply.outcome {
            ReplyOutcome::Ok(value) => Ok(value),
            ReplyOutcome::Error(err) => Err(EvalError::from(err)),
        };
        let _ = waiter.tx.send(result);
    }

    closed.store(true, Ordering::SeqCst);
    let orphaned = drain_generation(&pending, generation).await;
    let count = orphaned.len();
    for waiter in orphaned {
        let _ = waiter.tx.send(Err(context_exited()));
    }
    if current.load(Ordering::SeqCst) == generation {
        state.send_replace(ChannelState::Terminated);
        obs::emit_context_lost(generation, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::RenderBackend;
    use async_trait::async_trait;
    use serde_json::json;

    /// Answers by inspecting the code: `sleep:<ms>` stalls, `hang` never
    /// returns, `throw` fails, `fatal` reports a context fault, anything else
    /// renders.
    struct Scripted;

    #[async_trait]
    impl RenderBackend for Scripted {
        async fn version(&self) -> Result<Capability, WireError> {
            Ok(Capability {
                version: "3.4.0".into(),
                debugging_supported: true,
            })
        }

        async fn evaluate(&self, request: EvaluationRequest) -> Result<EvaluateReply, WireError> {
            if let Some(ms) = request.code.strip_prefix("sleep:") {
                let ms: u64 = ms.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if request.code == "hang" {
                std::future::pending::<()>().await;
            }
            if request.code == "throw" {
                return Err(WireError::user("Unexpected token"));
            }
            if request.code == "fatal" {
                return Err(WireError::fatal("font cache corrupted"));
            }
            Ok(EvaluateReply {
                url: ArtifactRef(format!("blob:{}", request.code)),
                layout: Some(json!({
                    "type": "page",
                    "children": [{"type": "text"}, {"type": "text"}]
                })),
            })
        }
    }

    fn request(code: &str, timeout_ms: u64) -> EvaluationRequest {
        EvaluationRequest {
            code: code.into(),
            options: EvaluateOptions::default(),
            timeout_ms,
        }
    }

    async fn ready_channel() -> EvaluationChannel {
        let channel = EvaluationChannel::new(
            Arc::new(InProcessLauncher::new(Arc::new(Scripted))),
            ChannelConfig::default(),
        );
        channel.start().await.unwrap();
        channel.init().await.unwrap();
        channel
    }

    #[tokio::test]
    async fn test_init_caches_capability() {
        let channel = ready_channel().await;
        assert_eq!(channel.state(), ChannelState::Ready);
        let cap = channel.capability().unwrap();
        assert_eq!(cap.version, "3.4.0");
        assert!(cap.debugging_supported);
    }

    #[tokio::test]
    async fn test_evaluate_before_start_is_rejected() {
        let channel = EvaluationChannel::new(
            Arc::new(InProcessLauncher::new(Arc::new(Scripted))),
            ChannelConfig::default(),
        );
        let err = channel.evaluate(request("doc", 1000)).await.unwrap_err();
        assert_eq!(
            err,
            EvalError::NotReady {
                state: ChannelState::Uninitialized
            }
        );
    }

    #[tokio::test]
    async fn test_evaluate_returns_indexed_layout() {
        let channel = ready_channel().await;
        let output = channel.evaluate(request("doc", 20_000)).await.unwrap();
        assert_eq!(output.artifact.as_str(), "blob:doc");
        let tree = output.layout.unwrap();
        assert!(tree.contains("page__text__2"));
        assert_eq!(channel.state(), ChannelState::Ready);
    }

    #[tokio::test]
    async fn test_user_and_context_errors_keep_their_class() {
        let channel = ready_channel().await;
        let user = channel.evaluate(request("throw", 1000)).await.unwrap_err();
        assert!(!user.is_fatal());
        assert_eq!(user.message(), "Unexpected token");

        let fault = channel.evaluate(request("fatal", 1000)).await.unwrap_err();
        assert!(fault.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_stale_reply_is_dropped() {
        let channel = ready_channel().await;
        let before = METRICS.stale_replies();

        let err = channel
            .evaluate(request("sleep:2000", 1000))
            .await
            .unwrap_err();
        assert_eq!(err, EvalError::Timeout { limit_ms: 1000 });

        // Queued behind the stalled request; its late reply arrives first.
        let output = channel.evaluate(request("next", 5000)).await.unwrap();
        assert_eq!(output.artifact.as_str(), "blob:next");
        assert!(METRICS.stale_replies() > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_to_stuck_context_still_times_out() {
        let channel = ready_channel().await;
        let err = channel.evaluate(request("hang", 1000)).await.unwrap_err();
        assert_eq!(err, EvalError::Timeout { limit_ms: 1000 });

        // The context no longer drains its input, so this cannot be sent whole.
        let large = "x".repeat(400 * 1024);
        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            channel.evaluate(request(&large, 1000)),
        )
        .await
        .expect("evaluate must resolve within its own timeout");
        assert_eq!(outcome.unwrap_err(), EvalError::Timeout { limit_ms: 1000 });

        // The writer is free again for the next call.
        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            channel.evaluate(request("next", 500)),
        )
        .await
        .expect("writer lock released after the timed-out send");
        assert_eq!(outcome.unwrap_err(), EvalError::Timeout { limit_ms: 500 });
        assert_eq!(channel.state(), ChannelState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_resolves_pending_as_terminated() {
        let channel = Arc::new(ready_channel().await);
        let evaluating = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.evaluate(request("sleep:60000", 120_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.state(), ChannelState::Evaluating);

        channel.terminate().await;
        let result = evaluating.await.unwrap();
        assert_eq!(result.unwrap_err(), EvalError::Terminated);
        assert_eq!(channel.state(), ChannelState::Terminated);
        assert!(channel.capability().is_none());
    }

    #[tokio::test]
    async fn test_restart_bumps_generation_and_clears_capability() {
        let channel = ready_channel().await;
        let first = channel.generation();
        channel.start().await.unwrap();
        assert_eq!(channel.generation(), first + 1);
        assert_eq!(channel.state(), ChannelState::Starting);
        assert!(channel.capability().is_none());
        channel.init().await.unwrap();
        assert!(channel.evaluate(request("again", 1000)).await.is_ok());
    }

    struct Vanishing;

    #[async_trait]
    impl ContextLauncher for Vanishing {
        fn describe(&self) -> String {
            "vanishing".into()
        }

        async fn launch(&self) -> EvalResult<ContextLink> {
            // The peer end is dropped right away, so the context looks dead.
            let (host, _context) = tokio::io::duplex(64);
            let (reader, writer) = tokio::io::split(host);
            Ok(ContextLink {
                writer: Box::new(writer),
                reader: Box::new(reader),
                guard: ContextGuard::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_context_exit_is_a_fault() {
        let channel = EvaluationChannel::new(Arc::new(Vanishing), ChannelConfig::default());
        channel.start().await.unwrap();
        let err = channel.init().await.unwrap_err();
        assert!(err.is_fatal(), "unexpected error: {err:?}");

        let mut state = channel.subscribe_state();
        state
            .wait_for(|s| *s == ChannelState::Terminated)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_times_out_when_context_is_silent() {
        struct Silent;

        #[async_trait]
        impl ContextLauncher for Silent {
            fn describe(&self) -> String {
                "silent".into()
            }

            async fn launch(&self) -> EvalResult<ContextLink> {
                let (host, context) = tokio::io::duplex(64);
                let (reader, writer) = tokio::io::split(host);
                // Keep the peer open but never answer.
                let task = tokio::spawn(async move {
                    let _context = context;
                    std::future::pending::<()>().await;
                });
                Ok(ContextLink {
                    writer: Box::new(writer),
                    reader: Box::new(reader),
                    guard: ContextGuard::task(task),
                })
            }
        }

        let channel = EvaluationChannel::new(
            Arc::new(Silent),
            ChannelConfig {
                init_timeout_ms: 500,
            },
        );
        channel.start().await.unwrap();
        let err = channel.init().await.unwrap_err();
        assert_eq!(err, EvalError::Timeout { limit_ms: 500 });
    }
}
