//! Structured observability hooks for preview sessions.
//!
//! This module provides:
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard
//! - Emission functions for evaluation and execution-context lifecycle events
//!
//! Events are emitted at `info!` level unless noted. For JSON output, start
//! the binary with `--json`.

use tracing::{info, warn};

/// RAII guard that enters a session-scoped tracing span.
///
/// ```ignore
/// let _span = SessionSpan::enter("8f0c…");
/// // every event below carries session_id = "8f0c…"
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        Self {
            _span: session_span(session_id).entered(),
        }
    }
}

/// The `folio.session` span. The orchestrator instruments its actor with
/// it; [`SessionSpan`] enters it for synchronous callers.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("folio.session", session_id = %session_id)
}

/// Emit event: an evaluation was handed to the execution context.
pub fn emit_evaluation_started(seq: u64, code_bytes: usize, timeout_ms: u64, modules: bool) {
    info!(
        event = "evaluation.started",
        seq = seq,
        code_bytes = code_bytes,
        timeout_ms = timeout_ms,
        modules = modules,
    );
}

/// Emit event: an evaluation produced an artifact.
pub fn emit_evaluation_finished(seq: u64, elapsed_ms: u64, has_layout: bool) {
    info!(
        event = "evaluation.finished",
        seq = seq,
        elapsed_ms = elapsed_ms,
        has_layout = has_layout,
    );
}

/// Emit event: an evaluation failed (warning level).
pub fn emit_evaluation_failed(seq: u64, elapsed_ms: u64, kind: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "evaluation.failed",
        seq = seq,
        elapsed_ms = elapsed_ms,
        kind = %kind,
        error = %error,
    );
}

/// Emit event: a finished evaluation was dropped because a newer one exists.
pub fn emit_evaluation_superseded(seq: u64, latest: u64) {
    tracing::debug!(event = "evaluation.superseded", seq = seq, latest = latest);
}

/// Emit event: a fresh execution context is up and answered `version`.
pub fn emit_context_ready(generation: u64, launcher: &str, version: &str, debugging: bool) {
    info!(
        event = "context.ready",
        generation = generation,
        launcher = %launcher,
        renderer_version = %version,
        debugging_supported = debugging,
    );
}

/// Emit event: the execution context was torn down on request.
pub fn emit_context_terminated(generation: u64, pending: usize) {
    info!(
        event = "context.terminated",
        generation = generation,
        pending = pending,
    );
}

/// Emit event: the execution context went away on its own (warning level).
pub fn emit_context_lost(generation: u64, pending: usize) {
    warn!(event = "context.lost", generation = generation, pending = pending);
}

/// Emit event: the user asked for a restart, possibly with a new timeout.
pub fn emit_context_restart(timeout_ms: u64) {
    info!(event = "context.restart", timeout_ms = timeout_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_span_create() {
        let _span = SessionSpan::enter("test-session");
        emit_evaluation_started(1, 10, 20_000, true);
        emit_evaluation_superseded(1, 2);
    }
}
