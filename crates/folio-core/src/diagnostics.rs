//! Upstream reporting of fatal evaluation failures.
//!
//! Only faults of the execution context are reported; errors in user code
//! are expected and stay local. A report identifies the code by digest and
//! carries a shareable link so the failure can be reproduced.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::error;
use uuid::Uuid;

use crate::channel::{EvalError, EvaluateOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalReport {
    pub session_id: Uuid,
    pub message: String,
    /// SHA-256 of the evaluated source, hex encoded.
    pub code_digest: String,
    pub code_bytes: usize,
    pub options: EvaluateOptions,
    pub link: Option<String>,
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
}

impl FatalReport {
    pub fn new(
        session_id: Uuid,
        err: &EvalError,
        code: &str,
        options: EvaluateOptions,
        link: Option<String>,
        generation: u64,
    ) -> Self {
        Self {
            session_id,
            message: err.message(),
            code_digest: code_digest(code),
            code_bytes: code.len(),
            options,
            link,
            generation,
            timestamp: Utc::now(),
        }
    }
}

pub fn code_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Receiver of fatal reports. Implementations must not assume they are
/// awaited promptly; the orchestrator fires reports on their own tasks.
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    async fn report(&self, report: FatalReport);
}

/// Logs reports as `error!` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl DiagnosticSink for TracingSink {
    async fn report(&self, report: FatalReport) {
        error!(
            event = "diagnostics.fatal",
            session_id = %report.session_id,
            generation = report.generation,
            code_digest = %report.code_digest,
            code_bytes = report.code_bytes,
            modules = report.options.modules,
            link = report.link.as_deref().unwrap_or(""),
            timestamp = %report.timestamp.to_rfc3339(),
            "{}",
            report.message,
        );
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<FatalReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<FatalReport> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl DiagnosticSink for MemorySink {
    async fn report(&self, report: FatalReport) {
        match self.reports.lock() {
            Ok(mut reports) => reports.push(report),
            Err(poisoned) => poisoned.into_inner().push(report),
        }
    }
}
