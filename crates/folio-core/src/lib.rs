//! Folio Core Library
//!
//! Evaluates document source in an isolated execution context and keeps the
//! preview, the layout debugger and shareable links in sync.
//!
//! - [`channel`]: request/response messaging with the execution context
//! - [`orchestrator`]: decides when to evaluate and publishes preview state
//! - [`layout`]: stable ids and parent lookup for layout snapshots
//! - [`codec`] / [`session`]: shareable-link tokens
//! - [`state`]: debugger selection and pagination
//! - [`catalog`]: bundled examples and docs

pub mod catalog;
pub mod channel;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod layout;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod worker;

pub use catalog::{normalize_example, CatalogError, ExampleCatalog, FsCatalog};
pub use channel::{
    ArtifactRef, Capability, ChannelConfig, ChannelState, ContextLauncher, EvalError, EvalResult,
    EvaluateOptions, EvaluationChannel, EvaluationRequest, InProcessLauncher, ProcessLauncher,
    PublishedError, RenderOutput,
};
pub use codec::{decode_token, encode_token, CodecError, CodecScheme, Scheme};
pub use config::{ConfigError, FolioConfig};
pub use diagnostics::{DiagnosticSink, FatalReport, MemorySink, TracingSink};
pub use layout::{index, BoxGeometry, LayoutNode, LayoutTree};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorHandle, OrchestratorStopped, PreviewState,
};
pub use session::{create_link, parse_link, parse_query, ResolvedSession, SessionParams};
pub use state::{DebuggerState, Pagination, PaginationState};
pub use worker::RenderBackend;

pub use metrics::METRICS;
pub use obs::SessionSpan;
pub use telemetry::init_tracing;

/// Folio version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
