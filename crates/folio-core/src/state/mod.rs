//! Reactive UI state containers fed by the orchestrator.
//!
//! Each container wraps a `tokio::sync::watch` channel: readers subscribe,
//! and every mutation goes through a named method with a single write owner.

pub mod debugger;
pub mod pagination;

pub use debugger::{DebugSnapshot, DebuggerState, Selection};
pub use pagination::{Pagination, PaginationState};
