//! Error types for the evaluation channel.

use serde::{Deserialize, Serialize};

use super::protocol::WireError;
use super::ChannelState;

/// Why an evaluation (or bring-up call) did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("evaluation timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    /// The user's code failed (syntax or runtime fault).
    #[error("{message}")]
    Execution { message: String },

    /// The context failed for reasons not attributable to user code.
    #[error("execution context fault: {message}")]
    ContextFault { message: String },

    #[error("execution context terminated")]
    Terminated,

    #[error("execution context not ready (state: {state})")]
    NotReady { state: ChannelState },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("failed to launch execution context: {0}")]
    Launch(String),
}

impl EvalError {
    /// Whether the failure indicates a defect worth reporting upstream.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EvalError::ContextFault { .. } | EvalError::Protocol(_) | EvalError::Launch(_)
        )
    }

    /// Human-readable message, as shown in the preview error panel.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EvalError::Timeout { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::Timeout { .. } => ErrorKind::Timeout,
            EvalError::Execution { .. } => ErrorKind::Execution,
            EvalError::ContextFault { .. } | EvalError::Protocol(_) | EvalError::Launch(_) => {
                ErrorKind::ContextFault
            }
            EvalError::Terminated | EvalError::NotReady { .. } => ErrorKind::Terminated,
        }
    }
}

impl From<WireError> for EvalError {
    fn from(err: WireError) -> Self {
        if err.fatal {
            EvalError::ContextFault {
                message: err.message,
            }
        } else {
            EvalError::Execution {
                message: err.message,
            }
        }
    }
}

/// Coarse classification, as published to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Execution,
    ContextFault,
    Terminated,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Execution => "execution",
            ErrorKind::ContextFault => "context_fault",
            ErrorKind::Terminated => "terminated",
        }
    }
}

/// Error as published in preview state: `{message, fatal}` plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedError {
    pub kind: ErrorKind,
    pub message: String,
    pub fatal: bool,
}

impl From<&EvalError> for PublishedError {
    fn from(err: &EvalError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            fatal: err.is_fatal(),
        }
    }
}

/// Result type for channel operations.
pub type EvalResult<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_error_maps_by_fatal_flag() {
        let user: EvalError = WireError::user("x is not defined").into();
        assert_eq!(
            user,
            EvalError::Execution {
                message: "x is not defined".into()
            }
        );
        assert!(!user.is_fatal());

        let fault: EvalError = WireError::fatal("font cache corrupted").into();
        assert!(fault.is_fatal());
        assert_eq!(fault.kind(), ErrorKind::ContextFault);
    }

    #[test]
    fn test_timeout_message_names_cause() {
        let err = EvalError::Timeout { limit_ms: 20_000 };
        assert!(!err.is_fatal());
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out after 20000ms"));
    }

    #[test]
    fn test_published_error() {
        let published = PublishedError::from(&EvalError::Terminated);
        assert_eq!(published.kind, ErrorKind::Terminated);
        assert!(!published.fatal);
        assert_eq!(published.message, "execution context terminated");
    }
}
