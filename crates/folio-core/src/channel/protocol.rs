//! Wire protocol between the controller and the execution context.
//!
//! Newline-delimited JSON. Every request carries a correlation id that the
//! context echoes back in exactly one reply:
//!
//! ```text
//! → {"type":"evaluate","id":7,"payload":{"code":"…","options":{"modules":true},"timeout":20000}}
//! ← {"id":7,"ok":{"url":"blob:…","layout":{…}}}
//! ← {"id":7,"error":{"message":"…","fatal":false}}
//! ```

use serde::{Deserialize, Serialize};

/// Correlation id linking a request to its reply.
pub type CorrelationId = u64;

/// Evaluation options forwarded to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateOptions {
    /// Evaluate the source as an ES module (required for the layout debugger).
    pub modules: bool,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self { modules: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub code: String,
    pub options: EvaluateOptions,
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
}

/// Opaque handle to a rendered artifact (blob URL, file path, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Successful `evaluate` payload as sent by the context. The layout stays
/// raw here; it is parsed and indexed on the controller side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateReply {
    pub url: ArtifactRef,
    #[serde(default)]
    pub layout: Option<serde_json::Value>,
}

/// Renderer capabilities, fetched once per context lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub version: String,
    #[serde(rename = "isDebuggingSupported", default)]
    pub debugging_supported: bool,
}

/// Failure reported by the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default)]
    pub fatal: bool,
}

impl WireError {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Controller → context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostToContext {
    Init {
        id: CorrelationId,
    },
    Version {
        id: CorrelationId,
    },
    Evaluate {
        id: CorrelationId,
        payload: EvaluationRequest,
    },
}

impl HostToContext {
    pub fn id(&self) -> CorrelationId {
        match self {
            HostToContext::Init { id }
            | HostToContext::Version { id }
            | HostToContext::Evaluate { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HostToContext::Init { .. } => "init",
            HostToContext::Version { .. } => "version",
            HostToContext::Evaluate { .. } => "evaluate",
        }
    }
}

/// Context → controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextToHost {
    pub id: CorrelationId,
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyOutcome {
    Ok(serde_json::Value),
    Error(WireError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evaluate_request_wire_shape() {
        let msg = HostToContext::Evaluate {
            id: 7,
            payload: EvaluationRequest {
                code: "x".into(),
                options: EvaluateOptions { modules: false },
                timeout_ms: 20_000,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "evaluate",
                "id": 7,
                "payload": { "code": "x", "options": { "modules": false }, "timeout": 20000 }
            })
        );
        assert_eq!(msg.id(), 7);
        assert_eq!(msg.kind(), "evaluate");
    }

    #[test]
    fn test_reply_outcomes_parse() {
        let ok: ContextToHost =
            serde_json::from_str(r#"{"id":3,"ok":{"url":"blob:1","layout":null}}"#).unwrap();
        assert_eq!(ok.id, 3);
        match ok.outcome {
            ReplyOutcome::Ok(v) => {
                let reply: EvaluateReply = serde_json::from_value(v).unwrap();
                assert_eq!(reply.url.as_str(), "blob:1");
                assert!(reply.layout.is_none());
            }
            other => panic!("expected Ok, got {:?}", other),
        }

        let err: ContextToHost =
            serde_json::from_str(r#"{"id":4,"error":{"message":"boom","fatal":true}}"#).unwrap();
        assert_eq!(err.outcome, ReplyOutcome::Error(WireError::fatal("boom")));
    }

    #[test]
    fn test_capability_wire_names() {
        let cap: Capability =
            serde_json::from_str(r#"{"version":"3.4.0","isDebuggingSupported":true}"#).unwrap();
        assert!(cap.debugging_supported);
        assert_eq!(cap.version, "3.4.0");
    }
}
