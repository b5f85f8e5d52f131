//! Context side of the protocol.
//!
//! A renderer implements [`RenderBackend`]; [`serve`] drives it from a
//! newline-delimited JSON stream. Requests are handled one at a time, in
//! arrival order, like a single-threaded script worker: a slow evaluation
//! delays everything queued behind it until the controller restarts the
//! context.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::channel::protocol::{
    Capability, ContextToHost, EvaluateReply, EvaluationRequest, HostToContext, ReplyOutcome,
    WireError,
};

/// The rendering collaborator, seen from inside the execution context.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// One-time bring-up (font registration, module loader warm-up, …).
    async fn init(&self) -> Result<(), WireError> {
        Ok(())
    }

    async fn version(&self) -> Result<Capability, WireError>;

    async fn evaluate(&self, request: EvaluationRequest) -> Result<EvaluateReply, WireError>;
}

/// Serve protocol requests from `reader`, writing replies to `writer`,
/// until the input stream closes.
pub async fn serve<R, W>(reader: R, writer: W, backend: Arc<dyn RenderBackend>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut writer = writer;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<HostToContext>(&line) {
            Ok(request) => {
                let id = request.id();
                debug!(id, kind = request.kind(), "context request");
                ContextToHost {
                    id,
                    outcome: dispatch(backend.as_ref(), request).await,
                }
            }
            Err(err) => {
                // Without a readable id nobody is waiting for an answer.
                let Some(id) = salvage_id(&line) else {
                    warn!(error = %err, "dropping unreadable request");
                    continue;
                };
                ContextToHost {
                    id,
                    outcome: ReplyOutcome::Error(WireError::fatal(format!(
                        "malformed request: {err}"
                    ))),
                }
            }
        };

        let mut encoded = serde_json::to_string(&reply).map_err(std::io::Error::other)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn dispatch(backend: &dyn RenderBackend, request: HostToContext) -> ReplyOutcome {
    let result = match request {
        HostToContext::Init { .. } => backend.init().await.map(|()| Value::Null),
        HostToContext::Version { .. } => backend.version().await.and_then(to_value),
        HostToContext::Evaluate { payload, .. } => {
            backend.evaluate(payload).await.and_then(to_value)
        }
    };
    match result {
        Ok(value) => ReplyOutcome::Ok(value),
        Err(err) => ReplyOutcome::Error(err),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, WireError> {
    serde_json::to_value(value).map_err(|e| WireError::fatal(format!("unserializable reply: {e}")))
}

fn salvage_id(line: &str) -> Option<u64> {
    serde_json::from_str::<Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl RenderBackend for Fixed {
        async fn version(&self) -> Result<Capability, WireError> {
            Ok(Capability {
                version: "1.0.0".into(),
                debugging_supported: true,
            })
        }

        async fn evaluate(&self, request: EvaluationRequest) -> Result<EvaluateReply, WireError> {
            if request.code.contains("throw") {
                return Err(WireError::user("boom"));
            }
            Ok(EvaluateReply {
                url: crate::channel::protocol::ArtifactRef("mem://1".into()),
                layout: None,
            })
        }
    }

    async fn roundtrip(input: &str) -> Vec<Value> {
        let (mut host, context) = tokio::io::duplex(4096);
        let (r, w) = tokio::io::split(context);
        let task = tokio::spawn(serve(r, w, Arc::new(Fixed)));

        host.write_all(input.as_bytes()).await.unwrap();
        host.shutdown().await.unwrap();
        let host_r = host;
        let mut lines = BufReader::new(host_r).lines();
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(serde_json::from_str(&line).unwrap());
        }
        task.await.unwrap().unwrap();
        out
    }

    #[tokio::test]
    async fn test_replies_echo_correlation_ids() {
        let replies = roundtrip(concat!(
            r#"{"type":"init","id":1}"#,
            "\n",
            r#"{"type":"version","id":2}"#,
            "\n",
            r#"{"type":"evaluate","id":3,"payload":{"code":"throw","options":{"modules":true},"timeout":10}}"#,
            "\n"
        ))
        .await;
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], serde_json::json!({"id": 1, "ok": null}));
        assert_eq!(replies[1]["ok"]["isDebuggingSupported"], true);
        assert_eq!(replies[2]["error"]["message"], "boom");
        assert_eq!(replies[2]["error"]["fatal"], false);
    }

    #[tokio::test]
    async fn test_malformed_request_with_id_gets_fatal_reply() {
        let replies = roundtrip("{\"type\":\"paint\",\"id\":9}\nnot json\n").await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], 9);
        assert_eq!(replies[0]["error"]["fatal"], true);
    }
}
