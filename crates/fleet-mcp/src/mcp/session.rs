//! Live protocol sessions behind a small trait seam.
//!
//! The connector is the only place that knows about `rust-mcp-sdk` client
//! types; everything above it talks to [`PeerSession`] and
//! [`TransportHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use rust_mcp_sdk::McpClient;
use rust_mcp_sdk::mcp_client::{ClientHandlerCore, ClientRuntime};
use rust_mcp_sdk::schema::schema_utils::{
    NotificationFromServer, RequestFromServer, ResultFromClient,
};
use rust_mcp_sdk::schema::{CallToolRequestParams, RpcError};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

/// Raw result of one `tools/call`, before toolkit normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutcome {
    /// The `content` array as returned by the peer.
    pub content: Vec<JsonValue>,
    pub structured: Option<JsonValue>,
    pub is_error: bool,
}

impl CallOutcome {
    /// Read a protocol `CallToolResult` from its JSON form.
    pub fn from_json(value: &JsonValue) -> Self {
        Self {
            content: value
                .get("content")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default(),
            structured: value
                .get("structuredContent")
                .filter(|s| !s.is_null())
                .cloned(),
            is_error: value
                .get("isError")
                .and_then(|e| e.as_bool())
                .unwrap_or(false),
        }
    }

    /// Text of every `type == "text"` segment, in order.
    pub fn text_segments(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter(|c| c.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|c| c.get("text").and_then(|t| t.as_str()))
            .collect()
    }
}

/// One initialized protocol session with a peer.
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonMap<String, JsonValue>>,
    ) -> anyhow::Result<CallOutcome>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Underlying transport of a remote session, closed after the session.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn close(&self) -> anyhow::Result<()>;
}

/// Teardown of a client runtime, split out so close ordering can be driven
/// without a live peer.
#[async_trait]
trait RuntimeShutdown: Send + Sync {
    async fn shut_down(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl RuntimeShutdown for ClientRuntime {
    async fn shut_down(&self) -> anyhow::Result<()> {
        McpClient::shut_down(self)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

/// Shared between a session and its transport guard. Latches only after a
/// successful shutdown, so a failed session close leaves the transport step
/// to retry.
struct ShutdownLatch {
    runtime: Arc<dyn RuntimeShutdown>,
    done: AtomicBool,
}

impl ShutdownLatch {
    fn new(runtime: Arc<dyn RuntimeShutdown>) -> Self {
        Self {
            runtime,
            done: AtomicBool::new(false),
        }
    }

    async fn shut_down(&self) -> anyhow::Result<()> {
        if self.done.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.runtime.shut_down().await?;
        self.done.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// [`PeerSession`] over an `rust-mcp-sdk` client runtime.
pub struct SdkSession {
    client: Arc<ClientRuntime>,
    latch: Arc<ShutdownLatch>,
}

impl SdkSession {
    pub fn new(client: Arc<ClientRuntime>) -> Self {
        let runtime: Arc<dyn RuntimeShutdown> = Arc::<ClientRuntime>::clone(&client);
        Self {
            client,
            latch: Arc::new(ShutdownLatch::new(runtime)),
        }
    }

    /// Guard for the session's SSE transport, sharing its shutdown latch.
    pub fn transport_guard(&self) -> SseTransportGuard {
        SseTransportGuard {
            latch: Arc::clone(&self.latch),
        }
    }
}

#[async_trait]
impl PeerSession for SdkSession {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonMap<String, JsonValue>>,
    ) -> anyhow::Result<CallOutcome> {
        let params: CallToolRequestParams =
            serde_json::from_value(json!({ "name": name, "arguments": arguments }))?;
        let result = self
            .client
            .call_tool(params)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(CallOutcome::from_json(&serde_json::to_value(&result)?))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.latch.shut_down().await.context("shutdown error")
    }
}

/// Tears the SSE transport down unless the session close already did.
pub struct SseTransportGuard {
    latch: Arc<ShutdownLatch>,
}

#[async_trait]
impl TransportHandle for SseTransportGuard {
    async fn close(&self) -> anyhow::Result<()> {
        self.latch
            .shut_down()
            .await
            .context("transport shutdown error")
    }
}

/// Client handler that ignores server-initiated traffic.
#[derive(Clone)]
pub struct PeerClientHandler;

#[async_trait]
impl ClientHandlerCore for PeerClientHandler {
    async fn handle_request(
        &self,
        _request: RequestFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<ResultFromClient, RpcError> {
        Err(RpcError::method_not_found())
    }

    async fn handle_notification(
        &self,
        _notification: NotificationFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }

    async fn handle_error(
        &self,
        _error: &RpcError,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FlakyRuntime {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl FlakyRuntime {
        fn failing(times: usize) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicUsize::new(times),
                attempts: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RuntimeShutdown for FlakyRuntime {
        async fn shut_down(&self) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("stream already broken");
            }
            Ok(())
        }
    }

    fn latch_and_guard(runtime: &Arc<FlakyRuntime>) -> (Arc<ShutdownLatch>, SseTransportGuard) {
        let latch = Arc::new(ShutdownLatch::new(
            Arc::clone(runtime) as Arc<dyn RuntimeShutdown>
        ));
        let guard = SseTransportGuard {
            latch: Arc::clone(&latch),
        };
        (latch, guard)
    }

    #[tokio::test]
    async fn transport_close_retries_after_failed_session_close() {
        let runtime = FlakyRuntime::failing(1);
        let (latch, guard) = latch_and_guard(&runtime);
        assert!(latch.shut_down().await.is_err());
        guard.close().await.unwrap();
        assert_eq!(runtime.attempts(), 2);
        // Latched now; further closes do nothing.
        guard.close().await.unwrap();
        assert_eq!(runtime.attempts(), 2);
    }

    #[tokio::test]
    async fn transport_close_skips_after_clean_session_close() {
        let runtime = FlakyRuntime::failing(0);
        let (latch, guard) = latch_and_guard(&runtime);
        latch.shut_down().await.unwrap();
        guard.close().await.unwrap();
        assert_eq!(runtime.attempts(), 1);
    }

    #[tokio::test]
    async fn transport_close_error_is_reported() {
        let runtime = FlakyRuntime::failing(2);
        let (latch, guard) = latch_and_guard(&runtime);
        assert!(latch.shut_down().await.is_err());
        let err = guard.close().await.unwrap_err();
        assert!(format!("{:#}", err).contains("transport shutdown error"));
        assert_eq!(runtime.attempts(), 2);
    }

    #[test]
    fn call_outcome_reads_text_and_flags() {
        let out = CallOutcome::from_json(&json!({
            "content": [
                { "type": "text", "text": "line one" },
                { "type": "image", "data": "AAA", "mimeType": "image/png" },
                { "type": "text", "text": "line two" }
            ],
            "isError": true
        }));
        assert_eq!(out.text_segments(), vec!["line one", "line two"]);
        assert!(out.is_error);
        assert!(out.structured.is_none());
    }

    #[test]
    fn call_outcome_tolerates_missing_fields() {
        let out = CallOutcome::from_json(&json!({ "structuredContent": { "ok": 1 } }));
        assert!(out.content.is_empty());
        assert!(!out.is_error);
        assert_eq!(out.structured, Some(json!({ "ok": 1 })));
        assert_eq!(CallOutcome::from_json(&json!(null)), CallOutcome::default());
    }
}
