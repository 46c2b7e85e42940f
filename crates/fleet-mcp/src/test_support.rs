//! Scripted fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::error::{McpError, McpResult};
use crate::mcp::{
    CallOutcome, Connection, ConnectionKind, Connector, DescriptorSource, PeerSession,
    ServerDescriptor, ToolInfo, TransportConfig, TransportHandle,
};

pub type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone)]
pub enum FakeReply {
    Outcome(CallOutcome),
    Fail(String),
    Hang,
}

pub fn text_outcome(segments: &[&str]) -> CallOutcome {
    CallOutcome {
        content: segments
            .iter()
            .map(|s| json!({ "type": "text", "text": s }))
            .collect(),
        ..CallOutcome::default()
    }
}

#[derive(Clone)]
pub struct FakeSession {
    server: String,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
    replies: Arc<Mutex<HashMap<String, FakeReply>>>,
    calls: Arc<Mutex<Vec<(String, Option<JsonMap<String, JsonValue>>)>>>,
    events: EventLog,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::for_server("fake", Arc::default())
    }

    pub fn for_server(server: &str, events: EventLog) -> Self {
        Self {
            server: server.to_string(),
            closes: Arc::default(),
            fail_close: false,
            replies: Arc::default(),
            calls: Arc::default(),
            events,
        }
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn with_reply(self, tool: &str, reply: FakeReply) -> Self {
        lock(&self.replies).insert(tool.to_string(), reply);
        self
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, Option<JsonMap<String, JsonValue>>)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl PeerSession for FakeSession {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonMap<String, JsonValue>>,
    ) -> anyhow::Result<CallOutcome> {
        lock(&self.calls).push((name.to_string(), arguments));
        let reply = lock(&self.replies).get(name).cloned();
        match reply {
            None => Ok(text_outcome(&[&format!("{name} ok")])),
            Some(FakeReply::Outcome(o)) => Ok(o),
            Some(FakeReply::Fail(msg)) => Err(anyhow::anyhow!(msg)),
            Some(FakeReply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CallOutcome::default())
            }
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).push(format!("close:{}", self.server));
        if self.fail_close {
            anyhow::bail!("injected close failure");
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    closes: Arc<AtomicUsize>,
    fail_close: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportHandle for FakeTransport {
    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            anyhow::bail!("injected transport close failure");
        }
        Ok(())
    }
}

#[derive(Clone)]
enum Script {
    Tools(Vec<String>),
    Error(McpError),
}

/// Connector whose per-server outcome is scripted by the test.
#[derive(Default)]
pub struct FakeConnector {
    scripts: Mutex<HashMap<String, Script>>,
    delays: Mutex<HashMap<String, Duration>>,
    replies: Mutex<HashMap<String, Vec<(String, FakeReply)>>>,
    attempts: Mutex<HashMap<String, usize>>,
    sessions: Mutex<HashMap<String, Vec<FakeSession>>>,
    events: EventLog,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_tools(&self, server: &str, tools: &[&str]) {
        lock(&self.scripts).insert(
            server.to_string(),
            Script::Tools(tools.iter().map(|t| t.to_string()).collect()),
        );
    }

    pub fn script_error(&self, server: &str, error: McpError) {
        lock(&self.scripts).insert(server.to_string(), Script::Error(error));
    }

    pub fn script_delay(&self, server: &str, delay: Duration) {
        lock(&self.delays).insert(server.to_string(), delay);
    }

    pub fn script_reply(&self, server: &str, tool: &str, reply: FakeReply) {
        lock(&self.replies)
            .entry(server.to_string())
            .or_default()
            .push((tool.to_string(), reply));
    }

    pub fn attempts(&self, server: &str) -> usize {
        lock(&self.attempts).get(server).copied().unwrap_or(0)
    }

    pub fn sessions(&self, server: &str) -> Vec<FakeSession> {
        lock(&self.sessions).get(server).cloned().unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> McpResult<Connection> {
        let name = descriptor.name.clone();
        *lock(&self.attempts).entry(name.clone()).or_default() += 1;
        lock(&self.events).push(format!("connect:{name}"));
        let delay = lock(&self.delays).get(&name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let script = lock(&self.scripts).get(&name).cloned();
        let tools = match script {
            Some(Script::Tools(tools)) => tools,
            Some(Script::Error(e)) => return Err(e),
            None => {
                return Err(McpError::ConnectFailed {
                    server: name,
                    transport: descriptor.transport.label().to_string(),
                    reason: "unscripted server".to_string(),
                });
            }
        };

        let mut session = FakeSession::for_server(&name, Arc::clone(&self.events));
        for (tool, reply) in lock(&self.replies).get(&name).cloned().unwrap_or_default() {
            session = session.with_reply(&tool, reply);
        }
        lock(&self.sessions)
            .entry(name.clone())
            .or_default()
            .push(session.clone());

        let kind = match &descriptor.transport {
            TransportConfig::Stdio { .. } => ConnectionKind::Local {
                session: Arc::new(session),
            },
            TransportConfig::Remote { url, .. } => ConnectionKind::Remote {
                session: Arc::new(session),
                session_id: uuid::Uuid::new_v4().to_string(),
                url: url.clone(),
                transport: Box::new(FakeTransport::new()),
            },
        };
        Ok(Connection {
            server_name: name,
            kind,
            tools: tools
                .into_iter()
                .map(|t| ToolInfo {
                    description: Some(format!("{t} tool")),
                    name: t,
                    input_schema: json!({ "type": "object" }),
                })
                .collect(),
            timeout: descriptor.timeout(),
        })
    }
}

/// In-memory descriptor source; tests swap the payload between reloads.
#[derive(Clone, Default)]
pub struct StaticSource {
    payload: Arc<Mutex<Option<JsonValue>>>,
}

impl StaticSource {
    pub fn new(payload: JsonValue) -> Self {
        let source = Self::default();
        source.set(payload);
        source
    }

    pub fn set(&self, payload: JsonValue) {
        *lock(&self.payload) = Some(payload);
    }
}

impl DescriptorSource for StaticSource {
    fn load(&self) -> Option<JsonValue> {
        lock(&self.payload).clone()
    }
}

/// A `mcpServers` payload entry for a stdio server.
pub fn stdio_entry(enabled: bool) -> JsonValue {
    json!({ "type": "stdio", "command": "fake-server", "enabled": enabled, "timeout_seconds": 5 })
}

pub fn remote_entry(url: &str) -> JsonValue {
    json!({ "type": "http", "url": url, "timeout_seconds": 5 })
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
