//! A live connection to one peer server.

use std::sync::Arc;
use std::time::Duration;

use super::{PeerSession, ToolInfo, TransportHandle};

pub enum ConnectionKind {
    /// Child process speaking JSON-RPC over stdio.
    Local { session: Arc<dyn PeerSession> },
    /// Persistent HTTP/SSE session.
    Remote {
        session: Arc<dyn PeerSession>,
        session_id: String,
        url: String,
        transport: Box<dyn TransportHandle>,
    },
}

/// Runtime handle owned by the registry and shared with toolkits.
pub struct Connection {
    pub server_name: String,
    pub kind: ConnectionKind,
    /// Catalogue snapshot taken at connect time.
    pub tools: Vec<ToolInfo>,
    pub timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_name", &self.server_name)
            .field("transport", &self.transport_label())
            .field("tools", &self.tool_names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Connection {
    pub fn session(&self) -> &Arc<dyn PeerSession> {
        match &self.kind {
            ConnectionKind::Local { session } | ConnectionKind::Remote { session, .. } => session,
        }
    }

    pub fn transport_label(&self) -> &'static str {
        match self.kind {
            ConnectionKind::Local { .. } => "stdio",
            ConnectionKind::Remote { .. } => "http",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.kind {
            ConnectionKind::Remote { session_id, .. } => Some(session_id),
            ConnectionKind::Local { .. } => None,
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// Best-effort close. Remote connections always close the session and
    /// then the transport, even if the first step fails. Never errors.
    pub async fn close(&self) {
        match &self.kind {
            ConnectionKind::Local { session } => {
                if let Err(e) = session.close().await {
                    tracing::warn!("error closing MCP server '{}': {:#}", self.server_name, e);
                }
            }
            ConnectionKind::Remote {
                session,
                session_id,
                url,
                transport,
            } => {
                if let Err(e) = session.close().await {
                    tracing::warn!(
                        session_id = %session_id,
                        "error closing session for remote MCP server '{}' at {}: {:#}",
                        self.server_name,
                        url,
                        e
                    );
                }
                if let Err(e) = transport.close().await {
                    tracing::warn!(
                        session_id = %session_id,
                        "error closing transport for remote MCP server '{}' at {}: {:#}",
                        self.server_name,
                        url,
                        e
                    );
                }
            }
        }
        tracing::debug!("closed MCP server '{}'", self.server_name);
    }
}
