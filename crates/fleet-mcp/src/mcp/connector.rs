//! Turn a validated descriptor into a live [`Connection`].
//!
//! Launches stdio servers or opens SSE sessions, runs the initialize
//! handshake and caches `tools/list`, all under the descriptor timeout.
//! Failures are classified into [`McpError`] here, where the cause is known.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_mcp_sdk::McpClient;
use rust_mcp_sdk::mcp_client::{ClientRuntime, client_runtime_core};
use rust_mcp_sdk::schema::{
    ClientCapabilities, Implementation, InitializeRequestParams, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::{
    ClientSseTransport, ClientSseTransportOptions, StdioTransport, TransportOptions,
};

use super::{
    AuthConfig, Connection, ConnectionKind, PeerClientHandler, SdkSession, ServerDescriptor,
    ToolInfo, TransportConfig,
};
use crate::error::{McpError, McpResult};

/// Opens connections to peer servers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor) -> McpResult<Connection>;
}

/// [`Connector`] backed by the `rust-mcp-sdk` stdio and SSE client transports.
#[derive(Debug, Clone)]
pub struct SdkConnector {
    client_name: String,
}

impl Default for SdkConnector {
    fn default() -> Self {
        Self {
            client_name: "fleet-mcp".to_string(),
        }
    }
}

#[async_trait]
impl Connector for SdkConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> McpResult<Connection> {
        match &descriptor.transport {
            TransportConfig::Stdio { env, .. } => self.connect_stdio(descriptor, env).await,
            TransportConfig::Remote { url, auth, .. } => {
                self.connect_remote(descriptor, url, auth.as_ref()).await
            }
        }
    }
}

impl SdkConnector {
    fn client_details(&self) -> InitializeRequestParams {
        InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: self.client_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
            },
            protocol_version: LATEST_PROTOCOL_VERSION.into(),
        }
    }

    async fn connect_stdio(
        &self,
        descriptor: &ServerDescriptor,
        env: &HashMap<String, String>,
    ) -> McpResult<Connection> {
        let server = descriptor.name.as_str();
        let transport_label = descriptor.transport.label();
        let timeout = descriptor.timeout();
        let argv = descriptor.command_line();
        let Some((command, args)) = argv.split_first() else {
            return Err(McpError::InvalidConfig {
                server: server.to_string(),
                reason: "missing command for stdio transport".to_string(),
            });
        };
        tracing::debug!("launching MCP server '{}': {}", server, argv.join(" "));

        // the child inherits our environment; descriptor entries win
        let transport = StdioTransport::create_with_server_launch(
            command,
            args.to_vec(),
            Some(env.clone()),
            TransportOptions::default(),
        )
        .map_err(|e| McpError::ConnectFailed {
            server: server.to_string(),
            transport: transport_label.to_string(),
            reason: format!("transport error: {}", e),
        })?;

        let client = client_runtime_core::create_client(
            self.client_details(),
            transport,
            PeerClientHandler,
        );
        let connect_failed = |reason: String| McpError::ConnectFailed {
            server: server.to_string(),
            transport: transport_label.to_string(),
            reason,
        };
        let tools = match handshake(&client, timeout).await {
            Ok(tools) => tools,
            Err(HandshakeError::Timeout) => {
                shut_down_quietly(server, &client).await;
                return Err(McpError::ConnectTimeout {
                    server: server.to_string(),
                    transport: transport_label.to_string(),
                    timeout_seconds: descriptor.timeout_secs(),
                });
            }
            Err(HandshakeError::Failed { message, .. }) => {
                shut_down_quietly(server, &client).await;
                return Err(connect_failed(message));
            }
        };

        tracing::info!(
            "connected to MCP server '{}' via stdio ({} tools)",
            server,
            tools.len()
        );
        Ok(Connection {
            server_name: server.to_string(),
            kind: ConnectionKind::Local {
                session: Arc::new(SdkSession::new(client)),
            },
            tools,
            timeout,
        })
    }

    async fn connect_remote(
        &self,
        descriptor: &ServerDescriptor,
        url: &str,
        auth: Option<&AuthConfig>,
    ) -> McpResult<Connection> {
        let server = descriptor.name.as_str();
        let transport_label = descriptor.transport.label();
        let timeout = descriptor.timeout();
        let url = url.trim();
        if url.is_empty() {
            return Err(McpError::InvalidConfig {
                server: server.to_string(),
                reason: format!("missing URL for {} transport", transport_label),
            });
        }

        let mut headers = HashMap::new();
        if let Some(auth) = auth {
            match auth.build_header(server) {
                Ok((name, value)) => {
                    headers.insert(name, value);
                }
                Err(e) => tracing::warn!("skipping auth for MCP server '{}': {}", server, e),
            }
        }

        let options = ClientSseTransportOptions {
            request_timeout: timeout,
            custom_headers: (!headers.is_empty()).then_some(headers),
            ..Default::default()
        };
        let transport =
            ClientSseTransport::new(url, options).map_err(|e| McpError::InvalidConfig {
                server: server.to_string(),
                reason: format!("failed to create HTTP transport for {}: {}", url, e),
            })?;

        let client = client_runtime_core::create_client(
            self.client_details(),
            transport,
            PeerClientHandler,
        );
        let tools = match handshake(&client, timeout).await {
            Ok(tools) => tools,
            Err(HandshakeError::Timeout) => {
                shut_down_quietly(server, &client).await;
                return Err(McpError::ConnectTimeout {
                    server: server.to_string(),
                    transport: transport_label.to_string(),
                    timeout_seconds: descriptor.timeout_secs(),
                });
            }
            Err(HandshakeError::Failed { source_type, message }) => {
                shut_down_quietly(server, &client).await;
                return Err(classify_remote_failure(
                    server,
                    transport_label,
                    url,
                    source_type,
                    &message,
                ));
            }
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            session_id = %session_id,
            "connected to remote MCP server '{}' at {} ({} tools)",
            server,
            url,
            tools.len()
        );
        let session = SdkSession::new(client);
        let transport = Box::new(session.transport_guard());
        Ok(Connection {
            server_name: server.to_string(),
            kind: ConnectionKind::Remote {
                session: Arc::new(session),
                session_id,
                url: url.to_string(),
                transport,
            },
            tools,
            timeout,
        })
    }
}

enum HandshakeError {
    Timeout,
    Failed {
        source_type: &'static str,
        message: String,
    },
}

/// Start the client and snapshot its catalogue.
async fn handshake(
    client: &Arc<ClientRuntime>,
    timeout: Duration,
) -> Result<Vec<ToolInfo>, HandshakeError> {
    match tokio::time::timeout(timeout, client.clone().start()).await {
        Err(_) => return Err(HandshakeError::Timeout),
        Ok(Err(e)) => {
            return Err(HandshakeError::Failed {
                source_type: std::any::type_name_of_val(&e),
                message: e.to_string(),
            });
        }
        Ok(Ok(())) => {}
    }

    let listed = match tokio::time::timeout(timeout, client.list_tools(None)).await {
        Err(_) => return Err(HandshakeError::Timeout),
        Ok(Err(e)) => {
            return Err(HandshakeError::Failed {
                source_type: std::any::type_name_of_val(&e),
                message: e.to_string(),
            });
        }
        Ok(Ok(listed)) => listed,
    };
    Ok(listed
        .tools
        .iter()
        .filter_map(|t| serde_json::to_value(t).ok())
        .filter_map(|v| ToolInfo::from_json(&v))
        .collect())
}

async fn shut_down_quietly(server: &str, client: &Arc<ClientRuntime>) {
    if let Err(e) = client.shut_down().await {
        tracing::debug!("cleanup after failed connect to '{}': {}", server, e);
    }
}

const NETWORK_HINTS: &[&str] = &[
    "connect",
    "refused",
    "dns",
    "resolve",
    "unreachable",
    "connection reset",
    "error sending request",
];

/// Classify a remote handshake failure by the HTTP status or network cause
/// visible in its message.
pub(crate) fn classify_remote_failure(
    server: &str,
    transport: &str,
    url: &str,
    source_type: &str,
    message: &str,
) -> McpError {
    if let Some(status) = http_status_in(message) {
        return if status == 401 || status == 403 {
            McpError::AuthFailed {
                server: server.to_string(),
                url: url.to_string(),
                status,
                reason: message.to_string(),
            }
        } else {
            McpError::RemoteHttp {
                server: server.to_string(),
                url: url.to_string(),
                status,
                reason: message.to_string(),
            }
        };
    }
    let lower = message.to_ascii_lowercase();
    if NETWORK_HINTS.iter().any(|h| lower.contains(h)) {
        return McpError::ConnectFailed {
            server: server.to_string(),
            transport: transport.to_string(),
            reason: format!("Cannot reach server at {}: {}", url, message),
        };
    }
    McpError::ConnectFailed {
        server: server.to_string(),
        transport: transport.to_string(),
        reason: format!("{}: {}", source_type, message),
    }
}

/// First standalone 4xx/5xx number in `message`. Digits that follow `:`,
/// `/` or `.` are skipped so ports and addresses are not mistaken for
/// statuses.
pub(crate) fn http_status_in(message: &str) -> Option<u16> {
    let bytes = message.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let preceded_ok = start == 0 || !matches!(bytes[start - 1], b':' | b'/' | b'.');
        let followed_ok = i == bytes.len() || bytes[i] != b'.';
        if i - start == 3
            && preceded_ok
            && followed_ok
            && let Ok(code) = message[start..i].parse::<u16>()
            && (400..600).contains(&code)
        {
            return Some(code);
        }
    }
    None
}
