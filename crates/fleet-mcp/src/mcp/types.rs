//! Shared types for peer server descriptors and cached tool catalogues.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::McpError;

/// Header used for auth when a descriptor does not name one.
pub const DEFAULT_AUTH_HEADER: &str = "Authorization";

/// Remote flavours. `Sse` is an alias of `Http` for connection purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    Http,
    Sse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Bearer,
    ApiKey,
}

/// Credentials attached to every request of a remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub kind: AuthKind,
    pub token: String,
    pub header_name: String,
}

impl AuthConfig {
    /// Build the `(header, value)` pair for this credential.
    pub fn build_header(&self, server: &str) -> Result<(String, String), McpError> {
        let token = self.token.trim();
        if token.is_empty() {
            return Err(McpError::InvalidConfig {
                server: server.to_string(),
                reason: "auth token cannot be empty".to_string(),
            });
        }
        let header = self.header_name.trim();
        if header.is_empty() {
            return Err(McpError::InvalidConfig {
                server: server.to_string(),
                reason: "auth header name cannot be empty".to_string(),
            });
        }
        let value = match self.kind {
            AuthKind::Bearer => format!("Bearer {token}"),
            AuthKind::ApiKey => token.to_string(),
        };
        Ok((header.to_string(), value))
    }
}

/// Transport-specific part of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Remote {
        kind: RemoteKind,
        url: String,
        auth: Option<AuthConfig>,
    },
}

impl TransportConfig {
    /// Label used in logs and error context.
    pub fn label(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Remote {
                kind: RemoteKind::Http,
                ..
            } => "http",
            TransportConfig::Remote {
                kind: RemoteKind::Sse,
                ..
            } => "sse",
        }
    }
}

/// Declarative description of one peer server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: TransportConfig,
    pub enabled: bool,
    /// May be non-positive until [`crate::mcp::validate`] corrects it.
    pub timeout_seconds: i64,
    pub description: String,
}

impl ServerDescriptor {
    /// Connect/invocation timeout. Never zero.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs())
    }

    pub fn timeout_secs(&self) -> u64 {
        u64::try_from(self.timeout_seconds).unwrap_or(0).max(1)
    }

    /// Full argv for stdio servers: `command + args`, or the whitespace-split
    /// command when no args are configured. Empty for remote servers.
    pub fn command_line(&self) -> Vec<String> {
        match &self.transport {
            TransportConfig::Stdio { command, args, .. } => {
                let command = command.trim();
                if command.is_empty() {
                    return Vec::new();
                }
                if args.is_empty() {
                    command.split_whitespace().map(str::to_string).collect()
                } else {
                    std::iter::once(command.to_string())
                        .chain(args.iter().cloned())
                        .collect()
                }
            }
            TransportConfig::Remote { .. } => Vec::new(),
        }
    }
}

/// One function exposed by a peer, as cached at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: JsonValue,
}

impl ToolInfo {
    /// Read a protocol `Tool` from its JSON form (`name`, `description`,
    /// `inputSchema`). Returns `None` without a usable name.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let name = value.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            description: value
                .get("description")
                .and_then(|d| d.as_str())
                .map(str::to_string),
            input_schema: value
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
        })
    }
}
