//! Closed error taxonomy for peer connection management.
//!
//! Every failure the manager, connector, or toolkit can surface maps to one
//! [`McpError`] variant. Each variant carries the context needed to explain the
//! failure to an operator plus a retryability hint for callers that want to
//! back off and try again.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

/// Default backoff hint for transient connection failures.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

pub type McpResult<T> = std::result::Result<T, McpError>;

/// Discriminant of [`McpError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfig,
    ServerNotFound,
    ServerDisabled,
    NoServersAvailable,
    ConnectFailed,
    ConnectTimeout,
    AuthFailed,
    RemoteHttpError,
    ReloadFailed,
    ToolExecutionFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::ServerNotFound => "server_not_found",
            ErrorKind::ServerDisabled => "server_disabled",
            ErrorKind::NoServersAvailable => "no_servers_available",
            ErrorKind::ConnectFailed => "connect_failed",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::RemoteHttpError => "remote_http_error",
            ErrorKind::ReloadFailed => "reload_failed",
            ErrorKind::ToolExecutionFailed => "tool_execution_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// Missing required transport field, or an unusable auth/transport setup.
    #[error("invalid configuration for MCP server '{server}': {reason}")]
    InvalidConfig { server: String, reason: String },

    #[error("MCP server '{server}' not found in configuration")]
    ServerNotFound { server: String },

    #[error("MCP server '{server}' is disabled")]
    ServerDisabled { server: String },

    #[error("no enabled MCP servers available to reload")]
    NoServersAvailable,

    /// Network or process-launch failure.
    #[error("failed to connect to MCP server '{server}' via {transport}: {reason}")]
    ConnectFailed {
        server: String,
        transport: String,
        reason: String,
    },

    #[error("connection to MCP server '{server}' via {transport} timed out after {timeout_seconds}s")]
    ConnectTimeout {
        server: String,
        transport: String,
        timeout_seconds: u64,
    },

    /// 401/403 from a remote peer.
    #[error("authentication failed for MCP server '{server}' at {url} (HTTP {status}): {reason}")]
    AuthFailed {
        server: String,
        url: String,
        status: u16,
        reason: String,
    },

    #[error("HTTP error from MCP server '{server}' at {url} (HTTP {status}): {reason}")]
    RemoteHttp {
        server: String,
        url: String,
        status: u16,
        reason: String,
    },

    #[error("failed to reload MCP server '{server}': {reason}")]
    ReloadFailed { server: String, reason: String },

    #[error("tool '{tool}' on MCP server '{server}' failed: {reason}")]
    ToolExecution {
        server: String,
        tool: String,
        reason: String,
    },
}

impl McpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            McpError::ServerNotFound { .. } => ErrorKind::ServerNotFound,
            McpError::ServerDisabled { .. } => ErrorKind::ServerDisabled,
            McpError::NoServersAvailable => ErrorKind::NoServersAvailable,
            McpError::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            McpError::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            McpError::AuthFailed { .. } => ErrorKind::AuthFailed,
            McpError::RemoteHttp { .. } => ErrorKind::RemoteHttpError,
            McpError::ReloadFailed { .. } => ErrorKind::ReloadFailed,
            McpError::ToolExecution { .. } => ErrorKind::ToolExecutionFailed,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            McpError::ConnectFailed { .. } | McpError::ConnectTimeout { .. } => true,
            McpError::RemoteHttp { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Suggested delay before retrying; `None` for non-retryable errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            McpError::ConnectFailed { .. } => Some(DEFAULT_RETRY_AFTER),
            McpError::ConnectTimeout {
                timeout_seconds, ..
            } => Some(Duration::from_secs(*timeout_seconds)),
            McpError::RemoteHttp { status, .. } if *status >= 500 => Some(DEFAULT_RETRY_AFTER),
            _ => None,
        }
    }

    /// Server the error refers to, when there is one.
    pub fn server_name(&self) -> Option<&str> {
        match self {
            McpError::InvalidConfig { server, .. }
            | McpError::ServerNotFound { server }
            | McpError::ServerDisabled { server }
            | McpError::ConnectFailed { server, .. }
            | McpError::ConnectTimeout { server, .. }
            | McpError::AuthFailed { server, .. }
            | McpError::RemoteHttp { server, .. }
            | McpError::ReloadFailed { server, .. }
            | McpError::ToolExecution { server, .. } => Some(server),
            McpError::NoServersAvailable => None,
        }
    }

    /// Short reason without the server prefix, used in reload results.
    pub fn reason(&self) -> String {
        match self {
            McpError::InvalidConfig { reason, .. }
            | McpError::ConnectFailed { reason, .. }
            | McpError::AuthFailed { reason, .. }
            | McpError::RemoteHttp { reason, .. }
            | McpError::ReloadFailed { reason, .. }
            | McpError::ToolExecution { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Structured context for logs and API envelopes.
    pub fn context(&self) -> JsonValue {
        let mut ctx = match self {
            McpError::InvalidConfig { server, reason } => {
                json!({ "server_name": server, "reason": reason })
            }
            McpError::ServerNotFound { server } | McpError::ServerDisabled { server } => {
                json!({ "server_name": server })
            }
            McpError::NoServersAvailable => json!({}),
            McpError::ConnectFailed {
                server,
                transport,
                reason,
            } => json!({ "server_name": server, "transport": transport, "reason": reason }),
            McpError::ConnectTimeout {
                server,
                transport,
                timeout_seconds,
            } => json!({
                "server_name": server,
                "transport": transport,
                "timeout_seconds": timeout_seconds,
            }),
            McpError::AuthFailed {
                server,
                url,
                status,
                reason,
            }
            | McpError::RemoteHttp {
                server,
                url,
                status,
                reason,
            } => json!({
                "server_name": server,
                "url": url,
                "status_code": status,
                "reason": reason,
            }),
            McpError::ReloadFailed { server, reason } => {
                json!({ "server_name": server, "reason": reason })
            }
            McpError::ToolExecution {
                server,
                tool,
                reason,
            } => json!({ "server_name": server, "tool_name": tool, "reason": reason }),
        };
        if let Some(obj) = ctx.as_object_mut() {
            obj.insert("kind".into(), JsonValue::from(self.kind().as_str()));
            obj.insert("retryable".into(), JsonValue::from(self.is_retryable()));
            if let Some(after) = self.retry_after() {
                obj.insert("retry_after".into(), JsonValue::from(after.as_secs()));
            }
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> McpError {
        McpError::RemoteHttp {
            server: "remote".into(),
            url: "https://x/mcp".into(),
            status,
            reason: "boom".into(),
        }
    }

    #[test]
    fn retryability_follows_taxonomy() {
        let connect = McpError::ConnectFailed {
            server: "fs".into(),
            transport: "stdio".into(),
            reason: "spawn".into(),
        };
        assert!(connect.is_retryable());
        assert_eq!(connect.retry_after(), Some(Duration::from_secs(30)));

        let timeout = McpError::ConnectTimeout {
            server: "remote".into(),
            transport: "http".into(),
            timeout_seconds: 5,
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.retry_after(), Some(Duration::from_secs(5)));

        let auth = McpError::AuthFailed {
            server: "remote".into(),
            url: "https://x/mcp".into(),
            status: 401,
            reason: "bad token".into(),
        };
        assert!(!auth.is_retryable());
        assert_eq!(auth.retry_after(), None);

        assert!(http(503).is_retryable());
        assert!(!http(404).is_retryable());
        assert_eq!(http(404).retry_after(), None);

        for err in [
            McpError::ServerNotFound { server: "x".into() },
            McpError::ServerDisabled { server: "x".into() },
            McpError::NoServersAvailable,
            McpError::ReloadFailed {
                server: "x".into(),
                reason: "y".into(),
            },
        ] {
            assert!(!err.is_retryable(), "{} should not be retryable", err.kind());
        }
    }

    #[test]
    fn context_carries_kind_and_fields() {
        let ctx = http(502).context();
        assert_eq!(ctx["kind"], "remote_http_error");
        assert_eq!(ctx["status_code"], 502);
        assert_eq!(ctx["retryable"], true);
        assert_eq!(ctx["retry_after"], 30);

        let ctx = McpError::ToolExecution {
            server: "fs".into(),
            tool: "read".into(),
            reason: "Execution timed out".into(),
        }
        .context();
        assert_eq!(ctx["tool_name"], "read");
        assert_eq!(ctx["retryable"], false);
        assert!(ctx.get("retry_after").is_none());
    }

    #[test]
    fn messages_name_the_server() {
        let err = McpError::ReloadFailed {
            server: "fs".into(),
            reason: "spawn failed".into(),
        };
        assert_eq!(err.to_string(), "failed to reload MCP server 'fs': spawn failed");
        assert_eq!(err.server_name(), Some("fs"));
        assert_eq!(err.reason(), "spawn failed");
        assert_eq!(McpError::NoServersAvailable.server_name(), None);
    }
}
