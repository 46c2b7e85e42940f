//! Snapshot and result types returned by [`super::McpManager`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ErrorKind, McpError};

pub const RELOAD_OK_MESSAGE: &str = "Server reloaded successfully";
pub const NOT_INITIALIZED_MESSAGE: &str = "MCP system not initialized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadServerResult {
    pub server_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub function_count: usize,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ReloadServerResult {
    pub fn succeeded(server_name: &str, function_count: usize) -> Self {
        Self {
            server_name: server_name.to_string(),
            success: true,
            message: Some(RELOAD_OK_MESSAGE.to_string()),
            function_count,
            error_kind: None,
        }
    }

    pub fn failed(server_name: &str, message: String, error: &McpError) -> Self {
        Self {
            server_name: server_name.to_string(),
            success: false,
            message: Some(message),
            function_count: 0,
            error_kind: Some(error.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadAllResult {
    pub success: bool,
    pub reloaded_count: usize,
    pub failed_count: usize,
    pub results: Vec<ReloadServerResult>,
    /// Set when the bulk reload could not start at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ReloadAllResult {
    pub fn from_results(results: Vec<ReloadServerResult>) -> Self {
        let reloaded_count = results.iter().filter(|r| r.success).count();
        Self {
            success: reloaded_count > 0,
            reloaded_count,
            failed_count: results.len() - reloaded_count,
            results,
            message: None,
            error_kind: None,
        }
    }

    pub fn aborted(error: &McpError) -> Self {
        Self {
            success: false,
            reloaded_count: 0,
            failed_count: 0,
            results: Vec::new(),
            message: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }
}

/// Per-server entry of [`SystemStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub connected: bool,
    pub enabled: bool,
    pub description: String,
    pub function_count: usize,
    pub functions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub initialized: bool,
    pub servers: BTreeMap<String, ServerStatus>,
    pub total_servers: usize,
    pub total_functions: usize,
    pub available_servers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SystemStatus {
    pub fn not_initialized() -> Self {
        Self {
            initialized: false,
            servers: BTreeMap::new(),
            total_servers: 0,
            total_functions: 0,
            available_servers: Vec::new(),
            message: Some(NOT_INITIALIZED_MESSAGE.to_string()),
        }
    }
}
