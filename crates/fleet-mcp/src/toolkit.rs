//! Protocol-agnostic view over a connection's functions.
//!
//! A [`ToolkitView`] maps function names to [`ToolFunction`] callables bound
//! to one live [`Connection`]. Calls run under the connection's timeout and
//! return normalized text; any failure surfaces as
//! [`McpError::ToolExecution`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{McpError, McpResult};
use crate::mcp::{CallOutcome, Connection, ToolInfo};

/// Returned when a call succeeds without any content.
pub const EMPTY_RESULT_TEXT: &str = "Tool executed successfully (no output)";

/// Summary returned by [`ToolkitView::info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolkitInfo {
    pub server_name: String,
    pub toolkit_name: String,
    pub function_count: usize,
    pub function_names: Vec<String>,
    pub transport: String,
}

/// One callable peer function.
#[derive(Debug, Clone)]
pub struct ToolFunction {
    info: ToolInfo,
    connection: Arc<Connection>,
}

impl ToolFunction {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn description(&self) -> Option<&str> {
        self.info.description.as_deref()
    }

    pub fn input_schema(&self) -> &JsonValue {
        &self.info.input_schema
    }

    pub async fn call(&self, arguments: Option<JsonMap<String, JsonValue>>) -> McpResult<String> {
        let server = &self.connection.server_name;
        let tool = &self.info.name;
        let fail = |reason: String| McpError::ToolExecution {
            server: server.clone(),
            tool: tool.clone(),
            reason,
        };
        tracing::debug!("calling '{}' on MCP server '{}'", tool, server);
        let pending = self.connection.session().call_tool(tool, arguments);
        let outcome = match tokio::time::timeout(self.connection.timeout, pending).await {
            Err(_) => {
                tracing::warn!(
                    "'{}' on MCP server '{}' timed out after {:?}",
                    tool,
                    server,
                    self.connection.timeout
                );
                return Err(fail("Execution timed out".to_string()));
            }
            Ok(Err(e)) => {
                tracing::warn!("'{}' on MCP server '{}' failed: {:#}", tool, server, e);
                return Err(fail(format!("{:#}", e)));
            }
            Ok(Ok(outcome)) => outcome,
        };
        let text = normalize_outcome(&outcome);
        if outcome.is_error {
            return Err(fail(text));
        }
        Ok(text)
    }
}

/// Flatten a call result into text: joined text segments, else the JSON of
/// non-text content, else the structured result, else [`EMPTY_RESULT_TEXT`].
pub fn normalize_outcome(outcome: &CallOutcome) -> String {
    let texts = outcome.text_segments();
    if !texts.is_empty() {
        return texts.join("\n");
    }
    if !outcome.content.is_empty() {
        return JsonValue::Array(outcome.content.clone()).to_string();
    }
    if let Some(structured) = &outcome.structured {
        return structured.to_string();
    }
    EMPTY_RESULT_TEXT.to_string()
}

/// Named function set for one server.
#[derive(Debug, Clone)]
pub struct ToolkitView {
    name: String,
    connection: Arc<Connection>,
    allow: Option<Vec<String>>,
    functions: BTreeMap<String, ToolFunction>,
}

impl ToolkitView {
    /// Expose the connection's catalogue, narrowed by `allow` when it names
    /// at least one function.
    pub fn build(connection: Arc<Connection>, allow: Option<&[String]>) -> Self {
        let allow = allow
            .map(|names| {
                names
                    .iter()
                    .map(|n| n.trim())
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|names| !names.is_empty());
        let mut view = Self {
            name: format!("mcp_{}", connection.server_name),
            connection,
            allow,
            functions: BTreeMap::new(),
        };
        view.reload();
        view
    }

    pub fn server_name(&self) -> &str {
        &self.connection.server_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self, name: &str) -> Option<&ToolFunction> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &ToolFunction> {
        self.functions.values()
    }

    /// Sorted.
    pub fn function_names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn info(&self) -> ToolkitInfo {
        ToolkitInfo {
            server_name: self.server_name().to_string(),
            toolkit_name: self.name.clone(),
            function_count: self.functions.len(),
            function_names: self.function_names(),
            transport: self.connection.transport_label().to_string(),
        }
    }

    /// Re-derive the function set from the bound connection's catalogue.
    pub fn reload(&mut self) {
        let catalogue = &self.connection.tools;
        if let Some(allow) = &self.allow {
            for missing in allow
                .iter()
                .filter(|n| !catalogue.iter().any(|t| &t.name == *n))
            {
                tracing::debug!(
                    "function '{}' not offered by MCP server '{}'",
                    missing,
                    self.connection.server_name
                );
            }
        }
        self.functions = catalogue
            .iter()
            .filter(|t| {
                self.allow
                    .as_ref()
                    .is_none_or(|allow| allow.iter().any(|n| n == &t.name))
            })
            .map(|t| {
                (
                    t.name.clone(),
                    ToolFunction {
                        info: t.clone(),
                        connection: Arc::clone(&self.connection),
                    },
                )
            })
            .collect();
    }

    /// Point the view at a newer connection for the same server and reload.
    pub fn rebind(&mut self, connection: Arc<Connection>) {
        self.connection = connection;
        self.reload();
    }

    /// Call a function by name.
    pub async fn call(
        &self,
        function: &str,
        arguments: Option<JsonMap<String, JsonValue>>,
    ) -> McpResult<String> {
        match self.functions.get(function) {
            Some(f) => f.call(arguments).await,
            None => Err(McpError::ToolExecution {
                server: self.server_name().to_string(),
                tool: function.to_string(),
                reason: "function not available in toolkit".to_string(),
            }),
        }
    }
}
