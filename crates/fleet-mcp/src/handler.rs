//! MCP server handler that exposes the peer fleet as management tools.
//!
//! Other MCP clients can inspect connection status, list functions, reload
//! servers, and call peer functions through this server. All work is
//! delegated to the shared [`McpManager`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CallToolResult, ClientRequest, ListToolsResult, RpcError, TextContent, Tool, ToolInputSchema,
    schema_utils::{NotificationFromClient, RequestFromClient, ResultFromServer},
};
use rust_mcp_sdk::{
    McpServer,
    mcp_server::{ServerHandlerCore, enforce_compatible_protocol_version},
};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::error::McpError;
use crate::manager::McpManager;

pub const LIST_SERVERS: &str = "list_mcp_servers";
pub const AVAILABLE_SERVERS: &str = "get_available_mcp_servers";
pub const SERVER_FUNCTIONS: &str = "get_mcp_server_functions";
pub const RELOAD_SERVER: &str = "reload_mcp_server";
pub const RELOAD_ALL: &str = "reload_all_mcp_servers";
pub const CALL_FUNCTION: &str = "call_mcp_function";

/// Routes MCP requests to the connection manager.
pub struct FleetServerHandler {
    manager: Arc<McpManager>,
}

impl FleetServerHandler {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }

    /// Build the list of tool definitions exposed by this server.
    fn tool_definitions(&self) -> Vec<Tool> {
        let server_name = ("server_name", "Name of the configured MCP server");
        vec![
            tool(
                LIST_SERVERS,
                "Status of every configured MCP server and the system as a whole",
                &[],
                &[],
            ),
            tool(
                AVAILABLE_SERVERS,
                "Names of MCP servers with a live connection",
                &[],
                &[],
            ),
            tool(
                SERVER_FUNCTIONS,
                "Functions exposed by a connected MCP server",
                &[server_name],
                &[],
            ),
            tool(
                RELOAD_SERVER,
                "Re-read configuration and reconnect one MCP server",
                &[server_name],
                &[],
            ),
            tool(
                RELOAD_ALL,
                "Re-read configuration and reconnect every enabled MCP server",
                &[],
                &[],
            ),
            tool(
                CALL_FUNCTION,
                "Call a function on a connected MCP server",
                &[
                    server_name,
                    ("function_name", "Function to call on that server"),
                ],
                &[("arguments", "Arguments object passed to the function")],
            ),
        ]
    }

    /// Run one management tool and return its JSON payload.
    async fn dispatch(
        &self,
        tool: &str,
        arguments: Option<&JsonMap<String, JsonValue>>,
    ) -> Result<JsonValue, RpcError> {
        match tool {
            LIST_SERVERS => to_json(&self.manager.get_system_status()),
            AVAILABLE_SERVERS => Ok(json!({ "servers": self.manager.get_available_servers() })),
            SERVER_FUNCTIONS => {
                let server = required_str(tool, arguments, "server_name")?;
                let functions: Vec<JsonValue> = self
                    .manager
                    .get_toolkit_for_server(server, None)
                    .map(|toolkit| {
                        toolkit
                            .functions()
                            .map(|f| json!({ "name": f.name(), "description": f.description() }))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(json!({ "server_name": server, "functions": functions }))
            }
            RELOAD_SERVER => {
                let server = required_str(tool, arguments, "server_name")?;
                to_json(&self.manager.reload_server_outcome(server).await)
            }
            RELOAD_ALL => to_json(&self.manager.reload_all_servers_outcome().await),
            CALL_FUNCTION => {
                let server = required_str(tool, arguments, "server_name")?;
                let function = required_str(tool, arguments, "function_name")?;
                let call_args = match arguments.and_then(|m| m.get("arguments")) {
                    None | Some(JsonValue::Null) => None,
                    Some(JsonValue::Object(m)) => Some(m.clone()),
                    Some(_) => {
                        return Err(RpcError::invalid_params()
                            .with_message("'arguments' must be an object".to_string()));
                    }
                };
                let Some(toolkit) = self.manager.get_toolkit_for_server(server, None) else {
                    tracing::warn!("call_mcp_function: server '{}' is not connected", server);
                    return Ok(failure(&self.unavailable(server)));
                };
                match toolkit.call(function, call_args).await {
                    Ok(output) => Ok(json!({ "ok": true, "output": output })),
                    Err(e) => Ok(failure(&e)),
                }
            }
            _ => {
                tracing::warn!("unknown tool: {}", tool);
                Err(RpcError::method_not_found().with_message(format!("Unknown tool '{}'", tool)))
            }
        }
    }

    /// Error reported when `server` has no live toolkit.
    fn unavailable(&self, server: &str) -> McpError {
        let server_name = server.to_string();
        match self.manager.get_server_status().remove(server) {
            None => McpError::ServerNotFound {
                server: server_name,
            },
            Some(status) if !status.enabled => McpError::ServerDisabled {
                server: server_name,
            },
            Some(status) => McpError::ConnectFailed {
                server: server_name,
                transport: status.transport.unwrap_or_else(|| "unknown".to_string()),
                reason: "server is not connected; reload it with reload_mcp_server".to_string(),
            },
        }
    }
}

fn tool(
    name: &str,
    description: &str,
    required: &[(&str, &str)],
    optional: &[(&str, &str)],
) -> Tool {
    let mut props = HashMap::<String, JsonMap<String, JsonValue>>::new();
    for (prop, desc) in required {
        let mut schema = JsonMap::new();
        schema.insert("type".to_string(), JsonValue::String("string".to_string()));
        schema.insert(
            "description".to_string(),
            JsonValue::String(desc.to_string()),
        );
        props.insert(prop.to_string(), schema);
    }
    for (prop, desc) in optional {
        let mut schema = JsonMap::new();
        schema.insert("type".to_string(), JsonValue::String("object".to_string()));
        schema.insert(
            "description".to_string(),
            JsonValue::String(desc.to_string()),
        );
        props.insert(prop.to_string(), schema);
    }
    Tool {
        annotations: None,
        description: Some(description.to_string()),
        input_schema: ToolInputSchema::new(
            required.iter().map(|(p, _)| p.to_string()).collect(),
            Some(props),
        ),
        meta: None,
        name: name.to_string(),
        output_schema: None,
        title: None,
    }
}

fn required_str<'a>(
    tool: &str,
    arguments: Option<&'a JsonMap<String, JsonValue>>,
    key: &str,
) -> Result<&'a str, RpcError> {
    arguments
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            tracing::error!("missing required '{}' in arguments (tool={})", key, tool);
            RpcError::invalid_params().with_message(format!("missing required '{key}' string"))
        })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<JsonValue, RpcError> {
    serde_json::to_value(value)
        .map_err(|e| RpcError::internal_error().with_message(format!("serialize error: {e}")))
}

fn failure(err: &McpError) -> JsonValue {
    json!({ "ok": false, "message": err.to_string(), "error": err.context() })
}

#[async_trait]
impl ServerHandlerCore for FleetServerHandler {
    async fn handle_request(
        &self,
        request: RequestFromClient,
        runtime: &dyn McpServer,
    ) -> std::result::Result<ResultFromServer, RpcError> {
        let method_name = request.method().to_owned();
        tracing::info!("handle_request: method={}", method_name);
        match request {
            RequestFromClient::ClientRequest(client_request) => match client_request {
                ClientRequest::InitializeRequest(initialize_request) => {
                    tracing::debug!(
                        "initialize_request: client_protocol={}",
                        initialize_request.params.protocol_version
                    );
                    let mut server_info = runtime.server_info().to_owned();
                    if let Some(updated_protocol_version) = enforce_compatible_protocol_version(
                        &initialize_request.params.protocol_version,
                        &server_info.protocol_version,
                    )
                    .map_err(|err| {
                        tracing::error!(
                            "incompatible protocol version (client={}, server={})",
                            initialize_request.params.protocol_version,
                            server_info.protocol_version
                        );
                        RpcError::internal_error().with_message(err.to_string())
                    })? {
                        server_info.protocol_version = updated_protocol_version;
                    }
                    tracing::info!("initialized (protocol={})", server_info.protocol_version);
                    Ok(server_info.into())
                }

                ClientRequest::ListToolsRequest(_) => {
                    let tools = self.tool_definitions();
                    tracing::info!("list_tools (count={})", tools.len());
                    Ok(ListToolsResult {
                        meta: None,
                        next_cursor: None,
                        tools,
                    }
                    .into())
                }

                ClientRequest::CallToolRequest(request) => {
                    let tool = request.tool_name().to_string();
                    let arg_keys = request
                        .params
                        .arguments
                        .as_ref()
                        .map(|m| m.keys().cloned().collect::<Vec<_>>())
                        .unwrap_or_default();
                    tracing::info!("call_tool request: tool={}, arg_keys={:?}", tool, arg_keys);
                    let payload = self
                        .dispatch(&tool, request.params.arguments.as_ref())
                        .await?;
                    Ok(
                        CallToolResult::text_content(vec![TextContent::from(payload.to_string())])
                            .into(),
                    )
                }

                _ => {
                    tracing::warn!("method not implemented: {}", method_name);
                    Err(RpcError::method_not_found()
                        .with_message(format!("No handler is implemented for '{method_name}'.")))
                }
            },
            RequestFromClient::CustomRequest(_) => {
                tracing::warn!("custom request not implemented");
                Err(RpcError::method_not_found()
                    .with_message("No handler is implemented for custom requests.".to_string()))
            }
        }
    }

    async fn handle_notification(
        &self,
        notification: NotificationFromClient,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        match &notification {
            NotificationFromClient::ClientNotification(_) => {
                tracing::debug!("handle_notification: client notification")
            }
            NotificationFromClient::CustomNotification(_) => {
                tracing::debug!("handle_notification: custom notification")
            }
        }
        Ok(())
    }

    async fn handle_error(
        &self,
        error: &RpcError,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        tracing::error!(
            "handle_error from client (code={:?}, message={:?})",
            error.code,
            error.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerSettings;
    use crate::test_support::{FakeConnector, FakeReply, StaticSource, stdio_entry};
    use std::collections::HashSet;

    async fn handler() -> (FleetServerHandler, Arc<FakeConnector>) {
        let connector = FakeConnector::new();
        connector.script_tools("fs", &["read", "write"]);
        connector.script_reply("fs", "write", FakeReply::Fail("read-only volume".into()));
        let source = StaticSource::new(json!({
            "mcpServers": {
                "fs": stdio_entry(true),
                "off": stdio_entry(false),
                "down": stdio_entry(true)
            }
        }));
        let manager = Arc::new(McpManager::new(
            ManagerSettings {
                probe_environment: false,
                ..ManagerSettings::default()
            },
            Arc::new(source),
            connector.clone(),
        ));
        assert!(manager.initialize_system().await);
        (FleetServerHandler::new(manager), connector)
    }

    fn args(v: JsonValue) -> JsonMap<String, JsonValue> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn tool_schemas_declare_required_arguments() {
        let (h, _) = handler().await;
        let tools = h.tool_definitions();
        let names: HashSet<_> = tools.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names.len(), 6);
        let call = tools.iter().find(|t| t.name == CALL_FUNCTION).unwrap();
        let val = serde_json::to_value(call).expect("serialize tool");
        let req: HashSet<String> = val["inputSchema"]["required"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect();
        assert!(req.contains("server_name"));
        assert!(req.contains("function_name"));
        assert!(!req.contains("arguments"));
    }

    #[tokio::test]
    async fn status_and_functions_are_reported() {
        let (h, _) = handler().await;
        let status = h.dispatch(LIST_SERVERS, None).await.unwrap();
        assert_eq!(status["initialized"], true);
        assert_eq!(status["servers"]["off"]["connected"], false);

        let live = h.dispatch(AVAILABLE_SERVERS, None).await.unwrap();
        assert_eq!(live["servers"], json!(["fs"]));

        let fns = h
            .dispatch(SERVER_FUNCTIONS, Some(&args(json!({ "server_name": "fs" }))))
            .await
            .unwrap();
        assert_eq!(fns["functions"][0]["name"], "read");
        assert_eq!(fns["functions"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn call_function_reports_output_and_failures() {
        let (h, connector) = handler().await;
        let ok = h
            .dispatch(
                CALL_FUNCTION,
                Some(&args(json!({
                    "server_name": "fs",
                    "function_name": "read",
                    "arguments": { "path": "/tmp/a" }
                }))),
            )
            .await
            .unwrap();
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["output"], "read ok");
        assert_eq!(connector.sessions("fs")[0].calls()[0].0, "read");

        let failed = h
            .dispatch(
                CALL_FUNCTION,
                Some(&args(json!({ "server_name": "fs", "function_name": "write" }))),
            )
            .await
            .unwrap();
        assert_eq!(failed["ok"], false);
        assert_eq!(failed["error"]["kind"], "tool_execution_failed");

        let offline = h
            .dispatch(
                CALL_FUNCTION,
                Some(&args(json!({ "server_name": "off", "function_name": "read" }))),
            )
            .await
            .unwrap();
        assert_eq!(offline["error"]["kind"], "server_disabled");

        let down = h
            .dispatch(
                CALL_FUNCTION,
                Some(&args(json!({ "server_name": "down", "function_name": "read" }))),
            )
            .await
            .unwrap();
        assert_eq!(down["error"]["kind"], "connect_failed");
        assert!(down["message"].as_str().unwrap().contains("not connected"));

        let ghost = h
            .dispatch(
                CALL_FUNCTION,
                Some(&args(json!({ "server_name": "ghost", "function_name": "read" }))),
            )
            .await
            .unwrap();
        assert_eq!(ghost["error"]["kind"], "server_not_found");
    }

    #[tokio::test]
    async fn reload_tools_never_fail_the_request() {
        let (h, connector) = handler().await;
        let disabled = h
            .dispatch(RELOAD_SERVER, Some(&args(json!({ "server_name": "off" }))))
            .await
            .unwrap();
        assert_eq!(disabled["success"], false);
        assert_eq!(disabled["error_kind"], "server_disabled");

        let all = h.dispatch(RELOAD_ALL, None).await.unwrap();
        assert_eq!(all["success"], true);
        assert_eq!(all["reloaded_count"], 1);
        assert_eq!(connector.attempts("fs"), 2);
    }

    #[tokio::test]
    async fn bad_requests_are_rpc_errors() {
        let (h, _) = handler().await;
        assert!(h.dispatch("nope", None).await.is_err());
        assert!(h.dispatch(RELOAD_SERVER, None).await.is_err());
        let bad_args = args(json!({
            "server_name": "fs",
            "function_name": "read",
            "arguments": "not-an-object"
        }));
        assert!(h.dispatch(CALL_FUNCTION, Some(&bad_args)).await.is_err());
    }
}
