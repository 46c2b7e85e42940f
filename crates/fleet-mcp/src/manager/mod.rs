//! Connection registry and lifecycle manager.
//!
//! [`McpManager`] owns every live peer connection. Mutating operations
//! (initialize, reload, shutdown) serialize on one async mutex and fan connect
//! attempts out concurrently; queries only take a short read lock and return
//! owned snapshots.

mod status;

pub use status::*;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, McpError, McpResult};
use crate::mcp::{
    Connection, Connector, DescriptorSource, ServerDescriptor, TransportConfig, environment,
    parse_servers_payload, validate,
};
use crate::toolkit::ToolkitView;

/// Knobs resolved by the binary from env and user config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Global switch; when off nothing is loaded or connected.
    pub enabled: bool,
    pub default_timeout_secs: u64,
    /// Run the `npx` / environment diagnostics in `initialize_system`.
    pub probe_environment: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout_secs: 60,
            probe_environment: true,
        }
    }
}

#[derive(Default)]
struct Registry {
    connections: HashMap<String, Arc<Connection>>,
    descriptors: Vec<ServerDescriptor>,
    initialized: bool,
}

pub struct McpManager {
    settings: ManagerSettings,
    source: Arc<dyn DescriptorSource>,
    connector: Arc<dyn Connector>,
    op_lock: Mutex<()>,
    state: RwLock<Registry>,
}

impl McpManager {
    pub fn new(
        settings: ManagerSettings,
        source: Arc<dyn DescriptorSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            settings,
            source,
            connector,
            op_lock: Mutex::new(()),
            state: RwLock::new(Registry::default()),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read and validate descriptors from the source. Empty when the system is
    /// disabled or nothing usable was found.
    pub fn load_descriptors(&self) -> Vec<ServerDescriptor> {
        if !self.settings.enabled {
            tracing::info!("MCP system disabled; no servers loaded");
            return Vec::new();
        }
        let Some(payload) = self.source.load() else {
            return Vec::new();
        };
        let default_timeout = self.settings.default_timeout_secs;
        parse_servers_payload(&payload, default_timeout)
            .into_iter()
            .filter_map(|mut d| validate(&mut d, default_timeout).then_some(d))
            .collect()
    }

    /// Load descriptors and connect every enabled server. Returns whether at
    /// least one server is live afterwards.
    pub async fn initialize_system(&self) -> bool {
        if !self.settings.enabled {
            tracing::info!("MCP system disabled; skipping initialization");
            return false;
        }
        let descriptors = self.load_descriptors();
        if descriptors.is_empty() {
            tracing::warn!("no valid MCP server configurations found");
            return false;
        }
        if self.settings.probe_environment {
            environment::log_environment_diagnostics().await;
        }
        self.initialize_from_configs(descriptors).await;
        self.log_initialization_result();
        self.is_initialized()
    }

    /// Connect every enabled descriptor concurrently. A no-op when already
    /// initialized with a live connection. Servers that are already live (for
    /// example after a reload) keep their connection. Individual failures are
    /// logged and do not affect siblings.
    pub async fn initialize_from_configs(&self, descriptors: Vec<ServerDescriptor>) {
        let _guard = self.op_lock.lock().await;
        if self.is_initialized() {
            tracing::debug!("MCP manager already initialized");
            return;
        }
        let enabled: Vec<ServerDescriptor> = {
            let mut state = self.write();
            let pending = descriptors
                .iter()
                .filter(|d| d.enabled && !state.connections.contains_key(&d.name))
                .cloned()
                .collect();
            state.descriptors = descriptors;
            pending
        };
        if enabled.is_empty() {
            let mut state = self.write();
            state.initialized = !state.connections.is_empty();
            if state.initialized {
                tracing::debug!("every enabled MCP server is already connected");
            } else {
                tracing::info!("no enabled MCP servers to initialize");
            }
            return;
        }

        tracing::info!("initializing {} MCP server(s)", enabled.len());
        let outcomes = self.connect_all(&enabled).await;
        let mut state = self.write();
        for (descriptor, outcome) in enabled.iter().zip(outcomes) {
            match outcome {
                Ok(conn) => {
                    state
                        .connections
                        .insert(descriptor.name.clone(), Arc::new(conn));
                }
                Err(e) => log_connect_failure(descriptor, &e),
            }
        }
        state.initialized = !state.connections.is_empty();
    }

    async fn connect_all(&self, descriptors: &[ServerDescriptor]) -> Vec<McpResult<Connection>> {
        join_all(descriptors.iter().map(|d| self.connector.connect(d))).await
    }

    /// Re-read descriptors and reconnect one server.
    pub async fn reload_server(&self, server_name: &str) -> McpResult<ReloadServerResult> {
        tracing::info!("reloading MCP server '{}'", server_name);
        let _guard = self.op_lock.lock().await;
        let descriptors = self.load_descriptors();
        let descriptor = descriptors.iter().find(|d| d.name == server_name).cloned();
        self.write().descriptors = descriptors;

        let Some(descriptor) = descriptor else {
            tracing::warn!("MCP server '{}' not found in configuration", server_name);
            return Err(McpError::ServerNotFound {
                server: server_name.to_string(),
            });
        };
        if !descriptor.enabled {
            tracing::warn!("MCP server '{}' is disabled in configuration", server_name);
            return Err(McpError::ServerDisabled {
                server: server_name.to_string(),
            });
        }

        let previous = self.write().connections.remove(server_name);
        if let Some(previous) = previous {
            previous.close().await;
        }

        match self.connector.connect(&descriptor).await {
            Ok(conn) => {
                let function_count = conn.tools.len();
                self.write()
                    .connections
                    .insert(server_name.to_string(), Arc::new(conn));
                tracing::info!(
                    "MCP server '{}' reloaded with {} functions",
                    server_name,
                    function_count
                );
                Ok(ReloadServerResult::succeeded(server_name, function_count))
            }
            Err(e) => {
                log_connect_failure(&descriptor, &e);
                Err(McpError::ReloadFailed {
                    server: server_name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// [`Self::reload_server`] with failures folded into the result.
    pub async fn reload_server_outcome(&self, server_name: &str) -> ReloadServerResult {
        match self.reload_server(server_name).await {
            Ok(result) => result,
            Err(e) => ReloadServerResult::failed(server_name, e.to_string(), &e),
        }
    }

    /// Re-read descriptors, close every live connection, then reconnect all
    /// enabled servers concurrently.
    pub async fn reload_all_servers(&self) -> McpResult<ReloadAllResult> {
        tracing::info!("reloading all MCP servers");
        let _guard = self.op_lock.lock().await;
        let descriptors = self.load_descriptors();
        let enabled: Vec<ServerDescriptor> =
            descriptors.iter().filter(|d| d.enabled).cloned().collect();
        self.write().descriptors = descriptors;
        if enabled.is_empty() {
            tracing::warn!("no enabled MCP servers to reload");
            return Err(McpError::NoServersAvailable);
        }

        let mut previous: Vec<Arc<Connection>> =
            self.write().connections.drain().map(|(_, c)| c).collect();
        previous.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        for conn in previous {
            conn.close().await;
        }

        let outcomes = self.connect_all(&enabled).await;
        let mut results = Vec::with_capacity(enabled.len());
        {
            let mut state = self.write();
            for (descriptor, outcome) in enabled.iter().zip(outcomes) {
                match outcome {
                    Ok(conn) => {
                        results.push(ReloadServerResult::succeeded(
                            &descriptor.name,
                            conn.tools.len(),
                        ));
                        state
                            .connections
                            .insert(descriptor.name.clone(), Arc::new(conn));
                    }
                    Err(e) => {
                        log_connect_failure(descriptor, &e);
                        results.push(ReloadServerResult::failed(
                            &descriptor.name,
                            format!("Failed to reload: {e}"),
                            &e,
                        ));
                    }
                }
            }
        }
        let result = ReloadAllResult::from_results(results);
        tracing::info!(
            "reload complete: {}/{} servers successful",
            result.reloaded_count,
            enabled.len()
        );
        Ok(result)
    }

    /// [`Self::reload_all_servers`] with an aborted reload folded into the
    /// result.
    pub async fn reload_all_servers_outcome(&self) -> ReloadAllResult {
        match self.reload_all_servers().await {
            Ok(result) => result,
            Err(e) => ReloadAllResult::aborted(&e),
        }
    }

    /// Toolkit over the live connection for `server_name`, or `None`.
    pub fn get_toolkit_for_server(
        &self,
        server_name: &str,
        allow: Option<&[String]>,
    ) -> Option<ToolkitView> {
        let conn = {
            let state = self.read();
            if !state.initialized {
                return None;
            }
            state.connections.get(server_name).cloned()
        };
        match conn {
            Some(conn) => Some(ToolkitView::build(conn, allow)),
            None => {
                tracing::debug!("no live MCP connection for '{}'", server_name);
                None
            }
        }
    }

    /// Rebind `toolkit` to the current connection for its server. Returns
    /// false when that server is no longer live.
    pub fn refresh_toolkit(&self, toolkit: &mut ToolkitView) -> bool {
        let conn = self.read().connections.get(toolkit.server_name()).cloned();
        match conn {
            Some(conn) => {
                toolkit.rebind(conn);
                true
            }
            None => false,
        }
    }

    /// Sorted function names of a live server.
    pub fn get_functions_for_server(&self, server_name: &str) -> Vec<String> {
        let state = self.read();
        if !state.initialized {
            return Vec::new();
        }
        let mut names = state
            .connections
            .get(server_name)
            .map(|c| c.tool_names())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Status of every configured or live server.
    pub fn get_server_status(&self) -> BTreeMap<String, ServerStatus> {
        let state = self.read();
        let names: BTreeSet<&String> = state
            .descriptors
            .iter()
            .map(|d| &d.name)
            .chain(state.connections.keys())
            .collect();
        names
            .into_iter()
            .map(|name| {
                let descriptor = state.descriptors.iter().find(|d| &d.name == name);
                let conn = state.connections.get(name);
                let mut functions = conn.map(|c| c.tool_names()).unwrap_or_default();
                functions.sort();
                let status = ServerStatus {
                    connected: conn.is_some(),
                    enabled: descriptor.is_some_and(|d| d.enabled),
                    description: descriptor.map(|d| d.description.clone()).unwrap_or_default(),
                    function_count: functions.len(),
                    functions,
                    transport: descriptor
                        .map(|d| d.transport.label().to_string())
                        .or_else(|| conn.map(|c| c.transport_label().to_string())),
                    session_id: conn.and_then(|c| c.session_id()).map(str::to_string),
                };
                (name.clone(), status)
            })
            .collect()
    }

    pub fn get_system_status(&self) -> SystemStatus {
        if !self.is_initialized() {
            return SystemStatus::not_initialized();
        }
        let servers = self.get_server_status();
        let total_functions = servers.values().map(|s| s.function_count).sum();
        SystemStatus {
            initialized: true,
            total_servers: servers.len(),
            total_functions,
            servers,
            available_servers: self.get_available_servers(),
            message: None,
        }
    }

    /// Sorted names of live servers.
    pub fn get_available_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().connections.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_initialized(&self) -> bool {
        let state = self.read();
        state.initialized && !state.connections.is_empty()
    }

    /// Close every connection and forget all descriptors.
    pub async fn shutdown(&self) {
        let _guard = self.op_lock.lock().await;
        let mut live: Vec<Arc<Connection>> = {
            let mut state = self.write();
            if !state.initialized && state.connections.is_empty() {
                return;
            }
            state.descriptors.clear();
            state.initialized = false;
            state.connections.drain().map(|(_, c)| c).collect()
        };
        tracing::info!("shutting down {} MCP connection(s)", live.len());
        live.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        for conn in live {
            conn.close().await;
        }
        tracing::info!("MCP shutdown complete");
    }

    fn log_initialization_result(&self) {
        if !self.is_initialized() {
            tracing::warn!("MCP initialization failed or no servers connected");
            return;
        }
        let status = self.get_server_status();
        let live: Vec<_> = status.iter().filter(|(_, s)| s.connected).collect();
        let total: usize = live.iter().map(|(_, s)| s.function_count).sum();
        tracing::info!("MCP servers ready: {}", live.len());
        tracing::info!("total MCP functions available: {}", total);
        for (name, s) in live {
            let description = if s.description.is_empty() {
                "no description"
            } else {
                s.description.as_str()
            };
            tracing::info!(
                "server '{}' ({}) -> {} functions",
                name,
                description,
                s.function_count
            );
        }
    }
}

/// Log a failed connect with guidance for the operator.
fn log_connect_failure(descriptor: &ServerDescriptor, err: &McpError) {
    let target = match &descriptor.transport {
        TransportConfig::Remote { url, .. } => url.clone(),
        TransportConfig::Stdio { .. } => descriptor.command_line().join(" "),
    };
    let action = match err.kind() {
        ErrorKind::AuthFailed => "verify the auth token matches what the server expects",
        ErrorKind::RemoteHttpError => "check the server logs and verify the endpoint",
        ErrorKind::ConnectFailed => "verify the command or URL and that the server is reachable",
        ErrorKind::ConnectTimeout => {
            "increase timeout_seconds or check that the server is responding"
        }
        ErrorKind::InvalidConfig => "review the MCP servers configuration file",
        _ => "see the error for details",
    };
    tracing::error!(
        server = %descriptor.name,
        kind = %err.kind(),
        retryable = err.is_retryable(),
        "failed to initialize MCP server '{}' ({}): {}. Action: {}",
        descriptor.name,
        target,
        err,
        action
    );
    tracing::debug!("MCP server '{}' error context: {}", descriptor.name, err.context());
}
