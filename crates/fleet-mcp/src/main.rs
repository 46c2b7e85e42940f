use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use env_flags::env_flags;
use fleet_mcp::config::{UserConfig, expand_home, fleet_home, layered, load_user_config};
use fleet_mcp::handler::FleetServerHandler;
use fleet_mcp::manager::{ManagerSettings, McpManager};
use fleet_mcp::mcp::{FileDescriptorSource, SdkConnector};
use once_cell::sync::OnceCell;
use rust_mcp_sdk::error::SdkResult;
use rust_mcp_sdk::mcp_server::{
    HyperServerOptions, ServerRuntime, hyper_server_core, server_runtime_core,
};
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, LATEST_PROTOCOL_VERSION, ServerCapabilities,
    ServerCapabilitiesTools,
};
use rust_mcp_sdk::{McpServer, StdioTransport, TransportOptions};
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::{DefaultFields, Format};

/// Plain-text file layer; the caller picks the event format.
fn file_layer<S>(writer: NonBlocking) -> fmt::Layer<S, DefaultFields, Format, NonBlocking> {
    fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
}

fn init_tracing(fleet_home: &Path, user_cfg: Option<&UserConfig>) {
    env_flags! {
        /// Tracing filter, e.g. "info", "debug", or targets format.
        RUST_LOG: &str = "info";
        /// Preferred filter env (alias). If set, overrides RUST_LOG.
        TRACING_FILTER: &str = "";
        /// Pretty formatting for logs (ignored if TRACING_JSON=true). Prefer compact unless explicitly set.
        TRACING_PRETTY: bool = false;
        /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
        TRACING_COMPACT: bool = true;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to file under <FLEET_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = true;
        /// Optional explicit log directory (absolute). Defaults to <FLEET_HOME>/logs
        LOG_DIR: &str = "";
    }

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let env_set = |k: &str| std::env::var_os(k).is_some();
    let cfg = user_cfg.and_then(|c| c.logging.as_ref());

    // TRACING_FILTER first, then RUST_LOG, then user config.
    let env_filter = if !(*TRACING_FILTER).is_empty() {
        (*TRACING_FILTER).to_string()
    } else {
        (*RUST_LOG).to_string()
    };
    let rust_log = layered(
        env_set("TRACING_FILTER") || env_set("RUST_LOG"),
        env_filter,
        cfg.and_then(|c| c.level.clone()),
    );
    let tracing_json = layered(env_set("TRACING_JSON"), *TRACING_JSON, cfg.and_then(|c| c.json));
    let tracing_compact = layered(
        env_set("TRACING_COMPACT"),
        *TRACING_COMPACT,
        cfg.and_then(|c| c.compact),
    );
    let tracing_pretty = layered(
        env_set("TRACING_PRETTY"),
        *TRACING_PRETTY,
        cfg.and_then(|c| c.pretty),
    );
    let log_to_file = layered(env_set("LOG_TO_FILE"), *LOG_TO_FILE, cfg.and_then(|c| c.to_file));
    let log_dir = if env_set("LOG_DIR") && !(*LOG_DIR).is_empty() {
        Some(expand_home(*LOG_DIR))
    } else {
        cfg.and_then(|c| c.dir.as_deref()).map(expand_home)
    };

    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

    // Always write logs to stderr to avoid contaminating stdio JSON-RPC.
    let base = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    let mut dir_error = None;
    let file_writer = if log_to_file {
        let dir = log_dir.unwrap_or_else(|| fleet_home.join("logs"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "fleet-mcp.log");
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                Some(nb)
            }
            Err(e) => {
                dir_error = Some(format!("failed to create log dir {}: {}", dir.display(), e));
                None
            }
        }
    } else {
        None
    };
    let reg = tracing_subscriber::registry().with(filter);
    let installed = if tracing_json {
        reg.with(base.json())
            .with(file_writer.map(|nb| file_layer(nb).json()))
            .try_init()
    } else if tracing_compact {
        reg.with(base.compact())
            .with(file_writer.map(|nb| file_layer(nb).compact()))
            .try_init()
    } else if tracing_pretty {
        reg.with(base.pretty())
            .with(file_writer.map(|nb| file_layer(nb).pretty()))
            .try_init()
    } else {
        reg.with(base).with(file_writer.map(file_layer)).try_init()
    };
    if let Err(e) = installed {
        tracing::debug!("tracing already set: {:?}", e);
    }
    if let Some(msg) = dir_error {
        tracing::warn!("{}", msg);
    }
}

#[tokio::main]
async fn main() -> SdkResult<()> {
    env_flags! {
        /// Fleet home directory (absolute). Defaults to $HOME/.fleet-mcp
        FLEET_HOME: &str = "";
        /// Transport: "stdio" (default) or "http"
        TRANSPORT: &str = "stdio";
        /// Host for HTTP transport
        HOST: &str = "127.0.0.1";
        /// Port for HTTP transport
        PORT: u16 = 8081;
        /// Ping interval for HTTP SSE
        PING_SECS: u64 = 5;
        /// Enable JSON response mode for HTTP
        HTTP_JSON: bool = false;
        /// Global switch for connecting peer MCP servers
        ENABLE_MCP_SYSTEM: bool = true;
        /// Peer server descriptors (mcpServers JSON). Bundled defaults are used when missing.
        MCP_SERVERS_FILE: &str = "config/mcp_servers.json";
        /// Default connect/call timeout for servers that do not set one
        MCP_TIMEOUT_SECONDS: u64 = 60;
        /// Log npx / PATH diagnostics before connecting
        MCP_PROBE_ENVIRONMENT: bool = true;
    }

    let home = fleet_home(*FLEET_HOME);
    let user_cfg = load_user_config(&home);
    init_tracing(&home, user_cfg.as_ref().ok().and_then(Option::as_ref));
    let user_cfg = match user_cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("ignoring unreadable {}/config.toml: {:#}", home.display(), e);
            None
        }
    };

    tracing::info!("starting fleet-mcp (transport={})", *TRANSPORT);
    tracing::info!("fleet_home={}", home.display());

    // MCP settings: env, then [mcp] in config.toml, then defaults
    let env_set = |k: &str| std::env::var_os(k).is_some();
    let mcp_cfg = user_cfg.as_ref().and_then(|c| c.mcp.as_ref());
    let settings = ManagerSettings {
        enabled: layered(
            env_set("ENABLE_MCP_SYSTEM"),
            *ENABLE_MCP_SYSTEM,
            mcp_cfg.and_then(|c| c.enabled),
        ),
        default_timeout_secs: layered(
            env_set("MCP_TIMEOUT_SECONDS"),
            *MCP_TIMEOUT_SECONDS,
            mcp_cfg.and_then(|c| c.timeout_seconds),
        )
        .max(1),
        probe_environment: layered(
            env_set("MCP_PROBE_ENVIRONMENT"),
            *MCP_PROBE_ENVIRONMENT,
            mcp_cfg.and_then(|c| c.probe_environment),
        ),
    };
    let servers_file = expand_home(&layered(
        env_set("MCP_SERVERS_FILE"),
        (*MCP_SERVERS_FILE).to_string(),
        mcp_cfg.and_then(|c| c.servers_file.clone()),
    ));
    tracing::info!(
        "mcp: enabled={} servers_file={} default_timeout={}s",
        settings.enabled,
        servers_file.display(),
        settings.default_timeout_secs
    );

    let manager = Arc::new(McpManager::new(
        settings,
        Arc::new(FileDescriptorSource::new(Some(servers_file))),
        Arc::new(SdkConnector::default()),
    ));
    if manager.initialize_system().await {
        tracing::info!(
            "peer servers connected: {}",
            manager.get_available_servers().join(", ")
        );
    } else {
        tracing::warn!("no peer MCP servers connected; serving management tools only");
    }

    let server_details = InitializeResult {
        server_info: Implementation {
            name: "fleet-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Fleet MCP Server".to_string()),
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: Some(
            "Use list_mcp_servers to inspect peers and call_mcp_function { server_name, function_name, arguments } to invoke them.".to_string(),
        ),
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };

    let handler = FleetServerHandler::new(Arc::clone(&manager));

    if *TRANSPORT == "stdio" {
        let transport = StdioTransport::new(TransportOptions::default())?;
        let server: ServerRuntime =
            server_runtime_core::create_server(server_details, transport, handler);
        tracing::info!("starting stdio server");
        tokio::select! {
            res = server.start() => {
                if let Err(e) = res {
                    let msg = match e.rpc_error_message() {
                        Some(m) => m.to_string(),
                        None => e.to_string(),
                    };
                    tracing::error!("server runtime error: {}", msg);
                }
            }
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
        }
    } else {
        let host = (*HOST).to_string();
        let port = *PORT;
        let ping = Duration::from_secs(*PING_SECS);
        let server = hyper_server_core::create_server(
            server_details,
            handler,
            HyperServerOptions {
                host: host.clone(),
                port,
                ping_interval: ping,
                enable_json_response: Some(*HTTP_JSON),
                ..Default::default()
            },
        );
        tracing::info!(
            "http server configured; starting listener on {}:{} (json={}, ping_secs={})",
            host,
            port,
            *HTTP_JSON,
            *PING_SECS
        );
        tokio::select! {
            res = server.start() => {
                if let Err(e) = res {
                    let msg = match e.rpc_error_message() {
                        Some(m) => m.to_string(),
                        None => e.to_string(),
                    };
                    tracing::error!("hyper server error: {}", msg);
                }
            }
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
        }
    }

    manager.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}
