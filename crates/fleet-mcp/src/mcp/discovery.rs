//! Load and validate peer server descriptors.
//!
//! The payload is JSON shaped like the common host `mcp.json` files:
//! `{ "mcpServers": { "<name>": { "type": "stdio", "command": ..., ... } } }`.
//! A `servers` table (VS Code style) is accepted as well, and so is a bare
//! name → entry map. Bad entries are skipped with a log line; they never fail
//! the batch.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{AuthConfig, AuthKind, DEFAULT_AUTH_HEADER, RemoteKind, ServerDescriptor, TransportConfig};

/// Bundled descriptor set used when no servers file is present.
pub const BUNDLED_DEFAULT_SERVERS: &str = include_str!("../../defaults/default_mcp_servers.json");

/// Provider of the raw descriptor payload. Re-read on every reload.
pub trait DescriptorSource: Send + Sync {
    /// `None` when nothing usable could be read (already logged).
    fn load(&self) -> Option<JsonValue>;
}

/// Reads the configured servers file, falling back to the bundled defaults.
#[derive(Debug, Clone)]
pub struct FileDescriptorSource {
    servers_file: Option<PathBuf>,
    bundled: &'static str,
}

impl FileDescriptorSource {
    pub fn new(servers_file: Option<PathBuf>) -> Self {
        Self {
            servers_file,
            bundled: BUNDLED_DEFAULT_SERVERS,
        }
    }

    /// Override the bundled fallback (tests, embedders).
    pub fn with_bundled(mut self, bundled: &'static str) -> Self {
        self.bundled = bundled;
        self
    }
}

impl DescriptorSource for FileDescriptorSource {
    fn load(&self) -> Option<JsonValue> {
        if let Some(path) = self.servers_file.as_ref().filter(|p| p.exists()) {
            let content = match fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("failed to read MCP servers file {}: {}", path.display(), e);
                    return None;
                }
            };
            return match serde_json::from_str::<JsonValue>(&content) {
                Ok(v) => {
                    tracing::info!("loading MCP servers from {}", path.display());
                    Some(v)
                }
                Err(e) => {
                    tracing::error!("invalid MCP servers JSON at {}: {}", path.display(), e);
                    None
                }
            };
        }
        match serde_json::from_str::<JsonValue>(self.bundled) {
            Ok(v) => {
                tracing::info!("using bundled MCP server defaults");
                Some(v)
            }
            Err(e) => {
                tracing::error!("bundled MCP server defaults are not valid JSON: {}", e);
                None
            }
        }
    }
}

/// Parse every usable descriptor out of `payload`.
pub fn parse_servers_payload(payload: &JsonValue, default_timeout: u64) -> Vec<ServerDescriptor> {
    let Some(root) = payload.as_object() else {
        tracing::error!("MCP servers config must be a JSON object");
        return Vec::new();
    };
    let map = root
        .get("mcpServers")
        .and_then(|m| m.as_object())
        .or_else(|| root.get("servers").and_then(|m| m.as_object()))
        .unwrap_or(root);

    let mut order: Vec<String> = Vec::new();
    let mut by_name: HashMap<String, ServerDescriptor> = HashMap::new();
    for (key, def) in map.iter() {
        let Some(obj) = def.as_object() else {
            tracing::warn!("skipping invalid MCP server entry '{}' (not an object)", key);
            continue;
        };
        let Some(desc) = parse_server_entry(key, obj, default_timeout) else {
            continue;
        };
        if !by_name.contains_key(&desc.name) {
            order.push(desc.name.clone());
        }
        // last write wins
        by_name.insert(desc.name.clone(), desc);
    }
    let out: Vec<ServerDescriptor> = order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect();
    tracing::info!("loaded {} MCP server configuration(s)", out.len());
    out
}

/// Check required fields and correct an out-of-range timeout in place.
pub fn validate(descriptor: &mut ServerDescriptor, default_timeout: u64) -> bool {
    if descriptor.name.trim().is_empty() {
        tracing::error!("MCP configuration missing server name");
        return false;
    }
    match &descriptor.transport {
        TransportConfig::Stdio { command, .. } if command.trim().is_empty() => {
            tracing::error!(
                "MCP configuration '{}' missing command for stdio transport",
                descriptor.name
            );
            return false;
        }
        TransportConfig::Remote { url, .. } if url.trim().is_empty() => {
            tracing::error!(
                "MCP configuration '{}' missing URL for {} transport",
                descriptor.name,
                descriptor.transport.label()
            );
            return false;
        }
        _ => {}
    }
    if descriptor.timeout_seconds <= 0 {
        tracing::warn!(
            "MCP configuration '{}' has invalid timeout {}; applying default {} seconds",
            descriptor.name,
            descriptor.timeout_seconds,
            default_timeout
        );
        descriptor.timeout_seconds = i64::try_from(default_timeout).unwrap_or(i64::MAX);
    }
    true
}

fn parse_server_entry(
    key: &str,
    def: &JsonMap<String, JsonValue>,
    default_timeout: u64,
) -> Option<ServerDescriptor> {
    let name = key.trim();
    if name.is_empty() {
        tracing::warn!("MCP server entry missing name");
        return None;
    }
    if let Some(inner) = def.get("name").and_then(|v| v.as_str())
        && inner.trim() != name
    {
        tracing::debug!("MCP server '{}' declares name '{}'; using map key", name, inner);
    }

    let transport_raw = def
        .get("type")
        .or_else(|| def.get("transport"))
        .and_then(|v| v.as_str())
        .unwrap_or("stdio")
        .trim()
        .to_ascii_lowercase();
    let remote = match transport_raw.as_str() {
        "stdio" => None,
        "http" => Some(RemoteKind::Http),
        "sse" => Some(RemoteKind::Sse),
        other => {
            tracing::warn!(
                "invalid transport type '{}' for MCP server '{}'; using stdio",
                other,
                name
            );
            None
        }
    };

    let enabled = def.get("enabled").map(truthy).unwrap_or(true);
    let timeout_seconds = parse_timeout(name, def.get("timeout_seconds"), default_timeout);
    let description = def
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let transport = match remote {
        Some(kind) => parse_remote(name, kind, def)?,
        None => parse_stdio(name, def)?,
    };

    Some(ServerDescriptor {
        name: name.to_string(),
        transport,
        enabled,
        timeout_seconds,
        description,
    })
}

/// Stdio entry: `{ command, args?, env? }`.
fn parse_stdio(name: &str, def: &JsonMap<String, JsonValue>) -> Option<TransportConfig> {
    let command = def
        .get("command")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let Some(command) = command else {
        tracing::warn!("MCP server '{}' missing command for stdio transport", name);
        return None;
    };

    let args: Vec<String> = match def.get("args") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(arr)) => arr.iter().map(stringify).collect(),
        Some(_) => {
            tracing::warn!("ignoring non-list args for MCP server '{}'", name);
            Vec::new()
        }
    };
    let env: HashMap<String, String> = match def.get("env") {
        None | Some(JsonValue::Null) => HashMap::new(),
        Some(JsonValue::Object(m)) => m.iter().map(|(k, v)| (k.clone(), stringify(v))).collect(),
        Some(_) => {
            tracing::warn!("invalid env mapping for MCP server '{}'", name);
            HashMap::new()
        }
    };

    Some(TransportConfig::Stdio {
        command: command.to_string(),
        args,
        env,
    })
}

/// Remote entry: `{ url, auth? }`.
fn parse_remote(
    name: &str,
    kind: RemoteKind,
    def: &JsonMap<String, JsonValue>,
) -> Option<TransportConfig> {
    let url = def
        .get("url")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|u| !u.is_empty());
    let Some(url) = url else {
        tracing::warn!("MCP server '{}' missing URL for HTTP transport", name);
        return None;
    };

    let auth = def
        .get("auth")
        .and_then(|v| v.as_object())
        .and_then(|a| parse_auth(name, a));

    Some(TransportConfig::Remote {
        kind,
        url: url.to_string(),
        auth,
    })
}

fn parse_auth(name: &str, auth: &JsonMap<String, JsonValue>) -> Option<AuthConfig> {
    let token = auth
        .get("token")
        .map(stringify)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let Some(token) = token else {
        tracing::warn!("MCP server '{}' has auth config but missing token", name);
        return None;
    };
    let kind_raw = auth
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("bearer")
        .trim()
        .to_ascii_lowercase();
    let kind = match kind_raw.as_str() {
        "bearer" => AuthKind::Bearer,
        "api_key" | "api-key" | "apikey" => AuthKind::ApiKey,
        other => {
            tracing::warn!(
                "invalid auth type '{}' for MCP server '{}'; using bearer",
                other,
                name
            );
            AuthKind::Bearer
        }
    };
    let header_name = auth
        .get("header_name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or(DEFAULT_AUTH_HEADER)
        .to_string();
    Some(AuthConfig {
        kind,
        token,
        header_name,
    })
}

/// Accepts integers, floats (truncated) and numeric strings.
fn parse_timeout(name: &str, raw: Option<&JsonValue>, default_timeout: u64) -> i64 {
    let fallback = i64::try_from(default_timeout).unwrap_or(i64::MAX);
    let parsed = match raw {
        None | Some(JsonValue::Null) => return fallback,
        Some(JsonValue::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(JsonValue::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    parsed.unwrap_or_else(|| {
        tracing::warn!(
            "invalid timeout for MCP server '{}'; using default {}",
            name,
            default_timeout
        );
        fallback
    })
}

fn truthy(v: &JsonValue) -> bool {
    match v {
        JsonValue::Bool(b) => *b,
        JsonValue::Null => false,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn stringify(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
