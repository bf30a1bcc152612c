//! MCP tool definitions and handlers.
//!
//! Each tool is defined as a JSON schema (returned by [`tool_definitions`])
//! and handled by an async function dispatched from [`handle_tool_call`].
//!
//! - `list_servers`: every address the registry knows, sorted.
//! - `get_resource_data`: `GET` one Redfish resource by full `https://` URL.
//!   The host part must match a registry address; an explicit port in the
//!   URL overrides the port the registry resolves.

use serde_json::{json, Value};
use tracing::{info, info_span};

use crate::client;
use crate::hosts::HostRegistry;

/// Returns all tool definitions.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "list_servers",
            "description": "List all Redfish servers that can be accessed.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "get_resource_data",
            "description": "Fetch data from a specific Redfish resource. Returns the JSON body and the Allow, Content-Type, Content-Encoding, ETag and Link response headers.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Full resource URL, e.g. https://10.0.0.5/redfish/v1/Systems. The host must be one returned by list_servers."
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }
        }),
    ]
}

/// Handle a tool call and return MCP content.
pub async fn handle_tool_call(name: &str, args: &Value, registry: &HostRegistry) -> ToolResult {
    match name {
        "list_servers" => handle_list_servers(registry).await,
        "get_resource_data" => handle_get_resource_data(args, registry).await,
        _ => ToolResult::error(format!("Unknown tool: {name}")),
    }
}

/// Result of an MCP tool call, ready to be serialized into a JSON-RPC response.
#[derive(Debug)]
pub struct ToolResult {
    /// MCP content blocks (a single `{"type":"text","text":"..."}` entry).
    pub content: Vec<Value>,
    /// Maps to `isError` in the MCP response.
    pub is_error: bool,
}

impl ToolResult {
    fn success(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value).unwrap_or_default();
        Self {
            content: vec![json!({ "type": "text", "text": text })],
            is_error: false,
        }
    }

    fn error(message: String) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": message })],
            is_error: true,
        }
    }

    /// Text of the first content block.
    pub fn text(&self) -> &str {
        self.content
            .first()
            .and_then(|c| c.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

async fn handle_list_servers(registry: &HostRegistry) -> ToolResult {
    info!("Handling list_servers request");
    ToolResult::success(json!({ "servers": registry.addresses().await }))
}

async fn handle_get_resource_data(args: &Value, registry: &HostRegistry) -> ToolResult {
    let Some(url) = args.get("url").and_then(Value::as_str) else {
        return ToolResult::error("Missing required parameter: url".into());
    };
    info!(url, "Handling get_resource_data request");

    let target = match parse_resource_url(url) {
        Ok(t) => t,
        Err(e) => return ToolResult::error(format!("Invalid Redfish URL: {e}")),
    };

    let Some(mut config) = registry.resolve(&target.address).await else {
        return ToolResult::error(format!(
            "Server {} not found in configuration",
            target.address
        ));
    };
    if let Some(port) = target.port {
        config.port = port;
    }

    let span = info_span!("redfish", host = %target.address, port = config.port);
    match client::execute(config, &target.resource_path, span).await {
        Ok(resp) => ToolResult::success(json!({
            "headers": resp.headers,
            "data": resp.data,
        })),
        Err(e) => ToolResult::error(format!("Failed to get resource data: {e}")),
    }
}

/// Host, optional port and resource path extracted from a tool URL.
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceUrl {
    /// Host as stored in the registry (IPv6 literals without brackets).
    pub address: String,
    /// Explicit, non-default port from the URL.
    pub port: Option<u16>,
    /// Path plus query, always starting with `/`.
    pub resource_path: String,
}

/// Split `https://host[:port]/path[?query]` into its parts.
pub fn parse_resource_url(url: &str) -> Result<ResourceUrl, String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| e.to_string())?;
    if parsed.scheme() != "https" {
        return Err("URL must use HTTPS".into());
    }
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or("empty server address")?;
    let address = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
        .to_string();

    let mut resource_path = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        resource_path.push('?');
        resource_path.push_str(query);
    }

    Ok(ResourceUrl {
        address,
        port: parsed.port(),
        resource_path,
    })
}
