//! # redfish-mcp
//!
//! MCP (Model Context Protocol) server that gives an AI agent read access to
//! Redfish BMC endpoints. Hosts come from static configuration and, when
//! enabled, from periodic SSDP discovery on the local network. Runs as a
//! stdio JSON-RPC server; all logging goes to stderr.
//!
//! ## Architecture
//!
//! ```text
//! main.rs      : entry point, config loading, tracing setup, MCP server launch
//! config.rs    : JSON file / env-var configuration loading
//! client.rs    : HTTP client for Redfish endpoints (basic / session auth)
//! retry.rs     : exponential backoff with jitter around every request
//! discovery.rs : SSDP M-SEARCH for Redfish service roots
//! hosts.rs     : host registry merging static and discovered hosts
//! mcp.rs       : MCP JSON-RPC protocol handler (stdio)
//! tools.rs     : tool definitions and handlers
//! ```
//!
//! ## Tools
//!
//! - `list_servers`: addresses of every known host
//! - `get_resource_data`: `GET` a resource by its full `https://` URL

pub mod client;
pub mod config;
pub mod discovery;
pub mod hosts;
pub mod mcp;
pub mod retry;
pub mod tools;
