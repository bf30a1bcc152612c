//! Host registry: static configuration merged with SSDP discovery results.
//!
//! [`HostRegistry`] owns the statically configured hosts (fixed at startup)
//! and the latest discovery snapshot (replaced wholesale on every cycle).
//!
//! ## Merge rules
//!
//! - One entry per address. Addresses match case-insensitively.
//! - When two static entries share an address, the later one wins.
//! - A static entry always beats discovery; a discovered host with the same address is
//!   absorbed into it and never overrides its credentials.
//! - Discovered hosts contribute only their address. Port, credentials and
//!   auth method come from the global defaults when a client is resolved.
//!
//! [`HostRegistry::hosts`] makes no ordering promise.
//! [`HostRegistry::addresses`] is sorted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::client::ClientConfig;
use crate::config::HostConfig;
use crate::discovery::{DiscoveredHost, SsdpDiscovery};

const FALLBACK_ADDRESS: &str = "127.0.0.1";

/// Registry of known Redfish hosts.
pub struct HostRegistry {
    static_hosts: Vec<HostConfig>,
    discovered: RwLock<Vec<DiscoveredHost>>,
    /// Global defaults applied by [`HostRegistry::resolve`].
    defaults: ClientConfig,
    span: Span,
}

impl HostRegistry {
    /// Build a registry from already validated static hosts.
    pub fn new(static_hosts: Vec<HostConfig>, defaults: ClientConfig, span: Span) -> Self {
        span.in_scope(|| info!(count = static_hosts.len(), "Loaded static hosts"));
        Self {
            static_hosts,
            discovered: RwLock::new(Vec::new()),
            defaults,
            span,
        }
    }

    /// Build a registry from a raw JSON host array.
    ///
    /// Empty or malformed input falls back to a single `127.0.0.1` host.
    /// This is the lenient library entry point for callers holding a raw
    /// `REDFISH_HOSTS` value; the binary goes through the strict loader in
    /// [`crate::config`] and uses [`HostRegistry::new`].
    pub fn from_json(raw: &str, defaults: ClientConfig, span: Span) -> Self {
        let hosts = span.in_scope(|| parse_static_hosts(raw));
        Self::new(hosts, defaults, span)
    }

    /// Replace the discovery snapshot.
    pub async fn update_discovered(&self, hosts: Vec<DiscoveredHost>) {
        let count = hosts.len();
        *self.discovered.write().await = hosts;
        self.span
            .in_scope(|| info!(count, "Updated discovered hosts"));
    }

    /// Merged view of static and discovered hosts, one entry per address.
    pub async fn hosts(&self) -> Vec<HostConfig> {
        let discovered = self.discovered.read().await;

        let mut merged: HashMap<String, HostConfig> = HashMap::new();
        for host in &self.static_hosts {
            merged.insert(host.address.clone(), host.clone());
        }
        for host in discovered.iter() {
            merged
                .entry(host.address.clone())
                .or_insert_with(|| HostConfig::new(host.address.clone()));
        }
        merged.into_values().collect()
    }

    /// Host names are case-insensitive, so `BMC-A.lab` matches `bmc-a.lab`.
    pub async fn host_by_address(&self, address: &str) -> Option<HostConfig> {
        self.hosts()
            .await
            .into_iter()
            .find(|host| host.address.eq_ignore_ascii_case(address))
    }

    /// Addresses of every known host, sorted.
    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .hosts()
            .await
            .into_iter()
            .map(|host| host.address)
            .collect();
        addresses.sort();
        addresses
    }

    /// Look up `address` and fill anything it leaves unset from the global defaults.
    pub async fn resolve(&self, address: &str) -> Option<ClientConfig> {
        let host = self.host_by_address(address).await?;
        Some(self.client_config(&host))
    }

    /// Overlay `host` on the global defaults.
    pub fn client_config(&self, host: &HostConfig) -> ClientConfig {
        let defaults = &self.defaults;
        ClientConfig {
            address: host.address.clone(),
            port: if host.port == 0 { defaults.port } else { host.port },
            username: or_default(&host.username, &defaults.username),
            password: or_default(&host.password, &defaults.password),
            auth_method: host.auth_method.unwrap_or(defaults.auth_method),
            tls_server_ca_cert: host
                .tls_server_ca_cert
                .clone()
                .or_else(|| defaults.tls_server_ca_cert.clone()),
            ..defaults.clone()
        }
    }
}

fn or_default(value: &str, default: &str) -> String {
    let chosen = if value.is_empty() { default } else { value };
    chosen.to_string()
}

/// Parse a JSON host array, falling back to `127.0.0.1` on empty or bad input.
/// Entries without an address are dropped.
pub fn parse_static_hosts(raw: &str) -> Vec<HostConfig> {
    let fallback = || vec![HostConfig::new(FALLBACK_ADDRESS)];
    if raw.trim().is_empty() {
        return fallback();
    }

    match serde_json::from_str::<Vec<HostConfig>>(raw) {
        Ok(hosts) => hosts
            .into_iter()
            .filter(|host| match host.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Skipping static host");
                    false
                }
            })
            .collect(),
        Err(e) => {
            error!(error = %e, "Failed to parse static hosts, using {FALLBACK_ADDRESS}");
            fallback()
        }
    }
}

/// Run `discovery` every `every` and feed the results into `registry`.
///
/// The first cycle starts immediately. A failed cycle keeps the previous
/// snapshot.
pub fn spawn_discovery(
    registry: Arc<HostRegistry>,
    discovery: SsdpDiscovery,
    every: Duration,
) -> JoinHandle<()> {
    let span = registry.span.clone();
    tokio::spawn(
        async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match discovery.discover().await {
                    Ok(hosts) => registry.update_discovered(hosts).await,
                    Err(e) => warn!(error = %e, "SSDP discovery cycle failed"),
                }
                debug!("Next discovery cycle in {}s", every.as_secs());
            }
        }
        .instrument(span),
    )
}
