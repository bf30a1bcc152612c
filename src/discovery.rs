//! SSDP discovery of Redfish service roots.
//!
//! [`SsdpDiscovery`] sends one `M-SEARCH` for the Redfish search target and
//! collects answers until its timeout elapses. A response counts only if its
//! `AL` header is an `https` URI whose path is the service root
//! (`/redfish/v1` or `/redfish/v1/`). Anything else is logged at debug and
//! skipped, so one misbehaving device never hides the others.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument, Span};

pub const SSDP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;
const SSDP_MX: u32 = 2;
const SSDP_TTL: u32 = 2;
pub const REDFISH_SEARCH_TARGET: &str = "urn:dmtf-org:service:redfish-rest:1";
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// A Redfish endpoint that answered the M-SEARCH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredHost {
    /// Source IP of the response datagram.
    pub address: String,
    /// Validated `AL` URI.
    pub service_root: String,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to create UDP socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to send M-SEARCH: {0}")]
    Send(#[source] io::Error),
}

/// One-shot SSDP search for Redfish services.
pub struct SsdpDiscovery {
    timeout: Duration,
    buffer_size: usize,
    target: SocketAddr,
    span: Span,
}

impl SsdpDiscovery {
    /// Search the standard SSDP multicast group, waiting `timeout` for answers.
    pub fn new(timeout: Duration, span: Span) -> Self {
        Self {
            timeout,
            buffer_size: DEFAULT_BUFFER_SIZE,
            target: SocketAddr::V4(SocketAddrV4::new(SSDP_ADDR, SSDP_PORT)),
            span,
        }
    }

    /// Size of the receive buffer; longer datagrams are truncated.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Send the M-SEARCH somewhere other than the multicast group.
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    /// Run one discovery cycle. An empty list means nothing answered.
    pub async fn discover(&self) -> Result<Vec<DiscoveredHost>, DiscoveryError> {
        self.run().instrument(self.span.clone()).await
    }

    async fn run(&self) -> Result<Vec<DiscoveredHost>, DiscoveryError> {
        info!(target_addr = %self.target, "Starting SSDP discovery");

        let bind: SocketAddr = if self.target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await.map_err(DiscoveryError::Socket)?;
        if self.target.is_ipv4() {
            if let Err(e) = socket.set_multicast_ttl_v4(SSDP_TTL) {
                debug!(error = %e, "Could not set multicast TTL");
            }
        }

        socket
            .send_to(msearch_message().as_bytes(), self.target)
            .await
            .map_err(DiscoveryError::Send)?;
        info!("SSDP M-SEARCH sent, waiting for responses");

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; self.buffer_size];
        let mut hosts = Vec::new();

        loop {
            if Instant::now() >= deadline {
                break;
            }
            let (len, from) =
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Err(_) => break,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Error reading SSDP response");
                        continue;
                    }
                    Ok(Ok(received)) => received,
                };

            let response = String::from_utf8_lossy(&buf[..len]);
            match service_root(&response) {
                Some(service_root) => {
                    let host = DiscoveredHost {
                        address: from.ip().to_string(),
                        service_root,
                    };
                    info!(
                        address = %host.address,
                        service_root = %host.service_root,
                        "Discovered Redfish endpoint"
                    );
                    hosts.push(host);
                }
                None => debug!(
                    address = %from.ip(),
                    "Received SSDP response but no valid AL header found"
                ),
            }
        }

        info!(hosts_found = hosts.len(), "SSDP discovery completed");
        Ok(hosts)
    }
}

/// The M-SEARCH request for Redfish services.
pub fn msearch_message() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_ADDR}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {SSDP_MX}\r\n\
         ST: {REDFISH_SEARCH_TARGET}\r\n\r\n"
    )
}

/// The validated service root advertised by an SSDP response, if any.
pub fn service_root(response: &str) -> Option<String> {
    let al = parse_al(response)?;
    is_valid_service_root(al).then(|| al.to_string())
}

/// First non-empty `AL:` header value, matched case-insensitively.
fn parse_al(response: &str) -> Option<&str> {
    response.lines().find_map(|line| {
        let line = line.trim();
        let name = line.get(..3)?;
        if !name.eq_ignore_ascii_case("AL:") {
            return None;
        }
        let value = line[3..].trim();
        (!value.is_empty()).then_some(value)
    })
}

fn is_valid_service_root(uri: &str) -> bool {
    let parsed = match reqwest::Url::parse(uri) {
        Ok(u) => u,
        Err(e) => {
            debug!(uri, error = %e, "Service root URI parse error");
            return false;
        }
    };

    if parsed.scheme() != "https" {
        debug!(uri, "Service root URI rejected (not https)");
        return false;
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        debug!(uri, "Service root URI rejected (missing host)");
        return false;
    }
    if !matches!(parsed.path(), "/redfish/v1" | "/redfish/v1/")
        || parsed.query().is_some()
        || parsed.fragment().is_some()
    {
        debug!(uri, path = parsed.path(), "Service root URI rejected (invalid path)");
        return false;
    }
    true
}
