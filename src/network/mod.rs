//! # Network
//!
//! Everything between the device and the IP network: wireless link bring-up,
//! hostname resolution and the bounded-retry datagram exchange used by the
//! time client.

pub mod link;
pub mod nmcli;
pub mod udp_client;

use async_trait::async_trait;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No address found for host '{host}'")]
    NoAddress { host: String },

    #[error("Lookup of host '{host}' failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Hostname resolution seam.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, ResolveError>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
        let mut addresses = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| ResolveError::Lookup {
                host: host.to_string(),
                source,
            })?;

        // Prefer IPv4, the broker and time servers are usually reachable that way.
        let all: Vec<SocketAddr> = addresses.by_ref().collect();
        let chosen = all
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| all.first())
            .copied()
            .ok_or_else(|| ResolveError::NoAddress {
                host: host.to_string(),
            })?;

        debug!("Resolved {}:{} to {}", host, port, chosen);
        Ok(chosen)
    }
}
