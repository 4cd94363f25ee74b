//! Post-creation connectivity
//!
//! Establishing the actual agent session is the host's business; the
//! provisioning core only waits until a new droplet is reachable before
//! resolving its planned-instance handle. [`TcpConnector`] does that by
//! polling the node's SSH port; embedders with a real launcher implement
//! [`Connector`] themselves.

use crate::error::{ProvisionError, Result};
use crate::registry::FleetNode;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

/// Host collaborator that brings a freshly created node online.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Wait until the node accepts connections, or fail.
    async fn connect(&self, node: &FleetNode) -> Result<()>;
}

/// Connector that polls the node's SSH port until it accepts a TCP
/// connection.
pub struct TcpConnector {
    /// Overall deadline for the node to become reachable
    pub timeout: Duration,

    /// Wait between connection attempts
    pub retry_wait: Duration,
}

impl TcpConnector {
    /// Create a connector with the given deadline and retry cadence.
    pub fn new(timeout: Duration, retry_wait: Duration) -> Self {
        Self {
            timeout,
            retry_wait,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, node: &FleetNode) -> Result<()> {
        let host = node.host.as_deref().ok_or_else(|| {
            ProvisionError::config(format!("node {} has no address assigned", node.name))
        })?;
        let addr = format!("{}:{}", host, node.ssh_port);
        info!(
            "Waiting for {} at {} (timeout: {:?})",
            node.name, addr, self.timeout
        );

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProvisionError::Timeout(self.timeout));
            }
            match timeout(remaining, TcpStream::connect(&addr)).await {
                Ok(Ok(_)) => {
                    info!("Node {} is reachable", node.name);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!("Node {} not reachable yet: {}", node.name, e);
                }
                Err(_) => {
                    return Err(ProvisionError::Timeout(self.timeout));
                }
            }
            if Instant::now() + self.retry_wait >= deadline {
                return Err(ProvisionError::Timeout(self.timeout));
            }
            sleep(self.retry_wait).await;
        }
    }
}
