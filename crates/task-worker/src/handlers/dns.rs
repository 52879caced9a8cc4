use crate::handler::{TaskHandler, TaskResult};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use task_worker_core::TaskPayload;

/// Resolves a hostname to all of its addresses
pub struct DnsLookupHandler {
    timeout: Duration,
}

impl DnsLookupHandler {
    pub fn new(timeout: Duration) -> Self {
        DnsLookupHandler { timeout }
    }

    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, String> {
        let addrs = tokio::time::timeout(self.timeout, tokio::net::lookup_host((host, 0)))
            .await
            .map_err(|_| format!("timed out after {:?}", self.timeout))?
            .map_err(|e| e.to_string())?;

        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        Ok(ips)
    }
}

#[async_trait]
impl TaskHandler for DnsLookupHandler {
    async fn execute(&self, payload: &TaskPayload) -> TaskResult {
        let host = payload.text();

        match self.resolve(&host).await {
            Ok(ips) => {
                let joined = ips.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                format!("IP addresses for {}: {}", host, joined)
            }
            Err(e) => format!("DNS lookup failed: {}", e),
        }
    }
}
