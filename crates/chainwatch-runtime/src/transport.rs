//! Reference chain transport: a chain counts as connected once its configured
//! RPC endpoint accepts a TCP connection within the probe timeout.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use chainwatch_bootstrap::{ApiHandle, ChainTransport, TransportError};
use chainwatch_core::types::{ChainId, ConnectionStatus};

pub struct ProbeTransport {
    endpoints: Mutex<HashMap<ChainId, String>>,
    connected: Mutex<BTreeMap<ChainId, ApiHandle>>,
    timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProbeTransport {
    pub fn new(endpoints: impl IntoIterator<Item = (String, String)>, timeout: Duration) -> Self {
        Self {
            endpoints: Mutex::new(endpoints.into_iter().collect()),
            connected: Mutex::new(BTreeMap::new()),
            timeout,
        }
    }

    fn endpoint(&self, chain: &str) -> Result<String, TransportError> {
        lock(&self.endpoints)
            .get(chain)
            .cloned()
            .ok_or_else(|| TransportError::UnknownChain(chain.to_owned()))
    }

    async fn probe(&self, chain: &str, endpoint: &str) -> Result<(), TransportError> {
        let addr = probe_addr(endpoint);
        let unreachable = |reason: String| TransportError::Unreachable {
            chain: chain.to_owned(),
            reason,
        };
        match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(unreachable(format!("{addr}: {e}"))),
            Err(_) => Err(unreachable(format!("{addr}: timed out after {:?}", self.timeout))),
        }
    }
}

/// Reduce an endpoint URL to `host:port`. `ws://` defaults to port 80 and
/// `wss://` to 443; a bare `host:port` passes through.
pub fn probe_addr(endpoint: &str) -> String {
    let (rest, default_port) = if let Some(rest) = endpoint.strip_prefix("wss://") {
        (rest, Some(443))
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        (rest, Some(443))
    } else if let Some(rest) = endpoint.strip_prefix("ws://") {
        (rest, Some(80))
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        (rest, Some(80))
    } else {
        (endpoint, None)
    };
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);
    let has_port = authority
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    match default_port {
        Some(port) if !has_port => format!("{authority}:{port}"),
        _ => authority.to_owned(),
    }
}

#[async_trait]
impl ChainTransport for ProbeTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        tracing::info!("{} endpoint(s) configured", lock(&self.endpoints).len());
        Ok(())
    }

    async fn connect(&self, chain: &str) -> Result<(), TransportError> {
        if lock(&self.connected).contains_key(chain) {
            return Ok(());
        }
        let endpoint = self.endpoint(chain)?;
        self.probe(chain, &endpoint).await?;
        tracing::info!("{chain} reachable at {endpoint}");
        lock(&self.connected).insert(
            chain.to_owned(),
            ApiHandle {
                chain_id: chain.to_owned(),
                endpoint,
            },
        );
        Ok(())
    }

    async fn connect_endpoint(&self, chain: &str, endpoint: &str) -> Result<(), TransportError> {
        self.set_endpoint(chain, endpoint);
        self.close(chain).await;
        self.connect(chain).await
    }

    fn set_endpoint(&self, chain: &str, endpoint: &str) {
        lock(&self.endpoints).insert(chain.to_owned(), endpoint.to_owned());
    }

    async fn api(&self, chain: &str) -> Result<ApiHandle, TransportError> {
        lock(&self.connected)
            .get(chain)
            .cloned()
            .ok_or_else(|| TransportError::NotConnected(chain.to_owned()))
    }

    async fn close(&self, chain: &str) {
        if lock(&self.connected).remove(chain).is_some() {
            tracing::debug!("{chain} closed");
        }
    }

    async fn close_all(&self) {
        let closed = std::mem::take(&mut *lock(&self.connected));
        if !closed.is_empty() {
            tracing::info!("closed {} chain(s)", closed.len());
        }
    }

    fn status(&self, chain: &str) -> ConnectionStatus {
        if lock(&self.connected).contains_key(chain) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    fn connected_chains(&self) -> Vec<ChainId> {
        lock(&self.connected).keys().cloned().collect()
    }
}
