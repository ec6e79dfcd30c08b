//! TCP transport for balances behind a serial-to-Ethernet bridge

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::{read_with_timeout, ReadOutcome, Transport, TransportError, TransportKind};

/// Connect timeout in milliseconds
pub const CONNECT_TIMEOUT_MS: u64 = 5000;

/// TCP endpoint of a balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 8000,
        }
    }
}

impl TcpConfig {
    /// `host:port` form used for connecting and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Open TCP connection to a balance
pub struct TcpTransport {
    address: String,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect, giving up after [`CONNECT_TIMEOUT_MS`]
    pub async fn open(config: &TcpConfig) -> Result<Self, TransportError> {
        let address = config.address();
        let connect = TcpStream::connect(address.as_str());
        let stream = match tokio::time::timeout(Duration::from_millis(CONNECT_TIMEOUT_MS), connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::from_connect(&address, e)),
            Err(_) => return Err(TransportError::Timeout(CONNECT_TIMEOUT_MS)),
        };
        // Readings are a few bytes each
        let _ = stream.set_nodelay(true);

        debug!(%address, "tcp connection opened");
        Ok(Self {
            address,
            stream: Some(stream),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn describe(&self) -> String {
        self.address.clone()
    }

    async fn read_available(&mut self, timeout: Duration) -> Result<ReadOutcome, TransportError> {
        match self.stream.as_mut() {
            Some(stream) => read_with_timeout(stream, timeout).await,
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(address = %self.address, "tcp connection closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
