//! Scale Transports
//!
//! Byte-oriented connections to a balance: RS-232 serial, raw TCP, or the
//! built-in demo scale. Every transport is polled with a short timeout so the
//! acquisition loop stays responsive to disconnect requests.

mod error;
pub mod serial;
pub mod tcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::demo::{DemoConfig, DemoScale};

pub use error::TransportError;
pub use serial::{list_ports, FlowControl, Parity, PortInfo, SerialConfig, SerialTransport};
pub use tcp::{TcpConfig, TcpTransport};

/// Default read poll timeout in milliseconds
pub const DEFAULT_POLL_MS: u64 = 100;

/// Size of the scratch buffer used for a single read
pub const READ_CHUNK_SIZE: usize = 1024;

/// Kind of transport backing a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// RS-232 serial port
    Serial,
    /// Raw TCP socket
    Tcp,
    /// Simulated balance
    Demo,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Demo => write!(f, "demo"),
        }
    }
}

/// Parameters for opening a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Serial port settings
    Serial(SerialConfig),
    /// TCP endpoint
    Tcp(TcpConfig),
    /// Simulated balance settings
    Demo(DemoConfig),
}

impl TransportConfig {
    /// The kind of transport this configuration opens
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Serial(_) => TransportKind::Serial,
            TransportConfig::Tcp(_) => TransportKind::Tcp,
            TransportConfig::Demo(_) => TransportKind::Demo,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Serial(SerialConfig::default())
    }
}

/// Result of a single poll of a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Zero or more bytes arrived within the timeout
    Data(Vec<u8>),
    /// The peer closed the stream
    Eof,
}

/// Abstraction over a byte stream coming from a balance
#[async_trait]
pub trait Transport: Send {
    /// Which backend this is
    fn kind(&self) -> TransportKind;

    /// Human-readable endpoint (port name or host:port)
    fn describe(&self) -> String;

    /// Wait at most `timeout` for bytes. Returns an empty `Data` when nothing
    /// arrived, never blocks past the timeout.
    async fn read_available(&mut self, timeout: Duration) -> Result<ReadOutcome, TransportError>;

    /// Release the underlying handle. Safe to call more than once.
    async fn close(&mut self);

    /// Whether the handle is still held
    fn is_open(&self) -> bool;
}

/// Open the transport described by `config`
pub async fn open(config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
    match config {
        TransportConfig::Serial(cfg) => Ok(Box::new(SerialTransport::open(cfg)?)),
        TransportConfig::Tcp(cfg) => Ok(Box::new(TcpTransport::open(cfg).await?)),
        TransportConfig::Demo(cfg) => Ok(Box::new(DemoScale::new(cfg.clone()))),
    }
}

/// Poll an async stream for up to `timeout`, mapping a zero-length read to EOF
pub(crate) async fn read_with_timeout<R>(
    stream: &mut R,
    timeout: Duration,
) -> Result<ReadOutcome, TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = [0u8; READ_CHUNK_SIZE];
    match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
        Ok(Ok(0)) => Ok(ReadOutcome::Eof),
        Ok(Ok(n)) => Ok(ReadOutcome::Data(buf[..n].to_vec())),
        Ok(Err(e)) => Err(TransportError::IoError(e)),
        Err(_) => Ok(ReadOutcome::Data(Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_tagging() {
        let cfg = TransportConfig::Tcp(TcpConfig {
            host: "10.0.0.5".into(),
            port: 4001,
        });
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["kind"], "tcp");
        assert_eq!(json["host"], "10.0.0.5");

        let back: TransportConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), TransportKind::Tcp);
    }

    #[tokio::test]
    async fn test_read_with_timeout_idle_and_eof() {
        let (mut client, server) = tokio::io::duplex(64);

        let idle = read_with_timeout(&mut client, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(idle, ReadOutcome::Data(Vec::new()));

        drop(server);
        let eof = read_with_timeout(&mut client, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(eof, ReadOutcome::Eof);
    }
}
