//! Transport errors

use thiserror::Error;

/// Errors that can occur while opening or reading a scale connection
#[derive(Error, Debug)]
pub enum TransportError {
    /// Serial driver error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No such serial port
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Port is held by another process
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Not allowed to open the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// TCP peer refused or unreachable
    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    /// Open did not finish in time
    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    /// Setting the backend cannot apply
    #[error("Unsupported setting: {0}")]
    Unsupported(String),

    /// A session is already running
    #[error("Already connected")]
    AlreadyConnected,

    /// The transport was closed
    #[error("Connection closed")]
    Closed,

    /// Other I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TransportError {
    /// Classify a serial open failure by its underlying cause
    pub(crate) fn from_serial(port: &str, err: tokio_serial::Error) -> Self {
        match err.kind() {
            tokio_serial::ErrorKind::NoDevice => TransportError::PortNotFound(port.to_string()),
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(format!("{port}: {err}"))
            }
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                TransportError::PortNotFound(port.to_string())
            }
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::AddrInUse)
            | tokio_serial::ErrorKind::Io(std::io::ErrorKind::WouldBlock) => {
                TransportError::DeviceBusy(format!("{port}: {err}"))
            }
            _ => TransportError::SerialError(format!("{port}: {err}")),
        }
    }

    /// Classify a TCP connect failure by its underlying cause
    pub(crate) fn from_connect(addr: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                TransportError::PermissionDenied(format!("{addr}: {err}"))
            }
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::AddrNotAvailable
            | std::io::ErrorKind::TimedOut => {
                TransportError::HostUnreachable(format!("{addr}: {err}"))
            }
            _ => TransportError::IoError(err),
        }
    }
}
