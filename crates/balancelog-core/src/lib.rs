//! # Balance Logger Core Library
//!
//! Acquisition engine for laboratory balances.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial and TCP transports (plus a simulated demo balance)
//! - CR LF frame reassembly and best-effort reading extraction
//! - An ordered measurement ledger with stable keys
//! - Crash-recovery checkpoints written after every change
//! - CSV export of the ledger
//!
//! ## Supported balances
//!
//! - Precisa 321 LX
//! - Any balance that prints one CR LF terminated reading per line
//!
//! ## Example
//!
//! ```rust,ignore
//! use balancelog_core::{acquisition::Acquisition, config::LoggerConfig};
//!
//! let config = LoggerConfig::load("config.json")?;
//! let mut session = Acquisition::from_config(&config);
//!
//! if session.pending_recovery().is_some() {
//!     session.restore();
//! }
//!
//! session.connect(&config.transport).await?;
//! // ... readings accumulate in the background ...
//! session.disconnect().await;
//! session.export_csv(&config.export_path)?;
//! ```

pub mod acquisition;
pub mod checkpoint;
pub mod config;
pub mod demo;
pub mod export;
pub mod extract;
pub mod frame;
pub mod ledger;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::acquisition::{
        Acquisition, AcquisitionSettings, ConnectionState, StatusReport, StatusTone,
    };
    pub use crate::checkpoint::{CheckpointStore, SessionState};
    pub use crate::config::LoggerConfig;
    pub use crate::extract::{extract, Reading, Unit};
    pub use crate::ledger::{EditableField, Ledger, Measurement, MeasurementKey};
    pub use crate::transport::{Transport, TransportConfig, TransportError, TransportKind};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
