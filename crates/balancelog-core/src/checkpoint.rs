//! Crash-recovery checkpoints
//!
//! The whole ledger plus its cursor is rewritten after every mutation, so an
//! abnormal exit loses at most the reading that was being processed.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ledger::Measurement;

/// Default checkpoint file name, created in the working directory
pub const DEFAULT_CHECKPOINT_FILE: &str = "balance_data.tmp.json";

/// Errors from reading or writing the checkpoint file
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Reading or writing the file failed
    #[error("I/O error on checkpoint {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The file is not a valid checkpoint
    #[error("Malformed checkpoint {path}: {source}")]
    Format {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

fn default_counter() -> u64 {
    1
}

/// Persisted session: ledger rows, next sample id and last device label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Measurements in ledger order
    #[serde(default)]
    pub data: Vec<Measurement>,
    /// Next sample id to assign
    #[serde(default = "default_counter")]
    pub sample_counter: u64,
    /// Last device label used
    #[serde(default)]
    pub device_name: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            sample_counter: default_counter(),
            device_name: String::new(),
        }
    }
}

/// File-backed checkpoint location
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_FILE)
    }
}

impl CheckpointStore {
    /// Store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a checkpoint file is present
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn io_err(&self, source: io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Overwrite the checkpoint. Written to a sibling file first and renamed,
    /// so a crash mid-write leaves the previous checkpoint intact.
    pub fn save(&self, state: &SessionState) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec(state).map_err(|source| CheckpointError::Format {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        debug!(
            path = %self.path.display(),
            rows = state.data.len(),
            cursor = state.sample_counter,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Read the checkpoint, distinguishing "absent" from "unreadable"
    pub fn try_load(&self) -> Result<Option<SessionState>, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CheckpointError::Format {
                path: self.path.clone(),
                source,
            })
    }

    /// Read the checkpoint; a corrupt or unreadable file counts as absent
    pub fn load(&self) -> Option<SessionState> {
        match self.try_load() {
            Ok(state) => state,
            Err(e) => {
                warn!("ignoring checkpoint: {e}");
                None
            }
        }
    }

    /// Remove the checkpoint. Missing file is fine.
    pub fn delete(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "checkpoint deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}
