//! # Storage Module
//!
//! Non-volatile storage volume and the durable queue of unsent readings.
//!
//! This module handles:
//! - Verifying the storage medium is present and writable at startup
//! - Locating the config file and queue file on the volume
//! - Append-only persistence of payloads and ordered drain-and-clear

pub mod queue;

pub use queue::{DrainReport, DurableQueue, PayloadSink, MAX_LINE_BYTES};

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::CONFIG_FILE_NAME;
use crate::error::{LoggerError, Result};

/// Name of the queue file on the volume
pub const DATA_FILE_NAME: &str = "data.txt";

/// Scratch file used to prove the volume accepts writes
const WRITE_PROBE_FILE_NAME: &str = ".field-logger-probe";

/// Mounted storage medium (SD card or equivalent)
#[derive(Debug, Clone)]
pub struct StorageVolume {
    root: PathBuf,
}

impl StorageVolume {
    /// Open the storage volume rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::StorageUnavailable`] if the directory is missing,
    /// is not a directory, or rejects writes. Without a persistence medium
    /// the device cannot buffer readings, so callers treat this as fatal.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use field_logger::storage::StorageVolume;
    ///
    /// let volume = StorageVolume::open("/media/sd")?;
    /// let queue = volume.queue();
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();

        let metadata = fs::metadata(root).map_err(|e| {
            LoggerError::StorageUnavailable(format!("{}: {}", root.display(), e))
        })?;

        if !metadata.is_dir() {
            return Err(LoggerError::StorageUnavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let probe = root.join(WRITE_PROBE_FILE_NAME);
        fs::write(&probe, b"ok")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| {
                LoggerError::StorageUnavailable(format!("{} is not writable: {}", root.display(), e))
            })?;

        debug!("Storage write probe passed at {}", root.display());
        info!("Storage volume ready at {}", root.display());

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the JSON config file on this volume
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Durable queue backed by this volume
    pub fn queue(&self) -> DurableQueue {
        DurableQueue::new(self.root.join(DATA_FILE_NAME))
    }
}
