//! Local storage
//!
//! This module owns the on-disk layout: the per-user data directory, the
//! models directory, and persisted settings.

pub mod settings;
pub mod store;

pub use settings::{load_settings, save_settings, AppSettings};
pub use store::ModelStore;

use std::path::PathBuf;
use thiserror::Error;

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("could not determine a data directory for this platform")]
    NoDataDir,

    #[error("invalid model filename: {0}")]
    InvalidFileName(String),

    #[error("model file is in use by the inference engine: {0}")]
    FileInUse(String),
}

/// Get the application data directory, creating it if necessary
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    let dirs =
        directories::ProjectDirs::from("", "", "pocketlm").ok_or(StorageError::NoDataDir)?;
    let dir = dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
