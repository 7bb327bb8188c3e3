//! GGUF model file validation
//!
//! Cheap header checks performed before a file is handed to llama.cpp, so
//! an obviously corrupt or mislabeled download is rejected with a precise
//! error instead of a native loader failure.

use std::fs;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// GGUF magic bytes "GGUF", little-endian
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Model file validation errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    NotFound(String),

    #[error("IO error reading model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a GGUF file (bad magic 0x{0:08x})")]
    BadMagic(u32),

    #[error("model file too small to contain a GGUF header")]
    Truncated,
}

/// Header metadata extracted during validation
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    /// GGUF format version
    pub version: u32,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Validate that the file at `path` carries a GGUF header.
///
/// Reads only the first eight bytes (magic + version).
pub fn validate_gguf(path: &Path) -> Result<GgufMetadata, ModelError> {
    if !path.exists() {
        return Err(ModelError::NotFound(path.display().to_string()));
    }
    let size_bytes = fs::metadata(path)?.len();

    let mut header = [0u8; 8];
    let mut file = fs::File::open(path)?;
    file.read_exact(&mut header)
        .map_err(|_| ModelError::Truncated)?;

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != GGUF_MAGIC {
        return Err(ModelError::BadMagic(magic));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    Ok(GgufMetadata {
        version,
        size_bytes,
    })
}
