//! Model types
//!
//! Defines catalog metadata for downloadable model artifacts.

use serde::{Deserialize, Serialize};

/// Description of one downloadable model artifact
///
/// Created by manifest parsing, read by the download coordinator and the
/// model store, never mutated after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Stable identifier, e.g. "llama-3.2-1b"
    pub id: String,
    /// Display name of the model
    pub display_name: String,
    /// File name under the local models directory
    pub file_name: String,
    /// Download URL for the artifact
    pub source_url: String,
    /// Artifact size in bytes as declared by the manifest
    pub size_bytes: u64,
    /// Quantization tag, e.g. "Q4_K_M"
    pub quantization: String,
    /// Maximum context window the model supports
    pub context_length: u32,
    /// Whether the manifest flags this entry as recommended
    pub recommended: bool,
    /// Capability tags, e.g. "chat", "tools"
    pub tags: Vec<String>,
    /// Optional SHA-256 of the artifact, hex encoded
    pub sha256: Option<String>,
}

/// A versioned snapshot of the remote model catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Catalog schema version
    pub version: u32,
    /// Last update timestamp as reported by the manifest
    pub last_updated: String,
    /// Available models
    pub models: Vec<ModelDescriptor>,
    /// Explicitly recommended model id, if any
    pub recommended_id: Option<String>,
}

impl ModelCatalog {
    /// Resolve the recommended model.
    ///
    /// Resolution order: explicit `recommended_id` lookup, else the first
    /// entry flagged `recommended`, else the first entry. Returns `None`
    /// only when the catalog is empty.
    pub fn recommended(&self) -> Option<&ModelDescriptor> {
        if let Some(id) = &self.recommended_id {
            if let Some(m) = self.models.iter().find(|m| &m.id == id) {
                return Some(m);
            }
        }
        self.models
            .iter()
            .find(|m| m.recommended)
            .or_else(|| self.models.first())
    }

    /// Look up a model by id
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }
}
