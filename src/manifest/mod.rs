//! Manifest resolver
//!
//! Fetches and parses the remote model catalog, falling back to an embedded
//! default entry on any failure so the system stays operable offline and on
//! first run.

use crate::types::{ModelCatalog, ModelDescriptor};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default request timeout for manifest fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Manifest resolution errors
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest request failed: {0}")]
    Network(String),

    #[error("manifest payload is invalid: {0}")]
    Validation(String),

    #[error("catalog contains no models")]
    EmptyCatalog,
}

/// Wire format of the remote manifest (camelCase JSON over HTTPS)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    version: u32,
    last_updated: String,
    models: Vec<RawModel>,
    recommended_model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModel {
    id: String,
    name: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
    file_name: String,
    download_url: String,
    size_bytes: u64,
    quantization: String,
    context_length: u32,
    #[serde(default)]
    recommended: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    sha256: Option<String>,
}

impl From<RawModel> for ModelDescriptor {
    fn from(raw: RawModel) -> Self {
        ModelDescriptor {
            id: raw.id,
            display_name: raw.name,
            file_name: raw.file_name,
            source_url: raw.download_url,
            size_bytes: raw.size_bytes,
            quantization: raw.quantization,
            context_length: raw.context_length,
            recommended: raw.recommended,
            tags: raw.tags,
            sha256: raw.sha256,
        }
    }
}

/// Parse and validate a manifest payload
pub fn parse_manifest(json: &str) -> Result<ModelCatalog, ManifestError> {
    let raw: RawManifest =
        serde_json::from_str(json).map_err(|e| ManifestError::Validation(e.to_string()))?;

    if raw.models.is_empty() {
        return Err(ManifestError::Validation(
            "manifest lists no models".to_string(),
        ));
    }
    for m in &raw.models {
        if m.id.is_empty() || m.file_name.is_empty() || m.download_url.is_empty() {
            return Err(ManifestError::Validation(format!(
                "model entry {:?} is missing required fields",
                m.id
            )));
        }
        if m.size_bytes == 0 {
            return Err(ManifestError::Validation(format!(
                "model {} declares a zero size",
                m.id
            )));
        }
    }

    Ok(ModelCatalog {
        version: raw.version,
        last_updated: raw.last_updated,
        models: raw.models.into_iter().map(Into::into).collect(),
        recommended_id: raw.recommended_model_id,
    })
}

/// The embedded catalog used whenever the remote manifest is unreachable
/// or malformed. Exactly one model, flagged recommended.
pub fn default_catalog() -> ModelCatalog {
    ModelCatalog {
        version: 1,
        last_updated: "builtin".to_string(),
        models: vec![ModelDescriptor {
            id: "llama-3.2-1b-instruct".to_string(),
            display_name: "Llama 3.2 1B Instruct".to_string(),
            file_name: "Llama-3.2-1B-Instruct-Q4_K_M.gguf".to_string(),
            source_url: "https://huggingface.co/bartowski/Llama-3.2-1B-Instruct-GGUF/resolve/main/Llama-3.2-1B-Instruct-Q4_K_M.gguf".to_string(),
            size_bytes: 807_693_984,
            quantization: "Q4_K_M".to_string(),
            context_length: 4096,
            recommended: true,
            tags: vec!["chat".to_string()],
            sha256: None,
        }],
        recommended_id: Some("llama-3.2-1b-instruct".to_string()),
    }
}

/// Fetches and resolves the remote model catalog
pub struct ManifestResolver {
    client: reqwest::Client,
    url: String,
}

impl ManifestResolver {
    /// Create a resolver for the given manifest URL
    pub fn new(url: impl Into<String>) -> Result<Self, ManifestError> {
        Self::with_timeout(url, FETCH_TIMEOUT)
    }

    /// Create a resolver with an explicit request timeout
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, ManifestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ManifestError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Fetch and parse the remote catalog.
    ///
    /// One bounded-timeout request; transport and parse errors are returned,
    /// never raised past this boundary.
    pub async fn fetch(&self) -> Result<ModelCatalog, ManifestError> {
        tracing::debug!("Fetching manifest from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .header("User-Agent", "pocketlm/0.2.0")
            .send()
            .await
            .map_err(|e| ManifestError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ManifestError::Network(format!(
                "manifest fetch returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ManifestError::Network(e.to_string()))?;

        parse_manifest(&body)
    }

    /// Resolve a usable catalog, falling back to the embedded default on any
    /// fetch or validation failure. Never fails.
    pub async fn resolve(&self) -> ModelCatalog {
        match self.fetch().await {
            Ok(catalog) => {
                tracing::info!(
                    "Resolved remote catalog v{} with {} models",
                    catalog.version,
                    catalog.models.len()
                );
                catalog
            }
            Err(e) => {
                tracing::warn!("Manifest fetch failed ({}), using embedded catalog", e);
                default_catalog()
            }
        }
    }

    /// The recommended descriptor of a catalog.
    ///
    /// Fails only when the catalog is empty.
    pub fn recommended_of(catalog: &ModelCatalog) -> Result<&ModelDescriptor, ManifestError> {
        catalog.recommended().ok_or(ManifestError::EmptyCatalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 3,
        "lastUpdated": "2025-06-01T00:00:00Z",
        "recommendedModelId": "qwen2.5-1.5b",
        "models": [
            {
                "id": "qwen2.5-1.5b",
                "name": "Qwen 2.5 1.5B Instruct",
                "description": "Small general chat model",
                "fileName": "qwen2.5-1.5b-instruct-q4_k_m.gguf",
                "downloadUrl": "https://example.com/qwen.gguf",
                "sizeBytes": 1117320736,
                "quantization": "Q4_K_M",
                "contextLength": 32768,
                "recommended": true,
                "tags": ["chat", "tools"]
            },
            {
                "id": "llama-3.2-3b",
                "name": "Llama 3.2 3B Instruct",
                "fileName": "llama-3.2-3b-instruct-q4_k_m.gguf",
                "downloadUrl": "https://example.com/llama.gguf",
                "sizeBytes": 2019377440,
                "quantization": "Q4_K_M",
                "contextLength": 8192,
                "sha256": "0000000000000000000000000000000000000000000000000000000000000000"
            }
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let catalog = parse_manifest(SAMPLE).unwrap();
        assert_eq!(catalog.version, 3);
        assert_eq!(catalog.models.len(), 2);
        assert_eq!(catalog.recommended_id.as_deref(), Some("qwen2.5-1.5b"));

        let qwen = &catalog.models[0];
        assert_eq!(qwen.display_name, "Qwen 2.5 1.5B Instruct");
        assert_eq!(qwen.size_bytes, 1_117_320_736);
        assert!(qwen.recommended);
        assert!(catalog.models[1].sha256.is_some());
    }

    #[test]
    fn test_parse_manifest_rejects_missing_fields() {
        let missing_url = r#"{
            "version": 1,
            "lastUpdated": "now",
            "models": [{"id": "x", "name": "X", "fileName": "x.gguf",
                        "sizeBytes": 10, "quantization": "Q4", "contextLength": 2048}]
        }"#;
        assert!(matches!(
            parse_manifest(missing_url),
            Err(ManifestError::Validation(_))
        ));

        let empty = r#"{"version": 1, "lastUpdated": "now", "models": []}"#;
        assert!(matches!(
            parse_manifest(empty),
            Err(ManifestError::Validation(_))
        ));
    }

    #[test]
    fn test_default_catalog_has_one_recommended_model() {
        let catalog = default_catalog();
        assert_eq!(catalog.models.len(), 1);
        assert!(catalog.models[0].recommended);
        assert_eq!(
            ManifestResolver::recommended_of(&catalog).unwrap().id,
            catalog.models[0].id
        );
    }

    #[tokio::test]
    async fn test_fetch_surfaces_network_failure() {
        // Nothing listens on the discard port; connection is refused fast.
        let resolver = ManifestResolver::with_timeout(
            "http://127.0.0.1:9/models.json",
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(matches!(
            resolver.fetch().await,
            Err(ManifestError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_default_catalog() {
        let resolver = ManifestResolver::with_timeout(
            "http://127.0.0.1:9/models.json",
            Duration::from_millis(500),
        )
        .unwrap();
        let catalog = resolver.resolve().await;
        assert_eq!(catalog.models.len(), 1);
        assert!(catalog.models[0].recommended);
    }

    #[test]
    fn test_recommended_of_empty_catalog_fails() {
        let catalog = ModelCatalog {
            version: 1,
            last_updated: String::new(),
            models: vec![],
            recommended_id: None,
        };
        assert!(matches!(
            ManifestResolver::recommended_of(&catalog),
            Err(ManifestError::EmptyCatalog)
        ));
    }
}
