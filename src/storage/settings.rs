//! Settings storage
//!
//! Manages persistence of sampling defaults, the selected model, and the
//! models directory location.

use crate::storage::{get_data_dir, StorageError};
use crate::types::{ModelCatalog, ModelDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Default manifest URL for the remote model catalog
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/pocketlm/catalog/main/models.json";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter (0 = greedy)
    pub top_k: u32,
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Context window size
    pub context_size: u32,
    /// Number of threads for inference (0 = auto)
    #[serde(default)]
    pub num_threads: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// Directory where model files (.gguf) are stored
    pub models_directory: PathBuf,
    /// URL of the remote model manifest
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,
    /// Selected model id; `None` means "use the catalog recommendation"
    #[serde(default)]
    pub selected_model_id: Option<String>,
}

fn default_manifest_url() -> String {
    DEFAULT_MANIFEST_URL.to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 1024,
            context_size: 4096,
            num_threads: 0,
            gpu_layers: 0,
            models_directory: get_data_dir()
                .ok()
                .map(|d| d.join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
            manifest_url: default_manifest_url(),
            selected_model_id: None,
        }
    }
}

impl AppSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(f32::MIN_POSITIVE, 1.0);
        self.max_tokens = self.max_tokens.clamp(1, 65536);

        let valid_context_sizes = [2048, 4096, 8192, 16384, 32768, 65536, 131072];
        if !valid_context_sizes.contains(&self.context_size) {
            self.context_size = *valid_context_sizes
                .iter()
                .min_by_key(|&&size| (size as i64 - self.context_size as i64).abs())
                .unwrap_or(&4096);
        }

        // Can't generate more than the context allows
        if self.max_tokens > self.context_size {
            self.max_tokens = self.context_size / 2;
        }

        if self.manifest_url.trim().is_empty() {
            self.manifest_url = default_manifest_url();
        }
    }

    /// Resolve the effective model for this configuration.
    ///
    /// The persisted selection wins when it resolves against the catalog;
    /// otherwise the catalog's recommendation applies.
    pub fn selected_or_recommended<'a>(
        &self,
        catalog: &'a ModelCatalog,
    ) -> Option<&'a ModelDescriptor> {
        if let Some(id) = &self.selected_model_id {
            if let Some(m) = catalog.get(id) {
                return Some(m);
            }
            tracing::warn!("Selected model {} not in catalog, using recommendation", id);
        }
        catalog.recommended()
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> AppSettings {
    match load_settings_internal() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    }
}

/// Internal settings loading with error propagation
fn load_settings_internal() -> Result<AppSettings, StorageError> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(AppSettings::default());
    }

    let json = fs::read_to_string(&path)?;
    let mut settings: AppSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from disk");
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<(), StorageError> {
    let path = get_settings_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to disk");
    Ok(())
}
