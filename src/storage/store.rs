//! Model store
//!
//! Tracks which model files exist on local storage and exclusively owns the
//! models directory. The download coordinator writes only through this
//! module's path API, never directly.

use crate::storage::StorageError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Reduce an arbitrary manifest filename to a safe local filename.
///
/// Flattens path separators, strips query/fragment noise, and replaces
/// characters that are invalid on common filesystems.
pub fn sanitize_file_name(file_name: &str) -> Result<String, StorageError> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidFileName(file_name.to_string()));
    }

    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);
    let no_leading = no_fragment.trim_start_matches('/');

    let flattened = no_leading.replace('\\', "/").replace('/', "__");

    let mut sanitized = String::with_capacity(flattened.len());
    for ch in flattened.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
        if invalid || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err(StorageError::InvalidFileName(file_name.to_string()));
    }

    Ok(sanitized)
}

/// Exclusive owner of the local models directory
#[derive(Debug)]
pub struct ModelStore {
    models_dir: PathBuf,
    /// Filename currently loaded by the inference engine, if any.
    /// Deleting it is refused until the engine owner clears the mark.
    in_use: Mutex<Option<String>>,
}

impl ModelStore {
    /// Open a store over the given directory, creating it if necessary
    pub fn new(models_dir: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            in_use: Mutex::new(None),
        })
    }

    /// Open the default store under the application data directory
    pub fn open_default() -> Result<Self, StorageError> {
        Self::new(crate::storage::get_data_dir()?.join("models"))
    }

    /// The directory this store owns
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Final on-disk path for a model file
    pub fn path_for(&self, file_name: &str) -> Result<PathBuf, StorageError> {
        Ok(self.models_dir.join(sanitize_file_name(file_name)?))
    }

    /// Temporary path used while a download is in flight
    pub fn temp_path_for(&self, file_name: &str) -> Result<PathBuf, StorageError> {
        let safe = sanitize_file_name(file_name)?;
        Ok(self.models_dir.join(format!("{safe}.part")))
    }

    /// Whether a non-empty model file exists locally
    pub fn is_downloaded(&self, file_name: &str) -> bool {
        let Ok(path) = self.path_for(file_name) else {
            return false;
        };
        fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false)
    }

    /// List the model files present in the store
    ///
    /// In-flight `.part` files are excluded.
    pub fn list_downloaded(&self) -> Result<Vec<String>, StorageError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.models_dir)? {
            let entry = entry?;
            if !entry.metadata()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".part") {
                continue;
            }
            files.push(name);
        }
        files.sort();
        Ok(files)
    }

    /// Atomically move a finished download into its final place
    pub fn commit(&self, temp_path: &Path, file_name: &str) -> Result<PathBuf, StorageError> {
        let final_path = self.path_for(file_name)?;
        fs::rename(temp_path, &final_path)?;
        tracing::info!("Committed model file: {:?}", final_path);
        Ok(final_path)
    }

    /// Delete a model file
    ///
    /// Returns `Ok(false)` if the file does not exist. Fails with
    /// `FileInUse` while the file is loaded by the inference engine;
    /// callers must unload first.
    pub fn delete(&self, file_name: &str) -> Result<bool, StorageError> {
        let safe = sanitize_file_name(file_name)?;
        {
            let in_use = self.in_use.lock().expect("in-use lock poisoned");
            if in_use.as_deref() == Some(safe.as_str()) {
                return Err(StorageError::FileInUse(safe));
            }
        }
        let path = self.models_dir.join(&safe);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        tracing::info!("Deleted model file: {:?}", path);
        Ok(true)
    }

    /// Mark a file as loaded by the inference engine
    pub fn mark_in_use(&self, file_name: &str) {
        let mut in_use = self.in_use.lock().expect("in-use lock poisoned");
        *in_use = sanitize_file_name(file_name).ok();
    }

    /// Clear the in-use mark after the engine unloads
    pub fn clear_in_use(&self) {
        let mut in_use = self.in_use.lock().expect("in-use lock poisoned");
        *in_use = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ModelStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("models")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_sanitize_flattens_paths() {
        assert_eq!(
            sanitize_file_name("sub/dir/model.gguf").unwrap(),
            "sub__dir__model.gguf"
        );
        assert_eq!(
            sanitize_file_name("model.gguf?download=true").unwrap(),
            "model.gguf"
        );
        assert!(sanitize_file_name("   ").is_err());
    }

    #[test]
    fn test_is_downloaded_requires_nonempty_file() {
        let (_dir, store) = store();
        assert!(!store.is_downloaded("m.gguf"));

        fs::write(store.path_for("m.gguf").unwrap(), b"").unwrap();
        assert!(!store.is_downloaded("m.gguf"));

        fs::write(store.path_for("m.gguf").unwrap(), b"GGUF").unwrap();
        assert!(store.is_downloaded("m.gguf"));
    }

    #[test]
    fn test_list_excludes_partial_downloads() {
        let (_dir, store) = store();
        fs::write(store.path_for("a.gguf").unwrap(), b"x").unwrap();
        fs::write(store.temp_path_for("b.gguf").unwrap(), b"x").unwrap();

        assert_eq!(store.list_downloaded().unwrap(), vec!["a.gguf"]);
    }

    #[test]
    fn test_commit_renames_temp_into_place() {
        let (_dir, store) = store();
        let temp = store.temp_path_for("m.gguf").unwrap();
        fs::write(&temp, b"bytes").unwrap();

        let final_path = store.commit(&temp, "m.gguf").unwrap();
        assert!(final_path.exists());
        assert!(!temp.exists());
        assert!(store.is_downloaded("m.gguf"));
    }

    #[test]
    fn test_delete_refuses_file_in_use() {
        let (_dir, store) = store();
        fs::write(store.path_for("m.gguf").unwrap(), b"x").unwrap();

        store.mark_in_use("m.gguf");
        assert!(matches!(
            store.delete("m.gguf"),
            Err(StorageError::FileInUse(_))
        ));

        store.clear_in_use();
        assert!(store.delete("m.gguf").unwrap());
        assert!(!store.delete("m.gguf").unwrap());
    }
}
