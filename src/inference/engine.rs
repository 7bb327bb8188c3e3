//! Inference engine
//!
//! Owns the loaded llama.cpp model handle behind an explicit state machine:
//! `Unloaded → Loading → {Ready | Error}`, `Ready ⇄ Generating`. At most one
//! generation is in flight per engine; a second call fails fast instead of
//! queueing. All llama.cpp work runs on blocking threads; tokens cross back
//! over an async channel.

use crate::inference::model::{validate_gguf, ModelError};
use crate::inference::streaming::{StreamToken, TokenStream};
use crate::storage::{ModelStore, StorageError};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use once_cell::sync::OnceCell;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),

    #[error(transparent)]
    InvalidModel(#[from] ModelError),

    #[error("failed to load model: {0}")]
    LoadFailed(String),

    #[error("a generation is already in flight")]
    Busy,

    #[error("{operation} is not valid while the engine is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: &'static str,
    },

    #[error("generation failed: {0}")]
    Inference(String),

    #[error("invalid generation parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Engine lifecycle phase
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePhase {
    /// No native handle is held
    Unloaded,
    /// A model is being mapped and initialized
    Loading { progress: f32 },
    /// A model is loaded and idle
    Ready,
    /// A generation is in flight
    Generating,
    /// The last load failed; recoverable via a fresh `load`
    Error { reason: String },
}

impl EnginePhase {
    fn name(&self) -> &'static str {
        match self {
            EnginePhase::Unloaded => "unloaded",
            EnginePhase::Loading { .. } => "loading",
            EnginePhase::Ready => "ready",
            EnginePhase::Generating => "generating",
            EnginePhase::Error { .. } => "in an error state",
        }
    }
}

/// Sampling parameters for one generation.
///
/// `temperature == 0` or `top_k == 0` selects greedy decoding: the
/// highest-probability token wins, with llama.cpp's first-index tie-break,
/// stable for a fixed seed. All other values pass through to the sampler
/// unmodified.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate (> 0)
    pub max_tokens: u32,
    /// Sampling temperature (>= 0; 0 = greedy)
    pub temperature: f32,
    /// Top-k cutoff (>= 0; 0 = greedy)
    pub top_k: u32,
    /// Nucleus sampling mass, in (0, 1]
    pub top_p: f32,
    /// Repetition penalty (>= 1; 1 = disabled)
    pub repetition_penalty: f32,
    /// Sampler seed
    pub seed: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            repetition_penalty: 1.1,
            seed: 42,
        }
    }
}

impl GenerationParams {
    /// Check parameter ranges
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_tokens == 0 {
            return Err(EngineError::InvalidParams(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if self.temperature < 0.0 {
            return Err(EngineError::InvalidParams(
                "temperature must not be negative".to_string(),
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(EngineError::InvalidParams(
                "top_p must be in (0, 1]".to_string(),
            ));
        }
        if self.repetition_penalty < 1.0 {
            return Err(EngineError::InvalidParams(
                "repetition_penalty must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Model load configuration, fixed for the lifetime of the load
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Context window size (> 0)
    pub context_length: u32,
    /// Inference threads (0 = llama.cpp default)
    pub num_threads: u32,
    /// GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            context_length: 4096,
            num_threads: 0,
            gpu_layers: 0,
        }
    }
}

/// Information about the currently loaded model
#[derive(Debug, Clone)]
pub struct LoadedModelInfo {
    /// Path the model was loaded from
    pub path: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// GGUF format version
    pub gguf_version: u32,
    /// Context window the model was loaded with
    pub context_length: u32,
}

/// Process-wide llama backend. The C library allows exactly one backend
/// per process; everything else about the engine is instance-owned.
static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend() -> Result<&'static LlamaBackend, EngineError> {
    BACKEND.get_or_try_init(|| {
        LlamaBackend::init().map_err(|e| EngineError::LoadFailed(format!("backend init: {e}")))
    })
}

/// Engine phase holder with the legal transitions as methods
#[derive(Debug)]
struct StateCell(Mutex<EnginePhase>);

impl StateCell {
    fn new() -> Self {
        Self(Mutex::new(EnginePhase::Unloaded))
    }

    fn snapshot(&self) -> EnginePhase {
        self.0.lock().expect("engine state lock poisoned").clone()
    }

    fn set(&self, phase: EnginePhase) {
        *self.0.lock().expect("engine state lock poisoned") = phase;
    }

    /// `Unloaded | Error → Loading(0)`
    fn begin_load(&self) -> Result<(), EngineError> {
        let mut phase = self.0.lock().expect("engine state lock poisoned");
        match *phase {
            EnginePhase::Unloaded | EnginePhase::Error { .. } => {
                *phase = EnginePhase::Loading { progress: 0.0 };
                Ok(())
            }
            ref other => Err(EngineError::InvalidState {
                operation: "load",
                phase: other.name(),
            }),
        }
    }

    /// `Ready → Generating`; fails fast from anywhere else
    fn begin_generation(&self) -> Result<(), EngineError> {
        let mut phase = self.0.lock().expect("engine state lock poisoned");
        match *phase {
            EnginePhase::Ready => {
                *phase = EnginePhase::Generating;
                Ok(())
            }
            EnginePhase::Generating => Err(EngineError::Busy),
            ref other => Err(EngineError::InvalidState {
                operation: "generate",
                phase: other.name(),
            }),
        }
    }

    /// `Generating → Ready`; a dispose that already moved the engine to
    /// `Unloaded` is left alone
    fn finish_generation(&self) {
        let mut phase = self.0.lock().expect("engine state lock poisoned");
        if *phase == EnginePhase::Generating {
            *phase = EnginePhase::Ready;
        }
    }
}

struct LoadedModel {
    model: LlamaModel,
    context_length: u32,
    num_threads: u32,
}

/// The inference engine
///
/// An explicitly owned value: construct it once, pass it by reference or
/// behind an `Arc` into the orchestrator. State changes are observable via
/// [`phase`](LlamaEngine::phase) and the load progress callback.
pub struct LlamaEngine {
    state: Arc<StateCell>,
    loaded: Arc<Mutex<Option<Arc<LoadedModel>>>>,
    active_cancel: Mutex<Option<Arc<AtomicBool>>>,
    store: Option<Arc<ModelStore>>,
}

impl LlamaEngine {
    /// Create an engine with no store attachment
    pub fn new() -> Self {
        Self {
            state: Arc::new(StateCell::new()),
            loaded: Arc::new(Mutex::new(None)),
            active_cancel: Mutex::new(None),
            store: None,
        }
    }

    /// Create an engine that marks loaded files in the given store, so
    /// `ModelStore::delete` refuses files while they are loaded
    pub fn with_store(store: Arc<ModelStore>) -> Self {
        let mut engine = Self::new();
        engine.store = Some(store);
        engine
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> EnginePhase {
        self.state.snapshot()
    }

    /// Load a model file
    ///
    /// Valid only from `Unloaded` or `Error`. On failure the engine ends in
    /// `Error` with no native handle held.
    pub async fn load(
        &self,
        path: &Path,
        config: &LoadConfig,
    ) -> Result<LoadedModelInfo, EngineError> {
        self.load_with_progress(path, config, |_| {}).await
    }

    /// Load a model resolved through the attached store, marking it in use.
    ///
    /// The mark is set on the same store `dispose` clears, so the file stays
    /// undeletable exactly while it is loaded. Requires construction via
    /// [`with_store`](LlamaEngine::with_store).
    pub async fn load_from_store(
        &self,
        file_name: &str,
        config: &LoadConfig,
    ) -> Result<LoadedModelInfo, EngineError> {
        let store = self.store.as_ref().ok_or_else(|| {
            EngineError::LoadFailed("no model store attached to this engine".to_string())
        })?;
        let path = store.path_for(file_name)?;
        let info = self.load(&path, config).await?;
        store.mark_in_use(file_name);
        Ok(info)
    }

    /// Load a model file, reporting coarse monotonic progress.
    ///
    /// Progress is two-phase: file validation/mapping, then runtime
    /// initialization.
    pub async fn load_with_progress(
        &self,
        path: &Path,
        config: &LoadConfig,
        on_progress: impl Fn(f32),
    ) -> Result<LoadedModelInfo, EngineError> {
        if config.context_length == 0 {
            return Err(EngineError::InvalidParams(
                "context_length must be greater than zero".to_string(),
            ));
        }
        self.state.begin_load()?;

        match self.load_inner(path, config, &on_progress).await {
            Ok(info) => {
                tracing::info!("Model loaded: {}", info.path);
                self.state.set(EnginePhase::Ready);
                on_progress(1.0);
                Ok(info)
            }
            Err(e) => {
                // Partial allocations are released before the transition
                *self.loaded.lock().expect("model slot lock poisoned") = None;
                tracing::warn!("Model load failed: {}", e);
                self.state.set(EnginePhase::Error {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn load_inner(
        &self,
        path: &Path,
        config: &LoadConfig,
        on_progress: &impl Fn(f32),
    ) -> Result<LoadedModelInfo, EngineError> {
        on_progress(0.0);

        let meta = validate_gguf(path).map_err(|e| match e {
            ModelError::NotFound(p) => EngineError::ModelNotFound(p),
            other => EngineError::InvalidModel(other),
        })?;
        self.state.set(EnginePhase::Loading { progress: 0.5 });
        on_progress(0.5);

        let backend = backend()?;
        let path_buf = path.to_path_buf();
        let gpu_layers = config.gpu_layers;
        let model = tokio::task::spawn_blocking(move || {
            let params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
            LlamaModel::load_from_file(backend, &path_buf, &params)
        })
        .await
        .map_err(|e| EngineError::LoadFailed(format!("load task failed: {e}")))?
        .map_err(|e| EngineError::LoadFailed(e.to_string()))?;

        let loaded = Arc::new(LoadedModel {
            model,
            context_length: config.context_length,
            num_threads: config.num_threads,
        });
        *self.loaded.lock().expect("model slot lock poisoned") = Some(loaded);

        Ok(LoadedModelInfo {
            path: path.display().to_string(),
            size_bytes: meta.size_bytes,
            gguf_version: meta.version,
            context_length: config.context_length,
        })
    }

    /// Generate a complete reply for the given framed prompt.
    ///
    /// Valid only from `Ready`; the engine is `Generating` for the duration.
    pub async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, EngineError> {
        let mut stream = self.generate_stream(prompt, params).await?;
        let mut out = String::new();
        while let Some(item) = stream.next().await {
            out.push_str(&item?.text);
        }
        Ok(out)
    }

    /// Stream token fragments for the given framed prompt.
    ///
    /// Fragments arrive in strict generation order; the stream ends on the
    /// model's end-of-turn token, on `max_tokens`, or on cancellation
    /// (observed within one decode step). The engine returns to `Ready` when
    /// the stream finishes for any reason.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, EngineError> {
        params.validate()?;
        self.state.begin_generation()?;

        let loaded = {
            let slot = self.loaded.lock().expect("model slot lock poisoned");
            match slot.as_ref() {
                Some(l) => Arc::clone(l),
                None => {
                    self.state.finish_generation();
                    return Err(EngineError::InvalidState {
                        operation: "generate",
                        phase: "unloaded",
                    });
                }
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        *self
            .active_cancel
            .lock()
            .expect("cancel slot lock poisoned") = Some(Arc::clone(&cancel));

        let (tx, rx) = mpsc::channel::<Result<StreamToken, EngineError>>(32);
        let state = Arc::clone(&self.state);
        let prompt = prompt.to_string();
        let params = params.clone();
        let worker_cancel = Arc::clone(&cancel);

        tokio::task::spawn_blocking(move || {
            if let Err(e) = run_generation(&loaded, &prompt, &params, &worker_cancel, &tx) {
                tracing::warn!("Generation failed: {}", e);
                let _ = tx.blocking_send(Err(e));
            }
            state.finish_generation();
        });

        Ok(TokenStream::new(rx, cancel))
    }

    /// Release the native handle and return to `Unloaded`.
    ///
    /// Valid from any state; an active generation is cancelled first and its
    /// worker observes the flag within one decode step. Idempotent.
    pub fn dispose(&self) {
        if let Some(cancel) = self
            .active_cancel
            .lock()
            .expect("cancel slot lock poisoned")
            .take()
        {
            cancel.store(true, Ordering::SeqCst);
        }
        *self.loaded.lock().expect("model slot lock poisoned") = None;
        if let Some(store) = &self.store {
            store.clear_in_use();
        }
        self.state.set(EnginePhase::Unloaded);
        tracing::debug!("Engine disposed");
    }
}

impl Default for LlamaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LlamaEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn build_sampler(params: &GenerationParams) -> LlamaSampler {
    let mut chain: Vec<LlamaSampler> = Vec::new();

    if params.repetition_penalty > 1.0 {
        chain.push(LlamaSampler::penalties(
            64,
            params.repetition_penalty,
            0.0,
            0.0,
        ));
    }

    if params.temperature == 0.0 || params.top_k == 0 {
        chain.push(LlamaSampler::greedy());
    } else {
        chain.push(LlamaSampler::top_k(params.top_k as i32));
        chain.push(LlamaSampler::top_p(params.top_p, 1));
        chain.push(LlamaSampler::temp(params.temperature));
        chain.push(LlamaSampler::dist(params.seed));
    }

    if chain.len() == 1 {
        chain.pop().unwrap()
    } else {
        LlamaSampler::chain_simple(chain)
    }
}

/// The blocking decode loop. Checks the cancellation flag once per token
/// step; the prompt carries its own begin-of-text marker, so no BOS is
/// added here.
fn run_generation(
    loaded: &LoadedModel,
    prompt: &str,
    params: &GenerationParams,
    cancel: &AtomicBool,
    tx: &mpsc::Sender<Result<StreamToken, EngineError>>,
) -> Result<(), EngineError> {
    let backend = backend()?;

    let tokens = loaded
        .model
        .str_to_token(prompt, AddBos::Never)
        .map_err(|e| EngineError::Inference(format!("tokenization failed: {e}")))?;

    if tokens.len() + 1 > loaded.context_length as usize {
        return Err(EngineError::Inference(format!(
            "prompt ({} tokens) does not fit the context window ({})",
            tokens.len(),
            loaded.context_length
        )));
    }

    let mut ctx_params =
        LlamaContextParams::default().with_n_ctx(NonZeroU32::new(loaded.context_length));
    if loaded.num_threads > 0 {
        ctx_params = ctx_params
            .with_n_threads(loaded.num_threads as i32)
            .with_n_threads_batch(loaded.num_threads as i32);
    }
    let mut ctx = loaded
        .model
        .new_context(backend, ctx_params)
        .map_err(|e| EngineError::Inference(format!("failed to create context: {e}")))?;

    // Prefill the prompt in batch-sized chunks
    let n_batch = ctx.n_batch() as usize;
    for chunk in tokens.chunks(n_batch.max(1)) {
        if cancel.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut batch = LlamaBatch::get_one(chunk)
            .map_err(|e| EngineError::Inference(format!("failed to create batch: {e}")))?;
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Inference(format!("prefill decode failed: {e}")))?;
    }

    let mut sampler = build_sampler(params);
    // Byte-fallback tokenizers split multibyte characters across tokens; the
    // rolling decoder holds incomplete sequences until the next piece.
    let mut decoder = encoding_rs::UTF_8.new_decoder();
    let budget = (loaded.context_length as usize)
        .saturating_sub(tokens.len())
        .min(params.max_tokens as usize);

    for index in 0..budget {
        if cancel.load(Ordering::SeqCst) {
            tracing::debug!("Generation cancelled after {} tokens", index);
            break;
        }

        let token = sampler.sample(&ctx, -1);
        sampler.accept(token);

        if loaded.model.is_eog_token(token) {
            break;
        }

        let text = loaded
            .model
            .token_to_piece(token, &mut decoder, true, None)
            .map_err(|e| EngineError::Inference(format!("failed to decode token: {e}")))?;
        if !text.is_empty() && tx.blocking_send(Ok(StreamToken { text, index })).is_err() {
            // Receiver dropped; stop decoding
            break;
        }

        let next = [token];
        let mut batch = LlamaBatch::get_one(&next)
            .map_err(|e| EngineError::Inference(format!("failed to create batch: {e}")))?;
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Inference(format!("decode failed: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validation() {
        assert!(GenerationParams::default().validate().is_ok());

        let mut p = GenerationParams::default();
        p.max_tokens = 0;
        assert!(matches!(p.validate(), Err(EngineError::InvalidParams(_))));

        let mut p = GenerationParams::default();
        p.temperature = -0.1;
        assert!(matches!(p.validate(), Err(EngineError::InvalidParams(_))));

        let mut p = GenerationParams::default();
        p.top_p = 0.0;
        assert!(matches!(p.validate(), Err(EngineError::InvalidParams(_))));

        let mut p = GenerationParams::default();
        p.top_p = 1.0;
        assert!(p.validate().is_ok());

        let mut p = GenerationParams::default();
        p.repetition_penalty = 0.5;
        assert!(matches!(p.validate(), Err(EngineError::InvalidParams(_))));
    }

    #[test]
    fn test_state_cell_generation_mutual_exclusion() {
        let cell = StateCell::new();
        cell.set(EnginePhase::Ready);

        assert!(cell.begin_generation().is_ok());
        assert_eq!(cell.snapshot(), EnginePhase::Generating);

        // Second generation while one is active fails fast
        assert!(matches!(cell.begin_generation(), Err(EngineError::Busy)));
        assert_eq!(cell.snapshot(), EnginePhase::Generating);

        cell.finish_generation();
        assert_eq!(cell.snapshot(), EnginePhase::Ready);
        assert!(cell.begin_generation().is_ok());
    }

    #[test]
    fn test_state_cell_load_transitions() {
        let cell = StateCell::new();
        assert!(cell.begin_load().is_ok());

        // Loading and Ready reject a new load
        assert!(cell.begin_load().is_err());
        cell.set(EnginePhase::Ready);
        assert!(cell.begin_load().is_err());

        // Error is recoverable
        cell.set(EnginePhase::Error {
            reason: "boom".to_string(),
        });
        assert!(cell.begin_load().is_ok());
    }

    #[test]
    fn test_finish_generation_preserves_dispose() {
        let cell = StateCell::new();
        cell.set(EnginePhase::Generating);
        // dispose() moved the engine to Unloaded while the worker was running
        cell.set(EnginePhase::Unloaded);
        cell.finish_generation();
        assert_eq!(cell.snapshot(), EnginePhase::Unloaded);
    }

    #[tokio::test]
    async fn test_load_missing_file_enters_error_state() {
        let engine = LlamaEngine::new();
        let result = engine
            .load(Path::new("/nonexistent/model.gguf"), &LoadConfig::default())
            .await;
        assert!(matches!(result, Err(EngineError::ModelNotFound(_))));
        assert!(matches!(engine.phase(), EnginePhase::Error { .. }));

        // Error is recoverable via a fresh load attempt
        let result = engine
            .load(Path::new("/still/nonexistent.gguf"), &LoadConfig::default())
            .await;
        assert!(matches!(result, Err(EngineError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_non_gguf_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.gguf");
        std::fs::write(&path, b"definitely not a model").unwrap();

        let engine = LlamaEngine::new();
        let result = engine.load(&path, &LoadConfig::default()).await;
        assert!(matches!(result, Err(EngineError::InvalidModel(_))));
        assert!(matches!(engine.phase(), EnginePhase::Error { .. }));
    }

    #[tokio::test]
    async fn test_generate_requires_ready_engine() {
        let engine = LlamaEngine::new();
        let result = engine
            .generate_stream("<|begin_of_text|>", &GenerationParams::default())
            .await;
        assert!(matches!(result, Err(EngineError::InvalidState { .. })));
        assert_eq!(engine.phase(), EnginePhase::Unloaded);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let engine = LlamaEngine::new();
        engine.dispose();
        assert_eq!(engine.phase(), EnginePhase::Unloaded);
        engine.dispose();
        assert_eq!(engine.phase(), EnginePhase::Unloaded);
    }

    #[test]
    fn test_rolling_decoder_reassembles_split_multibyte_piece() {
        // "🌍" arrives as two byte-fallback pieces; neither is valid UTF-8
        // on its own, and no byte may be dropped across the boundary.
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut out = String::with_capacity(16);

        let _ = decoder.decode_to_string(b"\xf0\x9f", &mut out, false);
        assert_eq!(out, "");
        let _ = decoder.decode_to_string(b"\x8c\x8d", &mut out, false);
        assert_eq!(out, "🌍");
    }

    #[tokio::test]
    async fn test_load_from_store_requires_attached_store() {
        let engine = LlamaEngine::new();
        let result = engine
            .load_from_store("m.gguf", &LoadConfig::default())
            .await;
        assert!(matches!(result, Err(EngineError::LoadFailed(_))));
        assert_eq!(engine.phase(), EnginePhase::Unloaded);
    }

    #[tokio::test]
    async fn test_failed_store_load_leaves_no_in_use_mark() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ModelStore::new(dir.path().join("models")).unwrap());
        let engine = LlamaEngine::with_store(Arc::clone(&store));

        let result = engine
            .load_from_store("missing.gguf", &LoadConfig::default())
            .await;
        assert!(matches!(result, Err(EngineError::ModelNotFound(_))));

        // Nothing was marked; the store still deletes freely
        std::fs::write(store.path_for("other.gguf").unwrap(), b"GGUF").unwrap();
        assert!(store.delete("other.gguf").unwrap());
    }

    #[tokio::test]
    async fn test_dispose_clears_store_mark() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ModelStore::new(dir.path().join("models")).unwrap());
        std::fs::write(store.path_for("m.gguf").unwrap(), b"GGUF").unwrap();

        let engine = LlamaEngine::with_store(Arc::clone(&store));
        store.mark_in_use("m.gguf");
        assert!(store.delete("m.gguf").is_err());

        engine.dispose();
        assert!(store.delete("m.gguf").unwrap());
    }

    #[tokio::test]
    async fn test_load_rejects_zero_context() {
        let engine = LlamaEngine::new();
        let config = LoadConfig {
            context_length: 0,
            ..LoadConfig::default()
        };
        let result = engine.load(Path::new("/x.gguf"), &config).await;
        assert!(matches!(result, Err(EngineError::InvalidParams(_))));
        // Parameter rejection happens before any transition
        assert_eq!(engine.phase(), EnginePhase::Unloaded);
    }
}
