//! Local inference on llama.cpp
//!
//! GGUF validation, the engine state machine, and token streaming.

pub mod engine;
pub mod model;
pub mod streaming;

pub use engine::{
    EngineError, EnginePhase, GenerationParams, LlamaEngine, LoadConfig, LoadedModelInfo,
};
pub use model::{validate_gguf, GgufMetadata, ModelError, GGUF_MAGIC};
pub use streaming::{StreamToken, TokenStream};
