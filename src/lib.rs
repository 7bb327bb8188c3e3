//! Pocketlm Library
//!
//! Core library for running a local conversational assistant: prompt
//! framing, model catalog resolution, model download and storage, and
//! llama.cpp inference.

pub mod download;
pub mod inference;
pub mod manifest;
pub mod prompt;
pub mod session;
pub mod storage;
pub mod types;
