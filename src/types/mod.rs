//! Shared type definitions
//!
//! This module contains the data types shared across the crate.

pub mod message;
pub mod model;

pub use message::{Message, Role};
pub use model::{ModelCatalog, ModelDescriptor};
