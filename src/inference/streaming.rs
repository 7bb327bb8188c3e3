//! Token streaming
//!
//! Pull-based, cancellable token stream bridging the blocking decode loop to
//! async consumers. Fragments arrive in strict generation order.

use crate::inference::engine::EngineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One generated token fragment
#[derive(Debug, Clone)]
pub struct StreamToken {
    /// Decoded text of this token
    pub text: String,
    /// Zero-based position in the generated sequence
    pub index: usize,
}

/// A finite, lazily produced sequence of token fragments.
///
/// Dropping the stream cancels the generation; the decode loop observes the
/// flag within one token step and returns the engine to `Ready`.
pub struct TokenStream {
    rx: mpsc::Receiver<Result<StreamToken, EngineError>>,
    cancel: Arc<AtomicBool>,
}

impl TokenStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<StreamToken, EngineError>>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self { rx, cancel }
    }

    /// Next fragment, in generation order. `None` once the stream ends.
    pub async fn next(&mut self) -> Option<Result<StreamToken, EngineError>> {
        self.rx.recv().await
    }

    /// Request cooperative cancellation.
    ///
    /// Decoding stops within one token step; fragments already produced stay
    /// deliverable.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}
