//! Chat session
//!
//! Orchestrates one conversation: frames the history through the prompt
//! codec, drives the engine, and scrubs protocol markers out of the streamed
//! reply before it reaches the caller. The session owns no model state of
//! its own; all lifecycle remains with the engine.

use crate::inference::{EngineError, GenerationParams, LlamaEngine, TokenStream};
use crate::prompt::{self, EncodeOptions};
use crate::types::Message;
use std::sync::Arc;

/// A conversation bound to an engine
pub struct ChatSession {
    engine: Arc<LlamaEngine>,
    options: EncodeOptions,
    params: GenerationParams,
}

impl ChatSession {
    /// Create a session with default framing and sampling
    pub fn new(engine: Arc<LlamaEngine>) -> Self {
        Self::with_options(engine, EncodeOptions::default(), GenerationParams::default())
    }

    /// Create a session with explicit framing and sampling settings
    pub fn with_options(
        engine: Arc<LlamaEngine>,
        options: EncodeOptions,
        params: GenerationParams,
    ) -> Self {
        Self {
            engine,
            options,
            params,
        }
    }

    /// Stream a scrubbed reply to the given history.
    ///
    /// The caller keeps ownership of the history; the session does not
    /// append to it. Cancelling or dropping the returned stream cancels the
    /// underlying generation.
    pub async fn respond(&self, history: &[Message]) -> Result<ReplyStream, EngineError> {
        let framed = prompt::encode(history, &self.options);
        tracing::debug!(
            "Responding to a history of {} messages ({} framed bytes)",
            history.len(),
            framed.len()
        );
        let tokens = self.engine.generate_stream(&framed, &self.params).await?;
        Ok(ReplyStream::new(tokens))
    }

    /// Convenience wrapper collecting the whole scrubbed reply
    pub async fn respond_complete(&self, history: &[Message]) -> Result<String, EngineError> {
        let mut stream = self.respond(history).await?;
        let mut out = String::new();
        while let Some(delta) = stream.next().await {
            out.push_str(&delta?);
        }
        Ok(out)
    }
}

/// Incremental marker scrubbing over an accumulating raw stream.
///
/// Keeps back the longest trailing substring that could still grow into a
/// protocol marker, so a marker split across fragment boundaries is never
/// half-emitted. What has been emitted is never retracted.
struct StreamScrubber {
    raw: String,
    emitted: usize,
}

impl StreamScrubber {
    fn new() -> Self {
        Self {
            raw: String::new(),
            emitted: 0,
        }
    }

    /// Absorb one raw fragment; returns newly safe clean text, if any
    fn push(&mut self, fragment: &str) -> Option<String> {
        self.raw.push_str(fragment);
        let decoded = prompt::decode(&self.raw);
        let safe = prompt::safe_stream_end(&decoded);
        if safe > self.emitted {
            let delta = decoded[self.emitted..safe].to_string();
            self.emitted = safe;
            Some(delta)
        } else {
            None
        }
    }

    /// Flush the held-back tail at end of stream.
    ///
    /// A marker truncated by the end of the stream is emitted as-is, per the
    /// codec's decode contract.
    fn finish(&mut self) -> Option<String> {
        let decoded = prompt::decode(&self.raw);
        if decoded.len() > self.emitted {
            let tail = decoded[self.emitted..].to_string();
            self.emitted = decoded.len();
            Some(tail)
        } else {
            None
        }
    }
}

/// A streamed, marker-free reply
pub struct ReplyStream {
    tokens: TokenStream,
    scrubber: StreamScrubber,
    done: bool,
}

impl ReplyStream {
    fn new(tokens: TokenStream) -> Self {
        Self {
            tokens,
            scrubber: StreamScrubber::new(),
            done: false,
        }
    }

    /// Next clean text delta. `None` once the reply is complete.
    ///
    /// Fragments that are entirely markers produce no delta; the loop keeps
    /// pulling until there is text to show or the stream ends.
    pub async fn next(&mut self) -> Option<Result<String, EngineError>> {
        if self.done {
            return None;
        }
        loop {
            match self.tokens.next().await {
                Some(Ok(token)) => {
                    if let Some(delta) = self.scrubber.push(&token.text) {
                        return Some(Ok(delta));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return self.scrubber.finish().map(Ok);
                }
            }
        }
    }

    /// Request cooperative cancellation of the underlying generation
    pub fn cancel(&self) {
        self.tokens.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fragments: &[&str]) -> Vec<String> {
        let mut scrubber = StreamScrubber::new();
        let mut out = Vec::new();
        for f in fragments {
            if let Some(delta) = scrubber.push(f) {
                out.push(delta);
            }
        }
        if let Some(tail) = scrubber.finish() {
            out.push(tail);
        }
        out
    }

    #[test]
    fn test_scrubber_passes_plain_text_through() {
        assert_eq!(run(&["Hello", ", ", "world"]), vec!["Hello", ", ", "world"]);
    }

    #[test]
    fn test_scrubber_strips_marker_split_across_fragments() {
        let deltas = run(&["Hel", "lo<|im_", "end|>"]);
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert_eq!(deltas.concat(), "Hello");
    }

    #[test]
    fn test_scrubber_strips_whole_marker_fragment() {
        let deltas = run(&["<|im_start|>assistant\n", "Sure."]);
        assert_eq!(deltas.concat(), "Sure.");
    }

    #[test]
    fn test_scrubber_never_emits_partial_marker_early() {
        let mut scrubber = StreamScrubber::new();
        assert_eq!(scrubber.push("answer<|im_").as_deref(), Some("answer"));
        // Held back until the marker resolves one way or the other
        assert_eq!(scrubber.push("end|>"), None);
        assert_eq!(scrubber.finish(), None);
    }

    #[test]
    fn test_scrubber_releases_false_marker_prefix() {
        // "<|x" can no longer grow into a marker once 'x' arrives
        let deltas = run(&["a<|", "x", "b"]);
        assert_eq!(deltas.concat(), "a<|xb");
    }

    #[test]
    fn test_scrubber_flushes_truncated_trailing_marker() {
        // Stream cut mid-marker: the tail is surfaced as-is at the end
        let deltas = run(&["Hi<|im_e"]);
        assert_eq!(deltas.concat(), "Hi<|im_e");
    }

    #[test]
    fn test_scrubber_preserves_tool_call_free_text() {
        let deltas = run(&[
            "Using a tool: ",
            "<|tool_call|>",
            r#"{"name":"ping"}"#,
            "<|/tool_call|>",
            " done",
        ]);
        assert_eq!(deltas.concat(), r#"Using a tool: {"name":"ping"} done"#);
    }
}
