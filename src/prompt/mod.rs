//! Prompt codec
//!
//! Pure, stateless framing between conversation history and the markup
//! protocol the model runtime consumes. `encode` produces the framed prompt
//! document, `decode` strips markers from raw model output. Neither touches
//! the network, the filesystem, or any mutable state.

use crate::types::{Message, Role};
use serde::Serialize;

/// Marker opening the prompt document
pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
/// Marker prefix opening a turn; followed by the role tag and a newline
pub const TURN_OPEN_PREFIX: &str = "<|im_start|>";
/// Marker closing a turn
pub const TURN_CLOSE: &str = "<|im_end|>";
/// Marker opening a serialized tool invocation
pub const TOOL_CALL_OPEN: &str = "<|tool_call|>";
/// Marker closing a serialized tool invocation
pub const TOOL_CALL_CLOSE: &str = "<|/tool_call|>";

/// Fixed assistant persona emitted as the system turn
pub const SYSTEM_PERSONA: &str = "You are a helpful assistant running locally \
on the user's device. Answer concisely and truthfully.";

/// Full marker spellings as emitted by `encode`, used for partial-marker
/// detection on truncated streams.
const MARKER_SPELLINGS: &[&str] = &[
    "<|begin_of_text|>",
    "<|im_start|>system\n",
    "<|im_start|>user\n",
    "<|im_start|>assistant\n",
    "<|im_end|>\n",
    "<|tool_call|>",
    "<|/tool_call|>",
];

/// A tool definition serialized into the system turn
///
/// Field order is the serialization order, so the framed output is stable
/// and parseable.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Tool name, emitted verbatim
    pub name: String,
    /// Tool description, emitted verbatim
    pub description: String,
    /// JSON schema of the tool parameters
    pub parameters: serde_json::Value,
}

/// Options controlling `encode`
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Emit a leading system turn with the fixed persona
    pub include_system_prompt: bool,
    /// Append a trailing open assistant turn for the model to complete
    pub add_generation_prompt: bool,
    /// Tool definitions serialized into the system turn
    pub tools: Vec<ToolSpec>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            include_system_prompt: true,
            add_generation_prompt: true,
            tools: Vec::new(),
        }
    }
}

fn push_turn(out: &mut String, role: Role, content: &str) {
    out.push_str(TURN_OPEN_PREFIX);
    out.push_str(role.as_tag());
    out.push('\n');
    out.push_str(content);
    out.push_str(TURN_CLOSE);
    out.push('\n');
}

/// Encode a conversation history into a framed prompt document.
///
/// The output always starts with the begin-of-text marker. Turns are framed
/// in input order; the function performs no reordering, deduplication, or
/// filtering. Same input, byte-identical output.
pub fn encode(history: &[Message], options: &EncodeOptions) -> String {
    let mut out = String::with_capacity(
        BEGIN_OF_TEXT.len() + history.iter().map(|m| m.content.len() + 32).sum::<usize>() + 256,
    );
    out.push_str(BEGIN_OF_TEXT);

    if options.include_system_prompt {
        let mut system = String::from(SYSTEM_PERSONA);
        if !options.tools.is_empty() {
            system.push_str("\n\nList of tools:\n");
            for tool in &options.tools {
                // ToolSpec field order keeps this stable and parseable
                match serde_json::to_string(tool) {
                    Ok(line) => {
                        system.push_str(&line);
                        system.push('\n');
                    }
                    Err(e) => {
                        tracing::warn!("Skipping unserializable tool {}: {}", tool.name, e);
                    }
                }
            }
        }
        push_turn(&mut out, Role::System, &system);
    }

    for msg in history {
        push_turn(&mut out, msg.role, &msg.content);
    }

    if options.add_generation_prompt {
        out.push_str(TURN_OPEN_PREFIX);
        out.push_str(Role::Assistant.as_tag());
        out.push('\n');
    }

    out
}

/// Length of the complete marker at the start of `tail`, if any.
///
/// A turn-close or turn-open match also consumes the single framing newline
/// that `encode` inserts after it, when present.
fn match_marker(tail: &str) -> Option<usize> {
    if tail.starts_with(BEGIN_OF_TEXT) {
        return Some(BEGIN_OF_TEXT.len());
    }
    if tail.starts_with(TOOL_CALL_CLOSE) {
        return Some(TOOL_CALL_CLOSE.len());
    }
    if tail.starts_with(TOOL_CALL_OPEN) {
        return Some(TOOL_CALL_OPEN.len());
    }
    if let Some(rest) = tail.strip_prefix(TURN_CLOSE) {
        return Some(TURN_CLOSE.len() + usize::from(rest.starts_with('\n')));
    }
    if let Some(rest) = tail.strip_prefix(TURN_OPEN_PREFIX) {
        for role in [Role::System, Role::User, Role::Assistant] {
            if let Some(after) = rest.strip_prefix(role.as_tag()) {
                let len = TURN_OPEN_PREFIX.len() + role.as_tag().len();
                return Some(len + usize::from(after.starts_with('\n')));
            }
        }
    }
    None
}

/// True when `tail` runs to the end of the input and is a strict prefix of
/// some marker spelling, i.e. a stream cut mid-marker.
fn is_partial_marker(tail: &str) -> bool {
    MARKER_SPELLINGS
        .iter()
        .any(|m| m.len() > tail.len() && m.starts_with(tail))
}

/// Strip all protocol markers from raw model output.
///
/// Preserves every non-marker character and their relative order. A partial
/// trailing marker (stream cut mid-token) is left untouched rather than
/// treated as an error. Idempotent on marker-free text.
pub fn decode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find("<|") {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if let Some(len) = match_marker(tail) {
            rest = &tail[len..];
        } else if is_partial_marker(tail) {
            out.push_str(tail);
            rest = "";
        } else {
            out.push_str("<|");
            rest = &tail[2..];
        }
    }
    out.push_str(rest);
    out
}

/// Byte index below which `s` can be safely emitted by a streaming caller.
///
/// The held-back suffix is the longest trailing substring that is a prefix
/// of some marker spelling; emitting it early could split a marker across
/// fragment boundaries.
pub fn safe_stream_end(s: &str) -> usize {
    let max_len = MARKER_SPELLINGS.iter().map(|m| m.len()).max().unwrap_or(0);
    let start = s.len().saturating_sub(max_len);
    for (i, _) in s.char_indices().filter(|(i, _)| *i >= start) {
        let tail = &s[i..];
        if MARKER_SPELLINGS.iter().any(|m| m.starts_with(tail)) {
            return i;
        }
    }
    s.len()
}
