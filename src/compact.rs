//! Whitespace and size compaction of upstream responses.
//!
//! Applied to text content items only, before caching and before returning
//! to the agent: runs of three or more newlines collapse to two, runs of
//! two or more spaces/tabs collapse to one space, and both ends are
//! trimmed. Oversized payloads are replaced by a truncation marker plus a
//! prefix of the original.

use serde_json::{Value, json};

use crate::protocol::ContentItem;

/// Serialized payloads above this size are truncated.
pub const MAX_RESPONSE_BYTES: usize = 50_000;

/// Bytes of the original kept when truncating.
const TRUNCATED_KEEP_BYTES: usize = 49_900;

/// Collapse redundant whitespace in one text block.
#[must_use]
pub fn compact_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => {
                let mut run = 1usize;
                while chars.peek() == Some(&'\n') {
                    chars.next();
                    run += 1;
                }
                for _ in 0..run.min(2) {
                    out.push('\n');
                }
            }
            ' ' | '\t' => {
                let mut run = 1usize;
                while matches!(chars.peek(), Some(' ' | '\t')) {
                    chars.next();
                    run += 1;
                }
                if run >= 2 {
                    out.push(' ');
                } else {
                    out.push(ch);
                }
            }
            other => out.push(other),
        }
    }

    out.trim().to_string()
}

/// Compact every text item in a content list; other item kinds pass
/// through untouched.
#[must_use]
pub fn compact_content(content: Vec<ContentItem>) -> Vec<ContentItem> {
    content
        .into_iter()
        .map(|item| match item {
            ContentItem::Text { text } => ContentItem::Text {
                text: compact_whitespace(&text),
            },
            other => other,
        })
        .collect()
}

/// Enforce the response size bound on a data payload.
///
/// If the serialized payload exceeds [`MAX_RESPONSE_BYTES`], the content is
/// replaced with a single text item carrying a truncation marker and the
/// first 49 900 bytes of the serialized original.
#[must_use]
pub fn enforce_size_limit(data: Value) -> Value {
    let serialized = data.to_string();
    if serialized.len() <= MAX_RESPONSE_BYTES {
        return data;
    }

    let keep = floor_char_boundary(&serialized, TRUNCATED_KEEP_BYTES);
    let text = format!(
        "[Response truncated - original size: {} bytes]\n{}\n[... truncated]",
        serialized.len(),
        &serialized[..keep]
    );

    json!({"content": [{"type": "text", "text": text}]})
}

/// Largest index `<= at` that lands on a UTF-8 character boundary.
fn floor_char_boundary(s: &str, at: usize) -> usize {
    if at >= s.len() {
        return s.len();
    }
    let mut at = at;
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}
