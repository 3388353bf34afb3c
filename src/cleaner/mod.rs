//! Content cleaner: turns a raw message body into plain text for the
//! summarizer.
//!
//! Steps run in a fixed order, each assuming the previous ones ran:
//! 1. Markup to text (`html`)
//! 2. Quoted-reply removal (`quotes`)
//! 3. Signature removal (`signature`)
//! 4. Whitespace normalization
//! 5. Emptiness check
//!
//! Pure string processing. No I/O, never fails.

pub mod html;
pub mod quotes;
pub mod signature;

use tracing::{debug, warn};

use crate::pipeline::types::{CleanedMessage, RawMessage};

pub use html::html_to_text;
pub use quotes::remove_quoted_replies;
pub use signature::remove_signature;

/// Body used when nothing readable survives cleaning.
pub const EMPTY_BODY_MARKER: &str = "[Empty email body]";

/// Clean a raw message. Attachment names pass through unchanged.
pub fn clean(raw: RawMessage) -> CleanedMessage {
    let (source, from_html) = if !raw.body_html.trim().is_empty() {
        (raw.body_html.as_str(), true)
    } else {
        (raw.body_text.as_deref().unwrap_or(""), false)
    };
    let original_length = source.chars().count();

    let text = if from_html {
        html_to_text(source)
    } else {
        collapse_inline_whitespace(source)
    };
    let text = remove_quoted_replies(&text);
    let text = remove_signature(&text);
    let text = normalize_whitespace(&text);

    let body_empty = text.is_empty();
    let (cleaned_body, cleaned_length) = if body_empty {
        warn!(id = %raw.id, "Message has empty body after cleaning");
        (EMPTY_BODY_MARKER.to_string(), 0)
    } else {
        let len = text.chars().count();
        (text, len)
    };

    debug!(
        id = %raw.id,
        original_length,
        cleaned_length,
        attachments = raw.attachment_names.len(),
        "Message cleaned"
    );

    CleanedMessage {
        id: raw.id,
        sender: raw.sender,
        subject: raw.subject,
        received_at: raw.received_at,
        cleaned_body,
        attachment_names: raw.attachment_names,
        original_length,
        cleaned_length,
        body_empty,
    }
}

/// Collapse runs of spaces and tabs inside each line of a plain-text body.
fn collapse_inline_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim every line, keep at most one blank line in a row, trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && lines.last().is_none_or(|l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
