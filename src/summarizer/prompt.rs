//! Prompt assembly and input budgeting.
//!
//! Token counts are estimated at four characters per token. The body is the
//! only part that gets truncated; subject, sender, date and attachment names
//! always reach the model verbatim.

use std::borrow::Cow;

use crate::pipeline::types::CleanedMessage;

use super::client::CompletionRequest;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Appended to a body that was cut to fit the input budget.
pub const TRUNCATION_MARKER: &str = "\n\n[Email truncated...]";

/// A sentence end in the last fifth of the budget is preferred as cut point.
const SENTENCE_WINDOW: f64 = 0.8;

const SYSTEM_PROMPT: &str =
    "You summarize emails for a busy reader. Respond with a single JSON object and nothing else.";

const REPAIR_SYSTEM_PROMPT: &str =
    "You fix malformed model output. Respond with a single JSON object and nothing else.";

const REPAIR_TEMPERATURE: f32 = 0.0;

/// Rough token count for `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Cut `body` so its estimated token count, marker included, fits `max_tokens`.
///
/// Prefers ending on a sentence boundary when one falls near the end of
/// the budget.
pub fn truncate_to_tokens(body: &str, max_tokens: usize) -> Cow<'_, str> {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    if body.chars().count() <= max_chars {
        return Cow::Borrowed(body);
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_chars {
        return Cow::Owned(body.chars().take(max_chars).collect());
    }

    let budget = max_chars - marker_chars;
    let end = byte_offset(body, budget);
    let mut cut = &body[..end];

    if let Some(period) = cut.rfind('.') {
        let period_chars = cut[..period].chars().count();
        if period_chars as f64 > budget as f64 * SENTENCE_WINDOW {
            cut = &cut[..=period];
        }
    }

    Cow::Owned(format!("{}{TRUNCATION_MARKER}", cut.trim_end()))
}

/// Byte offset of the `n`-th char, or the string length.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// A fully assembled summarization prompt.
#[derive(Debug, Clone)]
pub struct SummaryPrompt {
    pub system: String,
    pub user: String,
    pub truncated: bool,
    /// Estimated tokens of the (possibly truncated) body.
    pub body_tokens: usize,
    pub temperature: f32,
}

impl SummaryPrompt {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn request(&self) -> CompletionRequest {
        CompletionRequest::new(&self.system, &self.user).with_temperature(self.temperature)
    }

    /// Follow-up request asking the model to restate its output as valid JSON.
    pub fn repair_request(&self, previous_output: &str, problem: &str) -> CompletionRequest {
        let prompt = format!(
            "Your previous answer could not be used ({problem}).\n\n\
             Previous answer:\n{previous_output}\n\n\
             Reply again with ONLY a JSON object that has exactly these keys:\n\
             - \"summary\": string, 1-3 sentences\n\
             - \"actions\": array of strings\n\
             - \"deadlines\": array of dates formatted YYYY-MM-DD\n\
             No markdown fences, no commentary."
        );
        CompletionRequest::new(REPAIR_SYSTEM_PROMPT, prompt).with_temperature(REPAIR_TEMPERATURE)
    }
}

/// Build the summarization prompt for `email` with the body capped at
/// `max_input_tokens`.
pub fn build_prompt(email: &CleanedMessage, max_input_tokens: usize) -> SummaryPrompt {
    let body = truncate_to_tokens(&email.cleaned_body, max_input_tokens);
    let truncated = matches!(body, Cow::Owned(_));
    let attachments = if email.attachment_names.is_empty() {
        "None".to_string()
    } else {
        email.attachment_names.join(", ")
    };

    let user = format!(
        "Summarize the email below as a JSON object with these keys:\n\
         - \"summary\": 1-3 sentences on what the email is about and what is being asked\n\
         - \"actions\": array of short imperative steps for the recipient (empty if none)\n\
         - \"deadlines\": array of dates formatted YYYY-MM-DD (empty if none)\n\n\
         Subject: {subject}\n\
         From: {sender}\n\
         Date: {date}\n\
         Attachments: {attachments}\n\n\
         Body:\n{body}\n\n\
         Return only the JSON object.",
        subject = email.subject,
        sender = email.sender,
        date = email.received_at.format("%Y-%m-%d %H:%M"),
    );

    SummaryPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
        truncated,
        body_tokens: estimate_tokens(&body),
        temperature: super::client::DEFAULT_TEMPERATURE,
    }
}
