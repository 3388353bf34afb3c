//! Quoted-reply removal.
//!
//! Drops every line that starts with `>` and cuts the text at the first
//! reply header ("On ... wrote:", "-----Original Message-----", Outlook
//! `From:`/`Sent:` blocks, dated `<addr>:` attributions).

use std::sync::LazyLock;

use regex::Regex;

/// `2024-01-05 10:00 GMT+01:00 Alice <alice@example.com>:`
static DATED_ATTRIBUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}.+<.+@.+>:\s*$").unwrap());

static ORIGINAL_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^-{2,}\s*(original message|forwarded message)\s*-{2,}$").unwrap()
});

/// How many lines after an Outlook `From:` line may hold the `Sent:` line.
const OUTLOOK_HEADER_SPAN: usize = 3;

/// Remove quoted lines and everything from the first reply header on.
pub fn remove_quoted_replies(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }
        if is_reply_header(&lines, i) {
            break;
        }
        kept.push(*line);
    }

    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    kept.join("\n")
}

/// Does line `i` open a quoted reply that runs to the end of the text?
fn is_reply_header(lines: &[&str], i: usize) -> bool {
    let trimmed = lines[i].trim();

    if trimmed.starts_with("On ") {
        if trimmed.ends_with("wrote:") {
            return true;
        }
        // Clients wrap long attributions: "On Mon, ... Alice <a@b.c>\nwrote:"
        if let Some(next) = lines.get(i + 1)
            && next.trim().ends_with("wrote:")
            && !next.trim().starts_with('>')
        {
            return true;
        }
    }

    if ORIGINAL_MESSAGE.is_match(trimmed) || DATED_ATTRIBUTION.is_match(trimmed) {
        return true;
    }

    if trimmed.starts_with("From:") {
        return lines
            .iter()
            .skip(i + 1)
            .take(OUTLOOK_HEADER_SPAN)
            .any(|l| l.trim_start().starts_with("Sent:"));
    }

    false
}
