//! Signature removal.
//!
//! Looks only at the tail of the message. A signature starts at a `--`
//! delimiter, a conventional sign-off ("Regards,", "Best,", ...), a mobile
//! footer ("Sent from my ...") or a block of contact details, and is only
//! cut when fewer than [`MAX_SIGNATURE_LINES`] non-blank lines follow it.

use std::sync::LazyLock;

use regex::Regex;

/// Longest tail (non-blank lines after the introducer) treated as a signature.
pub const MAX_SIGNATURE_LINES: usize = 6;

static SIGN_OFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(best|best regards|kind regards|warm regards|warmly|regards|many thanks|thanks|thank you|cheers|sincerely|yours truly|all the best)\s*[,.!]?$",
    )
    .unwrap()
});

static MOBILE_FOOTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(sent from my\b|get outlook for\b)").unwrap());

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-. ]?\d{3}[-. ]?\d{4}\b").unwrap());

static CONTACT_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)@|www\.|https?://|phone|mobile|office|tel\b").unwrap());

/// Remove the trailing signature block, if there is one.
pub fn remove_signature(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    match signature_start(&lines) {
        Some(start) => {
            let mut kept = lines[..start].to_vec();
            while kept.last().is_some_and(|l| l.trim().is_empty()) {
                kept.pop();
            }
            kept.join("\n")
        }
        None => text.to_string(),
    }
}

/// Index of the line that introduces the signature.
///
/// Scans upward from the end and keeps the topmost introducer that still
/// has a short tail, so "Best,\nAlice\n--\nAlice Smith" cuts at "Best,".
fn signature_start(lines: &[&str]) -> Option<usize> {
    let mut start = None;
    let mut tail = 0usize;

    for i in (1..lines.len()).rev() {
        if tail >= MAX_SIGNATURE_LINES {
            break;
        }
        let trimmed = lines[i].trim();
        if is_introducer(trimmed) || is_contact_block(lines, i) {
            start = Some(i);
        }
        if !trimmed.is_empty() {
            tail += 1;
        }
    }
    start
}

fn is_introducer(trimmed: &str) -> bool {
    trimmed == "--" || trimmed == "—" || SIGN_OFF.is_match(trimmed) || MOBILE_FOOTER.is_match(trimmed)
}

/// A phone number in the last 40% of the text followed by contact details.
fn is_contact_block(lines: &[&str], i: usize) -> bool {
    if (i as f64) < lines.len() as f64 * 0.6 || !PHONE.is_match(lines[i]) {
        return false;
    }
    let hints = lines
        .iter()
        .skip(i)
        .take(3)
        .filter(|l| CONTACT_HINT.is_match(l))
        .count();
    hints >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_delimiter() {
        let body = "See attached.\n\n--\nAlice Smith\nAcme Corp";
        assert_eq!(remove_signature(body), "See attached.");
    }

    #[test]
    fn sign_off_with_name() {
        let body = "Can you review the draft?\n\nRegards,\nBob";
        assert_eq!(remove_signature(body), "Can you review the draft?");
    }

    #[test]
    fn sign_off_and_delimiter_cut_at_topmost() {
        let body = "Meeting moved to 3pm.\n\nBest,\nAlice\n--\nAlice Smith\nCEO, Acme";
        assert_eq!(remove_signature(body), "Meeting moved to 3pm.");
    }

    #[test]
    fn sent_from_my_phone() {
        let body = "On my way.\n\nSent from my iPhone";
        assert_eq!(remove_signature(body), "On my way.");
    }

    #[test]
    fn long_tail_is_not_a_signature() {
        let body = "Intro\nThanks,\none\ntwo\nthree\nfour\nfive\nsix\nseven";
        assert_eq!(remove_signature(body), body);
    }

    #[test]
    fn first_line_sign_off_is_kept() {
        let body = "Thanks!\nThat fixed it.";
        assert_eq!(remove_signature(body), body);
    }

    #[test]
    fn contact_block() {
        let body = "Line one\nLine two\nLine three\nLine four\nLine five\nLine six\n\
                    555-123-4567\nalice@example.com\nwww.example.com";
        assert_eq!(
            remove_signature(body),
            "Line one\nLine two\nLine three\nLine four\nLine five\nLine six"
        );
    }

    #[test]
    fn no_signature_passthrough() {
        let body = "Hi\n\nPlease send the report by 2025-12-12.";
        assert_eq!(remove_signature(body), body);
    }
}
