//! Model output parsing and validation.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

/// Validated fields of a model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryFields {
    pub summary: String,
    pub actions: Vec<String>,
    pub deadlines: BTreeSet<NaiveDate>,
}

/// Wire shape of a reply. All three keys are required; extra keys are ignored.
#[derive(Debug, Deserialize)]
struct SummaryReply {
    summary: String,
    actions: Vec<String>,
    deadlines: Vec<String>,
}

/// Parse a raw model reply into summary fields.
///
/// Returns a human-readable reason on failure; the caller decides whether
/// to ask the model again.
pub fn parse_summary_reply(raw: &str) -> Result<SummaryFields, String> {
    let json = extract_json_object(raw);
    let reply: SummaryReply =
        serde_json::from_str(&json).map_err(|e| format!("invalid summary JSON: {e}"))?;

    let summary = reply.summary.trim().to_string();
    if summary.is_empty() {
        return Err("summary is empty".to_string());
    }

    let actions = reply
        .actions
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    let mut deadlines = BTreeSet::new();
    for value in reply.deadlines {
        match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
            Ok(date) => {
                deadlines.insert(date);
            }
            Err(e) => warn!(value = %value, error = %e, "Dropping unparseable deadline"),
        }
    }

    Ok(SummaryFields {
        summary,
        actions,
        deadlines,
    })
}

/// Extract a JSON object from model output that may be wrapped in markdown
/// fences or surrounded by chatter.
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_object() {
        let fields = parse_summary_reply(
            r#"{"summary":"Alice asks for the report.","actions":["Send the report"],"deadlines":["2025-12-12"]}"#,
        )
        .unwrap();
        assert_eq!(fields.summary, "Alice asks for the report.");
        assert_eq!(fields.actions, vec!["Send the report"]);
        assert_eq!(
            fields.deadlines.into_iter().collect::<Vec<_>>(),
            vec![NaiveDate::from_ymd_opt(2025, 12, 12).unwrap()]
        );
    }

    #[test]
    fn parses_fenced_object() {
        let raw = "Here you go:\n```json\n{\"summary\":\"Hi.\",\"actions\":[],\"deadlines\":[]}\n```";
        assert!(parse_summary_reply(raw).is_ok());
    }

    #[test]
    fn parses_object_with_chatter() {
        let raw = "Sure! {\"summary\":\"Hi.\",\"actions\":[],\"deadlines\":[]} Hope that helps.";
        assert!(parse_summary_reply(raw).is_ok());
    }

    #[test]
    fn missing_key_is_rejected() {
        let raw = r#"{"summary":"Hi.","actions":[]}"#;
        let err = parse_summary_reply(raw).unwrap_err();
        assert!(err.contains("deadlines"), "{err}");
    }

    #[test]
    fn wrong_type_is_rejected() {
        assert!(parse_summary_reply(r#"{"summary":"Hi.","actions":"none","deadlines":[]}"#).is_err());
    }

    #[test]
    fn empty_summary_is_rejected() {
        assert!(parse_summary_reply(r#"{"summary":"  ","actions":[],"deadlines":[]}"#).is_err());
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(parse_summary_reply("I cannot help with that.").is_err());
    }

    #[test]
    fn extra_keys_ignored() {
        let raw = r#"{"summary":"Hi.","actions":[],"deadlines":[],"priority":"high"}"#;
        assert!(parse_summary_reply(raw).is_ok());
    }

    #[test]
    fn bad_deadlines_dropped_and_duplicates_merged() {
        let raw = r#"{"summary":"Hi.","actions":[" a ",""],"deadlines":["2025-12-12","next week","2025-12-12","2025-01-02"]}"#;
        let fields = parse_summary_reply(raw).unwrap();
        assert_eq!(fields.actions, vec!["a"]);
        let dates: Vec<String> = fields.deadlines.iter().map(|d| d.to_string()).collect();
        assert_eq!(dates, vec!["2025-01-02", "2025-12-12"]);
    }

    #[test]
    fn extract_leaves_unparseable_text_alone() {
        assert_eq!(extract_json_object("  nothing here "), "nothing here");
    }
}
