//! Maildir message source.
//!
//! Reads `new/` and `cur/` under a Maildir root. Messages in `new/`, and
//! messages in `cur/` without the `S` flag, count as unread. The mailbox is
//! only ever read: no flags are set and nothing is moved, dry run or not.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mail_parser::{MessageParser, MimeHeaders, PartType};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::pipeline::types::{FetchMode, FetchRules, MessageSource, RawMessage};

const SOURCE_NAME: &str = "maildir";

/// One file found in the mailbox.
#[derive(Debug, Clone)]
struct MaildirEntry {
    path: PathBuf,
    /// Unique part of the file name (before `:2,`).
    unique: String,
    flags: String,
    in_new: bool,
}

impl MaildirEntry {
    fn from_path(path: PathBuf, in_new: bool) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        if name.starts_with('.') {
            return None;
        }
        let (unique, flags) = match name.split_once(":2,") {
            Some((unique, flags)) => (unique.to_string(), flags.to_string()),
            None => (name.clone(), String::new()),
        };
        Some(Self {
            path,
            unique,
            flags,
            in_new,
        })
    }

    fn is_seen(&self) -> bool {
        !self.in_new && self.flags.contains('S')
    }

    fn labels(&self) -> HashSet<String> {
        let mut labels = HashSet::new();
        labels.insert(if self.is_seen() { "seen" } else { "unread" }.to_string());
        for (flag, label) in [('F', "flagged"), ('R', "replied"), ('P', "forwarded"), ('D', "draft")] {
            if self.flags.contains(flag) {
                labels.insert(label.to_string());
            }
        }
        labels
    }
}

pub struct MaildirSource {
    root: PathBuf,
}

impl MaildirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read and parse every message, in no particular order.
    async fn load_all(&self) -> Result<Vec<RawMessage>, FetchError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || load_mailbox(&root))
            .await
            .map_err(|e| FetchError::Transient {
                source_name: SOURCE_NAME.to_string(),
                reason: format!("mailbox reader task failed: {e}"),
            })?
    }
}

#[async_trait]
impl MessageSource for MaildirSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(
        &self,
        rules: &FetchRules,
        dry_run: bool,
    ) -> Result<Vec<RawMessage>, FetchError> {
        let all = self.load_all().await?;
        let total = all.len();
        let selected = select(all, rules, Utc::now());
        info!(
            root = %self.root.display(),
            mode = rules.mode.as_str(),
            total,
            selected = selected.len(),
            dry_run,
            "Fetched messages from maildir"
        );
        Ok(selected)
    }

    async fn fetch_one(&self, message_id: &str) -> Result<Option<RawMessage>, FetchError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|m| m.id == message_id))
    }
}

/// Apply fetch rules: filter by mode, newest first, capped.
fn select(mut messages: Vec<RawMessage>, rules: &FetchRules, now: DateTime<Utc>) -> Vec<RawMessage> {
    match rules.mode {
        FetchMode::Unread => messages.retain(|m| m.labels.contains("unread")),
        FetchMode::LastNDays => {
            let cutoff = now - ChronoDuration::days(i64::from(rules.days_back));
            messages.retain(|m| m.received_at >= cutoff);
        }
        FetchMode::All => {}
    }
    messages.sort_by(|a, b| b.received_at.cmp(&a.received_at).then_with(|| a.id.cmp(&b.id)));
    messages.truncate(rules.max_messages);
    messages
}

fn load_mailbox(root: &Path) -> Result<Vec<RawMessage>, FetchError> {
    if !root.is_dir() {
        return Err(FetchError::Permanent {
            source_name: SOURCE_NAME.to_string(),
            reason: format!("{} is not a directory", root.display()),
        });
    }

    let mut messages = Vec::new();
    for (folder, in_new) in [("new", true), ("cur", false)] {
        let dir = root.join(folder);
        if !dir.is_dir() {
            continue;
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| FetchError::Transient {
            source_name: SOURCE_NAME.to_string(),
            reason: format!("cannot read {}: {e}", dir.display()),
        })?;

        for entry in entries.flatten() {
            let Some(entry) = MaildirEntry::from_path(entry.path(), in_new) else {
                continue;
            };
            match read_entry(&entry) {
                Some(message) => messages.push(message),
                None => warn!(path = %entry.path.display(), "Skipping unparseable message"),
            }
        }
    }
    debug!(root = %root.display(), count = messages.len(), "Mailbox scanned");
    Ok(messages)
}

fn read_entry(entry: &MaildirEntry) -> Option<RawMessage> {
    let bytes = std::fs::read(&entry.path).ok()?;
    let fallback_time = std::fs::metadata(&entry.path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    let mut message = parse_message(&bytes, &entry.unique, fallback_time)?;
    message.labels = entry.labels();
    Some(message)
}

/// Parse an RFC 5322 message into a [`RawMessage`].
///
/// `fallback_id` is used when the message has no usable `Message-ID`;
/// `fallback_time` when it has no `Date`.
pub fn parse_message(
    bytes: &[u8],
    fallback_id: &str,
    fallback_time: Option<DateTime<Utc>>,
) -> Option<RawMessage> {
    let parsed = MessageParser::default().parse(bytes)?;

    let id = parsed
        .message_id()
        .map(sanitize_id)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| sanitize_id(fallback_id));

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => "unknown".to_string(),
        })
        .unwrap_or_else(|| "unknown".to_string());

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .or(fallback_time)
        .unwrap_or_else(Utc::now);

    let body_html = match parsed.html_part(0).map(|p| &p.body) {
        Some(PartType::Html(html)) => html.to_string(),
        _ => String::new(),
    };
    let body_text = match parsed.text_part(0).map(|p| &p.body) {
        Some(PartType::Text(text)) => Some(text.to_string()),
        // Neither part present: an empty text body, which the cleaner flags.
        _ if body_html.is_empty() => Some(String::new()),
        _ => None,
    };

    let attachment_names = parsed
        .attachments()
        .map(|part| MimeHeaders::attachment_name(part).unwrap_or("unnamed").to_string())
        .collect();

    Some(RawMessage {
        id,
        sender,
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        received_at,
        body_html,
        body_text,
        attachment_names,
        labels: HashSet::new(),
    })
}

/// Message IDs double as file names downstream.
fn sanitize_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
