use chrono::{DateTime, FixedOffset};
use google_gmail1::api::{Message, MessagePartHeader};
use indexmap::IndexSet;
use regex::Regex;
use serde::Serialize;

// Tried in order once RFC 2822 parsing has failed on the raw and the
// comment-stripped value.
const DATE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
    "%a, %d %b %Y %H:%M:%S%.f %z",
];

const RE_TRAILING_COMMENT_STR: &str = r"\s*\([^()]*\)\s*$";

lazy_static::lazy_static!(
    static ref RE_TRAILING_COMMENT: Regex = Regex::new(RE_TRAILING_COMMENT_STR).unwrap();
);

/// Structured view of one message, built from the `full` format Gmail response.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMetadata {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub date: Option<DateTime<FixedOffset>>,
    pub snippet: String,
    pub label_ids: IndexSet<String>,
    pub size_estimate: i64,
}

impl EmailMetadata {
    pub fn from_gmail_message(msg: &Message) -> Self {
        let headers = msg
            .payload
            .as_ref()
            .and_then(|p| p.headers.as_deref())
            .unwrap_or_default();

        let mut from: Option<String> = None;
        let mut subject: Option<String> = None;
        let mut date: Option<DateTime<FixedOffset>> = None;
        let mut to = Vec::new();

        for (name, value) in headers.iter().filter_map(header_pair) {
            match name {
                _ if name.eq_ignore_ascii_case("from") => {
                    from.get_or_insert_with(|| extract_email_address(value));
                }
                _ if name.eq_ignore_ascii_case("to") => {
                    to.extend(
                        split_address_list(value)
                            .into_iter()
                            .map(extract_email_address)
                            .filter(|a| !a.is_empty()),
                    );
                }
                _ if name.eq_ignore_ascii_case("subject") => {
                    subject.get_or_insert_with(|| value.to_string());
                }
                _ if name.eq_ignore_ascii_case("date") => {
                    if date.is_none() {
                        date = parse_date(value);
                    }
                }
                _ => {}
            }
        }

        EmailMetadata {
            id: msg.id.clone().unwrap_or_default(),
            thread_id: msg.thread_id.clone().unwrap_or_default(),
            from: from.unwrap_or_default(),
            to,
            subject: subject.unwrap_or_default(),
            date,
            snippet: msg.snippet.clone().unwrap_or_default(),
            label_ids: msg.label_ids.iter().flatten().cloned().collect(),
            size_estimate: msg.size_estimate.map(i64::from).unwrap_or_default(),
        }
    }

    /// Calendar day of the message in its own offset, `YYYY-MM-DD`
    pub fn day_key(&self) -> Option<String> {
        self.date
            .map(|d| d.date_naive().format("%Y-%m-%d").to_string())
    }
}

fn header_pair(header: &MessagePartHeader) -> Option<(&str, &str)> {
    Some((header.name.as_deref()?, header.value.as_deref()?))
}

/// `"John Doe <john@example.com>"` -> `"john@example.com"`. Values without a
/// well formed `<...>` pair are returned trimmed.
pub fn extract_email_address(header: &str) -> String {
    let header = header.trim();
    match (header.find('<'), header.rfind('>')) {
        (Some(start), Some(end)) if start < end => header[start + 1..end].trim().to_string(),
        _ => header.to_string(),
    }
}

/// Splits an address list header on commas that sit outside angle brackets
/// and quoted display names.
pub fn split_address_list(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                parts.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());

    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date);
    }

    let stripped = RE_TRAILING_COMMENT.replace(value, "");
    if let Ok(date) = DateTime::parse_from_rfc2822(&stripped) {
        return Some(date);
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&stripped, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(&stripped).ok())
}
