//! pulse.raw_stream.v1 input schema
//!
//! Raw provider data arrives as a mapping from source key to a list of loosely
//! typed JSON records. Nothing about a record is trusted until the validator
//! has cleaned it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Current input schema version
pub const SCHEMA_VERSION: &str = "pulse.raw_stream.v1";

/// Supported raw source types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    CalendarEvents,
    TeamsMessages,
    SlackMessages,
    Emails,
    JiraTasks,
    AsanaTasks,
    JiraWorklogs,
}

impl SourceType {
    pub const ALL: [SourceType; 7] = [
        SourceType::CalendarEvents,
        SourceType::TeamsMessages,
        SourceType::SlackMessages,
        SourceType::Emails,
        SourceType::JiraTasks,
        SourceType::AsanaTasks,
        SourceType::JiraWorklogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::CalendarEvents => "calendar_events",
            SourceType::TeamsMessages => "teams_messages",
            SourceType::SlackMessages => "slack_messages",
            SourceType::Emails => "emails",
            SourceType::JiraTasks => "jira_tasks",
            SourceType::AsanaTasks => "asana_tasks",
            SourceType::JiraWorklogs => "jira_worklogs",
        }
    }

    /// Resolve a raw stream key into a source type
    pub fn from_key(key: &str) -> Option<SourceType> {
        SourceType::ALL.into_iter().find(|s| s.as_str() == key)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records fetched from one source, not yet validated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventBatch {
    pub source: SourceType,
    pub records: Vec<Value>,
}

impl RawEventBatch {
    pub fn new(source: SourceType, records: Vec<Value>) -> Self {
        Self { source, records }
    }

    pub fn empty(source: SourceType) -> Self {
        Self::new(source, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Raw stream payload for one pipeline run
///
/// Values are kept as untyped JSON so that a batch which is not even a list
/// can be reported against its own source instead of failing the whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawStreamData {
    batches: BTreeMap<String, Value>,
}

impl RawStreamData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw stream from a JSON object
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn insert(&mut self, batch: RawEventBatch) {
        self.batches
            .insert(batch.source.as_str().to_string(), Value::Array(batch.records));
    }

    /// Insert an arbitrary value under a raw key
    pub fn insert_raw(&mut self, key: impl Into<String>, value: Value) {
        self.batches.insert(key.into(), value);
    }

    pub fn get(&self, source: SourceType) -> Option<&Value> {
        self.batches.get(source.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.batches.iter()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl FromIterator<RawEventBatch> for RawStreamData {
    fn from_iter<I: IntoIterator<Item = RawEventBatch>>(iter: I) -> Self {
        let mut data = RawStreamData::new();
        for batch in iter {
            data.insert(batch);
        }
        data
    }
}

/// Whether a field carries a usable value
///
/// Null, empty strings, empty collections and `false` all count as missing.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(_)) => true,
    }
}

/// First present field among `keys`
pub fn first_present<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .map(|k| record.get(*k))
        .find(|v| is_present(*v))
        .flatten()
}

/// Shortest integer part read as epoch seconds in a string
const MIN_EPOCH_DIGITS: usize = 9;

/// Parse a provider timestamp
///
/// Accepts RFC 3339 strings, ISO strings with a `+0000` style offset, naive ISO
/// strings (read as UTC), plain dates, epoch seconds (number, or numeric string of
/// at least 9 digits as Slack sends them) and Graph-style `{"dateTime": ..., "timeZone": ...}`
/// objects.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_f64().and_then(from_epoch_seconds),
        Value::Object(o) => o.get("dateTime").and_then(parse_timestamp),
        _ => None,
    }
}

/// Parse a timestamp string, see [`parse_timestamp`]
pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    if !is_epoch_string(s) {
        return None;
    }
    s.parse::<f64>().ok().and_then(from_epoch_seconds)
}

/// Slack-style `"1705309200.000100"`: at least 9 integer digits, optional fraction
fn is_epoch_string(s: &str) -> bool {
    let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
    whole.len() >= MIN_EPOCH_DIGITS
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
    Utc.timestamp_opt(whole, nanos.min(999_999_999)).single()
}

/// Read a string field, accepting a nested `{"name": ...}` object
pub fn string_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(o) => o
            .get("name")
            .or_else(|| o.get("displayName"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_type_keys_round_trip() {
        for source in SourceType::ALL {
            assert_eq!(SourceType::from_key(source.as_str()), Some(source));
        }
        assert_eq!(SourceType::from_key("github_commits"), None);
    }

    #[test]
    fn test_parse_rfc3339_and_naive() {
        let a = parse_timestamp(&json!("2024-01-15T09:00:00Z")).unwrap();
        let b = parse_timestamp(&json!("2024-01-15T09:00:00.0000000")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_jira_offset() {
        let ts = parse_timestamp(&json!("2024-01-15T10:00:00.000+0100")).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_slack_epoch_string() {
        let ts = parse_timestamp(&json!("1705309200.000100")).unwrap();
        assert_eq!(ts.timestamp(), 1_705_309_200);
    }

    #[test]
    fn test_parse_graph_object() {
        let ts = parse_timestamp(&json!({"dateTime": "2024-01-15T09:30:00.0000000", "timeZone": "UTC"}))
            .unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp(&json!("not a date")).is_none());
        assert!(parse_timestamp(&json!("2024")).is_none());
        assert!(parse_timestamp(&json!("-1705309200")).is_none());
        assert!(parse_timestamp(&json!({"timeZone": "UTC"})).is_none());
        assert!(parse_timestamp(&json!(null)).is_none());
    }

    #[test]
    fn test_is_present_truthiness() {
        assert!(!is_present(None));
        assert!(!is_present(Some(&json!(null))));
        assert!(!is_present(Some(&json!(""))));
        assert!(!is_present(Some(&json!({}))));
        assert!(is_present(Some(&json!({"dateTime": "x"}))));
        assert!(is_present(Some(&json!(0))));
    }

    #[test]
    fn test_raw_stream_data_parses_object() {
        let data = RawStreamData::from_json(r#"{"calendar_events": [], "jira_tasks": "oops"}"#).unwrap();
        assert_eq!(data.len(), 2);
        assert!(data.get(SourceType::JiraTasks).unwrap().is_string());
    }
}
