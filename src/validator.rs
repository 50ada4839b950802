//! Record-level validation and repair
//!
//! Each raw record is either repaired with an explicit default or dropped.
//! Every repair and every drop leaves exactly one issue string behind, so the
//! quality report can be rebuilt from the issue log alone. A malformed record
//! never aborts its batch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::schema::{
    first_present, is_present, parse_timestamp, string_field, RawEventBatch, SourceType,
};
use crate::types::{
    ActivityBatches, CalendarEvent, ChatMessage, EmailRecord, MessageSource, TaskRecord,
    TaskSource, WorklogEntry,
};

/// Default subject for calendar events without one
pub const DEFAULT_MEETING_SUBJECT: &str = "Untitled Meeting";

/// Default status for tasks without one
pub const DEFAULT_TASK_STATUS: &str = "Unknown";

/// Placeholder sender for emails without one
pub const UNKNOWN_SENDER: &str = "unknown@unknown.com";

/// Jira statuses that count as completed
const COMPLETED_STATUSES: [&str; 3] = ["done", "resolved", "closed"];

/// Cleaned records of a single source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum CleanedRecords {
    Calendar(Vec<CalendarEvent>),
    Messages(Vec<ChatMessage>),
    Tasks(Vec<TaskRecord>),
    Emails(Vec<EmailRecord>),
    Worklogs(Vec<WorklogEntry>),
}

/// One source batch after validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedBatch {
    pub source: SourceType,
    pub records: CleanedRecords,
}

impl CleanedBatch {
    pub fn len(&self) -> usize {
        match &self.records {
            CleanedRecords::Calendar(v) => v.len(),
            CleanedRecords::Messages(v) => v.len(),
            CleanedRecords::Tasks(v) => v.len(),
            CleanedRecords::Emails(v) => v.len(),
            CleanedRecords::Worklogs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the cleaned records into their slot of `batches`
    pub fn merge_into(self, batches: &mut ActivityBatches) {
        match (self.source, self.records) {
            (SourceType::CalendarEvents, CleanedRecords::Calendar(v)) => {
                batches.calendar_events.extend(v)
            }
            (SourceType::TeamsMessages, CleanedRecords::Messages(v)) => {
                batches.teams_messages.extend(v)
            }
            (SourceType::SlackMessages, CleanedRecords::Messages(v)) => {
                batches.slack_messages.extend(v)
            }
            (SourceType::Emails, CleanedRecords::Emails(v)) => batches.emails.extend(v),
            (SourceType::JiraTasks, CleanedRecords::Tasks(v)) => batches.jira_tasks.extend(v),
            (SourceType::AsanaTasks, CleanedRecords::Tasks(v)) => batches.asana_tasks.extend(v),
            (SourceType::JiraWorklogs, CleanedRecords::Worklogs(v)) => {
                batches.jira_worklogs.extend(v)
            }
            (source, _) => debug!(source = %source, "Cleaned records do not match source slot"),
        }
    }
}

/// Validator for raw provider batches
pub struct DataValidator;

impl DataValidator {
    /// Clean one batch, returning the surviving records and the issue log
    pub fn clean(batch: &RawEventBatch) -> (CleanedBatch, Vec<String>) {
        let mut issues = Vec::new();
        let records = match batch.source {
            SourceType::CalendarEvents => CleanedRecords::Calendar(clean_each(
                &batch.records,
                "Event",
                &mut issues,
                clean_calendar_event,
            )),
            SourceType::TeamsMessages => {
                CleanedRecords::Messages(clean_each(&batch.records, "Message", &mut issues, |i, r, is| {
                    clean_message(i, r, MessageSource::Teams, is)
                }))
            }
            SourceType::SlackMessages => {
                CleanedRecords::Messages(clean_each(&batch.records, "Message", &mut issues, |i, r, is| {
                    clean_message(i, r, MessageSource::Slack, is)
                }))
            }
            SourceType::Emails => {
                CleanedRecords::Emails(clean_each(&batch.records, "Email", &mut issues, clean_email))
            }
            SourceType::JiraTasks => {
                CleanedRecords::Tasks(clean_each(&batch.records, "Task", &mut issues, clean_jira_task))
            }
            SourceType::AsanaTasks => {
                CleanedRecords::Tasks(clean_each(&batch.records, "Task", &mut issues, clean_asana_task))
            }
            SourceType::JiraWorklogs => CleanedRecords::Worklogs(clean_each(
                &batch.records,
                "Worklog",
                &mut issues,
                clean_worklog,
            )),
        };

        let cleaned = CleanedBatch {
            source: batch.source,
            records,
        };

        debug!(
            source = %batch.source,
            original = batch.len(),
            cleaned = cleaned.len(),
            issues = issues.len(),
            "Batch validated"
        );

        (cleaned, issues)
    }
}

/// Run `clean_one` over every record, dropping anything that is not an object
fn clean_each<T>(
    records: &[Value],
    label: &str,
    issues: &mut Vec<String>,
    mut clean_one: impl FnMut(usize, &Map<String, Value>, &mut Vec<String>) -> Option<T>,
) -> Vec<T> {
    records
        .iter()
        .enumerate()
        .filter_map(|(idx, value)| match value.as_object() {
            Some(record) => clean_one(idx, record, issues),
            None => {
                issues.push(format!(
                    "{label} {idx}: Corrupt data - expected an object - SKIPPED"
                ));
                None
            }
        })
        .collect()
}

fn clean_calendar_event(
    idx: usize,
    record: &Map<String, Value>,
    issues: &mut Vec<String>,
) -> Option<CalendarEvent> {
    let start_raw = record.get("start");
    let end_raw = record.get("end");
    if !is_present(start_raw) || !is_present(end_raw) {
        issues.push(format!("Event {idx}: Missing start/end time - SKIPPED"));
        return None;
    }

    let Some(start) = start_raw.and_then(parse_timestamp) else {
        issues.push(format!("Event {idx}: Invalid start time format - SKIPPED"));
        return None;
    };
    let Some(end) = end_raw.and_then(parse_timestamp) else {
        issues.push(format!("Event {idx}: Invalid end time format - SKIPPED"));
        return None;
    };
    if end < start {
        issues.push(format!("Event {idx}: End time before start time - SKIPPED"));
        return None;
    }

    let subject = match record.get("subject").and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => {
            issues.push(format!("Event {idx}: Missing subject - using default"));
            DEFAULT_MEETING_SUBJECT.to_string()
        }
    };

    let attendees = match record.get("attendees") {
        Some(Value::Array(list)) => list.iter().filter_map(address_of).collect(),
        _ => {
            issues.push(format!("Event {idx}: Missing attendees - using empty list"));
            Vec::new()
        }
    };

    Some(CalendarEvent {
        id: string_field(record, "id"),
        subject,
        start,
        end,
        is_all_day: record
            .get("isAllDay")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        attendees,
        organizer: record.get("organizer").and_then(address_of),
    })
}

fn clean_message(
    idx: usize,
    record: &Map<String, Value>,
    source: MessageSource,
    issues: &mut Vec<String>,
) -> Option<ChatMessage> {
    let Some(ts_raw) = first_present(record, &["createdDateTime", "ts"]) else {
        issues.push(format!("Message {idx}: Missing timestamp - SKIPPED"));
        return None;
    };
    let Some(timestamp) = parse_timestamp(ts_raw) else {
        issues.push(format!("Message {idx}: Invalid timestamp format - SKIPPED"));
        return None;
    };

    let id = string_field(record, "id")
        .or_else(|| string_field(record, "client_msg_id"))
        .unwrap_or_else(|| {
            issues.push(format!("Message {idx}: Missing ID - generating one"));
            format!("generated_{idx}_{}", Uuid::new_v4())
        });

    let content = match first_present(record, &["body", "text"]) {
        Some(Value::Object(body)) => match body.get("content").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => {
                issues.push(format!("Message {idx}: Missing body content - defaulted"));
                String::new()
            }
        },
        Some(Value::String(text)) => text.clone(),
        _ => {
            issues.push(format!("Message {idx}: Empty message body"));
            String::new()
        }
    };

    let sender = match source {
        MessageSource::Teams => record
            .get("from")
            .and_then(|f| f.get("user"))
            .and_then(|u| u.get("id").or_else(|| u.get("displayName")))
            .and_then(Value::as_str)
            .map(str::to_string),
        MessageSource::Slack => string_field(record, "user"),
    };

    let thread_id = string_field(record, "replyToId").or_else(|| string_field(record, "thread_ts"));

    Some(ChatMessage {
        id,
        source,
        timestamp,
        sender,
        content,
        thread_id,
    })
}

fn clean_jira_task(
    idx: usize,
    record: &Map<String, Value>,
    issues: &mut Vec<String>,
) -> Option<TaskRecord> {
    let key = task_key(idx, record, &["key", "id"], issues);

    let status = string_field(record, "status").unwrap_or_else(|| {
        issues.push(format!("Task {idx}: Missing status - using default"));
        DEFAULT_TASK_STATUS.to_string()
    });
    let completed = COMPLETED_STATUSES.contains(&status.to_lowercase().as_str());

    Some(TaskRecord {
        key,
        source: TaskSource::Jira,
        completed,
        status,
        created: creation_date(idx, record, "created", issues),
        resolved: first_present(record, &["resolved", "resolutiondate"]).and_then(parse_timestamp),
        due: record.get("duedate").and_then(parse_date),
        assignee: assignee_of(record),
    })
}

fn clean_asana_task(
    idx: usize,
    record: &Map<String, Value>,
    issues: &mut Vec<String>,
) -> Option<TaskRecord> {
    let key = task_key(idx, record, &["gid", "id"], issues);
    let completed = record
        .get("completed")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some(TaskRecord {
        key,
        source: TaskSource::Asana,
        status: if completed { "Completed" } else { "Open" }.to_string(),
        completed,
        created: creation_date(idx, record, "created_at", issues),
        resolved: record.get("completed_at").and_then(parse_timestamp),
        due: record.get("due_on").and_then(parse_date),
        assignee: assignee_of(record),
    })
}

fn clean_email(
    idx: usize,
    record: &Map<String, Value>,
    issues: &mut Vec<String>,
) -> Option<EmailRecord> {
    let Some(ts_raw) = first_present(record, &["receivedDateTime", "sentDateTime"]) else {
        issues.push(format!("Email {idx}: Missing timestamp - SKIPPED"));
        return None;
    };
    let Some(timestamp) = parse_timestamp(ts_raw) else {
        issues.push(format!("Email {idx}: Invalid timestamp format - SKIPPED"));
        return None;
    };

    let from = record.get("from").and_then(address_of).unwrap_or_else(|| {
        issues.push(format!("Email {idx}: Missing sender info"));
        UNKNOWN_SENDER.to_string()
    });

    let recipients = match record.get("toRecipients") {
        Some(Value::Array(list)) => list.iter().filter_map(address_of).collect(),
        _ => Vec::new(),
    };

    Some(EmailRecord {
        id: string_field(record, "id"),
        timestamp,
        from,
        subject: string_field(record, "subject"),
        recipients,
    })
}

fn clean_worklog(
    idx: usize,
    record: &Map<String, Value>,
    issues: &mut Vec<String>,
) -> Option<WorklogEntry> {
    let Some(started_raw) = first_present(record, &["started"]) else {
        issues.push(format!("Worklog {idx}: Missing start time - SKIPPED"));
        return None;
    };
    let Some(started) = parse_timestamp(started_raw) else {
        issues.push(format!("Worklog {idx}: Invalid start time format - SKIPPED"));
        return None;
    };

    let spent = first_present(record, &["time_spent_seconds", "timeSpentSeconds"])
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|s| s.is_finite() && *s >= 0.0);
    let time_spent_seconds = spent.unwrap_or_else(|| {
        issues.push(format!("Worklog {idx}: Missing time spent - using 0"));
        0.0
    });

    Some(WorklogEntry {
        id: string_field(record, "id"),
        issue_key: string_field(record, "issue_key").or_else(|| string_field(record, "issueId")),
        started,
        time_spent_seconds,
        author: record.get("author").and_then(address_of),
    })
}

fn task_key(
    idx: usize,
    record: &Map<String, Value>,
    keys: &[&str],
    issues: &mut Vec<String>,
) -> String {
    keys.iter()
        .find_map(|k| string_field(record, k))
        .unwrap_or_else(|| {
            issues.push(format!("Task {idx}: Missing ID - generating one"));
            format!("TASK-{idx}")
        })
}

fn creation_date(
    idx: usize,
    record: &Map<String, Value>,
    key: &str,
    issues: &mut Vec<String>,
) -> Option<chrono::DateTime<chrono::Utc>> {
    match record.get(key) {
        v if !is_present(v) => {
            issues.push(format!("Task {idx}: Missing creation date"));
            None
        }
        Some(v) => {
            let parsed = parse_timestamp(v);
            if parsed.is_none() {
                issues.push(format!("Task {idx}: Invalid creation date"));
            }
            parsed
        }
        None => None,
    }
}

fn assignee_of(record: &Map<String, Value>) -> Option<String> {
    record.get("assignee").and_then(address_of)
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?;
    NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok()
}

/// Pull a person identifier out of the shapes providers use
fn address_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(o) => o
            .get("emailAddress")
            .and_then(address_of)
            .or_else(|| o.get("user").and_then(address_of))
            .or_else(|| {
                ["address", "email", "accountId", "gid", "id", "displayName", "name"]
                    .iter()
                    .find_map(|k| o.get(*k).and_then(Value::as_str))
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string)
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn calendar_batch(records: Vec<Value>) -> RawEventBatch {
        RawEventBatch::new(SourceType::CalendarEvents, records)
    }

    fn full_event() -> Value {
        json!({
            "id": "evt-1",
            "subject": "Standup",
            "start": {"dateTime": "2024-01-15T09:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2024-01-15T09:30:00.0000000", "timeZone": "UTC"},
            "attendees": [{"emailAddress": {"address": "a@corp.com"}}]
        })
    }

    #[test]
    fn test_calendar_missing_end_dropped_with_one_issue() {
        let mut event = full_event();
        event.as_object_mut().unwrap().remove("end");
        let batch = calendar_batch(vec![full_event(), event]);

        let (cleaned, issues) = DataValidator::clean(&batch);

        assert_eq!(cleaned.len(), 1);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("Missing start/end time"));
        assert!(issues[0].starts_with("Event 1"));
    }

    #[test]
    fn test_calendar_defaults_subject_and_attendees() {
        let batch = calendar_batch(vec![json!({
            "start": {"dateTime": "2024-01-15T09:00:00Z"},
            "end": {"dateTime": "2024-01-15T10:00:00Z"}
        })]);

        let (cleaned, issues) = DataValidator::clean(&batch);

        let CleanedRecords::Calendar(events) = cleaned.records else {
            panic!("expected calendar records");
        };
        assert_eq!(events[0].subject, DEFAULT_MEETING_SUBJECT);
        assert!(events[0].attendees.is_empty());
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_calendar_invalid_format_dropped() {
        let batch = calendar_batch(vec![json!({
            "subject": "x",
            "attendees": [],
            "start": {"timeZone": "UTC"},
            "end": {"dateTime": "2024-01-15T10:00:00Z"}
        })]);

        let (cleaned, issues) = DataValidator::clean(&batch);
        assert!(cleaned.is_empty());
        assert_eq!(issues, vec!["Event 0: Invalid start time format - SKIPPED".to_string()]);
    }

    #[test]
    fn test_non_object_record_is_corrupt() {
        let batch = calendar_batch(vec![json!("garbage"), full_event()]);
        let (cleaned, issues) = DataValidator::clean(&batch);
        assert_eq!(cleaned.len(), 1);
        assert!(issues[0].contains("Corrupt data"));
    }

    #[test]
    fn test_messages_repair_and_drop() {
        let batch = RawEventBatch::new(
            SourceType::TeamsMessages,
            vec![
                json!({"createdDateTime": "2024-01-15T09:00:00Z", "body": {"content": "hi"}}),
                json!({"id": "m2", "body": {"content": "no timestamp"}}),
                json!({"id": "m3", "createdDateTime": "2024-01-15T10:00:00Z"}),
                json!({"id": "m4", "createdDateTime": "2024-01-15T11:00:00Z", "body": {"contentType": "html"}}),
            ],
        );

        let (cleaned, issues) = DataValidator::clean(&batch);
        let CleanedRecords::Messages(messages) = cleaned.records else {
            panic!("expected messages");
        };

        assert_eq!(messages.len(), 3);
        assert!(messages[0].id.starts_with("generated_0_"));
        assert_eq!(messages[1].content, "");
        assert_eq!(messages[2].content, "");
        assert_eq!(
            issues,
            vec![
                "Message 0: Missing ID - generating one".to_string(),
                "Message 1: Missing timestamp - SKIPPED".to_string(),
                "Message 2: Empty message body".to_string(),
                "Message 3: Missing body content - defaulted".to_string(),
            ]
        );
    }

    #[test]
    fn test_slack_messages_use_ts_and_thread() {
        let batch = RawEventBatch::new(
            SourceType::SlackMessages,
            vec![json!({"client_msg_id": "c1", "ts": "1705309200.000100", "text": "hey", "user": "U1", "thread_ts": "1705309100.000000"})],
        );
        let (cleaned, issues) = DataValidator::clean(&batch);
        let CleanedRecords::Messages(messages) = cleaned.records else {
            panic!("expected messages");
        };
        assert!(issues.is_empty());
        assert_eq!(messages[0].source, MessageSource::Slack);
        assert_eq!(messages[0].sender.as_deref(), Some("U1"));
        assert_eq!(messages[0].thread_id.as_deref(), Some("1705309100.000000"));
    }

    #[test]
    fn test_tasks_keep_records_with_defaults() {
        let batch = RawEventBatch::new(
            SourceType::JiraTasks,
            vec![
                json!({"key": "P-1", "status": {"name": "Done"}, "created": "2024-01-01T10:00:00.000+0000"}),
                json!({"status": ""}),
            ],
        );

        let (cleaned, issues) = DataValidator::clean(&batch);
        let CleanedRecords::Tasks(tasks) = cleaned.records else {
            panic!("expected tasks");
        };

        assert_eq!(tasks.len(), 2);
        assert!(tasks[0].completed);
        assert_eq!(tasks[1].key, "TASK-1");
        assert_eq!(tasks[1].status, DEFAULT_TASK_STATUS);
        assert!(tasks[1].created.is_none());
        assert_eq!(issues.len(), 3);
    }

    #[test]
    fn test_asana_tasks() {
        let batch = RawEventBatch::new(
            SourceType::AsanaTasks,
            vec![json!({"gid": "12", "completed": false, "created_at": "2024-01-01T00:00:00Z", "due_on": "2024-01-10"})],
        );
        let (cleaned, issues) = DataValidator::clean(&batch);
        let CleanedRecords::Tasks(tasks) = cleaned.records else {
            panic!("expected tasks");
        };
        assert!(issues.is_empty());
        assert_eq!(tasks[0].source, TaskSource::Asana);
        assert_eq!(tasks[0].due, NaiveDate::from_ymd_opt(2024, 1, 10));
    }

    #[test]
    fn test_emails_sender_placeholder_and_drop() {
        let batch = RawEventBatch::new(
            SourceType::Emails,
            vec![
                json!({"receivedDateTime": "2024-01-15T09:00:00Z"}),
                json!({"from": {"emailAddress": {"address": "x@corp.com"}}}),
            ],
        );
        let (cleaned, issues) = DataValidator::clean(&batch);
        let CleanedRecords::Emails(emails) = cleaned.records else {
            panic!("expected emails");
        };
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].from, UNKNOWN_SENDER);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_worklogs() {
        let batch = RawEventBatch::new(
            SourceType::JiraWorklogs,
            vec![
                json!({"started": "2024-01-15T09:00:00.000+0000", "time_spent_seconds": 7200}),
                json!({"started": "2024-01-15T13:00:00.000+0000", "time_spent_seconds": "n/a"}),
                json!({"time_spent_seconds": 60}),
            ],
        );
        let (cleaned, issues) = DataValidator::clean(&batch);
        let CleanedRecords::Worklogs(logs) = cleaned.records else {
            panic!("expected worklogs");
        };
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].time_spent_seconds, 7200.0);
        assert_eq!(logs[1].time_spent_seconds, 0.0);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_cleaned_never_exceeds_original() {
        let records = vec![json!(1), json!({}), full_event(), json!({"start": "x", "end": "y"})];
        for source in SourceType::ALL {
            let batch = RawEventBatch::new(source, records.clone());
            let (cleaned, _) = DataValidator::clean(&batch);
            assert!(cleaned.len() <= batch.len());
        }
    }

    #[test]
    fn test_merge_into_slots() {
        let (cleaned, _) = DataValidator::clean(&calendar_batch(vec![full_event()]));
        let mut batches = ActivityBatches::default();
        cleaned.merge_into(&mut batches);
        assert_eq!(batches.calendar_events.len(), 1);
    }
}
