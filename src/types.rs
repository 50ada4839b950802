//! Core types for the Workforce Pulse pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: cleaned activity records, normalized batches and the validation
//! report that accompanies every run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::features::FeatureMap;
use crate::schema::SourceType;

/// Chat provider a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    Teams,
    Slack,
}

impl MessageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageSource::Teams => "teams",
            MessageSource::Slack => "slack",
        }
    }
}

/// Ticketing provider a task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    Jira,
    Asana,
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSource::Jira => "jira",
            TaskSource::Asana => "asana",
        }
    }
}

/// Calendar event that passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Option<String>,
    pub subject: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub attendees: Vec<String>,
    pub organizer: Option<String>,
}

impl CalendarEvent {
    /// Event duration in hours (zero for inverted ranges)
    pub fn duration_hours(&self) -> f64 {
        let secs = (self.end - self.start).num_milliseconds() as f64 / 1000.0;
        (secs / 3600.0).max(0.0)
    }
}

/// Chat message that passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub source: MessageSource,
    pub timestamp: DateTime<Utc>,
    pub sender: Option<String>,
    pub content: String,
    /// Thread root identifier (Teams `replyToId`, Slack `thread_ts`)
    pub thread_id: Option<String>,
}

/// Task or issue that passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub key: String,
    pub source: TaskSource,
    pub status: String,
    pub completed: bool,
    pub created: Option<DateTime<Utc>>,
    /// Resolution (Jira) or completion (Asana) time
    pub resolved: Option<DateTime<Utc>>,
    pub due: Option<NaiveDate>,
    pub assignee: Option<String>,
}

/// Email that passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub subject: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Jira worklog entry that passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorklogEntry {
    pub id: Option<String>,
    pub issue_key: Option<String>,
    pub started: DateTime<Utc>,
    pub time_spent_seconds: f64,
    pub author: Option<String>,
}

/// Typed activity records grouped by source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityBatches {
    #[serde(default)]
    pub calendar_events: Vec<CalendarEvent>,
    #[serde(default)]
    pub teams_messages: Vec<ChatMessage>,
    #[serde(default)]
    pub slack_messages: Vec<ChatMessage>,
    #[serde(default)]
    pub emails: Vec<EmailRecord>,
    #[serde(default)]
    pub jira_tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub asana_tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub jira_worklogs: Vec<WorklogEntry>,
}

impl ActivityBatches {
    /// Record count per source
    pub fn counts(&self) -> BTreeMap<String, usize> {
        SourceType::ALL
            .into_iter()
            .map(|s| (s.as_str().to_string(), self.count(s)))
            .collect()
    }

    pub fn count(&self, source: SourceType) -> usize {
        match source {
            SourceType::CalendarEvents => self.calendar_events.len(),
            SourceType::TeamsMessages => self.teams_messages.len(),
            SourceType::SlackMessages => self.slack_messages.len(),
            SourceType::Emails => self.emails.len(),
            SourceType::JiraTasks => self.jira_tasks.len(),
            SourceType::AsanaTasks => self.asana_tasks.len(),
            SourceType::JiraWorklogs => self.jira_worklogs.len(),
        }
    }

    pub fn total(&self) -> usize {
        SourceType::ALL.into_iter().map(|s| self.count(s)).sum()
    }
}

/// Output of the validation stage
pub type CleanedBatches = ActivityBatches;

/// Output of the preprocessing stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBatches {
    pub batches: ActivityBatches,
    /// Whether identifying fields were replaced with pseudonyms
    pub anonymized: bool,
}

/// Quality entry for one source in the validation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceQuality {
    pub original_count: usize,
    pub cleaned_count: usize,
    pub issues: Vec<String>,
    pub quality_score: f64,
}

impl SourceQuality {
    pub fn new(original_count: usize, cleaned_count: usize, issues: Vec<String>) -> Self {
        Self {
            original_count,
            cleaned_count,
            issues,
            quality_score: quality_score(original_count, cleaned_count),
        }
    }
}

/// Percentage of records that survived validation (100 for an empty batch)
pub fn quality_score(original_count: usize, cleaned_count: usize) -> f64 {
    if original_count == 0 {
        100.0
    } else {
        cleaned_count as f64 / original_count as f64 * 100.0
    }
}

/// Feature groups that share a fallback default block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureBlock {
    Meetings,
    Communication,
    Tasks,
    WorkHours,
    Attendance,
}

impl FeatureBlock {
    /// Number of features the block fills
    pub fn feature_count(&self) -> usize {
        match self {
            FeatureBlock::Meetings => 2,
            FeatureBlock::Communication => 7,
            FeatureBlock::Tasks => 6,
            FeatureBlock::WorkHours => 2,
            FeatureBlock::Attendance => 6,
        }
    }
}

/// Summary of the extraction stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureExtractionSummary {
    pub total_features: usize,
    /// Percentage of features with a non-zero value
    pub feature_completeness: f64,
    /// Blocks that fell back to documented defaults
    pub defaulted_blocks: Vec<FeatureBlock>,
    pub message_source: MessageSource,
    pub task_source: TaskSource,
}

impl FeatureExtractionSummary {
    pub fn defaulted_feature_count(&self) -> usize {
        self.defaulted_blocks.iter().map(FeatureBlock::feature_count).sum()
    }
}

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Every provided source validated
    Success,
    /// At least one source failed wholesale and was skipped
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub status: PipelineStatus,
    pub processing_time_ms: f64,
    pub ready_for_inference: bool,
}

/// Validation and quality report produced alongside every feature map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub stages: BTreeMap<String, SourceQuality>,
    pub total_issues: usize,
    pub data_quality_score: f64,
    #[serde(default)]
    pub preprocessing: BTreeMap<String, usize>,
    pub feature_extraction: Option<FeatureExtractionSummary>,
    #[serde(default)]
    pub coercion_issues: Vec<String>,
    pub pipeline_summary: Option<PipelineSummary>,
}

impl ValidationReport {
    pub fn new(user_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            timestamp,
            stages: BTreeMap::new(),
            total_issues: 0,
            data_quality_score: 100.0,
            preprocessing: BTreeMap::new(),
            feature_extraction: None,
            coercion_issues: Vec::new(),
            pipeline_summary: None,
        }
    }

    /// Record one source's validation outcome and refresh the aggregates
    pub fn record_stage(&mut self, source: &str, quality: SourceQuality) {
        self.stages.insert(source.to_string(), quality);
        self.total_issues = self.stages.values().map(|s| s.issues.len()).sum();
        self.data_quality_score = if self.stages.is_empty() {
            100.0
        } else {
            self.stages.values().map(|s| s.quality_score).sum::<f64>() / self.stages.len() as f64
        };
    }
}

/// Result of one stream pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub status: PipelineStatus,
    pub run_id: String,
    pub user_id: String,
    pub features: FeatureMap,
    pub validation_report: ValidationReport,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_score_empty_is_full() {
        assert_eq!(quality_score(0, 0), 100.0);
        assert_eq!(quality_score(4, 3), 75.0);
    }

    #[test]
    fn test_report_aggregates() {
        let mut report = ValidationReport::new("u1", Utc::now());
        report.record_stage(
            "calendar_events",
            SourceQuality::new(4, 2, vec!["a".into(), "b".into()]),
        );
        report.record_stage("emails", SourceQuality::new(2, 2, vec![]));

        assert_eq!(report.total_issues, 2);
        assert!((report.data_quality_score - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_batch_counts_cover_every_source() {
        let batches = ActivityBatches::default();
        let counts = batches.counts();
        assert_eq!(counts.len(), SourceType::ALL.len());
        assert_eq!(batches.total(), 0);
    }
}
