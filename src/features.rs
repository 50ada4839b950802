//! Feature extraction
//!
//! This module derives the fixed 23-feature model input from normalized
//! activity batches:
//! - Meeting load from calendar events
//! - Communication volume and rhythm from chat messages
//! - Task throughput and aging from Jira or Asana
//! - Work hours from Jira worklogs or calendar day spans
//! - Attendance counters (documented defaults)
//!
//! Every block has a documented default used when its source is empty, so a
//! feature map is always complete.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{
    ActivityBatches, CalendarEvent, ChatMessage, FeatureBlock, FeatureExtractionSummary,
    MessageSource, TaskRecord, TaskSource, WorklogEntry,
};

/// Number of features in the model input
pub const FEATURE_COUNT: usize = 23;

/// Open Jira tasks older than this many days count as overdue
pub const JIRA_OVERDUE_AFTER_DAYS: i64 = 14;

/// Received messages are estimated from sent volume
const RECEIVED_PER_SENT: f64 = 1.2;

/// Response latency is not observable from provider data
const RESPONSE_LATENCY_MIN: f64 = 10.0;

/// Task window used when no task has a creation date
const DEFAULT_TASK_WEEKS: f64 = 2.0;

/// Calendar-derived workdays are never shorter than this
const MIN_CALENDAR_DAY_HOURS: f64 = 8.0;

const WORKDAYS_PER_WEEK: f64 = 5.0;

macro_rules! feature_map {
    ($($(#[$doc:meta])* $name:ident),+ $(,)?) => {
        /// Fixed-schema model input
        ///
        /// Counts are stored as whole-number floats.
        #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
        pub struct FeatureMap {
            $($(#[$doc])* pub $name: f64,)+
        }

        /// Feature names in model input order
        pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [$(stringify!($name)),+];

        impl FeatureMap {
            /// Look up a feature by name
            pub fn get(&self, name: &str) -> Option<f64> {
                match name {
                    $(stringify!($name) => Some(self.$name),)+
                    _ => None,
                }
            }

            /// Set a feature by name, returning false for unknown names
            pub fn set(&mut self, name: &str, value: f64) -> bool {
                match name {
                    $(stringify!($name) => {
                        self.$name = value;
                        true
                    })+
                    _ => false,
                }
            }

            /// Ordered vector view in [`FEATURE_NAMES`] order
            pub fn to_vector(&self) -> Vec<f64> {
                vec![$(self.$name),+]
            }
        }
    };
}

feature_map! {
    meeting_hours_per_week,
    meeting_counts_per_week,
    messages_sent_per_week,
    messages_received_per_week,
    avg_response_latency_min,
    /// Coefficient of variation of inter-message gaps, capped at 1
    communication_burstiness,
    after_hours_message_ratio,
    /// Sent over received
    communication_balance,
    conversation_length_avg,
    avg_tasks_assigned_per_week,
    avg_tasks_completed_per_week,
    task_completion_rate,
    avg_task_age_days,
    overdue_task_ratio,
    task_comment_sentiment_mean,
    logged_hours_per_week,
    variance_in_work_hours,
    late_start_count_per_week,
    early_exit_count_per_week,
    early_start_count_per_week,
    late_exit_count_per_week,
    absenteeism_rate,
    avg_break_length_minutes_per_week,
}

impl FeatureMap {
    /// Iterate `(name, value)` pairs in model input order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        FEATURE_NAMES.into_iter().zip(self.to_vector())
    }

    /// Build a feature map from a loosely typed JSON object
    ///
    /// Missing, null and non-numeric values become `0.0`. Numeric strings and
    /// booleans are converted. Every coercion and every unknown key produces an
    /// issue string.
    pub fn from_json_map(values: &Map<String, Value>) -> (FeatureMap, Vec<String>) {
        let mut features = FeatureMap::default();
        let mut issues = Vec::new();

        for name in FEATURE_NAMES {
            let value = match values.get(name) {
                None | Some(Value::Null) => {
                    issues.push(format!("{name}: missing value - using 0.0"));
                    0.0
                }
                Some(raw) => match coerce_number(raw) {
                    Some(v) if v.is_finite() => v,
                    _ => {
                        issues.push(format!("{name}: non-numeric value {raw} - using 0.0"));
                        0.0
                    }
                },
            };
            features.set(name, value);
        }

        for key in values.keys() {
            if !FEATURE_NAMES.contains(&key.as_str()) {
                issues.push(format!("{key}: unknown feature - ignored"));
            }
        }

        (features, issues)
    }

    /// Replace non-finite values with `0.0`, returning one issue per replacement
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut issues = Vec::new();
        for name in FEATURE_NAMES {
            if let Some(value) = self.get(name) {
                if !value.is_finite() {
                    self.set(name, 0.0);
                    issues.push(format!("{name}: non-finite value {value} - using 0.0"));
                }
            }
        }
        issues
    }

    /// Percentage of features with a non-zero value
    pub fn completeness(&self) -> f64 {
        let non_zero = self.iter().filter(|(_, v)| *v != 0.0).count();
        round2(non_zero as f64 / FEATURE_COUNT as f64 * 100.0)
    }

    pub fn is_finite(&self) -> bool {
        self.iter().all(|(_, v)| v.is_finite())
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Local-time settings for extraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionSettings {
    /// Offset of the employee's working day from UTC
    pub utc_offset_minutes: i32,
    /// Messages before this local hour are after hours
    pub day_start_hour: u32,
    /// Messages at or after this local hour are after hours
    pub day_end_hour: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            day_start_hour: 8,
            day_end_hour: 18,
        }
    }
}

impl ExtractionSettings {
    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset()).date_naive()
    }
}

/// Borrowed extraction inputs with their resolved providers
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub calendar: &'a [CalendarEvent],
    pub messages: &'a [ChatMessage],
    pub tasks: &'a [TaskRecord],
    pub worklogs: &'a [WorklogEntry],
    pub message_source: MessageSource,
    pub task_source: TaskSource,
}

impl<'a> ExtractionInput<'a> {
    /// Select inputs from normalized batches
    ///
    /// Teams messages are used unless only Slack delivered any. Jira tasks are
    /// used unless only Asana delivered any.
    pub fn from_batches(batches: &'a ActivityBatches) -> Self {
        let (messages, message_source) =
            if batches.teams_messages.is_empty() && !batches.slack_messages.is_empty() {
                (&batches.slack_messages[..], MessageSource::Slack)
            } else {
                (&batches.teams_messages[..], MessageSource::Teams)
            };

        let (tasks, task_source) =
            if batches.jira_tasks.is_empty() && !batches.asana_tasks.is_empty() {
                (&batches.asana_tasks[..], TaskSource::Asana)
            } else {
                (&batches.jira_tasks[..], TaskSource::Jira)
            };

        Self {
            calendar: &batches.calendar_events,
            messages,
            tasks,
            worklogs: &batches.jira_worklogs,
            message_source,
            task_source,
        }
    }
}

/// Extraction result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFeatures {
    pub features: FeatureMap,
    /// Blocks filled from documented defaults
    pub defaulted_blocks: Vec<FeatureBlock>,
    pub message_source: MessageSource,
    pub task_source: TaskSource,
}

impl ExtractedFeatures {
    pub fn summary(&self) -> FeatureExtractionSummary {
        FeatureExtractionSummary {
            total_features: FEATURE_COUNT,
            feature_completeness: self.features.completeness(),
            defaulted_blocks: self.defaulted_blocks.clone(),
            message_source: self.message_source,
            task_source: self.task_source,
        }
    }

    /// Number of features that came from a defaulted block
    pub fn defaulted_feature_count(&self) -> usize {
        self.defaulted_blocks.iter().map(FeatureBlock::feature_count).sum()
    }
}

/// Feature extractor
///
/// Pure given its inputs and the supplied `now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor {
    settings: ExtractionSettings,
}

impl FeatureExtractor {
    pub fn new(settings: ExtractionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    /// Extract the full feature map from normalized batches
    pub fn extract_batches(&self, batches: &ActivityBatches, now: DateTime<Utc>) -> ExtractedFeatures {
        self.extract(&ExtractionInput::from_batches(batches), now)
    }

    /// Extract the full feature map
    pub fn extract(&self, input: &ExtractionInput<'_>, now: DateTime<Utc>) -> ExtractedFeatures {
        let mut features = FeatureMap::default();
        let mut defaulted_blocks = Vec::new();

        if !self.fill_meetings(&mut features, input.calendar) {
            defaulted_blocks.push(FeatureBlock::Meetings);
        }
        if !self.fill_communication(&mut features, input.messages) {
            defaulted_blocks.push(FeatureBlock::Communication);
        }
        if !fill_tasks(&mut features, input.tasks, now) {
            defaulted_blocks.push(FeatureBlock::Tasks);
        }
        if !self.fill_work_hours(&mut features, input.worklogs, input.calendar) {
            defaulted_blocks.push(FeatureBlock::WorkHours);
        }
        fill_attendance(&mut features);
        defaulted_blocks.push(FeatureBlock::Attendance);

        ExtractedFeatures {
            features,
            defaulted_blocks,
            message_source: input.message_source,
            task_source: input.task_source,
        }
    }

    /// Meeting load; returns false when the default block was used
    fn fill_meetings(&self, features: &mut FeatureMap, events: &[CalendarEvent]) -> bool {
        if events.is_empty() {
            features.meeting_hours_per_week = 8.0;
            features.meeting_counts_per_week = 10.0;
            return false;
        }

        let timed: Vec<&CalendarEvent> = events.iter().filter(|e| !e.is_all_day).collect();
        let total_hours: f64 = timed.iter().map(|e| e.duration_hours()).sum();
        let weeks = weeks_spanned(timed.iter().map(|e| e.start));

        features.meeting_hours_per_week = round2(total_hours / weeks);
        features.meeting_counts_per_week = (timed.len() as f64 / weeks).trunc();
        true
    }

    fn fill_communication(&self, features: &mut FeatureMap, messages: &[ChatMessage]) -> bool {
        if messages.is_empty() {
            features.messages_sent_per_week = 70.0;
            features.messages_received_per_week = 100.0;
            features.avg_response_latency_min = RESPONSE_LATENCY_MIN;
            features.communication_burstiness = 0.3;
            features.after_hours_message_ratio = 0.1;
            features.communication_balance = 0.7;
            features.conversation_length_avg = 12.0;
            return false;
        }

        let mut timestamps: Vec<DateTime<Utc>> = messages.iter().map(|m| m.timestamp).collect();
        timestamps.sort();
        let weeks = weeks_spanned(timestamps.iter().copied());

        let sent = messages.len() as f64;
        let received = (sent * RECEIVED_PER_SENT).trunc();
        let balance = if received > 0.0 { sent / received } else { 1.0 };

        let offset = self.settings.offset();
        let after_hours = timestamps
            .iter()
            .filter(|ts| {
                let hour = ts.with_timezone(&offset).hour();
                hour < self.settings.day_start_hour || hour >= self.settings.day_end_hour
            })
            .count();

        features.messages_sent_per_week = (sent / weeks).trunc();
        features.messages_received_per_week = (received / weeks).trunc();
        features.avg_response_latency_min = RESPONSE_LATENCY_MIN;
        features.communication_burstiness = round2(burstiness(&timestamps).min(1.0));
        features.after_hours_message_ratio = round2(after_hours as f64 / sent);
        features.communication_balance = round2(balance);
        features.conversation_length_avg = round2(conversation_length(messages));
        true
    }

    fn fill_work_hours(
        &self,
        features: &mut FeatureMap,
        worklogs: &[WorklogEntry],
        calendar: &[CalendarEvent],
    ) -> bool {
        let daily_hours: Vec<f64> = if !worklogs.is_empty() {
            let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
            for log in worklogs {
                *by_day.entry(self.settings.local_date(log.started)).or_default() +=
                    log.time_spent_seconds / 3600.0;
            }
            by_day.into_values().collect()
        } else {
            let mut spans: BTreeMap<NaiveDate, (DateTime<Utc>, DateTime<Utc>)> = BTreeMap::new();
            for event in calendar.iter().filter(|e| !e.is_all_day) {
                spans
                    .entry(self.settings.local_date(event.start))
                    .and_modify(|(first, last)| {
                        *first = (*first).min(event.start);
                        *last = (*last).max(event.end);
                    })
                    .or_insert((event.start, event.end));
            }
            spans
                .into_values()
                .map(|(first, last)| ((last - first).num_seconds() as f64 / 3600.0).max(0.0))
                .collect()
        };

        if daily_hours.is_empty() {
            features.logged_hours_per_week = 40.0;
            features.variance_in_work_hours = 1.0;
            return false;
        }

        let (mean, variance) = mean_and_variance(&daily_hours);
        let mean = if worklogs.is_empty() {
            mean.max(MIN_CALENDAR_DAY_HOURS)
        } else {
            mean
        };

        features.logged_hours_per_week = round2(mean * WORKDAYS_PER_WEEK);
        features.variance_in_work_hours = round2(variance);
        true
    }
}

fn fill_tasks(features: &mut FeatureMap, tasks: &[TaskRecord], now: DateTime<Utc>) -> bool {
    if tasks.is_empty() {
        features.avg_tasks_assigned_per_week = 20.0;
        features.avg_tasks_completed_per_week = 16.0;
        features.task_completion_rate = 0.8;
        features.avg_task_age_days = 7.0;
        features.overdue_task_ratio = 0.2;
        features.task_comment_sentiment_mean = 0.0;
        return false;
    }

    let total = tasks.len() as f64;
    let completed = tasks.iter().filter(|t| t.completed).count() as f64;
    let overdue = tasks.iter().filter(|t| is_overdue(t, now)).count() as f64;

    let ages: Vec<f64> = tasks
        .iter()
        .filter_map(|t| {
            let created = t.created?;
            let until = t.resolved.unwrap_or(now);
            Some((until - created).num_days() as f64)
        })
        .collect();

    let weeks = ages
        .iter()
        .copied()
        .reduce(f64::max)
        .map_or(DEFAULT_TASK_WEEKS, |max_age| (max_age / 7.0).max(1.0));
    let avg_age = if ages.is_empty() {
        0.0
    } else {
        ages.iter().sum::<f64>() / ages.len() as f64
    };

    features.avg_tasks_assigned_per_week = (total / weeks).trunc();
    features.avg_tasks_completed_per_week = (completed / weeks).trunc();
    features.task_completion_rate = round2(completed / total);
    features.avg_task_age_days = round2(avg_age);
    features.overdue_task_ratio = round2(overdue / total);
    features.task_comment_sentiment_mean = 0.0;
    true
}

fn is_overdue(task: &TaskRecord, now: DateTime<Utc>) -> bool {
    if task.completed {
        return false;
    }
    match task.source {
        TaskSource::Jira => task
            .created
            .map_or(false, |c| (now - c).num_days() > JIRA_OVERDUE_AFTER_DAYS),
        TaskSource::Asana => task
            .due
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(false, |due| now.naive_utc() > due),
    }
}

fn fill_attendance(features: &mut FeatureMap) {
    features.late_start_count_per_week = 3.0;
    features.early_exit_count_per_week = 1.0;
    features.early_start_count_per_week = 2.0;
    features.late_exit_count_per_week = 1.0;
    features.absenteeism_rate = 0.03;
    features.avg_break_length_minutes_per_week = 45.0;
}

/// Weeks covered by a set of instants, never less than one
fn weeks_spanned(instants: impl Iterator<Item = DateTime<Utc>>) -> f64 {
    let bounds = instants.fold(None, |acc: Option<(DateTime<Utc>, DateTime<Utc>)>, ts| {
        Some(acc.map_or((ts, ts), |(lo, hi)| (lo.min(ts), hi.max(ts))))
    });
    bounds.map_or(1.0, |(lo, hi)| ((hi - lo).num_days() as f64 / 7.0).max(1.0))
}

/// Coefficient of variation of gaps between sorted timestamps, in minutes
fn burstiness(sorted: &[DateTime<Utc>]) -> f64 {
    let gaps: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 60_000.0)
        .collect();
    if gaps.is_empty() {
        return 0.0;
    }
    let (mean, variance) = mean_and_variance(&gaps);
    if mean > 0.0 {
        variance.sqrt() / mean
    } else {
        0.0
    }
}

/// Mean messages per thread, 12.0 when no message carries a thread id
fn conversation_length(messages: &[ChatMessage]) -> f64 {
    if messages.iter().all(|m| m.thread_id.is_none()) {
        return 12.0;
    }
    let threads: BTreeSet<&str> = messages
        .iter()
        .map(|m| m.thread_id.as_deref().unwrap_or(&m.id))
        .collect();
    messages.len() as f64 / threads.len() as f64
}

/// Population mean and variance
fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
