//! Normalization and anonymization of cleaned batches
//!
//! The pipeline depends only on the [`Preprocessor`] trait. [`Anonymizer`] is
//! the built-in implementation: it orders every batch chronologically, drops
//! duplicate records and replaces people identifiers with salted pseudonyms.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::error::PipelineError;
use crate::types::{CleanedBatches, NormalizedBatches};

/// Placeholder for free text removed during anonymization
pub const REDACTED: &str = "[redacted]";

/// Prefix of every generated pseudonym
pub const PSEUDONYM_PREFIX: &str = "anon_";

/// Injected preprocessing stage
///
/// Implementations must be deterministic for a given input.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn preprocess(&self, batches: CleanedBatches) -> Result<NormalizedBatches, PipelineError>;
}

/// Built-in preprocessor
#[derive(Debug, Clone)]
pub struct Anonymizer {
    enabled: bool,
    salt: String,
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self::new(true, "")
    }
}

impl Anonymizer {
    pub fn new(enabled: bool, salt: impl Into<String>) -> Self {
        Self {
            enabled,
            salt: salt.into(),
        }
    }

    /// Normalizer that keeps identifying fields
    pub fn passthrough() -> Self {
        Self::new(false, "")
    }

    /// Stable pseudonym for a person identifier
    pub fn pseudonym(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(b":");
        hasher.update(value.trim().to_lowercase().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{PSEUDONYM_PREFIX}{}", &digest[..16])
    }

    /// Synchronous normalization, see [`Preprocessor::preprocess`]
    pub fn normalize(&self, mut batches: CleanedBatches) -> NormalizedBatches {
        batches.calendar_events.sort_by_key(|e| e.start);
        dedup_by(&mut batches.calendar_events, |e| e.id.clone());

        for messages in [&mut batches.teams_messages, &mut batches.slack_messages] {
            messages.sort_by_key(|m| m.timestamp);
            dedup_by(messages, |m| Some(m.id.clone()));
        }

        batches.emails.sort_by_key(|e| e.timestamp);
        dedup_by(&mut batches.emails, |e| e.id.clone());

        for tasks in [&mut batches.jira_tasks, &mut batches.asana_tasks] {
            tasks.sort_by_key(|t| t.created);
            dedup_by(tasks, |t| Some(t.key.clone()));
        }

        batches.jira_worklogs.sort_by_key(|w| w.started);
        dedup_by(&mut batches.jira_worklogs, |w| w.id.clone());

        if self.enabled {
            self.anonymize(&mut batches);
        }

        NormalizedBatches {
            batches,
            anonymized: self.enabled,
        }
    }

    fn anonymize(&self, batches: &mut CleanedBatches) {
        for event in &mut batches.calendar_events {
            event.subject = REDACTED.to_string();
            event.attendees = event.attendees.iter().map(|a| self.pseudonym(a)).collect();
            event.organizer = event.organizer.as_deref().map(|o| self.pseudonym(o));
        }

        for message in batches
            .teams_messages
            .iter_mut()
            .chain(batches.slack_messages.iter_mut())
        {
            message.content.clear();
            message.sender = message.sender.as_deref().map(|s| self.pseudonym(s));
        }

        for email in &mut batches.emails {
            email.from = self.pseudonym(&email.from);
            email.subject = email.subject.as_ref().map(|_| REDACTED.to_string());
            email.recipients = email.recipients.iter().map(|r| self.pseudonym(r)).collect();
        }

        for task in batches
            .jira_tasks
            .iter_mut()
            .chain(batches.asana_tasks.iter_mut())
        {
            task.assignee = task.assignee.as_deref().map(|a| self.pseudonym(a));
        }

        for log in &mut batches.jira_worklogs {
            log.author = log.author.as_deref().map(|a| self.pseudonym(a));
        }
    }
}

#[async_trait]
impl Preprocessor for Anonymizer {
    async fn preprocess(&self, batches: CleanedBatches) -> Result<NormalizedBatches, PipelineError> {
        Ok(self.normalize(batches))
    }
}

/// Keep the first record for each identifier; records without one are kept
fn dedup_by<T>(items: &mut Vec<T>, key: impl Fn(&T) -> Option<String>) {
    let mut seen = BTreeSet::new();
    items.retain(|item| match key(item) {
        Some(k) => seen.insert(k),
        None => true,
    });
}
