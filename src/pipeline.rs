//! Stream pipeline orchestration
//!
//! Raw provider batches flow through four strictly ordered stages:
//! 1. DataValidator - Clean each source batch and record its quality
//! 2. Preprocessor - Normalize and anonymize (injected)
//! 3. FeatureExtractor - Derive the 23-feature map
//! 4. Coercion - Replace non-finite values so the map is model ready
//!
//! A source that cannot be validated at all is reported and skipped. A
//! preprocessing or extraction failure fails the run; no partial feature map
//! is ever returned.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::PulseConfig;
use crate::error::PipelineError;
use crate::features::FeatureExtractor;
use crate::preprocess::{Anonymizer, Preprocessor};
use crate::schema::{RawEventBatch, RawStreamData, SourceType};
use crate::types::{
    CleanedBatches, PipelineOutput, PipelineStatus, PipelineSummary, SourceQuality,
    ValidationReport,
};
use crate::validator::DataValidator;

/// Orchestrator for one user's raw activity stream
///
/// Holds no per-run state, so a single instance serves concurrent runs.
pub struct StreamPipeline {
    preprocessor: Arc<dyn Preprocessor>,
    extractor: FeatureExtractor,
    clock: Arc<dyn Clock>,
}

impl StreamPipeline {
    pub fn new(
        preprocessor: Arc<dyn Preprocessor>,
        extractor: FeatureExtractor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            preprocessor,
            extractor,
            clock,
        }
    }

    /// Pipeline with the built-in anonymizer and the system clock
    pub fn from_config(config: &PulseConfig) -> Self {
        Self::new(
            Arc::new(Anonymizer::new(
                config.privacy.anonymize,
                config.privacy.salt.clone(),
            )),
            FeatureExtractor::new(config.extraction_settings()),
            Arc::new(SystemClock),
        )
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run all four stages for one user
    pub async fn process(
        &self,
        raw: &RawStreamData,
        user_id: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let started = Instant::now();
        let now = self.clock.now();
        let run_id = Uuid::new_v4().to_string();

        info!(user_id, run_id = %run_id, sources = raw.len(), "Starting stream pipeline");

        // Stage 1: validate and clean
        let mut report = ValidationReport::new(user_id, now);
        let (cleaned, status) = validate_stream(raw, &mut report);
        info!(
            user_id,
            records = cleaned.total(),
            total_issues = report.total_issues,
            data_quality_score = report.data_quality_score,
            "Validation complete"
        );

        // Stage 2: preprocess
        let normalized = self.preprocessor.preprocess(cleaned).await?;
        report.preprocessing = normalized.batches.counts();
        debug!(user_id, anonymized = normalized.anonymized, "Preprocessing complete");

        // Stage 3: extract
        let extractor = self.extractor;
        let extracted = tokio::task::spawn_blocking(move || {
            extractor.extract_batches(&normalized.batches, now)
        })
        .await
        .map_err(|e| PipelineError::Extraction(e.to_string()))?;
        report.feature_extraction = Some(extracted.summary());

        // Stage 4: coerce
        let mut features = extracted.features;
        let coercion_issues = features.sanitize();
        if !coercion_issues.is_empty() {
            warn!(user_id, count = coercion_issues.len(), "Coerced non-finite features to 0.0");
        }
        report.coercion_issues = coercion_issues;

        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        report.pipeline_summary = Some(PipelineSummary {
            status,
            processing_time_ms,
            ready_for_inference: true,
        });

        info!(
            user_id,
            run_id = %run_id,
            status = ?status,
            processing_time_ms,
            "Stream pipeline complete"
        );

        Ok(PipelineOutput {
            status,
            run_id,
            user_id: user_id.to_string(),
            features,
            validation_report: report,
            processed_at: now,
        })
    }
}

/// Validate every non-empty source, recording one report stage per source
///
/// Returns the cleaned batches and whether any source had to be skipped.
pub fn validate_stream(
    raw: &RawStreamData,
    report: &mut ValidationReport,
) -> (CleanedBatches, PipelineStatus) {
    let mut cleaned = CleanedBatches::default();
    let mut status = PipelineStatus::Success;

    for (key, value) in raw.iter() {
        let source = SourceType::from_key(key);
        let records = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Array(records) if records.is_empty() => continue,
            serde_json::Value::Array(records) => records,
            _ => {
                warn!(source = %key, "Source batch is not a list, skipping");
                report.record_stage(
                    key,
                    SourceQuality::new(1, 0, vec![format!("{key}: Expected a list of records - SKIPPED")]),
                );
                status = PipelineStatus::Partial;
                continue;
            }
        };

        let Some(source) = source else {
            warn!(source = %key, "Unknown source type, skipping");
            report.record_stage(
                key,
                SourceQuality::new(
                    records.len(),
                    0,
                    vec![format!("{key}: Unknown source type - SKIPPED")],
                ),
            );
            status = PipelineStatus::Partial;
            continue;
        };

        let batch = RawEventBatch::new(source, records.clone());
        let (batch_cleaned, issues) = DataValidator::clean(&batch);
        if !issues.is_empty() {
            warn!(source = %source, issues = issues.len(), "Records repaired or dropped");
        }
        for issue in &issues {
            debug!(source = %source, issue = %issue, "Validation issue");
        }

        report.record_stage(
            source.as_str(),
            SourceQuality::new(batch.len(), batch_cleaned.len(), issues),
        );
        batch_cleaned.merge_into(&mut cleaned);
    }

    (cleaned, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
    use crate::types::{FeatureBlock, NormalizedBatches};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pipeline() -> StreamPipeline {
        StreamPipeline::new(
            Arc::new(Anonymizer::new(true, "test")),
            FeatureExtractor::default(),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap())),
        )
    }

    fn sample_raw() -> RawStreamData {
        RawStreamData::from_json(
            &json!({
                "calendar_events": [
                    {
                        "id": "e1",
                        "subject": "Planning",
                        "start": {"dateTime": "2024-01-15T09:00:00"},
                        "end": {"dateTime": "2024-01-15T10:30:00"},
                        "attendees": []
                    },
                    {
                        "id": "e2",
                        "subject": "Broken",
                        "start": {"dateTime": "2024-01-16T09:00:00"}
                    }
                ],
                "teams_messages": [
                    {"id": "m1", "createdDateTime": "2024-01-15T09:05:00Z", "body": {"content": "hi"}},
                    {"id": "m2", "createdDateTime": "2024-01-15T19:30:00Z", "body": {"content": "late"}}
                ],
                "jira_tasks": [
                    {"key": "P-1", "status": "Done", "created": "2024-01-10T09:00:00.000+0000"}
                ],
                "emails": []
            })
            .to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_process_full_stream() {
        let output = pipeline().process(&sample_raw(), "user-1").await.unwrap();
        let report = &output.validation_report;

        assert_eq!(output.status, PipelineStatus::Success);
        assert_eq!(output.user_id, "user-1");
        // Empty email batch gets no stage entry
        assert_eq!(report.stages.len(), 3);

        let calendar = &report.stages["calendar_events"];
        assert_eq!(calendar.original_count, 2);
        assert_eq!(calendar.cleaned_count, 1);
        assert_eq!(calendar.issues.len(), 1);
        assert!(calendar.issues[0].contains("Missing start/end time"));

        assert_eq!(report.preprocessing["calendar_events"], 1);
        assert_eq!(output.features.meeting_hours_per_week, 1.5);
        assert_eq!(output.features.after_hours_message_ratio, 0.5);
        assert!(report.pipeline_summary.as_ref().unwrap().ready_for_inference);
    }

    #[tokio::test]
    async fn test_timestamps_follow_clock() {
        let output = pipeline().process(&sample_raw(), "user-1").await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        assert_eq!(output.processed_at, at);
        assert_eq!(output.validation_report.timestamp, at);
    }

    #[tokio::test]
    async fn test_empty_stream_uses_defaults() {
        let output = pipeline().process(&RawStreamData::new(), "user-2").await.unwrap();
        let report = &output.validation_report;

        assert_eq!(output.status, PipelineStatus::Success);
        assert!(report.stages.is_empty());
        assert_eq!(report.data_quality_score, 100.0);
        assert_eq!(output.features.meeting_hours_per_week, 8.0);
        assert_eq!(output.features.meeting_counts_per_week, 10.0);
        let summary = report.feature_extraction.as_ref().unwrap();
        assert_eq!(summary.total_features, FEATURE_COUNT);
        assert!(summary.defaulted_blocks.contains(&FeatureBlock::Meetings));
    }

    #[tokio::test]
    async fn test_every_feature_present_after_run() {
        let output = pipeline().process(&sample_raw(), "user-1").await.unwrap();
        let value = serde_json::to_value(output.features).unwrap();
        for name in FEATURE_NAMES {
            assert!(value[name].as_f64().unwrap().is_finite(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_bad_source_is_skipped_and_partial() {
        let mut raw = sample_raw();
        raw.insert_raw("slack_messages", json!({"oops": true}));
        raw.insert_raw("github_commits", json!([{"sha": "abc"}]));

        let output = pipeline().process(&raw, "user-3").await.unwrap();
        let report = &output.validation_report;

        assert_eq!(output.status, PipelineStatus::Partial);
        assert_eq!(report.stages["slack_messages"].cleaned_count, 0);
        assert_eq!(report.stages["github_commits"].original_count, 1);
        // Other sources still processed
        assert_eq!(report.stages["teams_messages"].cleaned_count, 2);
        assert_eq!(
            report.pipeline_summary.as_ref().unwrap().status,
            PipelineStatus::Partial
        );
    }

    struct FailingPreprocessor;

    #[async_trait]
    impl Preprocessor for FailingPreprocessor {
        async fn preprocess(
            &self,
            _batches: CleanedBatches,
        ) -> Result<NormalizedBatches, PipelineError> {
            Err(PipelineError::Preprocess("anonymizer unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_preprocess_failure_fails_run() {
        let pipeline = StreamPipeline::new(
            Arc::new(FailingPreprocessor),
            FeatureExtractor::default(),
            Arc::new(SystemClock),
        );
        let err = pipeline.process(&sample_raw(), "user-4").await.unwrap_err();
        assert!(matches!(err, PipelineError::Preprocess(_)));
    }

    #[tokio::test]
    async fn test_runs_are_deterministic_for_fixed_clock() {
        let p = pipeline();
        let a = p.process(&sample_raw(), "user-5").await.unwrap();
        let b = p.process(&sample_raw(), "user-5").await.unwrap();
        assert_eq!(a.features, b.features);
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_quality_score_matches_counts() {
        let raw = sample_raw();
        let mut report = ValidationReport::new("u", Utc::now());
        validate_stream(&raw, &mut report);
        for stage in report.stages.values() {
            assert!(stage.cleaned_count <= stage.original_count);
            let expected = stage.cleaned_count as f64 / stage.original_count as f64 * 100.0;
            assert_eq!(stage.quality_score, expected);
        }
    }
}
