//! End-to-end analytics service
//!
//! Ties the provider fetchers, the stream pipeline and the inference service
//! together. One instance is built at startup and shared by handle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::{PulseConfig, MAX_DAYS_BACK};
use crate::error::PipelineError;
use crate::features::{FeatureMap, FEATURE_COUNT};
use crate::inference::{
    FeatureInfo, InferenceOutput, InferenceStatus, ModelKind, ModelSet, ParallelInference,
};
use crate::pipeline::StreamPipeline;
use crate::schema::RawStreamData;
use crate::sources::{FetchOutcome, FetchWindow, Provider, SourceFailure, SourceRegistry, TokenProvider};
use crate::types::PipelineOutput;

/// Where the raw stream of a run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    /// Fetched from the provider APIs
    Api,
    /// Supplied by the caller
    Custom,
}

/// Timings of a full fetch, pipeline and inference run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPerformance {
    pub total_pipeline_time_ms: f64,
    /// Everything except inference: fetch, validation, preprocessing, extraction
    pub preprocessing_time_ms: f64,
    pub inference_time_ms: f64,
    pub models_executed: usize,
}

/// Result of [`WorkforceAnalytics::process_and_predict`]
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub data_source: DataOrigin,
    pub date_range: FetchWindow,
    pub providers_used: Vec<Provider>,
    pub data_counts: BTreeMap<String, usize>,
    pub source_failures: Vec<SourceFailure>,
    pub pipeline: PipelineOutput,
    pub inference: InferenceOutput,
    pub performance: RunPerformance,
}

/// Prediction over a caller-supplied feature map
#[derive(Debug, Clone, Serialize)]
pub struct CustomPrediction {
    pub features: FeatureMap,
    /// Features that were missing or unusable and scored as 0.0
    pub coercion_issues: Vec<String>,
    #[serde(flatten)]
    pub output: InferenceOutput,
}

/// Service status for the `doctor` command
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub version: &'static str,
    pub models: Vec<ModelKind>,
    pub worker_pool_size: usize,
    pub available_workers: usize,
    pub model_timeout_ms: u64,
    pub providers: Vec<Provider>,
    pub analysis_days_back: u32,
}

pub struct WorkforceAnalytics {
    pipeline: StreamPipeline,
    inference: ParallelInference,
    sources: Option<SourceRegistry>,
    days_back: u32,
}

impl WorkforceAnalytics {
    pub fn new(pipeline: StreamPipeline, inference: ParallelInference) -> Self {
        Self {
            pipeline,
            inference,
            sources: None,
            days_back: PulseConfig::default().analysis_days_back,
        }
    }

    /// Service without provider access, for precomputed streams and features
    pub fn from_config(config: &PulseConfig) -> Result<Self, PipelineError> {
        let models = match &config.inference.models_dir {
            Some(dir) => ModelSet::load_dir(dir)?,
            None => ModelSet::baseline(),
        };
        let inference = ParallelInference::with_options(
            models,
            config.inference.worker_pool_size,
            config.inference.model_timeout(),
            config.assessment.clone(),
        );

        Ok(Self::new(StreamPipeline::from_config(config), inference)
            .with_days_back(config.analysis_days_back))
    }

    /// Service that fetches from every built-in provider
    pub fn with_providers(
        config: &PulseConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, PipelineError> {
        let registry = SourceRegistry::from_config(&config.providers, tokens)?;
        Ok(Self::from_config(config)?.with_sources(registry))
    }

    pub fn with_sources(mut self, sources: SourceRegistry) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_days_back(mut self, days_back: u32) -> Self {
        self.days_back = days_back;
        self
    }

    pub fn pipeline(&self) -> &StreamPipeline {
        &self.pipeline
    }

    pub fn inference(&self) -> &ParallelInference {
        &self.inference
    }

    /// Validate, preprocess and extract a raw stream
    pub async fn process_stream(
        &self,
        raw: &RawStreamData,
        user_id: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        self.pipeline.process(raw, user_id).await
    }

    /// Score a complete feature map
    pub async fn predict(&self, features: &FeatureMap, user_id: Option<&str>) -> InferenceOutput {
        self.inference.predict(features, user_id).await
    }

    /// Score a loosely typed feature object
    ///
    /// Missing, non-numeric and non-finite entries are scored as 0.0 and
    /// listed in `coercion_issues`; unknown keys are ignored.
    pub async fn predict_custom(
        &self,
        values: &Map<String, Value>,
        user_id: Option<&str>,
    ) -> CustomPrediction {
        let (features, coercion_issues) = FeatureMap::from_json_map(values);
        if !coercion_issues.is_empty() {
            warn!(
                user_id = user_id.unwrap_or("unknown"),
                count = coercion_issues.len(),
                "Custom features coerced to 0.0"
            );
        }
        let output = self.inference.predict(&features, user_id).await;
        CustomPrediction {
            features,
            coercion_issues,
            output,
        }
    }

    /// Fetch, process and score one user
    ///
    /// `custom_data` skips fetching entirely. Provider failures degrade to
    /// empty batches; only a pipeline failure or every model failing aborts
    /// the run.
    pub async fn process_and_predict(
        &self,
        user_id: &str,
        providers: &[Provider],
        days_back: Option<u32>,
        custom_data: Option<RawStreamData>,
    ) -> Result<AnalysisReport, PipelineError> {
        let started = Instant::now();
        let days = days_back.unwrap_or(self.days_back);
        let window = (days <= MAX_DAYS_BACK)
            .then(|| FetchWindow::last_days(self.pipeline.clock().now(), days))
            .flatten()
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "days_back must be at most {MAX_DAYS_BACK}, got {days}"
                ))
            })?;

        let (data_source, fetched) = match custom_data {
            Some(raw) => {
                info!(user_id, "Using caller supplied stream");
                (
                    DataOrigin::Custom,
                    FetchOutcome {
                        raw,
                        failures: Vec::new(),
                    },
                )
            }
            None => (DataOrigin::Api, self.fetch(user_id, providers, window).await),
        };
        let data_counts = fetched.data_counts();

        let pipeline = self.pipeline.process(&fetched.raw, user_id).await?;

        let defaulted = pipeline
            .validation_report
            .feature_extraction
            .as_ref()
            .map_or(0, |s| s.defaulted_feature_count());
        let feature_info = FeatureInfo::new(FEATURE_COUNT.saturating_sub(defaulted));
        let inference = self
            .inference
            .predict_with_info(&pipeline.features, Some(user_id), feature_info)
            .await;

        if inference.status == InferenceStatus::Error {
            return Err(PipelineError::Inference(
                "every model failed for this feature map".to_string(),
            ));
        }

        let total_ms = started.elapsed().as_secs_f64() * 1000.0;
        let inference_ms = inference.performance.total_inference_time_ms;
        let performance = RunPerformance {
            total_pipeline_time_ms: total_ms,
            preprocessing_time_ms: (total_ms - inference_ms).max(0.0),
            inference_time_ms: inference_ms,
            models_executed: inference.performance.models_executed,
        };

        info!(
            user_id,
            data_source = ?data_source,
            failures = fetched.failures.len(),
            total_ms,
            "Full analysis complete"
        );

        Ok(AnalysisReport {
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            data_source,
            date_range: window,
            providers_used: match data_source {
                DataOrigin::Api => providers.to_vec(),
                DataOrigin::Custom => Vec::new(),
            },
            data_counts,
            source_failures: fetched.failures,
            pipeline,
            inference,
            performance,
        })
    }

    async fn fetch(&self, user_id: &str, providers: &[Provider], window: FetchWindow) -> FetchOutcome {
        match &self.sources {
            Some(registry) => registry.fetch_all(user_id, providers, window).await,
            None => {
                warn!(user_id, "No provider sources configured, analysing an empty stream");
                FetchOutcome::default()
            }
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            version: crate::PULSE_VERSION,
            models: self.inference.models().models().iter().map(|m| m.kind()).collect(),
            worker_pool_size: self.inference.pool_size(),
            available_workers: self.inference.available_workers(),
            model_timeout_ms: self.inference.timeout().as_millis() as u64,
            providers: self
                .sources
                .as_ref()
                .map(|s| s.providers().into_iter().collect())
                .unwrap_or_default(),
            analysis_days_back: self.days_back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::{ModelError, SourceError};
    use crate::features::FeatureExtractor;
    use crate::inference::{AssessmentPolicy, ScoringModel};
    use crate::preprocess::Anonymizer;
    use crate::schema::{RawEventBatch, SourceType};
    use crate::sources::{Credentials, DataSource};
    use crate::types::FeatureBlock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
    }

    fn pipeline() -> StreamPipeline {
        StreamPipeline::new(
            Arc::new(Anonymizer::new(true, "salt")),
            FeatureExtractor::default(),
            Arc::new(FixedClock(now())),
        )
    }

    fn service() -> WorkforceAnalytics {
        WorkforceAnalytics::new(pipeline(), ParallelInference::new(ModelSet::baseline()))
    }

    struct Tokens;

    #[async_trait]
    impl TokenProvider for Tokens {
        async fn credentials(&self, _: &str, _: Provider) -> Result<Credentials, SourceError> {
            Ok(Credentials::new("t"))
        }
    }

    struct CalendarFake;

    #[async_trait]
    impl DataSource for CalendarFake {
        fn provider(&self) -> Provider {
            Provider::Microsoft
        }

        fn source_type(&self) -> SourceType {
            SourceType::CalendarEvents
        }

        async fn fetch(
            &self,
            _: &Credentials,
            window: FetchWindow,
        ) -> Result<RawEventBatch, SourceError> {
            assert_eq!(window.end, now());
            Ok(RawEventBatch::new(
                SourceType::CalendarEvents,
                vec![json!({
                    "id": "e1",
                    "subject": "Sync",
                    "start": {"dateTime": "2024-01-29T09:00:00"},
                    "end": {"dateTime": "2024-01-29T11:00:00"}
                })],
            ))
        }
    }

    struct BrokenSlack;

    #[async_trait]
    impl DataSource for BrokenSlack {
        fn provider(&self) -> Provider {
            Provider::Slack
        }

        fn source_type(&self) -> SourceType {
            SourceType::SlackMessages
        }

        async fn fetch(&self, _: &Credentials, _: FetchWindow) -> Result<RawEventBatch, SourceError> {
            Err(SourceError::Unauthorized("slack".into()))
        }
    }

    #[tokio::test]
    async fn test_process_and_predict_with_fetch_failure() {
        let registry = SourceRegistry::new(Arc::new(Tokens))
            .with_source(Arc::new(CalendarFake))
            .with_source(Arc::new(BrokenSlack));
        let service = service().with_sources(registry);

        let report = service
            .process_and_predict("u1", &Provider::ALL, None, None)
            .await
            .unwrap();

        assert_eq!(report.data_source, DataOrigin::Api);
        assert_eq!(report.data_counts["calendar_events"], 1);
        assert_eq!(report.data_counts["slack_messages"], 0);
        assert_eq!(report.source_failures.len(), 1);
        assert_eq!(report.pipeline.features.meeting_hours_per_week, 2.0);
        assert_eq!(report.inference.status, InferenceStatus::Success);
        assert_eq!(report.performance.models_executed, 3);
        assert!(report.performance.total_pipeline_time_ms >= report.performance.inference_time_ms);
    }

    #[tokio::test]
    async fn test_custom_data_skips_fetch() {
        let raw = RawStreamData::from_json(
            &json!({"teams_messages": [{"id": "m1", "createdDateTime": "2024-01-29T10:00:00Z", "body": {"content": "x"}}]})
                .to_string(),
        )
        .unwrap();

        let report = service()
            .process_and_predict("u2", &Provider::ALL, Some(7), Some(raw))
            .await
            .unwrap();

        assert_eq!(report.data_source, DataOrigin::Custom);
        assert!(report.providers_used.is_empty());
        assert_eq!(report.date_range.start, now() - chrono::Duration::days(7));

        let summary = report.pipeline.validation_report.feature_extraction.as_ref().unwrap();
        assert!(!summary.defaulted_blocks.contains(&FeatureBlock::Communication));
        assert_eq!(
            report.inference.feature_info.defaulted_features,
            summary.defaulted_feature_count()
        );
    }

    #[tokio::test]
    async fn test_no_sources_runs_on_defaults() {
        let report = service()
            .process_and_predict("u3", &Provider::ALL, None, None)
            .await
            .unwrap();
        assert!(report.data_counts.is_empty());
        assert_eq!(report.pipeline.features.meeting_hours_per_week, 8.0);
    }

    #[tokio::test]
    async fn test_rejects_history_beyond_limit() {
        let err = service()
            .process_and_predict("u3", &Provider::ALL, Some(u32::MAX), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn test_predict_custom_coerces() {
        let values = json!({"meeting_hours_per_week": 12.5, "deep_work_hours": "lots"});
        let prediction = service()
            .predict_custom(values.as_object().unwrap(), Some("u4"))
            .await;

        assert_eq!(prediction.features.meeting_hours_per_week, 12.5);
        assert!(prediction
            .coercion_issues
            .contains(&"deep_work_hours: unknown feature - ignored".to_string()));
        assert_eq!(prediction.coercion_issues.len(), FEATURE_COUNT);
        assert_eq!(prediction.output.user_id.as_deref(), Some("u4"));
    }

    struct AlwaysFails(ModelKind);

    impl ScoringModel for AlwaysFails {
        fn kind(&self) -> ModelKind {
            self.0
        }

        fn predict(&self, _: &FeatureMap) -> Result<f64, ModelError> {
            Err(ModelError::Failed("no weights".into()))
        }
    }

    #[tokio::test]
    async fn test_all_models_failing_aborts_run() {
        let models = ModelSet::new(
            Arc::new(AlwaysFails(ModelKind::BurnoutRisk)),
            Arc::new(AlwaysFails(ModelKind::Wellbeing)),
            Arc::new(AlwaysFails(ModelKind::Efficiency)),
        )
        .unwrap();
        let inference = ParallelInference::with_options(
            models,
            3,
            Duration::from_secs(1),
            AssessmentPolicy::default(),
        );
        let service = WorkforceAnalytics::new(pipeline(), inference);

        let err = service
            .process_and_predict("u5", &[], None, Some(RawStreamData::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Inference(_)));
    }

    #[test]
    fn test_health() {
        let health = service().with_days_back(21).health();
        assert_eq!(health.models.len(), 3);
        assert_eq!(health.worker_pool_size, 3);
        assert_eq!(health.available_workers, 3);
        assert_eq!(health.analysis_days_back, 21);
        assert!(health.providers.is_empty());
    }
}
