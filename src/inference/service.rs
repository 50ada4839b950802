//! Parallel inference service
//!
//! Runs the three scoring models concurrently against one shared feature map.
//! Model calls are CPU work, so each runs on the blocking pool while holding a
//! permit from a semaphore sized once at construction. Every call is bounded
//! by a timeout; a timeout, panic or model error marks only that model's
//! result as failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::assessment::{
    AssessmentPolicy, ModelScores, OverallAssessment, PriorityAction,
};
use super::model::{ModelKind, ModelSet, ScoringModel, Severity};
use crate::error::ModelError;
use crate::features::{round2, FeatureMap, FEATURE_COUNT};

/// Default number of concurrent model calls
pub const DEFAULT_WORKER_POOL_SIZE: usize = 3;

/// Default per-model timeout
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Success,
    Error,
}

/// Result of one model invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_name: ModelKind,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub score_range: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_level: Option<Severity>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub inference_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelResult {
    fn success(kind: ModelKind, score: f64, inference_time_ms: f64) -> Self {
        let (category, description) = kind.category(score);
        Self {
            model_name: kind,
            status: ModelStatus::Success,
            score: Some(score),
            score_range: kind.score_range().to_string(),
            category: Some(category.to_string()),
            description: Some(description.to_string()),
            severity_level: Some(kind.severity(score)),
            recommendations: kind
                .recommendations(score)
                .iter()
                .map(|r| r.to_string())
                .collect(),
            inference_time_ms,
            error: None,
        }
    }

    fn failure(kind: ModelKind, error: &ModelError, inference_time_ms: f64) -> Self {
        Self {
            model_name: kind,
            status: ModelStatus::Error,
            score: None,
            score_range: kind.score_range().to_string(),
            category: None,
            description: None,
            severity_level: None,
            recommendations: Vec::new(),
            inference_time_ms,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ModelStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub burnout_risk: ModelResult,
    pub wellbeing: ModelResult,
    pub efficiency: ModelResult,
}

impl Predictions {
    pub fn iter(&self) -> impl Iterator<Item = &ModelResult> {
        [&self.burnout_risk, &self.wellbeing, &self.efficiency].into_iter()
    }

    pub fn scores(&self) -> ModelScores {
        ModelScores {
            burnout: self.burnout_risk.score,
            wellbeing: self.wellbeing.score,
            efficiency: self.efficiency.score,
        }
    }
}

/// How much of the feature map came from real data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub total_features: usize,
    pub provided_features: usize,
    pub defaulted_features: usize,
    /// Percentage of provided features
    pub data_completeness: f64,
}

impl FeatureInfo {
    /// Count a feature as provided when it is non-zero
    pub fn from_features(features: &FeatureMap) -> Self {
        let provided = features.iter().filter(|(_, v)| *v != 0.0).count();
        Self::new(provided)
    }

    pub fn new(provided_features: usize) -> Self {
        let provided_features = provided_features.min(FEATURE_COUNT);
        Self {
            total_features: FEATURE_COUNT,
            provided_features,
            defaulted_features: FEATURE_COUNT - provided_features,
            data_completeness: round2(provided_features as f64 / FEATURE_COUNT as f64 * 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferencePerformance {
    pub total_inference_time_ms: f64,
    /// Sum of per-model times over wall time
    pub parallel_speedup: f64,
    pub models_executed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStatus {
    /// All three models produced a score
    Success,
    /// Some models failed
    Partial,
    /// Every model failed
    Error,
}

/// Aggregated output of one inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub status: InferenceStatus,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub predictions: Predictions,
    pub overall_assessment: OverallAssessment,
    pub priority_actions: Vec<PriorityAction>,
    pub feature_info: FeatureInfo,
    pub performance: InferencePerformance,
}

/// Service that fans one feature map out to the three models
///
/// Construct once and share by handle; concurrent calls share the worker
/// pool.
pub struct ParallelInference {
    models: ModelSet,
    pool: Arc<Semaphore>,
    pool_size: usize,
    timeout: Duration,
    policy: AssessmentPolicy,
}

impl ParallelInference {
    pub fn new(models: ModelSet) -> Self {
        Self::with_options(
            models,
            DEFAULT_WORKER_POOL_SIZE,
            DEFAULT_MODEL_TIMEOUT,
            AssessmentPolicy::default(),
        )
    }

    pub fn with_options(
        models: ModelSet,
        pool_size: usize,
        timeout: Duration,
        policy: AssessmentPolicy,
    ) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            models,
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            timeout,
            policy,
        }
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Permits currently free in the worker pool
    pub fn available_workers(&self) -> usize {
        self.pool.available_permits()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy(&self) -> &AssessmentPolicy {
        &self.policy
    }

    /// Score a feature map with all three models
    pub async fn predict(&self, features: &FeatureMap, user_id: Option<&str>) -> InferenceOutput {
        self.predict_with_info(features, user_id, FeatureInfo::from_features(features))
            .await
    }

    /// Score a feature map, reporting the caller's own feature info
    pub async fn predict_with_info(
        &self,
        features: &FeatureMap,
        user_id: Option<&str>,
        feature_info: FeatureInfo,
    ) -> InferenceOutput {
        info!(user_id = user_id.unwrap_or("unknown"), "Starting parallel inference");
        let started = Instant::now();
        let shared = Arc::new(*features);

        let (burnout_risk, wellbeing, efficiency) = tokio::join!(
            self.run_model(Arc::clone(&self.models.burnout), Arc::clone(&shared)),
            self.run_model(Arc::clone(&self.models.wellbeing), Arc::clone(&shared)),
            self.run_model(Arc::clone(&self.models.efficiency), Arc::clone(&shared)),
        );

        let total_ms = started.elapsed().as_secs_f64() * 1000.0;
        let predictions = Predictions {
            burnout_risk,
            wellbeing,
            efficiency,
        };

        let scores = predictions.scores();
        let overall_assessment = self.policy.overall_assessment(&scores);
        let priority_actions = self.policy.priority_actions(&scores);

        let succeeded = predictions.iter().filter(|r| r.is_success()).count();
        let status = match succeeded {
            3 => InferenceStatus::Success,
            0 => InferenceStatus::Error,
            _ => InferenceStatus::Partial,
        };

        let model_ms: f64 = predictions.iter().map(|r| r.inference_time_ms).sum();
        let performance = InferencePerformance {
            total_inference_time_ms: total_ms,
            parallel_speedup: if total_ms > 0.0 {
                round2(model_ms / total_ms)
            } else {
                0.0
            },
            models_executed: ModelKind::ALL.len(),
        };

        info!(
            user_id = user_id.unwrap_or("unknown"),
            total_ms,
            succeeded,
            overall = ?overall_assessment.status,
            "Parallel inference complete"
        );

        InferenceOutput {
            status,
            user_id: user_id.map(str::to_string),
            timestamp: Utc::now(),
            predictions,
            overall_assessment,
            priority_actions,
            feature_info,
            performance,
        }
    }

    async fn run_model(
        &self,
        model: Arc<dyn ScoringModel>,
        features: Arc<FeatureMap>,
    ) -> ModelResult {
        let kind = model.kind();
        let started = Instant::now();
        let outcome = self.invoke(model, features).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(score) => {
                debug!(model = %kind, score, elapsed_ms, "Model scored");
                ModelResult::success(kind, score, elapsed_ms)
            }
            Err(e) => {
                warn!(model = %kind, error = %e, "Model failed");
                ModelResult::failure(kind, &e, elapsed_ms)
            }
        }
    }

    async fn invoke(
        &self,
        model: Arc<dyn ScoringModel>,
        features: Arc<FeatureMap>,
    ) -> Result<f64, ModelError> {
        let kind = model.kind();
        let pool = Arc::clone(&self.pool);

        let call = async move {
            let permit = pool
                .acquire_owned()
                .await
                .map_err(|_| ModelError::PoolClosed)?;
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                model.predict(&features)
            })
            .await;
            let score = joined.map_err(|e| ModelError::Panicked(e.to_string()))??;
            Ok::<f64, ModelError>(score)
        };

        let score = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ModelError::Timeout(self.timeout.as_millis() as u64))??;

        check_score(kind, score)
    }
}

/// Reject non-finite scores and clamp the rest into the model's range
fn check_score(kind: ModelKind, score: f64) -> Result<f64, ModelError> {
    if !score.is_finite() {
        return Err(ModelError::InvalidScore(score));
    }
    let (lo, hi) = kind.bounds();
    if score < lo || score > hi {
        warn!(model = %kind, score, "Score outside model range, clamping");
    }
    Ok(score.clamp(lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::assessment::AssessmentStatus;
    use pretty_assertions::assert_eq;

    /// Returns a fixed score after sleeping
    struct FakeModel {
        kind: ModelKind,
        score: f64,
        delay: Duration,
    }

    impl ScoringModel for FakeModel {
        fn kind(&self) -> ModelKind {
            self.kind
        }

        fn predict(&self, _features: &FeatureMap) -> Result<f64, ModelError> {
            std::thread::sleep(self.delay);
            Ok(self.score)
        }
    }

    struct FailingModel(ModelKind);

    impl ScoringModel for FailingModel {
        fn kind(&self) -> ModelKind {
            self.0
        }

        fn predict(&self, _features: &FeatureMap) -> Result<f64, ModelError> {
            Err(ModelError::Failed("weights missing".into()))
        }
    }

    struct PanickingModel(ModelKind);

    impl ScoringModel for PanickingModel {
        fn kind(&self) -> ModelKind {
            self.0
        }

        fn predict(&self, _features: &FeatureMap) -> Result<f64, ModelError> {
            panic!("model crashed")
        }
    }

    fn fake(kind: ModelKind, score: f64, delay_ms: u64) -> Arc<dyn ScoringModel> {
        Arc::new(FakeModel {
            kind,
            score,
            delay: Duration::from_millis(delay_ms),
        })
    }

    fn models(b: f64, w: f64, e: f64, delay_ms: u64) -> ModelSet {
        ModelSet::new(
            fake(ModelKind::BurnoutRisk, b, delay_ms),
            fake(ModelKind::Wellbeing, w, delay_ms),
            fake(ModelKind::Efficiency, e, delay_ms),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_models_run_concurrently() {
        let service = ParallelInference::new(models(0.2, 75.0, 75.0, 150));
        let output = service.predict(&FeatureMap::default(), Some("u1")).await;

        assert_eq!(output.status, InferenceStatus::Success);
        assert!(
            output.performance.total_inference_time_ms < 400.0,
            "took {} ms",
            output.performance.total_inference_time_ms
        );
        assert!(output.performance.parallel_speedup > 1.5);
        assert_eq!(output.performance.models_executed, 3);
        assert_eq!(output.overall_assessment.status, AssessmentStatus::Thriving);
        assert_eq!(service.available_workers(), 3);
    }

    #[tokio::test]
    async fn test_failing_burnout_model_marks_error() {
        let set = ModelSet::new(
            Arc::new(FailingModel(ModelKind::BurnoutRisk)),
            fake(ModelKind::Wellbeing, 75.0, 0),
            fake(ModelKind::Efficiency, 75.0, 0),
        )
        .unwrap();
        let output = ParallelInference::new(set)
            .predict(&FeatureMap::default(), None)
            .await;

        assert_eq!(output.predictions.burnout_risk.status, ModelStatus::Error);
        assert!(output.predictions.burnout_risk.score.is_none());
        assert_eq!(output.predictions.wellbeing.status, ModelStatus::Success);
        assert_eq!(output.overall_assessment.status, AssessmentStatus::Error);
        assert_eq!(output.status, InferenceStatus::Partial);
    }

    #[tokio::test]
    async fn test_panicking_model_is_isolated() {
        let set = ModelSet::new(
            fake(ModelKind::BurnoutRisk, 0.1, 0),
            Arc::new(PanickingModel(ModelKind::Wellbeing)),
            fake(ModelKind::Efficiency, 75.0, 0),
        )
        .unwrap();
        let output = ParallelInference::new(set)
            .predict(&FeatureMap::default(), None)
            .await;

        assert_eq!(output.predictions.wellbeing.status, ModelStatus::Error);
        assert_eq!(output.predictions.efficiency.status, ModelStatus::Success);
    }

    #[tokio::test]
    async fn test_slow_model_times_out() {
        let set = ModelSet::new(
            fake(ModelKind::BurnoutRisk, 0.1, 0),
            fake(ModelKind::Wellbeing, 75.0, 0),
            fake(ModelKind::Efficiency, 75.0, 500),
        )
        .unwrap();
        let service = ParallelInference::with_options(
            set,
            3,
            Duration::from_millis(50),
            AssessmentPolicy::default(),
        );
        let output = service.predict(&FeatureMap::default(), None).await;

        let efficiency = &output.predictions.efficiency;
        assert_eq!(efficiency.status, ModelStatus::Error);
        assert!(efficiency.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(output.overall_assessment.status, AssessmentStatus::Error);
    }

    #[tokio::test]
    async fn test_success_result_carries_category_and_recommendations() {
        let output = ParallelInference::new(models(0.75, 90.0, 90.0, 0))
            .predict(&FeatureMap::default(), None)
            .await;

        let burnout = &output.predictions.burnout_risk;
        assert_eq!(burnout.severity_level, Some(Severity::Critical));
        assert_eq!(burnout.category.as_deref(), Some("Critical Risk"));
        assert_eq!(burnout.recommendations.len(), 4);
        assert_eq!(output.overall_assessment.status, AssessmentStatus::Critical);
    }

    #[tokio::test]
    async fn test_out_of_range_scores_are_clamped() {
        let output = ParallelInference::new(models(1.4, 120.0, -5.0, 0))
            .predict(&FeatureMap::default(), None)
            .await;
        assert_eq!(output.predictions.burnout_risk.score, Some(1.0));
        assert_eq!(output.predictions.wellbeing.score, Some(100.0));
        assert_eq!(output.predictions.efficiency.score, Some(0.0));
    }

    #[tokio::test]
    async fn test_nan_score_is_an_error() {
        let output = ParallelInference::new(models(f64::NAN, 50.0, 50.0, 0))
            .predict(&FeatureMap::default(), None)
            .await;
        assert_eq!(output.predictions.burnout_risk.status, ModelStatus::Error);
    }

    #[tokio::test]
    async fn test_pool_of_one_serializes_calls() {
        let service = ParallelInference::with_options(
            models(0.2, 75.0, 75.0, 60),
            1,
            DEFAULT_MODEL_TIMEOUT,
            AssessmentPolicy::default(),
        );
        let output = service.predict(&FeatureMap::default(), None).await;
        assert_eq!(output.status, InferenceStatus::Success);
        assert!(output.performance.total_inference_time_ms >= 170.0);
    }

    #[test]
    fn test_feature_info() {
        let info = FeatureInfo::new(20);
        assert_eq!(info.defaulted_features, 3);
        assert_eq!(info.data_completeness, 86.96);
    }
}
