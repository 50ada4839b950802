//! Scoring models
//!
//! A model is an opaque function from a [`FeatureMap`] to a score in a known
//! range. [`LinearModel`] covers exported linear/logistic coefficients; any
//! other implementation plugs in through [`ScoringModel`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ModelError, PipelineError};
use crate::features::{FeatureMap, FEATURE_NAMES};

/// The three scored dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    BurnoutRisk,
    Wellbeing,
    Efficiency,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::BurnoutRisk,
        ModelKind::Wellbeing,
        ModelKind::Efficiency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::BurnoutRisk => "burnout_risk",
            ModelKind::Wellbeing => "wellbeing",
            ModelKind::Efficiency => "efficiency",
        }
    }

    /// Inclusive score bounds
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            ModelKind::BurnoutRisk => (0.0, 1.0),
            ModelKind::Wellbeing | ModelKind::Efficiency => (0.0, 100.0),
        }
    }

    pub fn score_range(&self) -> &'static str {
        match self {
            ModelKind::BurnoutRisk => "0-1 (higher is worse)",
            ModelKind::Wellbeing | ModelKind::Efficiency => "0-100 (higher is better)",
        }
    }

    /// Severity bucket for a score
    pub fn severity(&self, score: f64) -> Severity {
        match self {
            ModelKind::BurnoutRisk => {
                if score >= 0.7 {
                    Severity::Critical
                } else if score >= 0.5 {
                    Severity::High
                } else if score >= 0.3 {
                    Severity::Moderate
                } else {
                    Severity::Low
                }
            }
            ModelKind::Wellbeing => {
                if score >= 80.0 {
                    Severity::Excellent
                } else if score >= 60.0 {
                    Severity::Good
                } else if score >= 40.0 {
                    Severity::Fair
                } else {
                    Severity::Poor
                }
            }
            ModelKind::Efficiency => {
                if score >= 80.0 {
                    Severity::Excellent
                } else if score >= 60.0 {
                    Severity::Good
                } else if score >= 40.0 {
                    Severity::Moderate
                } else {
                    Severity::NeedsImprovement
                }
            }
        }
    }

    /// Human-readable category and description for a score
    pub fn category(&self, score: f64) -> (&'static str, &'static str) {
        match (self, self.severity(score)) {
            (ModelKind::BurnoutRisk, Severity::Critical) => (
                "Critical Risk",
                "Severe burnout indicators, immediate intervention recommended",
            ),
            (ModelKind::BurnoutRisk, Severity::High) => (
                "High Risk",
                "Elevated burnout indicators, provide support soon",
            ),
            (ModelKind::BurnoutRisk, Severity::Moderate) => (
                "Moderate Risk",
                "Some burnout indicators, monitor closely",
            ),
            (ModelKind::BurnoutRisk, _) => ("Low Risk", "Work patterns appear sustainable"),
            (ModelKind::Wellbeing, Severity::Excellent) => {
                ("Excellent", "Employee wellbeing is very healthy")
            }
            (ModelKind::Wellbeing, Severity::Good) => ("Good", "Employee wellbeing is healthy"),
            (ModelKind::Wellbeing, Severity::Fair) => {
                ("Fair", "Wellbeing is below average and may need support")
            }
            (ModelKind::Wellbeing, _) => ("Poor", "Wellbeing is low and needs support"),
            (ModelKind::Efficiency, Severity::Excellent) => {
                ("Excellent", "Highly efficient work patterns")
            }
            (ModelKind::Efficiency, Severity::Good) => ("Good", "Efficient work patterns"),
            (ModelKind::Efficiency, Severity::Moderate) => {
                ("Moderate", "Efficiency has room for improvement")
            }
            (ModelKind::Efficiency, _) => (
                "Needs Improvement",
                "Work patterns show significant inefficiencies",
            ),
        }
    }

    /// Recommendation tier for a score
    pub fn recommendations(&self, score: f64) -> &'static [&'static str] {
        match self {
            ModelKind::BurnoutRisk => {
                if score > 0.7 {
                    &[
                        "🚨 URGENT: Schedule immediate one-on-one meeting",
                        "Reduce workload and redistribute tasks",
                        "Encourage time off and provide mental health resources",
                        "Monitor daily for stress indicators",
                    ]
                } else if score > 0.5 {
                    &[
                        "⚠️ Schedule check-in within the week",
                        "Review recent workload changes",
                        "Encourage work-life balance practices",
                        "Provide stress management resources",
                    ]
                } else if score > 0.3 {
                    &[
                        "Monitor workload patterns",
                        "Maintain regular check-ins",
                        "Recognize achievements and contributions",
                    ]
                } else {
                    &[
                        "Continue current support level",
                        "Maintain healthy work patterns",
                        "Share best practices with team",
                    ]
                }
            }
            ModelKind::Wellbeing => {
                if score < 40.0 {
                    &[
                        "🚨 Provide immediate wellbeing support",
                        "Connect with employee assistance program",
                        "Review work conditions and stressors",
                        "Consider temporary workload reduction",
                    ]
                } else if score < 60.0 {
                    &[
                        "⚠️ Offer wellness program enrollment",
                        "Check for work-life balance issues",
                        "Provide flexible working options",
                        "Schedule wellbeing check-ins",
                    ]
                } else if score < 80.0 {
                    &[
                        "Maintain current wellness initiatives",
                        "Continue regular team engagement",
                        "Recognize positive contributions",
                    ]
                } else {
                    &[
                        "✅ Employee thriving - continue support",
                        "Share success patterns with team",
                        "Maintain healthy work environment",
                    ]
                }
            }
            ModelKind::Efficiency => {
                if score < 40.0 {
                    &[
                        "⚠️ Review task assignments and priorities",
                        "Identify and remove blockers",
                        "Provide additional training or mentorship",
                        "Clarify expectations and goals",
                    ]
                } else if score < 60.0 {
                    &[
                        "Optimize task allocation",
                        "Address skill gaps with training",
                        "Reduce context switching",
                        "Improve tool and process efficiency",
                    ]
                } else if score < 80.0 {
                    &[
                        "Continue current productivity patterns",
                        "Look for optimization opportunities",
                        "Recognize efficient work habits",
                    ]
                } else {
                    &[
                        "✅ Excellent efficiency - maintain momentum",
                        "Share productivity best practices",
                        "Consider stretch assignments",
                    ]
                }
            }
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity bucket of a model score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Moderate,
    Low,
    Excellent,
    Good,
    Fair,
    Poor,
    NeedsImprovement,
}

/// A trained scoring model
///
/// Implementations must be re-entrant: the same instance is invoked
/// concurrently from several worker threads and never sees a mutable
/// feature map.
pub trait ScoringModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn predict(&self, features: &FeatureMap) -> Result<f64, ModelError>;
}

/// Linear model with an optional logistic link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub kind: ModelKind,
    pub intercept: f64,
    /// Coefficient per feature name; absent features weigh zero
    pub weights: BTreeMap<String, f64>,
    /// Apply a sigmoid to the linear term
    #[serde(default)]
    pub logistic: bool,
}

impl LinearModel {
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let model: LinearModel = serde_json::from_str(json)?;
        model.check()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn check(&self) -> Result<(), PipelineError> {
        if let Some(unknown) = self
            .weights
            .keys()
            .find(|k| !FEATURE_NAMES.contains(&k.as_str()))
        {
            return Err(PipelineError::Config(format!(
                "{} model weights reference unknown feature '{unknown}'",
                self.kind
            )));
        }
        Ok(())
    }

    /// Built-in coefficients used when no exported model is configured
    pub fn baseline(kind: ModelKind) -> Self {
        let (intercept, logistic, weights): (f64, bool, &[(&str, f64)]) = match kind {
            ModelKind::BurnoutRisk => (
                -4.0,
                true,
                &[
                    ("meeting_hours_per_week", 0.05),
                    ("after_hours_message_ratio", 3.0),
                    ("logged_hours_per_week", 0.05),
                    ("overdue_task_ratio", 1.5),
                    ("variance_in_work_hours", 0.1),
                    ("task_completion_rate", -1.0),
                ],
            ),
            ModelKind::Wellbeing => (
                85.0,
                false,
                &[
                    ("meeting_hours_per_week", -0.5),
                    ("after_hours_message_ratio", -30.0),
                    ("logged_hours_per_week", -0.3),
                    ("overdue_task_ratio", -20.0),
                    ("absenteeism_rate", -100.0),
                ],
            ),
            ModelKind::Efficiency => (
                30.0,
                false,
                &[
                    ("task_completion_rate", 50.0),
                    ("overdue_task_ratio", -30.0),
                    ("meeting_hours_per_week", -0.5),
                    ("communication_burstiness", -10.0),
                ],
            ),
        };

        Self {
            kind,
            intercept,
            weights: weights.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            logistic,
        }
    }
}

impl ScoringModel for LinearModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn predict(&self, features: &FeatureMap) -> Result<f64, ModelError> {
        let mut z = self.intercept;
        for (name, weight) in &self.weights {
            let value = features
                .get(name)
                .ok_or_else(|| ModelError::Failed(format!("unknown feature '{name}'")))?;
            z += weight * value;
        }
        Ok(if self.logistic { 1.0 / (1.0 + (-z).exp()) } else { z })
    }
}

/// The three models an inference service runs
#[derive(Clone)]
pub struct ModelSet {
    pub burnout: Arc<dyn ScoringModel>,
    pub wellbeing: Arc<dyn ScoringModel>,
    pub efficiency: Arc<dyn ScoringModel>,
}

impl ModelSet {
    pub fn new(
        burnout: Arc<dyn ScoringModel>,
        wellbeing: Arc<dyn ScoringModel>,
        efficiency: Arc<dyn ScoringModel>,
    ) -> Result<Self, PipelineError> {
        let set = Self {
            burnout,
            wellbeing,
            efficiency,
        };
        for (expected, model) in ModelKind::ALL.into_iter().zip(set.models()) {
            if model.kind() != expected {
                return Err(PipelineError::Config(format!(
                    "expected a {expected} model, got {}",
                    model.kind()
                )));
            }
        }
        Ok(set)
    }

    /// Built-in linear models
    pub fn baseline() -> Self {
        Self {
            burnout: Arc::new(LinearModel::baseline(ModelKind::BurnoutRisk)),
            wellbeing: Arc::new(LinearModel::baseline(ModelKind::Wellbeing)),
            efficiency: Arc::new(LinearModel::baseline(ModelKind::Efficiency)),
        }
    }

    /// Load `burnout_risk.json`, `wellbeing.json` and `efficiency.json` from a directory
    pub fn load_dir(dir: &Path) -> Result<Self, PipelineError> {
        let load = |kind: ModelKind| -> Result<Arc<dyn ScoringModel>, PipelineError> {
            let path = dir.join(format!("{}.json", kind.as_str()));
            let model = LinearModel::load(&path).map_err(|e| {
                PipelineError::Config(format!("failed to load {}: {e}", path.display()))
            })?;
            Ok(Arc::new(model))
        };
        Self::new(
            load(ModelKind::BurnoutRisk)?,
            load(ModelKind::Wellbeing)?,
            load(ModelKind::Efficiency)?,
        )
    }

    /// Models in [`ModelKind::ALL`] order
    pub fn models(&self) -> [&Arc<dyn ScoringModel>; 3] {
        [&self.burnout, &self.wellbeing, &self.efficiency]
    }
}

impl std::fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSet")
            .field("burnout", &self.burnout.kind())
            .field("wellbeing", &self.wellbeing.kind())
            .field("efficiency", &self.efficiency.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use crate::types::ActivityBatches;
    use chrono::{TimeZone, Utc};

    fn default_features() -> FeatureMap {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        FeatureExtractor::default()
            .extract_batches(&ActivityBatches::default(), now)
            .features
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(ModelKind::BurnoutRisk.severity(0.7), Severity::Critical);
        assert_eq!(ModelKind::BurnoutRisk.severity(0.69), Severity::High);
        assert_eq!(ModelKind::BurnoutRisk.severity(0.3), Severity::Moderate);
        assert_eq!(ModelKind::BurnoutRisk.severity(0.1), Severity::Low);
        assert_eq!(ModelKind::Wellbeing.severity(80.0), Severity::Excellent);
        assert_eq!(ModelKind::Wellbeing.severity(39.9), Severity::Poor);
        assert_eq!(ModelKind::Efficiency.severity(45.0), Severity::Moderate);
        assert_eq!(ModelKind::Efficiency.severity(10.0), Severity::NeedsImprovement);
    }

    #[test]
    fn test_recommendation_tiers() {
        assert_eq!(ModelKind::BurnoutRisk.recommendations(0.75).len(), 4);
        assert_eq!(
            ModelKind::BurnoutRisk.recommendations(0.7)[0],
            "⚠️ Schedule check-in within the week"
        );
        assert_eq!(
            ModelKind::Wellbeing.recommendations(85.0)[0],
            "✅ Employee thriving - continue support"
        );
        assert_eq!(ModelKind::Efficiency.recommendations(50.0)[0], "Optimize task allocation");
    }

    #[test]
    fn test_baseline_scores_in_range() {
        let features = default_features();
        for model in ModelSet::baseline().models() {
            let score = model.predict(&features).unwrap();
            let (lo, hi) = model.kind().bounds();
            assert!(score >= lo && score <= hi, "{} out of range: {score}", model.kind());
        }
    }

    #[test]
    fn test_linear_model_from_json() {
        let model = LinearModel::from_json(
            r#"{"kind": "wellbeing", "intercept": 50.0, "weights": {"meeting_hours_per_week": 2.0}}"#,
        )
        .unwrap();
        let mut features = FeatureMap::default();
        features.meeting_hours_per_week = 5.0;
        assert_eq!(model.predict(&features).unwrap(), 60.0);
    }

    #[test]
    fn test_linear_model_rejects_unknown_feature() {
        let err = LinearModel::from_json(
            r#"{"kind": "efficiency", "intercept": 0.0, "weights": {"typing_speed": 1.0}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("typing_speed"));
    }

    #[test]
    fn test_model_set_checks_kinds() {
        let result = ModelSet::new(
            Arc::new(LinearModel::baseline(ModelKind::Wellbeing)),
            Arc::new(LinearModel::baseline(ModelKind::Wellbeing)),
            Arc::new(LinearModel::baseline(ModelKind::Efficiency)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        for kind in ModelKind::ALL {
            let json = serde_json::to_string(&LinearModel::baseline(kind)).unwrap();
            std::fs::write(dir.path().join(format!("{}.json", kind.as_str())), json).unwrap();
        }
        let set = ModelSet::load_dir(dir.path()).unwrap();
        assert_eq!(set.efficiency.kind(), ModelKind::Efficiency);
    }
}
