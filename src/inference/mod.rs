//! Model inference
//!
//! Three scoring models (burnout risk, wellbeing, efficiency) run concurrently
//! against one feature map. Their results are merged into an overall
//! assessment and a prioritized action list.

mod assessment;
mod model;
mod service;

pub use assessment::{
    ActionCategory, AssessmentPolicy, AssessmentStatus, Breakdown, ModelScores,
    OverallAssessment, Priority, PriorityAction,
};
pub use model::{LinearModel, ModelKind, ModelSet, ScoringModel, Severity};
pub use service::{
    FeatureInfo, InferenceOutput, InferencePerformance, InferenceStatus, ModelResult,
    ModelStatus, ParallelInference, Predictions, DEFAULT_MODEL_TIMEOUT,
    DEFAULT_WORKER_POOL_SIZE,
};
