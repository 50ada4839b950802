//! Workforce Pulse - Workplace activity analytics and wellbeing inference
//!
//! Pulse turns raw workplace activity (calendar, chat, mail, ticketing) into
//! a fixed 23-feature map and scores it with three models in parallel:
//! validation → preprocessing/anonymization → feature extraction → parallel
//! inference → overall assessment and priority actions.
//!
//! ## Modules
//!
//! - **Stream Pipeline**: Validate, normalize and extract features for one user
//! - **Inference**: Run the burnout, wellbeing and efficiency models concurrently
//! - **Sources**: Fetch raw batches from Microsoft Graph, Slack and Jira

pub mod analytics;
pub mod clock;
pub mod config;
pub mod error;
pub mod features;
pub mod inference;
pub mod pipeline;
pub mod preprocess;
pub mod schema;
pub mod sources;
pub mod storage;
pub mod types;
pub mod validator;

pub use analytics::{AnalysisReport, WorkforceAnalytics};
pub use config::PulseConfig;
pub use error::{ModelError, PipelineError, SourceError, StorageError};
pub use features::{FeatureExtractor, FeatureMap, FEATURE_COUNT, FEATURE_NAMES};
pub use inference::{InferenceOutput, ModelSet, ParallelInference, ScoringModel};
pub use pipeline::StreamPipeline;

// Schema exports
pub use schema::{RawEventBatch, RawStreamData, SourceType, SCHEMA_VERSION};

/// Pulse version reported by the CLI and the health report
pub const PULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped on CLI output
pub const PRODUCER_NAME: &str = "workforce-pulse";
