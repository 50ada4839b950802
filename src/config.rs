//! Runtime configuration
//!
//! Resolution order:
//! 1. Explicit config file path
//! 2. `PULSE_CONFIG` environment variable
//! 3. Compiled defaults
//!
//! `PULSE_*` environment overrides are applied on top of whichever source won.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;
use crate::features::ExtractionSettings;
use crate::inference::AssessmentPolicy;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "PULSE_CONFIG";

/// Longest history a run may fetch
pub const MAX_DAYS_BACK: u32 = 3650;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Days of provider history fetched per run
    pub analysis_days_back: u32,
    /// Offset of the employee's working day from UTC
    pub utc_offset_minutes: i32,
    /// Local hour at which the working day starts
    pub working_hours_start: u32,
    /// Local hour at which the working day ends
    pub working_hours_end: u32,
    pub inference: InferenceConfig,
    pub privacy: PrivacyConfig,
    pub assessment: AssessmentPolicy,
    pub providers: ProvidersConfig,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            analysis_days_back: 14,
            utc_offset_minutes: 0,
            working_hours_start: 8,
            working_hours_end: 18,
            inference: InferenceConfig::default(),
            privacy: PrivacyConfig::default(),
            assessment: AssessmentPolicy::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub worker_pool_size: usize,
    pub model_timeout_ms: u64,
    /// Directory with exported linear models; built-in baselines when unset
    pub models_dir: Option<PathBuf>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 3,
            model_timeout_ms: 5000,
            models_dir: None,
        }
    }
}

impl InferenceConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub anonymize: bool,
    pub salt: String,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            anonymize: true,
            salt: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub microsoft_graph_url: String,
    pub slack_api_url: String,
    /// Jira Cloud site, e.g. `https://example.atlassian.net`
    pub jira_base_url: Option<String>,
    pub request_timeout_secs: u64,
    /// Local token store used by the CLI
    pub token_store_path: Option<PathBuf>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            microsoft_graph_url: "https://graph.microsoft.com/v1.0".to_string(),
            slack_api_url: "https://slack.com/api".to_string(),
            jira_base_url: None,
            request_timeout_secs: 30,
            token_store_path: None,
        }
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PulseConfig {
    /// Load configuration following the documented resolution order
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PipelineError> {
        toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Apply `PULSE_*` overrides read through `lookup`
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), PipelineError> {
        if let Some(v) = lookup("PULSE_ANALYSIS_DAYS_BACK") {
            self.analysis_days_back = parse_env("PULSE_ANALYSIS_DAYS_BACK", &v)?;
        }
        if let Some(v) = lookup("PULSE_UTC_OFFSET_MINUTES") {
            self.utc_offset_minutes = parse_env("PULSE_UTC_OFFSET_MINUTES", &v)?;
        }
        if let Some(v) = lookup("PULSE_WORKER_POOL_SIZE") {
            self.inference.worker_pool_size = parse_env("PULSE_WORKER_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("PULSE_MODEL_TIMEOUT_MS") {
            self.inference.model_timeout_ms = parse_env("PULSE_MODEL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("PULSE_MODELS_DIR") {
            self.inference.models_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("PULSE_ANONYMIZE") {
            self.privacy.anonymize = parse_env("PULSE_ANONYMIZE", &v)?;
        }
        if let Some(v) = lookup("PULSE_SALT") {
            self.privacy.salt = v;
        }
        if let Some(v) = lookup("PULSE_JIRA_BASE_URL") {
            self.providers.jira_base_url = Some(v);
        }
        if let Some(v) = lookup("PULSE_TOKEN_STORE") {
            self.providers.token_store_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.analysis_days_back > MAX_DAYS_BACK {
            return Err(PipelineError::Config(format!(
                "analysis_days_back must be at most {MAX_DAYS_BACK}, got {}",
                self.analysis_days_back
            )));
        }
        if self.inference.worker_pool_size == 0 {
            return Err(PipelineError::Config(
                "inference.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.inference.model_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "inference.model_timeout_ms must be positive".to_string(),
            ));
        }
        if self.working_hours_start >= self.working_hours_end || self.working_hours_end > 24 {
            return Err(PipelineError::Config(format!(
                "invalid working hours {}-{}",
                self.working_hours_start, self.working_hours_end
            )));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(PipelineError::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        let a = &self.assessment;
        if [a.burnout_weight, a.wellbeing_weight, a.efficiency_weight]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(PipelineError::Config(
                "assessment weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        ExtractionSettings {
            utc_offset_minutes: self.utc_offset_minutes,
            day_start_hour: self.working_hours_start,
            day_end_hour: self.working_hours_end,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PipelineError> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("invalid value for {key}: '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PulseConfig::default();
        assert_eq!(config.analysis_days_back, 14);
        assert_eq!(config.inference.worker_pool_size, 3);
        assert!(config.privacy.anonymize);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PulseConfig::from_toml_str(
            r#"
            utc_offset_minutes = -300

            [inference]
            model_timeout_ms = 250

            [assessment]
            burnout_critical = 0.8
            "#,
        )
        .unwrap();

        assert_eq!(config.utc_offset_minutes, -300);
        assert_eq!(config.inference.model_timeout(), Duration::from_millis(250));
        assert_eq!(config.inference.worker_pool_size, 3);
        assert_eq!(config.assessment.burnout_critical, 0.8);
        assert_eq!(config.assessment.burnout_at_risk, 0.5);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PULSE_WORKER_POOL_SIZE", "6"),
            ("PULSE_ANONYMIZE", "false"),
            ("PULSE_SALT", "pepper"),
        ]
        .into_iter()
        .collect();

        let mut config = PulseConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.inference.worker_pool_size, 6);
        assert!(!config.privacy.anonymize);
        assert_eq!(config.privacy.salt, "pepper");
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = PulseConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "PULSE_MODEL_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PULSE_MODEL_TIMEOUT_MS"));
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let mut config = PulseConfig::default();
        config.inference.worker_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_history() {
        let mut config = PulseConfig::default();
        config.analysis_days_back = MAX_DAYS_BACK;
        assert!(config.validate().is_ok());

        config
            .apply_env_overrides(|k| (k == "PULSE_ANALYSIS_DAYS_BACK").then(|| u32::MAX.to_string()))
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("analysis_days_back"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulse.toml");
        std::fs::write(&path, "analysis_days_back = 7\n").unwrap();
        let config = PulseConfig::from_file(&path).unwrap();
        assert_eq!(config.analysis_days_back, 7);
    }

    #[test]
    fn test_extraction_settings_follow_working_hours() {
        let config = PulseConfig::from_toml_str("working_hours_start = 9\nutc_offset_minutes = 60").unwrap();
        let settings = config.extraction_settings();
        assert_eq!(settings.day_start_hour, 9);
        assert_eq!(settings.utc_offset_minutes, 60);
    }
}
