//! Pipeline configuration.
//!
//! Precedence: environment variables over TOML file values over defaults.
//!
//! | Variable                                       | Field                         |
//! |------------------------------------------------|-------------------------------|
//! | `STAGE_PIPELINE_MAX_RETRIES`                   | `max_retries`                 |
//! | `STAGE_PIPELINE_TERMINAL_ATTEMPT_THRESHOLD`    | `terminal_attempt_threshold`  |
//! | `STAGE_PIPELINE_NARROW_ESCALATION_THRESHOLD`   | `narrow_escalation_threshold` |
//! | `STAGE_PIPELINE_MEDIUM_ESCALATION_THRESHOLD`   | `medium_escalation_threshold` |
//! | `STAGE_PIPELINE_STAGE_TIMEOUT_SECS`            | `stage_timeout_secs`          |
//! | `STAGE_PIPELINE_RECORD_ON_COMPLETION`          | `record_on_completion`        |
//! | `STAGE_PIPELINE_DRAFT_MIN_CHARS`               | `draft_min_chars`             |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use selective_retry::{ArtifactGuard, EscalationThresholds, ExpectedShape, PolicyConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "STAGE_PIPELINE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration for a [`PipelineController`](crate::PipelineController).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retries after the first attempt; total executions = `max_retries + 1`
    pub max_retries: u32,
    /// Attempt index from which the policy always answers Full
    pub terminal_attempt_threshold: u32,
    /// Consecutive Narrow decisions that escalate to Medium
    pub narrow_escalation_threshold: u32,
    /// Consecutive Medium decisions that escalate to Full
    pub medium_escalation_threshold: u32,
    /// Upper bound on a single stage call
    pub stage_timeout_secs: u64,
    /// Invoke the Record stage when the run completes
    pub record_on_completion: bool,
    /// Shape a preserved plan must have to be reused
    pub plan_shape: ExpectedShape,
    /// Minimum non-whitespace characters of a reusable draft
    pub draft_min_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            terminal_attempt_threshold: 2,
            narrow_escalation_threshold: 2,
            medium_escalation_threshold: 2,
            stage_timeout_secs: 300,
            record_on_completion: true,
            plan_shape: ExpectedShape::StructuredJson,
            draft_min_chars: 1,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from a TOML file; missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup keyed by full variable name.
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_field(&lookup, "MAX_RETRIES", &mut self.max_retries)?;
        override_field(
            &lookup,
            "TERMINAL_ATTEMPT_THRESHOLD",
            &mut self.terminal_attempt_threshold,
        )?;
        override_field(
            &lookup,
            "NARROW_ESCALATION_THRESHOLD",
            &mut self.narrow_escalation_threshold,
        )?;
        override_field(
            &lookup,
            "MEDIUM_ESCALATION_THRESHOLD",
            &mut self.medium_escalation_threshold,
        )?;
        override_field(&lookup, "STAGE_TIMEOUT_SECS", &mut self.stage_timeout_secs)?;
        override_field(&lookup, "RECORD_ON_COMPLETION", &mut self.record_on_completion)?;
        override_field(&lookup, "DRAFT_MIN_CHARS", &mut self.draft_min_chars)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "stage_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.narrow_escalation_threshold == 0 || self.medium_escalation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "escalation thresholds must be at least 1".into(),
            ));
        }
        if let ExpectedShape::Text { min_chars: 0 } = self.plan_shape {
            return Err(ConfigError::Invalid(
                "plan_shape text min_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::with_config(PolicyConfig {
            terminal_attempt_threshold: self.terminal_attempt_threshold,
        })
    }

    pub fn thresholds(&self) -> EscalationThresholds {
        EscalationThresholds {
            narrow: self.narrow_escalation_threshold,
            medium: self.medium_escalation_threshold,
        }
    }

    pub fn guard(&self) -> ArtifactGuard {
        ArtifactGuard::new(
            self.plan_shape.clone(),
            ExpectedShape::Text {
                min_chars: self.draft_min_chars,
            },
        )
    }
}

fn override_field<T, F>(lookup: &F, suffix: &str, field: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{}{}", ENV_PREFIX, suffix);
    let Some(raw) = lookup(&key) else {
        return Ok(());
    };
    *field = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.stage_timeout(), Duration::from_secs(300));
        assert_eq!(config.thresholds(), EscalationThresholds::default());
        assert_eq!(config.guard(), ArtifactGuard::default());
        assert_eq!(config.policy().config().terminal_attempt_threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            max_retries = 4
            record_on_completion = false

            [plan_shape]
            kind = "text"
            min_chars = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 4);
        assert!(!config.record_on_completion);
        assert_eq!(config.plan_shape, ExpectedShape::Text { min_chars: 10 });
        assert_eq!(config.terminal_attempt_threshold, 2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stage_timeout_secs = 45").unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.stage_timeout_secs, 45);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_toml() {
        let err = PipelineConfig::from_toml_str("max_retries = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = PipelineConfig::from_toml_str("max_retries = 4").unwrap();
        config
            .apply_overrides_with(lookup(&[
                ("STAGE_PIPELINE_MAX_RETRIES", "1"),
                ("STAGE_PIPELINE_RECORD_ON_COMPLETION", "false"),
                ("STAGE_PIPELINE_NARROW_ESCALATION_THRESHOLD", " 3 "),
            ]))
            .unwrap();
        assert_eq!(config.max_retries, 1);
        assert!(!config.record_on_completion);
        assert_eq!(config.narrow_escalation_threshold, 3);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides_with(lookup(&[("STAGE_PIPELINE_STAGE_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("STAGE_PIPELINE_STAGE_TIMEOUT_SECS"));
        assert_eq!(config.stage_timeout_secs, 300);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = PipelineConfig {
            stage_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
