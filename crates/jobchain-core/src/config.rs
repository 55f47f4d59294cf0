//! DispatcherConfig: TOML から読む dispatcher の設定
//!
//! すべてのフィールドに既定値があるので、部分的なファイルでも読める。
//!
//! ```toml
//! worker_capacity = 16
//! default_max_concurrency = 4
//! default_failure_policy = "continue_on_failure"
//!
//! [retry]
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::coordinator::RetryPolicy;
use crate::domain::FailurePolicy;
use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 全チェーンで共有する同時実行数の上限
    pub worker_capacity: usize,
    pub default_max_concurrency: usize,
    pub default_failure_policy: FailurePolicy,
    pub default_max_retries: u32,
    pub default_timeout_ms: Option<u64>,
    pub retry: RetrySettings,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_capacity: 8,
            default_max_concurrency: 4,
            default_failure_policy: FailurePolicy::FailFast,
            default_max_retries: 2,
            default_timeout_ms: None,
            retry: RetrySettings::default(),
        }
    }
}

/// `[retry]` セクション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl DispatcherConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading dispatcher config");
        let raw = fs::read_to_string(path)
            .map_err(|e| DispatchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| DispatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_capacity == 0 {
            return Err(DispatchError::Config(
                "worker_capacity must be at least 1".into(),
            ));
        }
        if self.default_max_concurrency == 0 {
            return Err(DispatchError::Config(
                "default_max_concurrency must be at least 1".into(),
            ));
        }
        self.retry.to_policy().validate().map_err(DispatchError::Config)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let config = DispatcherConfig::from_toml_str("").unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let config = DispatcherConfig::from_toml_str(
            r#"
            default_failure_policy = "continue_on_failure"
            default_timeout_ms = 2500

            [retry]
            base_delay_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.default_failure_policy, FailurePolicy::ContinueOnFailure);
        assert_eq!(config.default_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.retry.multiplier, 2.0);
        assert_eq!(config.worker_capacity, 8);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = DispatcherConfig::from_toml_str("worker_capacity = 0").unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let err = DispatcherConfig::from_toml_str("[retry]\nmultiplier = 0.5").unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_max_concurrency = 7").unwrap();

        let config = DispatcherConfig::load(file.path()).unwrap();
        assert_eq!(config.default_max_concurrency, 7);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = DispatcherConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }
}
