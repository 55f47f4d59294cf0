//! Spec - チェーン定義（JobSpec と ChainPolicy）
//!
//! JobSpec は投入後に変更されない。handler は文字列の「型」で参照し、
//! payload の中身を core は見ない。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ids::JobId;
use super::millis;
use crate::config::DispatcherConfig;
use crate::coordinator::RetryPolicy;

/// 1 ジョブの定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,

    /// HandlerRegistry に登録された handler の型名
    pub handler: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    /// 前提ジョブ（宣言順を保持）
    #[serde(default)]
    pub prerequisites: Vec<JobId>,

    /// 再試行の上限。試行回数は最大 `max_retries + 1`
    #[serde(default)]
    pub max_retries: u32,

    #[serde(
        default,
        rename = "timeout_ms",
        with = "millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// チェーンの backoff を上書きする場合のみ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<RetryPolicy>,
}

impl JobSpec {
    pub fn new(id: impl Into<JobId>, handler: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handler: handler.into(),
            payload: serde_json::Value::Null,
            prerequisites: Vec::new(),
            max_retries: 0,
            timeout: None,
            backoff: None,
        }
    }

    pub fn after<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<JobId>,
    {
        self.prerequisites.extend(prerequisites.into_iter().map(Into::into));
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// ジョブ単位の backoff 上書きを、チェーンのポリシーと同じ基準で検査する
    pub fn validate(&self) -> Result<(), String> {
        match &self.backoff {
            Some(backoff) => backoff
                .validate()
                .map_err(|e| format!("job `{}`: {e}", self.id)),
            None => Ok(()),
        }
    }
}

/// 失敗したときのチェーン全体の振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 失敗したジョブの後続をすべて SKIPPED にする
    FailFast,
    /// 後続は PENDING のまま、独立した枝は走り続ける
    ContinueOnFailure,
}

/// チェーン単位のポリシー
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPolicy {
    pub max_concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub backoff: RetryPolicy,
}

impl ChainPolicy {
    pub fn new(max_concurrency: usize, failure_policy: FailurePolicy, backoff: RetryPolicy) -> Self {
        Self {
            max_concurrency,
            failure_policy,
            backoff,
        }
    }

    /// 設定ファイルの既定値からポリシーを作る
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(
            config.default_max_concurrency,
            config.default_failure_policy,
            config.retry.to_policy(),
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be at least 1".to_string());
        }
        self.backoff.validate()
    }
}
