//! Domain identifiers (strongly-typed IDs).
//!
//! - `ChainId` / `AttemptId`: ULID ベースの `Id<T>`（Phantom type で型を区別）
//! - `JobId`: チェーン定義の中で一意な、人が書く文字列 ID
//!
//! ULID は時刻でソート可能なので、snapshot を chain_id 順に並べると投入順になる。

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"chain-", "attempt-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時のサイズは Ulid と同じ。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Chain のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chain {}

impl IdMarker for Chain {
    fn prefix() -> &'static str {
        "chain-"
    }
}

/// Attempt のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attempt {}

impl IdMarker for Attempt {
    fn prefix() -> &'static str {
        "attempt-"
    }
}

/// Identifier of one chain instance (submit/status/cancel unit).
pub type ChainId = Id<Chain>;

/// Identifier of one execution try of a job.
pub type AttemptId = Id<Attempt>;

/// JobId はチェーン内で一意なジョブ名
///
/// 定義ファイルに書かれた文字列をそのまま使う（"extract", "load" など）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 空文字・空白のみの ID は定義として不正
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulid_ids_display_with_prefix() {
        let chain = ChainId::from_ulid(Ulid::new());
        let attempt = AttemptId::from_ulid(Ulid::new());

        assert!(chain.to_string().starts_with("chain-"));
        assert!(attempt.to_string().starts_with("attempt-"));
        // let _: ChainId = attempt; // <- does not compile
    }

    #[test]
    fn chain_id_serializes_as_plain_ulid() {
        let ulid = Ulid::new();
        let chain = ChainId::from_ulid(ulid);

        let json = serde_json::to_string(&chain).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));

        let back: ChainId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chain);
    }

    #[test]
    fn job_id_blank_detection() {
        assert!(JobId::from("").is_blank());
        assert!(JobId::from("   ").is_blank());
        assert!(!JobId::from("extract").is_blank());
    }

    #[test]
    fn job_id_can_be_looked_up_by_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(JobId::from("a"), 1usize);
        assert_eq!(map.get("a"), Some(&1));
    }
}
