//! RunStore port - チェーン snapshot の永続化
//!
//! # 設計原則
//! - 保存の単位は ChainSnapshot（自己完結していて、再起動時にそのまま `resume` に渡せる）
//! - 同じチェーンの snapshot は revision が新しいものだけを残す
//!   （worker の報告は並行なので、保存順が revision 順とは限らない）

use async_trait::async_trait;

use crate::domain::{ChainId, ChainSnapshot};
use crate::error::Result;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// 保存済みより新しい revision のときだけ上書きする
    async fn save(&self, snapshot: &ChainSnapshot) -> Result<()>;

    async fn load(&self, chain_id: ChainId) -> Result<Option<ChainSnapshot>>;

    /// 終端状態に達していないチェーン（再起動時の再開候補）
    async fn unfinished(&self) -> Result<Vec<ChainSnapshot>>;
}
