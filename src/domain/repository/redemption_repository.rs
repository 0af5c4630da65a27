use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::entity::{CodeStatus, NewRedemptionCode, RedemptionCode, TenantBalance};

/// RedemptionCodeRepository は引換コードの管理系操作を担当する。
/// 引換そのものは `LedgerTransaction` 上で行う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedemptionCodeRepository: Send + Sync {
    async fn create(&self, code: &NewRedemptionCode) -> anyhow::Result<RedemptionCode>;

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<RedemptionCode>>;

    /// 現在のステータスが `from` の場合のみ `to` に更新する。更新した場合 true。
    async fn transition_status(
        &self,
        id: i64,
        from: CodeStatus,
        to: CodeStatus,
    ) -> anyhow::Result<bool>;

    /// 使用済み・無効化済み・期限切れのコードを論理削除し、件数を返す。
    async fn purge_invalid(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// TenantAccountRepository はテナントの集計残高を読む。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantAccountRepository: Send + Sync {
    async fn find_balance(&self, owner_id: i64) -> anyhow::Result<Option<TenantBalance>>;
}
