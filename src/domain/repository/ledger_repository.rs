use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::entity::{
    AuditLogEntry, EntryUpdate, NewLedgerEntry, QuotaLedgerEntry, RedemptionCode, TopUpRecord,
};

/// LedgerStore は台帳エントリの永続化と、トランザクションの開始を担当する。
///
/// 変更操作はすべて `begin()` で得た `LedgerTransaction` 上で行う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// トランザクションを開始する。
    async fn begin(&self) -> anyhow::Result<Box<dyn LedgerTransaction>>;

    /// ID でエントリを取得する（ロックなし）。
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<QuotaLedgerEntry>>;

    /// テナントの Active エントリを FIFO 順で取得する（ロックなし）。
    async fn find_active_by_owner(&self, owner_id: i64) -> anyhow::Result<Vec<QuotaLedgerEntry>>;

    /// `after_id` より大きい ID を持つ期限到来済み Active エントリを、ID 昇順で最大 `limit` 件取得する。
    async fn find_due_for_expiry(
        &self,
        cutoff: DateTime<Utc>,
        after_id: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<QuotaLedgerEntry>>;

    /// テナントの全エントリを新しい順でページ取得する。
    async fn find_by_owner(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<QuotaLedgerEntry>, u64)>;

    /// テナントの Active エントリの残量合計（期限付き残高）。
    async fn sum_active_remaining(&self, owner_id: i64) -> anyhow::Result<i64>;
}

/// LedgerTransaction は1回の論理操作に対応するトランザクション。
///
/// `lock_*` は排他行ロックを取得して読む。ロックはトランザクション終了まで保持される。
/// ロック順序は「台帳エントリ → テナント残高」で統一し、テナント残高を更新した後に
/// 台帳エントリをロックしてはならない。
/// `commit()` せずに破棄した場合はすべての変更がロールバックされる。
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn create_entry(&mut self, entry: &NewLedgerEntry) -> anyhow::Result<QuotaLedgerEntry>;

    async fn lock_entry(&mut self, id: i64) -> anyhow::Result<Option<QuotaLedgerEntry>>;

    /// テナントの Active エントリ全件を FIFO 順でロックして取得する。
    async fn lock_active_by_owner(&mut self, owner_id: i64)
        -> anyhow::Result<Vec<QuotaLedgerEntry>>;

    async fn apply_update(&mut self, id: i64, update: &EntryUpdate) -> anyhow::Result<()>;

    /// テナントの total_balance に `delta` を加算し、更新後の値を返す。0 未満にはならない。
    /// テナントが存在しない場合はエラー。
    async fn add_tenant_balance(&mut self, owner_id: i64, delta: i64) -> anyhow::Result<i64>;

    async fn lock_code_by_key(&mut self, key: &str) -> anyhow::Result<Option<RedemptionCode>>;

    async fn save_code(&mut self, code: &RedemptionCode) -> anyhow::Result<()>;

    async fn insert_top_up(&mut self, record: &TopUpRecord) -> anyhow::Result<()>;

    async fn append_log(&mut self, log: &AuditLogEntry) -> anyhow::Result<()>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}
