use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::entity::{
    AuditLogEntry, CodeStatus, EntryStatus, EntryUpdate, NewLedgerEntry, QuotaLedgerEntry,
    RedemptionCode, TopUpRecord,
};
use crate::domain::repository::{LedgerStore, LedgerTransaction};

const ENTRY_COLUMNS: &str = "id, owner_id, origin_id, original_amount, remaining, status, \
                             expires_at, created_at, updated_at, deleted_at";

/// FIFO 順: 期限付きを期限昇順、無期限を最後に。
const FIFO_ORDER: &str = "ORDER BY (expires_at IS NULL) ASC, expires_at ASC, id ASC";

pub(crate) const CODE_COLUMNS: &str = "id, key, name, status, amount, validity_period_secs, \
                                       plan_id, expires_at, created_at, redeemed_at, used_by_owner_id";

#[derive(sqlx::FromRow)]
struct LedgerEntryRow {
    id: i64,
    owner_id: i64,
    origin_id: Option<i64>,
    original_amount: i64,
    remaining: i64,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<LedgerEntryRow> for QuotaLedgerEntry {
    type Error = anyhow::Error;

    fn try_from(r: LedgerEntryRow) -> anyhow::Result<Self> {
        let status = EntryStatus::from_str(&r.status)
            .ok_or_else(|| anyhow::anyhow!("unknown ledger entry status: {}", r.status))?;
        Ok(QuotaLedgerEntry {
            id: r.id,
            owner_id: r.owner_id,
            origin_id: r.origin_id,
            original_amount: r.original_amount,
            remaining: r.remaining,
            status,
            expires_at: r.expires_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
            deleted_at: r.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RedemptionCodeRow {
    id: i64,
    key: String,
    name: String,
    status: String,
    amount: i64,
    validity_period_secs: i64,
    plan_id: i64,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    redeemed_at: Option<DateTime<Utc>>,
    used_by_owner_id: Option<i64>,
}

impl TryFrom<RedemptionCodeRow> for RedemptionCode {
    type Error = anyhow::Error;

    fn try_from(r: RedemptionCodeRow) -> anyhow::Result<Self> {
        let status = CodeStatus::from_str(&r.status)
            .ok_or_else(|| anyhow::anyhow!("unknown redemption code status: {}", r.status))?;
        Ok(RedemptionCode {
            id: r.id,
            key: r.key,
            name: r.name,
            status,
            amount: r.amount,
            validity_period_secs: r.validity_period_secs,
            plan_id: r.plan_id,
            expires_at: r.expires_at,
            created_at: r.created_at,
            redeemed_at: r.redeemed_at,
            used_by_owner_id: r.used_by_owner_id,
        })
    }
}

fn into_entries(rows: Vec<LedgerEntryRow>) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
    rows.into_iter().map(TryInto::try_into).collect()
}

/// LedgerPostgresRepository は PostgreSQL 実装の台帳ストア。
///
/// 行ロックは `SELECT ... FOR UPDATE` でトランザクション終了まで保持される。
pub struct LedgerPostgresRepository {
    pool: Arc<PgPool>,
}

impl LedgerPostgresRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for LedgerPostgresRepository {
    async fn begin(&self) -> anyhow::Result<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<QuotaLedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM quota.ledger_entries WHERE id = $1 AND deleted_at IS NULL",
            ENTRY_COLUMNS
        );
        let row: Option<LedgerEntryRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_active_by_owner(&self, owner_id: i64) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM quota.ledger_entries \
             WHERE owner_id = $1 AND status = $2 AND deleted_at IS NULL {}",
            ENTRY_COLUMNS, FIFO_ORDER
        );
        let rows: Vec<LedgerEntryRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(EntryStatus::Active.as_str())
            .fetch_all(self.pool.as_ref())
            .await?;
        into_entries(rows)
    }

    async fn find_due_for_expiry(
        &self,
        cutoff: DateTime<Utc>,
        after_id: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM quota.ledger_entries \
             WHERE status = $1 AND expires_at IS NOT NULL AND expires_at <= $2 \
               AND deleted_at IS NULL AND id > $3 \
             ORDER BY id ASC LIMIT $4",
            ENTRY_COLUMNS
        );
        let rows: Vec<LedgerEntryRow> = sqlx::query_as(&sql)
            .bind(EntryStatus::Active.as_str())
            .bind(cutoff)
            .bind(after_id)
            .bind(limit as i64)
            .fetch_all(self.pool.as_ref())
            .await?;
        into_entries(rows)
    }

    async fn find_by_owner(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<QuotaLedgerEntry>, u64)> {
        let offset = (page.saturating_sub(1) * page_size) as i64;
        let sql = format!(
            "SELECT {} FROM quota.ledger_entries \
             WHERE owner_id = $1 AND deleted_at IS NULL \
             ORDER BY id DESC LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        );
        let rows: Vec<LedgerEntryRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(self.pool.as_ref())
            .await?;

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM quota.ledger_entries WHERE owner_id = $1 AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok((into_entries(rows)?, count.0 as u64))
    }

    async fn sum_active_remaining(&self, owner_id: i64) -> anyhow::Result<i64> {
        let total: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(remaining), 0)::BIGINT FROM quota.ledger_entries \
             WHERE owner_id = $1 AND status = $2 AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .bind(EntryStatus::Active.as_str())
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(total.0)
    }
}

/// PgLedgerTransaction は sqlx のトランザクションをラップする。
/// commit せずに破棄されると sqlx がロールバックする。
struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn create_entry(&mut self, entry: &NewLedgerEntry) -> anyhow::Result<QuotaLedgerEntry> {
        let sql = format!(
            "INSERT INTO quota.ledger_entries \
             (owner_id, origin_id, original_amount, remaining, status, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $3, $4, $5, NOW(), NOW()) \
             RETURNING {}",
            ENTRY_COLUMNS
        );
        let row: LedgerEntryRow = sqlx::query_as(&sql)
            .bind(entry.owner_id)
            .bind(entry.origin_id)
            .bind(entry.amount)
            .bind(EntryStatus::Active.as_str())
            .bind(entry.expires_at)
            .fetch_one(&mut *self.tx)
            .await?;
        row.try_into()
    }

    async fn lock_entry(&mut self, id: i64) -> anyhow::Result<Option<QuotaLedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM quota.ledger_entries WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            ENTRY_COLUMNS
        );
        let row: Option<LedgerEntryRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn lock_active_by_owner(
        &mut self,
        owner_id: i64,
    ) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM quota.ledger_entries \
             WHERE owner_id = $1 AND status = $2 AND deleted_at IS NULL {} FOR UPDATE",
            ENTRY_COLUMNS, FIFO_ORDER
        );
        let rows: Vec<LedgerEntryRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(EntryStatus::Active.as_str())
            .fetch_all(&mut *self.tx)
            .await?;
        into_entries(rows)
    }

    async fn apply_update(&mut self, id: i64, update: &EntryUpdate) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE quota.ledger_entries \
             SET remaining = $2, status = $3, expires_at = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.remaining)
        .bind(update.status.as_str())
        .bind(update.expires_at)
        .bind(update.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("ledger entry not found: {}", id);
        }
        Ok(())
    }

    async fn add_tenant_balance(&mut self, owner_id: i64, delta: i64) -> anyhow::Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE quota.tenant_accounts \
             SET total_balance = GREATEST(total_balance + $2, 0), updated_at = NOW() \
             WHERE owner_id = $1 \
             RETURNING total_balance",
        )
        .bind(owner_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|r| r.0)
            .ok_or_else(|| anyhow::anyhow!("tenant account not found: {}", owner_id))
    }

    async fn lock_code_by_key(&mut self, key: &str) -> anyhow::Result<Option<RedemptionCode>> {
        let sql = format!(
            "SELECT {} FROM quota.redemption_codes \
             WHERE key = $1 AND deleted_at IS NULL FOR UPDATE",
            CODE_COLUMNS
        );
        let row: Option<RedemptionCodeRow> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn save_code(&mut self, code: &RedemptionCode) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE quota.redemption_codes \
             SET status = $2, redeemed_at = $3, used_by_owner_id = $4 \
             WHERE id = $1",
        )
        .bind(code.id)
        .bind(code.status.as_str())
        .bind(code.redeemed_at)
        .bind(code.used_by_owner_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_top_up(&mut self, record: &TopUpRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO quota.top_ups \
             (owner_id, amount, money, trade_no, payment_method, status, created_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.owner_id)
        .bind(record.amount)
        .bind(record.money)
        .bind(&record.trade_no)
        .bind(&record.payment_method)
        .bind(&record.status)
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_log(&mut self, log: &AuditLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO quota.ledger_logs (owner_id, log_type, content, detail, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(log.owner_id)
        .bind(log.log_type.as_str())
        .bind(&log.content)
        .bind(&log.detail)
        .bind(log.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
