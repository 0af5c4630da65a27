use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::ledger_postgres::{RedemptionCodeRow, CODE_COLUMNS};
use crate::domain::entity::{CodeStatus, NewRedemptionCode, RedemptionCode};
use crate::domain::repository::RedemptionCodeRepository;

pub struct RedemptionCodePostgresRepository {
    pool: Arc<PgPool>,
}

impl RedemptionCodePostgresRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RedemptionCodeRepository for RedemptionCodePostgresRepository {
    async fn create(&self, code: &NewRedemptionCode) -> anyhow::Result<RedemptionCode> {
        let sql = format!(
            "INSERT INTO quota.redemption_codes \
             (key, name, status, amount, validity_period_secs, plan_id, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             RETURNING {}",
            CODE_COLUMNS
        );
        let row: RedemptionCodeRow = sqlx::query_as(&sql)
            .bind(&code.key)
            .bind(&code.name)
            .bind(CodeStatus::Enabled.as_str())
            .bind(code.amount)
            .bind(code.validity_period_secs)
            .bind(code.plan_id)
            .bind(code.expires_at)
            .fetch_one(self.pool.as_ref())
            .await?;
        row.try_into()
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<RedemptionCode>> {
        let sql = format!(
            "SELECT {} FROM quota.redemption_codes WHERE id = $1 AND deleted_at IS NULL",
            CODE_COLUMNS
        );
        let row: Option<RedemptionCodeRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn transition_status(
        &self,
        id: i64,
        from: CodeStatus,
        to: CodeStatus,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE quota.redemption_codes SET status = $3 \
             WHERE id = $1 AND status = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_invalid(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE quota.redemption_codes SET deleted_at = $1 \
             WHERE deleted_at IS NULL \
               AND (status IN ($2, $3) \
                    OR (status = $4 AND expires_at IS NOT NULL AND expires_at < $1))",
        )
        .bind(now)
        .bind(CodeStatus::Used.as_str())
        .bind(CodeStatus::Disabled.as_str())
        .bind(CodeStatus::Enabled.as_str())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}
