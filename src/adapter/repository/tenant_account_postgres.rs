use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::entity::TenantBalance;
use crate::domain::repository::TenantAccountRepository;

pub struct TenantAccountPostgresRepository {
    pool: Arc<PgPool>,
}

impl TenantAccountPostgresRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TenantAccountRow {
    owner_id: i64,
    total_balance: i64,
    used_balance: i64,
}

impl From<TenantAccountRow> for TenantBalance {
    fn from(r: TenantAccountRow) -> Self {
        TenantBalance {
            owner_id: r.owner_id,
            total_balance: r.total_balance,
            used_balance: r.used_balance,
        }
    }
}

#[async_trait]
impl TenantAccountRepository for TenantAccountPostgresRepository {
    async fn find_balance(&self, owner_id: i64) -> anyhow::Result<Option<TenantBalance>> {
        let row: Option<TenantAccountRow> = sqlx::query_as(
            "SELECT owner_id, total_balance, used_balance \
             FROM quota.tenant_accounts WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(Into::into))
    }
}
