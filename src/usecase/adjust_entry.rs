use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::domain::entity::{AuditLogEntry, EntryUpdate, ExpiryChange, LogType, QuotaLedgerEntry};
use crate::domain::repository::LedgerStore;
use crate::domain::service::{Clock, SystemClock};
use crate::domain::ErrorKind;
use crate::infrastructure::balance_cache::BalanceCache;
use crate::usecase::deadline::with_deadline;

#[derive(Debug, Clone)]
pub struct AdjustEntryInput {
    pub entry_id: i64,
    pub new_remaining: i64,
    pub expiry: ExpiryChange,
}

#[derive(Debug, thiserror::Error)]
pub enum AdjustEntryError {
    #[error("ledger entry not found: {0}")]
    NotFound(i64),

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AdjustEntryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdjustEntryError::NotFound(_) => ErrorKind::NotFound,
            AdjustEntryError::InvalidAmount(_) => ErrorKind::InvalidInput,
            AdjustEntryError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// AdjustEntryUseCase は管理者による台帳エントリの残量・期限の上書きを行う。
///
/// 残量の差分は同じトランザクションでテナント残高に反映される。
pub struct AdjustEntryUseCase {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
}

impl AdjustEntryUseCase {
    pub fn new(store: Arc<dyn LedgerStore>, cache: Arc<dyn BalanceCache>) -> Self {
        Self {
            store,
            cache,
            clock: Arc::new(SystemClock),
            timeout: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn execute(
        &self,
        input: &AdjustEntryInput,
    ) -> Result<QuotaLedgerEntry, AdjustEntryError> {
        if input.new_remaining < 0 {
            return Err(AdjustEntryError::InvalidAmount(input.new_remaining));
        }

        let (entry, delta) = with_deadline(self.timeout, self.adjust_in_tx(input), |limit| {
            AdjustEntryError::Storage(format!("operation timed out after {:?}", limit))
        })
        .await?;

        if delta != 0 {
            self.cache.adjust(entry.owner_id, delta).await;
        }
        tracing::info!(
            entry_id = entry.id,
            owner_id = entry.owner_id,
            delta,
            status = %entry.status,
            "ledger entry adjusted"
        );
        Ok(entry)
    }

    async fn adjust_in_tx(
        &self,
        input: &AdjustEntryInput,
    ) -> Result<(QuotaLedgerEntry, i64), AdjustEntryError> {
        let storage = |e: anyhow::Error| AdjustEntryError::Storage(e.to_string());
        let now = self.clock.now();

        let mut tx = self.store.begin().await.map_err(storage)?;
        let mut entry = tx
            .lock_entry(input.entry_id)
            .await
            .map_err(storage)?
            .ok_or(AdjustEntryError::NotFound(input.entry_id))?;

        let before = entry.remaining;
        let delta = entry.adjust(input.new_remaining, input.expiry, now);
        tx.apply_update(entry.id, &EntryUpdate::from(&entry))
            .await
            .map_err(storage)?;
        if delta != 0 {
            tx.add_tenant_balance(entry.owner_id, delta)
                .await
                .map_err(storage)?;
        }
        tx.append_log(&AuditLogEntry::new(
            entry.owner_id,
            LogType::Manage,
            format!(
                "ledger entry {} adjusted from {} to {}",
                entry.id, before, entry.remaining
            ),
            json!({
                "entry_id": entry.id,
                "before": before,
                "after": entry.remaining,
                "expires_at": entry.expires_at,
            }),
            now,
        ))
        .await
        .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok((entry, delta))
    }
}
