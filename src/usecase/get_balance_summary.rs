use std::sync::Arc;

use crate::domain::entity::BalanceSummary;
use crate::domain::repository::{LedgerStore, TenantAccountRepository};
use crate::domain::ErrorKind;
use crate::infrastructure::balance_cache::BalanceCache;

#[derive(Debug, thiserror::Error)]
pub enum GetBalanceSummaryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("tenant account not found: {0}")]
    NotFound(i64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GetBalanceSummaryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GetBalanceSummaryError::InvalidInput(_) => ErrorKind::InvalidInput,
            GetBalanceSummaryError::NotFound(_) => ErrorKind::NotFound,
            GetBalanceSummaryError::Internal(_) => ErrorKind::Storage,
        }
    }
}

/// GetBalanceSummaryUseCase は残高を総額・期限付き・恒久の内訳で返す。
///
/// 内訳はストアから読み、読んだ総額でキャッシュを上書きする。
pub struct GetBalanceSummaryUseCase {
    accounts: Arc<dyn TenantAccountRepository>,
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
}

impl GetBalanceSummaryUseCase {
    pub fn new(
        accounts: Arc<dyn TenantAccountRepository>,
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
    ) -> Self {
        Self {
            accounts,
            store,
            cache,
        }
    }

    pub async fn execute(&self, owner_id: i64) -> Result<BalanceSummary, GetBalanceSummaryError> {
        validate_owner(owner_id)?;
        let total = self.load_total(owner_id).await?;
        let expiring = self
            .store
            .sum_active_remaining(owner_id)
            .await
            .map_err(|e| GetBalanceSummaryError::Internal(e.to_string()))?;

        self.cache.set(owner_id, total).await;
        Ok(BalanceSummary::new(total, expiring))
    }

    /// 総額のみを返す。キャッシュにあればストアを読まない。
    pub async fn cached_total_balance(&self, owner_id: i64) -> Result<i64, GetBalanceSummaryError> {
        validate_owner(owner_id)?;
        if let Some(total) = self.cache.get(owner_id).await {
            return Ok(total);
        }
        let total = self.load_total(owner_id).await?;
        self.cache.set(owner_id, total).await;
        Ok(total)
    }

    async fn load_total(&self, owner_id: i64) -> Result<i64, GetBalanceSummaryError> {
        self.accounts
            .find_balance(owner_id)
            .await
            .map_err(|e| GetBalanceSummaryError::Internal(e.to_string()))?
            .map(|b| b.total_balance)
            .ok_or(GetBalanceSummaryError::NotFound(owner_id))
    }
}

fn validate_owner(owner_id: i64) -> Result<(), GetBalanceSummaryError> {
    if owner_id <= 0 {
        return Err(GetBalanceSummaryError::InvalidInput(format!(
            "invalid owner_id: {}",
            owner_id
        )));
    }
    Ok(())
}
