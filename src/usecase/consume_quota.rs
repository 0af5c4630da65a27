use std::sync::Arc;
use std::time::Duration;

use crate::domain::repository::LedgerStore;
use crate::domain::service::{plan_fifo_consumption, Clock, SystemClock};
use crate::domain::ErrorKind;
use crate::infrastructure::balance_cache::BalanceCache;
use crate::usecase::deadline::with_deadline;
use crate::usecase::sweep_expired::expire_locked_in_tx;

#[derive(Debug, Clone)]
pub struct ConsumeQuotaInput {
    pub owner_id: i64,
    pub amount: i64,
}

/// 消費結果。
///
/// 台帳エントリで賄えなかった `shortfall` は呼び出し側が恒久残高から別途引き落とす。
/// このユースケースはテナントの total_balance / used_balance を変更しない。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeQuotaOutput {
    pub requested: i64,
    pub consumed: i64,
    pub shortfall: i64,
    /// 消費前に失効させて回収した量。
    pub expired: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeQuotaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ConsumeQuotaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsumeQuotaError::InvalidInput(_) => ErrorKind::InvalidInput,
            ConsumeQuotaError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// ConsumeQuotaUseCase はテナントの Active エントリを期限の早い順に引き落とす。
///
/// 対象テナントの Active エントリ全件をロックしてから計画を立てるため、
/// 同一テナントへの同時消費は直列化される。
pub struct ConsumeQuotaUseCase {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    clock: Arc<dyn Clock>,
    expire_before_consume: bool,
    timeout: Option<Duration>,
}

impl ConsumeQuotaUseCase {
    pub fn new(store: Arc<dyn LedgerStore>, cache: Arc<dyn BalanceCache>) -> Self {
        Self {
            store,
            cache,
            clock: Arc::new(SystemClock),
            expire_before_consume: false,
            timeout: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 引き落とし前に同じトランザクション内で期限到来済みエントリを失効させる。
    pub fn with_expire_before_consume(mut self, enabled: bool) -> Self {
        self.expire_before_consume = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn execute(
        &self,
        input: &ConsumeQuotaInput,
    ) -> Result<ConsumeQuotaOutput, ConsumeQuotaError> {
        if input.owner_id <= 0 {
            return Err(ConsumeQuotaError::InvalidInput(format!(
                "invalid owner_id: {}",
                input.owner_id
            )));
        }
        if input.amount <= 0 {
            return Ok(ConsumeQuotaOutput {
                requested: input.amount,
                ..Default::default()
            });
        }

        let (consumed, expired) = with_deadline(
            self.timeout,
            self.consume_in_tx(input.owner_id, input.amount),
            |limit| ConsumeQuotaError::Storage(format!("operation timed out after {:?}", limit)),
        )
        .await?;

        if expired > 0 {
            self.cache.adjust(input.owner_id, -expired).await;
        }

        let output = ConsumeQuotaOutput {
            requested: input.amount,
            consumed,
            shortfall: input.amount - consumed,
            expired,
        };
        if output.shortfall > 0 {
            tracing::debug!(
                owner_id = input.owner_id,
                requested = output.requested,
                consumed = output.consumed,
                shortfall = output.shortfall,
                "ledger entries insufficient for requested amount"
            );
        }
        Ok(output)
    }

    async fn consume_in_tx(
        &self,
        owner_id: i64,
        amount: i64,
    ) -> Result<(i64, i64), ConsumeQuotaError> {
        let storage = |e: anyhow::Error| ConsumeQuotaError::Storage(e.to_string());
        let now = self.clock.now();

        let mut tx = self.store.begin().await.map_err(storage)?;

        // 失効処理もテナント残高を更新するため、先に Active エントリ全件をロックしておく
        let active = tx.lock_active_by_owner(owner_id).await.map_err(storage)?;
        let (expired, entries) = if self.expire_before_consume {
            expire_locked_in_tx(tx.as_mut(), owner_id, active, now)
                .await
                .map_err(storage)?
        } else {
            (0, active)
        };

        let plan = plan_fifo_consumption(entries, amount, now);
        for debit in &plan.debits {
            tx.apply_update(debit.entry_id, &debit.update)
                .await
                .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)?;

        tracing::debug!(
            owner_id,
            amount,
            consumed = plan.consumed,
            entries = plan.debits.len(),
            "quota consumed"
        );
        Ok((plan.consumed, expired))
    }
}
