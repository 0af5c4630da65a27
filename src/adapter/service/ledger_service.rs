//! 台帳コアの呼び出し境界（課金・リレー・管理 API・スケジューラから使う）。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::entity::{
    BalanceSummary, ExpiryChange, QuotaLedgerEntry, RedeemResult, RedemptionCode,
};
use crate::domain::repository::{LedgerStore, RedemptionCodeRepository, TenantAccountRepository};
use crate::domain::service::Clock;
use crate::domain::ErrorKind;
use crate::infrastructure::balance_cache::BalanceCache;
use crate::infrastructure::config::{LedgerConfig, RedemptionConfig};
use crate::infrastructure::rate_limiter::SlidingWindowRateLimiter;
use crate::usecase::{
    AdjustEntryError, AdjustEntryInput, AdjustEntryUseCase, CheckRateLimitError,
    CheckRateLimitInput, CheckRateLimitUseCase, ConsumeQuotaError, ConsumeQuotaInput,
    ConsumeQuotaOutput, ConsumeQuotaUseCase, CreateRedemptionCodesError,
    CreateRedemptionCodesInput, CreateRedemptionCodesUseCase, DisableRedemptionCodeError,
    DisableRedemptionCodeUseCase, GetBalanceSummaryError, GetBalanceSummaryUseCase,
    ListActiveEntriesError, ListActiveEntriesUseCase, ListLedgerEntriesError,
    ListLedgerEntriesInput, ListLedgerEntriesOutput, ListLedgerEntriesUseCase, PlanActivator,
    PurgeInvalidCodesError, PurgeInvalidCodesUseCase, RedeemCodeError, RedeemCodeInput,
    RedeemCodeUseCase, SweepExpiredError, SweepExpiredUseCase, SweepOutput,
};

/// LedgerError は境界で返すエラー。`kind` で分類し、`message` は利用者向けの説明。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct LedgerError {
    pub kind: ErrorKind,
    pub message: String,
}

macro_rules! impl_from_usecase_error {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for LedgerError {
                fn from(e: $err) -> Self {
                    LedgerError {
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                }
            }
        )*
    };
}

impl_from_usecase_error!(
    AdjustEntryError,
    CheckRateLimitError,
    ConsumeQuotaError,
    CreateRedemptionCodesError,
    DisableRedemptionCodeError,
    GetBalanceSummaryError,
    ListActiveEntriesError,
    ListLedgerEntriesError,
    PurgeInvalidCodesError,
    RedeemCodeError,
    SweepExpiredError,
);

/// QuotaLedgerService の構築に必要な依存。
pub struct LedgerDependencies {
    pub store: Arc<dyn LedgerStore>,
    pub accounts: Arc<dyn TenantAccountRepository>,
    pub codes: Arc<dyn RedemptionCodeRepository>,
    pub cache: Arc<dyn BalanceCache>,
    pub limiter: Arc<SlidingWindowRateLimiter>,
    pub plan_activator: Arc<dyn PlanActivator>,
    pub clock: Arc<dyn Clock>,
}

/// QuotaLedgerService は台帳コアの操作をまとめたサービス層。
pub struct QuotaLedgerService {
    consume_uc: ConsumeQuotaUseCase,
    redeem_uc: RedeemCodeUseCase,
    adjust_uc: AdjustEntryUseCase,
    list_active_uc: ListActiveEntriesUseCase,
    list_entries_uc: ListLedgerEntriesUseCase,
    summary_uc: GetBalanceSummaryUseCase,
    sweep_uc: Arc<SweepExpiredUseCase>,
    create_codes_uc: CreateRedemptionCodesUseCase,
    disable_code_uc: DisableRedemptionCodeUseCase,
    purge_codes_uc: PurgeInvalidCodesUseCase,
    rate_limit_uc: CheckRateLimitUseCase,
}

impl QuotaLedgerService {
    pub fn new(
        deps: LedgerDependencies,
        ledger_cfg: &LedgerConfig,
        redemption_cfg: &RedemptionConfig,
    ) -> Self {
        let timeout = ledger_cfg.operation_timeout();

        let mut consume_uc = ConsumeQuotaUseCase::new(deps.store.clone(), deps.cache.clone())
            .with_clock(deps.clock.clone())
            .with_expire_before_consume(ledger_cfg.expire_before_consume);
        let mut redeem_uc = RedeemCodeUseCase::new(
            deps.store.clone(),
            deps.cache.clone(),
            deps.plan_activator.clone(),
        )
        .with_clock(deps.clock.clone())
        .with_delay(Duration::from_millis(redemption_cfg.delay_ms))
        .with_quota_per_unit(redemption_cfg.quota_per_unit);
        let mut adjust_uc = AdjustEntryUseCase::new(deps.store.clone(), deps.cache.clone())
            .with_clock(deps.clock.clone());
        if !timeout.is_zero() {
            consume_uc = consume_uc.with_timeout(timeout);
            redeem_uc = redeem_uc.with_timeout(timeout);
            adjust_uc = adjust_uc.with_timeout(timeout);
        }

        Self {
            consume_uc,
            redeem_uc,
            adjust_uc,
            list_active_uc: ListActiveEntriesUseCase::new(deps.store.clone()),
            list_entries_uc: ListLedgerEntriesUseCase::new(deps.store.clone()),
            summary_uc: GetBalanceSummaryUseCase::new(
                deps.accounts,
                deps.store.clone(),
                deps.cache.clone(),
            ),
            sweep_uc: Arc::new(
                SweepExpiredUseCase::new(deps.store, deps.cache).with_clock(deps.clock.clone()),
            ),
            create_codes_uc: CreateRedemptionCodesUseCase::new(deps.codes.clone()),
            disable_code_uc: DisableRedemptionCodeUseCase::new(deps.codes.clone()),
            purge_codes_uc: PurgeInvalidCodesUseCase::new(deps.codes).with_clock(deps.clock),
            rate_limit_uc: CheckRateLimitUseCase::new(deps.limiter),
        }
    }

    /// スケジューラに渡すスイープユースケース。
    pub fn sweep_usecase(&self) -> Arc<SweepExpiredUseCase> {
        self.sweep_uc.clone()
    }

    pub async fn consume(
        &self,
        owner_id: i64,
        amount: i64,
    ) -> Result<ConsumeQuotaOutput, LedgerError> {
        let input = ConsumeQuotaInput { owner_id, amount };
        Ok(self.consume_uc.execute(&input).await?)
    }

    pub async fn redeem(&self, key: &str, owner_id: i64) -> Result<RedeemResult, LedgerError> {
        let input = RedeemCodeInput {
            key: key.to_string(),
            owner_id,
        };
        Ok(self.redeem_uc.execute(&input).await?)
    }

    pub async fn adjust_entry(
        &self,
        entry_id: i64,
        new_remaining: i64,
        expiry: ExpiryChange,
    ) -> Result<QuotaLedgerEntry, LedgerError> {
        let input = AdjustEntryInput {
            entry_id,
            new_remaining,
            expiry,
        };
        Ok(self.adjust_uc.execute(&input).await?)
    }

    pub async fn list_active_entries(
        &self,
        owner_id: i64,
    ) -> Result<Vec<QuotaLedgerEntry>, LedgerError> {
        Ok(self.list_active_uc.execute(owner_id).await?)
    }

    pub async fn list_ledger_entries(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<ListLedgerEntriesOutput, LedgerError> {
        let input = ListLedgerEntriesInput {
            owner_id,
            page,
            page_size,
        };
        Ok(self.list_entries_uc.execute(&input).await?)
    }

    pub async fn balance_summary(&self, owner_id: i64) -> Result<BalanceSummary, LedgerError> {
        Ok(self.summary_uc.execute(owner_id).await?)
    }

    pub async fn cached_total_balance(&self, owner_id: i64) -> Result<i64, LedgerError> {
        Ok(self.summary_uc.cached_total_balance(owner_id).await?)
    }

    pub async fn sweep_due(&self, batch_size: u32) -> Result<SweepOutput, LedgerError> {
        Ok(self.sweep_uc.execute(batch_size).await?)
    }

    pub async fn sweep_for_owner(&self, owner_id: i64) -> Result<i64, LedgerError> {
        Ok(self.sweep_uc.sweep_for_owner(owner_id).await?)
    }

    pub async fn create_codes(
        &self,
        input: &CreateRedemptionCodesInput,
    ) -> Result<Vec<RedemptionCode>, LedgerError> {
        Ok(self.create_codes_uc.execute(input).await?)
    }

    pub async fn disable_code(&self, id: i64) -> Result<(), LedgerError> {
        Ok(self.disable_code_uc.execute(id).await?)
    }

    pub async fn purge_invalid_codes(&self) -> Result<u64, LedgerError> {
        Ok(self.purge_codes_uc.execute().await?)
    }

    pub fn allow(
        &self,
        key: &str,
        max_requests: usize,
        window_secs: i64,
    ) -> Result<bool, LedgerError> {
        let input = CheckRateLimitInput {
            key: key.to_string(),
            max_requests,
            window_secs,
        };
        Ok(self.rate_limit_uc.execute(&input)?)
    }
}
