use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::entity::{
    AuditLogEntry, CodeStatus, LogType, NewLedgerEntry, RedeemResult, TopUpRecord,
};
use crate::domain::repository::LedgerStore;
use crate::domain::service::{Clock, SystemClock};
use crate::domain::ErrorKind;
use crate::infrastructure::balance_cache::BalanceCache;
use crate::usecase::deadline::with_deadline;

/// 引換キーの長さ上限。
pub const MAX_KEY_LENGTH: usize = 32;

/// PlanActivator はサブスクリプションプランを有効化する外部コラボレーター。
///
/// 引換トランザクションの commit 直前に呼ばれる。有効化が成功した後に
/// commit が失敗した場合、有効化は巻き戻らない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlanActivator: Send + Sync {
    /// プランを有効化し、プラン名を返す。
    async fn activate(&self, owner_id: i64, plan_id: i64) -> anyhow::Result<String>;
}

/// プラン機能を持たない構成で使う。常に失敗する。
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPlanActivator;

#[async_trait]
impl PlanActivator for UnsupportedPlanActivator {
    async fn activate(&self, _owner_id: i64, plan_id: i64) -> anyhow::Result<String> {
        anyhow::bail!("subscription plans are not supported: plan_id={}", plan_id)
    }
}

#[derive(Debug, Clone)]
pub struct RedeemCodeInput {
    pub key: String,
    pub owner_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RedeemCodeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid redemption code")]
    InvalidCode,

    #[error("redemption code has already been used")]
    CodeAlreadyUsed,

    #[error("redemption code has expired")]
    CodeExpired,

    /// 内部原因はログにのみ出力し、呼び出し側には返さない。
    #[error("redemption failed, please try again later")]
    RedeemFailed,
}

impl RedeemCodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RedeemCodeError::InvalidInput(_) => ErrorKind::InvalidInput,
            RedeemCodeError::InvalidCode => ErrorKind::NotFound,
            RedeemCodeError::CodeAlreadyUsed => ErrorKind::Conflict,
            RedeemCodeError::CodeExpired => ErrorKind::Expired,
            RedeemCodeError::RedeemFailed => ErrorKind::RedeemFailed,
        }
    }
}

/// RedeemCodeUseCase は引換コードを1回だけ適用する。
///
/// コード行のロック、残高加算、台帳エントリ作成、使用済み化、入金履歴と監査ログの
/// 書き込みはすべて1トランザクションで行う。
pub struct RedeemCodeUseCase {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    plan_activator: Arc<dyn PlanActivator>,
    clock: Arc<dyn Clock>,
    delay: Duration,
    quota_per_unit: i64,
    timeout: Option<Duration>,
}

impl RedeemCodeUseCase {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
        plan_activator: Arc<dyn PlanActivator>,
    ) -> Self {
        Self {
            store,
            cache,
            plan_activator,
            clock: Arc::new(SystemClock),
            delay: Duration::ZERO,
            quota_per_unit: 500_000,
            timeout: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// トランザクション開始前に挿入する固定遅延。
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_quota_per_unit(mut self, quota_per_unit: i64) -> Self {
        self.quota_per_unit = quota_per_unit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn execute(&self, input: &RedeemCodeInput) -> Result<RedeemResult, RedeemCodeError> {
        let key = input.key.trim();
        if key.is_empty() {
            return Err(RedeemCodeError::InvalidInput("key is required".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(RedeemCodeError::InvalidCode);
        }
        if input.owner_id <= 0 {
            return Err(RedeemCodeError::InvalidInput(format!(
                "invalid owner_id: {}",
                input.owner_id
            )));
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let (result, credited) = with_deadline(
            self.timeout,
            self.redeem_in_tx(key, input.owner_id),
            |limit| {
                tracing::error!(owner_id = input.owner_id, ?limit, "redemption timed out");
                RedeemCodeError::RedeemFailed
            },
        )
        .await?;

        if credited > 0 {
            self.cache.adjust(input.owner_id, credited).await;
        }
        tracing::info!(
            owner_id = input.owner_id,
            result_type = result.kind(),
            "redemption code applied"
        );
        Ok(result)
    }

    async fn redeem_in_tx(
        &self,
        key: &str,
        owner_id: i64,
    ) -> Result<(RedeemResult, i64), RedeemCodeError> {
        let failed = |e: anyhow::Error| {
            tracing::error!(owner_id, error = %e, "redemption failed");
            RedeemCodeError::RedeemFailed
        };
        let now = self.clock.now();

        let mut tx = self.store.begin().await.map_err(failed)?;
        let mut code = tx
            .lock_code_by_key(key)
            .await
            .map_err(failed)?
            .ok_or(RedeemCodeError::InvalidCode)?;

        if code.status != CodeStatus::Enabled {
            return Err(RedeemCodeError::CodeAlreadyUsed);
        }
        if code.is_expired(now) {
            return Err(RedeemCodeError::CodeExpired);
        }

        let plan_code = code.is_plan_code();
        let mut credited = 0;
        if !plan_code {
            tx.add_tenant_balance(owner_id, code.amount)
                .await
                .map_err(failed)?;
            credited = code.amount;
            if code.amount > 0 {
                if let Some(expires_at) = code.grant_expiry(now).map_err(failed)? {
                    tx.create_entry(&NewLedgerEntry {
                        owner_id,
                        origin_id: Some(code.id),
                        amount: code.amount,
                        expires_at: Some(expires_at),
                    })
                    .await
                    .map_err(failed)?;
                }
            }
        }

        code.mark_used(owner_id, now);
        tx.save_code(&code).await.map_err(failed)?;

        let units = code.amount.checked_div(self.quota_per_unit).unwrap_or(0);
        tx.insert_top_up(&TopUpRecord::from_redemption(
            owner_id, code.id, plan_code, units, now,
        ))
        .await
        .map_err(failed)?;

        let result = if plan_code {
            let plan_name = self
                .plan_activator
                .activate(owner_id, code.plan_id)
                .await
                .map_err(failed)?;
            RedeemResult::Subscription { plan_name }
        } else {
            RedeemResult::Balance { quota: code.amount }
        };

        let content = match &result {
            RedeemResult::Balance { quota } => format!("redeemed code {} for quota {}", code.id, quota),
            RedeemResult::Subscription { plan_name } => {
                format!("redeemed code {} for plan {}", code.id, plan_name)
            }
        };
        tx.append_log(&AuditLogEntry::new(
            owner_id,
            LogType::Topup,
            content,
            json!({ "code_id": code.id, "result": &result }),
            now,
        ))
        .await
        .map_err(failed)?;

        tx.commit().await.map_err(failed)?;
        Ok((result, credited))
    }
}
