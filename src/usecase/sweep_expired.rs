use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::domain::entity::{AuditLogEntry, EntryUpdate, LogType, QuotaLedgerEntry};
use crate::domain::repository::{LedgerStore, LedgerTransaction};
use crate::domain::service::{Clock, SystemClock};
use crate::domain::ErrorKind;
use crate::infrastructure::balance_cache::BalanceCache;

/// 1回のスイープ結果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutput {
    /// Expired に遷移したエントリ数。
    pub expired: u64,
    /// テナント残高から回収した合計量。
    pub clawed_back: i64,
    /// 失敗してスキップしたエントリ数（ログのみ）。
    pub failed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SweepExpiredError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("another sweep is already running")]
    AlreadyRunning,

    #[error("storage error: {0}")]
    Storage(String),
}

impl SweepExpiredError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SweepExpiredError::InvalidInput(_) => ErrorKind::InvalidInput,
            SweepExpiredError::AlreadyRunning => ErrorKind::Conflict,
            SweepExpiredError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// SweepExpiredUseCase は期限到来済みエントリを失効させ、残量をテナント残高から回収する。
///
/// 全体スイープ (`execute`) はエントリごとに独立したトランザクションで処理し、
/// 1件の失敗はバッチを中断しない。同時に実行できる全体スイープは1つだけ。
pub struct SweepExpiredUseCase {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl SweepExpiredUseCase {
    pub fn new(store: Arc<dyn LedgerStore>, cache: Arc<dyn BalanceCache>) -> Self {
        Self {
            store,
            cache,
            clock: Arc::new(SystemClock),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 期限到来済みエントリがなくなるまで `batch_size` 件ずつ処理する。
    pub async fn execute(&self, batch_size: u32) -> Result<SweepOutput, SweepExpiredError> {
        if batch_size == 0 {
            return Err(SweepExpiredError::InvalidInput(
                "batch_size must be positive".to_string(),
            ));
        }
        let _guard = RunningGuard::acquire(&self.running).ok_or(SweepExpiredError::AlreadyRunning)?;

        let mut output = SweepOutput::default();
        let cutoff = self.clock.now();
        let mut after_id = 0i64;
        loop {
            let due = self
                .store
                .find_due_for_expiry(cutoff, after_id, batch_size)
                .await
                .map_err(|e| SweepExpiredError::Storage(e.to_string()))?;
            let fetched = due.len();

            for entry in due {
                // 失敗したエントリも読み飛ばし、次回のスイープで再試行する
                after_id = entry.id;
                match self.expire_one(entry.id, cutoff).await {
                    Ok(Some(clawback)) => {
                        output.expired += 1;
                        output.clawed_back += clawback;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        output.failed += 1;
                        tracing::warn!(
                            entry_id = entry.id,
                            owner_id = entry.owner_id,
                            error = %e,
                            "failed to expire ledger entry"
                        );
                    }
                }
            }

            if fetched < batch_size as usize {
                break;
            }
        }

        if output.expired > 0 || output.failed > 0 {
            tracing::info!(
                expired = output.expired,
                clawed_back = output.clawed_back,
                failed = output.failed,
                "expired quota sweep finished"
            );
        } else {
            tracing::debug!("expired quota sweep found nothing to do");
        }
        Ok(output)
    }

    /// 1テナント分の期限到来済みエントリを単一トランザクションで失効させ、回収量を返す。
    pub async fn sweep_for_owner(&self, owner_id: i64) -> Result<i64, SweepExpiredError> {
        if owner_id <= 0 {
            return Err(SweepExpiredError::InvalidInput(format!(
                "invalid owner_id: {}",
                owner_id
            )));
        }
        let now = self.clock.now();
        let storage = |e: anyhow::Error| SweepExpiredError::Storage(e.to_string());

        let mut tx = self.store.begin().await.map_err(storage)?;
        let clawed_back = expire_due_in_tx(tx.as_mut(), owner_id, now)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        if clawed_back > 0 {
            self.cache.adjust(owner_id, -clawed_back).await;
        }
        Ok(clawed_back)
    }

    async fn expire_one(&self, entry_id: i64, now: DateTime<Utc>) -> anyhow::Result<Option<i64>> {
        let mut tx = self.store.begin().await?;

        // 取得後に消費・失効・期限延長された可能性があるため、ロック下で再確認する
        let mut entry = match tx.lock_entry(entry_id).await? {
            Some(entry) if entry.is_active() && entry.is_due(now) => entry,
            _ => return Ok(None),
        };

        let clawback = entry.expire(now);
        tx.apply_update(entry.id, &EntryUpdate::from(&entry)).await?;
        if clawback > 0 {
            tx.add_tenant_balance(entry.owner_id, -clawback).await?;
            tx.append_log(&AuditLogEntry::new(
                entry.owner_id,
                LogType::System,
                format!("expired quota reclaimed: {}", clawback),
                json!({ "entry_id": entry.id, "amount": clawback }),
                now,
            ))
            .await?;
        }
        tx.commit().await?;

        if clawback > 0 {
            self.cache.adjust(entry.owner_id, -clawback).await;
        }
        tracing::debug!(entry_id, owner_id = entry.owner_id, clawback, "ledger entry expired");
        Ok(Some(clawback))
    }
}

/// 呼び出し側のトランザクション内で、テナントの期限到来済みエントリをすべて失効させる。
async fn expire_due_in_tx(
    tx: &mut dyn LedgerTransaction,
    owner_id: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<i64> {
    let active = tx.lock_active_by_owner(owner_id).await?;
    let (total, _) = expire_locked_in_tx(tx, owner_id, active, now).await?;
    Ok(total)
}

/// `lock_active_by_owner` でロック済みのエントリのうち期限到来済みのものを失効させる。
/// テナント残高は合計回収量で1回だけ減算する。
///
/// 戻り値は (回収量, 失効しなかった Active エントリ)。後者は FIFO 順を保つ。
pub(crate) async fn expire_locked_in_tx(
    tx: &mut dyn LedgerTransaction,
    owner_id: i64,
    active: Vec<QuotaLedgerEntry>,
    now: DateTime<Utc>,
) -> anyhow::Result<(i64, Vec<QuotaLedgerEntry>)> {
    let (due, survivors): (Vec<_>, Vec<_>) = active.into_iter().partition(|e| e.is_due(now));
    if due.is_empty() {
        return Ok((0, survivors));
    }

    let mut total = 0i64;
    let mut expired_ids = Vec::with_capacity(due.len());
    for mut entry in due {
        total += entry.expire(now);
        tx.apply_update(entry.id, &EntryUpdate::from(&entry)).await?;
        expired_ids.push(entry.id);
    }

    if total > 0 {
        tx.add_tenant_balance(owner_id, -total).await?;
        tx.append_log(&AuditLogEntry::new(
            owner_id,
            LogType::System,
            format!("expired quota reclaimed: {}", total),
            json!({ "entry_ids": &expired_ids, "amount": total }),
            now,
        ))
        .await?;
    }
    tracing::debug!(owner_id, entries = expired_ids.len(), total, "expired due entries for owner");
    Ok((total, survivors))
}

/// 実行中フラグを保持し、drop 時に解放する。
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::repository::ledger_memory::JournaledLedgerStore;
    use crate::adapter::repository::InMemoryLedgerStore;
    use crate::domain::entity::EntryStatus;
    use crate::domain::repository::ledger_repository::MockLedgerStore;
    use crate::domain::repository::TenantAccountRepository;
    use crate::domain::service::ManualClock;
    use crate::infrastructure::balance_cache::{MokaBalanceCache, NoopBalanceCache};
    use chrono::Duration;

    fn due_entry(id: i64, now: DateTime<Utc>) -> QuotaLedgerEntry {
        QuotaLedgerEntry {
            id,
            owner_id: 1,
            origin_id: None,
            original_amount: 10,
            remaining: 10,
            status: EntryStatus::Active,
            expires_at: Some(now - Duration::seconds(1)),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn usecase(store: &InMemoryLedgerStore, clock: Arc<ManualClock>) -> SweepExpiredUseCase {
        SweepExpiredUseCase::new(Arc::new(store.clone()), Arc::new(NoopBalanceCache))
            .with_clock(clock)
    }

    async fn balance(store: &InMemoryLedgerStore, owner_id: i64) -> i64 {
        store.find_balance(owner_id).await.unwrap().unwrap().total_balance
    }

    #[tokio::test]
    async fn test_sweep_expires_due_entries_and_claws_back() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        store.seed_tenant(1, 1000).await;
        let due = store.seed_entry(1, 300, Some(now - Duration::minutes(5))).await;
        let future = store.seed_entry(1, 200, Some(now + Duration::hours(1))).await;
        let permanent = store.seed_entry(1, 100, None).await;

        let uc = usecase(&store, Arc::new(ManualClock::new(now)));
        let out = uc.execute(300).await.unwrap();

        assert_eq!(out.expired, 1);
        assert_eq!(out.clawed_back, 300);
        assert_eq!(out.failed, 0);
        assert_eq!(balance(&store, 1).await, 700);
        let due = store.entry(due.id).await.unwrap();
        assert_eq!(due.status, EntryStatus::Expired);
        assert_eq!(due.remaining, 0);
        assert!(store.entry(future.id).await.unwrap().is_active());
        assert!(store.entry(permanent.id).await.unwrap().is_active());
        assert_eq!(store.logs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_processes_multiple_batches() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        store.seed_tenant(1, 1000).await;
        for _ in 0..7 {
            store.seed_entry(1, 10, Some(now - Duration::seconds(1))).await;
        }

        let uc = usecase(&store, Arc::new(ManualClock::new(now)));
        let out = uc.execute(3).await.unwrap();

        assert_eq!(out.expired, 7);
        assert_eq!(out.clawed_back, 70);
        assert_eq!(balance(&store, 1).await, 930);
    }

    #[tokio::test]
    async fn test_sweep_zero_remaining_only_flips_status() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        store.seed_tenant(1, 50).await;
        let empty = store.seed_entry(1, 0, Some(now - Duration::seconds(1))).await;

        let uc = usecase(&store, Arc::new(ManualClock::new(now)));
        let out = uc.execute(10).await.unwrap();

        assert_eq!(out.expired, 1);
        assert_eq!(out.clawed_back, 0);
        assert_eq!(store.entry(empty.id).await.unwrap().status, EntryStatus::Expired);
        assert_eq!(balance(&store, 1).await, 50);
        assert!(store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_failure_on_one_entry_does_not_abort_batch() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        store.seed_tenant(1, 1000).await;
        let bad = store.seed_entry(1, 100, Some(now - Duration::seconds(1))).await;
        let good = store.seed_entry(1, 200, Some(now - Duration::seconds(1))).await;
        store.fail_updates_for(bad.id).await;

        let uc = usecase(&store, Arc::new(ManualClock::new(now)));
        let out = uc.execute(10).await.unwrap();

        assert_eq!(out.expired, 1);
        assert_eq!(out.failed, 1);
        assert_eq!(balance(&store, 1).await, 800);
        assert!(store.entry(bad.id).await.unwrap().is_active());
        assert_eq!(store.entry(good.id).await.unwrap().status, EntryStatus::Expired);
    }

    #[tokio::test]
    async fn test_sweep_terminates_when_every_entry_fails() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        store.seed_tenant(1, 1000).await;
        let bad = store.seed_entry(1, 100, Some(now - Duration::seconds(1))).await;
        store.fail_updates_for(bad.id).await;

        let uc = usecase(&store, Arc::new(ManualClock::new(now)));
        let out = uc.execute(1).await.unwrap();

        assert_eq!(out.expired, 0);
        assert_eq!(out.failed, 1);
        assert!(!uc.is_running());
    }

    #[tokio::test]
    async fn test_sweep_moves_past_entries_of_tenant_without_account() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        // テナント 7 のアカウントは存在しないため回収は毎回失敗する
        let orphan = store.seed_entry(7, 100, Some(now - Duration::minutes(2))).await;
        store.seed_tenant(1, 1000).await;
        let healthy = store.seed_entry(1, 300, Some(now - Duration::minutes(1))).await;
        assert!(orphan.id < healthy.id);

        let uc = usecase(&store, Arc::new(ManualClock::new(now)));
        let out = uc.execute(1).await.unwrap();

        assert_eq!(out.failed, 1);
        assert_eq!(out.expired, 1);
        assert_eq!(out.clawed_back, 300);
        assert!(store.entry(orphan.id).await.unwrap().is_active());
        assert_eq!(store.entry(healthy.id).await.unwrap().status, EntryStatus::Expired);
        assert_eq!(balance(&store, 1).await, 700);
    }

    #[tokio::test]
    async fn test_sweep_pages_by_id_cursor() {
        let mut mock = MockLedgerStore::new();
        let now = Utc::now();
        let mut seq = mockall::Sequence::new();
        mock.expect_find_due_for_expiry()
            .withf(|_, after_id, limit| *after_id == 0 && *limit == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _, _| Ok(vec![due_entry(3, now), due_entry(8, now)]));
        mock.expect_find_due_for_expiry()
            .withf(|_, after_id, limit| *after_id == 8 && *limit == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(vec![]));
        mock.expect_begin()
            .times(2)
            .returning(|| Err(anyhow::anyhow!("database is unavailable")));

        let uc = SweepExpiredUseCase::new(Arc::new(mock), Arc::new(NoopBalanceCache))
            .with_clock(Arc::new(ManualClock::new(now)));
        let out = uc.execute(2).await.unwrap();

        assert_eq!(out.failed, 2);
        assert_eq!(out.expired, 0);
    }

    #[tokio::test]
    async fn test_sweep_adjusts_cached_balance() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        store.seed_tenant(1, 1000).await;
        store.seed_entry(1, 250, Some(now - Duration::seconds(1))).await;
        let cache = Arc::new(MokaBalanceCache::new(100, 60));
        cache.set(1, 1000).await;

        let uc = SweepExpiredUseCase::new(Arc::new(store.clone()), cache.clone())
            .with_clock(Arc::new(ManualClock::new(now)));
        uc.execute(10).await.unwrap();

        assert_eq!(cache.get(1).await, Some(750));
    }

    #[tokio::test]
    async fn test_sweep_rejects_zero_batch() {
        let store = InMemoryLedgerStore::new();
        let uc = usecase(&store, Arc::new(ManualClock::new(Utc::now())));
        let err = uc.execute(0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_sweep_is_single_flight() {
        let running = AtomicBool::new(false);
        let first = RunningGuard::acquire(&running);
        assert!(first.is_some());
        assert!(RunningGuard::acquire(&running).is_none());
        drop(first);
        assert!(RunningGuard::acquire(&running).is_some());
    }

    #[tokio::test]
    async fn test_sweep_storage_error() {
        let mut mock = MockLedgerStore::new();
        mock.expect_find_due_for_expiry()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection refused")));

        let uc = SweepExpiredUseCase::new(Arc::new(mock), Arc::new(NoopBalanceCache));
        let err = uc.execute(10).await.unwrap_err();

        assert!(matches!(err, SweepExpiredError::Storage(ref msg) if msg.contains("connection refused")));
        assert!(!uc.is_running());
    }

    #[tokio::test]
    async fn test_sweep_for_owner_is_idempotent() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        store.seed_tenant(1, 1000).await;
        store.seed_entry(1, 120, Some(now - Duration::hours(1))).await;
        store.seed_entry(1, 80, Some(now - Duration::minutes(1))).await;
        store.seed_entry(1, 500, None).await;
        store.seed_entry(2, 999, Some(now - Duration::hours(1))).await;

        let uc = usecase(&store, Arc::new(ManualClock::new(now)));

        assert_eq!(uc.sweep_for_owner(1).await.unwrap(), 200);
        let after_first = store.entries_of(1).await;
        assert_eq!(balance(&store, 1).await, 800);

        assert_eq!(uc.sweep_for_owner(1).await.unwrap(), 0);
        assert_eq!(store.entries_of(1).await, after_first);
        assert_eq!(balance(&store, 1).await, 800);
        // 他テナントには触れない
        assert!(store.entries_of(2).await[0].is_active());
        assert_eq!(store.logs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_for_owner_rolls_back_on_failure() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        store.seed_tenant(1, 1000).await;
        let ok = store.seed_entry(1, 100, Some(now - Duration::minutes(2))).await;
        let bad = store.seed_entry(1, 100, Some(now - Duration::minutes(1))).await;
        store.fail_updates_for(bad.id).await;

        let uc = usecase(&store, Arc::new(ManualClock::new(now)));
        let err = uc.sweep_for_owner(1).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(store.entry(ok.id).await.unwrap().is_active());
        assert_eq!(balance(&store, 1).await, 1000);
    }

    #[tokio::test]
    async fn test_sweep_paths_lock_entries_before_tenant_balance() {
        let store = JournaledLedgerStore::default();
        let now = Utc::now();
        store.inner.seed_tenant(1, 1000).await;
        store.inner.seed_entry(1, 100, Some(now - Duration::minutes(1))).await;

        let uc = SweepExpiredUseCase::new(Arc::new(store.clone()), Arc::new(NoopBalanceCache))
            .with_clock(Arc::new(ManualClock::new(now)));
        assert_eq!(uc.sweep_for_owner(1).await.unwrap(), 100);
        assert_eq!(
            store.lock_journal(),
            vec!["lock_active_by_owner", "add_tenant_balance"]
        );

        let other = JournaledLedgerStore::default();
        other.inner.seed_tenant(1, 1000).await;
        other.inner.seed_entry(1, 100, Some(now - Duration::minutes(1))).await;
        let uc = SweepExpiredUseCase::new(Arc::new(other.clone()), Arc::new(NoopBalanceCache))
            .with_clock(Arc::new(ManualClock::new(now)));
        assert_eq!(uc.execute(10).await.unwrap().expired, 1);
        assert_eq!(other.lock_journal(), vec!["lock_entry", "add_tenant_balance"]);
    }
}
