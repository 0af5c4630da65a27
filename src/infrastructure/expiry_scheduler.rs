use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::usecase::sweep_expired::{SweepExpiredError, SweepExpiredUseCase};

/// マルチインスタンス構成でのこのノードの役割。保守タスクは Primary のみが実行する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceRole {
    Primary,
    Standby,
}

impl MaintenanceRole {
    pub fn from_flag(maintenance_node: bool) -> Self {
        if maintenance_node {
            MaintenanceRole::Primary
        } else {
            MaintenanceRole::Standby
        }
    }
}

/// QuotaExpiryScheduler は期限切れクォータのスイープを定期実行する。
///
/// 起動直後に1回実行し、以降 `interval` ごとに実行する。
pub struct QuotaExpiryScheduler {
    sweep: Arc<SweepExpiredUseCase>,
    role: MaintenanceRole,
    interval: Duration,
    batch_size: u32,
    cancel_token: CancellationToken,
    started: AtomicBool,
}

impl QuotaExpiryScheduler {
    pub fn new(
        sweep: Arc<SweepExpiredUseCase>,
        role: MaintenanceRole,
        interval: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            sweep,
            role,
            interval,
            batch_size,
            cancel_token: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// タスクを起動する。Standby ノード、または2回目以降の呼び出しでは `None` を返す。
    pub fn start(&self) -> Option<tokio::task::JoinHandle<()>> {
        if self.role != MaintenanceRole::Primary {
            tracing::info!("not the maintenance node, quota expiry scheduler disabled");
            return None;
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let sweep = self.sweep.clone();
        let token = self.cancel_token.clone();
        let interval = self.interval;
        let batch_size = self.batch_size;

        Some(tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                batch_size,
                "quota expiry scheduler started"
            );
            Self::tick(&sweep, batch_size).await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        Self::tick(&sweep, batch_size).await;
                    }
                }
            }
            tracing::info!("quota expiry scheduler stopped");
        }))
    }

    async fn tick(sweep: &SweepExpiredUseCase, batch_size: u32) {
        match sweep.execute(batch_size).await {
            Ok(_) => {}
            Err(SweepExpiredError::AlreadyRunning) => {
                tracing::debug!("previous quota sweep still running, skipping tick");
            }
            Err(e) => tracing::error!(error = %e, "quota expiry sweep failed"),
        }
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::repository::InMemoryLedgerStore;
    use crate::domain::repository::TenantAccountRepository;
    use crate::infrastructure::balance_cache::NoopBalanceCache;
    use chrono::Utc;

    fn sweep(store: &InMemoryLedgerStore) -> Arc<SweepExpiredUseCase> {
        Arc::new(SweepExpiredUseCase::new(
            Arc::new(store.clone()),
            Arc::new(NoopBalanceCache),
        ))
    }

    #[test]
    fn test_role_from_flag() {
        assert_eq!(MaintenanceRole::from_flag(true), MaintenanceRole::Primary);
        assert_eq!(MaintenanceRole::from_flag(false), MaintenanceRole::Standby);
    }

    #[tokio::test]
    async fn test_standby_does_not_start() {
        let store = InMemoryLedgerStore::new();
        let scheduler = QuotaExpiryScheduler::new(
            sweep(&store),
            MaintenanceRole::Standby,
            Duration::from_secs(60),
            300,
        );
        assert!(scheduler.start().is_none());
    }

    #[tokio::test]
    async fn test_starts_once_and_sweeps_immediately() {
        let store = InMemoryLedgerStore::new();
        store.seed_tenant(1, 100).await;
        store
            .seed_entry(1, 40, Some(Utc::now() - chrono::Duration::seconds(1)))
            .await;

        let scheduler = QuotaExpiryScheduler::new(
            sweep(&store),
            MaintenanceRole::Primary,
            Duration::from_secs(3600),
            300,
        );
        let handle = scheduler.start();
        assert!(handle.is_some());
        assert!(scheduler.start().is_none());

        // 初回スイープ完了を待つ
        for _ in 0..100 {
            if store.find_balance(1).await.unwrap().unwrap().total_balance == 60 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.find_balance(1).await.unwrap().unwrap().total_balance, 60);

        scheduler.stop();
        handle.unwrap().await.unwrap();
    }
}
