use std::sync::Arc;

use crate::domain::repository::RedemptionCodeRepository;
use crate::domain::service::{Clock, SystemClock};
use crate::domain::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum PurgeInvalidCodesError {
    #[error("internal error: {0}")]
    Internal(String),
}

impl PurgeInvalidCodesError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

/// 使用済み・無効化済み・期限切れの引換コードを論理削除する。
pub struct PurgeInvalidCodesUseCase {
    repo: Arc<dyn RedemptionCodeRepository>,
    clock: Arc<dyn Clock>,
}

impl PurgeInvalidCodesUseCase {
    pub fn new(repo: Arc<dyn RedemptionCodeRepository>) -> Self {
        Self {
            repo,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn execute(&self) -> Result<u64, PurgeInvalidCodesError> {
        let purged = self
            .repo
            .purge_invalid(self.clock.now())
            .await
            .map_err(|e| PurgeInvalidCodesError::Internal(e.to_string()))?;
        tracing::info!(purged, "invalid redemption codes purged");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::repository::InMemoryLedgerStore;
    use crate::domain::entity::{CodeStatus, NewRedemptionCode};
    use crate::domain::repository::redemption_repository::MockRedemptionCodeRepository;
    use crate::domain::service::ManualClock;
    use chrono::{Duration, Utc};

    fn new_code(key: &str, expires_at: Option<chrono::DateTime<Utc>>) -> NewRedemptionCode {
        NewRedemptionCode {
            key: key.to_string(),
            name: "batch".to_string(),
            amount: 10,
            validity_period_secs: 0,
            plan_id: 0,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_purge_removes_used_disabled_and_expired() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        let live = store.create(&new_code("live", None)).await.unwrap();
        let disabled = store.create(&new_code("disabled", None)).await.unwrap();
        let expired = store
            .create(&new_code("expired", Some(now - Duration::hours(1))))
            .await
            .unwrap();
        store
            .transition_status(disabled.id, CodeStatus::Enabled, CodeStatus::Disabled)
            .await
            .unwrap();

        let uc = PurgeInvalidCodesUseCase::new(Arc::new(store.clone()))
            .with_clock(Arc::new(ManualClock::new(now)));

        assert_eq!(uc.execute().await.unwrap(), 2);
        assert!(RedemptionCodeRepository::find_by_id(&store, live.id)
            .await
            .unwrap()
            .is_some());
        assert!(RedemptionCodeRepository::find_by_id(&store, expired.id)
            .await
            .unwrap()
            .is_none());
        // 2回目は何も削除しない
        assert_eq!(uc.execute().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_internal_error() {
        let mut mock = MockRedemptionCodeRepository::new();
        mock.expect_purge_invalid()
            .returning(|_| Err(anyhow::anyhow!("db error")));

        let uc = PurgeInvalidCodesUseCase::new(Arc::new(mock));
        let err = uc.execute().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
