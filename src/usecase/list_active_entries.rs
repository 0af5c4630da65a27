use std::sync::Arc;

use crate::domain::entity::QuotaLedgerEntry;
use crate::domain::repository::LedgerStore;
use crate::domain::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum ListActiveEntriesError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ListActiveEntriesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListActiveEntriesError::InvalidInput(_) => ErrorKind::InvalidInput,
            ListActiveEntriesError::Internal(_) => ErrorKind::Storage,
        }
    }
}

/// テナントの Active エントリを FIFO 消費順で返す。
pub struct ListActiveEntriesUseCase {
    store: Arc<dyn LedgerStore>,
}

impl ListActiveEntriesUseCase {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        owner_id: i64,
    ) -> Result<Vec<QuotaLedgerEntry>, ListActiveEntriesError> {
        if owner_id <= 0 {
            return Err(ListActiveEntriesError::InvalidInput(format!(
                "invalid owner_id: {}",
                owner_id
            )));
        }
        self.store
            .find_active_by_owner(owner_id)
            .await
            .map_err(|e| ListActiveEntriesError::Internal(e.to_string()))
    }
}
