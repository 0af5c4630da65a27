use std::sync::Arc;

use crate::domain::entity::QuotaLedgerEntry;
use crate::domain::repository::LedgerStore;
use crate::domain::ErrorKind;

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct ListLedgerEntriesInput {
    pub owner_id: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct ListLedgerEntriesOutput {
    pub entries: Vec<QuotaLedgerEntry>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_next: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ListLedgerEntriesError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ListLedgerEntriesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListLedgerEntriesError::InvalidInput(_) => ErrorKind::InvalidInput,
            ListLedgerEntriesError::Internal(_) => ErrorKind::Storage,
        }
    }
}

/// テナントの全エントリ（終端状態を含む）を新しい順にページ取得する。
pub struct ListLedgerEntriesUseCase {
    store: Arc<dyn LedgerStore>,
}

impl ListLedgerEntriesUseCase {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        input: &ListLedgerEntriesInput,
    ) -> Result<ListLedgerEntriesOutput, ListLedgerEntriesError> {
        if input.owner_id <= 0 {
            return Err(ListLedgerEntriesError::InvalidInput(format!(
                "invalid owner_id: {}",
                input.owner_id
            )));
        }
        let page = input.page.max(1);
        let page_size = input.page_size.clamp(1, MAX_PAGE_SIZE);

        let (entries, total_count) = self
            .store
            .find_by_owner(input.owner_id, page, page_size)
            .await
            .map_err(|e| ListLedgerEntriesError::Internal(e.to_string()))?;

        let has_next = (page as u64) * (page_size as u64) < total_count;
        Ok(ListLedgerEntriesOutput {
            entries,
            total_count,
            page,
            page_size,
            has_next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::ledger_entry::sample_entry;
    use crate::domain::repository::ledger_repository::MockLedgerStore;

    #[tokio::test]
    async fn test_list_ledger_entries_pagination() {
        let mut mock = MockLedgerStore::new();
        mock.expect_find_by_owner()
            .withf(|owner_id, page, page_size| *owner_id == 3 && *page == 1 && *page_size == 2)
            .returning(|_, _, _| Ok((vec![sample_entry(5, 1, None), sample_entry(4, 1, None)], 5)));

        let uc = ListLedgerEntriesUseCase::new(Arc::new(mock));
        let out = uc
            .execute(&ListLedgerEntriesInput {
                owner_id: 3,
                page: 1,
                page_size: 2,
            })
            .await
            .unwrap();

        assert_eq!(out.entries.len(), 2);
        assert_eq!(out.total_count, 5);
        assert!(out.has_next);
    }

    #[tokio::test]
    async fn test_list_ledger_entries_clamps_page_size() {
        let mut mock = MockLedgerStore::new();
        mock.expect_find_by_owner()
            .withf(|_, page, page_size| *page == 1 && *page_size == MAX_PAGE_SIZE)
            .returning(|_, _, _| Ok((vec![], 0)));

        let uc = ListLedgerEntriesUseCase::new(Arc::new(mock));
        let out = uc
            .execute(&ListLedgerEntriesInput {
                owner_id: 1,
                page: 0,
                page_size: 10_000,
            })
            .await
            .unwrap();

        assert_eq!(out.page, 1);
        assert_eq!(out.page_size, MAX_PAGE_SIZE);
        assert!(!out.has_next);
    }

    #[tokio::test]
    async fn test_list_ledger_entries_internal_error() {
        let mut mock = MockLedgerStore::new();
        mock.expect_find_by_owner()
            .returning(|_, _, _| Err(anyhow::anyhow!("db error")));

        let uc = ListLedgerEntriesUseCase::new(Arc::new(mock));
        let err = uc
            .execute(&ListLedgerEntriesInput {
                owner_id: 1,
                page: 1,
                page_size: 20,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
