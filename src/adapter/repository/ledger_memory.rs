use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::entity::{
    fifo_order, AuditLogEntry, CodeStatus, EntryStatus, EntryUpdate, NewLedgerEntry,
    NewRedemptionCode, QuotaLedgerEntry, RedemptionCode, TenantBalance, TopUpRecord,
};
use crate::domain::repository::{
    LedgerStore, LedgerTransaction, RedemptionCodeRepository, TenantAccountRepository,
};

#[derive(Debug, Default)]
struct Tables {
    entries: BTreeMap<i64, QuotaLedgerEntry>,
    accounts: HashMap<i64, TenantBalance>,
    codes: BTreeMap<i64, RedemptionCode>,
    deleted_codes: HashSet<i64>,
    top_ups: Vec<TopUpRecord>,
    logs: Vec<AuditLogEntry>,
    next_entry_id: i64,
    next_code_id: i64,
    failing_entries: HashSet<i64>,
}

impl Tables {
    fn active_of(&self, owner_id: i64) -> Vec<QuotaLedgerEntry> {
        let mut entries: Vec<QuotaLedgerEntry> = self
            .entries
            .values()
            .filter(|e| e.owner_id == owner_id && e.is_active() && e.deleted_at.is_none())
            .cloned()
            .collect();
        entries.sort_by(fifo_order);
        entries
    }

    fn code_by_key(&self, key: &str) -> Option<&RedemptionCode> {
        self.codes
            .values()
            .find(|c| c.key == key && !self.deleted_codes.contains(&c.id))
    }

    fn allocate_entry(&mut self, entry: &NewLedgerEntry, now: DateTime<Utc>) -> QuotaLedgerEntry {
        self.next_entry_id += 1;
        QuotaLedgerEntry {
            id: self.next_entry_id,
            owner_id: entry.owner_id,
            origin_id: entry.origin_id,
            original_amount: entry.amount,
            remaining: entry.amount,
            status: EntryStatus::Active,
            expires_at: entry.expires_at,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// 行ロックの単位。テナントの台帳エントリと残高はテナント単位でまとめてロックする。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Owner(i64),
    Code(String),
}

/// キーごとの排他ロック。`FOR UPDATE` に相当し、トランザクション終了まで保持される。
#[derive(Clone, Default)]
struct RowLocks {
    inner: Arc<DashMap<RowKey, Arc<Mutex<()>>>>,
}

impl RowLocks {
    async fn acquire(&self, key: RowKey) -> OwnedMutexGuard<()> {
        let lock = self.inner.entry(key).or_default().clone();
        lock.lock_owned().await
    }
}

/// InMemoryLedgerStore はテストおよび DB なしモードで使うインメモリ実装。
///
/// トランザクションはテナント単位・引換コード単位の行ロックを取得し、書き込みを
/// 手元に溜めて commit 時にまとめて反映する。別テナントのトランザクションは並行に進む。
/// テーブル本体のロックは読み書きの瞬間だけ保持する。
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    tables: Arc<Mutex<Tables>>,
    locks: RowLocks,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// テナントアカウントを作成または上書きする。
    pub async fn seed_tenant(&self, owner_id: i64, total_balance: i64) {
        let mut tables = self.tables.lock().await;
        tables.accounts.insert(
            owner_id,
            TenantBalance {
                owner_id,
                total_balance,
                used_balance: 0,
            },
        );
    }

    /// エントリを直接登録する。テナント残高は変更しない。
    pub async fn seed_entry(
        &self,
        owner_id: i64,
        amount: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> QuotaLedgerEntry {
        let mut tables = self.tables.lock().await;
        let created = tables.allocate_entry(
            &NewLedgerEntry {
                owner_id,
                origin_id: None,
                amount,
                expires_at,
            },
            Utc::now(),
        );
        tables.entries.insert(created.id, created.clone());
        created
    }

    /// 指定エントリへの apply_update を失敗させる（障害注入）。
    pub async fn fail_updates_for(&self, entry_id: i64) {
        self.tables.lock().await.failing_entries.insert(entry_id);
    }

    pub async fn entry(&self, id: i64) -> Option<QuotaLedgerEntry> {
        self.tables.lock().await.entries.get(&id).cloned()
    }

    pub async fn entries_of(&self, owner_id: i64) -> Vec<QuotaLedgerEntry> {
        let tables = self.tables.lock().await;
        tables
            .entries
            .values()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub async fn top_ups(&self) -> Vec<TopUpRecord> {
        self.tables.lock().await.top_ups.clone()
    }

    pub async fn logs(&self) -> Vec<AuditLogEntry> {
        self.tables.lock().await.logs.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryLedgerTransaction {
            tables: self.tables.clone(),
            locks: self.locks.clone(),
            held: HashMap::new(),
            pending: PendingWrites::default(),
        }))
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<QuotaLedgerEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables.entries.get(&id).filter(|e| e.deleted_at.is_none()).cloned())
    }

    async fn find_active_by_owner(&self, owner_id: i64) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        Ok(self.tables.lock().await.active_of(owner_id))
    }

    async fn find_due_for_expiry(
        &self,
        cutoff: DateTime<Utc>,
        after_id: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .range(after_id.saturating_add(1)..)
            .map(|(_, e)| e)
            .filter(|e| e.is_active() && e.deleted_at.is_none() && e.is_due(cutoff))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_by_owner(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<QuotaLedgerEntry>, u64)> {
        let tables = self.tables.lock().await;
        let all: Vec<QuotaLedgerEntry> = tables
            .entries
            .values()
            .rev()
            .filter(|e| e.owner_id == owner_id && e.deleted_at.is_none())
            .cloned()
            .collect();
        let total = all.len() as u64;
        let start = (page.saturating_sub(1) * page_size) as usize;
        let items = all.into_iter().skip(start).take(page_size as usize).collect();
        Ok((items, total))
    }

    async fn sum_active_remaining(&self, owner_id: i64) -> anyhow::Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.active_of(owner_id).iter().map(|e| e.remaining).sum())
    }
}

/// commit 前の書き込み。読み取りはこれを確定済みのテーブルに重ねて返す。
#[derive(Default)]
struct PendingWrites {
    entries: BTreeMap<i64, QuotaLedgerEntry>,
    accounts: HashMap<i64, TenantBalance>,
    codes: BTreeMap<i64, RedemptionCode>,
    top_ups: Vec<TopUpRecord>,
    logs: Vec<AuditLogEntry>,
}

struct InMemoryLedgerTransaction {
    tables: Arc<Mutex<Tables>>,
    locks: RowLocks,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    pending: PendingWrites,
}

impl InMemoryLedgerTransaction {
    /// 行ロックを取得する。同じトランザクション内での再取得は即座に返る。
    async fn lock(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let guard = self.locks.acquire(key.clone()).await;
        self.held.insert(key, guard);
    }

    async fn current_entry(&self, id: i64) -> Option<QuotaLedgerEntry> {
        if let Some(entry) = self.pending.entries.get(&id) {
            return Some(entry.clone());
        }
        self.tables.lock().await.entries.get(&id).cloned()
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryLedgerTransaction {
    async fn create_entry(&mut self, entry: &NewLedgerEntry) -> anyhow::Result<QuotaLedgerEntry> {
        self.lock(RowKey::Owner(entry.owner_id)).await;
        let created = self.tables.lock().await.allocate_entry(entry, Utc::now());
        self.pending.entries.insert(created.id, created.clone());
        Ok(created)
    }

    async fn lock_entry(&mut self, id: i64) -> anyhow::Result<Option<QuotaLedgerEntry>> {
        let owner_id = match self.current_entry(id).await {
            Some(entry) => entry.owner_id,
            None => return Ok(None),
        };
        self.lock(RowKey::Owner(owner_id)).await;
        // ロック待ちの間に他トランザクションが commit している可能性がある
        Ok(self
            .current_entry(id)
            .await
            .filter(|e| e.deleted_at.is_none()))
    }

    async fn lock_active_by_owner(
        &mut self,
        owner_id: i64,
    ) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        self.lock(RowKey::Owner(owner_id)).await;
        let mut merged: BTreeMap<i64, QuotaLedgerEntry> = self
            .tables
            .lock()
            .await
            .entries
            .values()
            .filter(|e| e.owner_id == owner_id)
            .map(|e| (e.id, e.clone()))
            .collect();
        for entry in self.pending.entries.values().filter(|e| e.owner_id == owner_id) {
            merged.insert(entry.id, entry.clone());
        }
        let mut active: Vec<QuotaLedgerEntry> = merged
            .into_values()
            .filter(|e| e.is_active() && e.deleted_at.is_none())
            .collect();
        active.sort_by(fifo_order);
        Ok(active)
    }

    async fn apply_update(&mut self, id: i64, update: &EntryUpdate) -> anyhow::Result<()> {
        if self.tables.lock().await.failing_entries.contains(&id) {
            anyhow::bail!("injected update failure for ledger entry {}", id);
        }
        let mut entry = self
            .current_entry(id)
            .await
            .ok_or_else(|| anyhow::anyhow!("ledger entry not found: {}", id))?;
        self.lock(RowKey::Owner(entry.owner_id)).await;
        entry.remaining = update.remaining;
        entry.status = update.status;
        entry.expires_at = update.expires_at;
        entry.updated_at = update.updated_at;
        self.pending.entries.insert(id, entry);
        Ok(())
    }

    async fn add_tenant_balance(&mut self, owner_id: i64, delta: i64) -> anyhow::Result<i64> {
        self.lock(RowKey::Owner(owner_id)).await;
        let current = match self.pending.accounts.get(&owner_id) {
            Some(account) => Some(*account),
            None => self.tables.lock().await.accounts.get(&owner_id).copied(),
        };
        let mut account =
            current.ok_or_else(|| anyhow::anyhow!("tenant account not found: {}", owner_id))?;
        account.total_balance = (account.total_balance + delta).max(0);
        self.pending.accounts.insert(owner_id, account);
        Ok(account.total_balance)
    }

    async fn lock_code_by_key(&mut self, key: &str) -> anyhow::Result<Option<RedemptionCode>> {
        self.lock(RowKey::Code(key.to_string())).await;
        if let Some(code) = self.pending.codes.values().find(|c| c.key == key) {
            return Ok(Some(code.clone()));
        }
        Ok(self.tables.lock().await.code_by_key(key).cloned())
    }

    async fn save_code(&mut self, code: &RedemptionCode) -> anyhow::Result<()> {
        self.lock(RowKey::Code(code.key.clone())).await;
        self.pending.codes.insert(code.id, code.clone());
        Ok(())
    }

    async fn insert_top_up(&mut self, record: &TopUpRecord) -> anyhow::Result<()> {
        let duplicate = self.pending.top_ups.iter().any(|t| t.trade_no == record.trade_no)
            || self
                .tables
                .lock()
                .await
                .top_ups
                .iter()
                .any(|t| t.trade_no == record.trade_no);
        if duplicate {
            anyhow::bail!("duplicate trade_no: {}", record.trade_no);
        }
        self.pending.top_ups.push(record.clone());
        Ok(())
    }

    async fn append_log(&mut self, log: &AuditLogEntry) -> anyhow::Result<()> {
        self.pending.logs.push(log.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let InMemoryLedgerTransaction {
            tables,
            held,
            pending,
            ..
        } = *self;
        let mut tables = tables.lock().await;
        if let Some(dup) = pending
            .top_ups
            .iter()
            .find(|p| tables.top_ups.iter().any(|t| t.trade_no == p.trade_no))
        {
            anyhow::bail!("duplicate trade_no: {}", dup.trade_no);
        }
        tables.entries.extend(pending.entries);
        tables.accounts.extend(pending.accounts);
        tables.codes.extend(pending.codes);
        tables.top_ups.extend(pending.top_ups);
        tables.logs.extend(pending.logs);
        drop(tables);
        drop(held);
        Ok(())
    }
}

#[async_trait]
impl TenantAccountRepository for InMemoryLedgerStore {
    async fn find_balance(&self, owner_id: i64) -> anyhow::Result<Option<TenantBalance>> {
        Ok(self.tables.lock().await.accounts.get(&owner_id).copied())
    }
}

#[async_trait]
impl RedemptionCodeRepository for InMemoryLedgerStore {
    async fn create(&self, code: &NewRedemptionCode) -> anyhow::Result<RedemptionCode> {
        let mut tables = self.tables.lock().await;
        if tables.codes.values().any(|c| c.key == code.key) {
            anyhow::bail!("duplicate redemption key");
        }
        tables.next_code_id += 1;
        let created = RedemptionCode {
            id: tables.next_code_id,
            key: code.key.clone(),
            name: code.name.clone(),
            status: CodeStatus::Enabled,
            amount: code.amount,
            validity_period_secs: code.validity_period_secs,
            plan_id: code.plan_id,
            expires_at: code.expires_at,
            created_at: Utc::now(),
            redeemed_at: None,
            used_by_owner_id: None,
        };
        tables.codes.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<RedemptionCode>> {
        let tables = self.tables.lock().await;
        if tables.deleted_codes.contains(&id) {
            return Ok(None);
        }
        Ok(tables.codes.get(&id).cloned())
    }

    async fn transition_status(
        &self,
        id: i64,
        from: CodeStatus,
        to: CodeStatus,
    ) -> anyhow::Result<bool> {
        let key = match self.tables.lock().await.codes.get(&id) {
            Some(code) => code.key.clone(),
            None => return Ok(false),
        };
        // 引換中のトランザクションが終わるまで待ってから状態を確認する
        let _row = self.locks.acquire(RowKey::Code(key)).await;
        let mut tables = self.tables.lock().await;
        if tables.deleted_codes.contains(&id) {
            return Ok(false);
        }
        match tables.codes.get_mut(&id) {
            Some(code) if code.status == from => {
                code.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_invalid(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut tables = self.tables.lock().await;
        let purgeable: Vec<i64> = tables
            .codes
            .values()
            .filter(|c| c.is_purgeable(now))
            .map(|c| c.id)
            .collect();
        let mut purged = 0;
        for id in purgeable {
            if tables.deleted_codes.insert(id) {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

/// 呼び出されたトランザクション操作を順に記録するラッパー。ロック順序の検証に使う。
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct JournaledLedgerStore {
    pub(crate) inner: InMemoryLedgerStore,
    journal: Arc<parking_lot::Mutex<Vec<&'static str>>>,
}

#[cfg(test)]
impl JournaledLedgerStore {
    pub(crate) fn journal(&self) -> Vec<&'static str> {
        self.journal.lock().clone()
    }

    /// 行ロックとテナント残高更新だけを抜き出した記録。
    pub(crate) fn lock_journal(&self) -> Vec<&'static str> {
        self.journal()
            .into_iter()
            .filter(|op| op.starts_with("lock_") || *op == "add_tenant_balance")
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl LedgerStore for JournaledLedgerStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn LedgerTransaction>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(JournaledTransaction {
            inner,
            journal: self.journal.clone(),
        }))
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<QuotaLedgerEntry>> {
        LedgerStore::find_by_id(&self.inner, id).await
    }

    async fn find_active_by_owner(&self, owner_id: i64) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        self.inner.find_active_by_owner(owner_id).await
    }

    async fn find_due_for_expiry(
        &self,
        cutoff: DateTime<Utc>,
        after_id: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        self.inner.find_due_for_expiry(cutoff, after_id, limit).await
    }

    async fn find_by_owner(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<QuotaLedgerEntry>, u64)> {
        self.inner.find_by_owner(owner_id, page, page_size).await
    }

    async fn sum_active_remaining(&self, owner_id: i64) -> anyhow::Result<i64> {
        self.inner.sum_active_remaining(owner_id).await
    }
}

#[cfg(test)]
struct JournaledTransaction {
    inner: Box<dyn LedgerTransaction>,
    journal: Arc<parking_lot::Mutex<Vec<&'static str>>>,
}

#[cfg(test)]
impl JournaledTransaction {
    fn record(&self, op: &'static str) {
        self.journal.lock().push(op);
    }
}

#[cfg(test)]
#[async_trait]
impl LedgerTransaction for JournaledTransaction {
    async fn create_entry(&mut self, entry: &NewLedgerEntry) -> anyhow::Result<QuotaLedgerEntry> {
        self.record("create_entry");
        self.inner.create_entry(entry).await
    }

    async fn lock_entry(&mut self, id: i64) -> anyhow::Result<Option<QuotaLedgerEntry>> {
        self.record("lock_entry");
        self.inner.lock_entry(id).await
    }

    async fn lock_active_by_owner(
        &mut self,
        owner_id: i64,
    ) -> anyhow::Result<Vec<QuotaLedgerEntry>> {
        self.record("lock_active_by_owner");
        self.inner.lock_active_by_owner(owner_id).await
    }

    async fn apply_update(&mut self, id: i64, update: &EntryUpdate) -> anyhow::Result<()> {
        self.record("apply_update");
        self.inner.apply_update(id, update).await
    }

    async fn add_tenant_balance(&mut self, owner_id: i64, delta: i64) -> anyhow::Result<i64> {
        self.record("add_tenant_balance");
        self.inner.add_tenant_balance(owner_id, delta).await
    }

    async fn lock_code_by_key(&mut self, key: &str) -> anyhow::Result<Option<RedemptionCode>> {
        self.record("lock_code_by_key");
        self.inner.lock_code_by_key(key).await
    }

    async fn save_code(&mut self, code: &RedemptionCode) -> anyhow::Result<()> {
        self.record("save_code");
        self.inner.save_code(code).await
    }

    async fn insert_top_up(&mut self, record: &TopUpRecord) -> anyhow::Result<()> {
        self.record("insert_top_up");
        self.inner.insert_top_up(record).await
    }

    async fn append_log(&mut self, log: &AuditLogEntry) -> anyhow::Result<()> {
        self.record("append_log");
        self.inner.append_log(log).await
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.record("commit");
        self.inner.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn test_uncommitted_transaction_rolls_back() {
        let store = InMemoryLedgerStore::new();
        store.seed_tenant(1, 100).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.add_tenant_balance(1, 50).await.unwrap();
            tx.create_entry(&NewLedgerEntry {
                owner_id: 1,
                origin_id: None,
                amount: 50,
                expires_at: None,
            })
            .await
            .unwrap();
        }

        assert_eq!(store.find_balance(1).await.unwrap().unwrap().total_balance, 100);
        assert!(store.entries_of(1).await.is_empty());
    }

    #[tokio::test]
    async fn test_commit_persists_changes() {
        let store = InMemoryLedgerStore::new();
        store.seed_tenant(1, 100).await;

        let mut tx = store.begin().await.unwrap();
        let balance = tx.add_tenant_balance(1, -30).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(balance, 70);
        assert_eq!(store.find_balance(1).await.unwrap().unwrap().total_balance, 70);
    }

    #[tokio::test]
    async fn test_transactions_on_other_owners_do_not_block() {
        let store = InMemoryLedgerStore::new();
        store.seed_tenant(1, 100).await;
        store.seed_tenant(2, 100).await;
        store.seed_entry(2, 50, None).await;

        let mut held = store.begin().await.unwrap();
        held.lock_active_by_owner(1).await.unwrap();
        held.add_tenant_balance(1, 10).await.unwrap();

        let other = async {
            let mut tx = store.begin().await.unwrap();
            let entries = tx.lock_active_by_owner(2).await.unwrap();
            tx.add_tenant_balance(2, -5).await.unwrap();
            tx.commit().await.unwrap();
            entries.len()
        };
        let locked = tokio::time::timeout(StdDuration::from_millis(500), other)
            .await
            .expect("owner 2 must not wait for owner 1");

        assert_eq!(locked, 1);
        assert_eq!(store.find_balance(2).await.unwrap().unwrap().total_balance, 95);
        held.commit().await.unwrap();
        assert_eq!(store.find_balance(1).await.unwrap().unwrap().total_balance, 110);
    }

    #[tokio::test]
    async fn test_same_owner_waits_for_lock_and_sees_committed_state() {
        let store = InMemoryLedgerStore::new();
        store.seed_tenant(1, 100).await;
        let entry = store.seed_entry(1, 50, None).await;

        let mut held = store.begin().await.unwrap();
        let mut locked = held.lock_entry(entry.id).await.unwrap().unwrap();
        locked.remaining = 20;
        held.apply_update(entry.id, &EntryUpdate::from(&locked))
            .await
            .unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.lock_active_by_owner(1).await.unwrap()
            })
        };
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        held.commit().await.unwrap();
        let seen = waiter.await.unwrap();
        assert_eq!(seen[0].remaining, 20);
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_locks() {
        let store = InMemoryLedgerStore::new();
        store.seed_tenant(1, 100).await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.add_tenant_balance(1, 10).await.unwrap();
        }

        let mut tx = tokio::time::timeout(StdDuration::from_millis(500), async {
            let mut tx = store.begin().await.unwrap();
            tx.lock_active_by_owner(1).await.unwrap();
            tx
        })
        .await
        .expect("lock must be released on drop");
        assert_eq!(tx.add_tenant_balance(1, 0).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_disable_waits_for_in_flight_redemption() {
        let store = InMemoryLedgerStore::new();
        let code = store
            .create(&NewRedemptionCode {
                key: "r".repeat(32),
                name: "promo".to_string(),
                amount: 10,
                validity_period_secs: 0,
                plan_id: 0,
                expires_at: None,
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_code_by_key(&code.key).await.unwrap().unwrap();
        locked.mark_used(1, Utc::now());
        tx.save_code(&locked).await.unwrap();

        let disable = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .transition_status(code.id, CodeStatus::Enabled, CodeStatus::Disabled)
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert!(!disable.is_finished());

        tx.commit().await.unwrap();
        assert!(!disable.await.unwrap());
        let stored = RedemptionCodeRepository::find_by_id(&store, code.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CodeStatus::Used);
    }

    #[tokio::test]
    async fn test_add_tenant_balance_unknown_tenant_fails() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.add_tenant_balance(99, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_find_active_by_owner_is_fifo_ordered() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        let permanent = store.seed_entry(1, 10, None).await;
        let late = store.seed_entry(1, 10, Some(now + Duration::days(2))).await;
        let early = store.seed_entry(1, 10, Some(now + Duration::days(1))).await;
        store.seed_entry(2, 10, None).await;

        let active = store.find_active_by_owner(1).await.unwrap();
        let ids: Vec<i64> = active.iter().map(|e| e.id).collect();

        assert_eq!(ids, vec![early.id, late.id, permanent.id]);
    }

    #[tokio::test]
    async fn test_find_due_for_expiry_pages_by_id() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        for _ in 0..5 {
            store.seed_entry(1, 10, Some(now - Duration::minutes(1))).await;
        }
        store.seed_entry(1, 10, Some(now + Duration::minutes(1))).await;
        store.seed_entry(1, 10, None).await;

        let first = store.find_due_for_expiry(now, 0, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.windows(2).all(|w| w[0].id < w[1].id));

        let rest = store.find_due_for_expiry(now, first[2].id, 100).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|e| e.id > first[2].id));
    }

    #[tokio::test]
    async fn test_find_by_owner_paginates_newest_first() {
        let store = InMemoryLedgerStore::new();
        for amount in 1..=5 {
            store.seed_entry(1, amount, None).await;
        }

        let (page1, total) = store.find_by_owner(1, 1, 2).await.unwrap();
        let (page3, _) = store.find_by_owner(1, 3, 2).await.unwrap();

        assert_eq!(total, 5);
        assert_eq!(page1.iter().map(|e| e.remaining).collect::<Vec<_>>(), vec![5, 4]);
        assert_eq!(page3.len(), 1);
    }

    #[tokio::test]
    async fn test_transition_status_only_from_expected() {
        let store = InMemoryLedgerStore::new();
        let code = store
            .create(&NewRedemptionCode {
                key: "k".repeat(32),
                name: "promo".to_string(),
                amount: 10,
                validity_period_secs: 0,
                plan_id: 0,
                expires_at: None,
            })
            .await
            .unwrap();

        assert!(store
            .transition_status(code.id, CodeStatus::Enabled, CodeStatus::Disabled)
            .await
            .unwrap());
        assert!(!store
            .transition_status(code.id, CodeStatus::Enabled, CodeStatus::Disabled)
            .await
            .unwrap());
    }
}
