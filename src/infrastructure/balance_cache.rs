//! テナント集計残高のキャッシュ。
//!
//! キャッシュは権威ではない。ストアと食い違った場合はストアが正で、
//! 次回の read-through（`set`）で自己修復される。
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::Op;

#[async_trait]
pub trait BalanceCache: Send + Sync {
    async fn get(&self, owner_id: i64) -> Option<i64>;

    async fn set(&self, owner_id: i64, total_balance: i64);

    /// キャッシュ済みの値にのみ `delta` を加算する（ベストエフォート）。
    /// 未キャッシュのテナントは何もしない。
    async fn adjust(&self, owner_id: i64, delta: i64);

    async fn invalidate(&self, owner_id: i64);
}

/// moka::future::Cache を使ったプロセス内キャッシュ。
pub struct MokaBalanceCache {
    inner: Cache<i64, i64>,
}

impl MokaBalanceCache {
    pub fn new(max_capacity: u64, ttl_secs: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { inner }
    }
}

#[async_trait]
impl BalanceCache for MokaBalanceCache {
    async fn get(&self, owner_id: i64) -> Option<i64> {
        self.inner.get(&owner_id).await
    }

    async fn set(&self, owner_id: i64, total_balance: i64) {
        self.inner.insert(owner_id, total_balance).await;
    }

    async fn adjust(&self, owner_id: i64, delta: i64) {
        // 読み取りと書き込みを同一キーの compute 内で行い、同時調整の取りこぼしを防ぐ
        self.inner
            .entry(owner_id)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) => Op::Put((entry.into_value() + delta).max(0)),
                    None => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }

    async fn invalidate(&self, owner_id: i64) {
        self.inner.invalidate(&owner_id).await;
    }
}

/// キャッシュを使わない構成用。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBalanceCache;

#[async_trait]
impl BalanceCache for NoopBalanceCache {
    async fn get(&self, _owner_id: i64) -> Option<i64> {
        None
    }

    async fn set(&self, _owner_id: i64, _total_balance: i64) {}

    async fn adjust(&self, _owner_id: i64, _delta: i64) {}

    async fn invalidate(&self, _owner_id: i64) {}
}
