use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::service::{Clock, SystemClock};

/// 1キー分のリクエスト時刻列（Unix 秒、古い順）。長さは max_requests 以下。
#[derive(Debug, Default)]
struct Bucket {
    events: VecDeque<i64>,
}

impl Bucket {
    fn admit(&mut self, now: i64, max_requests: usize, window_secs: i64) -> bool {
        while self.events.len() >= max_requests {
            match self.events.front() {
                Some(&oldest) if now - oldest >= window_secs => {
                    self.events.pop_front();
                }
                _ => break,
            }
        }
        if self.events.len() < max_requests {
            self.events.push_back(now);
            true
        } else {
            false
        }
    }

    fn last_seen(&self) -> Option<i64> {
        self.events.back().copied()
    }
}

/// SlidingWindowRateLimiter は「直近 window 秒間に最大 N 件」を保証するスライディングウィンドウ制限器。
///
/// キー空間は DashMap に保持し、同一キーの呼び出しのみがキー単位の Mutex で直列化される。
/// 状態はプロセス内のみで、再起動で失われる。
pub struct SlidingWindowRateLimiter {
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
    clock: Arc<dyn Clock>,
    janitor_started: AtomicBool,
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingWindowRateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
            janitor_started: AtomicBool::new(false),
        }
    }

    /// リクエストを受け入れる場合 true を返す。拒否時は状態を変更しない。
    pub fn allow(&self, key: &str, max_requests: usize, window_secs: i64) -> bool {
        if max_requests == 0 {
            return false;
        }
        let bucket = self.bucket(key, max_requests);
        let mut bucket = bucket.lock();
        let now = self.clock.now().timestamp();
        bucket.admit(now, max_requests, window_secs)
    }

    /// 最後のリクエストが `expiration` より古いキーを削除し、削除件数を返す。
    /// 他の呼び出しが参照中のキーは残す。
    pub fn evict_idle(&self, expiration: Duration) -> usize {
        let now = self.clock.now().timestamp();
        let max_age = expiration.as_secs() as i64;
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let keep = matches!(bucket.lock().last_seen(), Some(at) if now - at <= max_age);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn key_count(&self) -> usize {
        self.buckets.len()
    }

    /// アイドルキーの定期削除タスクを開始する。プロセス内で一度だけ起動され、
    /// 2回目以降の呼び出しは `None` を返す。
    pub fn start_janitor(
        self: &Arc<Self>,
        expiration: Duration,
        cancel_token: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if expiration.is_zero() {
            return None;
        }
        if self
            .janitor_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let limiter = Arc::clone(self);
        Some(tokio::spawn(async move {
            tracing::info!(
                expiration_secs = expiration.as_secs(),
                "rate limiter janitor started"
            );
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(expiration) => {
                        let evicted = limiter.evict_idle(expiration);
                        if evicted > 0 {
                            tracing::debug!(evicted, "evicted idle rate limit keys");
                        }
                    }
                }
            }
            tracing::info!("rate limiter janitor stopped");
        }))
    }

    fn bucket(&self, key: &str, max_requests: usize) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }
        let bucket = self.buckets.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                events: VecDeque::with_capacity(max_requests),
            }))
        });
        Arc::clone(bucket.value())
    }
}
