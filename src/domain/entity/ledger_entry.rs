use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 台帳エントリの状態。Active からのみ遷移し、Consumed / Expired は終端。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Consumed,
    Expired,
}

impl EntryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Consumed => "consumed",
            EntryStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EntryStatus::Active),
            "consumed" => Some(EntryStatus::Consumed),
            "expired" => Some(EntryStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// QuotaLedgerEntry はテナントに付与された残高（期限付きまたは無期限）の1単位。
///
/// `expires_at` が `None` のエントリは失効しない。
/// `origin_id` は付与元の引換コード ID で、管理者作成の場合は `None`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLedgerEntry {
    pub id: i64,
    pub owner_id: i64,
    pub origin_id: Option<i64>,
    pub original_amount: i64,
    pub remaining: i64,
    pub status: EntryStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl QuotaLedgerEntry {
    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }

    /// 期限付きかつ `now` 時点で期限到来しているか。
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// 最大 `wanted` を引き落とし、実際に引き落とした量を返す。
    /// 残量が 0 になった時点で Consumed に遷移する。
    pub fn debit(&mut self, wanted: i64, now: DateTime<Utc>) -> i64 {
        if wanted <= 0 || self.remaining <= 0 || !self.is_active() {
            return 0;
        }
        let deduct = wanted.min(self.remaining);
        self.remaining -= deduct;
        self.updated_at = now;
        if self.remaining == 0 {
            self.status = EntryStatus::Consumed;
        }
        deduct
    }

    /// エントリを失効させ、回収すべき残量を返す。
    pub fn expire(&mut self, now: DateTime<Utc>) -> i64 {
        let clawback = self.remaining.max(0);
        self.remaining = 0;
        self.status = EntryStatus::Expired;
        self.updated_at = now;
        clawback
    }

    /// 管理者による残量・期限の上書き。テナント残高に適用すべき差分を返す。
    pub fn adjust(&mut self, new_remaining: i64, expiry: ExpiryChange, now: DateTime<Utc>) -> i64 {
        let delta = new_remaining - self.remaining;
        self.remaining = new_remaining;
        match expiry {
            ExpiryChange::Keep => {}
            ExpiryChange::Never => self.expires_at = None,
            ExpiryChange::At(at) => self.expires_at = Some(at),
        }
        if new_remaining > 0 && !self.is_active() {
            self.status = EntryStatus::Active;
        } else if new_remaining == 0 && self.is_active() {
            self.status = EntryStatus::Consumed;
        }
        self.updated_at = now;
        delta
    }
}

/// 管理者調整での期限の扱い。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "at")]
pub enum ExpiryChange {
    #[default]
    Keep,
    Never,
    At(DateTime<Utc>),
}

/// FIFO 消費順: 期限付きを期限昇順で先に、無期限を最後に。同順位は id 昇順。
pub fn fifo_order(a: &QuotaLedgerEntry, b: &QuotaLedgerEntry) -> Ordering {
    match (a.expires_at, b.expires_at) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}

/// 新規エントリ作成の入力。id と時刻はストアが採番する。
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub owner_id: i64,
    pub origin_id: Option<i64>,
    pub amount: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// applyUpdate で書き戻すフィールド群。
#[derive(Debug, Clone, PartialEq)]
pub struct EntryUpdate {
    pub remaining: i64,
    pub status: EntryStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&QuotaLedgerEntry> for EntryUpdate {
    fn from(e: &QuotaLedgerEntry) -> Self {
        Self {
            remaining: e.remaining,
            status: e.status,
            expires_at: e.expires_at,
            updated_at: e.updated_at,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_entry(
    id: i64,
    remaining: i64,
    expires_at: Option<DateTime<Utc>>,
) -> QuotaLedgerEntry {
    let now = Utc::now();
    QuotaLedgerEntry {
        id,
        owner_id: 1,
        origin_id: None,
        original_amount: remaining,
        remaining,
        status: EntryStatus::Active,
        expires_at,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}
