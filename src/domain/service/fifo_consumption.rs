use chrono::{DateTime, Utc};

use crate::domain::entity::{fifo_order, EntryUpdate, QuotaLedgerEntry};

/// 1エントリ分の引き落とし。
#[derive(Debug, Clone, PartialEq)]
pub struct FifoDebit {
    pub entry_id: i64,
    pub amount: i64,
    pub update: EntryUpdate,
}

/// FIFO 消費計画。`consumed` は要求量以下。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FifoPlan {
    pub debits: Vec<FifoDebit>,
    pub consumed: i64,
}

/// ロック済みの Active エントリ群から、`amount` を期限の早い順に引き落とす計画を立てる。
///
/// 無期限エントリは期限付きエントリをすべて使い切った後にのみ消費される。
/// エントリが不足した場合は消費できた分だけを返す。
pub fn plan_fifo_consumption(
    mut entries: Vec<QuotaLedgerEntry>,
    amount: i64,
    now: DateTime<Utc>,
) -> FifoPlan {
    let mut plan = FifoPlan::default();
    if amount <= 0 {
        return plan;
    }

    entries.sort_by(fifo_order);

    let mut needed = amount;
    for entry in entries.iter_mut() {
        if needed <= 0 {
            break;
        }
        let taken = entry.debit(needed, now);
        if taken == 0 {
            continue;
        }
        needed -= taken;
        plan.consumed += taken;
        plan.debits.push(FifoDebit {
            entry_id: entry.id,
            amount: taken,
            update: EntryUpdate::from(&*entry),
        });
    }

    plan
}
