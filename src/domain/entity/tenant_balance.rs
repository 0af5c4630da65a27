use serde::{Deserialize, Serialize};

/// テナントアカウントが持つ集計残高。
///
/// `total_balance` は期限付き部分（Active エントリの残量合計）と恒久部分の和。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantBalance {
    pub owner_id: i64,
    pub total_balance: i64,
    pub used_balance: i64,
}

/// 残高内訳。恒久部分は 0 未満にならないよう丸める。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub total_balance: i64,
    pub expiring_balance: i64,
    pub permanent_balance: i64,
}

impl BalanceSummary {
    pub fn new(total_balance: i64, expiring_balance: i64) -> Self {
        Self {
            total_balance,
            expiring_balance,
            permanent_balance: (total_balance - expiring_balance).max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_split() {
        let s = BalanceSummary::new(1000, 300);
        assert_eq!(s.permanent_balance, 700);
        assert_eq!(s.expiring_balance, 300);
    }

    #[test]
    fn test_summary_clamps_permanent() {
        let s = BalanceSummary::new(100, 250);
        assert_eq!(s.permanent_balance, 0);
        assert_eq!(s.total_balance, 100);
    }
}
