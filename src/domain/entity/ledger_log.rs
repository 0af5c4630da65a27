use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Topup,
    System,
    Manage,
}

impl LogType {
    pub fn as_str(&self) -> &str {
        match self {
            LogType::Topup => "topup",
            LogType::System => "system",
            LogType::Manage => "manage",
        }
    }
}

/// AuditLogEntry は残高変動の監査ログ。台帳を変更したトランザクション内で追記する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub owner_id: i64,
    pub log_type: LogType,
    pub content: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        owner_id: i64,
        log_type: LogType,
        content: impl Into<String>,
        detail: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id,
            log_type,
            content: content.into(),
            detail,
            created_at,
        }
    }
}

/// TopUpRecord は引換による入金履歴（課金履歴）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUpRecord {
    pub owner_id: i64,
    pub amount: i64,
    pub money: f64,
    pub trade_no: String,
    pub payment_method: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TopUpRecord {
    /// 引換コード由来の入金記録を作る。`amount` は課金単位に換算済みの値。
    pub fn from_redemption(
        owner_id: i64,
        code_id: i64,
        plan_code: bool,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let trade_no = if plan_code {
            format!("subrdm{}", code_id)
        } else {
            format!("RDM{}", code_id)
        };
        Self {
            owner_id,
            amount,
            money: 0.0,
            trade_no,
            payment_method: "redemption".to_string(),
            status: "success".to_string(),
            created_at: now,
            completed_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_up_trade_no() {
        let now = Utc::now();
        let balance = TopUpRecord::from_redemption(7, 12, false, 3, now);
        assert_eq!(balance.trade_no, "RDM12");
        assert_eq!(balance.amount, 3);
        assert_eq!(balance.payment_method, "redemption");

        let plan = TopUpRecord::from_redemption(7, 12, true, 0, now);
        assert_eq!(plan.trade_no, "subrdm12");
    }
}
