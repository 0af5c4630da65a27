use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 引換コードに設定できる有効期間の上限（100 年）。
pub const MAX_VALIDITY_PERIOD_SECS: i64 = 100 * 365 * 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Enabled,
    Used,
    Disabled,
}

impl CodeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CodeStatus::Enabled => "enabled",
            CodeStatus::Used => "used",
            CodeStatus::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(CodeStatus::Enabled),
            "used" => Some(CodeStatus::Used),
            "disabled" => Some(CodeStatus::Disabled),
            _ => None,
        }
    }
}

/// RedemptionCode は一度だけ使用できる引換コード。
///
/// `plan_id` が 0 なら残高コード、正ならサブスクリプションプランのコード。
/// `validity_period_secs` が 0 の場合、付与残高は失効しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionCode {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub status: CodeStatus,
    pub amount: i64,
    pub validity_period_secs: i64,
    pub plan_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub used_by_owner_id: Option<i64>,
}

impl RedemptionCode {
    pub fn is_plan_code(&self) -> bool {
        self.plan_id > 0
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at < now)
    }

    /// 引換時に作成する台帳エントリの失効時刻。無期限なら `None`。
    /// 日時の表現範囲を超える有効期間はエラー。
    pub fn grant_expiry(&self, redeemed_at: DateTime<Utc>) -> anyhow::Result<Option<DateTime<Utc>>> {
        if self.validity_period_secs <= 0 {
            return Ok(None);
        }
        Duration::try_seconds(self.validity_period_secs)
            .and_then(|validity| redeemed_at.checked_add_signed(validity))
            .map(Some)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "validity period out of range: code_id={}, validity_period_secs={}",
                    self.id,
                    self.validity_period_secs
                )
            })
    }

    pub fn mark_used(&mut self, owner_id: i64, now: DateTime<Utc>) {
        self.status = CodeStatus::Used;
        self.redeemed_at = Some(now);
        self.used_by_owner_id = Some(owner_id);
    }

    /// 保守処理で削除対象になるか（使用済み・無効化済み・期限切れ）。
    pub fn is_purgeable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            CodeStatus::Used | CodeStatus::Disabled => true,
            CodeStatus::Enabled => self.is_expired(now),
        }
    }
}

/// 引換コード発行の入力。
#[derive(Debug, Clone, PartialEq)]
pub struct NewRedemptionCode {
    pub key: String,
    pub name: String,
    pub amount: i64,
    pub validity_period_secs: i64,
    pub plan_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RedeemResult {
    Balance { quota: i64 },
    Subscription { plan_name: String },
}

impl RedeemResult {
    pub fn kind(&self) -> &str {
        match self {
            RedeemResult::Balance { .. } => "balance",
            RedeemResult::Subscription { .. } => "subscription",
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_code(key: &str, amount: i64, validity_period_secs: i64) -> RedemptionCode {
    RedemptionCode {
        id: 1,
        key: key.to_string(),
        name: "sample".to_string(),
        status: CodeStatus::Enabled,
        amount,
        validity_period_secs,
        plan_id: 0,
        expires_at: None,
        created_at: Utc::now(),
        redeemed_at: None,
        used_by_owner_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_status_roundtrip() {
        assert_eq!(CodeStatus::from_str("enabled"), Some(CodeStatus::Enabled));
        assert_eq!(CodeStatus::from_str("used"), Some(CodeStatus::Used));
        assert_eq!(CodeStatus::from_str("disabled"), Some(CodeStatus::Disabled));
        assert_eq!(CodeStatus::from_str("other"), None);
        assert_eq!(CodeStatus::Used.as_str(), "used");
    }

    #[test]
    fn test_grant_expiry() {
        let now = Utc::now();
        let permanent = sample_code("k", 500, 0);
        assert_eq!(permanent.grant_expiry(now).unwrap(), None);

        let timed = sample_code("k", 500, 86400);
        assert_eq!(
            timed.grant_expiry(now).unwrap(),
            Some(now + Duration::seconds(86400))
        );
    }

    #[test]
    fn test_grant_expiry_out_of_range_is_error() {
        let now = Utc::now();
        let huge = sample_code("k", 500, 10_000_000_000_000);
        assert!(huge.grant_expiry(now).is_err());

        let max = sample_code("k", 500, i64::MAX);
        assert!(max.grant_expiry(now).is_err());

        let bounded = sample_code("k", 500, MAX_VALIDITY_PERIOD_SECS);
        assert!(bounded.grant_expiry(now).unwrap().is_some());
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let mut code = sample_code("k", 1, 0);
        assert!(!code.is_expired(now));
        code.expires_at = Some(now - Duration::seconds(1));
        assert!(code.is_expired(now));
        code.expires_at = Some(now + Duration::seconds(60));
        assert!(!code.is_expired(now));
    }

    #[test]
    fn test_mark_used() {
        let now = Utc::now();
        let mut code = sample_code("k", 1, 0);
        code.mark_used(42, now);
        assert_eq!(code.status, CodeStatus::Used);
        assert_eq!(code.redeemed_at, Some(now));
        assert_eq!(code.used_by_owner_id, Some(42));
    }

    #[test]
    fn test_is_purgeable() {
        let now = Utc::now();
        let mut code = sample_code("k", 1, 0);
        assert!(!code.is_purgeable(now));
        code.expires_at = Some(now - Duration::seconds(5));
        assert!(code.is_purgeable(now));
        code.expires_at = None;
        code.status = CodeStatus::Disabled;
        assert!(code.is_purgeable(now));
    }

    #[test]
    fn test_redeem_result_serializes_with_type_tag() {
        let json = serde_json::to_value(RedeemResult::Balance { quota: 500 }).unwrap();
        assert_eq!(json["type"], "balance");
        assert_eq!(json["quota"], 500);
        assert_eq!(
            RedeemResult::Subscription { plan_name: "pro".to_string() }.kind(),
            "subscription"
        );
    }
}
