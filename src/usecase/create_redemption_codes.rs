use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::entity::{NewRedemptionCode, RedemptionCode, MAX_VALIDITY_PERIOD_SECS};
use crate::domain::repository::RedemptionCodeRepository;
use crate::domain::ErrorKind;

pub const MAX_CODES_PER_REQUEST: u32 = 100;
pub const MAX_NAME_LENGTH: usize = 20;

#[derive(Debug, Clone)]
pub struct CreateRedemptionCodesInput {
    pub name: String,
    pub count: u32,
    pub amount: i64,
    pub validity_period_secs: i64,
    pub plan_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateRedemptionCodesError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CreateRedemptionCodesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CreateRedemptionCodesError::Validation(_) => ErrorKind::InvalidInput,
            CreateRedemptionCodesError::Internal(_) => ErrorKind::Storage,
        }
    }
}

/// 引換コードをまとめて発行する。キーは 32 文字のランダム文字列。
pub struct CreateRedemptionCodesUseCase {
    repo: Arc<dyn RedemptionCodeRepository>,
}

impl CreateRedemptionCodesUseCase {
    pub fn new(repo: Arc<dyn RedemptionCodeRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(
        &self,
        input: &CreateRedemptionCodesInput,
    ) -> Result<Vec<RedemptionCode>, CreateRedemptionCodesError> {
        validate(input)?;

        let mut created = Vec::with_capacity(input.count as usize);
        for _ in 0..input.count {
            let code = NewRedemptionCode {
                key: uuid::Uuid::new_v4().simple().to_string(),
                name: input.name.trim().to_string(),
                amount: input.amount,
                validity_period_secs: input.validity_period_secs,
                plan_id: input.plan_id,
                expires_at: input.expires_at,
            };
            let code = self
                .repo
                .create(&code)
                .await
                .map_err(|e| CreateRedemptionCodesError::Internal(e.to_string()))?;
            created.push(code);
        }

        tracing::info!(
            name = %input.name,
            count = created.len(),
            amount = input.amount,
            "redemption codes created"
        );
        Ok(created)
    }
}

fn validate(input: &CreateRedemptionCodesInput) -> Result<(), CreateRedemptionCodesError> {
    let name = input.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(CreateRedemptionCodesError::Validation(format!(
            "name must be between 1 and {} characters",
            MAX_NAME_LENGTH
        )));
    }
    if input.count == 0 || input.count > MAX_CODES_PER_REQUEST {
        return Err(CreateRedemptionCodesError::Validation(format!(
            "count must be between 1 and {}",
            MAX_CODES_PER_REQUEST
        )));
    }
    if input.amount < 0 {
        return Err(CreateRedemptionCodesError::Validation(
            "amount must not be negative".to_string(),
        ));
    }
    if !(0..=MAX_VALIDITY_PERIOD_SECS).contains(&input.validity_period_secs) {
        return Err(CreateRedemptionCodesError::Validation(format!(
            "validity_period_secs must be between 0 and {}",
            MAX_VALIDITY_PERIOD_SECS
        )));
    }
    if input.plan_id < 0 {
        return Err(CreateRedemptionCodesError::Validation(
            "plan_id must not be negative".to_string(),
        ));
    }
    Ok(())
}
