use std::sync::Arc;

use crate::domain::entity::CodeStatus;
use crate::domain::repository::RedemptionCodeRepository;
use crate::domain::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum DisableRedemptionCodeError {
    #[error("redemption code not found: {0}")]
    NotFound(i64),

    #[error("redemption code {id} is {status}, only enabled codes can be disabled")]
    Conflict { id: i64, status: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DisableRedemptionCodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DisableRedemptionCodeError::NotFound(_) => ErrorKind::NotFound,
            DisableRedemptionCodeError::Conflict { .. } => ErrorKind::Conflict,
            DisableRedemptionCodeError::Internal(_) => ErrorKind::Storage,
        }
    }
}

pub struct DisableRedemptionCodeUseCase {
    repo: Arc<dyn RedemptionCodeRepository>,
}

impl DisableRedemptionCodeUseCase {
    pub fn new(repo: Arc<dyn RedemptionCodeRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, id: i64) -> Result<(), DisableRedemptionCodeError> {
        let internal = |e: anyhow::Error| DisableRedemptionCodeError::Internal(e.to_string());

        if self
            .repo
            .transition_status(id, CodeStatus::Enabled, CodeStatus::Disabled)
            .await
            .map_err(internal)?
        {
            tracing::info!(code_id = id, "redemption code disabled");
            return Ok(());
        }

        // 遷移できなかった理由を判別する
        match self.repo.find_by_id(id).await.map_err(internal)? {
            None => Err(DisableRedemptionCodeError::NotFound(id)),
            Some(code) => Err(DisableRedemptionCodeError::Conflict {
                id,
                status: code.status.as_str().to_string(),
            }),
        }
    }
}
