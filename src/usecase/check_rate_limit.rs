use std::sync::Arc;

use crate::domain::ErrorKind;
use crate::infrastructure::rate_limiter::SlidingWindowRateLimiter;

#[derive(Debug, Clone)]
pub struct CheckRateLimitInput {
    pub key: String,
    pub max_requests: usize,
    pub window_secs: i64,
}

/// CheckRateLimitError はレートリミットチェックに関するエラー。
#[derive(Debug, thiserror::Error)]
pub enum CheckRateLimitError {
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl CheckRateLimitError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// CheckRateLimitUseCase はリクエスト受付前のアドミッション判定を行う。
pub struct CheckRateLimitUseCase {
    limiter: Arc<SlidingWindowRateLimiter>,
}

impl CheckRateLimitUseCase {
    pub fn new(limiter: Arc<SlidingWindowRateLimiter>) -> Self {
        Self { limiter }
    }

    /// 受け入れる場合 true。
    pub fn execute(&self, input: &CheckRateLimitInput) -> Result<bool, CheckRateLimitError> {
        if input.key.is_empty() {
            return Err(CheckRateLimitError::ValidationError("key is required".to_string()));
        }
        if input.window_secs <= 0 {
            return Err(CheckRateLimitError::ValidationError(
                "window_secs must be positive".to_string(),
            ));
        }

        let allowed = self
            .limiter
            .allow(&input.key, input.max_requests, input.window_secs);
        if !allowed {
            tracing::debug!(
                key = %input.key,
                max_requests = input.max_requests,
                window_secs = input.window_secs,
                "request rejected by rate limiter"
            );
        }
        Ok(allowed)
    }
}
