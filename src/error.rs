use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("quiz has no questions")]
    DegenerateQuiz,

    #[error("you have used all {max} attempts for this quiz")]
    AttemptLimitExceeded { used: i64, max: i64 },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("side effect failed: {0}")]
    NonFatalSideEffect(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_failed",
            Self::DegenerateQuiz => "degenerate_quiz",
            Self::AttemptLimitExceeded { .. } => "attempt_limit_exceeded",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "db_error",
            Self::NonFatalSideEffect(_) => "side_effect_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { details, .. } => details.clone(),
            Self::AttemptLimitExceeded { used, max } => {
                Some(json!({ "used": used, "maxAttempts": max }))
            }
            Self::NotFound(entity) => Some(json!({ "entity": entity })),
            _ => None,
        }
    }

    /// Storage failures are the only kind a caller should retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
