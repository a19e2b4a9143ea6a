use thiserror::Error;

/// Errors raised while building a throttler.
///
/// Every variant is a setup-time failure: once a [`crate::Throttler`] exists,
/// admission and retry never produce errors of their own.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("A rule without a matcher must be the only rule (conflict at rule #{index})")]
    CatchAllConflict { index: usize },

    #[error("Invalid match pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ThrottlerError {
    pub(crate) fn invalid_rule(index: usize, reason: impl Into<String>) -> Self {
        ThrottlerError::InvalidRule {
            index,
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error came from rule validation rather than I/O or parsing.
    pub fn is_rule_error(&self) -> bool {
        matches!(
            self,
            ThrottlerError::InvalidRule { .. }
                | ThrottlerError::CatchAllConflict { .. }
                | ThrottlerError::InvalidPattern(_)
        )
    }
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;
