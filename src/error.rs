//! Error types for the model gateway and the run as a whole.
//!
//! Tool failures never appear here: they are absorbed into observations.

use crate::types::FailureCategory;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single language model call.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("model provider rate limited the request: {0}")]
    RateLimited(String),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("model provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error talking to model provider: {0}")]
    Network(String),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::RateLimited(_) => FailureCategory::RateLimited,
            Self::Timeout(_) => FailureCategory::TimedOut,
            Self::QuotaExceeded(_) => FailureCategory::QuotaExceeded,
            Self::Http { .. } | Self::Network(_) | Self::InvalidResponse(_) => {
                FailureCategory::Unavailable
            }
        }
    }
}

/// Terminal failure of a run.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("run cancelled")]
    Cancelled,

    #[error("run deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl RunError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Gateway(e) => e.category(),
            Self::Cancelled => FailureCategory::Cancelled,
            Self::DeadlineExceeded(_) => FailureCategory::DeadlineExceeded,
        }
    }

    /// Message suitable for showing to the person who asked the question.
    pub fn user_message(&self) -> String {
        match self.category() {
            FailureCategory::RateLimited => {
                "The assistant is receiving too many requests right now. Please try again in a moment."
            }
            FailureCategory::TimedOut => {
                "The assistant took too long to respond. Please try again."
            }
            FailureCategory::QuotaExceeded => {
                "The assistant's usage quota has been exhausted. Please contact an administrator."
            }
            FailureCategory::Unavailable => {
                "The assistant is temporarily unavailable. Please try again later."
            }
            FailureCategory::Cancelled => "The request was cancelled before an answer was ready.",
            FailureCategory::DeadlineExceeded => {
                "The request ran out of time before an answer was ready."
            }
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_are_categorized() {
        assert_eq!(
            GatewayError::RateLimited("429".into()).category(),
            FailureCategory::RateLimited
        );
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(30)).category(),
            FailureCategory::TimedOut
        );
        assert_eq!(
            GatewayError::Http {
                status: 500,
                body: String::new()
            }
            .category(),
            FailureCategory::Unavailable
        );
    }

    #[test]
    fn run_error_wraps_gateway_category() {
        let err: RunError = GatewayError::QuotaExceeded("insufficient_quota".into()).into();
        assert_eq!(err.category(), FailureCategory::QuotaExceeded);
        assert!(err.user_message().contains("quota"));
        assert_eq!(RunError::Cancelled.category(), FailureCategory::Cancelled);
    }
}
