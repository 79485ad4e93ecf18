//! Error types for the attribution engine

use crate::figure::ReasonCode;
use crate::models::SourceCategory;
use thiserror::Error;

/// Errors raised by the attribution engine
///
/// Stale data and missing coverage are deliberately absent: they are
/// annotations on the output, not failures.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// An external fetch failed and no cached payload exists for the key
    #[error("Source unavailable: {category} [{key}]: {reason}")]
    SourceUnavailable {
        category: SourceCategory,
        key: String,
        reason: String,
    },

    /// Malformed timestamps, out-of-range utilization and similar
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Reason code recorded on a resource that failed with this error
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            EngineError::SourceUnavailable { .. } => ReasonCode::SourceUnavailable,
            EngineError::InvalidInput(_) | EngineError::Config(_) => ReasonCode::InvalidInput,
        }
    }

    /// Source category involved, if any
    pub fn category(&self) -> Option<SourceCategory> {
        match self {
            EngineError::SourceUnavailable { category, .. } => Some(*category),
            _ => None,
        }
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;
