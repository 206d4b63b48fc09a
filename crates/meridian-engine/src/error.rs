//! # Engine Error Types
//!
//! Error types for the orchestration layer.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Flow                                 │
//! │                                                                         │
//! │   CoreError ──► DbError ──► EngineError ──► caller                      │
//! │   (rules)       (storage)   (this crate)                                │
//! │                                                                         │
//! │   Domain errors pass through *typed*, never stringified. A caller       │
//! │   that needs to branch on InsufficientStock or CouponNotApplicable      │
//! │   reaches them through `EngineError::business()`.                       │
//! │                                                                         │
//! │   The engine adds only its own concerns on top: configuration           │
//! │   loading and background-task channels.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use meridian_core::CoreError;
use meridian_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
///
/// Storage and domain failures keep their original shape under `Db`; the
/// remaining variants are engine-only concerns.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage failure, or a domain error raised inside a guarded write.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save the config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// A background task's control channel is gone.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        EngineError::Db(DbError::Core(err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl EngineError {
    /// The domain error behind this failure, when there is one.
    ///
    /// Callers branch on this to turn InsufficientStock into a "sold out"
    /// response instead of a generic 500.
    pub fn business(&self) -> Option<&CoreError> {
        match self {
            EngineError::Db(DbError::Core(core)) => Some(core),
            _ => None,
        }
    }

    /// True when this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
        )
    }
}
