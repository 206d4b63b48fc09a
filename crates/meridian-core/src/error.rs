//! # Error Types
//!
//! Domain-specific error types for meridian-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  meridian-core errors (this file)                                      │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  meridian-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  meridian-engine errors (separate crate)                               │
//! │  └── EngineError      - Wraps both for orchestration flows             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (entity, id, quantities)
//! 3. Errors are enum variants, never String
//! 4. Every failure here is recoverable at the request boundary

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business rule errors.
///
/// These errors represent domain rule violations. They should be caught at
/// the request boundary and translated to user-facing messages; none of them
/// is fatal to the process.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity lookup miss.
    ///
    /// ## When This Occurs
    /// - ID doesn't exist
    /// - Secondary key (coupon code, tracking number, transaction id) misses
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Actor lacks ownership or the required role.
    ///
    /// ## When This Occurs
    /// - A customer touches an order they do not own
    /// - A non-admin calls an administrative operation
    #[error("Not authorized to {action}")]
    Unauthorized { action: String },

    /// Not enough available stock for the requested quantity.
    ///
    /// ## User Workflow
    /// ```text
    /// reserve(qty: 5)
    ///      │
    ///      ▼
    /// available = current - reserved = 3
    ///      │
    ///      ▼
    /// InsufficientStock { available: 3, requested: 5 }
    /// ```
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Illegal state change for an order, delivery, or payment.
    ///
    /// ## When This Occurs
    /// - Cancelling an already-delivered order
    /// - Marking a failed payment as successful
    #[error("{entity} {id} is {current}, cannot {attempted}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        current: String,
        attempted: String,
    },

    /// Refund amount or state violation.
    ///
    /// ## When This Occurs
    /// - Refunding a payment that is not in `success`
    /// - Refund amount exceeds the payment amount
    /// - Refund already completed
    #[error("Invalid refund: {reason}")]
    InvalidRefund { reason: String },

    /// Unique-constraint style duplicate.
    ///
    /// ## When This Occurs
    /// - Second inventory record for the same (product, store) pair
    /// - Second active payment or second delivery for an order
    /// - Duplicate coupon code
    #[error("{entity} already exists for {key}")]
    DuplicateEntity { entity: &'static str, key: String },

    /// Coupon exists and is valid but does not apply to this order.
    ///
    /// ## When This Occurs
    /// - Order total below the coupon's minimum
    /// - Order items outside the coupon's category/product restriction
    /// - Coupon expired, inactive, or exhausted
    #[error("Coupon {code} not applicable: {reason}")]
    CouponNotApplicable { code: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an Unauthorized error for the named action.
    pub fn unauthorized(action: impl Into<String>) -> Self {
        CoreError::Unauthorized {
            action: action.into(),
        }
    }

    /// Creates an InvalidTransition error.
    pub fn invalid_transition(
        entity: &'static str,
        id: impl Into<String>,
        current: impl Into<String>,
        attempted: impl Into<String>,
    ) -> Self {
        CoreError::InvalidTransition {
            entity,
            id: id.into(),
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    /// Creates an InvalidRefund error.
    pub fn invalid_refund(reason: impl Into<String>) -> Self {
        CoreError::InvalidRefund {
            reason: reason.into(),
        }
    }

    /// Creates a CouponNotApplicable error.
    pub fn coupon_not_applicable(code: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::CouponNotApplicable {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet shape requirements.
/// Used for early validation before business rules run.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid coupon code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
