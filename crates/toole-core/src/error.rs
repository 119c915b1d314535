//! # Error Types
//!
//! Domain-specific error types for toole-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  toole-core errors (this file)                                         │
//! │  ├── CoreError        - Session invariant violations                   │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  toole-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  toole-station errors (separate crate)                                 │
//! │  ├── CaptureError, IdentificationError, SubmissionError                │
//! │  └── StationError     - Everything the kiosk loop can surface          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → StationError → operator / UI      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `CoreError` returned by [`crate::Session`] is a rejected no-op: the
//! session is exactly as it was before the call.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Session invariant violations and wrapped validation failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A capture was started while another pending entry is still open.
    ///
    /// ## When This Occurs
    /// - A second detection slipped past the capture coordinator
    /// - Finalize was requested while a capture still awaits confirmation
    #[error("A pending entry already exists: {transaction_id}")]
    PendingEntryExists { transaction_id: String },

    /// Confirm or cancel was requested with nothing pending.
    #[error("No pending entry to {operation}")]
    NoPendingEntry { operation: &'static str },

    /// An operation needs a validated user and none is logged in.
    #[error("No active session: {operation} requires a validated user")]
    SessionNotStarted { operation: &'static str },

    /// An identification result arrived for a capture that is no longer pending.
    ///
    /// ## User Workflow
    /// ```text
    /// capture T1 ──► identify(T1) dispatched
    ///      │
    ///      ▼
    /// user confirms T1 manually (pending cleared)
    ///      │
    ///      ▼
    /// identify(T1) completes late
    ///      │
    ///      ▼
    /// StaleResult { transaction_id: "T1" }  → dropped, session untouched
    /// ```
    #[error("Stale identification result for {transaction_id}")]
    StaleResult { transaction_id: String },

    /// The session has nothing to submit.
    #[error("Session has no confirmed entries")]
    NothingToSubmit,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true for programming-level invariant violations.
    ///
    /// These are logged and rejected; validation failures are user input
    /// problems and get shown to the user instead.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            CoreError::PendingEntryExists { .. }
                | CoreError::NoPendingEntry { .. }
                | CoreError::SessionNotStarted { .. }
                | CoreError::StaleResult { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., malformed identifier).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// A date lies in the past.
    #[error("{field} cannot be in the past")]
    DateInPast { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
