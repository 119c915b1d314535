//! # Station Error Types
//!
//! Errors raised at the kiosk's hardware, network and storage boundaries.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Station Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Hardware       │  │  Classifier     │  │  Submission             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  SensorRead     │  │  Network        │  │  Network / Timeout      │ │
//! │  │   (ignored)     │  │  Timeout        │  │  BadResponse            │ │
//! │  │  Capture        │  │  BadResponse    │  │  Storage                │ │
//! │  │   (per attempt) │  │  Rejected       │  │  (entries kept)         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  StationError: config, invariant (CoreError), db, channel       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant is recoverable from the user's point of view: the kiosk
//! either lets them retry the step or abandons the session cleanly.

use thiserror::Error;

use toole_core::CoreError;
use toole_db::DbError;

/// Result type alias for station operations.
pub type StationResult<T> = Result<T, StationError>;

// =============================================================================
// Boundary Errors
// =============================================================================

/// The weight sensor had no sample ready. Treated as a non-event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorReadError {
    #[error("Sensor not ready")]
    NotReady,

    #[error("Sensor is powered down")]
    PoweredDown,

    #[error("Sensor I/O failed: {0}")]
    Io(String),
}

/// The camera could not produce a frame. Terminal for one capture attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Camera returned an empty frame")]
    EmptyFrame,
}

/// The classifier round-trip failed. The pending entry is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentificationError {
    #[error("Classifier unreachable: {0}")]
    Network(String),

    #[error("Classifier timed out after {0} seconds")]
    Timeout(u64),

    #[error("Classifier sent an unreadable reply: {0}")]
    BadResponse(String),

    #[error("Classifier rejected the image (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Captured image unavailable: {0}")]
    ImageMissing(String),
}

impl IdentificationError {
    /// Every identification failure can be retried with the same image
    /// except a missing image file.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, IdentificationError::ImageMissing(_))
    }
}

/// The batch never got a definite answer from storage. Entries are kept.
///
/// A storage answer that names a failing row is not an error; it comes back
/// as a [`toole_core::BatchResult`] with `failure_index` set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("Storage unreachable: {0}")]
    Network(String),

    #[error("Submission timed out after {0} seconds")]
    Timeout(u64),

    #[error("Storage sent an unreadable reply: {0}")]
    BadResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Tool catalog unavailable: {0}")]
    Catalog(String),
}

impl From<DbError> for SubmissionError {
    fn from(err: DbError) -> Self {
        SubmissionError::Storage(err.to_string())
    }
}

// =============================================================================
// Station Error
// =============================================================================

/// Everything that can go wrong inside the kiosk runtime.
#[derive(Debug, Error)]
pub enum StationError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid kiosk configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Boundary Errors
    // =========================================================================
    #[error(transparent)]
    Sensor(#[from] SensorReadError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Identification(#[from] IdentificationError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("User validation failed: {0}")]
    Validation(String),

    #[error("Image store error: {0}")]
    Image(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// A session operation was rejected; the session is unchanged.
    #[error(transparent)]
    Session(#[from] CoreError),

    /// A submission is already in flight.
    #[error("A submission is already in progress")]
    SubmitInProgress,

    /// The requested action needs a state the kiosk is not in.
    #[error("Cannot {action} while {state}")]
    WrongState {
        action: &'static str,
        state: &'static str,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Kiosk is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for StationError {
    fn from(err: url::ParseError) -> Self {
        StationError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for StationError {
    fn from(err: std::io::Error) -> Self {
        StationError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for StationError {
    fn from(err: toml::de::Error) -> Self {
        StationError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for StationError {
    fn from(err: toml::ser::Error) -> Self {
        StationError::ConfigSaveFailed(err.to_string())
    }
}

impl StationError {
    /// True for rejected session operations that indicate a caller bug
    /// rather than a user or device problem.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, StationError::Session(e) if e.is_invariant_violation())
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            StationError::InvalidConfig(_)
                | StationError::InvalidUrl(_)
                | StationError::ConfigLoadFailed(_)
                | StationError::ConfigSaveFailed(_)
        )
    }
}
