//! # toole-core: Pure Capture Logic for the TOOL-E Kiosk
//!
//! This crate holds the control logic that turns "something was put on the
//! scale" into a list of confirmed tool entries ready for one atomic commit.
//! It performs no I/O: the caller supplies every reading, timestamp and
//! classifier result.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       TOOL-E Kiosk Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          toole-station (async kiosk loop, hardware, HTTP)       │   │
//! │  │   sensor poll ──► capture ──► identify ──► confirm ──► submit   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ plain method calls                     │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ toole-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ debounce  │  │  session  │  │   txid    │  │ validation│  │   │
//! │  │   │ Sensor    │  │ Pending / │  │ time +    │  │ waiver,   │  │   │
//! │  │   │ Debouncer │  │ Confirmed │  │ sequence  │  │ dates     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • CALLER-SUPPLIED TIME     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Readings, entries, batch rows and results
//! - [`debounce`] - Sensor debounce state machine
//! - [`session`] - The single live session and its pending entry
//! - [`txid`] - Unique, time-derived transaction IDs
//! - [`validation`] - Waiver window, identifiers, return dates
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use toole_core::debounce::{DebounceConfig, SensorDebouncer};
//! use toole_core::RawReading;
//!
//! let mut debouncer = SensorDebouncer::new(DebounceConfig {
//!     threshold: 1000,
//!     stable_reads: 3,
//!     dwell: Duration::seconds(2),
//!     removal_factor: None,
//! });
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
//! for (i, w) in [1200, 1300, 1250].into_iter().enumerate() {
//!     let at = t0 + Duration::milliseconds(100 * i as i64);
//!     assert!(debouncer.on_reading(RawReading::new(at, w)).is_none());
//! }
//! let fired = debouncer.on_reading(RawReading::new(t0 + Duration::milliseconds(2200), 1250));
//! assert_eq!(fired.map(|e| e.weight_at_trigger), Some(1250));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod debounce;
pub mod error;
pub mod session;
pub mod txid;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use debounce::{DebounceConfig, DebounceState, SensorDebouncer};
pub use error::{CoreError, CoreResult, ValidationError};
pub use session::Session;
pub use txid::TransactionIdGenerator;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Days a safety waiver stays valid after its last renewal.
pub const WAIVER_VALID_DAYS: i64 = 365;

/// Quantity recorded for every captured tool.
///
/// One placement on the scale is one tool; the batch row still carries the
/// column so manual entry at the admin desk can record more.
pub const DEFAULT_QUANTITY: i64 = 1;

/// Label the classifier uses when it cannot decide.
pub const UNKNOWN_LABEL: &str = "unknown";
