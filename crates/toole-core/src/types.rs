//! # Domain Types
//!
//! Core domain types used throughout the TOOL-E kiosk.
//!
//! ## Type Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Capture Pipeline Types                          │
//! │                                                                         │
//! │  RawReading ──► DetectionEvent ──► PendingEntry ──► ConfirmedEntry     │
//! │  (every tick)   (once per         (one at a time,   (immutable,        │
//! │                  placement)        mutable)          insertion order)  │
//! │                                          │                  │           │
//! │                                  Identification             ▼           │
//! │                                  (classifier reply)     CommitRow       │
//! │                                                             │           │
//! │                                                             ▼           │
//! │                                                        BatchResult      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Weights are calibrated raw load-cell units (`i64`). The zero offset is
//! applied by the hardware boundary before a reading reaches this crate.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_QUANTITY, UNKNOWN_LABEL};

// =============================================================================
// Sensor Types
// =============================================================================

/// One calibrated sample from the weight sensor. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReading {
    pub timestamp: DateTime<Utc>,
    pub weight_raw: i64,
}

impl RawReading {
    pub fn new(timestamp: DateTime<Utc>, weight_raw: i64) -> Self {
        RawReading {
            timestamp,
            weight_raw,
        }
    }
}

/// Emitted once per genuine physical placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Utc>,
    pub weight_at_trigger: i64,
}

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque, time-derived capture identifier.
///
/// Produced by [`crate::TransactionIdGenerator`]; unique for the lifetime of
/// one kiosk process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub(crate) fn new(value: String) -> Self {
        TransactionId(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a captured frame on disk (a path, as text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(value: impl Into<String>) -> Self {
        ImageRef(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Transaction Type
// =============================================================================

/// Whether the visit checks tools out or brings them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Borrow,
    Return,
}

impl TransactionType {
    /// Stable text form stored in the `kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Borrow => "borrow",
            TransactionType::Return => "return",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = crate::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "borrow" => Ok(TransactionType::Borrow),
            "return" => Ok(TransactionType::Return),
            _ => Err(crate::ValidationError::NotAllowed {
                field: "transaction_type".to_string(),
                allowed: vec!["borrow".to_string(), "return".to_string()],
            }),
        }
    }
}

// =============================================================================
// Identification
// =============================================================================

/// Classifier reply for one frame.
///
/// `score` is not thresholded here; deciding what counts as "confident" is
/// a presentation concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub prediction: String,
    pub score: f64,
    #[serde(default)]
    pub all_probabilities: BTreeMap<String, f64>,
    /// Name of the copy the classifier server kept of the uploaded frame.
    #[serde(default)]
    pub image_filename: Option<String>,
}

impl Identification {
    /// True when the classifier could not name a tool.
    pub fn is_unresolved(&self) -> bool {
        let label = self.prediction.trim();
        label.is_empty() || label.eq_ignore_ascii_case(UNKNOWN_LABEL)
    }
}

// =============================================================================
// Entries
// =============================================================================

/// The capture currently awaiting identification and confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub transaction_id: TransactionId,
    pub image_ref: ImageRef,
    pub captured_at: DateTime<Utc>,
    pub weight: i64,
    pub tool_label: Option<String>,
    pub confidence: Option<f64>,
    /// The classifier server's copy of this frame, from the latest reply.
    pub remote_image: Option<String>,
}

impl PendingEntry {
    pub fn new(
        transaction_id: TransactionId,
        image_ref: ImageRef,
        captured_at: DateTime<Utc>,
        weight: i64,
    ) -> Self {
        PendingEntry {
            transaction_id,
            image_ref,
            captured_at,
            weight,
            tool_label: None,
            confidence: None,
            remote_image: None,
        }
    }

    /// True once the classifier has answered for this capture.
    pub fn is_identified(&self) -> bool {
        self.tool_label.is_some()
    }
}

/// Snapshot of a pending entry the user accepted.
///
/// Fields are private and only readable: once created an entry never
/// changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedEntry {
    transaction_id: TransactionId,
    image_ref: ImageRef,
    captured_at: DateTime<Utc>,
    weight: i64,
    tool_label: String,
    predicted_label: Option<String>,
    confidence: Option<f64>,
    classification_correct: Option<bool>,
    remote_image: Option<String>,
}

impl ConfirmedEntry {
    pub(crate) fn from_pending(
        pending: PendingEntry,
        tool_label: String,
        classification_correct: Option<bool>,
    ) -> Self {
        ConfirmedEntry {
            transaction_id: pending.transaction_id,
            image_ref: pending.image_ref,
            captured_at: pending.captured_at,
            weight: pending.weight,
            tool_label,
            predicted_label: pending.tool_label,
            confidence: pending.confidence,
            classification_correct,
            remote_image: pending.remote_image,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn image_ref(&self) -> &ImageRef {
        &self.image_ref
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    /// The label the user accepted.
    pub fn tool_label(&self) -> &str {
        &self.tool_label
    }

    /// What the classifier said, if it answered before confirmation.
    pub fn predicted_label(&self) -> Option<&str> {
        self.predicted_label.as_deref()
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    /// `Some(true)` when the user kept the prediction, `Some(false)` when they
    /// overrode it, `None` when the classifier never answered.
    pub fn classification_correct(&self) -> Option<bool> {
        self.classification_correct
    }

    pub fn remote_image(&self) -> Option<&str> {
        self.remote_image.as_deref()
    }
}

// =============================================================================
// Batch Commit
// =============================================================================

/// One row of the atomic batch handed to a storage gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRow {
    pub transaction_id: TransactionId,
    pub user_id: String,
    pub kind: TransactionType,
    /// Tool name; the storage side resolves it to its own tool key.
    pub tool_label: String,
    pub captured_at: DateTime<Utc>,
    pub desired_return_date: Option<NaiveDate>,
    pub quantity: i64,
    pub purpose: Option<String>,
    pub image_ref: ImageRef,
    /// Server-side copy of the frame; servers that archive images move
    /// this one rather than `image_ref`.
    pub remote_image: Option<String>,
    pub classification_correct: Option<bool>,
    pub weight: i64,
}

impl CommitRow {
    pub(crate) fn from_entry(
        entry: &ConfirmedEntry,
        user_id: &str,
        kind: TransactionType,
        desired_return_date: Option<NaiveDate>,
        purpose: Option<&str>,
    ) -> Self {
        CommitRow {
            transaction_id: entry.transaction_id().clone(),
            user_id: user_id.to_string(),
            kind,
            tool_label: entry.tool_label().to_string(),
            captured_at: entry.captured_at(),
            desired_return_date,
            quantity: DEFAULT_QUANTITY,
            purpose: purpose.map(str::to_string),
            image_ref: entry.image_ref().clone(),
            remote_image: entry.remote_image().map(str::to_string),
            classification_correct: entry.classification_correct(),
            weight: entry.weight(),
        }
    }
}

/// Outcome of one batch commit.
///
/// `failure_index` is 1-based. When it is set, nothing from the batch is
/// persisted, regardless of how many rows the storage side attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub committed_count: usize,
    pub failure_index: Option<usize>,
    pub error_detail: Option<String>,
}

impl BatchResult {
    pub fn committed(count: usize) -> Self {
        BatchResult {
            committed_count: count,
            failure_index: None,
            error_detail: None,
        }
    }

    /// A rejected batch. `index` is the 1-based position of the first bad row.
    pub fn failed(index: usize, detail: impl Into<String>) -> Self {
        BatchResult {
            committed_count: 0,
            failure_index: Some(index),
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure_index.is_none() && self.error_detail.is_none()
    }
}
