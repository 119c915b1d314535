//! Results published by background tasks.
//!
//! Workers never touch the session. They send one of these to the kiosk
//! loop, which applies it on its next turn.

use toole_core::{BatchResult, Identification, ImageRef, TransactionId};

use crate::error::{IdentificationError, StationResult, SubmissionError};
use crate::users::ValidationOutcome;

/// Channel depth between workers and the loop.
pub(crate) const WORKER_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
pub enum WorkerMessage {
    /// Classifier round-trip for one capture ended.
    Identified {
        transaction_id: TransactionId,
        result: Result<Identification, IdentificationError>,
    },

    /// User validation for one scan ended.
    UserValidated {
        identifier: String,
        result: StationResult<ValidationOutcome>,
    },

    /// Batch submission ended.
    Submitted(SubmitReport),
}

/// What a submission worker did.
#[derive(Debug)]
pub struct SubmitReport {
    pub result: Result<BatchResult, SubmissionError>,
    /// Images moved out of temp during this attempt, keyed by capture.
    pub relocated: Vec<(TransactionId, ImageRef)>,
}
