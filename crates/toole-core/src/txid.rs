//! # Transaction IDs
//!
//! Capture identifiers are derived from the capture timestamp at millisecond
//! resolution plus a sequence number for captures that land in the same
//! millisecond.
//!
//! ```text
//! 20240101-090000-123-0
//! └──date─┘└time┘└ms┘ └ sequence within that millisecond
//! ```
//!
//! The generator never goes backwards: if the wall clock steps back (NTP
//! correction on the Pi) it keeps issuing IDs from the last millisecond it
//! saw, bumping the sequence, so IDs stay unique for the process lifetime.

use chrono::{DateTime, Utc};

use crate::types::TransactionId;

/// Issues unique, time-ordered transaction IDs.
#[derive(Debug, Default)]
pub struct TransactionIdGenerator {
    last_millis: Option<i64>,
    sequence: u32,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ID for a capture taken at `now`.
    pub fn next(&mut self, now: DateTime<Utc>) -> TransactionId {
        let now_millis = now.timestamp_millis();

        let millis = match self.last_millis {
            Some(last) if now_millis <= last => {
                self.sequence += 1;
                last
            }
            _ => {
                self.sequence = 0;
                now_millis
            }
        };
        self.last_millis = Some(millis);

        let stamp = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(now);
        TransactionId::new(format!(
            "{}-{:03}-{}",
            stamp.format("%Y%m%d-%H%M%S"),
            stamp.timestamp_subsec_millis(),
            self.sequence
        ))
    }
}
