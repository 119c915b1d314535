//! # Session State
//!
//! The one live visit on a kiosk: who is at the screen, what they are doing,
//! the tools they have confirmed so far and the single capture in progress.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Session Lifecycle                              │
//! │                                                                         │
//! │  begin(user)  ──► set_transaction_type(borrow|return)                  │
//! │                          │                                              │
//! │          ┌───────────────▼──────────────────┐                           │
//! │          │  start_pending(tx, image)        │◄──────────┐               │
//! │          │  apply_identification(tx, ...)   │           │ next tool     │
//! │          │  confirm(label) | cancel_pending │───────────┘               │
//! │          └───────────────┬──────────────────┘                           │
//! │                          │                                              │
//! │                    commit_rows() ──► BatchSubmitter                     │
//! │                          │                                              │
//! │          success: reset()   failure: entries kept for retry            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//! - At most one pending entry exists at any time.
//! - Confirmed entries are never mutated and keep capture order.
//! - Identification results are matched by transaction ID; a result for
//!   anything but the current pending entry changes nothing.
//! - Every rejected call leaves the session exactly as it was.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{
    CommitRow, ConfirmedEntry, Identification, ImageRef, PendingEntry, TransactionId,
    TransactionType,
};
use crate::validation;

/// Authoritative state for the current visit.
#[derive(Debug, Clone, Default)]
pub struct Session {
    user_id: Option<String>,
    transaction_type: Option<TransactionType>,
    confirmed: Vec<ConfirmedEntry>,
    pending: Option<PendingEntry>,
    desired_return_date: Option<NaiveDate>,
    purpose: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts a visit for a validated user, discarding anything left over.
    pub fn begin(&mut self, user_id: impl Into<String>) {
        self.reset();
        self.user_id = Some(user_id.into());
    }

    /// Clears everything: user, type, entries, pending capture, dates.
    pub fn reset(&mut self) {
        *self = Session::default();
    }

    pub fn is_active(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn transaction_type(&self) -> Option<TransactionType> {
        self.transaction_type
    }

    pub fn desired_return_date(&self) -> Option<NaiveDate> {
        self.desired_return_date
    }

    pub fn purpose(&self) -> Option<&str> {
        self.purpose.as_deref()
    }

    pub fn confirmed(&self) -> &[ConfirmedEntry] {
        &self.confirmed
    }

    pub fn pending(&self) -> Option<&PendingEntry> {
        self.pending.as_ref()
    }

    // =========================================================================
    // Visit Details
    // =========================================================================

    pub fn set_transaction_type(&mut self, kind: TransactionType) -> CoreResult<()> {
        self.require_active("set transaction type")?;
        self.transaction_type = Some(kind);
        Ok(())
    }

    /// Sets the borrow due date. Dates before `today` are rejected.
    pub fn set_desired_return_date(&mut self, date: NaiveDate, today: NaiveDate) -> CoreResult<()> {
        self.require_active("set return date")?;
        validation::validate_return_date(date, today)?;
        self.desired_return_date = Some(date);
        Ok(())
    }

    pub fn set_purpose(&mut self, purpose: Option<String>) -> CoreResult<()> {
        self.require_active("set purpose")?;
        self.purpose = purpose
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        Ok(())
    }

    // =========================================================================
    // Pending Entry
    // =========================================================================

    /// Opens the pending entry for a fresh capture.
    pub fn start_pending(
        &mut self,
        transaction_id: TransactionId,
        image_ref: ImageRef,
        captured_at: DateTime<Utc>,
        weight: i64,
    ) -> CoreResult<()> {
        self.require_active("start a capture")?;
        if let Some(existing) = &self.pending {
            return Err(CoreError::PendingEntryExists {
                transaction_id: existing.transaction_id.to_string(),
            });
        }

        self.pending = Some(PendingEntry::new(
            transaction_id,
            image_ref,
            captured_at,
            weight,
        ));
        Ok(())
    }

    /// Fills the pending entry from a classifier reply.
    ///
    /// Returns [`CoreError::StaleResult`] when `transaction_id` is not the
    /// current pending entry; the session is untouched in that case.
    pub fn apply_identification(
        &mut self,
        transaction_id: &TransactionId,
        identification: &Identification,
    ) -> CoreResult<&PendingEntry> {
        match self.pending.as_mut() {
            Some(pending) if &pending.transaction_id == transaction_id => {
                pending.tool_label = Some(identification.prediction.clone());
                pending.confidence = Some(identification.score);
                pending.remote_image = identification.image_filename.clone();
                Ok(pending)
            }
            _ => Err(CoreError::StaleResult {
                transaction_id: transaction_id.to_string(),
            }),
        }
    }

    /// Accepts the pending capture as `tool_label`.
    ///
    /// The classification counts as correct when the label matches what the
    /// classifier predicted.
    pub fn confirm(&mut self, tool_label: &str) -> CoreResult<&ConfirmedEntry> {
        let label = validation::validate_tool_label(tool_label)?;
        let pending = self.take_pending("confirm")?;
        let correct = pending.tool_label.as_deref().map(|p| p == label);
        Ok(self.push_confirmed(pending, label, correct))
    }

    /// Accepts the pending capture with a label picked from the manual list.
    ///
    /// Choosing manually means the prediction was rejected (or never came),
    /// so the classification is recorded as incorrect.
    pub fn confirm_manual(&mut self, tool_label: &str) -> CoreResult<&ConfirmedEntry> {
        let label = validation::validate_tool_label(tool_label)?;
        let pending = self.take_pending("confirm")?;
        Ok(self.push_confirmed(pending, label, Some(false)))
    }

    /// Discards the pending capture without confirming it.
    pub fn cancel_pending(&mut self) -> CoreResult<PendingEntry> {
        self.pending
            .take()
            .ok_or(CoreError::NoPendingEntry { operation: "cancel" })
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Builds the ordered batch for the storage gateway.
    ///
    /// Requires a user, a transaction type, at least one confirmed entry and
    /// no open capture. Borrows also need a return date.
    pub fn commit_rows(&self) -> CoreResult<Vec<CommitRow>> {
        let user_id = self
            .user_id
            .as_deref()
            .ok_or(CoreError::SessionNotStarted { operation: "submit" })?;

        let kind = self.transaction_type.ok_or(ValidationError::Required {
            field: "transaction_type".to_string(),
        })?;

        if let Some(pending) = &self.pending {
            return Err(CoreError::PendingEntryExists {
                transaction_id: pending.transaction_id.to_string(),
            });
        }

        if self.confirmed.is_empty() {
            return Err(CoreError::NothingToSubmit);
        }

        let due = match kind {
            TransactionType::Borrow => Some(self.desired_return_date.ok_or(
                ValidationError::Required {
                    field: "desired_return_date".to_string(),
                },
            )?),
            TransactionType::Return => None,
        };

        Ok(self
            .confirmed
            .iter()
            .map(|entry| CommitRow::from_entry(entry, user_id, kind, due, self.purpose.as_deref()))
            .collect())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_active(&self, operation: &'static str) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::SessionNotStarted { operation })
        }
    }

    fn take_pending(&mut self, operation: &'static str) -> CoreResult<PendingEntry> {
        self.pending
            .take()
            .ok_or(CoreError::NoPendingEntry { operation })
    }

    fn push_confirmed(
        &mut self,
        pending: PendingEntry,
        label: String,
        correct: Option<bool>,
    ) -> &ConfirmedEntry {
        self.confirmed
            .push(ConfirmedEntry::from_pending(pending, label, correct));
        // Just pushed, so the list is non-empty
        &self.confirmed[self.confirmed.len() - 1]
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionIdGenerator;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn ident(label: &str, score: f64) -> Identification {
        Identification {
            prediction: label.to_string(),
            score,
            all_probabilities: BTreeMap::new(),
            image_filename: None,
        }
    }

    fn active_session() -> Session {
        let mut s = Session::new();
        s.begin("30012345");
        s.set_transaction_type(TransactionType::Borrow).unwrap();
        s
    }

    fn capture(s: &mut Session, gen: &mut TransactionIdGenerator) -> TransactionId {
        let tx = gen.next(now());
        s.start_pending(tx.clone(), ImageRef::new(format!("temp/{tx}.jpg")), now(), 1250)
            .unwrap();
        tx
    }

    #[test]
    fn test_second_pending_is_rejected_and_first_kept() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        let first = capture(&mut s, &mut gen);

        let err = s
            .start_pending(gen.next(now()), ImageRef::new("other.jpg"), now(), 900)
            .unwrap_err();
        assert!(matches!(err, CoreError::PendingEntryExists { .. }));
        assert_eq!(s.pending().unwrap().transaction_id, first);
        assert_eq!(s.pending().unwrap().weight, 1250);
    }

    #[test]
    fn test_confirm_moves_pending_into_list() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        let tx = capture(&mut s, &mut gen);
        assert!(!s.pending().unwrap().is_identified());
        s.apply_identification(&tx, &ident("Hammer", 0.93)).unwrap();
        assert!(s.pending().unwrap().is_identified());

        let entry = s.confirm("Hammer").unwrap();
        assert_eq!(entry.tool_label(), "Hammer");
        assert_eq!(entry.predicted_label(), Some("Hammer"));
        assert_eq!(entry.classification_correct(), Some(true));

        assert!(s.pending().is_none());
        assert_eq!(s.confirmed().len(), 1);
    }

    #[test]
    fn test_confirm_with_other_label_marks_incorrect() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        let tx = capture(&mut s, &mut gen);
        s.apply_identification(&tx, &ident("Hammer", 0.4)).unwrap();

        let entry = s.confirm("Mallet").unwrap();
        assert_eq!(entry.classification_correct(), Some(false));
    }

    #[test]
    fn test_confirm_without_pending_is_noop() {
        let mut s = active_session();
        let before = s.confirmed().len();
        let err = s.confirm("Hammer").unwrap_err();
        assert_eq!(err, CoreError::NoPendingEntry { operation: "confirm" });
        assert_eq!(s.confirmed().len(), before);
    }

    #[test]
    fn test_stale_identification_never_mutates() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        let first = capture(&mut s, &mut gen);
        s.confirm_manual("Pliers").unwrap();
        let second = capture(&mut s, &mut gen);

        // Late reply for the already-confirmed capture
        let err = s.apply_identification(&first, &ident("Hammer", 0.99)).unwrap_err();
        assert!(matches!(err, CoreError::StaleResult { .. }));

        let pending = s.pending().unwrap();
        assert_eq!(pending.transaction_id, second);
        assert!(pending.tool_label.is_none());
        assert_eq!(s.confirmed()[0].tool_label(), "Pliers");
        assert_eq!(s.confirmed()[0].predicted_label(), None);
    }

    #[test]
    fn test_cancel_pending_discards() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        let tx = capture(&mut s, &mut gen);

        let dropped = s.cancel_pending().unwrap();
        assert_eq!(dropped.transaction_id, tx);
        assert!(s.pending().is_none());
        assert!(s.confirmed().is_empty());
        assert!(s.cancel_pending().is_err());
    }

    #[test]
    fn test_manual_confirm_after_failed_identification_keeps_image() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        let tx = capture(&mut s, &mut gen);
        let image = s.pending().unwrap().image_ref.clone();

        let entry = s.confirm_manual("Tape Measure").unwrap();
        assert_eq!(entry.image_ref(), &image);
        assert_eq!(entry.transaction_id(), &tx);
        assert_eq!(entry.classification_correct(), Some(false));
    }

    #[test]
    fn test_pending_count_never_exceeds_one() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();

        for step in 0..30 {
            match step % 4 {
                0 | 1 => {
                    let _ = s.start_pending(gen.next(now()), ImageRef::new("x.jpg"), now(), 1);
                }
                2 => {
                    let _ = s.confirm("Hammer");
                }
                _ => {
                    let _ = s.cancel_pending();
                }
            }
            assert!(s.pending().iter().count() <= 1);
        }
    }

    #[test]
    fn test_commit_rows_in_capture_order() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        s.set_desired_return_date(today() + Duration::days(7), today())
            .unwrap();
        s.set_purpose(Some("  capstone  ".to_string())).unwrap();

        capture(&mut s, &mut gen);
        s.confirm("Hammer").unwrap();
        capture(&mut s, &mut gen);
        s.confirm("Wrench").unwrap();

        let rows = s.commit_rows().unwrap();
        let labels: Vec<_> = rows.iter().map(|r| r.tool_label.as_str()).collect();
        assert_eq!(labels, vec!["Hammer", "Wrench"]);
        assert_eq!(rows[0].user_id, "30012345");
        assert_eq!(rows[0].quantity, 1);
        assert_eq!(rows[0].purpose.as_deref(), Some("capstone"));
        assert_eq!(rows[1].desired_return_date, Some(today() + Duration::days(7)));
    }

    #[test]
    fn test_server_image_name_reaches_commit_row() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        s.set_desired_return_date(today() + Duration::days(1), today())
            .unwrap();

        let tx = capture(&mut s, &mut gen);
        let reply = Identification {
            image_filename: Some("9f2c41.jpg".to_string()),
            ..ident("Hammer", 0.8)
        };
        s.apply_identification(&tx, &reply).unwrap();
        s.confirm("Hammer").unwrap();

        // Never identified, so no server copy
        capture(&mut s, &mut gen);
        s.confirm_manual("Wrench").unwrap();

        let rows = s.commit_rows().unwrap();
        assert_eq!(rows[0].remote_image.as_deref(), Some("9f2c41.jpg"));
        assert_eq!(rows[0].image_ref.as_str(), format!("temp/{tx}.jpg"));
        assert_eq!(rows[1].remote_image, None);
    }

    #[test]
    fn test_commit_rows_requirements() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        assert_eq!(s.commit_rows().unwrap_err(), CoreError::NothingToSubmit);

        capture(&mut s, &mut gen);
        assert!(matches!(
            s.commit_rows().unwrap_err(),
            CoreError::PendingEntryExists { .. }
        ));

        s.confirm("Hammer").unwrap();
        // Borrow without a due date
        assert!(matches!(
            s.commit_rows().unwrap_err(),
            CoreError::Validation(ValidationError::Required { .. })
        ));

        // Returns do not need one
        s.set_transaction_type(TransactionType::Return).unwrap();
        let rows = s.commit_rows().unwrap();
        assert_eq!(rows[0].desired_return_date, None);
        assert_eq!(rows[0].kind, TransactionType::Return);
    }

    #[test]
    fn test_past_return_date_rejected() {
        let mut s = active_session();
        let err = s
            .set_desired_return_date(today() - Duration::days(1), today())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::DateInPast { .. })
        ));
        assert!(s.desired_return_date().is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut gen = TransactionIdGenerator::new();
        let mut s = active_session();
        s.set_desired_return_date(today(), today()).unwrap();
        capture(&mut s, &mut gen);
        s.confirm("Hammer").unwrap();
        capture(&mut s, &mut gen);

        s.reset();
        assert!(!s.is_active());
        assert!(s.transaction_type().is_none());
        assert!(s.confirmed().is_empty());
        assert!(s.pending().is_none());
        assert!(s.desired_return_date().is_none());
    }

    #[test]
    fn test_operations_need_a_user() {
        let mut s = Session::new();
        assert!(matches!(
            s.start_pending(TransactionIdGenerator::new().next(now()), ImageRef::new("a"), now(), 1),
            Err(CoreError::SessionNotStarted { .. })
        ));
        assert!(s.set_transaction_type(TransactionType::Return).is_err());
    }
}
