//! # Kiosk Events
//!
//! What the kiosk tells whatever is drawing the screens. The loop emits an
//! event after every state change a user would notice.

use serde::Serialize;
use tokio::sync::mpsc;

use toole_core::{Identification, TransactionId};

/// A user-visible change in kiosk state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KioskEvent {
    /// A validated user is at the kiosk.
    SessionStarted { user_id: String, display_name: String },

    /// The scanned card or typed UCID was refused.
    UserRejected { reason: String },

    /// A capture was taken; the feed is suspended until identification ends.
    ProcessingStarted { transaction_id: TransactionId },

    /// Identification for this capture has ended, one way or the other.
    ProcessingFinished { transaction_id: TransactionId },

    IdentificationReady {
        transaction_id: TransactionId,
        identification: Identification,
    },

    /// The classifier could not answer. The capture is kept for retry or
    /// manual selection.
    IdentificationFailed {
        transaction_id: TransactionId,
        message: String,
    },

    /// No frame could be grabbed; nothing was recorded for this placement.
    CaptureFailed { message: String },

    /// A capture was accepted into the session.
    EntryConfirmed {
        transaction_id: TransactionId,
        tool_label: String,
    },

    /// The pending capture was discarded.
    EntryRejected { transaction_id: TransactionId },

    SubmitStarted { entries: usize },

    SubmitSucceeded { committed: usize },

    /// Nothing was stored; every confirmed entry is still in the session.
    SubmitFailed {
        failure_index: Option<usize>,
        message: String,
    },

    /// Back to the welcome screen.
    SessionReset,
}

/// Receives kiosk events. Implementations must not block.
pub trait KioskEventEmitter: Send + Sync {
    fn emit(&self, event: &KioskEvent);
}

/// No-op event emitter for headless runs and tests.
pub struct NoOpEmitter;

impl KioskEventEmitter for NoOpEmitter {
    fn emit(&self, _event: &KioskEvent) {}
}

/// Forwards events onto a channel, for a UI task or a test to consume.
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<KioskEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<KioskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelEmitter { tx }, rx)
    }
}

impl KioskEventEmitter for ChannelEmitter {
    fn emit(&self, event: &KioskEvent) {
        // A closed receiver just means nobody is watching any more
        let _ = self.tx.send(event.clone());
    }
}
