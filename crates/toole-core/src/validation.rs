//! # Validation Rules
//!
//! Small pure checks shared by the session and the user-validation
//! boundary.
//!
//! ## Waiver Window
//! ```text
//! today - 365d                                today
//!      │◄──────────── waiver valid ─────────────►│
//! ─────┼─────────────────────────────────────────┼────►
//!      ▲ renewed exactly 365 days ago: still valid
//! ```

use chrono::{Duration, NaiveDate};

use crate::error::ValidationError;
use crate::WAIVER_VALID_DAYS;

// =============================================================================
// User Identifiers
// =============================================================================

/// What the user presented at the welcome screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdentifier {
    /// Typed student/staff number (all digits).
    Ucid(String),
    /// Scanned card barcode (anything else).
    Barcode(String),
}

impl UserIdentifier {
    pub fn as_str(&self) -> &str {
        match self {
            UserIdentifier::Ucid(s) | UserIdentifier::Barcode(s) => s,
        }
    }
}

/// Classifies a raw identifier: all digits is a UCID, anything else a barcode.
pub fn classify_identifier(raw: &str) -> Result<UserIdentifier, ValidationError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(ValidationError::Required {
            field: "identifier".to_string(),
        });
    }

    if id.chars().all(|c| c.is_ascii_digit()) {
        Ok(UserIdentifier::Ucid(id.to_string()))
    } else {
        Ok(UserIdentifier::Barcode(id.to_string()))
    }
}

// =============================================================================
// Waiver
// =============================================================================

/// True when the waiver was renewed within the last 365 days.
///
/// A user with no renewal date on record has no valid waiver.
pub fn waiver_is_valid(last_renewed: Option<NaiveDate>, today: NaiveDate) -> bool {
    match last_renewed {
        Some(renewed) => renewed >= today - Duration::days(WAIVER_VALID_DAYS),
        None => false,
    }
}

// =============================================================================
// Entry Fields
// =============================================================================

/// Trims a tool label and rejects empty ones.
pub fn validate_tool_label(label: &str) -> Result<String, ValidationError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(ValidationError::Required {
            field: "tool_label".to_string(),
        });
    }
    Ok(label.to_string())
}

/// Return dates may be today or later.
pub fn validate_return_date(date: NaiveDate, today: NaiveDate) -> Result<(), ValidationError> {
    if date < today {
        return Err(ValidationError::DateInPast {
            field: "desired_return_date".to_string(),
        });
    }
    Ok(())
}

pub fn validate_quantity(quantity: i64) -> Result<(), ValidationError> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
