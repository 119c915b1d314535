//! # User Validation
//!
//! Gates session creation. The kiosk only needs a pass/fail answer plus the
//! user ID to stamp on every row.
//!
//! ## Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  identifier (card scan or typed UCID)                                  │
//! │        │ classify_identifier: all digits → UCID, else → barcode        │
//! │        ▼                                                                │
//! │  ┌──────────────────────┐        ┌──────────────────────────────────┐  │
//! │  │ HttpUserValidator    │   or   │ DirectoryValidator               │  │
//! │  │ POST /validate_user  │        │ users table + 365-day waiver     │  │
//! │  └──────────┬───────────┘        └────────────────┬─────────────────┘  │
//! │             └──────────────┬──────────────────────┘                    │
//! │                            ▼                                            │
//! │        Granted { user_id, display_name }  |  Denied { reason }         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Denied` is a normal answer (unknown user, expired waiver). An `Err`
//! means the question could not be answered at all.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use toole_core::validation::{waiver_is_valid, UserIdentifier};
use toole_db::UserRepository;

use crate::error::{StationError, StationResult};
use crate::http;

/// Answer to "may this person use the kiosk?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Granted { user_id: String, display_name: String },
    Denied { reason: String },
}

impl ValidationOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, ValidationOutcome::Granted { .. })
    }
}

#[async_trait]
pub trait UserValidator: Send + Sync {
    async fn validate(&self, identifier: &UserIdentifier) -> StationResult<ValidationOutcome>;
}

// =============================================================================
// HTTP Validator
// =============================================================================

#[derive(Debug, Serialize)]
struct ValidateUserRequest<'a> {
    #[serde(rename = "UCID")]
    ucid: Option<i64>,
    barcode: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ValidateUserReply {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user: Option<UserDetails>,
}

#[derive(Debug, Deserialize)]
struct UserDetails {
    first_name: String,
    ucid: i64,
}

/// Asks the makerspace server, which owns the waiver records.
#[derive(Debug, Clone)]
pub struct HttpUserValidator {
    client: reqwest::Client,
    url: url::Url,
    timeout: Duration,
}

impl HttpUserValidator {
    pub fn new(url: &str, timeout: Duration) -> StationResult<Self> {
        Ok(HttpUserValidator {
            client: http::client(timeout)?,
            url: url::Url::parse(url)?,
            timeout,
        })
    }
}

#[async_trait]
impl UserValidator for HttpUserValidator {
    async fn validate(&self, identifier: &UserIdentifier) -> StationResult<ValidationOutcome> {
        let request = match identifier {
            UserIdentifier::Ucid(ucid) => ValidateUserRequest {
                ucid: Some(ucid.parse().map_err(|_| {
                    StationError::Validation(format!("UCID out of range: {}", ucid))
                })?),
                barcode: None,
            },
            UserIdentifier::Barcode(barcode) => ValidateUserRequest {
                ucid: None,
                barcode: Some(barcode.trim_end_matches(';')),
            },
        };
        debug!(identifier = identifier.as_str(), "Validating user with server");

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StationError::Validation(format!(
                        "Server request timed out after {} seconds",
                        self.timeout.as_secs()
                    ))
                } else {
                    StationError::Validation(format!("Could not connect to server: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(ValidationOutcome::Denied {
                reason: "User not found in database".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StationError::Validation(format!(
                "HTTP {}: {}",
                status.as_u16(),
                http::error_detail(&body)
            )));
        }

        let reply: ValidateUserReply = response
            .json()
            .await
            .map_err(|e| StationError::Validation(format!("Unreadable reply: {}", e)))?;

        let message = reply.message.unwrap_or_default();
        if !reply.success {
            info!(identifier = identifier.as_str(), reason = %message, "User denied by server");
            return Ok(ValidationOutcome::Denied { reason: message });
        }

        let (user_id, display_name) = match reply.user {
            Some(user) => (user.ucid.to_string(), user.first_name),
            None => {
                if matches!(identifier, UserIdentifier::Barcode(_)) {
                    warn!("Server granted a card scan without user details; recording the barcode");
                }
                (identifier.as_str().trim_end_matches(';').to_string(), message)
            }
        };

        Ok(ValidationOutcome::Granted {
            user_id,
            display_name,
        })
    }
}

// =============================================================================
// Directory Validator
// =============================================================================

/// Answers from the kiosk's own `users` table.
#[derive(Debug, Clone)]
pub struct DirectoryValidator {
    users: UserRepository,
}

impl DirectoryValidator {
    pub fn new(users: UserRepository) -> Self {
        DirectoryValidator { users }
    }
}

#[async_trait]
impl UserValidator for DirectoryValidator {
    async fn validate(&self, identifier: &UserIdentifier) -> StationResult<ValidationOutcome> {
        let user = match self.users.find_by_identifier(identifier).await? {
            Some(user) => user,
            None => {
                return Ok(ValidationOutcome::Denied {
                    reason: "User not found in database".to_string(),
                })
            }
        };

        let today = chrono::Local::now().date_naive();
        if !waiver_is_valid(user.last_renewed, today) {
            info!(user_id = %user.user_id, "Waiver expired");
            return Ok(ValidationOutcome::Denied {
                reason: "Waiver is expired, please renew".to_string(),
            });
        }

        Ok(ValidationOutcome::Granted {
            user_id: user.user_id,
            display_name: user.first_name,
        })
    }
}
