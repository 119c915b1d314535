//! Shared plumbing for the HTTP adapters.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{StationError, StationResult};

/// Builds a client whose every request is bounded by `timeout`.
pub(crate) fn client(timeout: Duration) -> StationResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| StationError::InvalidConfig(format!("HTTP client: {}", e)))
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// The server reports failures as `{"detail": "..."}`; anything else is
/// passed through as text.
pub(crate) fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.detail,
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail() {
        assert_eq!(
            error_detail(r#"{"detail":"Failed to process item 2: boom"}"#),
            "Failed to process item 2: boom"
        );
        assert_eq!(error_detail(" Bad Gateway \n"), "Bad Gateway");
    }
}
