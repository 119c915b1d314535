//! # Identification Client
//!
//! Boundary to the remote tool classifier.
//!
//! ```text
//! POST /identify_tool   multipart: file=capture.jpg (image/jpeg)
//!   200 {"prediction": "Hammer", "score": 0.93,
//!        "all_probabilities": {...}, "image_filename": "..."}
//!   5xx {"detail": "Prediction failed: ..."}
//! ```
//!
//! An `"unknown"` prediction is a valid answer, not an error. Score
//! thresholds are left to the UI.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use toole_core::Identification;

use crate::error::{IdentificationError, StationResult};
use crate::http;

/// Classifies one captured frame.
#[async_trait]
pub trait IdentificationClient: Send + Sync {
    async fn identify(&self, image: Vec<u8>) -> Result<Identification, IdentificationError>;
}

/// HTTP adapter for the makerspace classifier service.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    url: url::Url,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(url: &str, timeout: Duration) -> StationResult<Self> {
        Ok(HttpClassifier {
            client: http::client(timeout)?,
            url: url::Url::parse(url)?,
            timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> IdentificationError {
        if err.is_timeout() {
            IdentificationError::Timeout(self.timeout.as_secs())
        } else if err.is_decode() {
            IdentificationError::BadResponse(err.to_string())
        } else {
            IdentificationError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl IdentificationClient for HttpClassifier {
    async fn identify(&self, image: Vec<u8>) -> Result<Identification, IdentificationError> {
        debug!(bytes = image.len(), url = %self.url, "Uploading capture for identification");

        let part = Part::bytes(image)
            .file_name("capture.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| IdentificationError::BadResponse(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = http::error_detail(&body);
            warn!(status = status.as_u16(), %message, "Classifier rejected capture");
            return Err(IdentificationError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let identification: Identification =
            response.json().await.map_err(|e| self.map_error(e))?;
        debug!(
            prediction = %identification.prediction,
            score = identification.score,
            "Classifier answered"
        );
        Ok(identification)
    }
}
