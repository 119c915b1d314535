//! # Batch Submission
//!
//! Commits a session's confirmed entries as one unit.
//!
//! ## Submit Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  submit(session)                                                       │
//! │     rows = session.commit_rows()     (rejects open capture, no type,   │
//! │     │                                 no entries, borrow w/o due date) │
//! │     ▼                                                                   │
//! │  worker:                                                               │
//! │     for row: relocate image temp → Yes|No/<tool>/   (best effort,      │
//! │              skipped when the gateway archives server-side copies)     │
//! │     timeout(gateway.commit_batch(rows))                                │
//! │     send Submitted { result, relocated }                               │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  on_complete(report, session)   (back on the loop)                     │
//! │     success  ─► session.reset()              Committed(n)              │
//! │     rejected ─► entries untouched            Rejected(failure_index)   │
//! │     error    ─► entries untouched            Failed(err)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Image moves are remembered across attempts so a retried batch points at
//! the files where they now are.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use toole_core::{BatchResult, CommitRow, ImageRef, Session, TransactionId, TransactionType};
use toole_db::TransactionRepository;

use crate::error::{StationError, StationResult, SubmissionError};
use crate::http;
use crate::images::ImageStore;
use crate::worker::{SubmitReport, WorkerMessage};

// =============================================================================
// Storage Gateway
// =============================================================================

/// Atomic multi-row insert. All rows land or none do.
///
/// A row the storage side refuses comes back as `Ok` with
/// `failure_index` set; `Err` means no definite answer was obtained.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn commit_batch(&self, rows: &[CommitRow]) -> Result<BatchResult, SubmissionError>;

    /// True when storage files each row's `remote_image` itself. Local
    /// captures then stay in temp until `cleanup_temp` ages them out.
    fn archives_remote_images(&self) -> bool {
        false
    }
}

/// Commits into the kiosk's own SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    transactions: TransactionRepository,
}

impl SqliteGateway {
    pub fn new(transactions: TransactionRepository) -> Self {
        SqliteGateway { transactions }
    }
}

#[async_trait]
impl StorageGateway for SqliteGateway {
    async fn commit_batch(&self, rows: &[CommitRow]) -> Result<BatchResult, SubmissionError> {
        Ok(self.transactions.insert_batch(rows).await?)
    }
}

// =============================================================================
// HTTP Gateway
// =============================================================================

/// Server tool catalog entry (`GET /tools`).
#[derive(Debug, Deserialize)]
struct CatalogTool {
    id: i64,
    name: String,
}

/// One item of `POST /transactions/batch`.
#[derive(Debug, Serialize)]
struct TransactionInput<'a> {
    user_id: Option<i64>,
    tool_id: i64,
    desired_return_date: Option<String>,
    return_timestamp: Option<String>,
    quantity: i64,
    purpose: Option<&'a str>,
    image_path: Option<&'a str>,
    classification_correct: Option<bool>,
    weight: i64,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    transactions: Vec<TransactionInput<'a>>,
}

/// Commits through the makerspace server.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    batch_url: url::Url,
    tools_url: url::Url,
}

impl HttpGateway {
    pub fn new(batch_url: &str, tools_url: &str, timeout: Duration) -> StationResult<Self> {
        Ok(HttpGateway {
            client: http::client(timeout)?,
            batch_url: url::Url::parse(batch_url)?,
            tools_url: url::Url::parse(tools_url)?,
        })
    }

    /// Lower-cased tool name to server tool ID.
    async fn catalog(&self) -> Result<HashMap<String, i64>, SubmissionError> {
        let tools: Vec<CatalogTool> = self
            .client
            .get(self.tools_url.clone())
            .send()
            .await
            .map_err(network_error)?
            .error_for_status()
            .map_err(|e| SubmissionError::Catalog(e.to_string()))?
            .json()
            .await
            .map_err(|e| SubmissionError::Catalog(e.to_string()))?;

        Ok(tools
            .into_iter()
            .map(|t| (t.name.trim().to_lowercase(), t.id))
            .collect())
    }
}

#[async_trait]
impl StorageGateway for HttpGateway {
    async fn commit_batch(&self, rows: &[CommitRow]) -> Result<BatchResult, SubmissionError> {
        let catalog = self.catalog().await?;

        let mut items = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let tool_id = match catalog.get(&row.tool_label.trim().to_lowercase()) {
                Some(id) => *id,
                None => {
                    let index = i + 1;
                    return Ok(BatchResult::failed(
                        index,
                        format!("Failed to process item {}: unknown tool '{}'", index, row.tool_label),
                    ));
                }
            };

            if row.remote_image.is_none() {
                debug!(transaction_id = %row.transaction_id, "No server copy of the capture to archive");
            }

            let user_id = row.user_id.parse::<i64>().ok();
            if user_id.is_none() {
                warn!(user_id = %row.user_id, "Non-numeric user ID sent as null");
            }

            items.push(TransactionInput {
                user_id,
                tool_id,
                desired_return_date: row.desired_return_date.map(|d| d.to_string()),
                return_timestamp: match row.kind {
                    TransactionType::Return => Some(row.captured_at.to_rfc3339()),
                    TransactionType::Borrow => None,
                },
                quantity: row.quantity,
                purpose: row.purpose.as_deref(),
                image_path: row.remote_image.as_deref(),
                classification_correct: row.classification_correct,
                weight: row.weight,
            });
        }

        let response = self
            .client
            .post(self.batch_url.clone())
            .json(&BatchRequest { transactions: items })
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(BatchResult::committed(rows.len()));
        }

        let body = response.text().await.unwrap_or_default();
        let detail = http::error_detail(&body);
        match failure_index(&detail) {
            Some(index) => Ok(BatchResult::failed(index, detail)),
            None => Err(SubmissionError::Storage(format!(
                "HTTP {}: {}",
                status.as_u16(),
                detail
            ))),
        }
    }

    fn archives_remote_images(&self) -> bool {
        true
    }
}

fn network_error(err: reqwest::Error) -> SubmissionError {
    if err.is_decode() {
        SubmissionError::BadResponse(err.to_string())
    } else {
        SubmissionError::Network(err.to_string())
    }
}

/// Reads N out of `"Failed to process item N: ..."`.
pub fn failure_index(detail: &str) -> Option<usize> {
    const MARKER: &str = "Failed to process item ";
    let start = detail.find(MARKER)? + MARKER.len();
    let digits: String = detail[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().filter(|n| *n > 0)
}

// =============================================================================
// Batch Submitter
// =============================================================================

/// How a submission ended, as seen by the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Everything stored; the session was reset.
    Committed(usize),
    /// Storage refused a row; nothing stored, entries kept.
    Rejected(BatchResult),
    /// No definite answer; nothing assumed stored, entries kept.
    Failed(SubmissionError),
}

/// Runs submissions off the loop, one at a time.
pub struct BatchSubmitter {
    gateway: Arc<dyn StorageGateway>,
    images: ImageStore,
    timeout: Duration,
    worker_tx: mpsc::Sender<WorkerMessage>,
    in_flight: bool,
    relocated: HashMap<TransactionId, ImageRef>,
}

impl BatchSubmitter {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        images: ImageStore,
        timeout: Duration,
        worker_tx: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        BatchSubmitter {
            gateway,
            images,
            timeout,
            worker_tx,
            in_flight: false,
            relocated: HashMap::new(),
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight
    }

    /// Starts a submission of the session's confirmed entries. Returns the
    /// number of rows sent.
    pub fn submit(&mut self, session: &Session) -> StationResult<usize> {
        if self.in_flight {
            return Err(StationError::SubmitInProgress);
        }
        let rows = session.commit_rows()?;
        let count = rows.len();

        info!(
            user_id = session.user_id().unwrap_or_default(),
            rows = count,
            "Submitting batch"
        );
        self.in_flight = true;

        let gateway = self.gateway.clone();
        let relocate = !gateway.archives_remote_images();
        let images = self.images.clone();
        let already_moved = self.relocated.clone();
        let worker_tx = self.worker_tx.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let (rows, relocated) = if relocate {
                relocate_images(&images, rows, &already_moved).await
            } else {
                (rows, Vec::new())
            };

            let result = match tokio::time::timeout(timeout, gateway.commit_batch(&rows)).await {
                Ok(result) => result,
                Err(_) => Err(SubmissionError::Timeout(timeout.as_secs())),
            };

            let moved_any = !relocated.is_empty() || !already_moved.is_empty();
            let committed = matches!(&result, Ok(r) if r.is_success());
            if moved_any && !committed {
                warn!(
                    moved = relocated.len() + already_moved.len(),
                    "Images relocated but batch not stored"
                );
            }

            let report = SubmitReport { result, relocated };
            if worker_tx.send(WorkerMessage::Submitted(report)).await.is_err() {
                debug!("Kiosk loop gone, dropping submission result");
            }
        });

        Ok(count)
    }

    /// Applies a finished submission to the session.
    pub fn on_complete(&mut self, report: SubmitReport, session: &mut Session) -> SubmitOutcome {
        self.in_flight = false;
        self.relocated.extend(report.relocated);

        match report.result {
            Ok(result) if result.is_success() => {
                info!(committed = result.committed_count, "Batch committed");
                session.reset();
                self.relocated.clear();
                SubmitOutcome::Committed(result.committed_count)
            }
            Ok(result) => {
                warn!(
                    failure_index = ?result.failure_index,
                    detail = result.error_detail.as_deref().unwrap_or_default(),
                    "Batch rejected, entries kept for retry"
                );
                SubmitOutcome::Rejected(result)
            }
            Err(e) => {
                warn!(error = %e, "Batch submission failed, entries kept for retry");
                SubmitOutcome::Failed(e)
            }
        }
    }

    /// Forgets image moves from an abandoned session.
    pub fn reset(&mut self) {
        self.relocated.clear();
    }
}

/// Moves each row's image out of temp, reusing moves from earlier attempts.
async fn relocate_images(
    images: &ImageStore,
    mut rows: Vec<CommitRow>,
    already_moved: &HashMap<TransactionId, ImageRef>,
) -> (Vec<CommitRow>, Vec<(TransactionId, ImageRef)>) {
    let now = Utc::now();
    let mut relocated = Vec::new();

    for row in rows.iter_mut() {
        if let Some(moved) = already_moved.get(&row.transaction_id) {
            row.image_ref = moved.clone();
            continue;
        }

        match images
            .relocate(&row.image_ref, &row.tool_label, row.classification_correct, now)
            .await
        {
            Ok(Some(moved)) => {
                relocated.push((row.transaction_id.clone(), moved.clone()));
                row.image_ref = moved;
            }
            Ok(None) => {}
            Err(e) => warn!(
                transaction_id = %row.transaction_id,
                error = %e,
                "Image relocation failed, committing temp path"
            ),
        }
    }

    (rows, relocated)
}
