//! # Transaction Repository
//!
//! Writes a session's confirmed tools as one atomic batch.
//!
//! ## Batch Commit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        insert_batch(rows)                               │
//! │                                                                         │
//! │  BEGIN                                                                 │
//! │    for (i, row) in rows:                                               │
//! │      1. resolve tool_label → tool_id       (unknown → fail at i+1)     │
//! │      2. borrow: available_quantity -= qty  (none left → fail at i+1)   │
//! │         return: available_quantity += qty  (capped at total)           │
//! │      3. INSERT INTO transactions           (duplicate ref → fail)      │
//! │  COMMIT ──────────────► BatchResult { committed_count: n }             │
//! │                                                                         │
//! │  any failure: ROLLBACK ► BatchResult { failure_index: i+1, detail }    │
//! │               nothing from the batch is visible to later reads         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A row failure is a normal outcome ([`BatchResult`]); only problems with
//! the transaction itself (begin/commit/pool) come back as [`DbError`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use toole_core::validation::validate_quantity;
use toole_core::{BatchResult, CommitRow, TransactionType};

use crate::error::{DbError, DbResult};

/// A persisted transaction joined with its tool name.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    pub transaction_ref: String,
    pub user_id: String,
    pub tool_id: i64,
    pub tool_name: String,
    pub kind: String,
    pub captured_at: DateTime<Utc>,
    pub desired_return_date: Option<NaiveDate>,
    pub return_timestamp: Option<DateTime<Utc>>,
    pub quantity: i64,
    pub purpose: Option<String>,
    pub image_path: Option<String>,
    pub classification_correct: Option<bool>,
    pub weight: i64,
}

/// Repository for transaction rows.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Inserts every row or none of them.
    pub async fn insert_batch(&self, rows: &[CommitRow]) -> DbResult<BatchResult> {
        debug!(rows = rows.len(), "Inserting transaction batch");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        for (i, row) in rows.iter().enumerate() {
            if let Err(e) = insert_row(&mut tx, row).await {
                let index = i + 1;
                warn!(
                    index,
                    transaction_id = %row.transaction_id,
                    error = %e,
                    "Batch row rejected, rolling back"
                );
                tx.rollback()
                    .await
                    .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
                return Ok(BatchResult::failed(
                    index,
                    format!("Failed to process item {}: {}", index, e),
                ));
            }
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(count = rows.len(), "Transaction batch committed");
        Ok(BatchResult::committed(rows.len()))
    }

    /// A user's history, oldest first.
    pub async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<TransactionRecord>> {
        let records = sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT t.id, t.transaction_ref, t.user_id, t.tool_id, tl.tool_name,
                   t.kind, t.captured_at, t.desired_return_date, t.return_timestamp,
                   t.quantity, t.purpose, t.image_path, t.classification_correct, t.weight
            FROM transactions t
            JOIN tools tl ON tl.tool_id = t.tool_id
            WHERE t.user_id = ?1
            ORDER BY t.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Total number of transaction rows.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Applies one row inside the open batch transaction.
async fn insert_row(conn: &mut SqliteConnection, row: &CommitRow) -> DbResult<()> {
    validate_quantity(row.quantity).map_err(|e| DbError::ConstraintViolation(e.to_string()))?;

    let tool: Option<(i64, i64, i64)> = sqlx::query_as(
        "SELECT tool_id, available_quantity, total_quantity FROM tools WHERE tool_name = ?1 COLLATE NOCASE",
    )
    .bind(row.tool_label.trim())
    .fetch_optional(&mut *conn)
    .await?;

    let (tool_id, available, total) =
        tool.ok_or_else(|| DbError::not_found("Tool", row.tool_label.clone()))?;

    let new_available = match row.kind {
        TransactionType::Borrow => {
            if available < row.quantity {
                return Err(DbError::ConstraintViolation(format!(
                    "{} has {} available, {} requested",
                    row.tool_label, available, row.quantity
                )));
            }
            available - row.quantity
        }
        TransactionType::Return => (available + row.quantity).min(total),
    };

    sqlx::query("UPDATE tools SET available_quantity = ?1 WHERE tool_id = ?2")
        .bind(new_available)
        .bind(tool_id)
        .execute(&mut *conn)
        .await?;

    let return_timestamp = match row.kind {
        TransactionType::Return => Some(row.captured_at),
        TransactionType::Borrow => None,
    };

    sqlx::query(
        r#"
        INSERT INTO transactions (
            transaction_ref, user_id, tool_id, kind, captured_at,
            desired_return_date, return_timestamp, quantity, purpose,
            image_path, classification_correct, weight, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(row.transaction_id.as_str())
    .bind(&row.user_id)
    .bind(tool_id)
    .bind(row.kind.as_str())
    .bind(row.captured_at)
    .bind(row.desired_return_date)
    .bind(return_timestamp)
    .bind(row.quantity)
    .bind(&row.purpose)
    .bind(row.image_ref.as_str())
    .bind(row.classification_correct)
    .bind(row.weight)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::UniqueViolation { field, .. } => {
            DbError::duplicate(field, row.transaction_id.to_string())
        }
        other => other,
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tool::NewTool;
    use crate::{Database, DbConfig};
    use chrono::{Duration, TimeZone};
    use toole_core::{ImageRef, Session, TransactionIdGenerator};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    async fn seeded() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tools().insert(&NewTool::new("Hammer", "Hand Tool", 2)).await.unwrap();
        db.tools().insert(&NewTool::new("Wrench", "Hand Tool", 1)).await.unwrap();
        db
    }

    /// Builds rows through a real session so they look like kiosk output.
    fn rows(kind: TransactionType, labels: &[&str]) -> Vec<CommitRow> {
        let mut gen = TransactionIdGenerator::new();
        let mut s = Session::new();
        s.begin("30012345");
        s.set_transaction_type(kind).unwrap();
        let today = now().date_naive();
        s.set_desired_return_date(today + Duration::days(3), today).unwrap();

        for label in labels {
            let tx = gen.next(now());
            s.start_pending(tx.clone(), ImageRef::new(format!("temp/{tx}.jpg")), now(), 1250)
                .unwrap();
            s.confirm(label).unwrap();
        }
        s.commit_rows().unwrap()
    }

    #[tokio::test]
    async fn test_batch_commits_all_rows() {
        let db = seeded().await;
        let result = db
            .transactions()
            .insert_batch(&rows(TransactionType::Borrow, &["Hammer", "Wrench"]))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.committed_count, 2);

        let history = db.transactions().list_for_user("30012345").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tool_name, "Hammer");
        assert_eq!(history[1].tool_name, "Wrench");
        assert_eq!(history[0].kind, "borrow");
        assert!(history[0].return_timestamp.is_none());
        assert_eq!(history[0].captured_at, now());

        let hammer = db.tools().get_by_name("Hammer").await.unwrap().unwrap();
        assert_eq!(hammer.available_quantity, 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_rolls_back_whole_batch() {
        let db = seeded().await;
        let result = db
            .transactions()
            .insert_batch(&rows(TransactionType::Borrow, &["Hammer", "Spanner"]))
            .await
            .unwrap();

        assert_eq!(result.failure_index, Some(2));
        assert_eq!(result.committed_count, 0);
        assert!(result.error_detail.unwrap().contains("Failed to process item 2"));

        // Row 1 was written inside the transaction but must not be visible
        assert_eq!(db.transactions().count().await.unwrap(), 0);
        let hammer = db.tools().get_by_name("Hammer").await.unwrap().unwrap();
        assert_eq!(hammer.available_quantity, 2);
    }

    #[tokio::test]
    async fn test_borrowing_more_than_available_fails_at_that_row() {
        let db = seeded().await;
        let result = db
            .transactions()
            .insert_batch(&rows(TransactionType::Borrow, &["Wrench", "Hammer", "Wrench"]))
            .await
            .unwrap();

        assert_eq!(result.failure_index, Some(3));
        assert_eq!(db.transactions().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resubmitting_same_batch_is_rejected() {
        let db = seeded().await;
        let batch = rows(TransactionType::Return, &["Hammer"]);

        assert!(db.transactions().insert_batch(&batch).await.unwrap().is_success());
        let again = db.transactions().insert_batch(&batch).await.unwrap();
        assert_eq!(again.failure_index, Some(1));
        assert_eq!(db.transactions().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_return_sets_timestamp_and_restocks() {
        let db = seeded().await;
        db.transactions()
            .insert_batch(&rows(TransactionType::Borrow, &["Wrench"]))
            .await
            .unwrap();
        db.transactions()
            .insert_batch(&rows_at_offset(TransactionType::Return, "Wrench"))
            .await
            .unwrap();

        let history = db.transactions().list_for_user("30012345").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].kind, "return");
        assert!(history[1].return_timestamp.is_some());
        assert!(history[1].desired_return_date.is_none());

        let wrench = db.tools().get_by_name("Wrench").await.unwrap().unwrap();
        assert_eq!(wrench.available_quantity, 1);
    }

    /// Same as `rows` but an hour later so transaction refs don't collide.
    fn rows_at_offset(kind: TransactionType, label: &str) -> Vec<CommitRow> {
        let later = now() + Duration::hours(1);
        let mut gen = TransactionIdGenerator::new();
        let mut s = Session::new();
        s.begin("30012345");
        s.set_transaction_type(kind).unwrap();
        let tx = gen.next(later);
        s.start_pending(tx, ImageRef::new("temp/late.jpg"), later, 900)
            .unwrap();
        s.confirm(label).unwrap();
        s.commit_rows().unwrap()
    }
}
