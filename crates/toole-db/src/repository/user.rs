//! # User Repository
//!
//! Local waiver directory. A user is found either by UCID or by the
//! barcode on their campus card; the card reader appends a `;` terminator
//! that is stripped before lookup.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use toole_core::validation::UserIdentifier;

use crate::error::DbResult;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UserRecord {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub card_barcode: Option<String>,
    pub last_renewed: Option<NaiveDate>,
}

/// Repository for user directory operations.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Creates a new UserRepository.
    pub fn new(pool: SqlitePool) -> Self {
        UserRepository { pool }
    }

    /// Adds or replaces a directory entry.
    pub async fn upsert(&self, user: &UserRecord) -> DbResult<()> {
        debug!(user_id = %user.user_id, "Upserting user");

        sqlx::query(
            r#"
            INSERT INTO users (user_id, first_name, last_name, email, card_barcode, last_renewed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = excluded.email,
                card_barcode = excluded.card_barcode,
                last_renewed = excluded.last_renewed
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.card_barcode.as_deref().map(normalize_barcode))
        .bind(user.last_renewed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Finds a user by UCID or card barcode.
    pub async fn find_by_identifier(&self, id: &UserIdentifier) -> DbResult<Option<UserRecord>> {
        let (sql, key) = match id {
            UserIdentifier::Ucid(ucid) => (
                r#"
                SELECT user_id, first_name, last_name, email, card_barcode, last_renewed
                FROM users WHERE user_id = ?1
                "#,
                ucid.clone(),
            ),
            UserIdentifier::Barcode(barcode) => (
                r#"
                SELECT user_id, first_name, last_name, email, card_barcode, last_renewed
                FROM users WHERE card_barcode = ?1
                "#,
                normalize_barcode(barcode),
            ),
        };

        let user = sqlx::query_as::<_, UserRecord>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Records a waiver renewal.
    pub async fn renew_waiver(&self, user_id: &str, on: NaiveDate) -> DbResult<bool> {
        let result = sqlx::query("UPDATE users SET last_renewed = ?1 WHERE user_id = ?2")
            .bind(on)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn normalize_barcode(raw: &str) -> String {
    raw.trim().trim_end_matches(';').to_string()
}
