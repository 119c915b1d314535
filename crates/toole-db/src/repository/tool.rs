//! # Tool Repository
//!
//! The tool catalog. Classifier labels are matched against `tool_name`
//! case-insensitively.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Tool {
    pub tool_id: i64,
    pub tool_name: String,
    pub tool_size: Option<String>,
    pub tool_type: String,
    pub current_status: String,
    pub total_quantity: i64,
    pub available_quantity: i64,
    pub trained: bool,
}

/// Fields needed to add a tool.
#[derive(Debug, Clone)]
pub struct NewTool {
    pub tool_name: String,
    pub tool_size: Option<String>,
    pub tool_type: String,
    pub total_quantity: i64,
    pub trained: bool,
}

impl NewTool {
    pub fn new(name: impl Into<String>, tool_type: impl Into<String>, quantity: i64) -> Self {
        NewTool {
            tool_name: name.into(),
            tool_size: None,
            tool_type: tool_type.into(),
            total_quantity: quantity,
            trained: true,
        }
    }
}

/// Repository for tool catalog operations.
#[derive(Debug, Clone)]
pub struct ToolRepository {
    pool: SqlitePool,
}

impl ToolRepository {
    /// Creates a new ToolRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ToolRepository { pool }
    }

    /// Adds a tool with all units available. Returns the new `tool_id`.
    pub async fn insert(&self, tool: &NewTool) -> DbResult<i64> {
        debug!(name = %tool.tool_name, "Inserting tool");

        let result = sqlx::query(
            r#"
            INSERT INTO tools (
                tool_name, tool_size, tool_type, current_status,
                total_quantity, available_quantity, trained
            ) VALUES (?1, ?2, ?3, 'Available', ?4, ?4, ?5)
            "#,
        )
        .bind(&tool.tool_name)
        .bind(&tool.tool_size)
        .bind(&tool.tool_type)
        .bind(tool.total_quantity)
        .bind(tool.trained)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &tool.tool_name),
            other => other,
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Looks a tool up by name, ignoring case.
    pub async fn get_by_name(&self, name: &str) -> DbResult<Option<Tool>> {
        let tool = sqlx::query_as::<_, Tool>(
            r#"
            SELECT tool_id, tool_name, tool_size, tool_type, current_status,
                   total_quantity, available_quantity, trained
            FROM tools
            WHERE tool_name = ?1 COLLATE NOCASE
            "#,
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(tool)
    }

    /// Tools with at least one unit on the shelf, for manual selection.
    pub async fn list_available(&self) -> DbResult<Vec<Tool>> {
        let tools = sqlx::query_as::<_, Tool>(
            r#"
            SELECT tool_id, tool_name, tool_size, tool_type, current_status,
                   total_quantity, available_quantity, trained
            FROM tools
            WHERE available_quantity > 0
            ORDER BY tool_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tools)
    }

    /// Every tool, for the return flow (a returned tool may show zero available).
    pub async fn list_all(&self) -> DbResult<Vec<Tool>> {
        let tools = sqlx::query_as::<_, Tool>(
            r#"
            SELECT tool_id, tool_name, tool_size, tool_type, current_status,
                   total_quantity, available_quantity, trained
            FROM tools
            ORDER BY tool_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tools)
    }

    /// Number of catalog rows.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tools")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_lookup_ignores_case() {
        let db = db().await;
        let id = db.tools().insert(&NewTool::new("Hammer", "Hand Tool", 3)).await.unwrap();

        let tool = db.tools().get_by_name("hammer").await.unwrap().unwrap();
        assert_eq!(tool.tool_id, id);
        assert_eq!(tool.available_quantity, 3);
        assert_eq!(tool.current_status, "Available");

        assert!(db.tools().get_by_name("Spanner").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let db = db().await;
        db.tools().insert(&NewTool::new("Hammer", "Hand Tool", 1)).await.unwrap();
        let err = db
            .tools()
            .insert(&NewTool::new("HAMMER", "Hand Tool", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert_eq!(db.tools().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_available_skips_empty_shelves() {
        let db = db().await;
        db.tools().insert(&NewTool::new("Wrench", "Hand Tool", 2)).await.unwrap();
        db.tools().insert(&NewTool::new("Drill", "Power Tool", 0)).await.unwrap();

        let names: Vec<_> = db
            .tools()
            .list_available()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.tool_name)
            .collect();
        assert_eq!(names, vec!["Wrench"]);
        assert_eq!(db.tools().list_all().await.unwrap().len(), 2);
    }
}
