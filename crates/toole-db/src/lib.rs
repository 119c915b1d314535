//! # toole-db: Database Layer for the TOOL-E Kiosk
//!
//! SQLite storage for the kiosk, accessed through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TOOL-E Data Flow                                 │
//! │                                                                         │
//! │  BatchSubmitter (toole-station)                                        │
//! │       │  SqliteGateway::commit_batch(rows)                             │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     toole-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐ │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │ │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │ │   │
//! │  │   │               │    │ Transaction    │    │              │ │   │
//! │  │   │ SqlitePool    │◄───│ Tool           │    │ 0001_initial │ │   │
//! │  │   │ Connection    │    │ User           │    │              │ │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘ │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  kiosk.db (WAL)                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`pool`] - Connection pool management
//! - [`migrations`] - Embedded SQL migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (transaction, tool, user)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toole_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("kiosk.db")).await?;
//! let result = db.transactions().insert_batch(&rows).await?;
//! if let Some(index) = result.failure_index {
//!     // nothing was written; row `index` (1-based) is the culprit
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::tool::{NewTool, Tool, ToolRepository};
pub use repository::transaction::{TransactionRecord, TransactionRepository};
pub use repository::user::{UserRecord, UserRepository};
