//! # Repository Module
//!
//! Database repository implementations for the TOOL-E kiosk.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Kiosk worker                                                          │
//! │       │                                                                 │
//! │       │  db.transactions().insert_batch(&rows)                         │
//! │       ▼                                                                 │
//! │  TransactionRepository                                                 │
//! │  ├── insert_batch(&self, rows)     ← one SQLite transaction            │
//! │  ├── list_for_user(&self, user_id)                                     │
//! │  └── count(&self)                                                      │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`TransactionRepository`](transaction::TransactionRepository) - Atomic batch writes and history
//! - [`ToolRepository`](tool::ToolRepository) - Tool catalog for label resolution and manual selection
//! - [`UserRepository`](user::UserRepository) - Local waiver directory

pub mod tool;
pub mod transaction;
pub mod user;
