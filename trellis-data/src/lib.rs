//! # Trellis Data
//!
//! Data access layer for the Trellis framework.
//!
//! Statements run on the connection associated with a [`ConnectionScope`],
//! so every call made on behalf of one request shares a single connection
//! and, while a transaction is open, a single transaction.
//!
//! ## Features
//!
//! - **Scoped connections**: one connection per logical call path, reused
//!   until commit, rollback, or the scope is dropped
//! - **Statement helpers**: insert, update, and delete built from field maps
//! - **Scripts**: run schema files statement by statement
//! - **Drivers**: an in-memory driver with an event journal, and SQLite via
//!   `sqlx` behind the `sqlite` feature
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis_data::{ConnectionScope, Database, MemoryDatabase};
//!
//! let db = Database::from_source(MemoryDatabase::new().with_table("orders"));
//! let scope = ConnectionScope::new();
//!
//! db.insert(&scope, "orders", &fields).await?;
//! let orders: Vec<Order> = db.query_list(&scope, "SELECT * FROM orders", &[]).await?;
//! ```
//!
//! ## With Transactions
//!
//! ```rust,ignore
//! db.begin_transaction(&scope).await?;
//! db.insert(&scope, "orders", &fields).await?;
//! db.update(&scope, "stock", 7, &stock).await?;
//! db.commit_transaction(&scope).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connection;
mod database;
mod error;
pub mod memory;
mod scope;
mod source;
#[cfg(feature = "sqlite")]
pub mod sqlite;
mod statement;

pub use connection::*;
pub use database::*;
pub use error::*;
pub use memory::{JournalEntry, MemoryDatabase};
pub use scope::*;
pub use source::open_source;
pub use statement::*;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSource;
