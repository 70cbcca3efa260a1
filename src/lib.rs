//! # scoped-sqlite
//!
//! Scoped, resource-safe handles over the SQLite C API.
//!
//! Every engine handle is owned by exactly one Rust value and released exactly
//! once when that value is dropped. Lifetimes tie statements, columns,
//! transactions and backups to the connection they were created on, so a
//! connection can never be closed while something still uses it.
//!
//! ## Core Types
//!
//! - **[`Database`]**: An open connection, configured with [`OpenOptions`]
//! - **[`Statement`]**: A compiled query with parameter binding and a cursor
//! - **[`Column`]**: A typed view of one column of the current row, sharing
//!   the statement's compiled plan so it can outlive the [`Statement`]
//! - **[`Transaction`]**: RAII guard that rolls back unless committed
//! - **[`Backup`]**: Incremental online copy between two connections
//! - **[`Error`]**: Error type carrying the engine's result codes and message
//!
//! ## Example
//!
//! ```
//! use scoped_sqlite::{Database, Statement, Step};
//!
//! let db = Database::open_in_memory()?;
//! db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")?;
//! assert_eq!(db.exec("INSERT INTO t (v) VALUES ('first')")?, 1);
//! assert_eq!(db.exec("INSERT INTO t (v) VALUES ('second')")?, 1);
//!
//! let mut query = Statement::new(&db, "SELECT * FROM t")?;
//! assert_eq!(query.step()?, Step::Row);
//! assert_eq!(query.column_by_name("v")?.as_text(), "first");
//! assert_eq!(query.step()?, Step::Row);
//! assert_eq!(query.step()?, Step::Done);
//! # Ok::<_, scoped_sqlite::Error>(())
//! ```
//!
//! ## Threading
//!
//! A [`Database`] is `Send` but not `Sync`. Statements and columns are
//! neither. There is no internal locking.

mod assertion;
mod backup;
mod column;
mod config;
mod database;
mod decode;
mod error;
mod functions;
mod statement;
mod transaction;
mod value;

// Re-export public types
pub use assertion::{AssertionFailure, AssertionHandler, set_assertion_handler};
pub use backup::{Backup, BackupStep, Progress};
pub use column::Column;
pub use config::{OpenFlags, OpenOptions};
pub use database::{Database, MEMORY, TEMPORARY, lib_version, lib_version_number};
pub use decode::{JsonRow, WriteQueryResult, value_from_json, value_to_json};
pub use error::{EngineError, Error, Result};
pub use functions::{Aggregate, Context, FunctionFlags};
pub use statement::{Param, State as StatementState, Statement, Step};
pub use transaction::{Transaction, TransactionBehavior};
pub use value::{ColumnType, Value};

/// Raw engine bindings, for use together with [`Database::handle`].
pub use libsqlite3_sys as ffi;
