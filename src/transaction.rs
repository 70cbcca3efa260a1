//! Scoped transactions with rollback on drop

use std::ops::Deref;

use tracing::{debug, warn};

use crate::database::Database;
use crate::error::{Error, Result};

/// Locking behavior of `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionBehavior {
   /// Locks are taken when the database is first read or written.
   #[default]
   Deferred,
   /// A write lock is taken immediately.
   Immediate,
   /// An exclusive lock is taken immediately.
   Exclusive,
}

impl TransactionBehavior {
   fn begin_sql(self) -> &'static str {
      match self {
         TransactionBehavior::Deferred => "BEGIN DEFERRED",
         TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
         TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
      }
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
   Active,
   Committed,
   RolledBack,
}

/// A transaction that rolls back unless committed.
///
/// Dropping an uncommitted `Transaction` (including while unwinding from a
/// panic or returning early through `?`) issues a `ROLLBACK`. A failing
/// rollback on drop is logged and otherwise ignored.
///
/// ```
/// use scoped_sqlite::{Database, Transaction};
///
/// let db = Database::open_in_memory()?;
/// db.exec("CREATE TABLE t (v INTEGER)")?;
///
/// {
///     let tx = Transaction::new(&db)?;
///     tx.exec("INSERT INTO t VALUES (1)")?;
///     // dropped without commit
/// }
/// assert_eq!(db.exec_and_get("SELECT count(*) FROM t")?.as_i64(), 0);
///
/// let tx = Transaction::new(&db)?;
/// tx.exec("INSERT INTO t VALUES (1)")?;
/// tx.commit()?;
/// assert_eq!(db.exec_and_get("SELECT count(*) FROM t")?.as_i64(), 1);
/// # Ok::<_, scoped_sqlite::Error>(())
/// ```
#[derive(Debug)]
#[must_use = "if unused, the transaction is immediately rolled back"]
pub struct Transaction<'conn> {
   db: &'conn Database,
   state: State,
}

impl<'conn> Transaction<'conn> {
   /// Begin a deferred transaction.
   pub fn new(db: &'conn Database) -> Result<Self> {
      Self::with_behavior(db, TransactionBehavior::Deferred)
   }

   /// Begin a transaction with the given locking behavior.
   pub fn with_behavior(db: &'conn Database, behavior: TransactionBehavior) -> Result<Self> {
      db.exec(behavior.begin_sql())?;
      debug!(filename = %db.filename(), ?behavior, "Transaction started");
      Ok(Self {
         db,
         state: State::Active,
      })
   }

   /// Commit the transaction.
   ///
   /// On failure the engine's error is returned as [`Error::Commit`] and the
   /// transaction is rolled back when the scope is dropped.
   pub fn commit(mut self) -> Result<()> {
      match self.db.exec("COMMIT") {
         Ok(_) => {
            self.state = State::Committed;
            debug!(filename = %self.db.filename(), "Transaction committed");
            Ok(())
         }
         Err(Error::Execute(error)) => Err(Error::Commit(error)),
         Err(other) => Err(other),
      }
   }

   /// Roll the transaction back now instead of on drop.
   pub fn rollback(mut self) -> Result<()> {
      self.db.exec("ROLLBACK")?;
      self.state = State::RolledBack;
      debug!(filename = %self.db.filename(), "Transaction rolled back");
      Ok(())
   }

   /// The connection the transaction runs on.
   pub fn database(&self) -> &'conn Database {
      self.db
   }
}

impl Deref for Transaction<'_> {
   type Target = Database;

   fn deref(&self) -> &Database {
      self.db
   }
}

impl Drop for Transaction<'_> {
   fn drop(&mut self) {
      if self.state != State::Active {
         return;
      }

      // A failed COMMIT or an error such as SQLITE_FULL may already have
      // ended the transaction, in which case ROLLBACK fails harmlessly.
      match self.db.exec("ROLLBACK") {
         Ok(_) => debug!(filename = %self.db.filename(), "Transaction rolled back on drop"),
         Err(error) => warn!(
            filename = %self.db.filename(),
            error = %error,
            "Failed to roll back transaction on drop"
         ),
      }
   }
}
