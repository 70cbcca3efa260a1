//! Prepared statements with a shared compiled plan.
//!
//! A [`Statement`] owns its compiled plan through an `Rc<RawStatement>`. Every
//! [`Column`] produced from the current row holds another reference, so the
//! plan is only finalized when the statement and all of its columns are gone.
//! This is what lets [`crate::Database::exec_and_get`] hand out a column from a
//! statement that no longer exists.

use std::cell::{Cell, OnceCell};
use std::collections::{BTreeMap, HashMap};
use std::ffi::{CString, c_int};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use libsqlite3_sys as ffi;
use tracing::trace;

use crate::column::Column;
use crate::database::Database;
use crate::error::{EngineError, Error, Result, text_or_empty};
use crate::value::Value;

/// The compiled plan, shared between a statement and its columns.
///
/// `generation` changes every time the cursor moves (step or reset), which is
/// how a column detects that the row it was produced for is gone.
#[derive(Debug)]
pub(crate) struct RawStatement<'conn> {
   stmt: NonNull<ffi::sqlite3_stmt>,
   generation: Cell<u64>,
   _conn: PhantomData<&'conn Database>,
}

impl RawStatement<'_> {
   pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
      self.stmt.as_ptr()
   }

   pub(crate) fn generation(&self) -> u64 {
      self.generation.get()
   }

   fn advance(&self) {
      self.generation.set(self.generation.get().wrapping_add(1));
   }
}

impl Drop for RawStatement<'_> {
   fn drop(&mut self) {
      // The return value repeats the last step error, which was already reported.
      unsafe {
         ffi::sqlite3_finalize(self.stmt.as_ptr());
      }
      trace!("Finalized statement");
   }
}

/// Cursor position of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
   /// Compiled or reset, the next step starts from the first row.
   Ready,
   /// The cursor is on a row and columns can be read.
   Row,
   /// All rows were returned. Reset before stepping again.
   Done,
   /// The last step failed. Reset before stepping again.
   Failed,
}

/// Successful outcome of [`Statement::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
   /// A row is available.
   Row,
   /// There are no more rows.
   Done,
}

/// Parameter reference: a 1-based ordinal or a placeholder name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param<'a> {
   Index(usize),
   Name(&'a str),
}

impl From<usize> for Param<'_> {
   fn from(index: usize) -> Self {
      Param::Index(index)
   }
}

impl<'a> From<&'a str> for Param<'a> {
   fn from(name: &'a str) -> Self {
      Param::Name(name)
   }
}

impl<'a> From<&'a String> for Param<'a> {
   fn from(name: &'a String) -> Self {
      Param::Name(name)
   }
}

/// A compiled SQL statement tied to a [`Database`].
///
/// ```
/// use scoped_sqlite::{Database, Statement, Step};
///
/// let db = Database::open_in_memory()?;
/// db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); INSERT INTO t (v) VALUES ('a'), ('b')")?;
///
/// let mut query = Statement::new(&db, "SELECT v FROM t WHERE id > :min")?;
/// query.bind(":min", 0)?;
/// let mut values = Vec::new();
/// while query.step()? == Step::Row {
///     values.push(query.column(0)?.as_text());
/// }
/// assert_eq!(values, ["a", "b"]);
/// # Ok::<_, scoped_sqlite::Error>(())
/// ```
#[derive(Debug)]
pub struct Statement<'conn> {
   db: &'conn Database,
   raw: Rc<RawStatement<'conn>>,
   sql: String,
   state: State,
   column_count: usize,
   reprepares: c_int,
   bindings: BTreeMap<usize, Value>,
   column_names: OnceCell<HashMap<String, usize>>,
}

impl<'conn> Statement<'conn> {
   /// Compile `sql` against `db`.
   ///
   /// Fails with [`Error::Compile`] if the text is not valid SQL for the
   /// current schema or contains no statement at all.
   pub fn new(db: &'conn Database, sql: &str) -> Result<Self> {
      let c_sql = CString::new(sql)?;
      let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
      let rc = unsafe {
         ffi::sqlite3_prepare_v2(db.handle(), c_sql.as_ptr(), -1, &mut stmt, ptr::null_mut())
      };

      if rc != ffi::SQLITE_OK {
         let error = unsafe { EngineError::from_handle_with_code(db.handle(), rc) };
         trace!(sql, error = %error, "Failed to compile statement");
         return Err(Error::Compile(error));
      }

      let stmt = NonNull::new(stmt).ok_or_else(|| {
         Error::Compile(EngineError::new(
            ffi::SQLITE_MISUSE,
            "SQL text contains no statement",
         ))
      })?;

      let column_count =
         usize::try_from(unsafe { ffi::sqlite3_column_count(stmt.as_ptr()) }).unwrap_or(0);

      trace!(sql, column_count, "Compiled statement");
      Ok(Self {
         db,
         raw: Rc::new(RawStatement {
            stmt,
            generation: Cell::new(0),
            _conn: PhantomData,
         }),
         sql: sql.to_owned(),
         state: State::Ready,
         column_count,
         reprepares: 0,
         bindings: BTreeMap::new(),
         column_names: OnceCell::new(),
      })
   }

   /// Bind a value to a parameter given by 1-based ordinal or by name.
   ///
   /// Names may be given with their prefix (`":id"`, `"@id"`, `"$id"`) or bare
   /// (`"id"`), in which case each prefix is tried in turn. Binding while the
   /// statement is on a row or finished rewinds it to [`State::Ready`] first.
   pub fn bind<'p>(&mut self, param: impl Into<Param<'p>>, value: impl Into<Value>) -> Result<()> {
      let index = self.parameter_index(param.into())?;
      if self.state != State::Ready {
         self.rewind();
      }

      let value = value.into();
      self.apply_binding(index, &value)?;
      self.bindings.insert(index, value);
      Ok(())
   }

   /// Bind `values` to parameters `1..=values.len()`.
   pub fn bind_all<I, V>(&mut self, values: I) -> Result<()>
   where
      I: IntoIterator<Item = V>,
      V: Into<Value>,
   {
      for (offset, value) in values.into_iter().enumerate() {
         self.bind(offset + 1, value)?;
      }
      Ok(())
   }

   /// Bind several named parameters.
   pub fn bind_named<V>(&mut self, values: &[(&str, V)]) -> Result<()>
   where
      V: Into<Value> + Clone,
   {
      for (name, value) in values {
         self.bind(*name, value.clone())?;
      }
      Ok(())
   }

   /// Reset every parameter to NULL.
   pub fn clear_bindings(&mut self) -> Result<()> {
      let rc = unsafe { ffi::sqlite3_clear_bindings(self.raw.as_ptr()) };
      self.db.check(rc).map_err(Error::Bind)?;
      self.bindings.clear();
      Ok(())
   }

   /// The value last bound to a 1-based ordinal.
   pub fn bound(&self, index: usize) -> Option<&Value> {
      self.bindings.get(&index)
   }

   /// All recorded bindings, keyed by 1-based ordinal.
   pub fn bindings(&self) -> &BTreeMap<usize, Value> {
      &self.bindings
   }

   /// Execute one step of the statement.
   ///
   /// Returns [`Step::Row`] while rows are available and [`Step::Done`] once.
   /// Stepping again after `Done` or after an error requires [`reset`]. A
   /// locked database surfaces as [`Error::Step`] with
   /// [`Error::is_busy`] set once the busy timeout expired.
   ///
   /// [`reset`]: Statement::reset
   pub fn step(&mut self) -> Result<Step> {
      if matches!(self.state, State::Done | State::Failed) {
         return Err(Error::Step(EngineError::new(
            ffi::SQLITE_MISUSE,
            "statement needs to be reset",
         )));
      }

      let rc = unsafe { ffi::sqlite3_step(self.raw.as_ptr()) };
      self.raw.advance();
      self.sync_after_reprepare();

      match rc {
         ffi::SQLITE_ROW => {
            self.state = State::Row;
            Ok(Step::Row)
         }
         ffi::SQLITE_DONE => {
            self.state = State::Done;
            Ok(Step::Done)
         }
         _ => {
            self.state = State::Failed;
            let error = unsafe { EngineError::from_handle_with_code(self.db.handle(), rc) };
            trace!(sql = %self.sql, error = %error, "Step failed");
            Err(Error::Step(error))
         }
      }
   }

   /// [`step`](Statement::step) returning `true` when a row is available.
   pub fn execute_step(&mut self) -> Result<bool> {
      Ok(self.step()? == Step::Row)
   }

   /// Execute a statement that returns no rows and report the modified-row count.
   pub fn execute(&mut self) -> Result<usize> {
      match self.step()? {
         Step::Done => Ok(self.db.changes()),
         Step::Row => Err(Error::Step(EngineError::new(
            ffi::SQLITE_MISUSE,
            "execute() does not expect results, use step()",
         ))),
      }
   }

   /// Move the cursor back before the first row. Bindings are kept.
   ///
   /// If the previous execution failed, the statement is still reset and the
   /// leftover error is returned as [`Error::Reset`].
   pub fn reset(&mut self) -> Result<()> {
      let rc = unsafe { ffi::sqlite3_reset(self.raw.as_ptr()) };
      self.raw.advance();
      self.state = State::Ready;

      if rc != ffi::SQLITE_OK {
         let error = unsafe { EngineError::from_handle_with_code(self.db.handle(), rc) };
         return Err(Error::Reset(error));
      }
      Ok(())
   }

   // A schema change makes the engine recompile the statement on the next
   // step, which may change the result columns (`SELECT *`).
   fn sync_after_reprepare(&mut self) {
      let reprepares = unsafe {
         ffi::sqlite3_stmt_status(self.raw.as_ptr(), ffi::SQLITE_STMTSTATUS_REPREPARE, 0)
      };
      if reprepares == self.reprepares {
         return;
      }

      self.reprepares = reprepares;
      self.column_count =
         usize::try_from(unsafe { ffi::sqlite3_column_count(self.raw.as_ptr()) }).unwrap_or(0);
      self.column_names = OnceCell::new();
      trace!(sql = %self.sql, column_count = self.column_count, "Statement was recompiled");
   }

   // The engine refuses bindings on a running statement. Any residual error
   // was already returned by the failed step.
   fn rewind(&mut self) {
      unsafe {
         ffi::sqlite3_reset(self.raw.as_ptr());
      }
      self.raw.advance();
      trace!(sql = %self.sql, state = ?self.state, "Rewound statement for binding");
      self.state = State::Ready;
   }

   /// A view of column `index` (0-based) of the current row.
   ///
   /// The view keeps the compiled plan alive and may outlive this statement,
   /// but its content is only meaningful until the cursor moves.
   pub fn column(&self, index: usize) -> Result<Column<'conn>> {
      self.check_row()?;
      let index = self.check_index(index)?;
      Ok(Column::new(Rc::clone(&self.raw), index))
   }

   /// A view of the result column named `name` (case sensitive).
   pub fn column_by_name(&self, name: &str) -> Result<Column<'conn>> {
      self.check_row()?;
      let index = self.column_index(name)?;
      self.column(index)
   }

   /// Index of the result column named `name`.
   ///
   /// Uses the declared or aliased result names, not the origin table's
   /// column names. The name map is built on first use.
   pub fn column_index(&self, name: &str) -> Result<usize> {
      let names = self.column_names.get_or_init(|| {
         let mut names = HashMap::with_capacity(self.column_count);
         for index in 0..self.column_count {
            let name = unsafe { text_or_empty(ffi::sqlite3_column_name(self.raw.as_ptr(), index as c_int)) };
            names.entry(name).or_insert(index);
         }
         names
      });

      names
         .get(name)
         .copied()
         .ok_or_else(|| Error::ColumnName(name.to_owned()))
   }

   /// Number of result columns.
   pub fn column_count(&self) -> usize {
      self.column_count
   }

   /// Result name of column `index`.
   pub fn column_name(&self, index: usize) -> Result<String> {
      let index = self.check_index(index)?;
      Ok(unsafe { text_or_empty(ffi::sqlite3_column_name(self.raw.as_ptr(), index)) })
   }

   /// Declared type of column `index`, `None` for expressions.
   pub fn column_decltype(&self, index: usize) -> Result<Option<String>> {
      let index = self.check_index(index)?;
      let ptr = unsafe { ffi::sqlite3_column_decltype(self.raw.as_ptr(), index) };
      Ok((!ptr.is_null()).then(|| unsafe { text_or_empty(ptr) }))
   }

   /// Name of the table column that column `index` is read from.
   #[cfg(feature = "column-metadata")]
   pub fn column_origin_name(&self, index: usize) -> Result<Option<String>> {
      let index = self.check_index(index)?;
      let ptr = unsafe { ffi::sqlite3_column_origin_name(self.raw.as_ptr(), index) };
      Ok((!ptr.is_null()).then(|| unsafe { text_or_empty(ptr) }))
   }

   /// True if column `index` of the current row is NULL.
   pub fn is_column_null(&self, index: usize) -> Result<bool> {
      self.check_row()?;
      let index = self.check_index(index)?;
      Ok(unsafe { ffi::sqlite3_column_type(self.raw.as_ptr(), index) } == ffi::SQLITE_NULL)
   }

   /// Owned copies of every column of the current row.
   pub fn row(&self) -> Result<Vec<Value>> {
      (0..self.column_count)
         .map(|index| self.column(index).map(|column| column.value()))
         .collect()
   }

   /// Current cursor state.
   pub fn state(&self) -> State {
      self.state
   }

   /// True while the cursor is on a row.
   pub fn has_row(&self) -> bool {
      self.state == State::Row
   }

   /// True once every row has been returned.
   pub fn is_done(&self) -> bool {
      self.state == State::Done
   }

   /// The SQL text this statement was compiled from.
   pub fn sql(&self) -> &str {
      &self.sql
   }

   /// The SQL text with bound parameters expanded.
   pub fn expanded_sql(&self) -> Option<String> {
      unsafe {
         let ptr = ffi::sqlite3_expanded_sql(self.raw.as_ptr());
         if ptr.is_null() {
            return None;
         }
         let text = text_or_empty(ptr);
         ffi::sqlite3_free(ptr.cast());
         Some(text)
      }
   }

   /// Number of parameters in the compiled statement.
   pub fn parameter_count(&self) -> usize {
      usize::try_from(unsafe { ffi::sqlite3_bind_parameter_count(self.raw.as_ptr()) }).unwrap_or(0)
   }

   /// True if the statement does not write to the database.
   pub fn is_readonly(&self) -> bool {
      unsafe { ffi::sqlite3_stmt_readonly(self.raw.as_ptr()) != 0 }
   }

   /// The database this statement was compiled against.
   pub fn database(&self) -> &'conn Database {
      self.db
   }

   fn parameter_index(&self, param: Param<'_>) -> Result<usize> {
      match param {
         Param::Index(index) if (1..=self.parameter_count()).contains(&index) => Ok(index),
         Param::Index(index) => Err(Error::Bind(EngineError::new(
            ffi::SQLITE_RANGE,
            format!("parameter index {index} out of range"),
         ))),
         Param::Name(name) => {
            let prefixed = name.starts_with([':', '@', '$', '?']);
            let candidates: Vec<String> = if prefixed {
               vec![name.to_owned()]
            } else {
               [':', '@', '$'].iter().map(|p| format!("{p}{name}")).collect()
            };

            for candidate in candidates {
               let c_name = CString::new(candidate)?;
               let index =
                  unsafe { ffi::sqlite3_bind_parameter_index(self.raw.as_ptr(), c_name.as_ptr()) };
               if index > 0 {
                  return Ok(index as usize);
               }
            }

            Err(Error::Bind(EngineError::new(
               ffi::SQLITE_RANGE,
               format!("no parameter named '{name}'"),
            )))
         }
      }
   }

   fn apply_binding(&self, index: usize, value: &Value) -> Result<()> {
      let stmt = self.raw.as_ptr();
      let index = index as c_int;
      let too_big = || Error::Bind(EngineError::from_code(ffi::SQLITE_TOOBIG));

      let rc = match value {
         Value::Null => unsafe { ffi::sqlite3_bind_null(stmt, index) },
         Value::Integer(i) => unsafe { ffi::sqlite3_bind_int64(stmt, index, *i) },
         Value::Real(r) => unsafe { ffi::sqlite3_bind_double(stmt, index, *r) },
         Value::Text(s) => {
            let len = c_int::try_from(s.len()).map_err(|_| too_big())?;
            unsafe {
               ffi::sqlite3_bind_text(stmt, index, s.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
            }
         }
         Value::Blob(b) => {
            let len = c_int::try_from(b.len()).map_err(|_| too_big())?;
            unsafe {
               ffi::sqlite3_bind_blob(stmt, index, b.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
            }
         }
      };

      self.db.check(rc).map_err(Error::Bind)
   }

   pub(crate) fn check_row(&self) -> Result<()> {
      if self.state == State::Row {
         Ok(())
      } else {
         Err(Error::NoRow(format!(
            "no row to get a column from, statement is {:?}",
            self.state
         )))
      }
   }

   fn check_index(&self, index: usize) -> Result<c_int> {
      if index < self.column_count {
         Ok(index as c_int)
      } else {
         Err(Error::ColumnRange {
            index,
            count: self.column_count,
         })
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn seeded_db() -> Database {
      let db = Database::open_in_memory().unwrap();
      db.exec(
         "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT, weight REAL);
          INSERT INTO t (v, weight) VALUES ('first', 1.5), ('second', 2.5), ('third', 3.5);",
      )
      .unwrap();
      db
   }

   #[test]
   fn test_compile_error() {
      let db = seeded_db();
      let err = Statement::new(&db, "SELEC * FROM t").unwrap_err();
      assert_eq!(err.error_code(), "COMPILE_ERROR");
      assert_eq!(err.code(), ffi::SQLITE_ERROR);

      let err = Statement::new(&db, "SELECT * FROM missing").unwrap_err();
      assert!(err.to_string().contains("no such table"));

      let err = Statement::new(&db, "   -- only a comment").unwrap_err();
      assert_eq!(err.code(), ffi::SQLITE_MISUSE);
   }

   #[test]
   fn test_step_state_machine() {
      let db = seeded_db();
      let mut query = Statement::new(&db, "SELECT * FROM t ORDER BY id").unwrap();
      assert_eq!(query.state(), State::Ready);
      assert_eq!(query.column_count(), 3);

      let mut rows = 0;
      while query.step().unwrap() == Step::Row {
         assert!(query.has_row());
         rows += 1;
      }
      assert_eq!(rows, 3);
      assert!(query.is_done());

      let err = query.step().unwrap_err();
      assert_eq!(err.code(), ffi::SQLITE_MISUSE);

      query.reset().unwrap();
      assert_eq!(query.state(), State::Ready);
      assert!(query.execute_step().unwrap());
   }

   #[test]
   fn test_column_requires_row() {
      let db = seeded_db();
      let mut query = Statement::new(&db, "SELECT v FROM t WHERE id = 1").unwrap();
      assert!(matches!(query.column(0), Err(Error::NoRow(_))));

      query.step().unwrap();
      assert_eq!(query.column(0).unwrap().as_text(), "first");
      assert!(matches!(
         query.column(1),
         Err(Error::ColumnRange { index: 1, count: 1 })
      ));

      query.step().unwrap();
      assert!(matches!(query.column(0), Err(Error::NoRow(_))));
   }

   #[test]
   fn test_bind_by_ordinal_and_name() {
      let db = seeded_db();
      let mut query =
         Statement::new(&db, "SELECT v FROM t WHERE id = ?1 OR weight > :min").unwrap();
      assert_eq!(query.parameter_count(), 2);

      query.bind(1, 1).unwrap();
      query.bind(":min", 3.0).unwrap();
      query.bind("min", 3.0).unwrap();
      assert_eq!(query.bound(1), Some(&Value::Integer(1)));
      assert_eq!(query.bound(2), Some(&Value::Real(3.0)));

      let mut values = Vec::new();
      while query.execute_step().unwrap() {
         values.push(query.column(0).unwrap().as_text());
      }
      assert_eq!(values, ["first", "third"]);
   }

   #[test]
   fn test_bind_unknown_parameter() {
      let db = seeded_db();
      let mut query = Statement::new(&db, "SELECT v FROM t WHERE id = :id").unwrap();

      let err = query.bind(2, 1).unwrap_err();
      assert_eq!(err.error_code(), "BIND_ERROR");
      assert_eq!(err.code(), ffi::SQLITE_RANGE);

      let err = query.bind(0, 1).unwrap_err();
      assert_eq!(err.code(), ffi::SQLITE_RANGE);

      let err = query.bind(":nope", 1).unwrap_err();
      assert!(err.to_string().contains(":nope"));
      assert!(query.bindings().is_empty());
   }

   #[test]
   fn test_bind_rewinds_running_statement() {
      let db = seeded_db();
      let mut query = Statement::new(&db, "SELECT v FROM t WHERE id = ?").unwrap();
      query.bind(1, 1).unwrap();
      query.step().unwrap();
      let stale = query.column(0).unwrap();

      query.bind(1, 2).unwrap();
      assert_eq!(query.state(), State::Ready);
      assert!(stale.is_stale());
      query.step().unwrap();
      assert_eq!(query.column(0).unwrap().as_text(), "second");

      query.step().unwrap();
      assert!(query.is_done());
      query.bind(1, 3).unwrap();
      query.step().unwrap();
      assert_eq!(query.column(0).unwrap().as_text(), "third");
   }

   #[test]
   fn test_reset_preserves_bindings() {
      let db = seeded_db();
      let mut query = Statement::new(&db, "SELECT v FROM t WHERE id = ?").unwrap();
      query.bind(1, 2).unwrap();
      query.step().unwrap();
      assert_eq!(query.column(0).unwrap().as_text(), "second");

      query.reset().unwrap();
      query.step().unwrap();
      assert_eq!(query.column(0).unwrap().as_text(), "second");
      assert_eq!(query.bound(1), Some(&Value::Integer(2)));
   }

   #[test]
   fn test_clear_bindings() {
      let db = seeded_db();
      let mut query = Statement::new(&db, "SELECT ?").unwrap();
      query.bind(1, "x").unwrap();
      query.clear_bindings().unwrap();
      assert!(query.bindings().is_empty());

      query.step().unwrap();
      assert!(query.is_column_null(0).unwrap());
   }

   #[test]
   fn test_bind_all_and_execute() {
      let db = seeded_db();
      let mut insert = Statement::new(&db, "INSERT INTO t (v, weight) VALUES (?, ?)").unwrap();
      insert
         .bind_all([Value::from("fourth"), Value::from(4.5)])
         .unwrap();
      assert_eq!(insert.execute().unwrap(), 1);
      assert_eq!(db.last_insert_rowid(), 4);
      assert!(!insert.is_readonly());

      let mut select = Statement::new(&db, "SELECT v FROM t").unwrap();
      assert!(select.is_readonly());
      assert!(select.execute().is_err());
   }

   #[test]
   fn test_bind_named_slice() {
      let db = seeded_db();
      let mut query =
         Statement::new(&db, "SELECT count(*) FROM t WHERE weight BETWEEN @lo AND $hi").unwrap();
      query.bind_named(&[("lo", 2.0), ("hi", 4.0)]).unwrap();
      query.step().unwrap();
      assert_eq!(query.column(0).unwrap().as_i64(), 2);
   }

   #[test]
   fn test_step_error_then_reset_error() {
      let db = seeded_db();
      let mut insert = Statement::new(&db, "INSERT INTO t (id, v) VALUES (?, 'dup')").unwrap();
      insert.bind(1, 1).unwrap();

      let err = insert.step().unwrap_err();
      assert_eq!(err.error_code(), "STEP_ERROR");
      assert_eq!(err.code(), ffi::SQLITE_CONSTRAINT);
      assert_eq!(err.extended_code(), ffi::SQLITE_CONSTRAINT_PRIMARYKEY);
      assert_eq!(insert.state(), State::Failed);
      assert!(insert.step().is_err());

      let err = insert.reset().unwrap_err();
      assert_eq!(err.error_code(), "RESET_ERROR");
      assert_eq!(insert.state(), State::Ready);

      insert.bind(1, 10).unwrap();
      assert_eq!(insert.execute().unwrap(), 1);
   }

   #[test]
   fn test_column_lookup_by_name_uses_aliases() {
      let db = seeded_db();
      let mut query =
         Statement::new(&db, "SELECT id AS key, v, weight AS w FROM t WHERE id = 3").unwrap();
      query.step().unwrap();

      assert_eq!(query.column_index("key").unwrap(), 0);
      assert_eq!(query.column_by_name("w").unwrap().as_f64(), 3.5);
      assert!(matches!(query.column_index("id"), Err(Error::ColumnName(_))));
      assert!(matches!(query.column_index("V"), Err(Error::ColumnName(_))));
      assert_eq!(query.column_name(1).unwrap(), "v");
      assert_eq!(query.column_decltype(1).unwrap().as_deref(), Some("TEXT"));
   }

   #[test]
   fn test_row_snapshot_and_expanded_sql() {
      let db = seeded_db();
      let mut query = Statement::new(&db, "SELECT id, v, weight FROM t WHERE id = ?").unwrap();
      query.bind(1, 2).unwrap();
      assert_eq!(query.sql(), "SELECT id, v, weight FROM t WHERE id = ?");
      assert_eq!(
         query.expanded_sql().as_deref(),
         Some("SELECT id, v, weight FROM t WHERE id = 2")
      );

      query.step().unwrap();
      assert_eq!(
         query.row().unwrap(),
         vec![
            Value::Integer(2),
            Value::Text("second".into()),
            Value::Real(2.5)
         ]
      );
   }

   #[test]
   fn test_schema_change_recompiles_result_columns() {
      let db = seeded_db();
      let mut query = Statement::new(&db, "SELECT * FROM t WHERE id = 1").unwrap();
      assert_eq!(query.column_count(), 3);
      assert!(matches!(query.column_index("note"), Err(Error::ColumnName(_))));

      db.exec("ALTER TABLE t ADD COLUMN note TEXT DEFAULT 'n/a'").unwrap();

      assert_eq!(query.step().unwrap(), Step::Row);
      assert_eq!(query.column_count(), 4);
      assert_eq!(query.column_index("note").unwrap(), 3);
      assert_eq!(query.column(3).unwrap().as_text(), "n/a");
      assert_eq!(query.column_by_name("note").unwrap().as_text(), "n/a");
      assert_eq!(query.row().unwrap().len(), 4);
      assert_eq!(query.row_to_json().unwrap().len(), 4);
   }
}
