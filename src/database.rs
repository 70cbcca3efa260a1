//! SQLite connection handle

use std::ffi::{CString, c_int};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::ptr;
use std::time::Duration;

use libsqlite3_sys as ffi;
use tracing::{debug, trace};

use crate::assertion::sqlite_assert;
use crate::column::Column;
use crate::config::OpenOptions;
use crate::error::{EngineError, Error, Result, text_or_empty};
use crate::statement::Statement;

/// Filename of a private, temporary in-memory database.
pub const MEMORY: &str = ":memory:";

/// Filename of a private, temporary on-disk database.
pub const TEMPORARY: &str = "";

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// An open SQLite connection.
///
/// ## Ownership
///
/// - **`db`**: the engine handle, exclusively owned and closed exactly once on drop
/// - **`filename`**: the UTF-8 filename or URI the connection was opened with
///
/// Statements, columns, transactions and backups borrow the `Database`, so it
/// cannot be dropped while any of them is alive. If the engine nevertheless
/// refuses to close (statements prepared through [`Database::handle`] and never
/// finalized), the failure is reported through the assertion handler and the
/// handle is released once those statements are finalized.
///
/// ## Threading
///
/// A `Database` may be moved to another thread but never shared: it is `Send`
/// and not `Sync`, and no internal locking is performed.
///
/// ## Usage Pattern
///
/// ```text
/// 1. Open with OpenOptions (flags, busy timeout, VFS)
/// 2. exec() for statements without results, Statement::new() for queries
/// 3. Drop to close
/// ```
#[derive(Debug)]
pub struct Database {
   db: *mut ffi::sqlite3,
   filename: String,
}

// SAFETY: SQLite is built thread-safe and a connection may be used from any
// thread as long as it is not used from two threads at once. `Database` is not
// `Sync` and everything borrowing it is `!Send`, so that holds.
unsafe impl Send for Database {}

impl Database {
   /// Open a database with the given options.
   ///
   /// The default options open read-only, so a missing file fails with
   /// [`Error::Open`] instead of creating an empty database. The half-opened
   /// engine handle is released before the error is returned.
   pub fn open<P: AsRef<Path>>(path: P, options: &OpenOptions) -> Result<Self> {
      let filename = path
         .as_ref()
         .to_str()
         .ok_or_else(|| Error::Other(format!("non UTF-8 database path: {:?}", path.as_ref())))?
         .to_owned();

      let c_filename = CString::new(filename.as_str())?;
      let c_vfs = options.vfs.as_deref().map(CString::new).transpose()?;

      let mut db: *mut ffi::sqlite3 = ptr::null_mut();
      let rc = unsafe {
         ffi::sqlite3_open_v2(
            c_filename.as_ptr(),
            &mut db,
            options.flags.bits(),
            c_vfs.as_ref().map_or(ptr::null(), |vfs| vfs.as_ptr()),
         )
      };

      if rc != ffi::SQLITE_OK {
         // Whether or not open succeeded, the handle must be released.
         let error = unsafe { EngineError::from_handle_with_code(db, rc) };
         unsafe {
            ffi::sqlite3_close(db);
         }
         debug!(filename = %filename, error = %error, "Failed to open database");
         return Err(Error::Open(error));
      }

      unsafe {
         ffi::sqlite3_extended_result_codes(db, 1);
      }

      let database = Self { db, filename };
      if !options.busy_timeout.is_zero() {
         database.set_busy_timeout(options.busy_timeout)?;
      }

      debug!(
         filename = %database.filename,
         flags = options.flags.bits(),
         busy_timeout_ms = options.busy_timeout.as_millis() as u64,
         "Opened database"
      );
      Ok(database)
   }

   /// Open a private in-memory database.
   pub fn open_in_memory() -> Result<Self> {
      Self::open(MEMORY, &OpenOptions::read_write_create())
   }

   /// Open a private on-disk database deleted when the connection closes.
   pub fn open_temporary() -> Result<Self> {
      Self::open(TEMPORARY, &OpenOptions::read_write_create())
   }

   /// Set how long to wait and retry when a table is locked by another connection.
   ///
   /// After the timeout expires the blocked operation reports `SQLITE_BUSY`.
   /// A zero duration turns waiting off.
   pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
      let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
      let rc = unsafe { ffi::sqlite3_busy_timeout(self.db, millis) };
      self.check(rc).map_err(Error::Execute)
   }

   /// Execute one or more semicolon-separated statements without results.
   ///
   /// Returns the number of rows modified by the *last* INSERT, UPDATE or
   /// DELETE. For CREATE/DROP and other DDL the value is left over from the
   /// previous modifying statement.
   pub fn exec(&self, sql: &str) -> Result<usize> {
      let c_sql = CString::new(sql)?;
      let rc = unsafe {
         ffi::sqlite3_exec(
            self.db,
            c_sql.as_ptr(),
            None,
            ptr::null_mut(),
            ptr::null_mut(),
         )
      };
      trace!(sql, rc, "exec");
      self.check(rc).map_err(Error::Execute)?;
      Ok(self.changes())
   }

   /// Execute a query and return the first column of its first row.
   ///
   /// The returned [`Column`] keeps the compiled statement alive on its own,
   /// so it stays readable after the temporary statement is gone. Fails with
   /// [`Error::NoRow`] if the query produces no row.
   pub fn exec_and_get(&self, sql: &str) -> Result<Column<'_>> {
      let mut statement = Statement::new(self, sql)?;
      statement.step()?;
      statement.column(0)
   }

   /// Test whether a table exists. Table names are case sensitive.
   pub fn table_exists(&self, table: &str) -> Result<bool> {
      let mut query = Statement::new(
         self,
         "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
      )?;
      query.bind(1, table)?;
      query.step()?;
      Ok(query.column(0)?.as_i64() == 1)
   }

   /// Rowid of the most recent successful INSERT on this connection, or 0.
   pub fn last_insert_rowid(&self) -> i64 {
      unsafe { ffi::sqlite3_last_insert_rowid(self.db) }
   }

   /// Rows modified by the most recent INSERT, UPDATE or DELETE.
   pub fn changes(&self) -> usize {
      usize::try_from(unsafe { ffi::sqlite3_changes(self.db) }).unwrap_or(0)
   }

   /// Rows modified by all INSERT, UPDATE or DELETE statements since opening.
   pub fn total_changes(&self) -> usize {
      usize::try_from(unsafe { ffi::sqlite3_total_changes(self.db) }).unwrap_or(0)
   }

   /// Primary result code of the most recent failed call.
   pub fn error_code(&self) -> c_int {
      unsafe { ffi::sqlite3_errcode(self.db) & 0xff }
   }

   /// Extended result code of the most recent failed call.
   pub fn extended_error_code(&self) -> c_int {
      unsafe { ffi::sqlite3_extended_errcode(self.db) }
   }

   /// English explanation of the most recent failed call.
   pub fn error_message(&self) -> String {
      unsafe { text_or_empty(ffi::sqlite3_errmsg(self.db)) }
   }

   /// The filename used to open the database.
   pub fn filename(&self) -> &str {
      &self.filename
   }

   /// Raw connection handle, for use with other SQLite libraries.
   ///
   /// Statements prepared on this handle must be finalized before the
   /// `Database` is dropped.
   pub fn handle(&self) -> *mut ffi::sqlite3 {
      self.db
   }

   /// Load a shared-library extension into this connection.
   ///
   /// Only the C-API loader is enabled; the `load_extension()` SQL function
   /// stays disabled.
   #[cfg(feature = "load-extension")]
   pub fn load_extension(&self, path: &str, entry_point: Option<&str>) -> Result<()> {
      use std::ffi::c_char;

      use tracing::warn;

      let rc = unsafe {
         ffi::sqlite3_db_config(
            self.db,
            ffi::SQLITE_DBCONFIG_ENABLE_LOAD_EXTENSION,
            1 as c_int,
            ptr::null_mut::<c_int>(),
         )
      };
      self.check(rc).map_err(Error::Function)?;

      let c_path = CString::new(path)?;
      let c_entry = entry_point.map(CString::new).transpose()?;
      let mut errmsg: *mut c_char = ptr::null_mut();
      let rc = unsafe {
         ffi::sqlite3_load_extension(
            self.db,
            c_path.as_ptr(),
            c_entry.as_ref().map_or(ptr::null(), |e| e.as_ptr()),
            &mut errmsg,
         )
      };

      if rc != ffi::SQLITE_OK {
         let message = unsafe { text_or_empty(errmsg) };
         unsafe {
            ffi::sqlite3_free(errmsg.cast());
         }
         warn!(path, error = %message, "Failed to load extension");
         return Err(Error::Function(EngineError::new(rc & 0xff, message)));
      }

      debug!(path, "Loaded extension");
      Ok(())
   }

   /// Set the encryption key. Call directly after opening.
   ///
   /// An empty key is a no-op.
   pub fn key(&self, key: &str) -> Result<()> {
      if key.is_empty() {
         return Ok(());
      }
      self.apply_key(key)
   }

   /// Change the encryption key. An empty key decrypts the database.
   pub fn rekey(&self, new_key: &str) -> Result<()> {
      self.apply_rekey(new_key)
   }

   #[cfg(feature = "codec")]
   fn apply_key(&self, key: &str) -> Result<()> {
      let len = c_int::try_from(key.len()).map_err(|_| Error::Other("key too long".into()))?;
      let rc = unsafe { codec::sqlite3_key(self.db, key.as_ptr().cast(), len) };
      self.check(rc).map_err(Error::Execute)
   }

   #[cfg(not(feature = "codec"))]
   fn apply_key(&self, _key: &str) -> Result<()> {
      Err(Error::EncryptionUnsupported)
   }

   #[cfg(feature = "codec")]
   fn apply_rekey(&self, new_key: &str) -> Result<()> {
      let rc = if new_key.is_empty() {
         unsafe { codec::sqlite3_rekey(self.db, ptr::null(), 0) }
      } else {
         let len =
            c_int::try_from(new_key.len()).map_err(|_| Error::Other("key too long".into()))?;
         unsafe { codec::sqlite3_rekey(self.db, new_key.as_ptr().cast(), len) }
      };
      self.check(rc).map_err(Error::Execute)
   }

   #[cfg(not(feature = "codec"))]
   fn apply_rekey(&self, _new_key: &str) -> Result<()> {
      Err(Error::EncryptionUnsupported)
   }

   /// Test whether a file starts with the plain SQLite header.
   ///
   /// Encrypted databases do not carry the header. An empty path is an error.
   pub fn is_unencrypted<P: AsRef<Path>>(path: P) -> Result<bool> {
      let path = path.as_ref();
      if path.as_os_str().is_empty() {
         return Err(Error::Other(
            "could not open database, the path parameter was empty".into(),
         ));
      }

      let mut header = Vec::with_capacity(SQLITE_HEADER.len());
      File::open(path)?
         .take(SQLITE_HEADER.len() as u64)
         .read_to_end(&mut header)?;
      Ok(header.as_slice() == SQLITE_HEADER)
   }

   /// Maps a result code to `Ok` or to the connection's current error.
   pub(crate) fn check(&self, rc: c_int) -> std::result::Result<(), EngineError> {
      if rc == ffi::SQLITE_OK {
         Ok(())
      } else {
         Err(unsafe { EngineError::from_handle_with_code(self.db, rc) })
      }
   }
}

impl Drop for Database {
   fn drop(&mut self) {
      let rc = unsafe { ffi::sqlite3_close(self.db) };
      if rc == ffi::SQLITE_OK {
         debug!(filename = %self.filename, "Closed database");
         return;
      }

      // Unfinalized statements keep the connection busy. Hand it over to
      // close_v2 so it is released with the last statement, then report.
      let error = unsafe { EngineError::from_handle_with_code(self.db, rc) };
      unsafe {
         raw::sqlite3_close_v2(self.db);
      }
      sqlite_assert!(rc == ffi::SQLITE_OK, error.message);
   }
}

/// Return the SQLite version string of the linked library.
pub fn lib_version() -> String {
   unsafe { text_or_empty(ffi::sqlite3_libversion()) }
}

/// Return the SQLite version number of the linked library (3.8.11.1 is 3008011).
pub fn lib_version_number() -> i32 {
   unsafe { ffi::sqlite3_libversion_number() }
}

// Not exported by the generated bindings.
mod raw {
   use std::ffi::c_int;

   use libsqlite3_sys::sqlite3;

   unsafe extern "C" {
      pub fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
   }
}

#[cfg(feature = "codec")]
mod codec {
   use std::ffi::{c_int, c_void};

   use libsqlite3_sys::sqlite3;

   unsafe extern "C" {
      pub fn sqlite3_key(db: *mut sqlite3, key: *const c_void, len: c_int) -> c_int;
      pub fn sqlite3_rekey(db: *mut sqlite3, key: *const c_void, len: c_int) -> c_int;
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use tempfile::TempDir;

   fn create_test_db() -> (Database, TempDir) {
      let temp_dir = TempDir::new().expect("Failed to create temp directory");
      let db_path = temp_dir.path().join("test.db3");
      let db = Database::open(&db_path, &OpenOptions::read_write_create())
         .expect("Failed to open test database");
      (db, temp_dir)
   }

   #[test]
   fn test_open_missing_file_read_only_fails() {
      let temp_dir = TempDir::new().unwrap();
      let err = Database::open(temp_dir.path().join("missing.db3"), &OpenOptions::default())
         .unwrap_err();

      assert_eq!(err.error_code(), "OPEN_ERROR");
      assert_eq!(err.code(), ffi::SQLITE_CANTOPEN);
   }

   #[test]
   fn test_open_create_yields_empty_schema() {
      let (db, _temp) = create_test_db();
      assert!(!db.table_exists("t").unwrap());
      assert_eq!(
         db.exec_and_get("SELECT count(*) FROM sqlite_master").unwrap().as_i64(),
         0
      );
      assert!(db.filename().ends_with("test.db3"));
   }

   #[test]
   fn test_exec_returns_changes_of_last_statement() {
      let (db, _temp) = create_test_db();
      db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();

      assert_eq!(db.exec("INSERT INTO t (v) VALUES ('first')").unwrap(), 1);
      assert_eq!(db.last_insert_rowid(), 1);
      assert_eq!(db.exec("INSERT INTO t (v) VALUES ('second')").unwrap(), 1);
      assert_eq!(db.last_insert_rowid(), 2);

      assert_eq!(db.exec("UPDATE t SET v = 'x'").unwrap(), 2);
      // DDL leaves the previous count in place
      assert_eq!(db.exec("CREATE TABLE u (id INTEGER)").unwrap(), 2);
      assert_eq!(db.total_changes(), 4);

      assert_eq!(
         db.exec("INSERT INTO u VALUES (1); INSERT INTO u VALUES (2), (3);")
            .unwrap(),
         2
      );
   }

   #[test]
   fn test_exec_error_is_reported_and_recorded() {
      let db = Database::open_in_memory().unwrap();
      let err = db.exec("INSERT INTO nowhere VALUES (1)").unwrap_err();

      assert_eq!(err.error_code(), "EXECUTE_ERROR");
      assert_eq!(err.code(), ffi::SQLITE_ERROR);
      assert!(err.to_string().contains("no such table"));
      assert_eq!(db.error_code(), ffi::SQLITE_ERROR);
      assert!(db.error_message().contains("no such table"));
   }

   #[test]
   fn test_exec_and_get_outlives_statement() {
      let db = Database::open_in_memory().unwrap();
      db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); INSERT INTO t (v) VALUES ('second')")
         .unwrap();

      let value = db.exec_and_get("SELECT v FROM t WHERE id = 1").unwrap();
      assert_eq!(value.as_text(), "second");
      assert_eq!(value.name(), "v");

      let err = db.exec_and_get("SELECT v FROM t WHERE id = 99").unwrap_err();
      assert_eq!(err.error_code(), "NO_ROW");
   }

   #[test]
   fn test_table_exists_is_case_sensitive() {
      let db = Database::open_in_memory().unwrap();
      db.exec("CREATE TABLE test (id INTEGER)").unwrap();
      assert!(db.table_exists("test").unwrap());
      assert!(!db.table_exists("TEST").unwrap());
   }

   #[test]
   fn test_busy_timeout_is_applied() {
      let temp_dir = TempDir::new().unwrap();
      let options = OpenOptions::read_write_create().with_busy_timeout(Duration::from_millis(250));
      let db = Database::open(temp_dir.path().join("busy.db3"), &options).unwrap();
      assert_eq!(
         db.exec_and_get("PRAGMA busy_timeout").unwrap().as_i64(),
         250
      );

      db.set_busy_timeout(Duration::ZERO).unwrap();
      assert_eq!(db.exec_and_get("PRAGMA busy_timeout").unwrap().as_i64(), 0);
   }

   #[test]
   fn test_unknown_vfs_fails_to_open() {
      let options = OpenOptions::read_write_create().with_vfs("no-such-vfs");
      let err = Database::open(MEMORY, &options).unwrap_err();
      assert_eq!(err.error_code(), "OPEN_ERROR");
   }

   #[test]
   fn test_is_unencrypted() {
      let (db, temp) = create_test_db();
      db.exec("CREATE TABLE t (id INTEGER)").unwrap();
      drop(db);
      assert!(Database::is_unencrypted(temp.path().join("test.db3")).unwrap());

      let other = temp.path().join("garbage.bin");
      std::fs::write(&other, b"definitely not a database").unwrap();
      assert!(!Database::is_unencrypted(&other).unwrap());

      assert!(matches!(Database::is_unencrypted(""), Err(Error::Other(_))));
      assert!(matches!(
         Database::is_unencrypted(temp.path().join("missing")),
         Err(Error::Io(_))
      ));
   }

   #[cfg(not(feature = "codec"))]
   #[test]
   fn test_key_without_codec() {
      let db = Database::open_in_memory().unwrap();
      db.key("").unwrap();
      assert!(matches!(db.key("secret"), Err(Error::EncryptionUnsupported)));
      assert!(matches!(db.rekey(""), Err(Error::EncryptionUnsupported)));
   }

   #[test]
   fn test_lib_version() {
      assert!(lib_version().starts_with('3'));
      assert!(lib_version_number() >= 3_008_000);
   }
}
