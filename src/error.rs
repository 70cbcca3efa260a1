//! Error types for scoped-sqlite.
//!
//! Every engine call that can fail is checked immediately and translated into
//! an [`Error`] variant naming the operation that failed. The engine's result
//! code, extended result code and message travel inside an [`EngineError`].

use std::ffi::{CStr, c_int};
use std::fmt;

use libsqlite3_sys as ffi;

/// Result type alias for scoped-sqlite operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result code, extended result code and message reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
   /// Primary result code (`SQLITE_*`).
   pub code: c_int,
   /// Extended result code, when the engine provided one.
   pub extended_code: Option<c_int>,
   /// English explanation from the engine.
   pub message: String,
}

impl EngineError {
   /// Builds an error from an explicit code and message.
   pub fn new(code: c_int, message: impl Into<String>) -> Self {
      Self {
         code,
         extended_code: None,
         message: message.into(),
      }
   }

   /// Builds an error from a bare result code, using `sqlite3_errstr` for the message.
   pub fn from_code(code: c_int) -> Self {
      Self {
         code: code & 0xff,
         extended_code: (code > 0xff).then_some(code),
         message: errstr(code),
      }
   }

   /// Reads the most recent error recorded on a connection.
   ///
   /// # Safety
   ///
   /// `db` must be null or a connection handle that has not been closed.
   pub(crate) unsafe fn from_handle(db: *mut ffi::sqlite3) -> Self {
      if db.is_null() {
         return Self::from_code(ffi::SQLITE_NOMEM);
      }
      unsafe {
         // With extended result codes enabled sqlite3_errcode reports the
         // extended value; keep the primary code in its own field.
         let code = ffi::sqlite3_errcode(db) & 0xff;
         let extended = ffi::sqlite3_extended_errcode(db);
         Self {
            code,
            extended_code: Some(extended),
            message: text_or_empty(ffi::sqlite3_errmsg(db)),
         }
      }
   }

   /// Reads the connection error but keeps `code` as the authoritative code.
   ///
   /// Some entry points return a code without recording it on the connection
   /// (`sqlite3_backup_step`, or `sqlite3_step` on a statement that needs a
   /// reset), in which case the engine's generic text for `code` is used.
   ///
   /// # Safety
   ///
   /// Same contract as [`EngineError::from_handle`].
   pub(crate) unsafe fn from_handle_with_code(db: *mut ffi::sqlite3, code: c_int) -> Self {
      let recorded = unsafe { Self::from_handle(db) };
      if recorded.code == code & 0xff {
         return recorded;
      }
      Self::from_code(code)
   }

   /// True for `SQLITE_BUSY` and `SQLITE_LOCKED`.
   pub fn is_busy(&self) -> bool {
      matches!(self.code, ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED)
   }
}

impl fmt::Display for EngineError {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.extended_code {
         Some(ext) if ext != self.code => {
            write!(f, "{} (code {}, extended {})", self.message, self.code, ext)
         }
         _ => write!(f, "{} (code {})", self.message, self.code),
      }
   }
}

/// Errors that may occur when working with scoped-sqlite.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The database could not be opened.
   #[error("failed to open database: {0}")]
   Open(EngineError),

   /// The SQL text could not be compiled.
   #[error("failed to compile statement: {0}")]
   Compile(EngineError),

   /// A parameter ordinal or name does not exist, or the value was rejected.
   #[error("failed to bind parameter: {0}")]
   Bind(EngineError),

   /// Executing a step failed. The statement must be reset before stepping again.
   #[error("failed to step statement: {0}")]
   Step(EngineError),

   /// Resetting surfaced an error left over from the previous execution.
   #[error("failed to reset statement: {0}")]
   Reset(EngineError),

   /// A column was requested while the cursor is not on a row.
   #[error("no row available: {0}")]
   NoRow(String),

   /// The engine rejected a COMMIT.
   #[error("failed to commit transaction: {0}")]
   Commit(EngineError),

   /// Initializing or stepping a backup failed.
   #[error("backup failed: {0}")]
   Backup(EngineError),

   /// One-shot execution (`exec`, BEGIN, ROLLBACK, busy timeout...) failed.
   #[error("failed to execute: {0}")]
   Execute(EngineError),

   /// Registering a user-defined function or loading an extension failed.
   #[error("failed to register function or extension: {0}")]
   Function(EngineError),

   /// Column index outside the result set.
   #[error("column index {index} out of range, statement has {count} columns")]
   ColumnRange { index: usize, count: usize },

   /// No result column carries this name.
   #[error("unknown column name '{0}'")]
   ColumnName(String),

   /// A single-row query produced more than one row.
   #[error("fetch_one() query returned {0} rows, expected 0 or 1")]
   MultipleRowsReturned(usize),

   /// Encryption was requested but SQLite was built without a codec.
   #[error("no encryption support, enable the `codec` feature")]
   EncryptionUnsupported,

   /// A string passed to the engine contains an interior NUL byte.
   #[error("string contains an interior nul byte: {0}")]
   Nul(#[from] std::ffi::NulError),

   /// I/O error when reading database files directly.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// The engine error carried by this failure, if any.
   pub fn engine(&self) -> Option<&EngineError> {
      match self {
         Error::Open(e)
         | Error::Compile(e)
         | Error::Bind(e)
         | Error::Step(e)
         | Error::Reset(e)
         | Error::Commit(e)
         | Error::Backup(e)
         | Error::Execute(e)
         | Error::Function(e) => Some(e),
         _ => None,
      }
   }

   /// Primary result code, or -1 for failures not reported by the engine.
   pub fn code(&self) -> c_int {
      self.engine().map_or(-1, |e| e.code)
   }

   /// Extended result code, or -1 when none is known.
   pub fn extended_code(&self) -> c_int {
      self.engine().and_then(|e| e.extended_code).unwrap_or(-1)
   }

   /// True when the engine gave up on a lock held by another connection.
   pub fn is_busy(&self) -> bool {
      self.engine().is_some_and(EngineError::is_busy)
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Open(_) => "OPEN_ERROR".to_string(),
         Error::Compile(_) => "COMPILE_ERROR".to_string(),
         Error::Bind(_) => "BIND_ERROR".to_string(),
         Error::Step(_) => "STEP_ERROR".to_string(),
         Error::Reset(_) => "RESET_ERROR".to_string(),
         Error::NoRow(_) => "NO_ROW".to_string(),
         Error::Commit(_) => "COMMIT_ERROR".to_string(),
         Error::Backup(_) => "BACKUP_ERROR".to_string(),
         Error::Execute(_) => "EXECUTE_ERROR".to_string(),
         Error::Function(_) => "FUNCTION_ERROR".to_string(),
         Error::ColumnRange { .. } => "COLUMN_RANGE".to_string(),
         Error::ColumnName(_) => "COLUMN_NAME".to_string(),
         Error::MultipleRowsReturned(_) => "MULTIPLE_ROWS_RETURNED".to_string(),
         Error::EncryptionUnsupported => "ENCRYPTION_UNSUPPORTED".to_string(),
         Error::Nul(_) => "NUL_BYTE".to_string(),
         Error::Io(_) => "IO_ERROR".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }
}

/// English description of a result code.
pub(crate) fn errstr(code: c_int) -> String {
   unsafe { text_or_empty(ffi::sqlite3_errstr(code)) }
}

/// Copies a nul-terminated engine string, treating null as empty.
///
/// # Safety
///
/// `ptr` must be null or point to a valid nul-terminated string.
pub(crate) unsafe fn text_or_empty(ptr: *const std::ffi::c_char) -> String {
   if ptr.is_null() {
      String::new()
   } else {
      unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
   }
}
