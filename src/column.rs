//! Typed views of a result column.

use std::cmp::Ordering;
use std::ffi::c_int;
use std::fmt;
use std::rc::Rc;
use std::slice;

use libsqlite3_sys as ffi;

use crate::error::text_or_empty;
use crate::statement::RawStatement;
use crate::value::{ColumnType, Value};

/// A view of one column of the row a statement was on when the view was made.
///
/// The view shares ownership of the compiled statement, so it may outlive the
/// [`crate::Statement`] it came from. Its content belongs to a single row:
/// once the statement steps or resets, the view is *stale* and every
/// accessor reads as if the column were NULL. Metadata such as
/// [`name`](Column::name) stays available.
///
/// Accessors follow SQLite's own conversion rules, so `as_i64` on a text
/// column parses the leading digits and `as_text` on a number formats it.
#[derive(Clone)]
pub struct Column<'conn> {
   raw: Rc<RawStatement<'conn>>,
   index: c_int,
   generation: u64,
}

impl<'conn> Column<'conn> {
   pub(crate) fn new(raw: Rc<RawStatement<'conn>>, index: c_int) -> Self {
      let generation = raw.generation();
      Self {
         raw,
         index,
         generation,
      }
   }

   /// True once the statement moved past the row this view was made for.
   pub fn is_stale(&self) -> bool {
      self.raw.generation() != self.generation
   }

   /// 0-based index of the column in the result set.
   pub fn index(&self) -> usize {
      self.index as usize
   }

   /// Result name of the column (alias if one was given).
   pub fn name(&self) -> String {
      unsafe { text_or_empty(ffi::sqlite3_column_name(self.stmt(), self.index)) }
   }

   /// Declared type of the column, `None` for expressions.
   pub fn decltype(&self) -> Option<String> {
      let ptr = unsafe { ffi::sqlite3_column_decltype(self.stmt(), self.index) };
      (!ptr.is_null()).then(|| unsafe { text_or_empty(ptr) })
   }

   /// Name of the table column this result is read from.
   #[cfg(feature = "column-metadata")]
   pub fn origin_name(&self) -> Option<String> {
      let ptr = unsafe { ffi::sqlite3_column_origin_name(self.stmt(), self.index) };
      (!ptr.is_null()).then(|| unsafe { text_or_empty(ptr) })
   }

   /// Storage class of the value, `Null` for a stale view.
   pub fn column_type(&self) -> ColumnType {
      if self.is_stale() {
         return ColumnType::Null;
      }
      ColumnType::from_raw(unsafe { ffi::sqlite3_column_type(self.stmt(), self.index) })
   }

   pub fn is_null(&self) -> bool {
      self.column_type() == ColumnType::Null
   }

   pub fn is_integer(&self) -> bool {
      self.column_type() == ColumnType::Integer
   }

   pub fn is_float(&self) -> bool {
      self.column_type() == ColumnType::Float
   }

   pub fn is_text(&self) -> bool {
      self.column_type() == ColumnType::Text
   }

   pub fn is_blob(&self) -> bool {
      self.column_type() == ColumnType::Blob
   }

   /// 64-bit integer value, 0 for NULL.
   pub fn as_i64(&self) -> i64 {
      if self.is_stale() {
         return 0;
      }
      unsafe { ffi::sqlite3_column_int64(self.stmt(), self.index) }
   }

   /// 32-bit integer value, truncated the way SQLite truncates.
   pub fn as_i32(&self) -> i32 {
      if self.is_stale() {
         return 0;
      }
      unsafe { ffi::sqlite3_column_int(self.stmt(), self.index) }
   }

   /// Floating point value, 0.0 for NULL.
   pub fn as_f64(&self) -> f64 {
      if self.is_stale() {
         return 0.0;
      }
      unsafe { ffi::sqlite3_column_double(self.stmt(), self.index) }
   }

   /// Text value, empty for NULL. Invalid UTF-8 is replaced.
   pub fn as_text(&self) -> String {
      String::from_utf8_lossy(&self.as_blob_with(ffi::sqlite3_column_text)).into_owned()
   }

   /// Raw bytes of the value, empty for NULL.
   pub fn as_blob(&self) -> Vec<u8> {
      self.as_blob_with(ffi::sqlite3_column_blob)
   }

   /// Size in bytes of the text or blob representation.
   pub fn size(&self) -> usize {
      if self.is_stale() {
         return 0;
      }
      usize::try_from(unsafe { ffi::sqlite3_column_bytes(self.stmt(), self.index) }).unwrap_or(0)
   }

   /// Owned copy of the value in its stored type.
   pub fn value(&self) -> Value {
      match self.column_type() {
         ColumnType::Null => Value::Null,
         ColumnType::Integer => Value::Integer(self.as_i64()),
         ColumnType::Float => Value::Real(self.as_f64()),
         ColumnType::Text => Value::Text(self.as_text()),
         ColumnType::Blob => Value::Blob(self.as_blob()),
      }
   }

   fn as_blob_with<T>(
      &self,
      read: unsafe extern "C" fn(*mut ffi::sqlite3_stmt, c_int) -> *const T,
   ) -> Vec<u8> {
      if self.is_stale() {
         return Vec::new();
      }
      unsafe {
         // The pointer is only valid until the next conversion, so the size
         // is read after it and the bytes are copied right away.
         let ptr = read(self.stmt(), self.index);
         let len = usize::try_from(ffi::sqlite3_column_bytes(self.stmt(), self.index)).unwrap_or(0);
         if ptr.is_null() || len == 0 {
            return Vec::new();
         }
         slice::from_raw_parts(ptr.cast::<u8>(), len).to_vec()
      }
   }

   fn stmt(&self) -> *mut ffi::sqlite3_stmt {
      self.raw.as_ptr()
   }
}

impl fmt::Debug for Column<'_> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Column")
         .field("index", &self.index)
         .field("name", &self.name())
         .field("value", &self.value())
         .field("stale", &self.is_stale())
         .finish()
   }
}

impl fmt::Display for Column<'_> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      fmt::Display::fmt(&self.value(), f)
   }
}

impl PartialEq for Column<'_> {
   fn eq(&self, other: &Self) -> bool {
      self.value() == other.value()
   }
}

impl PartialEq<Value> for Column<'_> {
   fn eq(&self, other: &Value) -> bool {
      self.value() == *other
   }
}

impl PartialOrd for Column<'_> {
   fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
      self.value().partial_cmp(&other.value())
   }
}

impl From<&Column<'_>> for Value {
   fn from(column: &Column<'_>) -> Self {
      column.value()
   }
}
