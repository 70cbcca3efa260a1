//! Owned SQLite values and storage classes.

use std::cmp::Ordering;
use std::ffi::c_int;
use std::fmt;

use libsqlite3_sys as ffi;

/// Storage class of a value, as reported by `sqlite3_column_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
   Integer,
   Float,
   Text,
   Blob,
   Null,
}

impl ColumnType {
   pub(crate) fn from_raw(raw: c_int) -> Self {
      match raw {
         ffi::SQLITE_INTEGER => ColumnType::Integer,
         ffi::SQLITE_FLOAT => ColumnType::Float,
         ffi::SQLITE_TEXT => ColumnType::Text,
         ffi::SQLITE_BLOB => ColumnType::Blob,
         _ => ColumnType::Null,
      }
   }
}

/// Typed value used for binding parameters and for copies of column values.
///
/// This is the tagged variant behind variadic binding: a sequence of `Value`s
/// can be bound in one call with [`crate::Statement::bind_all`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
   #[default]
   Null,
   Integer(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl Value {
   /// Storage class of this value.
   pub fn column_type(&self) -> ColumnType {
      match self {
         Value::Null => ColumnType::Null,
         Value::Integer(_) => ColumnType::Integer,
         Value::Real(_) => ColumnType::Float,
         Value::Text(_) => ColumnType::Text,
         Value::Blob(_) => ColumnType::Blob,
      }
   }

   /// Returns true if this value is null.
   pub fn is_null(&self) -> bool {
      matches!(self, Value::Null)
   }

   /// Attempts to get this value as an integer.
   pub fn as_integer(&self) -> Option<i64> {
      match self {
         Value::Integer(i) => Some(*i),
         _ => None,
      }
   }

   /// Attempts to get this value as a float.
   pub fn as_real(&self) -> Option<f64> {
      match self {
         Value::Real(r) => Some(*r),
         _ => None,
      }
   }

   /// Attempts to get this value as a string reference.
   pub fn as_text(&self) -> Option<&str> {
      match self {
         Value::Text(s) => Some(s),
         _ => None,
      }
   }

   /// Attempts to get this value as a blob reference.
   pub fn as_blob(&self) -> Option<&[u8]> {
      match self {
         Value::Blob(b) => Some(b),
         _ => None,
      }
   }

   // Sort class used by SQLite when comparing values of different types.
   fn rank(&self) -> u8 {
      match self {
         Value::Null => 0,
         Value::Integer(_) | Value::Real(_) => 1,
         Value::Text(_) => 2,
         Value::Blob(_) => 3,
      }
   }
}

/// Orders values the way SQLite does with the BINARY collation:
/// NULL, then numbers (integers and reals compared numerically), then text,
/// then blobs.
impl PartialOrd for Value {
   fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
      match (self, other) {
         (Value::Null, Value::Null) => Some(Ordering::Equal),
         (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
         (Value::Integer(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
         (Value::Real(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
         (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
         (Value::Text(a), Value::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
         (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
         _ => Some(self.rank().cmp(&other.rank())),
      }
   }
}

impl fmt::Display for Value {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Value::Null => Ok(()),
         Value::Integer(i) => write!(f, "{i}"),
         Value::Real(r) => write!(f, "{r}"),
         Value::Text(s) => f.write_str(s),
         Value::Blob(b) => f.write_str(&String::from_utf8_lossy(b)),
      }
   }
}

impl From<i64> for Value {
   fn from(value: i64) -> Self {
      Value::Integer(value)
   }
}

impl From<i32> for Value {
   fn from(value: i32) -> Self {
      Value::Integer(i64::from(value))
   }
}

impl From<u32> for Value {
   fn from(value: u32) -> Self {
      Value::Integer(i64::from(value))
   }
}

impl From<bool> for Value {
   fn from(value: bool) -> Self {
      Value::Integer(i64::from(value))
   }
}

impl From<f64> for Value {
   fn from(value: f64) -> Self {
      Value::Real(value)
   }
}

impl From<&str> for Value {
   fn from(value: &str) -> Self {
      Value::Text(value.to_owned())
   }
}

impl From<String> for Value {
   fn from(value: String) -> Self {
      Value::Text(value)
   }
}

impl From<&[u8]> for Value {
   fn from(value: &[u8]) -> Self {
      Value::Blob(value.to_vec())
   }
}

impl From<Vec<u8>> for Value {
   fn from(value: Vec<u8>) -> Self {
      Value::Blob(value)
   }
}

impl<T: Into<Value>> From<Option<T>> for Value {
   fn from(value: Option<T>) -> Self {
      value.map_or(Value::Null, Into::into)
   }
}
