//! Configuration for opening SQLite connections

use std::ffi::c_int;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use libsqlite3_sys as ffi;
use serde::{Deserialize, Serialize};

/// Access-mode flags passed to `sqlite3_open_v2`.
///
/// Combine with `|`:
///
/// ```
/// use scoped_sqlite::OpenFlags;
///
/// let flags = OpenFlags::READ_WRITE | OpenFlags::CREATE;
/// assert!(flags.contains(OpenFlags::CREATE));
/// assert!(!flags.contains(OpenFlags::READ_ONLY));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenFlags(c_int);

impl OpenFlags {
   /// Open for reading only. Fails if the file does not exist.
   pub const READ_ONLY: Self = Self(ffi::SQLITE_OPEN_READONLY);
   /// Open for reading and writing.
   pub const READ_WRITE: Self = Self(ffi::SQLITE_OPEN_READWRITE);
   /// Create the file if it does not exist. Only meaningful with `READ_WRITE`.
   pub const CREATE: Self = Self(ffi::SQLITE_OPEN_CREATE);
   /// Interpret the filename as a `file:` URI.
   pub const URI: Self = Self(ffi::SQLITE_OPEN_URI);
   /// Open an in-memory database, using the filename only as a name.
   pub const MEMORY: Self = Self(ffi::SQLITE_OPEN_MEMORY);
   /// Multi-thread mode: the connection is used by one thread at a time.
   pub const NO_MUTEX: Self = Self(ffi::SQLITE_OPEN_NOMUTEX);
   /// Serialized mode.
   pub const FULL_MUTEX: Self = Self(ffi::SQLITE_OPEN_FULLMUTEX);

   /// Builds flags from raw `SQLITE_OPEN_*` bits.
   pub const fn from_bits(bits: c_int) -> Self {
      Self(bits)
   }

   /// Raw `SQLITE_OPEN_*` bits.
   pub const fn bits(self) -> c_int {
      self.0
   }

   /// True if every bit of `other` is set.
   pub const fn contains(self, other: Self) -> bool {
      self.0 & other.0 == other.0
   }
}

impl Default for OpenFlags {
   fn default() -> Self {
      Self::READ_ONLY
   }
}

impl BitOr for OpenFlags {
   type Output = Self;

   fn bitor(self, rhs: Self) -> Self {
      Self(self.0 | rhs.0)
   }
}

impl BitOrAssign for OpenFlags {
   fn bitor_assign(&mut self, rhs: Self) {
      self.0 |= rhs.0;
   }
}

/// Options for [`crate::Database::open`].
///
/// # Examples
///
/// ```
/// use scoped_sqlite::{OpenFlags, OpenOptions};
/// use std::time::Duration;
///
/// // Use defaults: read-only, no busy timeout, default VFS
/// let options = OpenOptions::default();
///
/// // Customize specific fields
/// let options = OpenOptions {
///     flags: OpenFlags::READ_WRITE | OpenFlags::CREATE,
///     busy_timeout: Duration::from_millis(500),
///     ..Default::default()
/// };
///
/// // Or with the helpers
/// let options = OpenOptions::read_write_create().with_busy_timeout(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
   /// Access mode
   ///
   /// Default: read-only, which avoids creating an empty file when a required
   /// database is missing.
   pub flags: OpenFlags,

   /// How long a statement waits on a lock held by another connection before
   /// reporting busy.
   ///
   /// Default: 0 (report busy immediately)
   #[serde(with = "duration_millis")]
   pub busy_timeout: Duration,

   /// Name of a registered VFS, or `None` for the default one.
   pub vfs: Option<String>,
}

impl OpenOptions {
   /// Read-only options.
   pub fn read_only() -> Self {
      Self::default()
   }

   /// Read-write options that create the file when missing.
   pub fn read_write_create() -> Self {
      Self {
         flags: OpenFlags::READ_WRITE | OpenFlags::CREATE,
         ..Default::default()
      }
   }

   pub fn with_flags(mut self, flags: OpenFlags) -> Self {
      self.flags = flags;
      self
   }

   pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
      self.busy_timeout = timeout;
      self
   }

   pub fn with_vfs(mut self, vfs: impl Into<String>) -> Self {
      self.vfs = Some(vfs.into());
      self
   }
}

mod duration_millis {
   use std::time::Duration;

   use serde::{Deserialize, Deserializer, Serializer};

   pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
   }

   pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
      u64::deserialize(deserializer).map(Duration::from_millis)
   }
}
