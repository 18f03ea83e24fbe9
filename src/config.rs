//! Open flags and connection configuration

use std::ffi::c_int;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use libsqlite3_sys as ffi;
use serde::{Deserialize, Serialize};

/// Flags passed to `sqlite3_open_v2`.
///
/// See <https://sqlite.org/c3ref/open.html>. Compose with `|`:
///
/// ```
/// use sqlite_handle::OpenFlags;
///
/// let flags = OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::URI;
/// assert!(flags.contains(OpenFlags::CREATE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenFlags(c_int);

impl OpenFlags {
   pub const READ_ONLY: Self = Self(ffi::SQLITE_OPEN_READONLY);
   pub const READ_WRITE: Self = Self(ffi::SQLITE_OPEN_READWRITE);
   pub const CREATE: Self = Self(ffi::SQLITE_OPEN_CREATE);
   pub const URI: Self = Self(ffi::SQLITE_OPEN_URI);
   pub const MEMORY: Self = Self(ffi::SQLITE_OPEN_MEMORY);
   pub const FULL_MUTEX: Self = Self(ffi::SQLITE_OPEN_FULLMUTEX);
   pub const SHARED_CACHE: Self = Self(ffi::SQLITE_OPEN_SHAREDCACHE);
   pub const PRIVATE_CACHE: Self = Self(ffi::SQLITE_OPEN_PRIVATECACHE);
   pub const NO_FOLLOW: Self = Self(ffi::SQLITE_OPEN_NOFOLLOW);

   pub const fn from_bits(bits: c_int) -> Self {
      Self(bits)
   }

   pub const fn bits(self) -> c_int {
      self.0
   }

   pub const fn contains(self, other: Self) -> bool {
      self.0 & other.0 == other.0
   }

   /// Returns these flags with serialized threading mode added.
   ///
   /// Connections are `Send + Sync`, which is only sound when SQLite holds
   /// the per-connection mutex around every API call.
   pub(crate) const fn serialized(self) -> Self {
      Self(self.0 | ffi::SQLITE_OPEN_FULLMUTEX)
   }
}

impl Default for OpenFlags {
   /// Read-write, creating the file if it does not exist.
   fn default() -> Self {
      OpenFlags::READ_WRITE | OpenFlags::CREATE
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

/// `PRAGMA auto_vacuum` modes.
///
/// Like the page size, this only takes effect before the first table is
/// created (or after a `VACUUM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoVacuum {
   None,
   Full,
   Incremental,
}

impl AutoVacuum {
   pub(crate) fn as_pragma(self) -> &'static str {
      match self {
         AutoVacuum::None => "NONE",
         AutoVacuum::Full => "FULL",
         AutoVacuum::Incremental => "INCREMENTAL",
      }
   }
}

/// Settings applied by [`Connection::open_with_config`](crate::Connection::open_with_config)
///
/// # Examples
///
/// ```
/// use sqlite_handle::ConnectionConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = ConnectionConfig::default();
///
/// // Override just what you need
/// let config = ConnectionConfig {
///    page_size: Some(8192),
///    write_ahead_log: true,
///    busy_timeout: Some(Duration::from_secs(30)),
///    ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
   /// Open mode flags
   ///
   /// Default: `READ_WRITE | CREATE`
   pub flags: OpenFlags,

   /// Requested page size in bytes
   ///
   /// Only honored before the first table is created; the effective value is
   /// logged when it differs from the request. `None` keeps the engine
   /// default (4096 for new files).
   ///
   /// Default: `None`
   pub page_size: Option<i32>,

   /// How long to retry when another connection holds a lock
   ///
   /// `None` makes lock contention fail immediately with `Unavailable`.
   ///
   /// Default: 10 seconds
   pub busy_timeout: Option<Duration>,

   /// Switch to write-ahead logging with `synchronous=NORMAL`
   ///
   /// Trades a small window of lost writes on power failure for far fewer
   /// fsyncs. Ignored for in-memory databases.
   ///
   /// Default: `false`
   pub write_ahead_log: bool,

   /// Auto-vacuum mode to request for new databases
   ///
   /// Default: `None` (leave the engine default in place)
   pub auto_vacuum: Option<AutoVacuum>,
}

impl Default for ConnectionConfig {
   fn default() -> Self {
      Self {
         flags: OpenFlags::default(),
         page_size: None,
         busy_timeout: Some(Duration::from_secs(10)),
         write_ahead_log: false,
         auto_vacuum: None,
      }
   }
}
