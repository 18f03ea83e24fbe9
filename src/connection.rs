//! SQLite connection with shared ownership across its statements

use std::ffi::{CStr, CString, c_char, c_int};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Weak};
use std::time::Duration;

use libsqlite3_sys as ffi;
use tracing::{debug, trace, warn};

use crate::config::{AutoVacuum, ConnectionConfig, OpenFlags};
use crate::error::{self, Error, Result};
use crate::statement::Statement;

/// An open SQLite database handle.
///
/// Connections are only ever handed out as `Arc<Connection>`. Every
/// [`Statement`] prepared from a connection holds a strong reference back to
/// it, so the native handle is closed only after the caller's last reference
/// and every statement are gone. Statements are therefore always finalized
/// before the close.
///
/// ## Threading
///
/// A connection and its statements form one logical unit. They may be moved
/// and shared between threads, but callers must serialize their use of the
/// unit (e.g. behind a mutex) so that, for example, the error a step
/// reports is not replaced by another thread's call. The handle is always
/// opened in SQLite's serialized threading mode so overlapping calls can
/// never corrupt engine state, only interleave.
///
/// The only lock this type takes itself is the engine's own connection
/// mutex, held by [`error_message`](Self::error_message) while it copies the
/// message buffer out. Without it a concurrent call could free the buffer
/// mid-copy.
pub struct Connection {
   db: NonNull<ffi::sqlite3>,

   /// Path the database was opened with (for diagnostics)
   path: String,

   /// Handed to statements as a strong reference by `prepare`
   this: Weak<Connection>,
}

// SAFETY: the handle is opened with SQLITE_OPEN_FULLMUTEX, so SQLite guards
// every API call on it with the connection mutex. Reads of the error message
// buffer take that mutex explicitly (see `error_message`).
unsafe impl Send for Connection {}
unsafe impl Sync for Connection {}

impl Connection {
   /// Opens a database in read/write/create mode.
   ///
   /// Use `":memory:"` for a private in-memory database.
   pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
      Self::open_with_flags(path, OpenFlags::default())
   }

   /// Opens a database with explicit open flags.
   ///
   /// The handle always runs in serialized threading mode. Flags asking for
   /// multi-thread mode (`SQLITE_OPEN_NOMUTEX`) are rejected with
   /// `InvalidArgument` rather than silently upgraded.
   ///
   /// # Panics
   ///
   /// If the `snap`/`unsnap` SQL functions cannot be registered on the new
   /// handle. They are expected to be available on every connection.
   pub fn open_with_flags(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Arc<Self>> {
      let path = path.as_ref();
      let path = path
         .to_str()
         .ok_or_else(|| Error::InvalidArgument(format!("path is not valid UTF-8: {}", path.display())))?
         .to_owned();
      let c_path = CString::new(path.as_str())
         .map_err(|_| Error::InvalidArgument(format!("path contains a NUL byte: {path}")))?;
      if flags.bits() & ffi::SQLITE_OPEN_NOMUTEX != 0 {
         return Err(Error::InvalidArgument(format!(
            "SQLITE_OPEN_NOMUTEX is not supported, connections are always serialized: {path}"
         )));
      }

      let mut db = ptr::null_mut();
      // SAFETY: c_path is NUL-terminated and outlives the call; db is an out-pointer.
      let rc = unsafe {
         ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags.serialized().bits(), ptr::null())
      };
      if rc != ffi::SQLITE_OK {
         // sqlite3_open_v2 allocates a handle even on most failures
         // SAFETY: closing a null or failed handle is allowed.
         unsafe { ffi::sqlite3_close(db) };
         warn!(path = %path, code = rc, "Failed to open SQLite database");
         return Err(error::failure(rc, format!("{}: {path}", error::describe(rc))));
      }

      let Some(db) = NonNull::new(db) else {
         return Err(Error::Unavailable(format!("{}: {path}", error::describe(ffi::SQLITE_NOMEM))));
      };

      // SAFETY: db was just opened and is not shared with anyone yet.
      if let Err(e) = unsafe { sqlite_snapfn::register(db.as_ptr()) } {
         // SAFETY: no statements exist on the handle yet.
         unsafe { ffi::sqlite3_close(db.as_ptr()) };
         panic!("snap/unsnap must be registrable on every connection ({path}): {e}");
      }

      debug!(path = %path, flags = flags.bits(), "Opened SQLite database");

      Ok(Arc::new_cyclic(|this| Connection {
         db,
         path,
         this: this.clone(),
      }))
   }

   /// Opens a database and applies every setting in `config`.
   ///
   /// Settings are applied in the order page size, auto-vacuum, busy
   /// timeout, write-ahead logging.
   pub fn open_with_config(path: impl AsRef<Path>, config: &ConnectionConfig) -> Result<Arc<Self>> {
      let conn = Self::open_with_flags(path, config.flags)?;

      if let Some(bytes) = config.page_size {
         conn.try_to_set_page_size(bytes)?;
      }
      if let Some(mode) = config.auto_vacuum {
         conn.set_auto_vacuum(mode)?;
      }
      if let Some(timeout) = config.busy_timeout {
         conn.set_busy_timeout(timeout)?;
      }
      if config.write_ahead_log {
         conn.enable_write_ahead_logging()?;
      }

      Ok(conn)
   }

   /// Tries to change the page size and returns the size actually in effect.
   ///
   /// SQLite only honors this before the first table is created (or on the
   /// next `VACUUM`), so callers must not assume the request took effect.
   /// 8192 tends to be a good choice for BLOB-heavy databases.
   pub fn try_to_set_page_size(&self, bytes: i32) -> Result<i32> {
      self
         .prepare(&format!("PRAGMA page_size={bytes}"))?
         .step_and_reset()?;

      let mut stmt = self.prepare("PRAGMA page_size")?;
      stmt.step_expecting_row()?;
      let actual = stmt.column_int(0) as i32;

      if actual != bytes {
         debug!(path = %self.path, requested = bytes, actual, "Page size request not honored");
      }
      Ok(actual)
   }

   /// Retries for up to `timeout` when the database is locked.
   ///
   /// Without this, lock contention fails immediately with
   /// [`ErrorKind::Unavailable`](crate::ErrorKind::Unavailable). It is
   /// strongly recommended whenever more than one connection or process
   /// uses the same file.
   pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
      let ms = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
      let mut stmt = self.prepare(&format!("PRAGMA busy_timeout={ms}"))?;
      stmt.step()?;
      trace!(path = %self.path, ms, "Set busy timeout");
      Ok(())
   }

   /// Switches to write-ahead logging with `synchronous=NORMAL`.
   ///
   /// Writes then avoid most fsync calls and become visible to other
   /// processes through shared memory. A power loss may drop the last few
   /// commits but cannot corrupt the database.
   ///
   /// Succeeds without changes for in-memory databases. Fails with
   /// `FailedPrecondition` naming the mode the engine ended up in if it
   /// refuses to switch.
   pub fn enable_write_ahead_logging(&self) -> Result<()> {
      let mode = {
         let mut stmt = self.prepare("PRAGMA journal_mode=wal")?;
         stmt.step_expecting_row()?;
         String::from_utf8_lossy(stmt.column_string_ref(0)).to_ascii_lowercase()
      };

      match mode.as_str() {
         "memory" => {
            trace!(path = %self.path, "In-memory database, journal mode unchanged");
            Ok(())
         }
         "wal" => {
            self.prepare("PRAGMA synchronous=NORMAL")?.step_and_reset()?;
            debug!(path = %self.path, "Enabled write-ahead logging");
            Ok(())
         }
         other => Err(Error::FailedPrecondition(format!(
            "the SQLite journal_mode of {} is '{other}' but it must be 'wal' for \
             write-heavy use; perhaps provide a fresh database file",
            self.path
         ))),
      }
   }

   /// Requests an auto-vacuum mode. Only effective before the first table
   /// is created.
   pub fn set_auto_vacuum(&self, mode: AutoVacuum) -> Result<()> {
      self
         .prepare(&format!("PRAGMA auto_vacuum={}", mode.as_pragma()))?
         .step_and_reset()
   }

   /// Compiles `sql` into a statement that keeps this connection alive.
   ///
   /// Only the first statement in `sql` is compiled. SQL consisting only of
   /// whitespace or comments yields an empty statement.
   pub fn prepare(&self, sql: &str) -> Result<Statement> {
      let len = c_int::try_from(sql.len()).map_err(|_| {
         Error::ResourceExhausted(format!("SQL text of {} bytes is too long", sql.len()))
      })?;

      let mut stmt = ptr::null_mut();
      // SAFETY: db is open; sql is valid for len bytes and need not be NUL-terminated.
      let rc = unsafe {
         ffi::sqlite3_prepare_v2(
            self.db.as_ptr(),
            sql.as_ptr() as *const c_char,
            len,
            &mut stmt,
            ptr::null_mut(),
         )
      };
      if rc != ffi::SQLITE_OK {
         let message = self.error_message();
         warn!(path = %self.path, code = rc, error = %message, "Prepare failed");
         return Err(error::failure(rc, format!("Prepare failed: {message} for {sql}")));
      }

      let Some(this) = self.this.upgrade() else {
         // SAFETY: stmt was just prepared and is not referenced elsewhere.
         unsafe { ffi::sqlite3_finalize(stmt) };
         return Err(Error::Internal(format!(
            "connection to {} is being dropped",
            self.path
         )));
      };

      Ok(Statement::new(stmt, this))
   }

   /// Interrupts any statement currently running on this connection.
   ///
   /// The interrupted step fails with
   /// [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled). Safe to call
   /// from another thread.
   pub fn interrupt(&self) {
      // SAFETY: sqlite3_interrupt is safe to call on an open handle from any thread.
      unsafe { ffi::sqlite3_interrupt(self.db.as_ptr()) }
   }

   /// Returns rowid assigned by the most recent successful INSERT.
   pub fn last_insert_rowid(&self) -> i64 {
      // SAFETY: db is open for as long as self exists.
      unsafe { ffi::sqlite3_last_insert_rowid(self.db.as_ptr()) }
   }

   /// Rows modified by the most recently completed INSERT, UPDATE or DELETE.
   pub fn changes(&self) -> u64 {
      // SAFETY: db is open for as long as self exists.
      let changes = unsafe { ffi::sqlite3_changes64(self.db.as_ptr()) };
      u64::try_from(changes).unwrap_or(0)
   }

   /// Returns the engine's message for the most recent failure.
   ///
   /// Undefined if the most recent call succeeded.
   pub fn error_message(&self) -> String {
      let db = self.db.as_ptr();
      // SAFETY: the handle is serialized so sqlite3_db_mutex is non-null. The
      // message buffer is only valid while no other call runs on the
      // connection, so copy it out under the mutex.
      unsafe {
         let mutex = ffi::sqlite3_db_mutex(db);
         ffi::sqlite3_mutex_enter(mutex);
         let message = CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
         ffi::sqlite3_mutex_leave(mutex);
         message
      }
   }

   /// Returns primary result code of last error.
   ///
   /// Undefined if the most recent call succeeded. Equal to
   /// `extended_error_code() & 0xff`.
   pub fn error_code(&self) -> i32 {
      // SAFETY: db is open for as long as self exists.
      unsafe { ffi::sqlite3_errcode(self.db.as_ptr()) }
   }

   /// Returns extended result code of last error.
   ///
   /// Undefined if the most recent call succeeded.
   pub fn extended_error_code(&self) -> i32 {
      // SAFETY: db is open for as long as self exists.
      unsafe { ffi::sqlite3_extended_errcode(self.db.as_ptr()) }
   }

   /// Path the database was opened with.
   pub fn path(&self) -> &str {
      &self.path
   }
}

impl std::fmt::Debug for Connection {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Connection")
         .field("path", &self.path)
         .finish_non_exhaustive()
   }
}

impl Drop for Connection {
   fn drop(&mut self) {
      // SAFETY: every Statement holds an Arc to us, so all of ours are finalized.
      let rc = unsafe { ffi::sqlite3_close(self.db.as_ptr()) };
      if rc != ffi::SQLITE_OK {
         // A statement leaked past its connection; continuing would leave a
         // dangling handle behind.
         panic!(
            "failed to close SQLite database {}: {} (sqlite code {rc})",
            self.path,
            error::describe(rc)
         );
      }
      trace!(path = %self.path, "Closed SQLite database");
   }
}
