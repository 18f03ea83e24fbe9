//! Prepared statements with deferred bind errors
//!
//! A [`Statement`] is a small state machine over one compiled query:
//!
//! ```text
//!            bind ok         step -> ROW           step -> DONE / error
//!   Ready ----------> Ready ------------> HasRow ---------------------> Finished
//!     |                 ^                                                  |
//!     | bind fails      '------------------------ reset -------------------'
//!     v
//!  BindFailed  (step returns the latched error until reset)
//!
//!  Empty  (no compiled query; step always fails)
//! ```
//!
//! Bind calls never fail on the spot. The first failing bind is latched and
//! reported by the next step, so bindings can be written as one unconditional
//! chain:
//!
//! ```
//! # use sqlite_handle::Connection;
//! # let db = Connection::open(":memory:")?;
//! # db.prepare("CREATE TABLE t (a, b)")?.step_and_reset()?;
//! let mut stmt = db.prepare("INSERT INTO t (a, b) VALUES (?, :b)")?;
//! stmt.bind_int(1, 42).bind_text(":b", "hello").step_and_reset()?;
//! # Ok::<(), sqlite_handle::Error>(())
//! ```

use std::borrow::Cow;
use std::ffi::{CStr, CString, c_char, c_int};
use std::fmt;
use std::ptr;
use std::slice;
use std::sync::Arc;

use libsqlite3_sys as ffi;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{self, Error, Result};
use crate::value::{ColumnType, ColumnValue};

/// Where a statement is in its execution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementState {
   /// No compiled query. Every step fails with `FailedPrecondition`.
   Empty,
   /// Compiled and not yet stepped since the last reset.
   Ready,
   /// The last step produced a row; columns may be read.
   HasRow,
   /// The last step completed the query or failed.
   Finished,
   /// A bind call failed; stepping returns that error until `reset`.
   BindFailed,
}

/// A query parameter, by 1-based position or by name.
///
/// Names include their prefix character, e.g. `":id"`, `"@id"` or `"$id"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter<'a> {
   Index(i32),
   Name(&'a str),
}

impl From<i32> for Parameter<'_> {
   fn from(index: i32) -> Self {
      Parameter::Index(index)
   }
}

impl<'a> From<&'a str> for Parameter<'a> {
   fn from(name: &'a str) -> Self {
      Parameter::Name(name)
   }
}

impl fmt::Display for Parameter<'_> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Parameter::Index(i) => write!(f, "{i}"),
         Parameter::Name(name) => f.write_str(name),
      }
   }
}

/// First bind failure since the last reset.
#[derive(Debug, Clone)]
struct BindError {
   code: c_int,
   parameter: String,
   message: String,
}

/// A compiled SQL statement.
///
/// Created by [`Connection::prepare`]. Keeps its connection alive, and is
/// finalized on drop. `Statement::default()` is an empty statement; moving
/// out with [`std::mem::take`] leaves one behind.
pub struct Statement {
   stmt: *mut ffi::sqlite3_stmt,
   /// Ready, HasRow or Finished; Empty and BindFailed are derived
   cursor: StatementState,
   bind_error: Option<BindError>,
   db: Option<Arc<Connection>>,
}

// SAFETY: the owning connection runs in serialized mode, so every call on
// the statement handle takes the connection mutex. All mutation goes through
// `&mut self`; `&self` methods only read column values of the current row.
unsafe impl Send for Statement {}
unsafe impl Sync for Statement {}

impl Default for Statement {
   fn default() -> Self {
      Self {
         stmt: ptr::null_mut(),
         cursor: StatementState::Ready,
         bind_error: None,
         db: None,
      }
   }
}

impl Statement {
   pub(crate) fn new(stmt: *mut ffi::sqlite3_stmt, db: Arc<Connection>) -> Self {
      Self {
         stmt,
         cursor: StatementState::Ready,
         bind_error: None,
         db: Some(db),
      }
   }

   /// Returns true if there is no compiled query behind this statement.
   pub fn is_empty(&self) -> bool {
      self.stmt.is_null()
   }

   pub fn state(&self) -> StatementState {
      if self.stmt.is_null() {
         StatementState::Empty
      } else if self.bind_error.is_some() {
         StatementState::BindFailed
      } else {
         self.cursor
      }
   }

   /// The connection this statement keeps alive.
   pub fn connection(&self) -> Option<&Arc<Connection>> {
      self.db.as_ref()
   }

   /// The SQL text this statement was compiled from.
   pub fn sql(&self) -> Cow<'_, str> {
      if self.stmt.is_null() {
         return Cow::Borrowed("");
      }
      // SAFETY: sqlite3_sql returns a string owned by the statement.
      let sql = unsafe { ffi::sqlite3_sql(self.stmt) };
      if sql.is_null() {
         return Cow::Borrowed("");
      }
      // SAFETY: non-null and NUL-terminated, valid until finalize.
      unsafe { CStr::from_ptr(sql) }.to_string_lossy()
   }

   /// Number of parameters the query declares.
   pub fn parameter_count(&self) -> i32 {
      if self.stmt.is_null() {
         return 0;
      }
      // SAFETY: stmt is a live prepared statement.
      unsafe { ffi::sqlite3_bind_parameter_count(self.stmt) }
   }

   /// Executes the query up to the next row.
   ///
   /// Returns `true` when a row is available and `false` once the query has
   /// completed. A latched bind error is returned without running the query.
   /// Any failure leaves the statement `Finished`; call [`reset`](Self::reset)
   /// to run it again.
   pub fn step(&mut self) -> Result<bool> {
      if self.stmt.is_null() {
         return Err(Error::FailedPrecondition("sqlite3_stmt absent".into()));
      }
      if let Some(bind) = &self.bind_error {
         return Err(error::failure(
            bind.code,
            format!(
               "{} on parameter {} for {}",
               bind.message,
               bind.parameter,
               self.sql()
            ),
         ));
      }

      // SAFETY: stmt is a live prepared statement.
      let rc = unsafe { ffi::sqlite3_step(self.stmt) };
      match rc {
         ffi::SQLITE_ROW => {
            self.cursor = StatementState::HasRow;
            Ok(true)
         }
         ffi::SQLITE_DONE => {
            self.cursor = StatementState::Finished;
            Ok(false)
         }
         _ => {
            self.cursor = StatementState::Finished;
            let message = self.engine_message();
            Err(error::failure(
               rc,
               format!("Step failed: {message} for {}", self.sql()),
            ))
         }
      }
   }

   /// Executes the query when exactly one more row is expected.
   ///
   /// Completion without a row is an `Internal` error.
   pub fn step_expecting_row(&mut self) -> Result<()> {
      if !self.step()? {
         return Err(Error::Internal(format!("wanted sqlite row: {}", self.sql())));
      }
      Ok(())
   }

   /// Executes a query that must not return rows, then resets.
   ///
   /// Meant for INSERT, UPDATE, DDL and pragmas. A returned row is an
   /// `Internal` error. The reset happens even when stepping fails, so the
   /// statement is immediately reusable.
   pub fn step_and_reset(&mut self) -> Result<()> {
      let result = match self.step() {
         Ok(false) => Ok(()),
         Ok(true) => Err(Error::Internal(format!("unexpected sqlite row: {}", self.sql()))),
         Err(e) => Err(e),
      };
      self.reset();
      result
   }

   /// Rewinds the query, sets every parameter back to NULL and clears any
   /// latched bind error.
   ///
   /// Also ends the lifetime obligation of the `*_unsafe` binds.
   pub fn reset(&mut self) {
      if !self.stmt.is_null() {
         // SAFETY: stmt is a live prepared statement. The reset code repeats
         // the last step error, which was already reported.
         unsafe {
            ffi::sqlite3_reset(self.stmt);
            ffi::sqlite3_clear_bindings(self.stmt);
         }
      }
      self.bind_error = None;
      self.cursor = StatementState::Ready;
   }

   /// Binds a signed 64-bit integer.
   pub fn bind_int<'p>(&mut self, parameter: impl Into<Parameter<'p>>, value: i64) -> &mut Self {
      self.bind_with(parameter.into(), |stmt, index| unsafe {
         ffi::sqlite3_bind_int64(stmt, index, value)
      })
   }

   /// Binds a double.
   pub fn bind_double<'p>(&mut self, parameter: impl Into<Parameter<'p>>, value: f64) -> &mut Self {
      self.bind_with(parameter.into(), |stmt, index| unsafe {
         ffi::sqlite3_bind_double(stmt, index, value)
      })
   }

   /// Binds NULL.
   pub fn bind_null<'p>(&mut self, parameter: impl Into<Parameter<'p>>) -> &mut Self {
      self.bind_with(parameter.into(), |stmt, index| unsafe {
         ffi::sqlite3_bind_null(stmt, index)
      })
   }

   /// Copies UTF-8 text into the parameter.
   ///
   /// NUL characters are stored and read back intact, but SQL functions may
   /// treat them as terminators.
   pub fn bind_text<'p>(&mut self, parameter: impl Into<Parameter<'p>>, text: &str) -> &mut Self {
      let destructor = ffi::SQLITE_TRANSIENT();
      self.bind_with(parameter.into(), |stmt, index| unsafe {
         bind_text_raw(stmt, index, text.as_bytes(), destructor)
      })
   }

   /// Copies binary data into the parameter.
   pub fn bind_blob<'p>(&mut self, parameter: impl Into<Parameter<'p>>, blob: &[u8]) -> &mut Self {
      let destructor = ffi::SQLITE_TRANSIENT();
      self.bind_with(parameter.into(), |stmt, index| unsafe {
         bind_blob_raw(stmt, index, blob, destructor)
      })
   }

   /// Binds UTF-8 text without copying it.
   ///
   /// # Safety
   ///
   /// The memory behind `text` must stay valid until the next
   /// [`reset`](Self::reset) or until this statement is dropped. Mutating it
   /// in the meantime changes the value the query sees.
   pub unsafe fn bind_text_unsafe<'p>(
      &mut self,
      parameter: impl Into<Parameter<'p>>,
      text: &str,
   ) -> &mut Self {
      self.bind_with(parameter.into(), |stmt, index| unsafe {
         bind_text_raw(stmt, index, text.as_bytes(), ffi::SQLITE_STATIC())
      })
   }

   /// Binds binary data without copying it.
   ///
   /// # Safety
   ///
   /// The memory behind `blob` must stay valid until the next
   /// [`reset`](Self::reset) or until this statement is dropped. Mutating it
   /// in the meantime changes the value the query sees.
   pub unsafe fn bind_blob_unsafe<'p>(
      &mut self,
      parameter: impl Into<Parameter<'p>>,
      blob: &[u8],
   ) -> &mut Self {
      self.bind_with(parameter.into(), |stmt, index| unsafe {
         bind_blob_raw(stmt, index, blob, ffi::SQLITE_STATIC())
      })
   }

   /// Binds a BLOB of `size` zero bytes, to be filled in later.
   pub fn bind_zero_blob<'p>(&mut self, parameter: impl Into<Parameter<'p>>, size: u64) -> &mut Self {
      self.bind_with(parameter.into(), |stmt, index| unsafe {
         ffi::sqlite3_bind_zeroblob64(stmt, index, size)
      })
   }

   /// Binds a typed value, copying text and blobs.
   pub fn bind_value<'p>(
      &mut self,
      parameter: impl Into<Parameter<'p>>,
      value: &ColumnValue,
   ) -> &mut Self {
      match value {
         ColumnValue::Null => self.bind_null(parameter),
         ColumnValue::Integer(i) => self.bind_int(parameter, *i),
         ColumnValue::Real(r) => self.bind_double(parameter, *r),
         ColumnValue::Text(s) => self.bind_text(parameter, s),
         ColumnValue::Blob(b) => self.bind_blob(parameter, b),
      }
   }

   /// Number of columns in the result set.
   pub fn column_count(&self) -> usize {
      if self.stmt.is_null() {
         return 0;
      }
      // SAFETY: stmt is a live prepared statement.
      let count = unsafe { ffi::sqlite3_column_count(self.stmt) };
      usize::try_from(count).unwrap_or(0)
   }

   /// Storage class of a 0-indexed column in the current row.
   ///
   /// `Null` when there is no current row.
   pub fn column_type(&self, column: usize) -> ColumnType {
      match self.column_index(column) {
         // SAFETY: column_index checked for a current row and an in-range column.
         Some(col) => ColumnType::from_code(unsafe { ffi::sqlite3_column_type(self.stmt, col) }),
         None => ColumnType::Null,
      }
   }

   /// Returns a 0-indexed column coerced to an integer.
   ///
   /// Follows SQLite's coercion rules: doubles truncate, text is parsed as
   /// far as it is numeric, NULL and blobs read as 0. Also 0 when there is no
   /// current row.
   pub fn column_int(&self, column: usize) -> i64 {
      match self.column_index(column) {
         // SAFETY: column_index checked for a current row and an in-range column.
         Some(col) => unsafe { ffi::sqlite3_column_int64(self.stmt, col) },
         None => 0,
      }
   }

   /// Returns a 0-indexed column coerced to a double.
   pub fn column_double(&self, column: usize) -> f64 {
      match self.column_index(column) {
         // SAFETY: column_index checked for a current row and an in-range column.
         Some(col) => unsafe { ffi::sqlite3_column_double(self.stmt, col) },
         None => 0.0,
      }
   }

   /// Copies a 0-indexed TEXT or BLOB column.
   ///
   /// NULL reads as empty, so NULL and an empty BLOB cannot be told apart
   /// here; use [`column_value`](Self::column_value) or
   /// [`column_type`](Self::column_type) when that matters.
   pub fn column_string(&self, column: usize) -> Vec<u8> {
      self.column_string_ref(column).to_vec()
   }

   /// Borrows a 0-indexed TEXT or BLOB column without copying.
   ///
   /// No NUL terminator is included. The borrow ends at the next `step` or
   /// `reset`, which is when SQLite reuses the buffer.
   pub fn column_string_ref(&self, column: usize) -> &[u8] {
      let Some(col) = self.column_index(column) else {
         return &[];
      };
      // SAFETY: _blob is called before _bytes so the length matches the
      // buffer. The buffer lives until the next step/reset/finalize, all of
      // which need `&mut self` and so end this borrow first.
      unsafe {
         let data = ffi::sqlite3_column_blob(self.stmt, col) as *const u8;
         let len = ffi::sqlite3_column_bytes(self.stmt, col);
         if data.is_null() || len <= 0 {
            return &[];
         }
         slice::from_raw_parts(data, len as usize)
      }
   }

   /// Number of bytes stored in a 0-indexed column.
   pub fn column_size(&self, column: usize) -> usize {
      let Some(col) = self.column_index(column) else {
         return 0;
      };
      // SAFETY: column_index checked for a current row and an in-range column.
      let bytes = unsafe { ffi::sqlite3_column_bytes(self.stmt, col) };
      usize::try_from(bytes).unwrap_or(0)
   }

   /// Reads a 0-indexed column as a typed value, without coercion.
   pub fn column_value(&self, column: usize) -> ColumnValue {
      ColumnValue::read(self, column)
   }

   /// Native index of `column`, or `None` when reading it would fail.
   ///
   /// Out-of-range reads never reach SQLite, which would otherwise replace
   /// the connection's last error with `SQLITE_RANGE`.
   fn column_index(&self, column: usize) -> Option<c_int> {
      if self.stmt.is_null() || self.cursor != StatementState::HasRow {
         return None;
      }
      if column >= self.column_count() {
         return None;
      }
      c_int::try_from(column).ok()
   }

   /// Resolves `parameter` and runs `bind` on it, latching any failure.
   ///
   /// `bind` is only called with a live statement handle, which is what the
   /// `unsafe` blocks in the `bind_*` closures rely on.
   fn bind_with<F>(&mut self, parameter: Parameter<'_>, bind: F) -> &mut Self
   where
      F: FnOnce(*mut ffi::sqlite3_stmt, c_int) -> c_int,
   {
      if self.stmt.is_null() {
         return self;
      }
      let Some(index) = self.resolve(parameter) else {
         return self;
      };
      let rc = bind(self.stmt, index);
      if rc != ffi::SQLITE_OK {
         let message = self.engine_message();
         self.latch(rc, parameter, message);
      }
      self
   }

   /// Looks up a parameter's position, latching `SQLITE_NOTFOUND` for
   /// unknown names.
   fn resolve(&mut self, parameter: Parameter<'_>) -> Option<c_int> {
      let name = match parameter {
         Parameter::Index(index) => return Some(index),
         Parameter::Name(name) => name,
      };

      // Each lookup is a linear scan over the query's parameter names.
      let index = match CString::new(name) {
         // SAFETY: stmt is live (checked by bind_with) and c_name is NUL-terminated.
         Ok(c_name) => unsafe { ffi::sqlite3_bind_parameter_index(self.stmt, c_name.as_ptr()) },
         Err(_) => 0,
      };
      if index == 0 {
         self.latch(ffi::SQLITE_NOTFOUND, parameter, "unknown parameter name".into());
         return None;
      }
      Some(index)
   }

   fn latch(&mut self, code: c_int, parameter: Parameter<'_>, message: String) {
      if self.bind_error.is_some() {
         return;
      }
      debug!(parameter = %parameter, code, error = %message, "Latched bind error");
      self.bind_error = Some(BindError {
         code,
         parameter: parameter.to_string(),
         message,
      });
   }

   fn engine_message(&self) -> String {
      match &self.db {
         Some(db) => db.error_message(),
         None => String::new(),
      }
   }
}

unsafe fn bind_text_raw(
   stmt: *mut ffi::sqlite3_stmt,
   index: c_int,
   text: &[u8],
   destructor: ffi::sqlite3_destructor_type,
) -> c_int {
   unsafe {
      ffi::sqlite3_bind_text64(
         stmt,
         index,
         text.as_ptr() as *const c_char,
         text.len() as u64,
         destructor,
         ffi::SQLITE_UTF8 as u8,
      )
   }
}

unsafe fn bind_blob_raw(
   stmt: *mut ffi::sqlite3_stmt,
   index: c_int,
   blob: &[u8],
   destructor: ffi::sqlite3_destructor_type,
) -> c_int {
   unsafe { ffi::sqlite3_bind_blob64(stmt, index, blob.as_ptr().cast(), blob.len() as u64, destructor) }
}

impl fmt::Debug for Statement {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Statement")
         .field("sql", &self.sql())
         .field("state", &self.state())
         .finish_non_exhaustive()
   }
}

impl Drop for Statement {
   fn drop(&mut self) {
      // Finalize before `db` is released so the connection closes last.
      // SAFETY: stmt is either null, for which finalize is a no-op, or a
      // statement owned only by us that is never used again.
      unsafe { ffi::sqlite3_finalize(self.stmt) };
   }
}
