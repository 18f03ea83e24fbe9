//! Translation of SQLite result codes into a portable error taxonomy.
//!
//! Callers branch on [`ErrorKind`] (retry on `Unavailable`, surface
//! `InvalidArgument` to the user, alarm on `Internal`/`DataLoss`) and never on
//! the engine's numeric codes. Only the primary result code (the low 8 bits)
//! decides the kind; extended codes survive only in the message.

use std::ffi::c_int;
use std::fmt;

use libsqlite3_sys as ffi;

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Portable category a native result code is translated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
   /// The operation was interrupted (`SQLITE_INTERRUPT`).
   Cancelled,
   /// A callback routine requested an abort (`SQLITE_ABORT`).
   Aborted,
   FailedPrecondition,
   Internal,
   OutOfRange,
   InvalidArgument,
   DataLoss,
   PermissionDenied,
   ResourceExhausted,
   Unavailable,
   /// `SQLITE_ERROR`, `SQLITE_IOERR`, `SQLITE_SCHEMA` and anything unmapped.
   Unknown,
}

impl ErrorKind {
   /// Maps a primary or extended result code to a kind.
   ///
   /// Returns `None` for the success codes `SQLITE_OK`, `SQLITE_ROW` and
   /// `SQLITE_DONE`.
   pub fn from_code(code: c_int) -> Option<Self> {
      // See: https://sqlite.org/rescode.html
      let kind = match code & 0xff {
         ffi::SQLITE_OK | ffi::SQLITE_ROW | ffi::SQLITE_DONE => return None,
         ffi::SQLITE_ABORT => ErrorKind::Aborted,
         ffi::SQLITE_READONLY | ffi::SQLITE_MISMATCH => ErrorKind::FailedPrecondition,
         ffi::SQLITE_MISUSE | ffi::SQLITE_INTERNAL => ErrorKind::Internal,
         ffi::SQLITE_RANGE => ErrorKind::OutOfRange,
         ffi::SQLITE_CANTOPEN | ffi::SQLITE_CONSTRAINT | ffi::SQLITE_NOTFOUND | ffi::SQLITE_NOTADB => {
            ErrorKind::InvalidArgument
         }
         ffi::SQLITE_CORRUPT => ErrorKind::DataLoss,
         ffi::SQLITE_AUTH | ffi::SQLITE_PERM => ErrorKind::PermissionDenied,
         ffi::SQLITE_FULL | ffi::SQLITE_TOOBIG | ffi::SQLITE_NOLFS => ErrorKind::ResourceExhausted,
         ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED | ffi::SQLITE_PROTOCOL | ffi::SQLITE_NOMEM => {
            ErrorKind::Unavailable
         }
         ffi::SQLITE_INTERRUPT => ErrorKind::Cancelled,
         _ => ErrorKind::Unknown,
      };
      Some(kind)
   }

   /// Machine-readable name of this kind.
   pub fn as_str(self) -> &'static str {
      match self {
         ErrorKind::Cancelled => "CANCELLED",
         ErrorKind::Aborted => "ABORTED",
         ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
         ErrorKind::Internal => "INTERNAL",
         ErrorKind::OutOfRange => "OUT_OF_RANGE",
         ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
         ErrorKind::DataLoss => "DATA_LOSS",
         ErrorKind::PermissionDenied => "PERMISSION_DENIED",
         ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
         ErrorKind::Unavailable => "UNAVAILABLE",
         ErrorKind::Unknown => "UNKNOWN",
      }
   }

   /// True for kinds where retrying the same operation later may succeed.
   pub fn is_transient(self) -> bool {
      matches!(self, ErrorKind::Unavailable | ErrorKind::ResourceExhausted)
   }
}

impl fmt::Display for ErrorKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Errors returned by connections and statements.
///
/// Every variant carries a human-readable message with whatever context was
/// available (SQL text, engine message, failing parameter, database path).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
   #[error("cancelled: {0}")]
   Cancelled(String),

   #[error("aborted: {0}")]
   Aborted(String),

   #[error("failed precondition: {0}")]
   FailedPrecondition(String),

   #[error("internal: {0}")]
   Internal(String),

   #[error("out of range: {0}")]
   OutOfRange(String),

   #[error("invalid argument: {0}")]
   InvalidArgument(String),

   #[error("data loss: {0}")]
   DataLoss(String),

   #[error("permission denied: {0}")]
   PermissionDenied(String),

   #[error("resource exhausted: {0}")]
   ResourceExhausted(String),

   #[error("unavailable: {0}")]
   Unavailable(String),

   #[error("unknown: {0}")]
   Unknown(String),
}

impl Error {
   /// Builds an error of the given kind.
   pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
      let message = message.into();
      match kind {
         ErrorKind::Cancelled => Error::Cancelled(message),
         ErrorKind::Aborted => Error::Aborted(message),
         ErrorKind::FailedPrecondition => Error::FailedPrecondition(message),
         ErrorKind::Internal => Error::Internal(message),
         ErrorKind::OutOfRange => Error::OutOfRange(message),
         ErrorKind::InvalidArgument => Error::InvalidArgument(message),
         ErrorKind::DataLoss => Error::DataLoss(message),
         ErrorKind::PermissionDenied => Error::PermissionDenied(message),
         ErrorKind::ResourceExhausted => Error::ResourceExhausted(message),
         ErrorKind::Unavailable => Error::Unavailable(message),
         ErrorKind::Unknown => Error::Unknown(message),
      }
   }

   pub fn kind(&self) -> ErrorKind {
      match self {
         Error::Cancelled(_) => ErrorKind::Cancelled,
         Error::Aborted(_) => ErrorKind::Aborted,
         Error::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
         Error::Internal(_) => ErrorKind::Internal,
         Error::OutOfRange(_) => ErrorKind::OutOfRange,
         Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
         Error::DataLoss(_) => ErrorKind::DataLoss,
         Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
         Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
         Error::Unavailable(_) => ErrorKind::Unavailable,
         Error::Unknown(_) => ErrorKind::Unknown,
      }
   }

   /// The message without the kind prefix.
   pub fn message(&self) -> &str {
      match self {
         Error::Cancelled(m)
         | Error::Aborted(m)
         | Error::FailedPrecondition(m)
         | Error::Internal(m)
         | Error::OutOfRange(m)
         | Error::InvalidArgument(m)
         | Error::DataLoss(m)
         | Error::PermissionDenied(m)
         | Error::ResourceExhausted(m)
         | Error::Unavailable(m)
         | Error::Unknown(m) => m,
      }
   }

   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> &'static str {
      self.kind().as_str()
   }
}

/// Translates a result code, building the message only on failure.
///
/// The raw code is appended to the message so extended codes are not lost.
pub fn check<F>(code: c_int, context: F) -> Result<()>
where
   F: FnOnce() -> String,
{
   match ErrorKind::from_code(code) {
      None => Ok(()),
      Some(kind) => Err(Error::new(kind, with_code(context(), code))),
   }
}

/// Like [`check`], for call sites that already know `code` is a failure.
///
/// A success code here means the caller mislabeled it, which is reported as
/// `Internal`.
pub(crate) fn failure(code: c_int, context: String) -> Error {
   let kind = ErrorKind::from_code(code).unwrap_or(ErrorKind::Internal);
   Error::new(kind, with_code(context, code))
}

/// English description of a result code, e.g. "database is locked".
pub(crate) fn describe(code: c_int) -> String {
   // SAFETY: sqlite3_errstr returns a pointer to a static string for any code.
   unsafe { std::ffi::CStr::from_ptr(ffi::sqlite3_errstr(code)) }
      .to_string_lossy()
      .into_owned()
}

fn with_code(message: String, code: c_int) -> String {
   format!("{message} (sqlite code {code})")
}
