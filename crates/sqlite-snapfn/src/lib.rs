//! # sqlite-snapfn
//!
//! Reversible compression SQL functions for SQLite.
//!
//! - **`snap(x)`**: compresses TEXT and BLOB values with raw Snappy
//! - **`unsnap(x)`**: reverses `snap`, restoring the original storage class
//!
//! ## Format
//!
//! A snapped value is always a BLOB. Its first byte is the SQLite storage
//! class of the input (`3` for TEXT, `4` for BLOB), followed by the raw Snappy
//! encoding of the input bytes:
//!
//! ```text
//! X'03 20 7C 74 6F 64 61 79 ...'
//!   |  |  |  `- literal bytes
//!   |  |  `---- literal tag (32 bytes)
//!   |  `------- uncompressed length varint (32)
//!   `---------- storage class (TEXT)
//! ```
//!
//! NULL, INTEGER, FLOAT and empty TEXT/BLOB values pass through both functions
//! unchanged, so `unsnap(snap(x))` is the identity for every value.
//! `unsnap` of anything other than a non-empty BLOB also passes through.

mod codec;
mod error;
mod functions;

use std::ffi::{CStr, c_int};
use std::ptr;

use libsqlite3_sys as ffi;
use tracing::trace;

pub use codec::{StorageClass, compress, decompress};
pub use error::{Error, Result};

type ScalarFn = unsafe extern "C" fn(*mut ffi::sqlite3_context, c_int, *mut *mut ffi::sqlite3_value);

/// Registers `snap` and `unsnap` on a database handle.
///
/// Both functions take exactly one argument and are declared deterministic,
/// so they may be used in indexes and generated columns.
///
/// # Safety
///
/// `db` must be a valid, open `sqlite3` handle that is not being used
/// concurrently by another thread for the duration of the call.
pub unsafe fn register(db: *mut ffi::sqlite3) -> Result<()> {
   let functions: [(&'static CStr, ScalarFn); 2] =
      [(c"snap", functions::snap), (c"unsnap", functions::unsnap)];

   for (name, func) in functions {
      // SAFETY: caller guarantees `db` is open; `name` is a static C string and
      // the callbacks never touch user data, so no destructor is needed.
      let rc = unsafe {
         ffi::sqlite3_create_function_v2(
            db,
            name.as_ptr(),
            1,
            ffi::SQLITE_UTF8 | ffi::SQLITE_DETERMINISTIC,
            ptr::null_mut(),
            Some(func),
            None,
            None,
            None,
         )
      };

      if rc != ffi::SQLITE_OK {
         return Err(Error::RegistrationFailed {
            name: name.to_str().unwrap_or("?"),
            code: rc,
         });
      }
   }

   trace!("Registered snap/unsnap SQL functions");
   Ok(())
}
