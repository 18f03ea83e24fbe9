//! `extern "C"` callbacks handed to `sqlite3_create_function_v2`.

use std::ffi::{c_char, c_int};
use std::slice;

use libsqlite3_sys as ffi;

use crate::codec::{self, StorageClass};

pub(crate) unsafe extern "C" fn snap(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) {
   debug_assert_eq!(argc, 1);
   // SAFETY: registered with nArg = 1, so argv holds exactly one value.
   let value = unsafe { *argv };

   let class = match unsafe { ffi::sqlite3_value_type(value) } {
      ffi::SQLITE_TEXT => StorageClass::Text,
      ffi::SQLITE_BLOB => StorageClass::Blob,
      _ => {
         unsafe { ffi::sqlite3_result_value(ctx, value) };
         return;
      }
   };

   let input = unsafe { value_bytes(value) };
   if input.is_empty() {
      unsafe { ffi::sqlite3_result_value(ctx, value) };
      return;
   }

   match codec::compress(class, input) {
      Ok(out) => unsafe { result_bytes(ctx, StorageClass::Blob, &out) },
      Err(e) => unsafe { result_error(ctx, &e.to_string()) },
   }
}

pub(crate) unsafe extern "C" fn unsnap(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) {
   debug_assert_eq!(argc, 1);
   // SAFETY: registered with nArg = 1, so argv holds exactly one value.
   let value = unsafe { *argv };

   if unsafe { ffi::sqlite3_value_type(value) } != ffi::SQLITE_BLOB {
      unsafe { ffi::sqlite3_result_value(ctx, value) };
      return;
   }

   let input = unsafe { value_bytes(value) };
   if input.is_empty() {
      unsafe { ffi::sqlite3_result_value(ctx, value) };
      return;
   }

   match codec::decompress(input) {
      Ok((class, out)) => unsafe { result_bytes(ctx, class, &out) },
      Err(e) => unsafe { result_error(ctx, &e.to_string()) },
   }
}

/// Borrows the bytes of a TEXT or BLOB value.
///
/// The slice is valid until the value is converted or the callback returns.
unsafe fn value_bytes<'a>(value: *mut ffi::sqlite3_value) -> &'a [u8] {
   // _blob must come before _bytes so the length matches the returned buffer.
   let data = unsafe { ffi::sqlite3_value_blob(value) } as *const u8;
   let len = unsafe { ffi::sqlite3_value_bytes(value) };
   if data.is_null() || len <= 0 {
      return &[];
   }
   unsafe { slice::from_raw_parts(data, len as usize) }
}

unsafe fn result_bytes(ctx: *mut ffi::sqlite3_context, class: StorageClass, bytes: &[u8]) {
   let len = bytes.len() as u64;
   match class {
      StorageClass::Text => unsafe {
         ffi::sqlite3_result_text64(
            ctx,
            bytes.as_ptr() as *const c_char,
            len,
            ffi::SQLITE_TRANSIENT(),
            ffi::SQLITE_UTF8 as u8,
         )
      },
      StorageClass::Blob => unsafe {
         ffi::sqlite3_result_blob64(ctx, bytes.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
      },
   }
}

unsafe fn result_error(ctx: *mut ffi::sqlite3_context, message: &str) {
   let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
   unsafe { ffi::sqlite3_result_error(ctx, message.as_ptr() as *const c_char, len) };
}
