//! Error types for the sqlite-snapfn crate.

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while registering or evaluating the SQL functions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// `sqlite3_create_function_v2` rejected one of the functions.
   #[error("failed to register SQL function '{name}': sqlite result code {code}")]
   RegistrationFailed { name: &'static str, code: i32 },

   /// Input exceeds the largest size Snappy can encode.
   #[error("snap: {0} bytes is too large to compress")]
   TooLarge(usize),

   #[error("snap: compression failed: {0}")]
   Compression(#[source] snap::Error),

   #[error("unsnap: corrupt payload: {0}")]
   Decompression(#[source] snap::Error),

   /// The leading byte of a snapped BLOB is not a known storage class.
   #[error("unsnap: unknown storage class byte {0}")]
   UnknownStorageClass(u8),
}
