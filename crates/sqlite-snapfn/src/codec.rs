//! Tagged Snappy payloads.

use libsqlite3_sys as ffi;
use snap::raw::{Decoder, Encoder, decompress_len, max_compress_len};

use crate::{Error, Result};

/// The storage class a snapped value is restored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
   Text,
   Blob,
}

impl StorageClass {
   /// Returns the leading byte written before the compressed payload.
   pub fn tag(self) -> u8 {
      match self {
         StorageClass::Text => ffi::SQLITE_TEXT as u8,
         StorageClass::Blob => ffi::SQLITE_BLOB as u8,
      }
   }

   /// Parses a leading byte back into a storage class.
   pub fn from_tag(tag: u8) -> Option<Self> {
      match i32::from(tag) {
         ffi::SQLITE_TEXT => Some(StorageClass::Text),
         ffi::SQLITE_BLOB => Some(StorageClass::Blob),
         _ => None,
      }
   }
}

/// Compresses `input` and prefixes it with the storage class tag.
pub fn compress(class: StorageClass, input: &[u8]) -> Result<Vec<u8>> {
   let bound = max_compress_len(input.len());
   if bound == 0 && !input.is_empty() {
      return Err(Error::TooLarge(input.len()));
   }

   let mut out = vec![0u8; 1 + bound];
   out[0] = class.tag();
   let written = Encoder::new()
      .compress(input, &mut out[1..])
      .map_err(Error::Compression)?;
   out.truncate(1 + written);
   Ok(out)
}

/// Splits off the storage class tag and decompresses the remainder.
pub fn decompress(input: &[u8]) -> Result<(StorageClass, Vec<u8>)> {
   let Some((&tag, payload)) = input.split_first() else {
      return Err(Error::Decompression(snap::Error::Empty));
   };
   let class = StorageClass::from_tag(tag).ok_or(Error::UnknownStorageClass(tag))?;

   let mut out = vec![0u8; decompress_len(payload).map_err(Error::Decompression)?];
   let written = Decoder::new()
      .decompress(payload, &mut out)
      .map_err(Error::Decompression)?;
   out.truncate(written);
   Ok((class, out))
}

#[cfg(test)]
mod tests {
   use super::*;

   const REPUBLIC: &[u8] = &[
      0x03, 0x20, 0x7C, 0x74, 0x6F, 0x64, 0x61, 0x79, 0x20, 0x69, 0x73, 0x20, 0x74, 0x68, 0x65,
      0x20, 0x65, 0x6E, 0x64, 0x20, 0x6F, 0x66, 0x20, 0x74, 0x68, 0x65, 0x20, 0x72, 0x65, 0x70,
      0x75, 0x62, 0x6C, 0x69, 0x63,
   ];

   #[test]
   fn test_tag_matches_sqlite_storage_class() {
      assert_eq!(StorageClass::Text.tag(), 3);
      assert_eq!(StorageClass::Blob.tag(), 4);
      assert_eq!(StorageClass::from_tag(3), Some(StorageClass::Text));
      assert_eq!(StorageClass::from_tag(4), Some(StorageClass::Blob));
      assert_eq!(StorageClass::from_tag(1), None);
   }

   #[test]
   fn test_decompress_known_payload() {
      let (class, bytes) = decompress(REPUBLIC).unwrap();
      assert_eq!(class, StorageClass::Text);
      assert_eq!(bytes, b"today is the end of the republic");
   }

   #[test]
   fn test_compress_shrinks_repetitive_input() {
      let input = vec![b'a'; 4096];
      let out = compress(StorageClass::Blob, &input).unwrap();
      assert_eq!(out[0], StorageClass::Blob.tag());
      assert!(out.len() < input.len() / 4);

      let (class, restored) = decompress(&out).unwrap();
      assert_eq!(class, StorageClass::Blob);
      assert_eq!(restored, input);
   }

   #[test]
   fn test_decompress_rejects_unknown_tag() {
      let err = decompress(&[0x09, 0x00]).unwrap_err();
      assert!(matches!(err, Error::UnknownStorageClass(9)));
      assert!(err.to_string().contains("9"));
   }

   #[test]
   fn test_decompress_rejects_truncated_payload() {
      assert!(matches!(decompress(&[]), Err(Error::Decompression(_))));
      assert!(matches!(decompress(&[0x03]), Err(Error::Decompression(_))));
      assert!(matches!(
         decompress(&REPUBLIC[..10]),
         Err(Error::Decompression(_))
      ));
   }
}
