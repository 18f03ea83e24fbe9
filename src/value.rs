use crate::statement::Statement;

/// Storage class of a column value in the current row.
///
/// SQLite is dynamically typed, so the type of a column can vary from row
/// to row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
   Integer,
   Float,
   Text,
   Blob,
   Null,
}

impl ColumnType {
   pub(crate) fn from_code(code: i32) -> Self {
      match code {
         libsqlite3_sys::SQLITE_INTEGER => ColumnType::Integer,
         libsqlite3_sys::SQLITE_FLOAT => ColumnType::Float,
         libsqlite3_sys::SQLITE_TEXT => ColumnType::Text,
         libsqlite3_sys::SQLITE_BLOB => ColumnType::Blob,
         _ => ColumnType::Null,
      }
   }
}

/// Typed column value from SQLite.
///
/// Unlike [`Statement::column_string`], this keeps NULL and an empty BLOB
/// apart.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
   Null,
   Integer(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl ColumnValue {
   /// Reads column `column` of the current row without coercion.
   pub(crate) fn read(stmt: &Statement, column: usize) -> Self {
      match stmt.column_type(column) {
         ColumnType::Null => ColumnValue::Null,
         ColumnType::Integer => ColumnValue::Integer(stmt.column_int(column)),
         ColumnType::Float => ColumnValue::Real(stmt.column_double(column)),
         ColumnType::Text => {
            ColumnValue::Text(String::from_utf8_lossy(stmt.column_string_ref(column)).into_owned())
         }
         ColumnType::Blob => ColumnValue::Blob(stmt.column_string(column)),
      }
   }

   pub fn is_null(&self) -> bool {
      matches!(self, ColumnValue::Null)
   }

   /// Storage class this value was read with.
   pub fn column_type(&self) -> ColumnType {
      match self {
         ColumnValue::Null => ColumnType::Null,
         ColumnValue::Integer(_) => ColumnType::Integer,
         ColumnValue::Real(_) => ColumnType::Float,
         ColumnValue::Text(_) => ColumnType::Text,
         ColumnValue::Blob(_) => ColumnType::Blob,
      }
   }

   /// Bytes of a TEXT or BLOB value.
   ///
   /// `None` for NULL and numbers, so unlike
   /// [`Statement::column_string`] an empty BLOB (`Some(&[])`) is not
   /// mistaken for NULL.
   pub fn as_bytes(&self) -> Option<&[u8]> {
      match self {
         ColumnValue::Text(s) => Some(s.as_bytes()),
         ColumnValue::Blob(b) => Some(b),
         _ => None,
      }
   }

   /// The value of an INTEGER. REAL values are not truncated.
   pub fn as_i64(&self) -> Option<i64> {
      match self {
         ColumnValue::Integer(i) => Some(*i),
         _ => None,
      }
   }

   /// The value of a REAL, with INTEGER widened the way SQLite compares
   /// numbers.
   pub fn as_f64(&self) -> Option<f64> {
      match self {
         ColumnValue::Real(r) => Some(*r),
         ColumnValue::Integer(i) => Some(*i as f64),
         _ => None,
      }
   }
}

impl From<i64> for ColumnValue {
   fn from(value: i64) -> Self {
      ColumnValue::Integer(value)
   }
}

impl From<f64> for ColumnValue {
   fn from(value: f64) -> Self {
      ColumnValue::Real(value)
   }
}

impl From<&str> for ColumnValue {
   fn from(value: &str) -> Self {
      ColumnValue::Text(value.to_owned())
   }
}

impl From<String> for ColumnValue {
   fn from(value: String) -> Self {
      ColumnValue::Text(value)
   }
}

impl From<Vec<u8>> for ColumnValue {
   fn from(value: Vec<u8>) -> Self {
      ColumnValue::Blob(value)
   }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
   fn from(value: Option<T>) -> Self {
      value.map_or(ColumnValue::Null, Into::into)
   }
}
