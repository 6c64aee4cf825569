//! SQLite value to JSON conversion for dynamically typed query results

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteRow, SqliteValueRef};
use sqlx::{Column, Decode, Row, Sqlite, TypeInfo, ValueRef};

use crate::Error;

/// Convert a single SQLite value to JSON.
///
/// Uses the value's storage class: INTEGER as a JSON integer, REAL as a
/// number (NULL for NaN or infinities), TEXT as a string and BLOB as a
/// base64 string.
pub(crate) fn to_json(value: SqliteValueRef<'_>) -> Result<JsonValue, Error> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_name = value.type_info().name().to_ascii_uppercase();
   match type_name.as_str() {
      "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" | "NUMERIC" => {
         let v = <i64 as Decode<Sqlite>>::decode(value).map_err(sqlx::Error::Decode)?;
         Ok(JsonValue::from(v))
      }
      "REAL" | "FLOAT" | "DOUBLE" => {
         let v = <f64 as Decode<Sqlite>>::decode(value).map_err(sqlx::Error::Decode)?;
         Ok(serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number))
      }
      "TEXT" | "DATE" | "TIME" | "DATETIME" => {
         let v = <String as Decode<Sqlite>>::decode(value).map_err(sqlx::Error::Decode)?;
         Ok(JsonValue::String(v))
      }
      "BLOB" => {
         let v = <Vec<u8> as Decode<Sqlite>>::decode(value).map_err(sqlx::Error::Decode)?;
         Ok(JsonValue::String(BASE64.encode(v)))
      }
      _ => Err(Error::UnsupportedDatatype(type_name)),
   }
}

/// Decode one row into a column-ordered map.
pub(crate) fn row_to_json(row: &SqliteRow) -> Result<IndexMap<String, JsonValue>, Error> {
   let mut value = IndexMap::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let v = row.try_get_raw(i)?;
      value.insert(column.name().to_string(), to_json(v)?);
   }
   Ok(value)
}

/// Helper to decode SQLite rows to JSON
pub(crate) fn decode_rows(rows: &[SqliteRow]) -> Result<Vec<IndexMap<String, JsonValue>>, Error> {
   rows.iter().map(row_to_json).collect()
}
