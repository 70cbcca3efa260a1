//! JSON conversion of parameters and rows.
//!
//! Parameters given as JSON are bound with their closest SQLite type. Rows are
//! decoded into ordered maps from column name to JSON value, with blobs
//! encoded as base64.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::column::Column;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::statement::{Statement, Step};
use crate::transaction::{Transaction, TransactionBehavior};
use crate::value::Value;

/// A decoded row: column name to value, in result column order.
pub type JsonRow = IndexMap<String, JsonValue>;

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: usize,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only meaningful after an INSERT into a table with a ROWID. Otherwise
   /// it is whatever the connection reported last (0 if nothing was inserted).
   pub last_insert_id: i64,
}

/// Convert a JSON parameter to the value that gets bound.
pub fn value_from_json(value: JsonValue) -> Value {
   match value {
      JsonValue::Null => Value::Null,
      JsonValue::String(s) => Value::Text(s),
      JsonValue::Bool(b) => Value::Integer(i64::from(b)),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            Value::Integer(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Value too large for i64, use f64 (will lose precision)
            Value::Real(uint_val as f64)
         } else {
            Value::Real(number.as_f64().unwrap_or_default())
         }
      }
      // Arrays and objects are stored as their JSON text
      other @ (JsonValue::Array(_) | JsonValue::Object(_)) => Value::Text(other.to_string()),
   }
}

/// Convert a value to JSON. Blobs become base64 strings, non-finite reals null.
pub fn value_to_json(value: &Value) -> JsonValue {
   match value {
      Value::Null => JsonValue::Null,
      Value::Integer(i) => JsonValue::from(*i),
      Value::Real(r) => serde_json::Number::from_f64(*r).map_or(JsonValue::Null, JsonValue::Number),
      Value::Text(s) => JsonValue::String(s.clone()),
      Value::Blob(b) => JsonValue::String(STANDARD.encode(b)),
   }
}

impl Column<'_> {
   /// The column value as JSON.
   pub fn to_json(&self) -> JsonValue {
      value_to_json(&self.value())
   }
}

impl Statement<'_> {
   /// Bind JSON values to parameters `1..=values.len()`.
   pub fn bind_json(&mut self, values: Vec<JsonValue>) -> Result<()> {
      self.bind_all(values.into_iter().map(value_from_json))
   }

   /// The current row as an ordered map from column name to JSON value.
   ///
   /// With duplicate column names the last column wins.
   pub fn row_to_json(&self) -> Result<JsonRow> {
      self.check_row()?;
      let mut row = IndexMap::with_capacity(self.column_count());
      for index in 0..self.column_count() {
         let column = self.column(index)?;
         row.insert(column.name(), column.to_json());
      }
      Ok(row)
   }

   /// Step through all remaining rows, decoding each one.
   pub fn fetch_all_json(&mut self) -> Result<Vec<JsonRow>> {
      let mut rows = Vec::new();
      while self.step()? == Step::Row {
         rows.push(self.row_to_json()?);
      }
      Ok(rows)
   }
}

impl Database {
   /// Execute a SELECT query, possibly returning multiple rows.
   pub fn fetch_all(&self, query: &str, values: Vec<JsonValue>) -> Result<Vec<JsonRow>> {
      let mut statement = Statement::new(self, query)?;
      statement.bind_json(values)?;
      let rows = statement.fetch_all_json()?;
      trace!(query, rows = rows.len(), "fetch_all");
      Ok(rows)
   }

   /// Execute a SELECT query expected to return zero or one row.
   ///
   /// Fails with [`Error::MultipleRowsReturned`] when the query yields more
   /// than one row.
   pub fn fetch_one(&self, query: &str, values: Vec<JsonValue>) -> Result<Option<JsonRow>> {
      let mut statement = Statement::new(self, query)?;
      statement.bind_json(values)?;
      if statement.step()? == Step::Done {
         return Ok(None);
      }

      let row = statement.row_to_json()?;
      let mut count = 1;
      while statement.step()? == Step::Row {
         count += 1;
      }

      match count {
         1 => Ok(Some(row)),
         count => Err(Error::MultipleRowsReturned(count)),
      }
   }

   /// Execute a write query (INSERT/UPDATE/DELETE).
   pub fn execute(&self, query: &str, values: Vec<JsonValue>) -> Result<WriteQueryResult> {
      let mut statement = Statement::new(self, query)?;
      statement.bind_json(values)?;
      let rows_affected = statement.execute()?;
      Ok(WriteQueryResult {
         rows_affected,
         last_insert_id: self.last_insert_rowid(),
      })
   }

   /// Execute multiple write statements atomically within a transaction.
   ///
   /// The transaction is started with `BEGIN IMMEDIATE` and committed once all
   /// statements succeeded. On the first failure it is rolled back and the
   /// error returned.
   pub fn execute_transaction(
      &self,
      statements: Vec<(String, Vec<JsonValue>)>,
   ) -> Result<Vec<WriteQueryResult>> {
      let tx = Transaction::with_behavior(self, TransactionBehavior::Immediate)?;
      let mut results = Vec::with_capacity(statements.len());
      for (query, values) in statements {
         results.push(tx.execute(&query, values)?);
      }
      tx.commit()?;
      Ok(results)
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   fn test_db() -> Database {
      let db = Database::open_in_memory().unwrap();
      db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, flag INTEGER, data BLOB)")
         .unwrap();
      db
   }

   #[test]
   fn test_value_from_json() {
      assert_eq!(value_from_json(json!(null)), Value::Null);
      assert_eq!(value_from_json(json!("a")), Value::Text("a".into()));
      assert_eq!(value_from_json(json!(true)), Value::Integer(1));
      assert_eq!(value_from_json(json!(-7)), Value::Integer(-7));
      assert_eq!(value_from_json(json!(1.5)), Value::Real(1.5));
      assert_eq!(
         value_from_json(json!(u64::MAX)),
         Value::Real(u64::MAX as f64)
      );
      assert_eq!(
         value_from_json(json!({"a": [1, 2]})),
         Value::Text(r#"{"a":[1,2]}"#.into())
      );
   }

   #[test]
   fn test_value_to_json() {
      assert_eq!(value_to_json(&Value::Blob(b"Hello".to_vec())), json!("SGVsbG8="));
      assert_eq!(value_to_json(&Value::Real(f64::NAN)), JsonValue::Null);
      assert_eq!(value_to_json(&Value::Integer(3)), json!(3));
   }

   #[test]
   fn test_fetch_all_decodes_types_in_column_order() {
      let db = test_db();
      db.execute(
         "INSERT INTO t (name, score, flag, data) VALUES (?, ?, ?, ?)",
         vec![json!("alice"), json!(9.5), json!(true), json!(null)],
      )
      .unwrap();
      db.exec("INSERT INTO t (name, data) VALUES ('bob', x'48656c6c6f')").unwrap();

      let rows = db
         .fetch_all("SELECT data, name, score, flag FROM t ORDER BY id", vec![])
         .unwrap();
      assert_eq!(rows.len(), 2);

      let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
      assert_eq!(keys, ["data", "name", "score", "flag"]);
      assert_eq!(rows[0]["name"], json!("alice"));
      assert_eq!(rows[0]["score"], json!(9.5));
      assert_eq!(rows[0]["flag"], json!(1));
      assert_eq!(rows[0]["data"], JsonValue::Null);
      assert_eq!(rows[1]["data"], json!("SGVsbG8="));
      assert_eq!(rows[1]["score"], JsonValue::Null);
   }

   #[test]
   fn test_execute_reports_write_result() {
      let db = test_db();
      let first = db
         .execute("INSERT INTO t (name) VALUES (?)", vec![json!("a")])
         .unwrap();
      assert_eq!(
         first,
         WriteQueryResult {
            rows_affected: 1,
            last_insert_id: 1
         }
      );

      db.execute("INSERT INTO t (name) VALUES (?)", vec![json!("b")])
         .unwrap();
      let update = db
         .execute("UPDATE t SET flag = ? WHERE id > ?", vec![json!(0), json!(0)])
         .unwrap();
      assert_eq!(update.rows_affected, 2);

      assert_eq!(
         serde_json::to_value(&update).unwrap(),
         json!({ "rows_affected": 2, "last_insert_id": 2 })
      );
   }

   #[test]
   fn test_fetch_one() {
      let db = test_db();
      db.exec("INSERT INTO t (name) VALUES ('only')").unwrap();

      let row = db
         .fetch_one("SELECT id, name FROM t WHERE name = ?", vec![json!("only")])
         .unwrap()
         .unwrap();
      assert_eq!(row["id"], json!(1));

      let none = db
         .fetch_one("SELECT id FROM t WHERE name = ?", vec![json!("missing")])
         .unwrap();
      assert!(none.is_none());
   }

   #[test]
   fn test_fetch_one_rejects_multiple_rows() {
      let db = test_db();
      db.exec("INSERT INTO t (name) VALUES ('a'), ('b'), ('c')").unwrap();

      let err = db.fetch_one("SELECT id FROM t", vec![]).unwrap_err();
      assert!(matches!(err, Error::MultipleRowsReturned(3)));
      assert_eq!(err.error_code(), "MULTIPLE_ROWS_RETURNED");
   }

   #[test]
   fn test_execute_transaction_is_atomic() {
      let db = test_db();
      let results = db
         .execute_transaction(vec![
            ("INSERT INTO t (id, name) VALUES (?, ?)".into(), vec![json!(1), json!("a")]),
            ("INSERT INTO t (id, name) VALUES (?, ?)".into(), vec![json!(2), json!("b")]),
         ])
         .unwrap();
      assert_eq!(results.len(), 2);
      assert_eq!(results[1].last_insert_id, 2);

      let err = db
         .execute_transaction(vec![
            ("INSERT INTO t (id, name) VALUES (?, ?)".into(), vec![json!(3), json!("c")]),
            ("INSERT INTO t (id, name) VALUES (?, ?)".into(), vec![json!(1), json!("dup")]),
         ])
         .unwrap_err();
      assert_eq!(err.error_code(), "STEP_ERROR");

      let count = db.fetch_all("SELECT id FROM t", vec![]).unwrap().len();
      assert_eq!(count, 2);
   }

   #[test]
   fn test_row_to_json_requires_row() {
      let db = test_db();
      let statement = Statement::new(&db, "SELECT * FROM t").unwrap();
      assert_eq!(statement.row_to_json().unwrap_err().error_code(), "NO_ROW");
   }
}
