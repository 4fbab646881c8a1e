use rusqlite::params_from_iter;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{
    BatchUpdateResult, ColumnInfo, Connection, Driver, QueryResult, ResultSetData,
    ResultSetMetadata, StatementSpec, UpdateResult,
};
use crate::error::Error;
use crate::type_handler::JdbcType;
use crate::value::Value;

const SQLITE_TYPE: &str = "sqlite";

/// Reference driver over rusqlite. Each `connect` opens a fresh physical
/// connection; an in-memory target therefore lives and dies with the
/// session that holds it.
pub struct SqliteDriver {
    name: String,
    url: String,
    /// None once built means in-memory.
    path: Option<String>,
    busy_timeout: Option<Duration>,
    built: bool,
}

impl SqliteDriver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: SQLITE_TYPE.to_string(),
            url: url.into(),
            path: None,
            busy_timeout: None,
            built: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub fn build(mut self) -> crate::Result<Self> {
        // Accepted url forms: "sqlite::memory:", "sqlite://<path>",
        // "sqlite:<path>", or a bare path.
        let rest = self
            .url
            .trim()
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim();
        if rest.is_empty() {
            return Err(Error::Driver(format!("invalid sqlite url '{}'", self.url)));
        }
        self.path = (rest != ":memory:").then(|| rest.to_string());
        self.built = true;
        Ok(self)
    }

    fn open_connection(&self) -> crate::Result<rusqlite::Connection> {
        if !self.built {
            return Err(Error::Driver(
                "sqlite driver used before build()".to_string(),
            ));
        }
        let conn = match &self.path {
            None => rusqlite::Connection::open_in_memory(),
            Some(p) => rusqlite::Connection::open(p),
        }
        .map_err(|e| Error::Driver(format!("failed to open connection: {}", e)))?;

        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout)
                .map_err(|e| Error::Driver(format!("failed to set busy_timeout: {}", e)))?;
        }
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| Error::Driver(format!("failed to set foreign_keys: {}", e)))?;

        Ok(conn)
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn r#type(&self) -> &str {
        SQLITE_TYPE
    }

    fn connect(&self) -> crate::Result<Box<dyn Connection>> {
        let conn = self.open_connection()?;
        Ok(Box::new(SqliteConnection::new(conn)))
    }
}

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }

    fn key_metadata(spec: &StatementSpec) -> Arc<ResultSetMetadata> {
        let column = spec
            .key_columns
            .first()
            .cloned()
            .unwrap_or_else(|| "id".to_string());
        Arc::new(ResultSetMetadata {
            columns: vec![ColumnInfo {
                name: column,
                jdbc_type: Some(JdbcType::BigInt),
                type_name: Some("INTEGER".to_string()),
            }],
        })
    }

    fn generated_keys(&self, spec: &StatementSpec) -> Option<ResultSetData> {
        if !spec.return_generated_keys {
            return None;
        }
        Some(ResultSetData {
            metadata: Self::key_metadata(spec),
            rows: vec![vec![Value::Long(self.conn.last_insert_rowid())]],
        })
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Driver(e.to_string())
}

fn bind_all(params: &[(String, Value)]) -> crate::Result<Vec<SqliteValue>> {
    params.iter().map(|(_, v)| bind_value(v)).collect()
}

impl Connection for SqliteConnection {
    fn query(
        &mut self,
        spec: &StatementSpec,
        sql: &str,
        params: &[(String, Value)],
    ) -> crate::Result<QueryResult> {
        let _ = spec;
        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;

        let column_count = stmt.column_count();
        let columns: Vec<ColumnInfo> = (0..column_count)
            .map(|i| ColumnInfo {
                name: stmt
                    .column_name(i)
                    .map(str::to_string)
                    .unwrap_or_else(|_| i.to_string()),
                jdbc_type: None,
                type_name: None,
            })
            .collect();
        let metadata = Arc::new(ResultSetMetadata { columns });

        let mut rows = stmt
            .query(params_from_iter(bind_all(params)?))
            .map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(column_value(row.get_ref(i).map_err(db_err)?));
            }
            out.push(values);
        }

        // SQLite produces exactly one result set per statement.
        Ok(QueryResult {
            result_sets: vec![ResultSetData {
                metadata,
                rows: out,
            }],
            out_parameters: Default::default(),
        })
    }

    fn update(
        &mut self,
        spec: &StatementSpec,
        sql: &str,
        params: &[(String, Value)],
    ) -> crate::Result<UpdateResult> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(bind_all(params)?))
            .map_err(db_err)? as u64;

        Ok(UpdateResult {
            affected,
            generated_keys: self.generated_keys(spec),
        })
    }

    fn execute_batch(
        &mut self,
        spec: &StatementSpec,
        sql: &str,
        params_list: &[Vec<(String, Value)>],
    ) -> crate::Result<BatchUpdateResult> {
        let mut counts = Vec::with_capacity(params_list.len());
        let mut key_rows = Vec::new();
        {
            let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
            for params in params_list {
                let affected = stmt
                    .execute(params_from_iter(bind_all(params)?))
                    .map_err(db_err)?;
                counts.push(affected as u64);
                if spec.return_generated_keys {
                    key_rows.push(vec![Value::Long(self.conn.last_insert_rowid())]);
                }
            }
        }

        let generated_keys = spec.return_generated_keys.then(|| ResultSetData {
            metadata: Self::key_metadata(spec),
            rows: key_rows,
        });

        Ok(BatchUpdateResult {
            counts,
            generated_keys,
        })
    }

    fn begin(&mut self) -> crate::Result<()> {
        self.conn.execute_batch("BEGIN").map_err(db_err)
    }

    fn commit(&mut self) -> crate::Result<()> {
        self.conn.execute_batch("COMMIT").map_err(db_err)
    }

    fn rollback(&mut self) -> crate::Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(db_err)
    }
}

/// SQLite's four storage classes map onto the widest matching variant;
/// TEXT is UTF-8 by definition, so invalid bytes are replaced rather than
/// reinterpreted as a blob.
fn column_value(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Long(n),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Binds one engine value as a SQLite parameter. Integrals collapse into
/// the INTEGER storage class; temporal and decimal values bind as their
/// canonical text rendering, which is what SQLite's date functions and
/// numeric affinity expect. Composite values have no storage class and are
/// rejected (a list parameter that reaches the driver means a `<foreach>`
/// was missed).
fn bind_value(v: &Value) -> crate::Result<SqliteValue> {
    let bound = match v {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Byte(_) | Value::Short(_) | Value::Int(_) | Value::Long(_) => {
            SqliteValue::Integer(v.as_i64().unwrap_or_default())
        }
        Value::Double(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Blob(bytes) => SqliteValue::Blob(bytes.clone()),
        Value::Date(_)
        | Value::Time(_)
        | Value::DateTime(_)
        | Value::Timestamp(_)
        | Value::Decimal(_) => SqliteValue::Text(v.to_sql_text()),
        Value::List(_) | Value::Map(_) => {
            return Err(Error::TypeConversion(format!(
                "cannot bind a {} as a sqlite parameter",
                v.type_alias()
            )));
        }
    };
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip() {
        let driver = SqliteDriver::new("sqlite::memory:").build().unwrap();
        let mut conn = driver.connect().unwrap();
        let spec = StatementSpec::default();

        conn.update(
            &spec,
            "CREATE TABLE user (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
            &[],
        )
        .unwrap();

        let mut insert_spec = StatementSpec::default();
        insert_spec.return_generated_keys = true;
        insert_spec.key_columns = vec!["id".to_string()];
        let result = conn
            .update(
                &insert_spec,
                "INSERT INTO user(name) VALUES (?)",
                &[("name".to_string(), Value::Text("alice".to_string()))],
            )
            .unwrap();
        assert_eq!(result.affected, 1);
        let keys = result.generated_keys.unwrap();
        assert_eq!(keys.rows.len(), 1);

        let out = conn
            .query(
                &spec,
                "SELECT id, name FROM user WHERE id = ?",
                &[("id".to_string(), keys.rows[0][0].clone())],
            )
            .unwrap();
        let rs = &out.result_sets[0];
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.row(0).get("name"), &Value::Text("alice".to_string()));
    }

    #[test]
    fn test_batch_counts_and_keys() {
        let driver = SqliteDriver::new("sqlite::memory:").build().unwrap();
        let mut conn = driver.connect().unwrap();
        conn.update(
            &StatementSpec::default(),
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, v TEXT)",
            &[],
        )
        .unwrap();

        let mut spec = StatementSpec::default();
        spec.return_generated_keys = true;
        let result = conn
            .execute_batch(
                &spec,
                "INSERT INTO t(v) VALUES (?)",
                &[
                    vec![("v".to_string(), Value::Text("a".to_string()))],
                    vec![("v".to_string(), Value::Text("b".to_string()))],
                ],
            )
            .unwrap();
        assert_eq!(result.counts, vec![1, 1]);
        assert_eq!(result.generated_keys.unwrap().rows.len(), 2);
    }

    #[test]
    fn test_url_forms() {
        assert!(SqliteDriver::new("sqlite::memory:").build().is_ok());
        assert!(SqliteDriver::new("sqlite://some/file.db").build().is_ok());
        assert!(SqliteDriver::new("sqlite:").build().is_err());
    }

    #[test]
    fn test_composite_bind_rejected() {
        let err = bind_value(&Value::List(vec![Value::Long(1)])).unwrap_err();
        assert!(matches!(err, Error::TypeConversion(_)));
        assert_eq!(
            bind_value(&Value::Short(3)).unwrap(),
            SqliteValue::Integer(3)
        );
    }
}
