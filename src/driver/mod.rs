#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::type_handler::JdbcType;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::mapping::StatementType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub jdbc_type: Option<JdbcType>,
    /// Driver-reported storage class or declared type, for diagnostics.
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSetMetadata {
    pub columns: Vec<ColumnInfo>,
}

impl ResultSetMetadata {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// One materialized result set. The driver adapter drains the wire before
/// projection starts, which keeps nested sub-queries free to reuse the
/// connection mid-projection.
#[derive(Debug, Clone, Default)]
pub struct ResultSetData {
    pub metadata: Arc<ResultSetMetadata>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSetData {
    pub fn row(&self, index: usize) -> ResultRow<'_> {
        ResultRow {
            metadata: &self.metadata,
            values: &self.rows[index],
        }
    }
}

/// Read view over one row.
#[derive(Clone, Copy)]
pub struct ResultRow<'a> {
    pub metadata: &'a ResultSetMetadata,
    pub values: &'a [Value],
}

static NULL: Value = Value::Null;

impl<'a> ResultRow<'a> {
    pub fn get(&self, column: &str) -> &'a Value {
        match self.metadata.column_index(column) {
            Some(i) => self.values.get(i).unwrap_or(&NULL),
            None => &NULL,
        }
    }

    pub fn get_by_index(&self, index: usize) -> &'a Value {
        self.values.get(index).unwrap_or(&NULL)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.metadata.column_index(column).is_some()
    }
}

/// Per-execution statement options handed to the driver.
#[derive(Debug, Clone, Default)]
pub struct StatementSpec {
    pub statement_type: StatementType,
    /// Effective query timeout in seconds: the smaller of the statement's
    /// own timeout and the transaction-level timeout.
    pub timeout: Option<u64>,
    pub fetch_size: Option<u32>,
    pub return_generated_keys: bool,
    pub key_columns: Vec<String>,
}

#[derive(Debug, Default)]
pub struct QueryResult {
    pub result_sets: Vec<ResultSetData>,
    /// OUT/INOUT parameter values reported by a callable statement, keyed
    /// by property name.
    pub out_parameters: HashMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct UpdateResult {
    pub affected: u64,
    pub generated_keys: Option<ResultSetData>,
}

#[derive(Debug, Default)]
pub struct BatchUpdateResult {
    pub counts: Vec<u64>,
    pub generated_keys: Option<ResultSetData>,
}

/// An open database connection. Implementations materialize result sets;
/// the tolerant skip-loop over update counts between real result sets
/// lives here, not in the projection code.
pub trait Connection: Send {
    fn query(
        &mut self,
        spec: &StatementSpec,
        sql: &str,
        params: &[(String, Value)],
    ) -> crate::Result<QueryResult>;

    fn update(
        &mut self,
        spec: &StatementSpec,
        sql: &str,
        params: &[(String, Value)],
    ) -> crate::Result<UpdateResult>;

    fn execute_batch(
        &mut self,
        spec: &StatementSpec,
        sql: &str,
        params_list: &[Vec<(String, Value)>],
    ) -> crate::Result<BatchUpdateResult>;

    fn begin(&mut self) -> crate::Result<()>;
    fn commit(&mut self) -> crate::Result<()>;
    fn rollback(&mut self) -> crate::Result<()>;
}

/// A registered database backend.
pub trait Driver: Send + Sync {
    /// Registration name, e.g. the environment id it serves.
    fn name(&self) -> &str;

    /// Backend kind, e.g. "sqlite"; matched against statement
    /// `databaseId` declarations.
    fn r#type(&self) -> &str;

    fn connect(&self) -> crate::Result<Box<dyn Connection>>;

    fn close(&self) -> crate::Result<()> {
        Ok(())
    }
}

/// Unit-of-work boundary owned by a session.
pub trait Transaction: Send {
    fn connection(&mut self) -> crate::Result<&mut dyn Connection>;
    fn commit(&mut self) -> crate::Result<()>;
    fn rollback(&mut self) -> crate::Result<()>;
    fn close(&mut self) -> crate::Result<()>;

    /// Transaction-level timeout cap in seconds, if the environment
    /// imposes one.
    fn timeout(&self) -> Option<u64> {
        None
    }
}

/// Driver-backed transaction that opens its connection lazily and issues
/// BEGIN only for non-autocommit work.
pub struct ManagedTransaction {
    driver: Arc<dyn Driver>,
    connection: Option<Box<dyn Connection>>,
    auto_commit: bool,
    started: bool,
}

impl ManagedTransaction {
    pub fn new(driver: Arc<dyn Driver>, auto_commit: bool) -> Self {
        Self {
            driver,
            connection: None,
            auto_commit,
            started: false,
        }
    }
}

impl Transaction for ManagedTransaction {
    fn connection(&mut self) -> crate::Result<&mut dyn Connection> {
        if self.connection.is_none() {
            let mut conn = self.driver.connect()?;
            if !self.auto_commit {
                conn.begin()?;
                self.started = true;
            }
            self.connection = Some(conn);
        }
        Ok(self.connection.as_mut().unwrap().as_mut())
    }

    fn commit(&mut self) -> crate::Result<()> {
        if self.started
            && let Some(conn) = self.connection.as_mut()
        {
            conn.commit()?;
            conn.begin()?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> crate::Result<()> {
        if self.started
            && let Some(conn) = self.connection.as_mut()
        {
            conn.rollback()?;
            conn.begin()?;
        }
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        if self.started
            && let Some(conn) = self.connection.as_mut()
        {
            // Dropping an open unit of work discards it.
            conn.rollback()?;
        }
        self.connection = None;
        self.started = false;
        Ok(())
    }
}

/// Named execution environment: a driver plus its transaction defaults.
#[derive(Clone)]
pub struct Environment {
    pub id: String,
    pub driver: Arc<dyn Driver>,
}

impl Environment {
    pub fn new(id: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self {
            id: id.into(),
            driver,
        }
    }

    pub fn new_transaction(&self, auto_commit: bool) -> Box<dyn Transaction> {
        Box::new(ManagedTransaction::new(self.driver.clone(), auto_commit))
    }
}
