pub mod base;
pub mod caching;
pub mod keygen;
pub mod loader;
pub mod parameter;
pub mod result_set;

use crate::cache::CacheKey;
use crate::config::Configuration;
use crate::error::Error;
use crate::mapping::{BoundSql, MappedStatement, RowBounds};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;

/// Row objects stay shared and mutable for the duration of the outermost
/// query so deferred loads and nested-result collapsing can write into
/// them; they are materialized to plain values when the query returns.
/// Sessions own exactly one thread, so non-atomic sharing is safe here.
pub type Row = Rc<RefCell<Value>>;

pub fn new_row(value: Value) -> Row {
    Rc::new(RefCell::new(value))
}

pub fn materialize(rows: &[Row]) -> Vec<Value> {
    rows.iter().map(|r| r.borrow().clone()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorType {
    #[default]
    Simple,
    Batch,
}

impl FromStr for ExecutorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "SIMPLE" => Ok(ExecutorType::Simple),
            "BATCH" => Ok(ExecutorType::Batch),
            other => Err(Error::builder(format!("unknown executor type '{}'", other))),
        }
    }
}

/// Marker update count returned while a statement sits in an unflushed
/// batch.
pub const BATCH_UPDATE_RETURN_VALUE: u64 = u64::MAX;

/// Outcome of one flushed batch statement.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub statement_id: String,
    pub sql: String,
    /// Parameter objects in accumulation order, with generated keys
    /// applied where the statement asked for them.
    pub parameters: Vec<Value>,
    pub update_counts: Vec<u64>,
}

/// Streaming consumer for projected rows; returning `false` stops the
/// scan.
pub trait ResultHandler {
    fn handle_result(&mut self, value: &Value) -> bool;
}

/// Forward-only view over a query's projected rows. Driver adapters
/// materialize result sets before projection, so the cursor iterates an
/// owned buffer rather than a live wire.
pub struct Cursor {
    rows: std::vec::IntoIter<Value>,
}

impl Cursor {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl Iterator for Cursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.rows.next()
    }
}

/// Polymorphic execution strategy. `Base` (simple/batch) implements
/// session caching and deferred-load orchestration; the caching decorator
/// layers the namespace cache on top.
pub trait Executor {
    fn configuration(&self) -> &Arc<Configuration>;

    fn query(
        &mut self,
        ms: &Arc<MappedStatement>,
        parameter: &mut Value,
        row_bounds: RowBounds,
        result_handler: Option<&mut dyn ResultHandler>,
    ) -> crate::Result<Vec<Row>>;

    /// Cursor variant of `query`: same pipeline, forward-only result.
    fn query_cursor(
        &mut self,
        ms: &Arc<MappedStatement>,
        parameter: &mut Value,
        row_bounds: RowBounds,
    ) -> crate::Result<Cursor> {
        let rows = self.query(ms, parameter, row_bounds, None)?;
        Ok(Cursor::new(materialize(&rows)))
    }

    fn update(&mut self, ms: &Arc<MappedStatement>, parameter: &mut Value) -> crate::Result<u64>;

    fn flush_statements(&mut self) -> crate::Result<Vec<BatchResult>>;

    fn commit(&mut self, required: bool) -> crate::Result<()>;

    fn rollback(&mut self, required: bool) -> crate::Result<()>;

    fn create_cache_key(
        &self,
        ms: &MappedStatement,
        parameter: &Value,
        row_bounds: &RowBounds,
        bound_sql: &BoundSql,
    ) -> CacheKey;

    /// Whether the session cache holds anything (result or in-progress
    /// sentinel) for the key; drives deferred-load decisions during
    /// nested projection.
    fn is_cached(&self, key: &CacheKey) -> bool;

    fn defer_load(
        &mut self,
        target: Row,
        property: String,
        key: CacheKey,
        target_is_list: bool,
    ) -> crate::Result<()>;

    fn clear_local_cache(&mut self);

    fn close(&mut self, force_rollback: bool);

    fn is_closed(&self) -> bool;
}
