#![allow(dead_code)]

use ibatix::driver::{
    BatchUpdateResult, ColumnInfo, Connection, Driver, QueryResult, ResultSetData,
    ResultSetMetadata, StatementSpec, UpdateResult,
};
use ibatix::value::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Builds a result set from column names and row values.
pub fn rs(columns: &[&str], rows: Vec<Vec<Value>>) -> ResultSetData {
    ResultSetData {
        metadata: Arc::new(ResultSetMetadata {
            columns: columns
                .iter()
                .map(|c| ColumnInfo {
                    name: c.to_string(),
                    jdbc_type: None,
                    type_name: None,
                })
                .collect(),
        }),
        rows,
    }
}

#[derive(Default)]
struct MockState {
    responses: HashMap<String, Vec<ResultSetData>>,
    queries: Vec<String>,
    updates: Vec<String>,
}

/// Scripted in-memory driver: queries are answered by exact SQL text,
/// every call is logged, and generated keys count up from 100.
#[derive(Clone)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    next_key: Arc<AtomicI64>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            next_key: Arc::new(AtomicI64::new(100)),
        }
    }

    pub fn respond(&self, sql: &str, result_sets: Vec<ResultSetData>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(sql.to_string(), result_sets);
    }

    pub fn query_count(&self, sql: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queries
            .iter()
            .filter(|s| s.as_str() == sql)
            .count()
    }

    pub fn total_queries(&self) -> usize {
        self.state.lock().unwrap().queries.len()
    }

    pub fn updates(&self) -> Vec<String> {
        self.state.lock().unwrap().updates.clone()
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn r#type(&self) -> &str {
        "mock"
    }

    fn connect(&self) -> ibatix::Result<Box<dyn Connection>> {
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            next_key: self.next_key.clone(),
        }))
    }
}

pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    next_key: Arc<AtomicI64>,
}

impl MockConnection {
    fn key_set(&self, spec: &StatementSpec, count: usize) -> Option<ResultSetData> {
        if !spec.return_generated_keys {
            return None;
        }
        let column = spec
            .key_columns
            .first()
            .cloned()
            .unwrap_or_else(|| "id".to_string());
        let rows = (0..count)
            .map(|_| vec![Value::Long(self.next_key.fetch_add(1, Ordering::SeqCst))])
            .collect();
        Some(rs(&[column.as_str()], rows))
    }
}

impl Connection for MockConnection {
    fn query(
        &mut self,
        _spec: &StatementSpec,
        sql: &str,
        _params: &[(String, Value)],
    ) -> ibatix::Result<QueryResult> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(sql.to_string());
        let result_sets = state.responses.get(sql).cloned().unwrap_or_default();
        Ok(QueryResult {
            result_sets,
            out_parameters: HashMap::new(),
        })
    }

    fn update(
        &mut self,
        spec: &StatementSpec,
        sql: &str,
        _params: &[(String, Value)],
    ) -> ibatix::Result<UpdateResult> {
        self.state.lock().unwrap().updates.push(sql.to_string());
        Ok(UpdateResult {
            affected: 1,
            generated_keys: self.key_set(spec, 1),
        })
    }

    fn execute_batch(
        &mut self,
        spec: &StatementSpec,
        sql: &str,
        params_list: &[Vec<(String, Value)>],
    ) -> ibatix::Result<BatchUpdateResult> {
        self.state.lock().unwrap().updates.push(sql.to_string());
        Ok(BatchUpdateResult {
            counts: vec![1; params_list.len()],
            generated_keys: self.key_set(spec, params_list.len()),
        })
    }

    fn begin(&mut self) -> ibatix::Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> ibatix::Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> ibatix::Result<()> {
        Ok(())
    }
}
