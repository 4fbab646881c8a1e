use crate::builder::xml::XmlConfigBuilder;
use crate::builder::xml::XmlMapperBuilder;
use crate::config::Configuration;
use crate::error::Error;
use crate::executor::caching::CachingExecutor;
use crate::executor::{
    BatchResult, Executor, ExecutorType, ResultHandler, base, materialize,
};
use crate::mapping::RowBounds;
use crate::plugin;
use crate::reflection;
use crate::value::{Value, from_value, to_value};
use glob::glob;
use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

/// Builds a `SqlSessionFactory` from a top-level configuration document
/// and/or programmatic registration, loading mapper XML files from the
/// filesystem by glob pattern.
#[derive(Default)]
pub struct SqlSessionFactoryBuilder;

impl SqlSessionFactoryBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Parses the top-level configuration XML and every mapper it names.
    pub fn build_from_config(&self, config_xml: &str) -> crate::Result<SqlSessionFactory> {
        let mut configuration = Configuration::new();
        XmlConfigBuilder::new(&mut configuration).parse(config_xml)?;
        configuration.check_incomplete()?;
        Ok(SqlSessionFactory::new(configuration))
    }

    pub fn build(&self, configuration: Configuration) -> crate::Result<SqlSessionFactory> {
        configuration.check_incomplete()?;
        Ok(SqlSessionFactory::new(configuration))
    }

    /// Registers every mapper XML matching a glob pattern, e.g.
    /// `resources/mappers/**/*.xml`.
    pub fn load_mapper_files(
        &self,
        configuration: &mut Configuration,
        pattern: &str,
    ) -> crate::Result<()> {
        let paths = glob(pattern)
            .map_err(|e| Error::builder(format!("bad mapper glob pattern '{}': {}", pattern, e)))?;
        for entry in paths {
            let path = entry
                .map_err(|e| Error::builder(format!("unreadable path under '{}': {}", pattern, e)))?;
            if !path.is_file() {
                continue;
            }
            let source = path.display().to_string();
            if configuration.is_resource_loaded(&source) {
                continue;
            }
            let xml = fs::read_to_string(&path)
                .map_err(|e| Error::builder(format!("cannot read '{}': {}", source, e)))?;
            XmlMapperBuilder::new(configuration, &source).parse(&xml)?;
        }
        Ok(())
    }
}

/// Creates sessions over a shared, effectively-immutable configuration.
pub struct SqlSessionFactory {
    configuration: Arc<Configuration>,
}

impl SqlSessionFactory {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration: Arc::new(configuration),
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn open_session(&self) -> crate::Result<SqlSession> {
        self.open_session_with(
            self.configuration.settings.default_executor_type,
            false,
        )
    }

    pub fn open_session_with(
        &self,
        executor_type: ExecutorType,
        auto_commit: bool,
    ) -> crate::Result<SqlSession> {
        let environment = self
            .configuration
            .environment()
            .ok_or_else(|| Error::builder("no environment configured"))?;
        let transaction = environment.new_transaction(auto_commit);

        let mut executor: Box<dyn Executor> = match executor_type {
            ExecutorType::Simple => Box::new(base::new_simple_executor(
                self.configuration.clone(),
                transaction,
            )),
            ExecutorType::Batch => Box::new(base::new_batch_executor(
                self.configuration.clone(),
                transaction,
            )),
        };
        if self.configuration.settings.cache_enabled {
            executor = Box::new(CachingExecutor::new(executor));
        }
        executor = plugin::apply_interceptors(&self.configuration, executor);

        Ok(SqlSession {
            configuration: self.configuration.clone(),
            executor,
            auto_commit,
            dirty: false,
            closed: false,
        })
    }
}

/// One unit of work: owns an executor, its transaction and the session
/// caches. Cheap to create, explicitly closed, and bound to a single
/// thread (it is deliberately not `Send`).
pub struct SqlSession {
    configuration: Arc<Configuration>,
    executor: Box<dyn Executor>,
    auto_commit: bool,
    dirty: bool,
    closed: bool,
}

impl SqlSession {
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    /* ------------------------------- reads -------------------------------- */

    pub fn select_list<P: Serialize, T: DeserializeOwned>(
        &mut self,
        statement: &str,
        parameter: &P,
    ) -> crate::Result<Vec<T>> {
        self.select_list_with_bounds(statement, parameter, RowBounds::DEFAULT)
    }

    pub fn select_list_with_bounds<P: Serialize, T: DeserializeOwned>(
        &mut self,
        statement: &str,
        parameter: &P,
        row_bounds: RowBounds,
    ) -> crate::Result<Vec<T>> {
        let rows = self.select_raw_with_bounds(statement, parameter, row_bounds)?;
        rows.into_iter().map(from_value).collect()
    }

    pub fn select_one<P: Serialize, T: DeserializeOwned>(
        &mut self,
        statement: &str,
        parameter: &P,
    ) -> crate::Result<Option<T>> {
        let mut rows = self.select_raw(statement, parameter)?;
        match rows.len() {
            0 => Ok(None),
            1 => {
                let row = rows.pop().unwrap();
                if row.is_null() {
                    Ok(None)
                } else {
                    Ok(Some(from_value(row)?))
                }
            }
            n => Err(Error::executor(format!(
                "expected one row from '{}', got {}",
                statement, n
            ))),
        }
    }

    /// Projects a list into a map keyed by one property of each row.
    pub fn select_map<P: Serialize, T: DeserializeOwned>(
        &mut self,
        statement: &str,
        parameter: &P,
        map_key: &str,
    ) -> crate::Result<HashMap<String, T>> {
        let rows = self.select_raw(statement, parameter)?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let key = reflection::get_value(&row, map_key).to_sql_text();
            out.insert(key, from_value(row)?);
        }
        Ok(out)
    }

    pub fn select_raw<P: Serialize>(
        &mut self,
        statement: &str,
        parameter: &P,
    ) -> crate::Result<Vec<Value>> {
        self.select_raw_with_bounds(statement, parameter, RowBounds::DEFAULT)
    }

    pub fn select_raw_with_bounds<P: Serialize>(
        &mut self,
        statement: &str,
        parameter: &P,
        row_bounds: RowBounds,
    ) -> crate::Result<Vec<Value>> {
        self.ensure_open()?;
        let ms = self.configuration.get_mapped_statement(statement)?;
        let mut parameter = wrap_collection(to_value(parameter)?);
        let rows = self.executor.query(&ms, &mut parameter, row_bounds, None)?;
        Ok(materialize(&rows))
    }

    /// Forward-only iteration over the projected rows, deserializing
    /// lazily.
    pub fn select_cursor<P: Serialize, T: DeserializeOwned>(
        &mut self,
        statement: &str,
        parameter: &P,
    ) -> crate::Result<impl Iterator<Item = crate::Result<T>> + use<P, T>> {
        self.ensure_open()?;
        let ms = self.configuration.get_mapped_statement(statement)?;
        let mut parameter = wrap_collection(to_value(parameter)?);
        let cursor = self
            .executor
            .query_cursor(&ms, &mut parameter, RowBounds::DEFAULT)?;
        Ok(cursor.map(from_value::<T>))
    }

    /// Streams each projected row through a caller-supplied handler
    /// instead of accumulating a list (results are not cached).
    pub fn select_with_handler<P: Serialize>(
        &mut self,
        statement: &str,
        parameter: &P,
        handler: &mut dyn ResultHandler,
    ) -> crate::Result<()> {
        self.ensure_open()?;
        let ms = self.configuration.get_mapped_statement(statement)?;
        let mut parameter = wrap_collection(to_value(parameter)?);
        self.executor
            .query(&ms, &mut parameter, RowBounds::DEFAULT, Some(handler))?;
        Ok(())
    }

    /* ------------------------------- writes ------------------------------- */

    pub fn insert<P: Serialize>(&mut self, statement: &str, parameter: &P) -> crate::Result<u64> {
        self.update(statement, parameter)
    }

    /// Insert variant that writes generated keys (and select-key results)
    /// back into the caller's parameter object.
    pub fn insert_with_keys<P: Serialize + DeserializeOwned>(
        &mut self,
        statement: &str,
        parameter: &mut P,
    ) -> crate::Result<u64> {
        self.ensure_open()?;
        let ms = self.configuration.get_mapped_statement(statement)?;
        let mut value = wrap_collection(to_value(&*parameter)?);
        let affected = self.executor.update(&ms, &mut value)?;
        self.dirty = true;
        *parameter = from_value(unwrap_collection(value))?;
        Ok(affected)
    }

    pub fn update<P: Serialize>(&mut self, statement: &str, parameter: &P) -> crate::Result<u64> {
        self.ensure_open()?;
        let ms = self.configuration.get_mapped_statement(statement)?;
        let mut value = wrap_collection(to_value(parameter)?);
        let affected = self.executor.update(&ms, &mut value)?;
        self.dirty = true;
        Ok(affected)
    }

    pub fn delete<P: Serialize>(&mut self, statement: &str, parameter: &P) -> crate::Result<u64> {
        self.update(statement, parameter)
    }

    pub fn flush_statements(&mut self) -> crate::Result<Vec<BatchResult>> {
        self.ensure_open()?;
        self.executor.flush_statements()
    }

    /* ------------------------------ lifecycle ------------------------------ */

    pub fn commit(&mut self) -> crate::Result<()> {
        self.ensure_open()?;
        self.executor.commit(self.commit_required())?;
        self.dirty = false;
        Ok(())
    }

    pub fn rollback(&mut self) -> crate::Result<()> {
        self.ensure_open()?;
        self.executor.rollback(self.commit_required())?;
        self.dirty = false;
        Ok(())
    }

    fn commit_required(&self) -> bool {
        !self.auto_commit && self.dirty
    }

    /// Rolls back pending work if dirty, then closes the executor and its
    /// transaction. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.executor.close(self.commit_required());
        self.closed = true;
        self.dirty = false;
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed {
            Err(Error::executor("session was closed"))
        } else {
            Ok(())
        }
    }
}

impl Drop for SqlSession {
    fn drop(&mut self) {
        if !self.closed {
            if self.dirty {
                warn!("session dropped while dirty; pending changes roll back");
            }
            self.close();
        }
    }
}

/// A bare collection parameter gets wrapped under well-known names so
/// scripts can reference it as `list`/`collection`.
fn wrap_collection(parameter: Value) -> Value {
    match parameter {
        Value::List(items) => {
            let mut map = HashMap::new();
            map.insert("collection".to_string(), Value::List(items.clone()));
            map.insert("list".to_string(), Value::List(items));
            Value::Map(map)
        }
        other => other,
    }
}

fn unwrap_collection(parameter: Value) -> Value {
    if let Value::Map(map) = &parameter
        && map.len() == 2
        && map.contains_key("list")
        && map.contains_key("collection")
    {
        return map["list"].clone();
    }
    parameter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_collection_round_trip() {
        let list = Value::List(vec![Value::Long(1)]);
        let wrapped = wrap_collection(list.clone());
        let Value::Map(m) = &wrapped else { panic!() };
        assert_eq!(m.get("list"), Some(&list));
        assert_eq!(unwrap_collection(wrapped), list);
    }

    #[test]
    fn test_scalar_parameter_unwrapped() {
        assert_eq!(wrap_collection(Value::Long(3)), Value::Long(3));
    }
}
