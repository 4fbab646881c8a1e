use crate::cache::CacheKey;
use crate::config::{Configuration, LocalCacheScope};
use crate::driver::{QueryResult, ResultSetData, StatementSpec, Transaction};
use crate::error::Error;
use crate::executor::result_set::ResultSetHandler;
use crate::executor::{
    BATCH_UPDATE_RETURN_VALUE, BatchResult, Executor, ResultHandler, Row, keygen, loader,
    parameter,
};
use crate::mapping::{
    BoundSql, KeyGenerator, MappedStatement, ParameterMode, RowBounds, StatementType,
};
use crate::reflection;
use crate::value::Value;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

/// First-level cache slot. The placeholder marks a query in progress so
/// nested projections can tell "being computed" from "absent" and defer.
pub(crate) enum LocalCacheEntry {
    Placeholder,
    List(Rc<Vec<Row>>),
}

pub(crate) struct DeferredLoad {
    target: Row,
    property: String,
    key: CacheKey,
    target_is_list: bool,
}

impl DeferredLoad {
    fn can_load(&self, cache: &HashMap<CacheKey, LocalCacheEntry>) -> bool {
        matches!(cache.get(&self.key), Some(LocalCacheEntry::List(_)))
    }

    fn load(&self, cache: &HashMap<CacheKey, LocalCacheEntry>) -> crate::Result<()> {
        if let Some(LocalCacheEntry::List(rows)) = cache.get(&self.key) {
            let value = loader::extract_result(rows, self.target_is_list)?;
            reflection::set_value(&mut self.target.borrow_mut(), &self.property, value)?;
        }
        Ok(())
    }
}

/// Outcome of a runner-level update.
pub struct UpdateOutcome {
    pub affected: u64,
    pub generated_keys: Option<ResultSetData>,
    /// True while the statement sits in an unflushed batch; key-generator
    /// post-processing then happens at flush time instead.
    pub deferred: bool,
}

/// The driver-facing half of an executor: how statements actually reach
/// the connection. The surrounding `BaseExecutor` owns caching and
/// deferred-load orchestration and delegates here.
pub trait StatementRunner {
    fn do_query(
        &mut self,
        configuration: &Configuration,
        transaction: &mut dyn Transaction,
        ms: &MappedStatement,
        spec: &StatementSpec,
        sql: &str,
        params: &[(String, Value)],
    ) -> crate::Result<QueryResult>;

    fn do_update(
        &mut self,
        configuration: &Configuration,
        transaction: &mut dyn Transaction,
        ms: &MappedStatement,
        spec: &StatementSpec,
        sql: &str,
        params: Vec<(String, Value)>,
        parameter: &Value,
    ) -> crate::Result<UpdateOutcome>;

    fn do_flush(
        &mut self,
        configuration: &Configuration,
        transaction: &mut dyn Transaction,
        rollback: bool,
    ) -> crate::Result<Vec<BatchResult>>;
}

/// One fresh statement per call, closed on completion.
pub struct SimpleRunner;

impl StatementRunner for SimpleRunner {
    fn do_query(
        &mut self,
        _configuration: &Configuration,
        transaction: &mut dyn Transaction,
        _ms: &MappedStatement,
        spec: &StatementSpec,
        sql: &str,
        params: &[(String, Value)],
    ) -> crate::Result<QueryResult> {
        let start = Instant::now();
        let result = transaction.connection()?.query(spec, sql, params);
        let elapsed = start.elapsed().as_millis();
        match &result {
            Ok(out) => debug!(
                "Query: sql=\n{}, params={:?}, elapsed={}ms, rows={}",
                sql,
                params,
                elapsed,
                out.result_sets.first().map(|rs| rs.rows.len()).unwrap_or(0)
            ),
            Err(e) => debug!(
                "Query: sql=\n{}, params={:?}, elapsed={}ms, error={:?}",
                sql, params, elapsed, e
            ),
        }
        result
    }

    fn do_update(
        &mut self,
        _configuration: &Configuration,
        transaction: &mut dyn Transaction,
        _ms: &MappedStatement,
        spec: &StatementSpec,
        sql: &str,
        params: Vec<(String, Value)>,
        _parameter: &Value,
    ) -> crate::Result<UpdateOutcome> {
        let start = Instant::now();
        let result = transaction.connection()?.update(spec, sql, &params);
        let elapsed = start.elapsed().as_millis();
        match &result {
            Ok(out) => debug!(
                "Execute: sql=\n{}, params={:?}, elapsed={}ms, affected={}",
                sql, params, elapsed, out.affected
            ),
            Err(e) => debug!(
                "Execute: sql=\n{}, params={:?}, elapsed={}ms, error={:?}",
                sql, params, elapsed, e
            ),
        }
        let out = result?;
        Ok(UpdateOutcome {
            affected: out.affected,
            generated_keys: out.generated_keys,
            deferred: false,
        })
    }

    fn do_flush(
        &mut self,
        _configuration: &Configuration,
        _transaction: &mut dyn Transaction,
        _rollback: bool,
    ) -> crate::Result<Vec<BatchResult>> {
        Ok(Vec::new())
    }
}

struct BatchEntry {
    statement_id: String,
    sql: String,
    spec: StatementSpec,
    key_generator: KeyGenerator,
    key_properties: Vec<String>,
    key_columns: Vec<String>,
    params_list: Vec<Vec<(String, Value)>>,
    parameter_objects: Vec<Value>,
}

/// Accumulates updates per identical (SQL, statement) pair and flushes
/// them through the driver's batch API. Parameter objects are kept so
/// generated keys can be distributed after the flush.
#[derive(Default)]
pub struct BatchRunner {
    batches: Vec<BatchEntry>,
}

impl StatementRunner for BatchRunner {
    fn do_query(
        &mut self,
        configuration: &Configuration,
        transaction: &mut dyn Transaction,
        ms: &MappedStatement,
        spec: &StatementSpec,
        sql: &str,
        params: &[(String, Value)],
    ) -> crate::Result<QueryResult> {
        // Pending writes must land before the read observes the database.
        self.do_flush(configuration, transaction, false)?;
        SimpleRunner.do_query(configuration, transaction, ms, spec, sql, params)
    }

    fn do_update(
        &mut self,
        _configuration: &Configuration,
        _transaction: &mut dyn Transaction,
        ms: &MappedStatement,
        spec: &StatementSpec,
        sql: &str,
        params: Vec<(String, Value)>,
        parameter: &Value,
    ) -> crate::Result<UpdateOutcome> {
        let reuse_last = self
            .batches
            .last()
            .is_some_and(|b| b.sql == sql && b.statement_id == ms.id);
        if !reuse_last {
            self.batches.push(BatchEntry {
                statement_id: ms.id.clone(),
                sql: sql.to_string(),
                spec: spec.clone(),
                key_generator: ms.key_generator.clone(),
                key_properties: ms.key_properties.clone(),
                key_columns: ms.key_columns.clone(),
                params_list: Vec::new(),
                parameter_objects: Vec::new(),
            });
        }
        let entry = self.batches.last_mut().unwrap();
        entry.params_list.push(params);
        entry.parameter_objects.push(parameter.clone());
        Ok(UpdateOutcome {
            affected: BATCH_UPDATE_RETURN_VALUE,
            generated_keys: None,
            deferred: true,
        })
    }

    fn do_flush(
        &mut self,
        _configuration: &Configuration,
        transaction: &mut dyn Transaction,
        rollback: bool,
    ) -> crate::Result<Vec<BatchResult>> {
        let batches = std::mem::take(&mut self.batches);
        if rollback {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(batches.len());
        for entry in batches {
            let start = Instant::now();
            let outcome =
                transaction
                    .connection()?
                    .execute_batch(&entry.spec, &entry.sql, &entry.params_list)?;
            debug!(
                "Batch: sql=\n{}, size={}, elapsed={}ms",
                entry.sql,
                entry.params_list.len(),
                start.elapsed().as_millis()
            );

            let mut parameters = entry.parameter_objects;
            match &entry.key_generator {
                KeyGenerator::Jdbc3 => {
                    if let Some(keys) = &outcome.generated_keys {
                        distribute_batch_keys(
                            &entry.key_properties,
                            &entry.key_columns,
                            &mut parameters,
                            keys,
                        )?;
                    }
                }
                KeyGenerator::SelectKey { statement_id, .. } => {
                    // A post-execute select-key cannot run against batched
                    // rows; it needs the per-row connection state.
                    warn!(
                        "select key '{}' skipped for batched statement '{}'",
                        statement_id, entry.statement_id
                    );
                }
                KeyGenerator::None => {}
            }

            results.push(BatchResult {
                statement_id: entry.statement_id,
                sql: entry.sql,
                parameters,
                update_counts: outcome.counts,
            });
        }
        Ok(results)
    }
}

/// One key row per batched parameter object, in accumulation order.
fn distribute_batch_keys(
    key_properties: &[String],
    key_columns: &[String],
    parameters: &mut [Value],
    keys: &ResultSetData,
) -> crate::Result<()> {
    for (i, parameter) in parameters.iter_mut().enumerate() {
        if i >= keys.rows.len() {
            break;
        }
        let row = keys.row(i);
        for (p, property) in key_properties.iter().enumerate() {
            let value = match key_columns.get(p) {
                Some(column) => row.get(column).clone(),
                None => row.get_by_index(p).clone(),
            };
            reflection::set_value(parameter, property, value)?;
        }
    }
    Ok(())
}

pub type SimpleExecutor = BaseExecutor<SimpleRunner>;
pub type BatchExecutor = BaseExecutor<BatchRunner>;

pub fn new_simple_executor(
    configuration: Arc<Configuration>,
    transaction: Box<dyn Transaction>,
) -> SimpleExecutor {
    BaseExecutor::new(configuration, transaction, SimpleRunner)
}

pub fn new_batch_executor(
    configuration: Arc<Configuration>,
    transaction: Box<dyn Transaction>,
) -> BatchExecutor {
    BaseExecutor::new(configuration, transaction, BatchRunner::default())
}

/// Holds the transaction handle, the session-local caches, the deferred
/// load queue and the query nesting depth; concrete driver interaction is
/// delegated to the runner.
pub struct BaseExecutor<R: StatementRunner> {
    configuration: Arc<Configuration>,
    transaction: Box<dyn Transaction>,
    runner: R,
    local_cache: HashMap<CacheKey, LocalCacheEntry>,
    local_output_parameters: HashMap<CacheKey, HashMap<String, Value>>,
    deferred_loads: VecDeque<DeferredLoad>,
    query_stack: usize,
    closed: bool,
}

impl<R: StatementRunner> BaseExecutor<R> {
    pub fn new(
        configuration: Arc<Configuration>,
        transaction: Box<dyn Transaction>,
        runner: R,
    ) -> Self {
        Self {
            configuration,
            transaction,
            runner,
            local_cache: HashMap::new(),
            local_output_parameters: HashMap::new(),
            deferred_loads: VecDeque::new(),
            query_stack: 0,
            closed: false,
        }
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed {
            Err(Error::executor("executor was closed"))
        } else {
            Ok(())
        }
    }

    fn statement_spec(&self, ms: &MappedStatement, want_keys: bool) -> StatementSpec {
        let settings = &self.configuration.settings;
        let statement_timeout = ms.timeout.or(settings.default_statement_timeout);
        let timeout = match (statement_timeout, self.transaction.timeout()) {
            (Some(s), Some(t)) => Some(s.min(t)),
            (s, t) => s.or(t),
        };
        StatementSpec {
            statement_type: ms.statement_type,
            timeout,
            fetch_size: ms.fetch_size.or(settings.default_fetch_size),
            return_generated_keys: want_keys,
            key_columns: ms.key_columns.clone(),
        }
    }

    fn query_with_key(
        &mut self,
        ms: &Arc<MappedStatement>,
        parameter: &mut Value,
        row_bounds: RowBounds,
        result_handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: BoundSql,
    ) -> crate::Result<Vec<Row>> {
        self.query_stack += 1;
        let result =
            self.cached_or_database(ms, parameter, row_bounds, result_handler, key, bound_sql);
        self.query_stack -= 1;

        if self.query_stack == 0 {
            if result.is_err() {
                self.deferred_loads.clear();
            } else {
                while let Some(load) = self.deferred_loads.pop_front() {
                    load.load(&self.local_cache)?;
                }
            }
            if self.configuration.settings.local_cache_scope == LocalCacheScope::Statement {
                self.clear_local_cache();
            }
        }
        result
    }

    fn cached_or_database(
        &mut self,
        ms: &Arc<MappedStatement>,
        parameter: &mut Value,
        row_bounds: RowBounds,
        result_handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: BoundSql,
    ) -> crate::Result<Vec<Row>> {
        if result_handler.is_none()
            && let Some(LocalCacheEntry::List(rows)) = self.local_cache.get(&key)
        {
            let rows = rows.as_ref().clone();
            if ms.statement_type == StatementType::Callable
                && let Some(outs) = self.local_output_parameters.get(&key)
                && matches!(parameter, Value::Map(_))
            {
                for (property, value) in outs.clone() {
                    reflection::set_value(parameter, &property, value)?;
                }
            }
            return Ok(rows);
        }
        self.query_from_database(ms, parameter, row_bounds, result_handler, key, bound_sql)
    }

    fn query_from_database(
        &mut self,
        ms: &Arc<MappedStatement>,
        parameter: &mut Value,
        row_bounds: RowBounds,
        result_handler: Option<&mut dyn ResultHandler>,
        key: CacheKey,
        bound_sql: BoundSql,
    ) -> crate::Result<Vec<Row>> {
        let cacheable = result_handler.is_none();
        self.local_cache
            .insert(key.clone(), LocalCacheEntry::Placeholder);
        let result = self.do_query(ms, parameter, row_bounds, result_handler, &key, &bound_sql);
        self.local_cache.remove(&key);

        let rows = result?;
        if cacheable {
            self.local_cache
                .insert(key, LocalCacheEntry::List(Rc::new(rows.clone())));
        }
        Ok(rows)
    }

    fn do_query(
        &mut self,
        ms: &Arc<MappedStatement>,
        parameter: &mut Value,
        row_bounds: RowBounds,
        result_handler: Option<&mut dyn ResultHandler>,
        key: &CacheKey,
        bound_sql: &BoundSql,
    ) -> crate::Result<Vec<Row>> {
        let spec = self.statement_spec(ms, false);
        let params = parameter::build_parameters(&self.configuration, bound_sql, parameter)?;

        let query_result = {
            let Self {
                runner,
                transaction,
                configuration,
                ..
            } = self;
            runner.do_query(
                configuration,
                transaction.as_mut(),
                ms,
                &spec,
                &bound_sql.sql,
                &params,
            )?
        };

        if ms.statement_type == StatementType::Callable && !query_result.out_parameters.is_empty()
        {
            if matches!(parameter, Value::Map(_)) {
                for (property, value) in &query_result.out_parameters {
                    reflection::set_value(parameter, property, value.clone())?;
                }
            }
            self.local_output_parameters
                .insert(key.clone(), query_result.out_parameters.clone());
        }

        let configuration = self.configuration.clone();
        let ms = ms.clone();
        let parameter_snapshot = parameter.clone();
        let mut handler = ResultSetHandler::new(
            self,
            configuration,
            ms,
            parameter_snapshot,
            row_bounds,
            result_handler,
        );
        handler.handle(query_result)
    }

    fn run_select_key(
        &mut self,
        statement_id: &str,
        parameter: &mut Value,
    ) -> crate::Result<()> {
        let key_ms = self.configuration.get_mapped_statement(statement_id)?;
        let rows = self.query(&key_ms, parameter, RowBounds::DEFAULT, None)?;
        keygen::assign_select_key(&key_ms, parameter, &rows)
    }
}

impl<R: StatementRunner> Executor for BaseExecutor<R> {
    fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    fn query(
        &mut self,
        ms: &Arc<MappedStatement>,
        parameter: &mut Value,
        row_bounds: RowBounds,
        result_handler: Option<&mut dyn ResultHandler>,
    ) -> crate::Result<Vec<Row>> {
        self.ensure_open()?;
        if self.query_stack == 0 && ms.flush_cache_required {
            self.clear_local_cache();
        }
        let bound_sql = ms.get_bound_sql(&self.configuration, parameter)?;
        let key = self.create_cache_key(ms, parameter, &row_bounds, &bound_sql);
        self.query_with_key(ms, parameter, row_bounds, result_handler, key, bound_sql)
    }

    fn update(&mut self, ms: &Arc<MappedStatement>, parameter: &mut Value) -> crate::Result<u64> {
        self.ensure_open()?;
        // Writes invalidate everything the session has read so far.
        self.clear_local_cache();
        self.local_output_parameters.clear();

        if let KeyGenerator::SelectKey {
            statement_id,
            execute_before: true,
        } = &ms.key_generator
        {
            let statement_id = statement_id.clone();
            self.run_select_key(&statement_id, parameter)?;
        }

        let bound_sql = ms.get_bound_sql(&self.configuration, parameter)?;
        let want_keys = matches!(ms.key_generator, KeyGenerator::Jdbc3);
        let spec = self.statement_spec(ms, want_keys);
        let params = parameter::build_parameters(&self.configuration, &bound_sql, parameter)?;

        let outcome = {
            let Self {
                runner,
                transaction,
                configuration,
                ..
            } = self;
            runner.do_update(
                configuration,
                transaction.as_mut(),
                ms,
                &spec,
                &bound_sql.sql,
                params,
                parameter,
            )?
        };

        if !outcome.deferred {
            if want_keys && let Some(keys) = &outcome.generated_keys {
                keygen::assign_generated_keys(ms, parameter, keys)?;
            }
            if let KeyGenerator::SelectKey {
                statement_id,
                execute_before: false,
            } = &ms.key_generator
            {
                let statement_id = statement_id.clone();
                self.run_select_key(&statement_id, parameter)?;
            }
        }
        Ok(outcome.affected)
    }

    fn flush_statements(&mut self) -> crate::Result<Vec<BatchResult>> {
        self.ensure_open()?;
        let Self {
            runner,
            transaction,
            configuration,
            ..
        } = self;
        runner.do_flush(configuration, transaction.as_mut(), false)
    }

    fn commit(&mut self, required: bool) -> crate::Result<()> {
        self.ensure_open()?;
        self.clear_local_cache();
        self.local_output_parameters.clear();
        self.flush_statements()?;
        if required {
            self.transaction.commit()?;
        }
        Ok(())
    }

    fn rollback(&mut self, required: bool) -> crate::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.clear_local_cache();
        self.local_output_parameters.clear();
        let flush_result = {
            let Self {
                runner,
                transaction,
                configuration,
                ..
            } = self;
            runner.do_flush(configuration, transaction.as_mut(), true)
        };
        let rollback_result = if required {
            self.transaction.rollback()
        } else {
            Ok(())
        };
        flush_result?;
        rollback_result
    }

    fn create_cache_key(
        &self,
        ms: &MappedStatement,
        parameter: &Value,
        row_bounds: &RowBounds,
        bound_sql: &BoundSql,
    ) -> CacheKey {
        let mut key = CacheKey::new();
        key.update(Value::Text(ms.id.clone()));
        key.update(Value::Long(row_bounds.offset as i64));
        key.update(Value::Long(row_bounds.limit as i64));
        key.update(Value::Text(bound_sql.sql.clone()));
        for mapping in &bound_sql.parameter_mappings {
            if mapping.mode == ParameterMode::Out {
                continue;
            }
            let value = parameter::resolve_parameter_value(bound_sql, parameter, mapping)
                .unwrap_or(Value::Null);
            key.update(value);
        }
        if let Some(environment) = self.configuration.environment() {
            key.update(Value::Text(environment.id.clone()));
        }
        key
    }

    fn is_cached(&self, key: &CacheKey) -> bool {
        self.local_cache.contains_key(key)
    }

    fn defer_load(
        &mut self,
        target: Row,
        property: String,
        key: CacheKey,
        target_is_list: bool,
    ) -> crate::Result<()> {
        let load = DeferredLoad {
            target,
            property,
            key,
            target_is_list,
        };
        if load.can_load(&self.local_cache) {
            load.load(&self.local_cache)
        } else {
            self.deferred_loads.push_back(load);
            Ok(())
        }
    }

    fn clear_local_cache(&mut self) {
        if !self.closed {
            self.local_cache.clear();
        }
    }

    fn close(&mut self, force_rollback: bool) {
        if self.closed {
            return;
        }
        // Cleanup failures are logged, never raised.
        if let Err(e) = self.rollback(force_rollback) {
            warn!("error rolling back on close: {}", e);
        }
        if let Err(e) = self.transaction.close() {
            warn!("error closing transaction: {}", e);
        }
        self.closed = true;
        self.local_cache.clear();
        self.local_output_parameters.clear();
        self.deferred_loads.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
