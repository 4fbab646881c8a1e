use crate::cache::CacheKey;
use crate::cache::transactional::TransactionalCacheManager;
use crate::config::Configuration;
use crate::executor::{BatchResult, Executor, ResultHandler, Row, materialize, new_row};
use crate::mapping::{BoundSql, MappedStatement, RowBounds};
use crate::value::Value;
use std::sync::Arc;

/// Second-level cache decorator. Looks a statement's namespace cache up
/// after the first-level cache misses in the delegate; writes are staged
/// per session and only published on commit.
pub struct CachingExecutor {
    delegate: Box<dyn Executor>,
    tcm: TransactionalCacheManager,
}

impl CachingExecutor {
    pub fn new(delegate: Box<dyn Executor>) -> Self {
        Self {
            delegate,
            tcm: TransactionalCacheManager::new(),
        }
    }

    fn flush_cache_if_required(&mut self, ms: &MappedStatement) {
        if let Some(cache) = &ms.cache
            && ms.flush_cache_required
        {
            self.tcm.clear(cache);
        }
    }
}

impl Executor for CachingExecutor {
    fn configuration(&self) -> &Arc<Configuration> {
        self.delegate.configuration()
    }

    fn query(
        &mut self,
        ms: &Arc<MappedStatement>,
        parameter: &mut Value,
        row_bounds: RowBounds,
        result_handler: Option<&mut dyn ResultHandler>,
    ) -> crate::Result<Vec<Row>> {
        self.flush_cache_if_required(ms);
        if let Some(cache) = ms.cache.clone()
            && ms.use_cache
            && result_handler.is_none()
        {
            let bound_sql = ms.get_bound_sql(self.configuration(), parameter)?;
            let key = self
                .delegate
                .create_cache_key(ms, parameter, &row_bounds, &bound_sql);
            if let Some(Value::List(items)) = self.tcm.get(&cache, &key) {
                return Ok(items.into_iter().map(new_row).collect());
            }
            let rows = self.delegate.query(ms, parameter, row_bounds, None)?;
            self.tcm
                .put(&cache, key, Value::List(materialize(&rows)));
            return Ok(rows);
        }
        self.delegate.query(ms, parameter, row_bounds, result_handler)
    }

    fn update(&mut self, ms: &Arc<MappedStatement>, parameter: &mut Value) -> crate::Result<u64> {
        self.flush_cache_if_required(ms);
        self.delegate.update(ms, parameter)
    }

    fn flush_statements(&mut self) -> crate::Result<Vec<BatchResult>> {
        self.delegate.flush_statements()
    }

    fn commit(&mut self, required: bool) -> crate::Result<()> {
        self.delegate.commit(required)?;
        self.tcm.commit();
        Ok(())
    }

    fn rollback(&mut self, required: bool) -> crate::Result<()> {
        let result = self.delegate.rollback(required);
        self.tcm.rollback();
        result
    }

    fn create_cache_key(
        &self,
        ms: &MappedStatement,
        parameter: &Value,
        row_bounds: &RowBounds,
        bound_sql: &BoundSql,
    ) -> CacheKey {
        self.delegate
            .create_cache_key(ms, parameter, row_bounds, bound_sql)
    }

    fn is_cached(&self, key: &CacheKey) -> bool {
        self.delegate.is_cached(key)
    }

    fn defer_load(
        &mut self,
        target: Row,
        property: String,
        key: CacheKey,
        target_is_list: bool,
    ) -> crate::Result<()> {
        self.delegate.defer_load(target, property, key, target_is_list)
    }

    fn clear_local_cache(&mut self) {
        self.delegate.clear_local_cache();
    }

    fn close(&mut self, force_rollback: bool) {
        if force_rollback {
            self.tcm.rollback();
        } else {
            self.tcm.commit();
        }
        self.delegate.close(force_rollback);
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }
}
