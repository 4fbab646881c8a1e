use crate::config::Configuration;
use crate::error::Error;
use crate::executor::{Executor, Row};
use crate::mapping::RowBounds;
use crate::reflection;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Converts a sub-query's row list into the shape of the target property:
/// a list as-is, a scalar from exactly zero-or-one rows.
pub fn extract_result(rows: &[Row], target_is_list: bool) -> crate::Result<Value> {
    if target_is_list {
        return Ok(Value::List(rows.iter().map(|r| r.borrow().clone()).collect()));
    }
    match rows.len() {
        0 => Ok(Value::Null),
        1 => Ok(rows[0].borrow().clone()),
        n => Err(Error::executor(format!(
            "expected one row for a scalar property, got {}",
            n
        ))),
    }
}

/// A nested-query closure captured for later execution. By the time a lazy
/// property fires, the executor that produced the row is usually gone, so
/// the loader runs through a fresh executor on a new connection from the
/// configured environment.
pub struct ResultLoader {
    configuration: Arc<Configuration>,
    statement_id: String,
    parameter: Value,
    target_is_list: bool,
}

impl ResultLoader {
    pub fn new(
        configuration: Arc<Configuration>,
        statement_id: impl Into<String>,
        parameter: Value,
        target_is_list: bool,
    ) -> Self {
        Self {
            configuration,
            statement_id: statement_id.into(),
            parameter,
            target_is_list,
        }
    }

    pub fn load(&self) -> crate::Result<Value> {
        let environment = self.configuration.environment().ok_or_else(|| {
            Error::executor("cannot run a deferred nested query without an environment")
        })?;
        let transaction = environment.new_transaction(true);
        let mut executor =
            crate::executor::base::new_simple_executor(self.configuration.clone(), transaction);
        let ms = self.configuration.get_mapped_statement(&self.statement_id)?;
        let mut parameter = self.parameter.clone();
        let rows = executor.query(&ms, &mut parameter, RowBounds::DEFAULT, None)?;
        executor.close(false);
        extract_result(&rows, self.target_is_list)
    }
}

struct LoadPair {
    property: String,
    loader: ResultLoader,
}

/// The load registry attached to a result object with unresolved
/// nested-query properties: property -> loader closure. Setting a property
/// through other means removes its loader (setter invalidates loader).
#[derive(Default)]
pub struct ResultLoaderMap {
    loaders: HashMap<String, LoadPair>,
}

impl ResultLoaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_loader(&mut self, property: impl Into<String>, loader: ResultLoader) {
        let property = property.into();
        self.loaders.insert(
            property.to_ascii_uppercase(),
            LoadPair { property, loader },
        );
    }

    pub fn has_loader(&self, property: &str) -> bool {
        self.loaders.contains_key(&property.to_ascii_uppercase())
    }

    pub fn remove(&mut self, property: &str) -> bool {
        self.loaders.remove(&property.to_ascii_uppercase()).is_some()
    }

    pub fn properties(&self) -> Vec<String> {
        self.loaders.values().map(|p| p.property.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Runs one property's loader and assigns the result.
    pub fn load(&mut self, property: &str, target: &mut Value) -> crate::Result<bool> {
        match self.loaders.remove(&property.to_ascii_uppercase()) {
            None => Ok(false),
            Some(pair) => {
                let value = pair.loader.load()?;
                reflection::set_value(target, &pair.property, value)?;
                Ok(true)
            }
        }
    }

    /// The "load all" sweep used at serialization boundaries and by the
    /// aggressive-loading mode.
    pub fn load_all(&mut self, target: &mut Value) -> crate::Result<()> {
        let keys: Vec<String> = self.loaders.values().map(|p| p.property.clone()).collect();
        for property in keys {
            self.load(&property, target)?;
        }
        Ok(())
    }
}

/// Wraps a result object that still has unresolved lazy properties. The
/// engine's contract with the factory is the loader registry plus the
/// load-all sweep; interception mechanics live entirely in the
/// implementation.
pub trait ProxyFactory: Send + Sync {
    fn create_proxy(
        &self,
        target: Value,
        loaders: ResultLoaderMap,
        configuration: &Arc<Configuration>,
    ) -> crate::Result<Value>;
}

/// Default factory: resolves every registered loader up front, trading
/// laziness for plain values that need no interception layer.
pub struct EagerProxyFactory;

impl ProxyFactory for EagerProxyFactory {
    fn create_proxy(
        &self,
        mut target: Value,
        mut loaders: ResultLoaderMap,
        _configuration: &Arc<Configuration>,
    ) -> crate::Result<Value> {
        loaders.load_all(&mut target)?;
        Ok(target)
    }
}
