use crate::config::Configuration;
use crate::error::Error;
use crate::mapping::{BoundSql, ParameterMap, ResultMap, SqlSource};
use crate::value::Value;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlCommandType {
    #[default]
    Unknown,
    Select,
    Insert,
    Update,
    Delete,
}

impl FromStr for SqlCommandType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "select" => Ok(SqlCommandType::Select),
            "insert" => Ok(SqlCommandType::Insert),
            "update" => Ok(SqlCommandType::Update),
            "delete" => Ok(SqlCommandType::Delete),
            other => Err(Error::builder(format!("unknown command type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    Statement,
    #[default]
    Prepared,
    Callable,
}

impl FromStr for StatementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "STATEMENT" => Ok(StatementType::Statement),
            "PREPARED" => Ok(StatementType::Prepared),
            "CALLABLE" => Ok(StatementType::Callable),
            other => Err(Error::builder(format!("unknown statement type '{}'", other))),
        }
    }
}

/// Generated-key strategy attached to a statement.
#[derive(Debug, Clone, Default)]
pub enum KeyGenerator {
    /// Both hooks are no-ops.
    #[default]
    None,
    /// Reads the driver's generated-keys result set after execution.
    Jdbc3,
    /// Runs a synthetic `<id>!selectKey` statement before or after the
    /// parent statement and copies the row into the parameter object.
    SelectKey {
        statement_id: String,
        execute_before: bool,
    },
}

impl KeyGenerator {
    pub const SELECT_KEY_SUFFIX: &'static str = "!selectKey";
}

/// Fully-resolved executable statement definition, keyed by
/// `"<namespace>.<id>"`. Owned by the `Configuration` and shared by `Arc`
/// among sessions.
#[derive(Clone)]
pub struct MappedStatement {
    pub id: String,
    pub resource: String,
    pub sql_command_type: SqlCommandType,
    pub statement_type: StatementType,
    pub sql_source: Arc<SqlSource>,
    pub parameter_map: Option<Arc<ParameterMap>>,
    /// Ordered list of applicable result maps; statements producing several
    /// result sets carry one per set.
    pub result_maps: Vec<Arc<ResultMap>>,
    pub flush_cache_required: bool,
    pub use_cache: bool,
    pub result_ordered: bool,
    pub fetch_size: Option<u32>,
    pub timeout: Option<u64>,
    pub key_generator: KeyGenerator,
    pub key_properties: Vec<String>,
    pub key_columns: Vec<String>,
    pub database_id: Option<String>,
    /// Namespace cache; the cache itself lives in the configuration.
    pub cache: Option<Arc<dyn crate::cache::Cache>>,
    pub lang: Arc<dyn crate::scripting::LanguageDriver>,
    /// Declared names of the additional result sets, in arrival order.
    pub result_sets: Vec<String>,
}

impl std::fmt::Debug for MappedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedStatement")
            .field("id", &self.id)
            .field("sql_command_type", &self.sql_command_type)
            .field("statement_type", &self.statement_type)
            .field("result_maps", &self.result_maps.len())
            .field("use_cache", &self.use_cache)
            .finish()
    }
}

impl MappedStatement {
    pub fn builder(
        id: impl Into<String>,
        sql_source: Arc<SqlSource>,
        sql_command_type: SqlCommandType,
        lang: Arc<dyn crate::scripting::LanguageDriver>,
    ) -> MappedStatementBuilder {
        MappedStatementBuilder {
            statement: MappedStatement {
                id: id.into(),
                resource: String::new(),
                sql_command_type,
                statement_type: StatementType::Prepared,
                sql_source,
                parameter_map: None,
                result_maps: Vec::new(),
                flush_cache_required: sql_command_type != SqlCommandType::Select,
                use_cache: sql_command_type == SqlCommandType::Select,
                result_ordered: false,
                fetch_size: None,
                timeout: None,
                key_generator: KeyGenerator::None,
                key_properties: Vec::new(),
                key_columns: Vec::new(),
                database_id: None,
                cache: None,
                lang,
                result_sets: Vec::new(),
            },
        }
    }

    pub fn get_bound_sql(
        &self,
        configuration: &Configuration,
        parameter: &Value,
    ) -> crate::Result<BoundSql> {
        self.sql_source.get_bound_sql(configuration, parameter)
    }

    pub fn has_nested_result_maps(&self) -> bool {
        self.result_maps.iter().any(|rm| rm.has_nested_result_maps)
    }
}

pub struct MappedStatementBuilder {
    statement: MappedStatement,
}

impl MappedStatementBuilder {
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.statement.resource = resource.into();
        self
    }

    pub fn statement_type(mut self, statement_type: StatementType) -> Self {
        self.statement.statement_type = statement_type;
        self
    }

    pub fn parameter_map(mut self, parameter_map: Option<Arc<ParameterMap>>) -> Self {
        self.statement.parameter_map = parameter_map;
        self
    }

    pub fn result_maps(mut self, result_maps: Vec<Arc<ResultMap>>) -> Self {
        self.statement.result_maps = result_maps;
        self
    }

    pub fn flush_cache_required(mut self, flush: bool) -> Self {
        self.statement.flush_cache_required = flush;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.statement.use_cache = use_cache;
        self
    }

    pub fn result_ordered(mut self, result_ordered: bool) -> Self {
        self.statement.result_ordered = result_ordered;
        self
    }

    pub fn fetch_size(mut self, fetch_size: Option<u32>) -> Self {
        self.statement.fetch_size = fetch_size;
        self
    }

    pub fn timeout(mut self, timeout: Option<u64>) -> Self {
        self.statement.timeout = timeout;
        self
    }

    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.statement.key_generator = key_generator;
        self
    }

    pub fn key_properties(mut self, key_properties: Vec<String>) -> Self {
        self.statement.key_properties = key_properties;
        self
    }

    pub fn key_columns(mut self, key_columns: Vec<String>) -> Self {
        self.statement.key_columns = key_columns;
        self
    }

    pub fn database_id(mut self, database_id: Option<String>) -> Self {
        self.statement.database_id = database_id;
        self
    }

    pub fn cache(mut self, cache: Option<Arc<dyn crate::cache::Cache>>) -> Self {
        self.statement.cache = cache;
        self
    }

    pub fn result_sets(mut self, result_sets: Vec<String>) -> Self {
        self.statement.result_sets = result_sets;
        self
    }

    pub fn build(self) -> Arc<MappedStatement> {
        Arc::new(self.statement)
    }
}
