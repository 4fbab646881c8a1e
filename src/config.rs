use crate::builder::incomplete::{
    CacheRefResolver, MethodResolver, ResultMapResolver, StatementResolver,
};
use crate::builder::provider::ProviderRegistry;
use crate::cache::Cache;
use crate::driver::Environment;
use crate::error::Error;
use crate::executor::ExecutorType;
use crate::executor::loader::{EagerProxyFactory, ProxyFactory};
use crate::mapping::{KeyGenerator, MappedStatement, ParameterMap, ResultMap};
use crate::plugin::Interceptor;
use crate::scripting::{LanguageDriver, RAW_LANG, RawLanguageDriver, XML_LANG, XmlLanguageDriver};
use crate::type_handler::TypeHandlerRegistry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalCacheScope {
    /// First-level cache lives for the whole session.
    #[default]
    Session,
    /// First-level cache is wiped after every outermost query.
    Statement,
}

impl FromStr for LocalCacheScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "SESSION" => Ok(LocalCacheScope::Session),
            "STATEMENT" => Ok(LocalCacheScope::Statement),
            other => Err(Error::builder(format!("unknown localCacheScope '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoMappingBehavior {
    None,
    /// Auto-map columns only at the top level, never inside nested result
    /// maps.
    #[default]
    Partial,
    Full,
}

impl FromStr for AutoMappingBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(AutoMappingBehavior::None),
            "PARTIAL" => Ok(AutoMappingBehavior::Partial),
            "FULL" => Ok(AutoMappingBehavior::Full),
            other => Err(Error::builder(format!(
                "unknown autoMappingBehavior '{}'",
                other
            ))),
        }
    }
}

/// Engine-wide toggles, populated from the `<settings>` section.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_enabled: bool,
    pub lazy_loading_enabled: bool,
    pub aggressive_lazy_loading: bool,
    pub map_underscore_to_camel_case: bool,
    pub default_executor_type: ExecutorType,
    pub default_statement_timeout: Option<u64>,
    pub default_fetch_size: Option<u32>,
    pub local_cache_scope: LocalCacheScope,
    pub auto_mapping_behavior: AutoMappingBehavior,
    pub use_generated_keys: bool,
    pub call_setters_on_nulls: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            lazy_loading_enabled: false,
            aggressive_lazy_loading: false,
            map_underscore_to_camel_case: false,
            default_executor_type: ExecutorType::Simple,
            default_statement_timeout: None,
            default_fetch_size: None,
            local_cache_scope: LocalCacheScope::Session,
            auto_mapping_behavior: AutoMappingBehavior::Partial,
            use_generated_keys: false,
            call_setters_on_nulls: false,
        }
    }
}

/// A registered `<sql>` fragment, spliced into statements by `<include>`.
#[derive(Debug, Clone)]
pub struct SqlFragment {
    pub id: String,
    pub text: String,
}

enum StatementEntry {
    One(Arc<MappedStatement>),
    /// A short name claimed by statements in more than one namespace.
    Ambiguous,
}

/// Process-wide root of the engine: the immutable catalog of mapped
/// statements, result maps, caches and key generators, plus the settings,
/// registries, and the deferred-resolution worklists used during bootstrap.
///
/// Populated single-threadedly while sources register; steady-state readers
/// treat it as immutable (sessions share it behind `Arc`). There is no
/// process singleton: one process may host many configurations.
pub struct Configuration {
    pub settings: Settings,
    pub variables: HashMap<String, String>,

    mapped_statements: HashMap<String, StatementEntry>,
    result_maps: HashMap<String, Arc<ResultMap>>,
    parameter_maps: HashMap<String, Arc<ParameterMap>>,
    caches: HashMap<String, Arc<dyn Cache>>,
    cache_refs: HashMap<String, String>,
    key_generators: HashMap<String, KeyGenerator>,
    sql_fragments: HashMap<String, SqlFragment>,
    loaded_resources: HashSet<String>,

    type_aliases: HashMap<String, String>,
    type_handlers: TypeHandlerRegistry,
    providers: ProviderRegistry,
    language_drivers: HashMap<String, Arc<dyn LanguageDriver>>,
    default_language: String,

    interceptors: Vec<Arc<dyn Interceptor>>,
    proxy_factory: Arc<dyn ProxyFactory>,
    environment: Option<Environment>,
    database_id: Option<String>,

    // Bootstrap worklists; one lock per list so concurrent source
    // registration stays safe.
    pub(crate) incomplete_cache_refs: Mutex<VecDeque<CacheRefResolver>>,
    pub(crate) incomplete_result_maps: Mutex<VecDeque<ResultMapResolver>>,
    pub(crate) incomplete_statements: Mutex<VecDeque<StatementResolver>>,
    pub(crate) incomplete_methods: Mutex<VecDeque<MethodResolver>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    pub fn new() -> Self {
        let mut language_drivers: HashMap<String, Arc<dyn LanguageDriver>> = HashMap::new();
        language_drivers.insert(
            XML_LANG.to_string(),
            Arc::new(XmlLanguageDriver::default()),
        );
        language_drivers.insert(RAW_LANG.to_string(), Arc::new(RawLanguageDriver));

        let mut config = Self {
            settings: Settings::default(),
            variables: HashMap::new(),
            mapped_statements: HashMap::new(),
            result_maps: HashMap::new(),
            parameter_maps: HashMap::new(),
            caches: HashMap::new(),
            cache_refs: HashMap::new(),
            key_generators: HashMap::new(),
            sql_fragments: HashMap::new(),
            loaded_resources: HashSet::new(),
            type_aliases: HashMap::new(),
            type_handlers: TypeHandlerRegistry::new(),
            providers: ProviderRegistry::new(),
            language_drivers,
            default_language: XML_LANG.to_string(),
            interceptors: Vec::new(),
            proxy_factory: Arc::new(EagerProxyFactory),
            environment: None,
            database_id: None,
            incomplete_cache_refs: Mutex::new(VecDeque::new()),
            incomplete_result_maps: Mutex::new(VecDeque::new()),
            incomplete_statements: Mutex::new(VecDeque::new()),
            incomplete_methods: Mutex::new(VecDeque::new()),
        };
        config.seed_type_aliases();
        config
    }

    fn seed_type_aliases(&mut self) {
        for (alias, target) in [
            ("int", "int"),
            ("integer", "int"),
            ("long", "long"),
            ("short", "short"),
            ("byte", "byte"),
            ("double", "double"),
            ("float", "double"),
            ("boolean", "boolean"),
            ("string", "string"),
            ("bytes", "bytes"),
            ("date", "date"),
            ("time", "time"),
            ("datetime", "datetime"),
            ("timestamp", "timestamp"),
            ("decimal", "decimal"),
            ("bigdecimal", "decimal"),
            ("map", "map"),
            ("hashmap", "map"),
            ("list", "list"),
            ("arraylist", "list"),
            ("collection", "list"),
        ] {
            self.type_aliases.insert(alias.to_string(), target.to_string());
        }
    }

    /* --------------------------- registration ---------------------------- */

    /// Parses a mapping XML document and registers its contents under the
    /// document's namespace. Already-loaded sources are skipped.
    pub fn register_xml(&mut self, source_id: &str, xml: &str) -> crate::Result<()> {
        if self.is_resource_loaded(source_id) {
            return Ok(());
        }
        crate::builder::xml::XmlMapperBuilder::new(self, source_id).parse(xml)
    }

    /// Registers the statements a mapper descriptor declares; the
    /// descriptor's type name is the namespace.
    pub fn register_annotated(
        &mut self,
        def: crate::builder::annotation::MapperDef,
    ) -> crate::Result<()> {
        crate::builder::annotation::parse_mapper(self, def)
    }

    /// Parses the top-level configuration document (settings,
    /// environments, type aliases, mappers).
    pub fn register_config(&mut self, xml: &str) -> crate::Result<()> {
        crate::builder::xml::XmlConfigBuilder::new(self).parse(xml)
    }

    /* ----------------------------- aliases ------------------------------ */

    pub fn register_type_alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.type_aliases
            .insert(alias.into().to_ascii_lowercase(), target.into());
    }

    /// Resolves a declared type name to its canonical alias; unknown names
    /// pass through unchanged (user types are opaque to the engine).
    pub fn resolve_type_alias(&self, name: &str) -> String {
        self.type_aliases
            .get(&name.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /* ---------------------------- registries ----------------------------- */

    pub fn add_mapped_statement(&mut self, statement: Arc<MappedStatement>) -> crate::Result<()> {
        let id = statement.id.clone();
        if self.mapped_statements.contains_key(&id) {
            return Err(Error::builder(format!(
                "mapped statement '{}' already registered",
                id
            )));
        }
        if let Some((_, short)) = id.rsplit_once('.') {
            let short = short.to_string();
            match self.mapped_statements.get(&short) {
                None => {
                    self.mapped_statements
                        .insert(short, StatementEntry::One(statement.clone()));
                }
                Some(_) => {
                    self.mapped_statements.insert(short, StatementEntry::Ambiguous);
                }
            }
        }
        self.mapped_statements.insert(id, StatementEntry::One(statement));
        Ok(())
    }

    pub fn get_mapped_statement(&self, id: &str) -> crate::Result<Arc<MappedStatement>> {
        match self.mapped_statements.get(id) {
            Some(StatementEntry::One(ms)) => Ok(ms.clone()),
            Some(StatementEntry::Ambiguous) => Err(Error::builder(format!(
                "short statement name '{}' is ambiguous (qualify it with its namespace)",
                id
            ))),
            None => Err(Error::builder(format!("unknown mapped statement '{}'", id))),
        }
    }

    pub fn has_statement(&self, id: &str) -> bool {
        matches!(self.mapped_statements.get(id), Some(StatementEntry::One(_)))
    }

    pub fn add_result_map(&mut self, result_map: Arc<ResultMap>) -> crate::Result<()> {
        if self.result_maps.contains_key(&result_map.id) {
            return Err(Error::builder(format!(
                "result map '{}' already registered",
                result_map.id
            )));
        }
        self.result_maps.insert(result_map.id.clone(), result_map);
        Ok(())
    }

    pub fn get_result_map(&self, id: &str) -> crate::Result<Arc<ResultMap>> {
        self.result_maps
            .get(id)
            .cloned()
            .ok_or_else(|| Error::builder(format!("unknown result map '{}'", id)))
    }

    pub fn has_result_map(&self, id: &str) -> bool {
        self.result_maps.contains_key(id)
    }

    pub fn add_parameter_map(&mut self, parameter_map: Arc<ParameterMap>) -> crate::Result<()> {
        if self.parameter_maps.contains_key(&parameter_map.id) {
            return Err(Error::builder(format!(
                "parameter map '{}' already registered",
                parameter_map.id
            )));
        }
        self.parameter_maps
            .insert(parameter_map.id.clone(), parameter_map);
        Ok(())
    }

    pub fn get_parameter_map(&self, id: &str) -> crate::Result<Arc<ParameterMap>> {
        self.parameter_maps
            .get(id)
            .cloned()
            .ok_or_else(|| Error::builder(format!("unknown parameter map '{}'", id)))
    }

    pub fn add_cache(&mut self, cache: Arc<dyn Cache>) -> crate::Result<()> {
        let id = cache.id().to_string();
        if self.caches.contains_key(&id) {
            return Err(Error::builder(format!("cache '{}' already registered", id)));
        }
        self.caches.insert(id, cache);
        Ok(())
    }

    pub fn get_cache(&self, namespace: &str) -> crate::Result<Arc<dyn Cache>> {
        self.caches
            .get(namespace)
            .cloned()
            .ok_or_else(|| Error::incomplete(format!("no cache for namespace '{}'", namespace)))
    }

    pub fn has_cache(&self, namespace: &str) -> bool {
        self.caches.contains_key(namespace)
    }

    pub fn add_cache_ref(&mut self, namespace: impl Into<String>, referenced: impl Into<String>) {
        self.cache_refs.insert(namespace.into(), referenced.into());
    }

    pub fn add_key_generator(
        &mut self,
        id: impl Into<String>,
        key_generator: KeyGenerator,
    ) -> crate::Result<()> {
        let id = id.into();
        if self.key_generators.contains_key(&id) {
            return Err(Error::builder(format!(
                "key generator '{}' already registered",
                id
            )));
        }
        self.key_generators.insert(id, key_generator);
        Ok(())
    }

    pub fn get_key_generator(&self, id: &str) -> Option<KeyGenerator> {
        self.key_generators.get(id).cloned()
    }

    pub fn add_sql_fragment(&mut self, fragment: SqlFragment) -> crate::Result<()> {
        if self.sql_fragments.contains_key(&fragment.id) {
            return Err(Error::builder(format!(
                "sql fragment '{}' already registered",
                fragment.id
            )));
        }
        self.sql_fragments.insert(fragment.id.clone(), fragment);
        Ok(())
    }

    pub fn get_sql_fragment(&self, id: &str) -> Option<&SqlFragment> {
        self.sql_fragments.get(id)
    }

    pub fn is_resource_loaded(&self, resource: &str) -> bool {
        self.loaded_resources.contains(resource)
    }

    pub fn add_loaded_resource(&mut self, resource: impl Into<String>) {
        self.loaded_resources.insert(resource.into());
    }

    /* ----------------------- collaborator registries ---------------------- */

    pub fn type_handler_registry(&self) -> &TypeHandlerRegistry {
        &self.type_handlers
    }

    pub fn type_handler_registry_mut(&mut self) -> &mut TypeHandlerRegistry {
        &mut self.type_handlers
    }

    pub fn provider_registry(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn provider_registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.providers
    }

    pub fn get_language_driver(&self, name: &str) -> crate::Result<Arc<dyn LanguageDriver>> {
        self.language_drivers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::builder(format!("unknown language driver '{}'", name)))
    }

    pub fn default_language_driver(&self) -> Arc<dyn LanguageDriver> {
        self.language_drivers[&self.default_language].clone()
    }

    pub fn add_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn proxy_factory(&self) -> Arc<dyn ProxyFactory> {
        self.proxy_factory.clone()
    }

    pub fn set_proxy_factory(&mut self, factory: Arc<dyn ProxyFactory>) {
        self.proxy_factory = factory;
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = Some(environment);
    }

    pub fn database_id(&self) -> Option<&str> {
        self.database_id.as_deref()
    }

    pub fn set_database_id(&mut self, database_id: Option<String>) {
        self.database_id = database_id;
    }

    /* ------------------------ deferred resolution ------------------------- */

    pub(crate) fn add_incomplete_cache_ref(&self, resolver: CacheRefResolver) {
        self.incomplete_cache_refs.lock().unwrap().push_back(resolver);
    }

    pub(crate) fn add_incomplete_result_map(&self, resolver: ResultMapResolver) {
        self.incomplete_result_maps.lock().unwrap().push_back(resolver);
    }

    pub(crate) fn add_incomplete_statement(&self, resolver: StatementResolver) {
        self.incomplete_statements.lock().unwrap().push_back(resolver);
    }

    pub(crate) fn add_incomplete_method(&self, resolver: MethodResolver) {
        self.incomplete_methods.lock().unwrap().push_back(resolver);
    }

    /// Reports any forward reference that never resolved, turning lingering
    /// incompleteness into a hard bootstrap failure.
    pub fn check_incomplete(&self) -> crate::Result<()> {
        let mut unresolved = Vec::new();
        for r in self.incomplete_cache_refs.lock().unwrap().iter() {
            unresolved.push(format!("cache-ref: {}", r.describe()));
        }
        for r in self.incomplete_result_maps.lock().unwrap().iter() {
            unresolved.push(format!("result map: {}", r.describe()));
        }
        for r in self.incomplete_statements.lock().unwrap().iter() {
            unresolved.push(format!("statement: {}", r.describe()));
        }
        for r in self.incomplete_methods.lock().unwrap().iter() {
            unresolved.push(format!("mapper method: {}", r.describe()));
        }
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(Error::builder(format!(
                "unresolved forward references after bootstrap: [{}]",
                unresolved.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{SqlCommandType, SqlSource};

    fn statement(id: &str) -> Arc<MappedStatement> {
        let config = Configuration::new();
        MappedStatement::builder(
            id,
            Arc::new(SqlSource::new_static("SELECT 1".to_string(), vec![])),
            SqlCommandType::Select,
            config.default_language_driver(),
        )
        .build()
    }

    #[test]
    fn test_duplicate_statement_rejected() {
        let mut config = Configuration::new();
        config.add_mapped_statement(statement("ns.a")).unwrap();
        assert!(config.add_mapped_statement(statement("ns.a")).is_err());
    }

    #[test]
    fn test_short_name_resolution_and_ambiguity() {
        let mut config = Configuration::new();
        config.add_mapped_statement(statement("ns.a")).unwrap();
        assert!(config.get_mapped_statement("a").is_ok());

        config.add_mapped_statement(statement("other.a")).unwrap();
        let err = config.get_mapped_statement("a").unwrap_err();
        assert!(matches!(err, Error::Builder(_)));
        assert!(config.get_mapped_statement("ns.a").is_ok());
    }

    #[test]
    fn test_unknown_lookup_is_builder_error() {
        let config = Configuration::new();
        assert!(matches!(
            config.get_mapped_statement("nope"),
            Err(Error::Builder(_))
        ));
        assert!(matches!(
            config.get_result_map("nope"),
            Err(Error::Builder(_))
        ));
        // Missing caches surface as incomplete: a later source may still
        // declare the namespace.
        assert!(matches!(
            config.get_cache("nope"),
            Err(Error::IncompleteElement(_))
        ));
    }
}
