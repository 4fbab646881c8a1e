use crate::builder::incomplete::{CacheRefResolver, MethodResolver, ResultMapResolver};
use crate::builder::provider::{DEFAULT_PROVIDER_METHOD, ProviderContext};
use crate::builder::{AssistantShared, MapperBuilderAssistant, resolve_pending};
use crate::cache::Eviction;
use crate::config::Configuration;
use crate::error::Error;
use crate::mapping::{
    Discriminator, KeyGenerator, MappedStatement, ResultFlag, ResultMap, ResultMapping,
    SqlCommandType, SqlSource, StatementType,
};
use crate::scripting::tokens::resolve_placeholders;
use crate::type_handler::JdbcType;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The annotated-interface mapping surface, expressed as plain-data
/// descriptors: one `MapperDef` per mapping interface, one `MapperMethod`
/// per annotated method. Registration mirrors the XML path: same
/// assistant, same worklists, same statement model.

#[derive(Debug, Clone, Default)]
pub struct ProviderRef {
    /// Provider type name (`type=`).
    pub provider_type: Option<String>,
    /// Alias attribute (`value=`); conflicting with `provider_type` is an
    /// error unless both name the same provider.
    pub value: Option<String>,
    pub method: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StatementAnnotation {
    Select(String),
    Insert(String),
    Update(String),
    Delete(String),
    SelectProvider(ProviderRef),
    InsertProvider(ProviderRef),
    UpdateProvider(ProviderRef),
    DeleteProvider(ProviderRef),
}

impl StatementAnnotation {
    fn command(&self) -> SqlCommandType {
        match self {
            StatementAnnotation::Select(_) | StatementAnnotation::SelectProvider(_) => {
                SqlCommandType::Select
            }
            StatementAnnotation::Insert(_) | StatementAnnotation::InsertProvider(_) => {
                SqlCommandType::Insert
            }
            StatementAnnotation::Update(_) | StatementAnnotation::UpdateProvider(_) => {
                SqlCommandType::Update
            }
            StatementAnnotation::Delete(_) | StatementAnnotation::DeleteProvider(_) => {
                SqlCommandType::Delete
            }
        }
    }
}

/// `@Options`.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub flush_cache: Option<bool>,
    pub use_cache: Option<bool>,
    pub use_generated_keys: bool,
    pub key_property: Option<String>,
    pub key_column: Option<String>,
    pub fetch_size: Option<u32>,
    pub timeout: Option<u64>,
    pub statement_type: Option<StatementType>,
    pub result_sets: Option<String>,
}

/// `@One` / `@Many` on a result entry.
#[derive(Debug, Clone, Default)]
pub struct NestedRef {
    pub select: String,
    pub lazy: Option<bool>,
}

/// `@Result`.
#[derive(Debug, Clone, Default)]
pub struct ResultAnn {
    pub id: bool,
    pub property: String,
    pub column: String,
    pub java_type: Option<String>,
    pub jdbc_type: Option<JdbcType>,
    pub type_handler: Option<String>,
    pub one: Option<NestedRef>,
    pub many: Option<NestedRef>,
}

/// `@Arg` under `@ConstructorArgs`.
#[derive(Debug, Clone, Default)]
pub struct ArgAnn {
    pub id: bool,
    pub name: Option<String>,
    pub column: String,
    pub java_type: Option<String>,
    pub jdbc_type: Option<JdbcType>,
    pub type_handler: Option<String>,
}

/// `@Case` under `@TypeDiscriminator`.
#[derive(Debug, Clone, Default)]
pub struct CaseAnn {
    pub value: String,
    pub result_map: Option<String>,
    pub result_type: Option<String>,
    pub results: Vec<ResultAnn>,
}

/// `@TypeDiscriminator`.
#[derive(Debug, Clone, Default)]
pub struct TypeDiscriminatorAnn {
    pub column: String,
    pub java_type: Option<String>,
    pub jdbc_type: Option<JdbcType>,
    pub cases: Vec<CaseAnn>,
}

/// `@SelectKey`.
#[derive(Debug, Clone, Default)]
pub struct SelectKeyAnn {
    pub statement: String,
    pub key_property: String,
    pub key_column: Option<String>,
    pub before: bool,
    pub result_type: Option<String>,
}

/// `@CacheNamespace`.
#[derive(Debug, Clone)]
pub struct CacheNamespaceAnn {
    pub eviction: Eviction,
    pub flush_interval: Option<Duration>,
    pub size: Option<usize>,
    pub read_write: bool,
    pub blocking: bool,
}

impl Default for CacheNamespaceAnn {
    fn default() -> Self {
        Self {
            eviction: Eviction::Lru,
            flush_interval: None,
            size: None,
            read_write: true,
            blocking: false,
        }
    }
}

/// One annotated mapper method; produces the statement
/// `<interface>.<method>`.
#[derive(Debug, Clone)]
pub struct MapperMethod {
    pub name: String,
    pub statement: StatementAnnotation,
    pub options: Options,
    pub results: Vec<ResultAnn>,
    pub constructor_args: Vec<ArgAnn>,
    pub discriminator: Option<TypeDiscriminatorAnn>,
    pub select_key: Option<SelectKeyAnn>,
    /// `@ResultMap` reference(s), comma-separated for multiple sets.
    pub result_map_ref: Option<String>,
    /// `@MapKey`: the property callers key a list-to-map projection by.
    pub map_key: Option<String>,
    /// `@Lang`.
    pub lang: Option<String>,
    pub result_type: Option<String>,
    pub database_id: Option<String>,
}

impl MapperMethod {
    pub fn new(name: impl Into<String>, statement: StatementAnnotation) -> Self {
        Self {
            name: name.into(),
            statement,
            options: Options::default(),
            results: Vec::new(),
            constructor_args: Vec::new(),
            discriminator: None,
            select_key: None,
            result_map_ref: None,
            map_key: None,
            lang: None,
            result_type: None,
            database_id: None,
        }
    }

    pub fn select(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, StatementAnnotation::Select(sql.into()))
    }

    pub fn insert(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, StatementAnnotation::Insert(sql.into()))
    }

    pub fn update(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, StatementAnnotation::Update(sql.into()))
    }

    pub fn delete(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(name, StatementAnnotation::Delete(sql.into()))
    }
}

/// One annotated mapping interface. The fully-qualified interface name is
/// the namespace.
#[derive(Debug, Clone)]
pub struct MapperDef {
    pub type_name: String,
    pub cache: Option<CacheNamespaceAnn>,
    pub cache_ref: Option<String>,
    pub methods: Vec<MapperMethod>,
}

impl MapperDef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            cache: None,
            cache_ref: None,
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: MapperMethod) -> Self {
        self.methods.push(method);
        self
    }
}

/// Registers everything a mapper descriptor declares, mirroring
/// `register_xml` for annotated interfaces.
pub fn parse_mapper(configuration: &mut Configuration, def: MapperDef) -> crate::Result<()> {
    let def = Arc::new(def);
    let resource = format!("{} (mapper descriptor)", def.type_name);
    if configuration.is_resource_loaded(&resource) {
        return Ok(());
    }
    let assistant = MapperBuilderAssistant::new(def.type_name.clone(), resource.clone());

    if let Some(cache) = &def.cache {
        assistant.use_new_cache(
            configuration,
            None,
            cache.eviction,
            cache.flush_interval,
            cache.size,
            cache.read_write,
            cache.blocking,
        )?;
    }
    if let Some(referenced) = &def.cache_ref {
        match assistant.use_cache_ref(configuration, referenced) {
            Ok(()) => {}
            Err(e) if e.is_incomplete() => {
                configuration.add_incomplete_cache_ref(CacheRefResolver {
                    namespace: def.type_name.clone(),
                    referenced: referenced.clone(),
                    shared: assistant.shared.clone(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    for index in 0..def.methods.len() {
        match parse_method(configuration, &def, index, assistant.shared.clone()) {
            Ok(()) => {}
            Err(e) if e.is_incomplete() => {
                configuration.add_incomplete_method(MethodResolver {
                    def: def.clone(),
                    method_index: index,
                    shared: assistant.shared.clone(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    configuration.add_loaded_resource(resource);
    resolve_pending(configuration)
}

pub(crate) fn parse_method(
    configuration: &mut Configuration,
    def: &Arc<MapperDef>,
    index: usize,
    shared: Arc<Mutex<AssistantShared>>,
) -> crate::Result<()> {
    let method = &def.methods[index];
    if let Some(declared) = &method.database_id
        && configuration.database_id() != Some(declared.as_str())
    {
        return Ok(());
    }

    let assistant = MapperBuilderAssistant {
        namespace: def.type_name.clone(),
        resource: format!("{} (mapper descriptor)", def.type_name),
        shared,
    };
    let id = format!("{}.{}", def.type_name, method.name);
    if configuration.has_statement(&id) {
        return Ok(());
    }

    let cache = assistant.current_cache()?;
    let command = method.statement.command();
    let lang = match &method.lang {
        Some(name) => configuration.get_language_driver(name)?,
        None => configuration.default_language_driver(),
    };

    let sql_source: Arc<SqlSource> = match &method.statement {
        StatementAnnotation::Select(sql)
        | StatementAnnotation::Insert(sql)
        | StatementAnnotation::Update(sql)
        | StatementAnnotation::Delete(sql) => {
            let text = resolve_placeholders(sql, &configuration.variables);
            lang.create_sql_source(configuration, &text)?
        }
        StatementAnnotation::SelectProvider(p)
        | StatementAnnotation::InsertProvider(p)
        | StatementAnnotation::UpdateProvider(p)
        | StatementAnnotation::DeleteProvider(p) => provider_sql_source(
            configuration,
            p,
            &def.type_name,
            &method.name,
        )?,
    };

    let mut key_generator = KeyGenerator::None;
    let mut key_properties = split_csv(method.options.key_property.as_deref());
    let mut key_columns = split_csv(method.options.key_column.as_deref());
    if let Some(select_key) = &method.select_key {
        key_generator =
            register_select_key(configuration, &assistant, &id, select_key, &lang)?;
        key_properties = split_csv(Some(&select_key.key_property));
        key_columns = split_csv(select_key.key_column.as_deref());
    } else if method.options.use_generated_keys
        || (configuration.settings.use_generated_keys && command == SqlCommandType::Insert)
    {
        key_generator = KeyGenerator::Jdbc3;
    }

    let result_maps = method_result_maps(configuration, &assistant, method, &id, command)?;

    let statement = MappedStatement::builder(id, sql_source, command, lang)
        .resource(assistant.resource.clone())
        .statement_type(method.options.statement_type.unwrap_or_default())
        .result_maps(result_maps)
        .flush_cache_required(
            method
                .options
                .flush_cache
                .unwrap_or(command != SqlCommandType::Select),
        )
        .use_cache(
            method
                .options
                .use_cache
                .unwrap_or(command == SqlCommandType::Select),
        )
        .fetch_size(method.options.fetch_size)
        .timeout(method.options.timeout)
        .key_generator(key_generator)
        .key_properties(key_properties)
        .key_columns(key_columns)
        .database_id(method.database_id.clone())
        .cache(cache)
        .result_sets(split_csv(method.options.result_sets.as_deref()))
        .build();

    configuration.add_mapped_statement(statement)
}

fn provider_sql_source(
    configuration: &Configuration,
    provider_ref: &ProviderRef,
    mapper_type: &str,
    mapper_method: &str,
) -> crate::Result<Arc<SqlSource>> {
    let name = match (&provider_ref.provider_type, &provider_ref.value) {
        (Some(t), Some(v)) if t != v => {
            return Err(Error::builder(format!(
                "provider for {}.{} names both type '{}' and value '{}'",
                mapper_type, mapper_method, t, v
            )));
        }
        (Some(t), _) => t.clone(),
        (None, Some(v)) => v.clone(),
        (None, None) => {
            return Err(Error::builder(format!(
                "provider for {}.{} names no provider type",
                mapper_type, mapper_method
            )));
        }
    };
    let provider = configuration.provider_registry().get(&name)?;
    let context = ProviderContext {
        mapper_type: mapper_type.to_string(),
        mapper_method: mapper_method.to_string(),
        database_id: configuration.database_id().map(str::to_string),
    };
    let method = provider
        .resolve_method(&context)
        .or_else(|| provider_ref.method.clone())
        .unwrap_or_else(|| DEFAULT_PROVIDER_METHOD.to_string());
    Ok(Arc::new(SqlSource::Provider {
        provider,
        method,
        context,
    }))
}

fn register_select_key(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    parent_id: &str,
    select_key: &SelectKeyAnn,
    lang: &Arc<dyn crate::scripting::LanguageDriver>,
) -> crate::Result<KeyGenerator> {
    let key_id = format!("{}{}", parent_id, KeyGenerator::SELECT_KEY_SUFFIX);
    if !configuration.has_statement(&key_id) {
        let text = resolve_placeholders(&select_key.statement, &configuration.variables);
        let sql_source = lang.create_sql_source(configuration, &text)?;
        let result_type = select_key
            .result_type
            .as_deref()
            .map(|t| configuration.resolve_type_alias(t))
            .unwrap_or_else(|| "map".to_string());
        let inline_map = Arc::new(ResultMap::new(
            format!("{}-Inline", key_id),
            result_type,
            Vec::new(),
            None,
            None,
        ));
        let statement = MappedStatement::builder(
            key_id.clone(),
            sql_source,
            SqlCommandType::Select,
            lang.clone(),
        )
        .resource(assistant.resource.clone())
        .result_maps(vec![inline_map])
        .flush_cache_required(false)
        .use_cache(false)
        .key_properties(split_csv(Some(&select_key.key_property)))
        .key_columns(split_csv(select_key.key_column.as_deref()))
        .build();
        configuration.add_mapped_statement(statement)?;
    }
    if configuration.get_key_generator(&key_id).is_none() {
        configuration.add_key_generator(
            key_id.clone(),
            KeyGenerator::SelectKey {
                statement_id: key_id.clone(),
                execute_before: select_key.before,
            },
        )?;
    }
    Ok(KeyGenerator::SelectKey {
        statement_id: key_id,
        execute_before: select_key.before,
    })
}

fn method_result_maps(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    method: &MapperMethod,
    statement_id: &str,
    command: SqlCommandType,
) -> crate::Result<Vec<Arc<ResultMap>>> {
    if let Some(references) = &method.result_map_ref {
        let mut maps = Vec::new();
        for reference in references.split(',') {
            let qualified = assistant.apply_namespace(reference.trim(), true)?;
            maps.push(configuration.get_result_map(&qualified).map_err(|_| {
                Error::incomplete(format!("result map '{}' is not declared yet", qualified))
            })?);
        }
        return Ok(maps);
    }

    if command != SqlCommandType::Select {
        return Ok(Vec::new());
    }

    let result_type = method
        .result_type
        .as_deref()
        .map(|t| configuration.resolve_type_alias(t))
        .unwrap_or_else(|| "map".to_string());

    if method.results.is_empty()
        && method.constructor_args.is_empty()
        && method.discriminator.is_none()
    {
        return Ok(vec![Arc::new(ResultMap::new(
            format!("{}-Inline", statement_id),
            result_type,
            Vec::new(),
            None,
            None,
        ))]);
    }

    let map_id = format!("{}-Results", statement_id);
    if let Ok(existing) = configuration.get_result_map(&map_id) {
        return Ok(vec![existing]);
    }

    let mut mappings = Vec::new();
    for arg in &method.constructor_args {
        mappings.push(arg_mapping(configuration, arg)?);
    }
    for result in &method.results {
        mappings.push(result_mapping(configuration, assistant, result)?);
    }

    let discriminator = match &method.discriminator {
        None => None,
        Some(td) => Some(build_discriminator(
            configuration,
            assistant,
            td,
            &map_id,
            &result_type,
            &mappings,
        )?),
    };

    let resolver = ResultMapResolver {
        id: map_id.clone(),
        type_alias: result_type,
        extends: None,
        mappings,
        discriminator,
        auto_mapping: None,
    };
    let map = resolver.try_resolve(configuration)?;
    Ok(vec![map])
}

fn arg_mapping(configuration: &Configuration, arg: &ArgAnn) -> crate::Result<ResultMapping> {
    let mut mapping = ResultMapping::default();
    mapping.property = arg.name.clone();
    mapping.column = Some(arg.column.clone());
    mapping.java_type = arg
        .java_type
        .as_deref()
        .map(|t| configuration.resolve_type_alias(t));
    mapping.jdbc_type = arg.jdbc_type;
    mapping.flags = if arg.id {
        vec![ResultFlag::Constructor, ResultFlag::Id]
    } else {
        vec![ResultFlag::Constructor]
    };
    if let Some(name) = &arg.type_handler {
        mapping.type_handler = Some(named_handler(configuration, name)?);
    }
    Ok(mapping)
}

fn result_mapping(
    configuration: &Configuration,
    assistant: &MapperBuilderAssistant,
    result: &ResultAnn,
) -> crate::Result<ResultMapping> {
    let mut mapping = ResultMapping::new(result.property.clone(), result.column.clone());
    if result.id {
        mapping.flags.push(ResultFlag::Id);
    }
    mapping.java_type = result
        .java_type
        .as_deref()
        .map(|t| configuration.resolve_type_alias(t));
    mapping.jdbc_type = result.jdbc_type;
    if let Some(name) = &result.type_handler {
        mapping.type_handler = Some(named_handler(configuration, name)?);
    }
    match (&result.one, &result.many) {
        (Some(_), Some(_)) => {
            return Err(Error::builder(format!(
                "result '{}' declares both @One and @Many",
                result.property
            )));
        }
        (Some(one), None) => {
            mapping.nested_select_id = Some(assistant.apply_namespace(&one.select, true)?);
            mapping.lazy = one
                .lazy
                .unwrap_or(configuration.settings.lazy_loading_enabled);
        }
        (None, Some(many)) => {
            mapping.nested_select_id = Some(assistant.apply_namespace(&many.select, true)?);
            mapping.java_type = Some("list".to_string());
            mapping.lazy = many
                .lazy
                .unwrap_or(configuration.settings.lazy_loading_enabled);
        }
        (None, None) => {}
    }
    Ok(mapping)
}

fn build_discriminator(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    td: &TypeDiscriminatorAnn,
    parent_map_id: &str,
    parent_type: &str,
    parent_mappings: &[ResultMapping],
) -> crate::Result<Discriminator> {
    let mut mapping = ResultMapping::default();
    mapping.column = Some(td.column.clone());
    mapping.java_type = td
        .java_type
        .as_deref()
        .map(|t| configuration.resolve_type_alias(t));
    mapping.jdbc_type = td.jdbc_type;

    let mut cases = HashMap::new();
    for case in &td.cases {
        let map_id = match &case.result_map {
            Some(reference) => assistant.apply_namespace(reference, true)?,
            None => {
                // Synthesized inline case: `<parentId>-<caseValue>`.
                let case_id = format!("{}-{}", parent_map_id, case.value);
                if !configuration.has_result_map(&case_id) {
                    let mut mappings = parent_mappings.to_vec();
                    for result in &case.results {
                        mappings.push(result_mapping(configuration, assistant, result)?);
                    }
                    let case_type = case
                        .result_type
                        .as_deref()
                        .map(|t| configuration.resolve_type_alias(t))
                        .unwrap_or_else(|| parent_type.to_string());
                    ResultMapResolver {
                        id: case_id.clone(),
                        type_alias: case_type,
                        extends: None,
                        mappings,
                        discriminator: None,
                        auto_mapping: None,
                    }
                    .try_resolve(configuration)?;
                }
                case_id
            }
        };
        cases.insert(case.value.clone(), map_id);
    }

    Ok(Discriminator { mapping, cases })
}

fn named_handler(
    configuration: &Configuration,
    name: &str,
) -> crate::Result<Arc<dyn crate::type_handler::TypeHandler>> {
    configuration
        .type_handler_registry()
        .get_named(name)
        .ok_or_else(|| Error::builder(format!("unknown typeHandler '{}'", name)))
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
