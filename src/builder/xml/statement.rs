use crate::builder::xml::{XContent, XNode, include, parse_truthy};
use crate::builder::{AssistantShared, MapperBuilderAssistant};
use crate::config::Configuration;
use crate::error::Error;
use crate::mapping::{
    KeyGenerator, MappedStatement, ResultMap, SqlCommandType, StatementType,
};
use crate::scripting::tokens::resolve_placeholders;
use std::sync::{Arc, Mutex};

/// Builds one `<select|insert|update|delete>` element into a registered
/// `MappedStatement`: include expansion, select-key compilation, language
/// driver dispatch, result-map and cache binding.
///
/// Kept re-runnable: a forward reference surfaces as incomplete and the
/// whole node is retried off the statement worklist, so already-registered
/// pieces (select keys, synthetic result maps) are skipped on re-entry.
pub struct XmlStatementBuilder {
    pub namespace: String,
    pub resource: String,
    pub shared: Arc<Mutex<AssistantShared>>,
    pub required_database_id: Option<String>,
}

impl XmlStatementBuilder {
    fn assistant(&self) -> MapperBuilderAssistant {
        MapperBuilderAssistant {
            namespace: self.namespace.clone(),
            resource: self.resource.clone(),
            shared: self.shared.clone(),
        }
    }

    fn database_id_matches(&self, node: &XNode) -> bool {
        match (self.required_database_id.as_deref(), node.attr("databaseId").as_deref()) {
            (Some(required), Some(declared)) => required == declared,
            (Some(_), None) | (None, Some(_)) => false,
            (None, None) => true,
        }
    }

    pub fn parse(&self, configuration: &mut Configuration, node: &XNode) -> crate::Result<()> {
        if !self.database_id_matches(node) {
            return Ok(());
        }
        let assistant = self.assistant();

        let command: SqlCommandType = node.name.parse()?;
        let id = assistant.apply_namespace(
            &node
                .attr("id")
                .ok_or_else(|| Error::builder(format!("<{}> requires an id", node.name)))?,
            false,
        )?;
        // Second pass: an id-specific variant already won.
        if self.required_database_id.is_none() && configuration.has_statement(&id) {
            return Ok(());
        }

        // The namespace cache must be settled before anything registers.
        let cache = assistant.current_cache()?;

        let lang = match node.attr("lang") {
            Some(name) => configuration.get_language_driver(&name)?,
            None => configuration.default_language_driver(),
        };

        // Select keys compile to synthetic statements first so the parent
        // can reference its generator.
        let mut key_generator = KeyGenerator::None;
        for select_key in node.children_named("selectKey") {
            if let Some(generator) =
                self.parse_select_key(configuration, &assistant, &id, select_key, &lang)?
            {
                key_generator = generator;
            }
        }
        let use_generated_keys = parse_truthy(node.attr("useGeneratedKeys").as_deref())
            .unwrap_or(
                configuration.settings.use_generated_keys && command == SqlCommandType::Insert,
            );
        if matches!(key_generator, KeyGenerator::None) && use_generated_keys {
            key_generator = KeyGenerator::Jdbc3;
        }

        // Body text: strip the select keys, expand includes, substitute
        // configuration variables, then hand to the language driver.
        let mut body = node.clone();
        body.content.retain(|c| match c {
            XContent::Element(e) => e.name != "selectKey",
            _ => true,
        });
        let text = include::resolve_includes(
            &body.inner_xml(),
            configuration,
            &self.namespace,
            &configuration.variables.clone(),
        )?;
        let text = resolve_placeholders(&text, &configuration.variables);
        let sql_source = lang.create_sql_source(configuration, &text)?;

        let result_maps = self.statement_result_maps(configuration, &assistant, node, &id)?;
        let parameter_map = node
            .attr("parameterMap")
            .map(|p| {
                let qualified = assistant.apply_namespace(&p, true)?;
                configuration
                    .get_parameter_map(&qualified)
                    .map_err(|_| Error::incomplete(format!("parameter map '{}' missing", qualified)))
            })
            .transpose()?;

        let statement = MappedStatement::builder(id, sql_source, command, lang)
            .resource(self.resource.clone())
            .statement_type(match node.attr("statementType") {
                Some(t) => t.parse()?,
                None => StatementType::Prepared,
            })
            .parameter_map(parameter_map)
            .result_maps(result_maps)
            .flush_cache_required(
                parse_truthy(node.attr("flushCache").as_deref())
                    .unwrap_or(command != SqlCommandType::Select),
            )
            .use_cache(
                parse_truthy(node.attr("useCache").as_deref())
                    .unwrap_or(command == SqlCommandType::Select),
            )
            .result_ordered(parse_truthy(node.attr("resultOrdered").as_deref()).unwrap_or(false))
            .fetch_size(parse_numeric(node, "fetchSize")?)
            .timeout(parse_numeric(node, "timeout")?)
            .key_generator(key_generator)
            .key_properties(split_csv(node.attr("keyProperty")))
            .key_columns(split_csv(node.attr("keyColumn")))
            .database_id(node.attr("databaseId"))
            .cache(cache)
            .result_sets(split_csv(node.attr("resultSets")))
            .build();

        configuration.add_mapped_statement(statement)
    }

    fn parse_select_key(
        &self,
        configuration: &mut Configuration,
        assistant: &MapperBuilderAssistant,
        parent_id: &str,
        node: &XNode,
        lang: &Arc<dyn crate::scripting::LanguageDriver>,
    ) -> crate::Result<Option<KeyGenerator>> {
        if !self.database_id_matches(node) {
            return Ok(None);
        }
        let key_id = format!("{}{}", parent_id, KeyGenerator::SELECT_KEY_SUFFIX);
        let execute_before = node
            .attr("order")
            .map(|o| o.eq_ignore_ascii_case("BEFORE"))
            .unwrap_or(false);

        // Idempotent retry: the synthetic statement may already exist from
        // a pass that failed later.
        if !configuration.has_statement(&key_id) {
            let text = include::resolve_includes(
                &node.inner_xml(),
                configuration,
                &self.namespace,
                &configuration.variables.clone(),
            )?;
            let text = resolve_placeholders(&text, &configuration.variables);
            let sql_source = lang.create_sql_source(configuration, &text)?;

            let result_type = node
                .attr("resultType")
                .map(|t| configuration.resolve_type_alias(&t))
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
            .statement_type(match node.attr("statementType") {
                Some(t) => t.parse()?,
                None => StatementType::Prepared,
            })
            .result_maps(vec![inline_map])
            .flush_cache_required(false)
            .use_cache(false)
            .key_properties(split_csv(node.attr("keyProperty")))
            .key_columns(split_csv(node.attr("keyColumn")))
            .build();
            configuration.add_mapped_statement(statement)?;
        }
        if configuration.get_key_generator(&key_id).is_none() {
            configuration.add_key_generator(
                key_id.clone(),
                KeyGenerator::SelectKey {
                    statement_id: key_id.clone(),
                    execute_before,
                },
            )?;
        }

        Ok(Some(KeyGenerator::SelectKey {
            statement_id: key_id,
            execute_before,
        }))
    }

    /// The ordered result-map list: explicit references (comma-separated
    /// for multi-result-set statements) or an inline shape from
    /// `resultType`.
    fn statement_result_maps(
        &self,
        configuration: &mut Configuration,
        assistant: &MapperBuilderAssistant,
        node: &XNode,
        id: &str,
    ) -> crate::Result<Vec<Arc<ResultMap>>> {
        if let Some(declared) = node.attr("resultMap") {
            let mut maps = Vec::new();
            for reference in declared.split(',') {
                let qualified = assistant.apply_namespace(reference.trim(), true)?;
                let map = configuration.get_result_map(&qualified).map_err(|_| {
                    Error::incomplete(format!("result map '{}' is not declared yet", qualified))
                })?;
                maps.push(map);
            }
            return Ok(maps);
        }
        if let Some(result_type) = node.attr("resultType") {
            let alias = configuration.resolve_type_alias(&result_type);
            return Ok(vec![Arc::new(ResultMap::new(
                format!("{}-Inline", id),
                alias,
                Vec::new(),
                None,
                None,
            ))]);
        }
        Ok(Vec::new())
    }
}

fn split_csv(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_numeric<T: std::str::FromStr>(node: &XNode, attr: &str) -> crate::Result<Option<T>> {
    node.attr(attr)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| Error::builder(format!("bad {} value '{}'", attr, v)))
        })
        .transpose()
}
