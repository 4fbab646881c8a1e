use crate::builder::xml::{XNode, XmlMapperBuilder, parse_truthy};
use crate::config::Configuration;
use crate::driver::Environment;
use crate::error::Error;
use glob::glob;
use log::warn;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

/// Parses the top-level configuration document: properties, settings,
/// type aliases, environments, the database-id provider, and the mapper
/// resources to load.
pub struct XmlConfigBuilder<'a> {
    configuration: &'a mut Configuration,
}

impl<'a> XmlConfigBuilder<'a> {
    pub fn new(configuration: &'a mut Configuration) -> Self {
        Self { configuration }
    }

    pub fn parse(&mut self, xml: &str) -> crate::Result<()> {
        let root = XNode::parse_document(xml)?;
        if root.name != "configuration" {
            return Err(Error::builder(format!(
                "expected <configuration> root, found <{}>",
                root.name
            )));
        }

        for node in root.children_named("properties") {
            self.properties_element(node)?;
        }
        for node in root.children_named("settings") {
            self.settings_element(node)?;
        }
        for node in root.children_named("typeAliases") {
            self.type_aliases_element(node);
        }
        if root.children_named("plugins").next().is_some() {
            // Interceptors are code, not names; they register through
            // Configuration::add_interceptor before sessions open.
            warn!("<plugins> in the configuration document is ignored; register interceptors programmatically");
        }
        for node in root.children_named("environments") {
            self.environments_element(node)?;
        }
        for node in root.children_named("databaseIdProvider") {
            self.database_id_provider_element(node)?;
        }
        for node in root.children_named("mappers") {
            self.mappers_element(node)?;
        }
        Ok(())
    }

    fn properties_element(&mut self, node: &XNode) -> crate::Result<()> {
        if let Some(resource) = node.attr("resource") {
            let text = fs::read_to_string(&resource)
                .map_err(|e| Error::builder(format!("cannot read properties '{}': {}", resource, e)))?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    self.configuration
                        .variables
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }
        for property in node.children_named("property") {
            if let (Some(name), Some(value)) = (property.attr("name"), property.attr("value")) {
                self.configuration.variables.insert(name, value);
            }
        }
        Ok(())
    }

    fn settings_element(&mut self, node: &XNode) -> crate::Result<()> {
        let variables = self.configuration.variables.clone();
        for setting in node.children_named("setting") {
            let name = setting
                .attr("name")
                .ok_or_else(|| Error::builder("<setting> requires a name"))?;
            let value = setting
                .attr_resolved("value", &variables)
                .ok_or_else(|| Error::builder(format!("setting '{}' has no value", name)))?;
            self.apply_setting(&name, &value)?;
        }
        Ok(())
    }

    fn apply_setting(&mut self, name: &str, value: &str) -> crate::Result<()> {
        let truthy = || {
            parse_truthy(Some(value))
                .unwrap_or(false)
        };
        let settings = &mut self.configuration.settings;
        match name {
            "cacheEnabled" => settings.cache_enabled = truthy(),
            "lazyLoadingEnabled" => settings.lazy_loading_enabled = truthy(),
            "aggressiveLazyLoading" => settings.aggressive_lazy_loading = truthy(),
            "mapUnderscoreToCamelCase" => settings.map_underscore_to_camel_case = truthy(),
            "useGeneratedKeys" => settings.use_generated_keys = truthy(),
            "callSettersOnNulls" => settings.call_setters_on_nulls = truthy(),
            "defaultExecutorType" => settings.default_executor_type = value.parse()?,
            "localCacheScope" => settings.local_cache_scope = value.parse()?,
            "autoMappingBehavior" => settings.auto_mapping_behavior = value.parse()?,
            "defaultStatementTimeout" => {
                settings.default_statement_timeout = Some(value.parse::<u64>().map_err(|_| {
                    Error::builder(format!("bad defaultStatementTimeout '{}'", value))
                })?);
            }
            "defaultFetchSize" => {
                settings.default_fetch_size = Some(value.parse::<u32>().map_err(|_| {
                    Error::builder(format!("bad defaultFetchSize '{}'", value))
                })?);
            }
            other => {
                return Err(Error::builder(format!(
                    "unknown setting '{}' in configuration",
                    other
                )));
            }
        }
        Ok(())
    }

    fn type_aliases_element(&mut self, node: &XNode) {
        for alias in node.children_named("typeAlias") {
            if let (Some(name), Some(target)) = (alias.attr("alias"), alias.attr("type")) {
                self.configuration.register_type_alias(name, target);
            }
        }
    }

    fn environments_element(&mut self, node: &XNode) -> crate::Result<()> {
        let default_id = node
            .attr("default")
            .ok_or_else(|| Error::builder("<environments> requires a default"))?;
        for environment in node.children_named("environment") {
            let id = environment
                .attr("id")
                .ok_or_else(|| Error::builder("<environment> requires an id"))?;
            if id != default_id {
                continue;
            }
            let data_source = environment
                .children_named("dataSource")
                .next()
                .ok_or_else(|| Error::builder(format!("environment '{}' has no dataSource", id)))?;
            let driver = self.build_driver(data_source)?;
            self.configuration
                .set_environment(Environment::new(id, driver));
            return Ok(());
        }
        Err(Error::builder(format!(
            "default environment '{}' is not declared",
            default_id
        )))
    }

    fn build_driver(&self, node: &XNode) -> crate::Result<Arc<dyn crate::driver::Driver>> {
        let kind = node
            .attr("type")
            .ok_or_else(|| Error::builder("<dataSource> requires a type"))?;
        let mut properties = HashMap::new();
        for property in node.children_named("property") {
            if let (Some(name), Some(value)) = (
                property.attr("name"),
                property.attr_resolved("value", &self.configuration.variables),
            ) {
                properties.insert(name, value);
            }
        }

        match kind.to_ascii_uppercase().as_str() {
            #[cfg(feature = "sqlite")]
            "SQLITE" | "UNPOOLED" => {
                let url = properties
                    .get("url")
                    .ok_or_else(|| Error::builder("sqlite dataSource requires a url property"))?;
                let driver = crate::driver::sqlite::SqliteDriver::new(url.clone()).build()?;
                Ok(Arc::new(driver))
            }
            other => Err(Error::builder(format!(
                "unsupported dataSource type '{}'",
                other
            ))),
        }
    }

    fn database_id_provider_element(&mut self, node: &XNode) -> crate::Result<()> {
        let Some(environment) = self.configuration.environment() else {
            return Ok(());
        };
        let driver_type = environment.driver.r#type().to_string();
        for property in node.children_named("property") {
            if let (Some(name), Some(value)) = (property.attr("name"), property.attr("value"))
                && name.eq_ignore_ascii_case(&driver_type)
            {
                self.configuration.set_database_id(Some(value));
                return Ok(());
            }
        }
        Ok(())
    }

    fn mappers_element(&mut self, node: &XNode) -> crate::Result<()> {
        for mapper in node.children_named("mapper") {
            let resource = mapper
                .attr("resource")
                .ok_or_else(|| Error::builder("<mapper> requires a resource"))?;
            // The resource may be a literal path or a glob pattern.
            let paths = glob(&resource)
                .map_err(|e| Error::builder(format!("bad mapper resource '{}': {}", resource, e)))?;
            let mut any = false;
            for entry in paths {
                let path = entry.map_err(|e| {
                    Error::builder(format!("unreadable path under '{}': {}", resource, e))
                })?;
                if !path.is_file() {
                    continue;
                }
                any = true;
                let source = path.display().to_string();
                if self.configuration.is_resource_loaded(&source) {
                    continue;
                }
                let xml = fs::read_to_string(&path)
                    .map_err(|e| Error::builder(format!("cannot read '{}': {}", source, e)))?;
                XmlMapperBuilder::new(self.configuration, &source).parse(&xml)?;
            }
            if !any {
                return Err(Error::builder(format!(
                    "mapper resource '{}' matched no files",
                    resource
                )));
            }
        }
        Ok(())
    }
}
