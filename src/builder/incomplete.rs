use crate::builder::AssistantShared;
use crate::builder::annotation::MapperDef;
use crate::builder::xml::XNode;
use crate::config::Configuration;
use crate::error::Error;
use crate::mapping::{Discriminator, ResultMap, ResultMapping};
use std::sync::{Arc, Mutex};

/// Resolver thunks for forward references. Each carries enough parsed
/// state to retry idempotently; `try_resolve` answers resolved or, via an
/// incomplete error, pending.

pub struct CacheRefResolver {
    pub namespace: String,
    pub referenced: String,
    pub shared: Arc<Mutex<AssistantShared>>,
}

impl CacheRefResolver {
    pub fn try_resolve(&self, configuration: &mut Configuration) -> crate::Result<()> {
        let cache = configuration.get_cache(&self.referenced)?;
        let mut shared = self.shared.lock().unwrap();
        shared.current_cache = Some(cache);
        shared.unresolved_cache_ref = false;
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!("{} -> {}", self.namespace, self.referenced)
    }
}

/// Deferred result-map registration, holding the child's own entries until
/// the `extends` parent exists.
pub struct ResultMapResolver {
    pub id: String,
    pub type_alias: String,
    pub extends: Option<String>,
    pub mappings: Vec<ResultMapping>,
    pub discriminator: Option<Discriminator>,
    pub auto_mapping: Option<bool>,
}

impl ResultMapResolver {
    /// Merges the parent's entries under the child's overrides and
    /// registers the finished map.
    ///
    /// Child properties win; a child declaring any constructor entry drops
    /// every constructor entry inherited from the parent; the child's
    /// discriminator (or none) is used.
    pub fn try_resolve(&self, configuration: &mut Configuration) -> crate::Result<Arc<ResultMap>> {
        let mut mappings: Vec<ResultMapping> = Vec::new();
        if let Some(parent_id) = &self.extends {
            let parent = configuration.get_result_map(parent_id).map_err(|_| {
                Error::incomplete(format!(
                    "result map '{}' extends undeclared '{}'",
                    self.id, parent_id
                ))
            })?;
            let mut inherited: Vec<ResultMapping> = parent.result_mappings.clone();
            inherited.retain(|pm| !self.mappings.iter().any(|cm| cm == pm));
            if self.mappings.iter().any(|m| m.is_constructor()) {
                inherited.retain(|pm| !pm.is_constructor());
            }
            mappings.extend(inherited);
        }
        mappings.extend(self.mappings.iter().cloned());

        let result_map = Arc::new(ResultMap::new(
            self.id.clone(),
            self.type_alias.clone(),
            mappings,
            self.discriminator.clone(),
            self.auto_mapping,
        ));
        configuration.add_result_map(result_map.clone())?;
        Ok(result_map)
    }

    pub fn describe(&self) -> String {
        match &self.extends {
            Some(parent) => format!("{} extends {}", self.id, parent),
            None => self.id.clone(),
        }
    }
}

/// A statement whose references (result map, parameter map, include,
/// cache-ref) were not all declared yet; retried by re-running the XML
/// statement builder over the retained node.
pub struct StatementResolver {
    pub namespace: String,
    pub resource: String,
    pub node: XNode,
    pub shared: Arc<Mutex<AssistantShared>>,
    pub required_database_id: Option<String>,
}

impl StatementResolver {
    pub fn try_resolve(&self, configuration: &mut Configuration) -> crate::Result<()> {
        crate::builder::xml::statement::XmlStatementBuilder {
            namespace: self.namespace.clone(),
            resource: self.resource.clone(),
            shared: self.shared.clone(),
            required_database_id: self.required_database_id.clone(),
        }
        .parse(configuration, &self.node)
    }

    pub fn describe(&self) -> String {
        format!(
            "{}.{}",
            self.namespace,
            self.node.attr("id").unwrap_or_default()
        )
    }
}

/// A descriptor-mapper method with a pending reference.
pub struct MethodResolver {
    pub def: Arc<MapperDef>,
    pub method_index: usize,
    pub shared: Arc<Mutex<AssistantShared>>,
}

impl MethodResolver {
    pub fn try_resolve(&self, configuration: &mut Configuration) -> crate::Result<()> {
        crate::builder::annotation::parse_method(
            configuration,
            &self.def,
            self.method_index,
            self.shared.clone(),
        )
    }

    pub fn describe(&self) -> String {
        let name = self
            .def
            .methods
            .get(self.method_index)
            .map(|m| m.name.as_str())
            .unwrap_or("?");
        format!("{}.{}", self.def.type_name, name)
    }
}
