pub mod config;
pub mod include;
pub mod statement;

pub use config::XmlConfigBuilder;

use crate::builder::incomplete::{CacheRefResolver, ResultMapResolver, StatementResolver};
use crate::builder::{MapperBuilderAssistant, resolve_pending};
use crate::cache::Eviction;
use crate::config::{Configuration, SqlFragment};
use crate::error::Error;
use crate::mapping::{Discriminator, ParameterMap, ParameterMapping, ResultFlag, ResultMapping};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::time::Duration;

/* ----------------------------- element tree ------------------------------ */

#[derive(Debug, Clone)]
pub enum XContent {
    Element(XNode),
    Text(String),
    CData(String),
}

/// Minimal element tree read with the streaming XML reader. Statement and
/// fragment bodies are re-serialized from it and handed to the script
/// parser as raw text.
#[derive(Debug, Clone, Default)]
pub struct XNode {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub content: Vec<XContent>,
}

impl XNode {
    /// Parses a document and returns its root element.
    pub fn parse_document(xml: &str) -> crate::Result<XNode> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut stack: Vec<XNode> = Vec::new();
        let mut root: Option<XNode> = None;

        loop {
            buf.clear();
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| Error::builder(format!("XML parse error: {}", e)))?;
            match event {
                Event::Start(e) => {
                    stack.push(element_from(&e)?);
                }
                Event::Empty(e) => {
                    let node = element_from(&e)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| Error::builder("unbalanced XML end tag"))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(e) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = e
                            .decode()
                            .map_err(|err| Error::builder(format!("bad XML text: {}", err)))?;
                        parent.content.push(XContent::Text(text.into_owned()));
                    }
                }
                Event::CData(e) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8(e.into_inner().into_owned())
                            .map_err(|err| Error::builder(format!("bad CDATA: {}", err)))?;
                        parent.content.push(XContent::CData(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        root.ok_or_else(|| Error::builder("XML document has no root element"))
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        self.attrs.get(name).cloned()
    }

    /// Attribute with `${...}` substituted from the configuration
    /// variables.
    pub fn attr_resolved(&self, name: &str, variables: &HashMap<String, String>) -> Option<String> {
        self.attrs
            .get(name)
            .map(|v| crate::scripting::tokens::resolve_placeholders(v, variables))
    }

    pub fn children(&self) -> impl Iterator<Item = &XNode> {
        self.content.iter().filter_map(|c| match c {
            XContent::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XNode> {
        self.children().filter(move |c| c.name == name)
    }

    pub fn has_element_children(&self) -> bool {
        self.children().next().is_some()
    }

    /// Re-serializes the node's content, preserving element structure and
    /// CDATA sections, for the script parser.
    pub fn inner_xml(&self) -> String {
        let mut out = String::new();
        for item in &self.content {
            render_content(item, &mut out);
        }
        out
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                XContent::Text(t) | XContent::CData(t) => Some(t.as_str()),
                XContent::Element(_) => None,
            })
            .collect()
    }
}

fn element_from(e: &quick_xml::events::BytesStart<'_>) -> crate::Result<XNode> {
    let name = String::from_utf8(e.name().as_ref().to_vec())
        .map_err(|err| Error::builder(format!("bad element name: {}", err)))?;
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::builder(format!("bad attribute: {}", err)))?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())
            .map_err(|err| Error::builder(format!("bad attribute name: {}", err)))?;
        let value = attr
            .unescape_value()
            .map_err(|err| Error::builder(format!("bad attribute value: {}", err)))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(XNode {
        name,
        attrs,
        content: Vec::new(),
    })
}

fn attach(stack: &mut [XNode], root: &mut Option<XNode>, node: XNode) -> crate::Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.content.push(XContent::Element(node));
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(Error::builder("multiple XML root elements"));
            }
            *root = Some(node);
            Ok(())
        }
    }
}

fn render_content(content: &XContent, out: &mut String) {
    match content {
        XContent::Text(t) => out.push_str(&escape_text(t)),
        XContent::CData(t) => {
            out.push_str("<![CDATA[");
            out.push_str(t);
            out.push_str("]]>");
        }
        XContent::Element(e) => {
            out.push('<');
            out.push_str(&e.name);
            let mut keys: Vec<&String> = e.attrs.keys().collect();
            keys.sort();
            for key in keys {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape_attr(&e.attrs[key]));
                out.push('"');
            }
            if e.content.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for item in &e.content {
                    render_content(item, out);
                }
                out.push_str("</");
                out.push_str(&e.name);
                out.push('>');
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

pub(crate) fn parse_truthy(s: Option<&str>) -> Option<bool> {
    s.map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
}

/* ----------------------------- mapper builder ----------------------------- */

/// Parses one mapper XML document and registers its namespace's caches,
/// result maps, fragments and statements. Elements are processed grouped
/// by kind (cache-refs, caches, parameter maps, result maps, fragments,
/// statements) regardless of document order; forward references land on
/// the worklists and a fixed-point pass runs after the document.
pub struct XmlMapperBuilder<'a> {
    configuration: &'a mut Configuration,
    resource: String,
}

impl<'a> XmlMapperBuilder<'a> {
    pub fn new(configuration: &'a mut Configuration, resource: impl Into<String>) -> Self {
        Self {
            configuration,
            resource: resource.into(),
        }
    }

    pub fn parse(&mut self, xml: &str) -> crate::Result<()> {
        let root = XNode::parse_document(xml)?;
        if root.name != "mapper" {
            return Err(Error::builder(format!(
                "expected <mapper> root in '{}', found <{}>",
                self.resource, root.name
            )));
        }
        let namespace = root
            .attr("namespace")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::builder(format!("mapper '{}' declares no namespace", self.resource))
            })?;
        let assistant = MapperBuilderAssistant::new(namespace, self.resource.clone());

        for node in root.children_named("cache-ref") {
            self.cache_ref_element(&assistant, node)?;
        }
        for node in root.children_named("cache") {
            cache_element(self.configuration, &assistant, node)?;
        }
        for node in root.children_named("parameterMap") {
            parameter_map_element(self.configuration, &assistant, node)?;
        }
        for node in root.children_named("resultMap") {
            match parse_result_map(self.configuration, &assistant, node, None, Vec::new(), None) {
                Ok(_) => {}
                Err(e) if e.is_incomplete() => {}
                Err(e) => return Err(e),
            }
        }

        // Fragments and statements run in two passes so a databaseId
        // match beats the id-less variant.
        let current_db = self.configuration.database_id().map(str::to_string);
        let mut passes = Vec::new();
        if current_db.is_some() {
            passes.push(current_db.clone());
        }
        passes.push(None);

        for required in &passes {
            for node in root.children_named("sql") {
                sql_element(self.configuration, &assistant, node, required.as_deref())?;
            }
        }

        for required in &passes {
            for node in root.children() {
                if !matches!(node.name.as_str(), "select" | "insert" | "update" | "delete") {
                    continue;
                }
                let builder = statement::XmlStatementBuilder {
                    namespace: assistant.namespace.clone(),
                    resource: self.resource.clone(),
                    shared: assistant.shared.clone(),
                    required_database_id: required.clone(),
                };
                match builder.parse(self.configuration, node) {
                    Ok(()) => {}
                    Err(e) if e.is_incomplete() => {
                        self.configuration.add_incomplete_statement(StatementResolver {
                            namespace: assistant.namespace.clone(),
                            resource: self.resource.clone(),
                            node: node.clone(),
                            shared: assistant.shared.clone(),
                            required_database_id: required.clone(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.configuration.add_loaded_resource(self.resource.clone());
        resolve_pending(self.configuration)
    }

    fn cache_ref_element(
        &mut self,
        assistant: &MapperBuilderAssistant,
        node: &XNode,
    ) -> crate::Result<()> {
        let referenced = node
            .attr("namespace")
            .ok_or_else(|| Error::builder("<cache-ref> requires a namespace attribute"))?;
        match assistant.use_cache_ref(self.configuration, &referenced) {
            Ok(()) => Ok(()),
            Err(e) if e.is_incomplete() => {
                self.configuration.add_incomplete_cache_ref(CacheRefResolver {
                    namespace: assistant.namespace.clone(),
                    referenced,
                    shared: assistant.shared.clone(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn cache_element(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    node: &XNode,
) -> crate::Result<()> {
    if let Some(kind) = node.attr("type")
        && !kind.is_empty()
        && kind.to_ascii_uppercase() != "PERPETUAL"
    {
        return Err(Error::builder(format!(
            "custom cache implementations are registered programmatically, found type '{}'",
            kind
        )));
    }
    let eviction = match node.attr("eviction") {
        Some(e) => e.parse::<Eviction>()?,
        None => Eviction::Lru,
    };
    let flush_interval = node
        .attr("flushInterval")
        .map(|v| {
            v.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                Error::builder(format!("bad flushInterval '{}'", v))
            })
        })
        .transpose()?;
    let size = node
        .attr("size")
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| Error::builder(format!("bad cache size '{}'", v)))
        })
        .transpose()?;
    let read_write = !parse_truthy(node.attr("readOnly").as_deref()).unwrap_or(false);
    let blocking = parse_truthy(node.attr("blocking").as_deref()).unwrap_or(false);

    assistant.use_new_cache(
        configuration,
        None,
        eviction,
        flush_interval,
        size,
        read_write,
        blocking,
    )?;
    Ok(())
}

fn parameter_map_element(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    node: &XNode,
) -> crate::Result<()> {
    let id = assistant.apply_namespace(
        &node
            .attr("id")
            .ok_or_else(|| Error::builder("<parameterMap> requires an id"))?,
        false,
    )?;
    let type_alias = node
        .attr("type")
        .map(|t| configuration.resolve_type_alias(&t));

    let mut mappings = Vec::new();
    for parameter in node.children_named("parameter") {
        let mut mapping = ParameterMapping::new(
            parameter
                .attr("property")
                .ok_or_else(|| Error::builder("<parameter> requires a property"))?,
        );
        mapping.java_type = parameter
            .attr("javaType")
            .map(|t| configuration.resolve_type_alias(&t));
        mapping.jdbc_type = parameter.attr("jdbcType").map(|t| t.parse()).transpose()?;
        if let Some(mode) = parameter.attr("mode") {
            mapping.mode = mode.parse()?;
        }
        mapping.numeric_scale = parameter
            .attr("numericScale")
            .map(|v| {
                v.parse::<u32>()
                    .map_err(|_| Error::builder(format!("bad numericScale '{}'", v)))
            })
            .transpose()?;
        mapping.result_map_id = parameter
            .attr("resultMap")
            .map(|r| assistant.apply_namespace(&r, true))
            .transpose()?;
        if let Some(name) = parameter.attr("typeHandler") {
            mapping.type_handler = Some(
                configuration
                    .type_handler_registry()
                    .get_named(&name)
                    .ok_or_else(|| Error::builder(format!("unknown typeHandler '{}'", name)))?,
            );
        }
        mappings.push(mapping);
    }

    configuration.add_parameter_map(std::sync::Arc::new(ParameterMap {
        id,
        type_alias,
        mappings,
    }))
}

fn sql_element(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    node: &XNode,
    required_database_id: Option<&str>,
) -> crate::Result<()> {
    let node_db = node.attr("databaseId");
    let matches = match (required_database_id, node_db.as_deref()) {
        (Some(required), Some(declared)) => required == declared,
        (Some(_), None) | (None, Some(_)) => false,
        (None, None) => true,
    };
    if !matches {
        return Ok(());
    }
    let id = assistant.apply_namespace(
        &node
            .attr("id")
            .ok_or_else(|| Error::builder("<sql> requires an id"))?,
        false,
    )?;
    if configuration.get_sql_fragment(&id).is_some() {
        return Ok(());
    }
    configuration.add_sql_fragment(SqlFragment {
        id,
        text: node.inner_xml(),
    })
}

/* ----------------------------- result maps ------------------------------- */

/// Parses a `<resultMap>` (or an inline nested map) and registers it.
/// Returns the registered id; a pending `extends` queues a resolver and
/// surfaces as incomplete. Re-parsing an already-registered synthetic id
/// is a no-op so statement retries stay idempotent.
pub(crate) fn parse_result_map(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    node: &XNode,
    synthetic_id: Option<String>,
    inherited_mappings: Vec<ResultMapping>,
    enclosing_type: Option<&str>,
) -> crate::Result<String> {
    let id = match node.attr("id") {
        Some(declared) => assistant.apply_namespace(&declared, false)?,
        None => synthetic_id.ok_or_else(|| Error::builder("<resultMap> requires an id"))?,
    };
    if configuration.has_result_map(&id) {
        return Ok(id);
    }

    let type_attr = node
        .attr("type")
        .or_else(|| node.attr("ofType"))
        .or_else(|| node.attr("resultType"))
        .or_else(|| node.attr("javaType"))
        .or_else(|| enclosing_type.map(str::to_string))
        .unwrap_or_else(|| "map".to_string());
    let extends = node
        .attr("extends")
        .map(|e| assistant.apply_namespace(&e, true))
        .transpose()?;
    let auto_mapping = parse_truthy(node.attr("autoMapping").as_deref());

    let mut mappings = inherited_mappings;
    let mut discriminator = None;
    for child in node.children() {
        match child.name.as_str() {
            "constructor" => {
                for arg in child.children() {
                    let mut flags = vec![ResultFlag::Constructor];
                    if arg.name == "idArg" {
                        flags.push(ResultFlag::Id);
                    }
                    mappings.push(build_result_mapping(
                        configuration,
                        assistant,
                        arg,
                        flags,
                        &id,
                    )?);
                }
            }
            "id" => {
                mappings.push(build_result_mapping(
                    configuration,
                    assistant,
                    child,
                    vec![ResultFlag::Id],
                    &id,
                )?);
            }
            "result" | "association" | "collection" => {
                mappings.push(build_result_mapping(
                    configuration,
                    assistant,
                    child,
                    Vec::new(),
                    &id,
                )?);
            }
            "discriminator" => {
                discriminator = Some(parse_discriminator(
                    configuration,
                    assistant,
                    child,
                    &id,
                    &type_attr,
                    &mappings,
                )?);
            }
            _ => {}
        }
    }

    let resolver = ResultMapResolver {
        id: id.clone(),
        type_alias: configuration.resolve_type_alias(&type_attr),
        extends,
        mappings,
        discriminator,
        auto_mapping,
    };
    match resolver.try_resolve(configuration) {
        Ok(_) => Ok(id),
        Err(e) if e.is_incomplete() => {
            configuration.add_incomplete_result_map(resolver);
            Err(e)
        }
        Err(e) => Err(e),
    }
}

fn build_result_mapping(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    node: &XNode,
    flags: Vec<ResultFlag>,
    owner_id: &str,
) -> crate::Result<ResultMapping> {
    let property = node.attr("property").or_else(|| node.attr("name"));
    let mut column = node.attr("column");

    let mut mapping = ResultMapping::default();
    mapping.property = property.clone();
    mapping.flags = flags;
    mapping.java_type = if node.name == "collection" {
        Some("list".to_string())
    } else {
        node.attr("javaType")
            .map(|t| configuration.resolve_type_alias(&t))
    };
    mapping.jdbc_type = node.attr("jdbcType").map(|t| t.parse()).transpose()?;
    mapping.nested_select_id = node
        .attr("select")
        .map(|s| assistant.apply_namespace(&s, true))
        .transpose()?;
    mapping.column_prefix = node.attr("columnPrefix");
    mapping.result_set = node.attr("resultSet");
    mapping.foreign_column = node.attr("foreignColumn");
    if let Some(columns) = node.attr("notNullColumn") {
        mapping.not_null_columns = columns
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
    }
    mapping.lazy = match node.attr("fetchType").as_deref() {
        Some("lazy") => true,
        Some("eager") => false,
        _ => configuration.settings.lazy_loading_enabled,
    };
    if let Some(name) = node.attr("typeHandler") {
        mapping.type_handler = Some(
            configuration
                .type_handler_registry()
                .get_named(&name)
                .ok_or_else(|| Error::builder(format!("unknown typeHandler '{}'", name)))?,
        );
    }

    if let Some(declared) = node.attr("resultMap") {
        mapping.nested_result_map_id = Some(assistant.apply_namespace(&declared, true)?);
    } else if mapping.nested_select_id.is_none() && node.has_element_children() {
        let element_type = node
            .attr("ofType")
            .or_else(|| node.attr("javaType"))
            .unwrap_or_else(|| "map".to_string());
        let synthetic = format!(
            "{}_{}[{}]",
            owner_id,
            node.name,
            property.as_deref().unwrap_or("")
        );
        let nested_id = parse_result_map(
            configuration,
            assistant,
            node,
            Some(synthetic),
            Vec::new(),
            Some(&element_type),
        )?;
        mapping.nested_result_map_id = Some(nested_id);
    }

    // Composite foreign keys ("{prop=col,...}") are only recognized for a
    // nested select without a foreignColumn declaration.
    let composite_column = mapping.nested_select_id.is_some()
        && mapping
            .foreign_column
            .as_deref()
            .is_none_or(str::is_empty)
        && column
            .as_deref()
            .is_some_and(|c| c.trim_start().starts_with('{'));
    if composite_column {
        mapping.composites = parse_composites(column.as_deref().unwrap())?;
        column = None;
    }
    mapping.column = column;

    Ok(mapping)
}

fn parse_composites(raw: &str) -> crate::Result<Vec<ResultMapping>> {
    let inner = raw
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| Error::builder(format!("bad composite column spec '{}'", raw)))?;
    let mut composites = Vec::new();
    for pair in inner.split(',') {
        let (property, column) = pair.split_once('=').ok_or_else(|| {
            Error::builder(format!("bad composite column entry '{}' in '{}'", pair, raw))
        })?;
        composites.push(ResultMapping::new(property.trim(), column.trim()));
    }
    Ok(composites)
}

fn parse_discriminator(
    configuration: &mut Configuration,
    assistant: &MapperBuilderAssistant,
    node: &XNode,
    owner_id: &str,
    owner_type: &str,
    current_mappings: &[ResultMapping],
) -> crate::Result<Discriminator> {
    let mut mapping = ResultMapping::default();
    mapping.column = node.attr("column");
    mapping.java_type = node
        .attr("javaType")
        .map(|t| configuration.resolve_type_alias(&t));
    mapping.jdbc_type = node.attr("jdbcType").map(|t| t.parse()).transpose()?;
    if let Some(name) = node.attr("typeHandler") {
        mapping.type_handler = Some(
            configuration
                .type_handler_registry()
                .get_named(&name)
                .ok_or_else(|| Error::builder(format!("unknown typeHandler '{}'", name)))?,
        );
    }

    let mut cases = HashMap::new();
    for case in node.children_named("case") {
        let value = case
            .attr("value")
            .ok_or_else(|| Error::builder("<case> requires a value"))?;
        let map_id = match case.attr("resultMap") {
            Some(declared) => assistant.apply_namespace(&declared, true)?,
            None => {
                // Inline cases inherit the enclosing map's entries.
                let synthetic = format!("{}_case[{}]", owner_id, value);
                parse_result_map(
                    configuration,
                    assistant,
                    case,
                    Some(synthetic),
                    current_mappings.to_vec(),
                    Some(owner_type),
                )?
            }
        };
        cases.insert(value, map_id);
    }

    Ok(Discriminator { mapping, cases })
}
