use crate::cache::CacheKey;
use crate::config::{AutoMappingBehavior, Configuration};
use crate::driver::{QueryResult, ResultRow, ResultSetData};
use crate::error::Error;
use crate::executor::loader::{self, ResultLoader, ResultLoaderMap};
use crate::executor::{Executor, ResultHandler, Row, materialize, new_row};
use crate::mapping::{Discriminator, MappedStatement, ResultMap, ResultMapping, RowBounds};
use crate::reflection;
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Projects materialized result sets into row objects: discriminator
/// dispatch, constructor and explicit mappings, automatic mapping of
/// unmapped columns, nested result-map collapsing, nested selects with
/// deferral, and cross-result-set relations.
pub struct ResultSetHandler<'a, 'b> {
    executor: &'a mut dyn Executor,
    configuration: Arc<Configuration>,
    ms: Arc<MappedStatement>,
    #[allow(dead_code)]
    parameter: Value,
    row_bounds: RowBounds,
    result_handler: Option<&'b mut dyn ResultHandler>,
    stopped: bool,

    /// Combined row-key -> partially built object, for the duration of one
    /// result-set scan (flushed between groups when `resultOrdered`).
    nested_result_objects: HashMap<CacheKey, Row>,
    /// Result-map id -> object currently under construction above us, for
    /// rows whose nested maps point back at an ancestor.
    ancestor_objects: HashMap<String, Row>,
    /// Parent rows waiting for a later named result set, keyed by the
    /// foreign-key column values.
    pending_relations: HashMap<CacheKey, Vec<PendingRelation>>,
    /// Result-set name -> the mapping that consumes it.
    next_result_maps: HashMap<String, ResultMapping>,
    /// (result map, prefix) -> unmapped-column auto mappings, memoized per
    /// scan shape.
    auto_mapping_cache: HashMap<String, Vec<AutoMapping>>,
    /// Parent/child links applied once the scan has seen every
    /// contributing row; deepest links first so children are complete
    /// before they are embedded.
    links: Vec<Link>,
}

#[derive(Clone)]
struct PendingRelation {
    row: Row,
    mapping: ResultMapping,
}

struct AutoMapping {
    column: String,
    property: String,
}

struct Link {
    depth: usize,
    parent: Row,
    child: Row,
    mapping: ResultMapping,
}

impl<'a, 'b> ResultSetHandler<'a, 'b> {
    pub fn new(
        executor: &'a mut dyn Executor,
        configuration: Arc<Configuration>,
        ms: Arc<MappedStatement>,
        parameter: Value,
        row_bounds: RowBounds,
        result_handler: Option<&'b mut dyn ResultHandler>,
    ) -> Self {
        Self {
            executor,
            configuration,
            ms,
            parameter,
            row_bounds,
            result_handler,
            stopped: false,
            nested_result_objects: HashMap::new(),
            ancestor_objects: HashMap::new(),
            pending_relations: HashMap::new(),
            next_result_maps: HashMap::new(),
            auto_mapping_cache: HashMap::new(),
            links: Vec::new(),
        }
    }

    /// Walks the statement's result sets in arrival order: one declared
    /// result map per set, then any named sets feeding pending relations.
    /// A statement with several mapped sets returns one list value per
    /// set.
    pub fn handle(&mut self, result: QueryResult) -> crate::Result<Vec<Row>> {
        let result_maps = self.ms.result_maps.clone();
        let mut per_set: Vec<Vec<Row>> = Vec::new();

        for (index, rs) in result.result_sets.iter().enumerate() {
            if let Some(result_map) = result_maps.get(index) {
                let rows = self.handle_result_set(rs, result_map.clone())?;
                per_set.push(rows);
            } else if let Some(name) = self.ms.result_sets.get(index).cloned()
                && let Some(mapping) = self.next_result_maps.get(&name).cloned()
            {
                self.handle_result_set_for_parent(rs, &mapping)?;
            }
        }

        if result_maps.is_empty() && result.result_sets.iter().any(|rs| !rs.rows.is_empty()) {
            return Err(Error::executor(format!(
                "statement '{}' returned rows but declares no result map",
                self.ms.id
            )));
        }

        self.apply_links()?;

        match per_set.len() {
            0 => Ok(Vec::new()),
            1 => {
                let rows = per_set.into_iter().next().unwrap();
                if self.result_handler.is_some() {
                    self.drain_to_handler(&rows);
                    Ok(Vec::new())
                } else {
                    Ok(rows)
                }
            }
            _ => {
                // Multi-result-set statements collapse into a list of
                // per-set lists.
                let lists = per_set
                    .into_iter()
                    .map(|rows| new_row(Value::List(materialize(&rows))))
                    .collect();
                Ok(lists)
            }
        }
    }

    fn drain_to_handler(&mut self, rows: &[Row]) {
        let Some(handler) = self.result_handler.as_deref_mut() else {
            return;
        };
        for row in rows {
            if !handler.handle_result(&row.borrow()) {
                self.stopped = true;
                break;
            }
        }
    }

    fn handle_result_set(
        &mut self,
        rs: &ResultSetData,
        result_map: Arc<ResultMap>,
    ) -> crate::Result<Vec<Row>> {
        if result_map.has_nested_result_maps {
            self.handle_rows_nested(rs, result_map)
        } else {
            self.handle_rows_simple(rs, result_map)
        }
    }

    fn bounded_indices(&self, rs: &ResultSetData) -> std::ops::Range<usize> {
        let start = self.row_bounds.offset.min(rs.rows.len());
        let end = self
            .row_bounds
            .offset
            .saturating_add(self.row_bounds.limit)
            .min(rs.rows.len());
        start..end
    }

    fn handle_rows_simple(
        &mut self,
        rs: &ResultSetData,
        result_map: Arc<ResultMap>,
    ) -> crate::Result<Vec<Row>> {
        let mut results = Vec::new();
        for index in self.bounded_indices(rs) {
            if self.stopped {
                break;
            }
            let row = rs.row(index);
            let resolved = self.resolve_discriminated(&result_map, row, None)?;
            let value = self.build_row_object(row, &resolved, None, 0)?;
            results.push(value);
        }
        Ok(results)
    }

    fn handle_rows_nested(
        &mut self,
        rs: &ResultSetData,
        result_map: Arc<ResultMap>,
    ) -> crate::Result<Vec<Row>> {
        let mut results = Vec::new();
        self.nested_result_objects.clear();

        for index in self.bounded_indices(rs) {
            if self.stopped {
                break;
            }
            let row = rs.row(index);
            let resolved = self.resolve_discriminated(&result_map, row, None)?;
            let row_key = self.create_row_key(&resolved, row, None);

            let partial = row_key
                .as_ref()
                .and_then(|k| self.nested_result_objects.get(k).cloned());
            match partial {
                Some(existing) => {
                    // A repeated parent row only contributes to nested
                    // collections.
                    self.apply_nested_result_mappings(
                        row,
                        &resolved,
                        &existing,
                        row_key.clone(),
                        None,
                        1,
                    )?;
                }
                None => {
                    if self.ms.result_ordered {
                        // Caller asserts pre-grouped rows: a new main row
                        // closes the previous group, so the memo can be
                        // flushed to bound memory.
                        self.nested_result_objects.clear();
                    }
                    let object = self.nested_row_value(row, &resolved, row_key, None, 0)?;
                    if !object.borrow().is_null() {
                        results.push(object);
                    }
                }
            }
        }
        self.nested_result_objects.clear();
        Ok(results)
    }

    /* --------------------------- discriminator ---------------------------- */

    /// Follows the discriminator chain to the effective result map,
    /// breaking cycles with a visited-id set.
    fn resolve_discriminated(
        &mut self,
        result_map: &Arc<ResultMap>,
        row: ResultRow<'_>,
        prefix: Option<&str>,
    ) -> crate::Result<Arc<ResultMap>> {
        let mut current = result_map.clone();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(current.id.clone());

        while let Some(discriminator) = current.discriminator.clone() {
            let value = self.discriminator_value(row, &discriminator, prefix)?;
            let Some(map_id) = discriminator.map_id_for(&value) else {
                break;
            };
            if !visited.insert(map_id.to_string()) {
                break;
            }
            current = self.configuration.get_result_map(map_id)?;
        }
        Ok(current)
    }

    fn discriminator_value(
        &self,
        row: ResultRow<'_>,
        discriminator: &Discriminator,
        prefix: Option<&str>,
    ) -> crate::Result<String> {
        let mapping = &discriminator.mapping;
        let column = mapping.column.as_deref().unwrap_or_default();
        let column = prefixed(column, prefix);
        let raw = row.get(&column);
        let handler = mapping.type_handler.clone().unwrap_or_else(|| {
            self.configuration
                .type_handler_registry()
                .resolve(mapping.java_type.as_deref(), mapping.jdbc_type)
        });
        Ok(handler.get_result(raw)?.to_sql_text())
    }

    /* --------------------------- row construction ------------------------- */

    /// Builds one row object without nested-result mappings: constructor
    /// or scalar or default-construct, then automatic mapping, then
    /// explicit property mappings (columns, nested selects, pending
    /// relations). The inner value stays `Null` when the row contributed
    /// nothing.
    fn build_row_object(
        &mut self,
        row: ResultRow<'_>,
        result_map: &Arc<ResultMap>,
        prefix: Option<&str>,
        depth: usize,
    ) -> crate::Result<Row> {
        let alias = self.configuration.resolve_type_alias(&result_map.type_alias);

        if self.is_primitive_target(&alias) {
            return Ok(new_row(self.primitive_row_value(row, result_map, &alias, prefix)?));
        }

        let mut found = false;
        let base = if result_map.constructor_result_mappings.is_empty() {
            reflection::default_construct(&alias)
        } else {
            found = true;
            self.create_with_constructor(row, result_map, prefix)?
        };
        let row_obj = new_row(base);

        if self.should_auto_map(result_map, depth > 0) {
            found |= self.apply_automatic_mappings(row, result_map, &row_obj, prefix)?;
        }

        let mut loaders = ResultLoaderMap::new();
        found |=
            self.apply_property_mappings(row, result_map, &row_obj, prefix, &mut loaders)?;

        if !loaders.is_empty() {
            if self.configuration.settings.aggressive_lazy_loading {
                // Aggressive mode collapses "first touch" into "load all";
                // no proxy is needed when everything resolves up front.
                loaders.load_all(&mut row_obj.borrow_mut())?;
            } else {
                let wrapped = self.configuration.proxy_factory().create_proxy(
                    row_obj.borrow().clone(),
                    loaders,
                    &self.configuration,
                )?;
                *row_obj.borrow_mut() = wrapped;
            }
        }

        if !found {
            *row_obj.borrow_mut() = Value::Null;
        }
        Ok(row_obj)
    }

    fn is_primitive_target(&self, alias: &str) -> bool {
        alias != "map"
            && alias != "list"
            && self.configuration.type_handler_registry().has_java_type(alias)
    }

    /// Single-column scalar projection through the target type's
    /// converter.
    fn primitive_row_value(
        &self,
        row: ResultRow<'_>,
        result_map: &Arc<ResultMap>,
        alias: &str,
        prefix: Option<&str>,
    ) -> crate::Result<Value> {
        let column = result_map
            .property_result_mappings
            .iter()
            .find_map(|m| m.column.clone())
            .map(|c| prefixed(&c, prefix))
            .unwrap_or_else(|| {
                row.metadata
                    .columns
                    .first()
                    .map(|c| c.name.clone())
                    .unwrap_or_default()
            });
        let handler = self
            .configuration
            .type_handler_registry()
            .resolve(Some(alias), None);
        handler.get_result(row.get(&column))
    }

    fn create_with_constructor(
        &mut self,
        row: ResultRow<'_>,
        result_map: &Arc<ResultMap>,
        prefix: Option<&str>,
    ) -> crate::Result<Value> {
        let mappings = result_map.constructor_result_mappings.clone();
        let mut names = Vec::with_capacity(mappings.len());
        let mut values = Vec::with_capacity(mappings.len());
        for mapping in &mappings {
            names.push(mapping.property.clone());
            let value = if let Some(nested_id) = &mapping.nested_result_map_id {
                let nested = self.configuration.get_result_map(nested_id)?;
                let nested_prefix = concat_prefix(prefix, mapping.column_prefix.as_deref());
                let child =
                    self.build_row_object(row, &nested, nested_prefix.as_deref(), 1)?;
                child.borrow().clone()
            } else if mapping.nested_select_id.is_some() {
                // Constructor arguments cannot defer: run the sub-query
                // immediately.
                self.execute_nested_query(row, mapping, prefix)?
            } else {
                self.read_mapped_column(row, mapping, prefix)?
            };
            values.push(value);
        }
        Ok(reflection::construct_with_args(&names, values))
    }

    /* ---------------------------- auto mapping ---------------------------- */

    fn should_auto_map(&self, result_map: &ResultMap, is_nested: bool) -> bool {
        if let Some(explicit) = result_map.auto_mapping {
            return explicit;
        }
        match self.configuration.settings.auto_mapping_behavior {
            AutoMappingBehavior::None => false,
            AutoMappingBehavior::Partial => !is_nested,
            AutoMappingBehavior::Full => true,
        }
    }

    fn apply_automatic_mappings(
        &mut self,
        row: ResultRow<'_>,
        result_map: &Arc<ResultMap>,
        target: &Row,
        prefix: Option<&str>,
    ) -> crate::Result<bool> {
        let cache_key = format!("{}:{}", result_map.id, prefix.unwrap_or(""));
        if !self.auto_mapping_cache.contains_key(&cache_key) {
            let mappings = build_auto_mappings(&self.configuration, row, result_map, prefix);
            self.auto_mapping_cache.insert(cache_key.clone(), mappings);
        }
        let auto = &self.auto_mapping_cache[&cache_key];

        let mut found = false;
        let call_on_nulls = self.configuration.settings.call_setters_on_nulls;
        let mut target = target.borrow_mut();
        for mapping in auto {
            let value = row.get(&mapping.column);
            if !value.is_null() {
                found = true;
            }
            if !value.is_null() || call_on_nulls {
                reflection::set_value(&mut target, &mapping.property, value.clone())?;
            }
        }
        Ok(found)
    }

    /* -------------------------- property mappings ------------------------- */

    fn apply_property_mappings(
        &mut self,
        row: ResultRow<'_>,
        result_map: &Arc<ResultMap>,
        target: &Row,
        prefix: Option<&str>,
        loaders: &mut ResultLoaderMap,
    ) -> crate::Result<bool> {
        let mut found = false;
        let mappings = result_map.property_result_mappings.clone();
        for mapping in &mappings {
            let Some(property) = mapping.property.clone() else {
                continue;
            };

            if mapping.result_set.is_some() {
                self.register_pending_relation(row, mapping, target)?;
                continue;
            }
            if mapping.nested_result_map_id.is_some() {
                // Handled by the nested-result pass.
                continue;
            }

            if let Some(nested_id) = mapping.nested_select_id.clone() {
                found |= self.apply_nested_query_mapping(
                    row, mapping, target, &property, &nested_id, prefix, loaders,
                )?;
                continue;
            }

            let value = self.read_mapped_column(row, mapping, prefix)?;
            if !value.is_null() {
                found = true;
            }
            if !value.is_null() || self.configuration.settings.call_setters_on_nulls {
                reflection::set_value(&mut target.borrow_mut(), &property, value)?;
            }
        }
        Ok(found)
    }

    fn read_mapped_column(
        &self,
        row: ResultRow<'_>,
        mapping: &ResultMapping,
        prefix: Option<&str>,
    ) -> crate::Result<Value> {
        let Some(column) = &mapping.column else {
            return Ok(Value::Null);
        };
        let column = prefixed(column, prefix);
        let raw = row.get(&column);
        let handler = mapping.type_handler.clone().unwrap_or_else(|| {
            self.configuration
                .type_handler_registry()
                .resolve(mapping.java_type.as_deref(), mapping.jdbc_type)
        });
        handler.get_result(raw)
    }

    /* ---------------------------- nested selects -------------------------- */

    #[allow(clippy::too_many_arguments)]
    fn apply_nested_query_mapping(
        &mut self,
        row: ResultRow<'_>,
        mapping: &ResultMapping,
        target: &Row,
        property: &str,
        nested_id: &str,
        prefix: Option<&str>,
        loaders: &mut ResultLoaderMap,
    ) -> crate::Result<bool> {
        let nested_parameter = self.nested_query_parameter(row, mapping, prefix)?;
        if nested_parameter.is_null() {
            return Ok(false);
        }

        let sub_ms = self.configuration.get_mapped_statement(nested_id)?;
        let bound_sql = sub_ms.get_bound_sql(&self.configuration, &nested_parameter)?;
        let key = self.executor.create_cache_key(
            &sub_ms,
            &nested_parameter,
            &RowBounds::DEFAULT,
            &bound_sql,
        );
        let target_is_list = self.is_collection_mapping(mapping);

        if self.executor.is_cached(&key) {
            // The sub-query is cached or still being computed above us:
            // queue the assignment for the end of the outermost query.
            self.executor
                .defer_load(target.clone(), property.to_string(), key, target_is_list)?;
            Ok(false)
        } else if mapping.lazy && self.configuration.settings.lazy_loading_enabled {
            loaders.add_loader(
                property,
                ResultLoader::new(
                    self.configuration.clone(),
                    nested_id,
                    nested_parameter,
                    target_is_list,
                ),
            );
            Ok(false)
        } else {
            let value = self.run_nested_query(&sub_ms, nested_parameter, target_is_list)?;
            let found = !value.is_null();
            reflection::set_value(&mut target.borrow_mut(), property, value)?;
            Ok(found)
        }
    }

    fn execute_nested_query(
        &mut self,
        row: ResultRow<'_>,
        mapping: &ResultMapping,
        prefix: Option<&str>,
    ) -> crate::Result<Value> {
        let parameter = self.nested_query_parameter(row, mapping, prefix)?;
        if parameter.is_null() {
            return Ok(Value::Null);
        }
        let nested_id = mapping.nested_select_id.as_deref().unwrap_or_default();
        let sub_ms = self.configuration.get_mapped_statement(nested_id)?;
        self.run_nested_query(&sub_ms, parameter, self.is_collection_mapping(mapping))
    }

    fn run_nested_query(
        &mut self,
        sub_ms: &Arc<MappedStatement>,
        parameter: Value,
        target_is_list: bool,
    ) -> crate::Result<Value> {
        let mut parameter = parameter;
        let rows = self
            .executor
            .query(sub_ms, &mut parameter, RowBounds::DEFAULT, None)?;
        loader::extract_result(&rows, target_is_list)
    }

    /// The sub-query's parameter: the single key column's value, or a map
    /// assembled from the composite-column list. All-null keys yield a
    /// null parameter, which suppresses the sub-query.
    fn nested_query_parameter(
        &self,
        row: ResultRow<'_>,
        mapping: &ResultMapping,
        prefix: Option<&str>,
    ) -> crate::Result<Value> {
        if mapping.composites.is_empty() {
            return self.read_mapped_column(row, mapping, prefix);
        }
        let mut map = HashMap::new();
        let mut any = false;
        for composite in &mapping.composites {
            let value = self.read_mapped_column(row, composite, prefix)?;
            if !value.is_null() {
                any = true;
            }
            if let Some(property) = &composite.property {
                map.insert(property.clone(), value);
            }
        }
        if any { Ok(Value::Map(map)) } else { Ok(Value::Null) }
    }

    fn is_collection_mapping(&self, mapping: &ResultMapping) -> bool {
        matches!(
            mapping
                .java_type
                .as_deref()
                .map(|t| self.configuration.resolve_type_alias(t))
                .as_deref(),
            Some("list")
        )
    }

    /* ------------------------- nested result maps ------------------------- */

    fn nested_row_value(
        &mut self,
        row: ResultRow<'_>,
        result_map: &Arc<ResultMap>,
        row_key: Option<CacheKey>,
        prefix: Option<&str>,
        depth: usize,
    ) -> crate::Result<Row> {
        let object = self.build_row_object(row, result_map, prefix, depth)?;
        if object.borrow().is_null() {
            return Ok(object);
        }
        if let Some(key) = &row_key {
            self.nested_result_objects.insert(key.clone(), object.clone());
        }
        self.ancestor_objects
            .insert(result_map.id.clone(), object.clone());
        self.apply_nested_result_mappings(row, result_map, &object, row_key, prefix, depth + 1)?;
        self.ancestor_objects.remove(&result_map.id);
        Ok(object)
    }

    fn apply_nested_result_mappings(
        &mut self,
        row: ResultRow<'_>,
        result_map: &Arc<ResultMap>,
        parent: &Row,
        parent_key: Option<CacheKey>,
        parent_prefix: Option<&str>,
        depth: usize,
    ) -> crate::Result<()> {
        let mappings: Vec<ResultMapping> = result_map
            .property_result_mappings
            .iter()
            .filter(|m| m.nested_result_map_id.is_some() && m.result_set.is_none())
            .cloned()
            .collect();

        for mapping in mappings {
            let nested_id = mapping.nested_result_map_id.as_deref().unwrap();
            let prefix = concat_prefix(parent_prefix, mapping.column_prefix.as_deref());
            let nested_map = self.configuration.get_result_map(nested_id)?;
            let nested_map =
                self.resolve_discriminated(&nested_map, row, prefix.as_deref())?;

            // A nested map naming an object still under construction above
            // us closes a cycle; embed a snapshot of the ancestor rather
            // than re-constructing it.
            if let Some(ancestor) = self.ancestor_objects.get(&nested_map.id).cloned() {
                self.links.push(Link {
                    depth,
                    parent: parent.clone(),
                    child: ancestor,
                    mapping: mapping.clone(),
                });
                continue;
            }

            if !self.any_not_null_column(row, &mapping, prefix.as_deref()) {
                continue;
            }

            let child_key = self.create_row_key(&nested_map, row, prefix.as_deref());
            let combined = combine_keys(parent_key.as_ref(), child_key);
            let known = combined
                .as_ref()
                .is_some_and(|k| self.nested_result_objects.contains_key(k));

            let child = if known {
                self.nested_result_objects[combined.as_ref().unwrap()].clone()
            } else {
                self.nested_row_value(row, &nested_map, combined, prefix.as_deref(), depth)?
            };
            if child.borrow().is_null() {
                continue;
            }
            if !known {
                self.links.push(Link {
                    depth,
                    parent: parent.clone(),
                    child,
                    mapping: mapping.clone(),
                });
            }
        }
        Ok(())
    }

    fn any_not_null_column(
        &self,
        row: ResultRow<'_>,
        mapping: &ResultMapping,
        prefix: Option<&str>,
    ) -> bool {
        if mapping.not_null_columns.is_empty() {
            return true;
        }
        mapping
            .not_null_columns
            .iter()
            .any(|c| !row.get(&prefixed(c, prefix)).is_null())
    }

    /// Embeds children into parents once every contributing row has been
    /// seen. Deepest links first, so each child value is complete before a
    /// grandparent embeds it.
    fn apply_links(&mut self) -> crate::Result<()> {
        let mut links = std::mem::take(&mut self.links);
        links.sort_by(|a, b| b.depth.cmp(&a.depth));
        for link in links {
            let child_value = link.child.borrow().clone();
            link_objects(
                &self.configuration,
                &link.parent,
                &link.mapping,
                child_value,
            )?;
        }
        Ok(())
    }

    /* ------------------------- synthetic row keys ------------------------- */

    /// Row identity for collapsing: the result-map id plus the ID-flagged
    /// column values (all property columns when no IDs are declared, all
    /// columns when the map declares none at all). Returns `None` when no
    /// column contributed, which makes every row distinct.
    fn create_row_key(
        &self,
        result_map: &Arc<ResultMap>,
        row: ResultRow<'_>,
        prefix: Option<&str>,
    ) -> Option<CacheKey> {
        let mut key = CacheKey::new();
        key.update(Value::Text(result_map.id.clone()));

        let mappings: Vec<&ResultMapping> = if result_map.id_result_mappings.is_empty() {
            result_map.property_result_mappings.iter().collect()
        } else {
            result_map.id_result_mappings.iter().collect()
        };

        let mut found = false;
        if mappings.is_empty() {
            for column in row.metadata.column_names() {
                let value = row.get(column);
                if !value.is_null() {
                    key.update(Value::Text(column.to_ascii_uppercase()));
                    key.update(value.clone());
                    found = true;
                }
            }
        } else {
            for mapping in mappings {
                if mapping.nested_result_map_id.is_some() {
                    continue;
                }
                let Some(column) = &mapping.column else {
                    continue;
                };
                let value = row.get(&prefixed(column, prefix));
                if !value.is_null() {
                    key.update(Value::Text(column.to_ascii_uppercase()));
                    key.update(value.clone());
                    found = true;
                }
            }
        }
        if found { Some(key) } else { None }
    }

    /* ----------------------- cross-result-set joins ----------------------- */

    fn register_pending_relation(
        &mut self,
        row: ResultRow<'_>,
        mapping: &ResultMapping,
        parent: &Row,
    ) -> crate::Result<()> {
        let rs_name = mapping.result_set.clone().unwrap();
        self.next_result_maps.insert(rs_name.clone(), mapping.clone());

        let key = relation_key(&rs_name, mapping.column.as_deref(), row);
        self.pending_relations
            .entry(key)
            .or_default()
            .push(PendingRelation {
                row: parent.clone(),
                mapping: mapping.clone(),
            });

        // Collections read as empty, not null, while the named set is
        // still pending.
        if self.is_collection_mapping(mapping)
            && let Some(property) = &mapping.property
        {
            let mut target = parent.borrow_mut();
            if reflection::get_value(&target, property).is_null() {
                reflection::set_value(&mut target, property, Value::List(Vec::new()))?;
            }
        }
        Ok(())
    }

    fn handle_result_set_for_parent(
        &mut self,
        rs: &ResultSetData,
        mapping: &ResultMapping,
    ) -> crate::Result<()> {
        let rs_name = mapping.result_set.clone().unwrap_or_default();
        let nested_id = mapping.nested_result_map_id.as_deref().ok_or_else(|| {
            Error::executor(format!(
                "result set '{}' mapping declares no result map",
                rs_name
            ))
        })?;
        let result_map = self.configuration.get_result_map(nested_id)?;

        for index in 0..rs.rows.len() {
            let row = rs.row(index);
            let resolved = self.resolve_discriminated(&result_map, row, None)?;
            let value = self.build_row_object(row, &resolved, None, 1)?;
            if value.borrow().is_null() {
                continue;
            }

            let key = relation_key(&rs_name, mapping.foreign_column.as_deref(), row);
            if let Some(relations) = self.pending_relations.get(&key).cloned() {
                let child_value = value.borrow().clone();
                for relation in relations {
                    link_objects(
                        &self.configuration,
                        &relation.row,
                        &relation.mapping,
                        child_value.clone(),
                    )?;
                }
            }
        }
        Ok(())
    }
}

/* ------------------------------ free helpers ------------------------------ */

fn prefixed(column: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}{}", p, column),
        _ => column.to_string(),
    }
}

fn concat_prefix(parent: Option<&str>, own: Option<&str>) -> Option<String> {
    match (parent, own) {
        (None, None) => None,
        (Some(p), None) => Some(p.to_string()),
        (None, Some(o)) => Some(o.to_string()),
        (Some(p), Some(o)) => Some(format!("{}{}", p, o)),
    }
}

fn combine_keys(parent: Option<&CacheKey>, child: Option<CacheKey>) -> Option<CacheKey> {
    match (parent, child) {
        (Some(p), Some(c)) => {
            let mut combined = c;
            combined.update_all(p.components().iter().cloned());
            Some(combined)
        }
        _ => None,
    }
}

fn relation_key(rs_name: &str, columns: Option<&str>, row: ResultRow<'_>) -> CacheKey {
    let mut key = CacheKey::new();
    key.update(Value::Text(rs_name.to_string()));
    if let Some(columns) = columns {
        for column in columns.split(',') {
            key.update(row.get(column.trim()).clone());
        }
    }
    key
}

/// Sets or appends a child value on its parent: collection-typed mappings
/// accumulate, association mappings assign.
fn link_objects(
    configuration: &Configuration,
    parent: &Row,
    mapping: &ResultMapping,
    child_value: Value,
) -> crate::Result<()> {
    let Some(property) = &mapping.property else {
        return Ok(());
    };
    let collection = matches!(
        mapping
            .java_type
            .as_deref()
            .map(|t| configuration.resolve_type_alias(t))
            .as_deref(),
        Some("list")
    );
    let mut target = parent.borrow_mut();
    if collection {
        let mut items = match reflection::get_value(&target, property) {
            Value::List(existing) => existing.clone(),
            Value::Null => Vec::new(),
            other => {
                return Err(Error::executor(format!(
                    "property '{}' holds {:?}, expected a collection",
                    property, other
                )));
            }
        };
        items.push(child_value);
        reflection::set_value(&mut target, property, Value::List(items))?;
    } else {
        reflection::set_value(&mut target, property, child_value)?;
    }
    Ok(())
}

fn build_auto_mappings(
    configuration: &Configuration,
    row: ResultRow<'_>,
    result_map: &ResultMap,
    prefix: Option<&str>,
) -> Vec<AutoMapping> {
    let mut mappings = Vec::new();
    for column in row.metadata.column_names() {
        let candidate = match prefix {
            Some(p) if !p.is_empty() => {
                let upper = column.to_ascii_uppercase();
                if !upper.starts_with(&p.to_ascii_uppercase()) {
                    continue;
                }
                &column[p.len()..]
            }
            _ => column,
        };
        if result_map
            .mapped_columns
            .contains(&candidate.to_ascii_uppercase())
        {
            continue;
        }
        let property = if configuration.settings.map_underscore_to_camel_case {
            reflection::camel_case(candidate)
        } else {
            candidate.to_string()
        };
        mappings.push(AutoMapping {
            column: column.to_string(),
            property,
        });
    }
    mappings
}
