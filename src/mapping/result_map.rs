use crate::type_handler::{JdbcType, TypeHandler};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFlag {
    Id,
    Constructor,
}

/// One column-to-property projection rule.
///
/// Equality is by property name only so that override semantics hold when
/// merging an extending result map into its parent.
#[derive(Clone, Default)]
pub struct ResultMapping {
    pub property: Option<String>,
    pub column: Option<String>,
    pub java_type: Option<String>,
    pub jdbc_type: Option<JdbcType>,
    pub type_handler: Option<Arc<dyn TypeHandler>>,
    pub flags: Vec<ResultFlag>,
    /// Triggers a sub-query for this property.
    pub nested_select_id: Option<String>,
    /// Triggers a nested projection for this property.
    pub nested_result_map_id: Option<String>,
    pub not_null_columns: HashSet<String>,
    pub column_prefix: Option<String>,
    /// Multi-column keys for nested selects: `column="{p1=c1,p2=c2}"`.
    pub composites: Vec<ResultMapping>,
    /// Names the result set this property is joined from, for statements
    /// returning multiple result sets.
    pub result_set: Option<String>,
    pub foreign_column: Option<String>,
    pub lazy: bool,
}

impl ResultMapping {
    pub fn new(property: impl Into<String>, column: impl Into<String>) -> Self {
        ResultMapping {
            property: Some(property.into()),
            column: Some(column.into()),
            ..Default::default()
        }
    }

    pub fn is_id(&self) -> bool {
        self.flags.contains(&ResultFlag::Id)
    }

    pub fn is_constructor(&self) -> bool {
        self.flags.contains(&ResultFlag::Constructor)
    }

    pub fn is_compound(&self) -> bool {
        self.nested_result_map_id.is_some() || self.nested_select_id.is_some()
    }
}

impl PartialEq for ResultMapping {
    fn eq(&self, other: &Self) -> bool {
        self.property.is_some() && self.property == other.property
    }
}

impl fmt::Debug for ResultMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultMapping")
            .field("property", &self.property)
            .field("column", &self.column)
            .field("flags", &self.flags)
            .field("nested_select_id", &self.nested_select_id)
            .field("nested_result_map_id", &self.nested_result_map_id)
            .finish()
    }
}

/// Polymorphic-row selector: reads one column and dispatches the row to one
/// of several result maps keyed by the column's string value.
#[derive(Debug, Clone)]
pub struct Discriminator {
    pub mapping: ResultMapping,
    pub cases: HashMap<String, String>,
}

impl Discriminator {
    pub fn map_id_for(&self, value: &str) -> Option<&str> {
        self.cases.get(value).map(String::as_str)
    }
}

/// Immutable projection rule set for one target shape.
#[derive(Debug, Clone)]
pub struct ResultMap {
    pub id: String,
    pub type_alias: String,
    pub result_mappings: Vec<ResultMapping>,
    pub id_result_mappings: Vec<ResultMapping>,
    pub constructor_result_mappings: Vec<ResultMapping>,
    pub property_result_mappings: Vec<ResultMapping>,
    /// Upper-cased column names referenced by any mapping, used to
    /// partition mapped from unmapped columns during projection.
    pub mapped_columns: HashSet<String>,
    pub mapped_properties: HashSet<String>,
    pub discriminator: Option<Discriminator>,
    pub has_nested_result_maps: bool,
    pub has_nested_queries: bool,
    pub auto_mapping: Option<bool>,
}

impl ResultMap {
    pub fn new(
        id: impl Into<String>,
        type_alias: impl Into<String>,
        result_mappings: Vec<ResultMapping>,
        discriminator: Option<Discriminator>,
        auto_mapping: Option<bool>,
    ) -> Self {
        let mut mapped_columns = HashSet::new();
        let mut mapped_properties = HashSet::new();
        let mut id_result_mappings = Vec::new();
        let mut constructor_result_mappings = Vec::new();
        let mut property_result_mappings = Vec::new();
        let mut has_nested_result_maps = false;
        let mut has_nested_queries = false;

        for mapping in &result_mappings {
            has_nested_queries |= mapping.nested_select_id.is_some();
            has_nested_result_maps |=
                mapping.nested_result_map_id.is_some() && mapping.result_set.is_none();

            if let Some(column) = &mapping.column {
                mapped_columns.insert(column.to_ascii_uppercase());
            }
            for composite in &mapping.composites {
                if let Some(column) = &composite.column {
                    mapped_columns.insert(column.to_ascii_uppercase());
                }
            }
            if let Some(property) = &mapping.property {
                mapped_properties.insert(property.clone());
            }

            if mapping.is_constructor() {
                constructor_result_mappings.push(mapping.clone());
            } else {
                property_result_mappings.push(mapping.clone());
            }
            if mapping.is_id() {
                id_result_mappings.push(mapping.clone());
            }
        }

        ResultMap {
            id: id.into(),
            type_alias: type_alias.into(),
            result_mappings,
            id_result_mappings,
            constructor_result_mappings,
            property_result_mappings,
            mapped_columns,
            mapped_properties,
            discriminator,
            has_nested_result_maps,
            has_nested_queries,
            auto_mapping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_partitions() {
        let mut id = ResultMapping::new("id", "ID");
        id.flags.push(ResultFlag::Id);
        let mut ctor = ResultMapping::new("name", "NAME");
        ctor.flags.push(ResultFlag::Constructor);
        let mut nested = ResultMapping::new("orders", "");
        nested.column = None;
        nested.nested_result_map_id = Some("ns.orders".to_string());

        let rm = ResultMap::new("ns.user", "user", vec![id, ctor, nested], None, None);
        assert_eq!(rm.id_result_mappings.len(), 1);
        assert_eq!(rm.constructor_result_mappings.len(), 1);
        assert_eq!(rm.property_result_mappings.len(), 2);
        assert!(rm.has_nested_result_maps);
        assert!(!rm.has_nested_queries);
        assert!(rm.mapped_columns.contains("ID"));
        assert!(rm.mapped_properties.contains("orders"));
    }

    #[test]
    fn test_mapping_equality_by_property() {
        let a = ResultMapping::new("x", "COL_A");
        let b = ResultMapping::new("x", "COL_B");
        let c = ResultMapping::new("y", "COL_A");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
