use crate::mapping::ParameterMapping;
use crate::reflection;
use crate::value::Value;
use std::collections::HashMap;

/// A realised SQL string with positional placeholders, the ordered
/// parameter bindings that fill them, and the extra bindings produced
/// during dynamic assembly (loop variables, `<bind>` results).
///
/// Owned by the call that produced it; the producing `SqlSource` is shared.
#[derive(Debug, Clone)]
pub struct BoundSql {
    pub sql: String,
    pub parameter_mappings: Vec<ParameterMapping>,
    pub additional_parameters: HashMap<String, Value>,
}

impl BoundSql {
    pub fn new(sql: String, parameter_mappings: Vec<ParameterMapping>) -> Self {
        BoundSql {
            sql,
            parameter_mappings,
            additional_parameters: HashMap::new(),
        }
    }

    /// Looks up a (possibly dotted) property against the additional
    /// bindings. The first path segment selects the binding.
    pub fn has_additional_parameter(&self, property: &str) -> bool {
        self.additional_parameters.contains_key(root_segment(property))
    }

    pub fn get_additional_parameter(&self, property: &str) -> Value {
        let root = root_segment(property);
        match self.additional_parameters.get(root) {
            None => Value::Null,
            Some(bound) => {
                if root.len() == property.len() {
                    bound.clone()
                } else {
                    reflection::get_value(bound, &property[root.len() + 1..]).clone()
                }
            }
        }
    }

    pub fn set_additional_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.additional_parameters.insert(name.into(), value);
    }
}

fn root_segment(property: &str) -> &str {
    property
        .split_once('.')
        .map(|(head, _)| head)
        .unwrap_or(property)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_additional_parameter_paths() {
        let mut b = BoundSql::new("SELECT 1".to_string(), vec![]);
        let mut item = HashMap::new();
        item.insert("id".to_string(), Value::Long(5));
        b.set_additional_parameter("__frch_item_0", Value::Map(item));

        assert!(b.has_additional_parameter("__frch_item_0"));
        assert!(b.has_additional_parameter("__frch_item_0.id"));
        assert!(!b.has_additional_parameter("item"));
        assert_eq!(b.get_additional_parameter("__frch_item_0.id"), Value::Long(5));
    }
}
