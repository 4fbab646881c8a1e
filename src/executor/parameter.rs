use crate::config::Configuration;
use crate::mapping::{BoundSql, ParameterMapping, ParameterMode};
use crate::reflection;
use crate::scripting::expr::{self, Scope};
use crate::value::Value;

struct BindingScope<'a> {
    bound_sql: &'a BoundSql,
    parameter: &'a Value,
}

impl Scope for BindingScope<'_> {
    fn lookup(&self, name: &str) -> Value {
        if self.bound_sql.has_additional_parameter(name) {
            return self.bound_sql.get_additional_parameter(name);
        }
        match self.parameter {
            Value::Map(_) => reflection::get_value(self.parameter, name).clone(),
            scalar if name == "value" => scalar.clone(),
            _ => Value::Null,
        }
    }
}

/// Resolves the raw value a parameter mapping binds, before type-handler
/// normalization. Additional bindings (loop variables, `<bind>` results)
/// shadow the parameter object; a scalar parameter binds directly to any
/// property reference.
pub fn resolve_parameter_value(
    bound_sql: &BoundSql,
    parameter: &Value,
    mapping: &ParameterMapping,
) -> crate::Result<Value> {
    if let Some(expression) = &mapping.expression {
        let parsed = expr::parse_expr(expression)?;
        let scope = BindingScope {
            bound_sql,
            parameter,
        };
        return Ok(expr::eval_value(&parsed, &scope));
    }

    let property = &mapping.property;
    if bound_sql.has_additional_parameter(property) {
        return Ok(bound_sql.get_additional_parameter(property));
    }
    Ok(match parameter {
        Value::Map(_) => reflection::get_value(parameter, property).clone(),
        Value::Null => Value::Null,
        scalar => scalar.clone(),
    })
}

/// Walks the bound SQL's parameter mappings in order and produces the
/// driver-ready bindings. OUT-only parameters are skipped on input.
pub fn build_parameters(
    _configuration: &Configuration,
    bound_sql: &BoundSql,
    parameter: &Value,
) -> crate::Result<Vec<(String, Value)>> {
    let mut out = Vec::with_capacity(bound_sql.parameter_mappings.len());
    for mapping in &bound_sql.parameter_mappings {
        if mapping.mode == ParameterMode::Out {
            continue;
        }
        let raw = resolve_parameter_value(bound_sql, parameter, mapping)?;
        let value = match &mapping.type_handler {
            Some(handler) => handler.set_parameter(&raw, mapping.jdbc_type)?,
            None => raw,
        };
        out.push((mapping.property.clone(), value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn mapping(property: &str) -> ParameterMapping {
        ParameterMapping::new(property)
    }

    #[test]
    fn test_additional_bindings_shadow_parameter() {
        let mut bound = BoundSql::new("?".to_string(), vec![mapping("id")]);
        bound.set_additional_parameter("id", Value::Long(99));
        let mut m = HashMap::new();
        m.insert("id".to_string(), Value::Long(1));
        let parameter = Value::Map(m);

        let config = Configuration::new();
        let params = build_parameters(&config, &bound, &parameter).unwrap();
        assert_eq!(params, vec![("id".to_string(), Value::Long(99))]);
    }

    #[test]
    fn test_scalar_parameter_binds_directly() {
        let bound = BoundSql::new("?".to_string(), vec![mapping("anything")]);
        let config = Configuration::new();
        let params = build_parameters(&config, &bound, &Value::Long(7)).unwrap();
        assert_eq!(params[0].1, Value::Long(7));
    }

    #[test]
    fn test_out_parameters_skipped() {
        let mut out_mapping = mapping("result");
        out_mapping.mode = ParameterMode::Out;
        let bound = BoundSql::new("?".to_string(), vec![out_mapping, mapping("in")]);
        let mut m = HashMap::new();
        m.insert("in".to_string(), Value::Text("v".to_string()));
        let config = Configuration::new();
        let params = build_parameters(&config, &bound, &Value::Map(m)).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].0, "in");
    }
}
