use crate::config::Configuration;
use crate::error::Error;
use crate::mapping::ParameterMapping;
use crate::reflection;
use crate::scripting::tokens::GenericTokenParser;
use crate::value::Value;
use std::collections::HashMap;

/// Replaces every `#{...}` placeholder with a positional `?` and derives
/// the ordered parameter mappings.
///
/// The parameter value is only consulted for type inference, so a build-time
/// pass (static sources) may run without one; runtime passes (dynamic
/// sources) supply it together with the assembly's extra bindings.
pub fn parse_placeholders(
    configuration: &Configuration,
    sql: &str,
    parameter: Option<&Value>,
    additional: &HashMap<String, Value>,
) -> crate::Result<(String, Vec<ParameterMapping>)> {
    let mut mappings = Vec::new();
    let parser = GenericTokenParser::new("#{", "}");
    let parsed = parser.parse(sql, &mut |content| {
        let mapping = build_parameter_mapping(configuration, content, parameter, additional)?;
        mappings.push(mapping);
        Ok("?".to_string())
    })?;
    Ok((parsed, mappings))
}

/// Placeholder grammar: `property[:jdbcType][,name=value,...]`, or a
/// parenthesised inline expression followed by the same options.
fn build_parameter_mapping(
    configuration: &Configuration,
    content: &str,
    parameter: Option<&Value>,
    additional: &HashMap<String, Value>,
) -> crate::Result<ParameterMapping> {
    let content = content.trim();
    let mut mapping = ParameterMapping::default();
    let options_text;

    if let Some(rest) = content.strip_prefix('(') {
        let close = matching_paren(rest).ok_or_else(|| {
            Error::builder(format!("unbalanced parentheses in #{{{}}}", content))
        })?;
        mapping.expression = Some(rest[..close].trim().to_string());
        options_text = rest[close + 1..].trim_start_matches(',').to_string();
    } else {
        let stop = content
            .find([':', ','])
            .unwrap_or(content.len());
        mapping.property = content[..stop].trim().to_string();
        if mapping.property.is_empty() {
            return Err(Error::builder(format!("empty property in #{{{}}}", content)));
        }
        let rest = &content[stop..];
        if let Some(shorthand) = rest.strip_prefix(':') {
            let end = shorthand.find(',').unwrap_or(shorthand.len());
            mapping.jdbc_type = Some(shorthand[..end].trim().parse()?);
            options_text = shorthand[end..].trim_start_matches(',').to_string();
        } else {
            options_text = rest.trim_start_matches(',').to_string();
        }
    }

    for pair in options_text.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            Error::builder(format!("malformed option '{}' in #{{{}}}", pair, content))
        })?;
        let value = value.trim();
        match name.trim() {
            "javaType" => mapping.java_type = Some(value.to_string()),
            "jdbcType" => mapping.jdbc_type = Some(value.parse()?),
            "jdbcTypeName" => mapping.jdbc_type_name = Some(value.to_string()),
            "mode" => mapping.mode = value.parse()?,
            "numericScale" => {
                mapping.numeric_scale = Some(value.parse::<u32>().map_err(|_| {
                    Error::builder(format!("bad numericScale '{}' in #{{{}}}", value, content))
                })?);
            }
            "resultMap" => mapping.result_map_id = Some(value.to_string()),
            "typeHandler" => {
                let handler = configuration
                    .type_handler_registry()
                    .get_named(value)
                    .ok_or_else(|| {
                        Error::builder(format!("unknown typeHandler '{}' in #{{{}}}", value, content))
                    })?;
                mapping.type_handler = Some(handler);
            }
            other => {
                return Err(Error::builder(format!(
                    "unrecognized option '{}' in #{{{}}}",
                    other, content
                )));
            }
        }
    }

    if mapping.java_type.is_none() && !mapping.property.is_empty() {
        mapping.java_type = infer_java_type(&mapping.property, parameter, additional);
    }
    if mapping.type_handler.is_none() {
        mapping.type_handler = Some(
            configuration
                .type_handler_registry()
                .resolve(mapping.java_type.as_deref(), mapping.jdbc_type),
        );
    }

    Ok(mapping)
}

fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 1;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Type resolution order: the additional bindings' value if the property
/// roots there, then the parameter object itself (scalar parameters bind
/// directly), then the property read off the parameter.
fn infer_java_type(
    property: &str,
    parameter: Option<&Value>,
    additional: &HashMap<String, Value>,
) -> Option<String> {
    let root = property.split(['.', '[']).next().unwrap_or(property);
    if let Some(bound) = additional.get(root) {
        let v = if root.len() == property.len() {
            bound
        } else {
            reflection::get_value(bound, &property[root.len()..].trim_start_matches('.'))
        };
        if !v.is_null() {
            return Some(v.type_alias().to_string());
        }
        return None;
    }

    let parameter = parameter?;
    match parameter {
        Value::Map(_) => {
            let v = reflection::get_value(parameter, property);
            if v.is_null() {
                None
            } else {
                Some(v.type_alias().to_string())
            }
        }
        Value::Null => None,
        scalar => Some(scalar.type_alias().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn parse(sql: &str, parameter: Option<&Value>) -> (String, Vec<ParameterMapping>) {
        let config = Configuration::new();
        parse_placeholders(&config, sql, parameter, &HashMap::new()).unwrap()
    }

    #[test]
    fn test_placeholder_count_matches_mappings() {
        let (sql, mappings) = parse("SELECT * FROM t WHERE a = #{a} AND b = #{b}", None);
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(mappings.len(), 2);
        assert_eq!(sql.matches('?').count(), mappings.len());
        assert_eq!(mappings[0].property, "a");
        assert_eq!(mappings[1].property, "b");
    }

    #[test]
    fn test_jdbc_type_shorthand_and_options() {
        let (_, mappings) = parse(
            "UPDATE t SET a = #{a:VARCHAR}, b = #{b, jdbcType=NUMERIC, numericScale=2}",
            None,
        );
        assert_eq!(
            mappings[0].jdbc_type,
            Some(crate::type_handler::JdbcType::Varchar)
        );
        assert_eq!(
            mappings[1].jdbc_type,
            Some(crate::type_handler::JdbcType::Numeric)
        );
        assert_eq!(mappings[1].numeric_scale, Some(2));
    }

    #[test]
    fn test_mode_out_with_result_map() {
        let (_, mappings) = parse("CALL p(#{cur, mode=OUT, resultMap=ns.rm, jdbcType=CURSOR})", None);
        assert_eq!(mappings[0].mode, crate::mapping::ParameterMode::Out);
        assert_eq!(mappings[0].result_map_id.as_deref(), Some("ns.rm"));
    }

    #[test]
    fn test_inline_expression_head() {
        let (sql, mappings) = parse("SELECT #{(a > 1), javaType=boolean}", None);
        assert_eq!(sql, "SELECT ?");
        assert_eq!(mappings[0].expression.as_deref(), Some("a > 1"));
        assert_eq!(mappings[0].java_type.as_deref(), Some("boolean"));
    }

    #[test]
    fn test_type_inferred_from_parameter() {
        let mut m = HashMap::new();
        m.insert("id".to_string(), Value::Int(3));
        let p = Value::Map(m);
        let (_, mappings) = parse("WHERE id = #{id}", Some(&p));
        assert_eq!(mappings[0].java_type.as_deref(), Some("int"));
        assert_eq!(
            mappings[0].type_handler.as_ref().unwrap().java_type(),
            "int"
        );
    }

    #[test]
    fn test_unrecognized_option_rejected() {
        let config = Configuration::new();
        let err =
            parse_placeholders(&config, "#{a, bogus=1}", None, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Builder(_)));
    }
}
