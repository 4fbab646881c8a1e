use crate::driver::ResultSetData;
use crate::error::Error;
use crate::executor::Row;
use crate::mapping::MappedStatement;
use crate::reflection;
use crate::value::Value;

/// Copies the driver's generated-keys result set into the caller's
/// parameter object after an insert.
///
/// Three parameter shapes are handled: a plain object (first key row), a
/// collection (one key row per element, in iteration order), and a
/// wrapped/keyed parameter map where a dotted key property selects the
/// nested object by name prefix.
pub fn assign_generated_keys(
    ms: &MappedStatement,
    parameter: &mut Value,
    keys: &ResultSetData,
) -> crate::Result<()> {
    if ms.key_properties.is_empty() || keys.rows.is_empty() {
        return Ok(());
    }

    match parameter {
        Value::List(items) => assign_to_collection(ms, items, keys),
        Value::Map(map) => {
            // A bare collection parameter arrives wrapped under a
            // well-known name; distribute row-per-element there unless a
            // key property explicitly roots at a map entry.
            let roots_in_map = ms
                .key_properties
                .iter()
                .any(|p| map.contains_key(root_of(p)));
            if !roots_in_map {
                for wrapper in ["list", "collection", "array"] {
                    if let Some(Value::List(items)) = map.get_mut(wrapper) {
                        return assign_to_collection(ms, items, keys);
                    }
                }
            }
            assign_row(ms, parameter, 0, keys)
        }
        _ => Ok(()),
    }
}

fn assign_to_collection(
    ms: &MappedStatement,
    items: &mut [Value],
    keys: &ResultSetData,
) -> crate::Result<()> {
    if keys.rows.len() < items.len() {
        return Err(Error::executor(format!(
            "not enough generated keys: {} rows for {} parameters",
            keys.rows.len(),
            items.len()
        )));
    }
    for (i, item) in items.iter_mut().enumerate() {
        assign_row_values(ms, item, i, keys)?;
    }
    Ok(())
}

fn assign_row(
    ms: &MappedStatement,
    target: &mut Value,
    row: usize,
    keys: &ResultSetData,
) -> crate::Result<()> {
    assign_row_values(ms, target, row, keys)
}

fn assign_row_values(
    ms: &MappedStatement,
    target: &mut Value,
    row_index: usize,
    keys: &ResultSetData,
) -> crate::Result<()> {
    let row = keys.row(row_index);
    for (i, property) in ms.key_properties.iter().enumerate() {
        let value = match ms.key_columns.get(i) {
            Some(column) => row.get(column).clone(),
            None => {
                // Without an explicit column list, match by name first and
                // fall back to position.
                let by_name = row.get(short_name(property));
                if by_name.is_null() && keys.metadata.columns.len() > i {
                    row.get_by_index(i).clone()
                } else {
                    by_name.clone()
                }
            }
        };
        reflection::set_value(target, property, value)?;
    }
    Ok(())
}

/// Applies the single row produced by a select-key statement to the parent
/// statement's parameter. Exactly one row is required.
pub fn assign_select_key(
    key_statement: &MappedStatement,
    parameter: &mut Value,
    rows: &[Row],
) -> crate::Result<()> {
    match rows.len() {
        0 => {
            return Err(Error::executor(format!(
                "key statement '{}' returned no row",
                key_statement.id
            )));
        }
        1 => {}
        n => {
            return Err(Error::executor(format!(
                "key statement '{}' returned {} rows, expected one",
                key_statement.id, n
            )));
        }
    }

    let row = rows[0].borrow();
    let properties = &key_statement.key_properties;
    match (&*row, properties.len()) {
        // A scalar row feeds a single key property directly.
        (scalar, 1) if !matches!(scalar, Value::Map(_)) => {
            reflection::set_value(parameter, &properties[0], scalar.clone())?;
        }
        (Value::Map(_), _) => {
            for (i, property) in properties.iter().enumerate() {
                let source = key_statement
                    .key_columns
                    .get(i)
                    .map(String::as_str)
                    .unwrap_or_else(|| short_name(property));
                let value = reflection::get_value(&row, source).clone();
                reflection::set_value(parameter, property, value)?;
            }
        }
        (other, n) => {
            return Err(Error::executor(format!(
                "key statement '{}' produced {:?} for {} key properties",
                key_statement.id, other, n
            )));
        }
    }
    Ok(())
}

fn root_of(property: &str) -> &str {
    property.split('.').next().unwrap_or(property)
}

fn short_name(property: &str) -> &str {
    property.rsplit('.').next().unwrap_or(property)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::driver::{ColumnInfo, ResultSetMetadata};
    use crate::mapping::{SqlCommandType, SqlSource};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn insert_statement(key_properties: &[&str], key_columns: &[&str]) -> Arc<MappedStatement> {
        let config = Configuration::new();
        MappedStatement::builder(
            "ns.insert",
            Arc::new(SqlSource::new_static("INSERT".to_string(), vec![])),
            SqlCommandType::Insert,
            config.default_language_driver(),
        )
        .key_properties(key_properties.iter().map(|s| s.to_string()).collect())
        .key_columns(key_columns.iter().map(|s| s.to_string()).collect())
        .build()
    }

    fn keys(column: &str, rows: Vec<i64>) -> ResultSetData {
        ResultSetData {
            metadata: Arc::new(ResultSetMetadata {
                columns: vec![ColumnInfo {
                    name: column.to_string(),
                    jdbc_type: None,
                    type_name: None,
                }],
            }),
            rows: rows.into_iter().map(|v| vec![Value::Long(v)]).collect(),
        }
    }

    #[test]
    fn test_single_bean_gets_first_key() {
        let ms = insert_statement(&["id"], &[]);
        let mut param = Value::Map(HashMap::new());
        assign_generated_keys(&ms, &mut param, &keys("id", vec![41])).unwrap();
        assert_eq!(reflection::get_value(&param, "id"), &Value::Long(41));
    }

    #[test]
    fn test_collection_distributes_rows_in_order() {
        let ms = insert_statement(&["id"], &[]);
        let mut param = Value::List(vec![
            Value::Map(HashMap::new()),
            Value::Map(HashMap::new()),
        ]);
        assign_generated_keys(&ms, &mut param, &keys("id", vec![7, 8])).unwrap();
        assert_eq!(reflection::get_value(&param, "[0].id"), &Value::Long(7));
        assert_eq!(reflection::get_value(&param, "[1].id"), &Value::Long(8));
    }

    #[test]
    fn test_wrapped_collection_distributes() {
        let ms = insert_statement(&["id"], &[]);
        let mut inner = HashMap::new();
        inner.insert(
            "list".to_string(),
            Value::List(vec![Value::Map(HashMap::new())]),
        );
        let mut param = Value::Map(inner);
        assign_generated_keys(&ms, &mut param, &keys("id", vec![3])).unwrap();
        assert_eq!(reflection::get_value(&param, "list[0].id"), &Value::Long(3));
    }

    #[test]
    fn test_prefixed_key_property_selects_map_entry() {
        let ms = insert_statement(&["user.id"], &["id"]);
        let mut inner = HashMap::new();
        inner.insert("user".to_string(), Value::Map(HashMap::new()));
        let mut param = Value::Map(inner);
        assign_generated_keys(&ms, &mut param, &keys("id", vec![12])).unwrap();
        assert_eq!(reflection::get_value(&param, "user.id"), &Value::Long(12));
    }

    #[test]
    fn test_too_few_keys_for_collection_errors() {
        let ms = insert_statement(&["id"], &[]);
        let mut param = Value::List(vec![
            Value::Map(HashMap::new()),
            Value::Map(HashMap::new()),
        ]);
        let err = assign_generated_keys(&ms, &mut param, &keys("id", vec![1])).unwrap_err();
        assert!(matches!(err, Error::Executor(_)));
    }

    #[test]
    fn test_select_key_requires_exactly_one_row() {
        let key_ms = insert_statement(&["id"], &[]);
        let mut param = Value::Map(HashMap::new());
        let rows = vec![
            crate::executor::new_row(Value::Long(5)),
            crate::executor::new_row(Value::Long(6)),
        ];
        assert!(assign_select_key(&key_ms, &mut param, &rows).is_err());

        let one = vec![crate::executor::new_row(Value::Long(5))];
        assign_select_key(&key_ms, &mut param, &one).unwrap();
        assert_eq!(reflection::get_value(&param, "id"), &Value::Long(5));
    }
}
