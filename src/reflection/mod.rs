pub mod property;

use crate::error::Error;
use crate::value::Value;
use property::{PropToken, PropertyTokenizer};
use std::collections::HashMap;

/// Property-path facade over the `Value` IR.
///
/// Every parameter object and every projected row passes through `Value`, so
/// path reads and writes, case-correct property resolution, and
/// default-construction all operate on that representation. The serde bridge
/// (`value::to_value` / `value::from_value`) stands in for class analysis:
/// field names and generic element types are fixed by the `Serialize` /
/// `Deserialize` impls at compile time.

static NULL: Value = Value::Null;

/// Reads a (possibly dotted, possibly indexed) property path. Missing
/// segments yield `Null` rather than an error, matching map-get semantics.
pub fn get_value<'a>(root: &'a Value, path: &str) -> &'a Value {
    let mut current = root;
    for token in PropertyTokenizer::new(path) {
        current = get_token(current, &token);
        if current.is_null() {
            return &NULL;
        }
    }
    current
}

fn get_token<'a>(current: &'a Value, token: &PropToken<'_>) -> &'a Value {
    let base = if token.name.is_empty() {
        current
    } else {
        match current {
            Value::Map(map) => map.get(token.name).unwrap_or(&NULL),
            _ => &NULL,
        }
    };
    match token.index {
        None => base,
        Some(index) => match base {
            Value::List(items) => index
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .unwrap_or(&NULL),
            Value::Map(map) => map.get(index).unwrap_or(&NULL),
            _ => &NULL,
        },
    }
}

/// Writes a property path, auto-instantiating intermediate maps (and
/// extending lists up to an indexed position) where the path crosses a
/// `Null` or missing segment.
pub fn set_value(root: &mut Value, path: &str, value: Value) -> crate::Result<()> {
    let tokens: Vec<PropToken<'_>> = PropertyTokenizer::new(path).collect();
    set_tokens(root, &tokens, value).map_err(|message| Error::Reflection {
        class: "Value".to_string(),
        path: path.to_string(),
        message,
    })
}

fn set_tokens(current: &mut Value, tokens: &[PropToken<'_>], value: Value) -> Result<(), String> {
    let Some((token, rest)) = tokens.split_first() else {
        *current = value;
        return Ok(());
    };

    if current.is_null() {
        *current = Value::Map(HashMap::new());
    }

    let slot = slot_for(current, token)?;
    if rest.is_empty() {
        *slot = value;
        Ok(())
    } else {
        set_tokens(slot, rest, value)
    }
}

fn slot_for<'a>(current: &'a mut Value, token: &PropToken<'_>) -> Result<&'a mut Value, String> {
    let base: &mut Value = if token.name.is_empty() {
        current
    } else {
        match current {
            Value::Map(map) => map.entry(token.name.to_string()).or_insert(Value::Null),
            other => {
                return Err(format!(
                    "cannot set property '{}' on {:?}",
                    token.name, other
                ));
            }
        }
    };

    let Some(index) = token.index else {
        return Ok(base);
    };

    if let Ok(i) = index.parse::<usize>() {
        if base.is_null() {
            *base = Value::List(Vec::new());
        }
        match base {
            Value::List(items) => {
                if items.len() <= i {
                    items.resize(i + 1, Value::Null);
                }
                Ok(&mut items[i])
            }
            other => Err(format!("cannot index [{}] into {:?}", index, other)),
        }
    } else {
        if base.is_null() {
            *base = Value::Map(HashMap::new());
        }
        match base {
            Value::Map(map) => Ok(map.entry(index.to_string()).or_insert(Value::Null)),
            other => Err(format!("cannot index [{}] into {:?}", index, other)),
        }
    }
}

/// Whether the path can be read to a non-structural dead end. Maps answer
/// true for any direct key they hold; nested paths recurse.
pub fn has_getter(root: &Value, path: &str) -> bool {
    let mut current = root;
    for token in PropertyTokenizer::new(path) {
        match current {
            Value::Map(map) => {
                let Some(next) = map.get(token.name) else {
                    return false;
                };
                current = match token.index {
                    None => next,
                    Some(index) => match next {
                        Value::List(items) => {
                            match index.parse::<usize>().ok().and_then(|i| items.get(i)) {
                                Some(v) => v,
                                None => return false,
                            }
                        }
                        Value::Map(inner) => match inner.get(index) {
                            Some(v) => v,
                            None => return false,
                        },
                        _ => return false,
                    },
                };
            }
            _ => return false,
        }
    }
    true
}

/// Maps accept writes for any key, so a setter exists whenever every
/// intermediate segment is a map (or constructible from `Null`).
pub fn has_setter(root: &Value, path: &str) -> bool {
    let mut current = root;
    for token in PropertyTokenizer::new(path) {
        match current {
            Value::Map(map) => match map.get(token.name) {
                None | Some(Value::Null) => return true,
                Some(next) => current = next,
            },
            Value::Null => return true,
            _ => return false,
        }
    }
    true
}

/// Resolves the canonical case-correct property name for `name` against the
/// keys of a map, optionally translating `underscore_names` to camelCase
/// first. Exact match wins over case-insensitive match.
pub fn find_property(target: &Value, name: &str, underscore_to_camel: bool) -> Option<String> {
    let Value::Map(map) = target else {
        return None;
    };
    let candidate = if underscore_to_camel && name.contains('_') {
        camel_case(name)
    } else {
        name.to_string()
    };
    if map.contains_key(&candidate) {
        return Some(candidate);
    }
    map.keys()
        .find(|k| k.eq_ignore_ascii_case(&candidate))
        .cloned()
}

/// `user_name` -> `userName`. Uppercase input is lowered first so `USER_ID`
/// also resolves to `userId`.
pub fn camel_case(name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut upper_next = false;
    for c in lowered.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Default-constructs the value shape named by a type alias: collection
/// aliases get a `List`, everything else a `Map` (scalar targets are filled
/// by their type handler and never default-constructed).
pub fn default_construct(type_alias: &str) -> Value {
    match type_alias {
        "list" | "collection" | "arraylist" | "vec" => Value::List(Vec::new()),
        _ => Value::Map(HashMap::new()),
    }
}

/// Builds an object from ordered constructor arguments. Named arguments
/// land under their property names; unnamed ones under `param1..paramN`.
pub fn construct_with_args(names: &[Option<String>], values: Vec<Value>) -> Value {
    let mut map = HashMap::with_capacity(values.len());
    for (i, value) in values.into_iter().enumerate() {
        let key = names
            .get(i)
            .and_then(|n| n.clone())
            .unwrap_or_else(|| format!("param{}", i + 1));
        map.insert(key, value);
    }
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Value {
        let mut addr = HashMap::new();
        addr.insert("city".to_string(), Value::Text("kyoto".to_string()));
        let mut m = HashMap::new();
        m.insert("name".to_string(), Value::Text("a".to_string()));
        m.insert("address".to_string(), Value::Map(addr));
        m.insert(
            "tags".to_string(),
            Value::List(vec![Value::Text("x".to_string()), Value::Text("y".to_string())]),
        );
        Value::Map(m)
    }

    #[test]
    fn test_get_nested() {
        let u = user();
        assert_eq!(
            get_value(&u, "address.city"),
            &Value::Text("kyoto".to_string())
        );
        assert_eq!(get_value(&u, "tags[1]"), &Value::Text("y".to_string()));
        assert_eq!(get_value(&u, "missing.deep"), &Value::Null);
    }

    #[test]
    fn test_set_auto_instantiates() {
        let mut v = Value::Map(HashMap::new());
        set_value(&mut v, "address.city", Value::Text("nara".to_string())).unwrap();
        assert_eq!(get_value(&v, "address.city"), &Value::Text("nara".to_string()));
    }

    #[test]
    fn test_set_list_index_extends() {
        let mut v = Value::Map(HashMap::new());
        set_value(&mut v, "ids[2]", Value::Long(9)).unwrap();
        assert_eq!(get_value(&v, "ids[2]"), &Value::Long(9));
        assert_eq!(get_value(&v, "ids[0]"), &Value::Null);
    }

    #[test]
    fn test_set_on_scalar_fails() {
        let mut v = Value::Map(HashMap::new());
        set_value(&mut v, "name", Value::Text("a".to_string())).unwrap();
        let err = set_value(&mut v, "name.first", Value::Null).unwrap_err();
        assert!(matches!(err, Error::Reflection { .. }));
    }

    #[test]
    fn test_find_property_case_and_underscore() {
        let mut m = HashMap::new();
        m.insert("userName".to_string(), Value::Null);
        let v = Value::Map(m);
        assert_eq!(
            find_property(&v, "user_name", true),
            Some("userName".to_string())
        );
        assert_eq!(
            find_property(&v, "USERNAME", false),
            Some("userName".to_string())
        );
        assert_eq!(find_property(&v, "user_name", false), None);
    }

    #[test]
    fn test_has_getter_setter() {
        let u = user();
        assert!(has_getter(&u, "address.city"));
        assert!(!has_getter(&u, "address.zip"));
        assert!(has_setter(&u, "address.zip"));
        assert!(!has_setter(&u, "name.first"));
    }
}
