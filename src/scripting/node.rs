use crate::scripting::context::DynamicContext;
use crate::scripting::expr::{self, Expr};
use crate::scripting::tokens::GenericTokenParser;
use crate::value::Value;

const ITEM_PREFIX: &str = "__frch_";

/// A single node of the dynamic-SQL tree. `apply` appends SQL fragments and
/// bindings to the assembly context and reports whether the node
/// contributed anything (drives `<choose>` fallthrough).
#[derive(Debug, Clone)]
pub enum SqlNode {
    Mixed(Vec<SqlNode>),
    StaticText(String),
    /// Text containing `${...}` substitutions, expanded against the current
    /// bindings on every application.
    Text(String),
    If {
        test: Expr,
        contents: Box<SqlNode>,
    },
    Choose {
        whens: Vec<(Expr, SqlNode)>,
        otherwise: Option<Box<SqlNode>>,
    },
    Trim {
        prefix: Option<String>,
        suffix: Option<String>,
        prefix_overrides: Vec<String>,
        suffix_overrides: Vec<String>,
        contents: Box<SqlNode>,
    },
    ForEach {
        collection: Expr,
        item: Option<String>,
        index: Option<String>,
        open: String,
        separator: String,
        close: String,
        contents: Box<SqlNode>,
    },
    Bind {
        name: String,
        expression: Expr,
    },
}

impl SqlNode {
    /// `<where>` is a trim with a fixed prefix and leading-connective
    /// removal.
    pub fn where_node(contents: SqlNode) -> SqlNode {
        SqlNode::Trim {
            prefix: Some("WHERE".to_string()),
            suffix: None,
            prefix_overrides: ["AND ", "OR ", "AND\n", "OR\n", "AND\r", "OR\r", "AND\t", "OR\t"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            suffix_overrides: Vec::new(),
            contents: Box::new(contents),
        }
    }

    /// `<set>` is a trim with a fixed prefix and trailing-comma removal.
    pub fn set_node(contents: SqlNode) -> SqlNode {
        SqlNode::Trim {
            prefix: Some("SET".to_string()),
            suffix: None,
            prefix_overrides: Vec::new(),
            suffix_overrides: vec![",".to_string()],
            contents: Box::new(contents),
        }
    }

    pub fn apply(&self, ctx: &mut DynamicContext<'_>) -> crate::Result<bool> {
        match self {
            SqlNode::Mixed(children) => {
                for child in children {
                    child.apply(ctx)?;
                }
                Ok(true)
            }
            SqlNode::StaticText(text) => {
                ctx.append_sql(text);
                Ok(true)
            }
            SqlNode::Text(text) => {
                let parser = GenericTokenParser::new("${", "}");
                let expanded = parser.parse(text, &mut |content| {
                    let e = expr::parse_expr(content.trim())?;
                    Ok(expr::eval_value(&e, ctx).to_sql_text())
                })?;
                ctx.append_sql(&expanded);
                Ok(true)
            }
            SqlNode::If { test, contents } => {
                if expr::eval_bool(test, ctx) {
                    contents.apply(ctx)?;
                    return Ok(true);
                }
                Ok(false)
            }
            SqlNode::Choose { whens, otherwise } => {
                for (test, contents) in whens {
                    if expr::eval_bool(test, ctx) {
                        contents.apply(ctx)?;
                        return Ok(true);
                    }
                }
                if let Some(node) = otherwise {
                    node.apply(ctx)?;
                    return Ok(true);
                }
                Ok(false)
            }
            SqlNode::Trim {
                prefix,
                suffix,
                prefix_overrides,
                suffix_overrides,
                contents,
            } => {
                let saved = ctx.begin_scope();
                let result = contents.apply(ctx);
                let body = ctx.end_scope(saved);
                let applied = result?;

                let trimmed = trim_body(&body, prefix_overrides, suffix_overrides);
                if !trimmed.is_empty() {
                    let mut out = String::new();
                    if let Some(p) = prefix {
                        out.push_str(p);
                        out.push(' ');
                    }
                    out.push_str(&trimmed);
                    if let Some(s) = suffix {
                        out.push(' ');
                        out.push_str(s);
                    }
                    ctx.append_sql(&out);
                }
                Ok(applied)
            }
            SqlNode::ForEach {
                collection,
                item,
                index,
                open,
                separator,
                close,
                contents,
            } => {
                let entries = expr::eval_iterable(collection, ctx)?;
                if entries.is_empty() {
                    return Ok(true);
                }

                let mut assembled = String::new();
                assembled.push_str(open);
                for (i, (key, element)) in entries.into_iter().enumerate() {
                    let unique = ctx.next_unique();
                    let item_alias = bind_iteration(ctx, item.as_deref(), element, unique);
                    let index_alias = bind_iteration(ctx, index.as_deref(), key, unique);

                    let saved = ctx.begin_scope();
                    let applied = contents.apply(ctx);
                    let mut fragment = ctx.end_scope(saved);
                    applied?;

                    if let (Some(name), Some(alias)) = (item.as_deref(), item_alias.as_deref()) {
                        fragment = itemize(&fragment, name, alias);
                    }
                    if let (Some(name), Some(alias)) = (index.as_deref(), index_alias.as_deref()) {
                        fragment = itemize(&fragment, name, alias);
                    }

                    if i > 0 {
                        assembled.push_str(separator);
                    }
                    assembled.push_str(&fragment);
                }
                assembled.push_str(close);
                ctx.append_sql(&assembled);

                if let Some(name) = item {
                    ctx.remove_binding(name);
                }
                if let Some(name) = index {
                    ctx.remove_binding(name);
                }
                Ok(true)
            }
            SqlNode::Bind { name, expression } => {
                let value = expr::eval_value(expression, ctx);
                ctx.bind(name.clone(), value);
                Ok(true)
            }
        }
    }
}

/// Binds a loop variable under both its declared name and its
/// iteration-unique alias, returning the alias.
fn bind_iteration(
    ctx: &mut DynamicContext<'_>,
    name: Option<&str>,
    value: Value,
    unique: usize,
) -> Option<String> {
    let name = name?;
    let alias = format!("{}{}_{}", ITEM_PREFIX, name, unique);
    ctx.bind(name, value.clone());
    ctx.bind(alias.clone(), value);
    Some(alias)
}

/// Rewrites `#{name...}` references in an applied fragment to the
/// iteration-unique alias so each element produces distinct bindings.
fn itemize(fragment: &str, from: &str, to: &str) -> String {
    let parser = GenericTokenParser::new("#{", "}");
    parser
        .parse(fragment, &mut |content| {
            let trimmed = content.trim();
            if let Some(rest) = trimmed.strip_prefix(from) {
                let at_boundary =
                    rest.is_empty() || rest.starts_with(['.', '[', ',', ':', ' ']);
                if at_boundary {
                    return Ok(format!("#{{{}{}}}", to, rest));
                }
            }
            Ok(format!("#{{{}}}", trimmed))
        })
        .unwrap_or_else(|_| fragment.to_string())
}

fn trim_body(body: &str, prefix_overrides: &[String], suffix_overrides: &[String]) -> String {
    let mut text = body.trim();

    let upper = text.to_ascii_uppercase();
    for over in prefix_overrides {
        if upper.starts_with(&over.to_ascii_uppercase()) {
            text = text[over.len()..].trim_start();
            break;
        }
    }

    let upper = text.to_ascii_uppercase();
    for over in suffix_overrides {
        if upper.ends_with(&over.to_ascii_uppercase()) {
            text = text[..text.len() - over.len()].trim_end();
            break;
        }
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::scripting::expr::parse_expr;
    use std::collections::HashMap;

    fn param(entries: &[(&str, Value)]) -> Value {
        let mut m = HashMap::new();
        for (k, v) in entries {
            m.insert(k.to_string(), v.clone());
        }
        Value::Map(m)
    }

    fn render(node: &SqlNode, parameter: &Value) -> String {
        let config = Configuration::new();
        let mut ctx = DynamicContext::new(&config, parameter);
        node.apply(&mut ctx).unwrap();
        ctx.sql()
    }

    #[test]
    fn test_where_strips_leading_and() {
        let node = SqlNode::Mixed(vec![
            SqlNode::StaticText("SELECT * FROM t".to_string()),
            SqlNode::where_node(SqlNode::Mixed(vec![SqlNode::If {
                test: parse_expr("name != null").unwrap(),
                contents: Box::new(SqlNode::StaticText("AND name=#{name}".to_string())),
            }])),
        ]);
        let p = param(&[("name", Value::Text("x".to_string()))]);
        assert_eq!(render(&node, &p), "SELECT * FROM t WHERE name=#{name}");

        let p = param(&[("name", Value::Null)]);
        assert_eq!(render(&node, &p), "SELECT * FROM t");
    }

    #[test]
    fn test_set_strips_trailing_comma() {
        let node = SqlNode::set_node(SqlNode::StaticText("name=#{name},".to_string()));
        let p = param(&[("name", Value::Text("x".to_string()))]);
        assert_eq!(render(&node, &p), "SET name=#{name}");
    }

    #[test]
    fn test_choose_first_match_wins() {
        let node = SqlNode::Choose {
            whens: vec![
                (
                    parse_expr("a != null").unwrap(),
                    SqlNode::StaticText("by_a".to_string()),
                ),
                (
                    parse_expr("b != null").unwrap(),
                    SqlNode::StaticText("by_b".to_string()),
                ),
            ],
            otherwise: Some(Box::new(SqlNode::StaticText("fallback".to_string()))),
        };
        assert_eq!(
            render(&node, &param(&[("a", Value::Long(1)), ("b", Value::Long(2))])),
            "by_a"
        );
        assert_eq!(render(&node, &param(&[("b", Value::Long(2))])), "by_b");
        assert_eq!(render(&node, &param(&[])), "fallback");
    }

    #[test]
    fn test_foreach_itemizes_bindings() {
        let node = SqlNode::ForEach {
            collection: parse_expr("ids").unwrap(),
            item: Some("i".to_string()),
            index: None,
            open: "(".to_string(),
            separator: ",".to_string(),
            close: ")".to_string(),
            contents: Box::new(SqlNode::StaticText("#{i}".to_string())),
        };
        let p = param(&[(
            "ids",
            Value::List(vec![Value::Long(1), Value::Long(2), Value::Long(3)]),
        )]);
        let config = Configuration::new();
        let mut ctx = DynamicContext::new(&config, &p);
        node.apply(&mut ctx).unwrap();
        assert_eq!(ctx.sql(), "(#{__frch_i_0},#{__frch_i_1},#{__frch_i_2})");

        let assembled = ctx.into_bindings_and_sql();
        assert_eq!(assembled.bindings.get("__frch_i_0"), Some(&Value::Long(1)));
        assert_eq!(assembled.bindings.get("__frch_i_2"), Some(&Value::Long(3)));
        // Loop variable is unbound on exit.
        assert!(!assembled.bindings.contains_key("i"));
    }

    #[test]
    fn test_nested_foreach_counters_do_not_collide() {
        let inner = SqlNode::ForEach {
            collection: parse_expr("row").unwrap(),
            item: Some("c".to_string()),
            index: None,
            open: "(".to_string(),
            separator: ",".to_string(),
            close: ")".to_string(),
            contents: Box::new(SqlNode::StaticText("#{c}".to_string())),
        };
        let outer = SqlNode::ForEach {
            collection: parse_expr("rows").unwrap(),
            item: Some("row".to_string()),
            index: None,
            open: String::new(),
            separator: ", ".to_string(),
            close: String::new(),
            contents: Box::new(inner),
        };
        let p = param(&[(
            "rows",
            Value::List(vec![
                Value::List(vec![Value::Long(1), Value::Long(2)]),
                Value::List(vec![Value::Long(3)]),
            ]),
        )]);
        let config = Configuration::new();
        let mut ctx = DynamicContext::new(&config, &p);
        outer.apply(&mut ctx).unwrap();
        let assembled = ctx.into_bindings_and_sql();
        let names: Vec<&str> = assembled
            .bindings
            .keys()
            .filter(|k| k.starts_with("__frch_c_"))
            .map(String::as_str)
            .collect();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_text_substitution() {
        let node = SqlNode::Text("ORDER BY ${orderBy}".to_string());
        let p = param(&[("orderBy", Value::Text("id DESC".to_string()))]);
        assert_eq!(render(&node, &p), "ORDER BY id DESC");
    }

    #[test]
    fn test_bind_introduces_binding() {
        let node = SqlNode::Mixed(vec![
            SqlNode::Bind {
                name: "pattern".to_string(),
                expression: parse_expr("'%x%'").unwrap(),
            },
            SqlNode::Text("LIKE '${pattern}'".to_string()),
        ]);
        assert_eq!(render(&node, &param(&[])), "LIKE '%x%'");
    }
}
