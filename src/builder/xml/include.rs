use crate::config::Configuration;
use crate::error::Error;
use crate::scripting::parser::{find_tag_end, parse_attributes};
use crate::scripting::tokens::resolve_placeholders;
use std::collections::HashMap;

const MAX_INCLUDE_DEPTH: usize = 32;

/// Splices `<include refid="..."/>` elements into statement text before
/// the script parser sees it.
///
/// The referenced `<sql>` fragment's text replaces the include element;
/// `${...}` placeholders in the refid, in local `<property>` values and in
/// the spliced fragment are substituted from the configuration variables
/// merged with the include's local properties (local wins). Fragments may
/// themselves contain includes, resolved against the fragment's own
/// namespace; a missing fragment is an incomplete element so the statement
/// can retry after later sources register.
pub fn resolve_includes(
    text: &str,
    configuration: &Configuration,
    namespace: &str,
    variables: &HashMap<String, String>,
) -> crate::Result<String> {
    resolve_with_depth(text, configuration, namespace, variables, 0)
}

fn resolve_with_depth(
    text: &str,
    configuration: &Configuration,
    namespace: &str,
    variables: &HashMap<String, String>,
    depth: usize,
) -> crate::Result<String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(Error::builder(format!(
            "includes nested deeper than {} in namespace '{}' (reference cycle?)",
            MAX_INCLUDE_DEPTH, namespace
        )));
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<include") {
        // Guard against names that merely start with "include".
        let boundary = rest[start + "<include".len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_whitespace() || c == '>' || c == '/');
        if !boundary {
            out.push_str(&rest[..start + "<include".len()]);
            rest = &rest[start + "<include".len()..];
            continue;
        }

        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = find_tag_end(after) else {
            out.push_str(after);
            rest = "";
            break;
        };

        let self_closing = after[..end].ends_with('/');
        let attr_text = after[1 + "include".len()..end].trim_end_matches('/');
        let attrs = parse_attributes(attr_text);

        let mut local_vars: HashMap<String, String> = HashMap::new();
        let consumed;
        if self_closing {
            consumed = end + 1;
        } else {
            let body_start = end + 1;
            let close = after[body_start..].find("</include>").ok_or_else(|| {
                Error::builder(format!("unclosed <include> in namespace '{}'", namespace))
            })?;
            let body = &after[body_start..body_start + close];
            collect_properties(body, variables, &mut local_vars);
            consumed = body_start + close + "</include>".len();
        }

        let refid_raw = attrs
            .get("refid")
            .ok_or_else(|| Error::builder("<include> requires a refid"))?;

        let mut merged = variables.clone();
        merged.extend(local_vars);

        let refid = resolve_placeholders(refid_raw, &merged);
        let qualified = if refid.contains('.') {
            refid
        } else {
            format!("{}.{}", namespace, refid)
        };
        let fragment = configuration.get_sql_fragment(&qualified).ok_or_else(|| {
            Error::incomplete(format!("sql fragment '{}' is not declared yet", qualified))
        })?;

        // Nested refs inside the fragment resolve against the fragment's
        // own namespace.
        let fragment_namespace = qualified.rsplit_once('.').map(|(ns, _)| ns).unwrap_or(namespace);
        let spliced = resolve_with_depth(
            &fragment.text,
            configuration,
            fragment_namespace,
            &merged,
            depth + 1,
        )?;
        out.push_str(&resolve_placeholders(&spliced, &merged));

        rest = &after[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

fn collect_properties(
    body: &str,
    variables: &HashMap<String, String>,
    local_vars: &mut HashMap<String, String>,
) {
    let mut rest = body;
    while let Some(start) = rest.find("<property") {
        let after = &rest[start..];
        let Some(end) = find_tag_end(after) else {
            break;
        };
        let attr_text = after[1 + "property".len()..end].trim_end_matches('/');
        let attrs = parse_attributes(attr_text);
        if let (Some(name), Some(value)) = (attrs.get("name"), attrs.get("value")) {
            local_vars.insert(name.clone(), resolve_placeholders(value, variables));
        }
        rest = &after[end + 1..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqlFragment;

    fn config_with_fragments(fragments: &[(&str, &str)]) -> Configuration {
        let mut config = Configuration::new();
        for (id, text) in fragments {
            config
                .add_sql_fragment(SqlFragment {
                    id: id.to_string(),
                    text: text.to_string(),
                })
                .unwrap();
        }
        config
    }

    #[test]
    fn test_simple_include() {
        let config = config_with_fragments(&[("ns.cols", "id, name")]);
        let out = resolve_includes(
            r#"SELECT <include refid="cols"/> FROM t"#,
            &config,
            "ns",
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(out, "SELECT id, name FROM t");
    }

    #[test]
    fn test_recursive_include_with_properties() {
        let config = config_with_fragments(&[
            ("ns.inner", "${prefix}_name"),
            ("ns.outer", r#"id, <include refid="inner"><property name="prefix" value="u"/></include>"#),
        ]);
        let out = resolve_includes(
            r#"SELECT <include refid="outer"/> FROM t"#,
            &config,
            "ns",
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(out, "SELECT id, u_name FROM t");
    }

    #[test]
    fn test_missing_fragment_is_incomplete() {
        let config = config_with_fragments(&[]);
        let err = resolve_includes(
            r#"<include refid="missing"/>"#,
            &config,
            "ns",
            &HashMap::new(),
        )
        .unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn test_cycle_detected() {
        let config = config_with_fragments(&[("ns.a", r#"<include refid="a"/>"#)]);
        let err = resolve_includes(
            r#"<include refid="a"/>"#,
            &config,
            "ns",
            &HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Builder(_)));
    }

    #[test]
    fn test_qualified_refid_crosses_namespaces() {
        let config = config_with_fragments(&[("other.cols", "x, y")]);
        let out = resolve_includes(
            r#"SELECT <include refid="other.cols"/>"#,
            &config,
            "ns",
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(out, "SELECT x, y");
    }
}
