use std::collections::HashMap;

/// Scans text for `open ... close` tokens and hands the inner expression to
/// a handler whose return value replaces the whole token.
///
/// A backslash escapes an opener (`\#{`, `\${`) and, inside a token, the
/// closer (`\}`); the backslash itself is consumed. An opener with no
/// closer is passed through as literal text.
pub struct GenericTokenParser<'a> {
    open: &'a str,
    close: &'a str,
}

impl<'a> GenericTokenParser<'a> {
    pub fn new(open: &'a str, close: &'a str) -> Self {
        Self { open, close }
    }

    pub fn parse(
        &self,
        text: &str,
        handler: &mut dyn FnMut(&str) -> crate::Result<String>,
    ) -> crate::Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(self.open) {
            if start > 0 && rest.as_bytes()[start - 1] == b'\\' {
                // Escaped opener: drop the backslash, keep the opener text.
                out.push_str(&rest[..start - 1]);
                out.push_str(self.open);
                rest = &rest[start + self.open.len()..];
                continue;
            }

            out.push_str(&rest[..start]);
            let after_open = &rest[start + self.open.len()..];

            match self.find_close(after_open) {
                None => {
                    // No closer: the opener is literal text.
                    out.push_str(self.open);
                    rest = after_open;
                }
                Some((expression, consumed)) => {
                    out.push_str(&handler(&expression)?);
                    rest = &after_open[consumed..];
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Returns the unescaped expression and the byte length consumed
    /// (including the closer).
    fn find_close(&self, text: &str) -> Option<(String, usize)> {
        let mut expression = String::new();
        let mut offset = 0;
        let mut rest = text;

        while let Some(end) = rest.find(self.close) {
            if end > 0 && rest.as_bytes()[end - 1] == b'\\' {
                expression.push_str(&rest[..end - 1]);
                expression.push_str(self.close);
                offset += end + self.close.len();
                rest = &rest[end + self.close.len()..];
                continue;
            }
            expression.push_str(&rest[..end]);
            return Some((expression, offset + end + self.close.len()));
        }
        None
    }
}

/// Substitutes `${name}` tokens from a variable scope, leaving unknown
/// names untouched so a later scope can still resolve them.
pub fn resolve_placeholders(text: &str, variables: &HashMap<String, String>) -> String {
    if !text.contains("${") {
        return text.to_string();
    }
    let parser = GenericTokenParser::new("${", "}");
    parser
        .parse(text, &mut |name| {
            Ok(match variables.get(name.trim()) {
                Some(value) => value.clone(),
                None => format!("${{{}}}", name),
            })
        })
        .unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(text: &str) -> String {
        let parser = GenericTokenParser::new("#{", "}");
        parser
            .parse(text, &mut |expr| Ok(format!("[{}]", expr)))
            .unwrap()
    }

    #[test]
    fn test_simple_token() {
        assert_eq!(echo("WHERE id = #{id}"), "WHERE id = [id]");
        assert_eq!(echo("#{a} and #{b}"), "[a] and [b]");
    }

    #[test]
    fn test_escaped_opener() {
        assert_eq!(echo(r"literal \#{id}"), "literal #{id}");
        assert_eq!(echo(r"\#{a} #{b}"), "#{a} [b]");
    }

    #[test]
    fn test_escaped_closer_inside_token() {
        assert_eq!(echo(r"#{a\}b}"), "[a}b]");
    }

    #[test]
    fn test_unclosed_opener_is_literal() {
        assert_eq!(echo("tail #{oops"), "tail #{oops");
    }

    #[test]
    fn test_property_resolution() {
        let mut vars = HashMap::new();
        vars.insert("table".to_string(), "users".to_string());
        assert_eq!(
            resolve_placeholders("SELECT * FROM ${table} WHERE ${x}", &vars),
            "SELECT * FROM users WHERE ${x}"
        );
    }
}
