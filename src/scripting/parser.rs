use crate::error::Error;
use crate::scripting::expr::{self, Expr};
use crate::scripting::node::SqlNode;
use std::collections::HashMap;

/// Represents a stack frame during script parsing to handle nested tags.
///
/// When a start tag (like `<if>`) is encountered, a new frame is pushed so
/// the parser keeps the tag's attributes until its close tag arrives.
enum TagFrame {
    If {
        test: Expr,
    },
    When {
        test: Expr,
    },
    Otherwise,
    Choose {
        whens: Vec<(Expr, SqlNode)>,
        otherwise: Option<SqlNode>,
    },
    Trim {
        prefix: Option<String>,
        suffix: Option<String>,
        prefix_overrides: Vec<String>,
        suffix_overrides: Vec<String>,
    },
    Where,
    Set,
    Foreach {
        collection: Expr,
        item: Option<String>,
        index: Option<String>,
        open: String,
        separator: String,
        close: String,
    },
}

/// Accumulates either raw text (merged as it arrives) or finished nodes.
enum Piece {
    Raw(String),
    Node(SqlNode),
}

/// Hand-written scanner for statement bodies. Recognizes the dynamic tags
/// (`<if>`, `<choose>/<when>/<otherwise>`, `<trim>`, `<where>`, `<set>`,
/// `<foreach>`, `<bind>`) plus CDATA sections; `#{...}` placeholders stay in
/// the text for the placeholder pass, `${...}` marks the script dynamic.
///
/// Unknown tags fall through as plain text and unclosed tags are
/// auto-closed at end of input.
pub struct ScriptParser<'a> {
    template: &'a str,
    pos: usize,
    piece_stack: Vec<Vec<Piece>>,
    tag_stack: Vec<TagFrame>,
    dynamic: bool,
}

impl<'a> ScriptParser<'a> {
    pub fn new(template: &'a str) -> Self {
        Self {
            template,
            pos: 0,
            piece_stack: vec![Vec::new()],
            tag_stack: Vec::new(),
            dynamic: false,
        }
    }

    /// Parses the whole script, returning the root node and whether the
    /// script needs per-call assembly.
    pub fn parse(mut self) -> crate::Result<(SqlNode, bool)> {
        while self.pos < self.template.len() {
            if self.try_parse_cdata() {
                continue;
            }
            if self.try_parse_tag()? {
                self.dynamic = true;
                continue;
            }
            self.parse_text();
        }

        self.close_remaining_tags()?;

        let pieces = self.piece_stack.pop().unwrap_or_default();
        let dynamic = self.dynamic;
        Ok((SqlNode::Mixed(close_scope(pieces)), dynamic))
    }

    fn try_parse_cdata(&mut self) -> bool {
        let remaining = &self.template[self.pos..];
        if let Some(inner) = remaining.strip_prefix("<![CDATA[")
            && let Some(end) = inner.find("]]>")
        {
            let text = inner[..end].to_string();
            self.append_text(&text);
            self.pos += "<![CDATA[".len() + end + "]]>".len();
            return true;
        }
        false
    }

    fn try_parse_tag(&mut self) -> crate::Result<bool> {
        let remaining = &self.template[self.pos..];

        if remaining.starts_with("</") {
            return self.handle_close_tag();
        }

        for name in [
            "if",
            "when",
            "otherwise",
            "choose",
            "trim",
            "where",
            "set",
            "foreach",
            "bind",
        ] {
            if starts_tag(remaining, name) {
                return self.handle_open_tag(name);
            }
        }

        Ok(false)
    }

    fn handle_open_tag(&mut self, name: &str) -> crate::Result<bool> {
        let remaining = &self.template[self.pos..];
        let Some(end_idx) = find_tag_end(remaining) else {
            return Ok(false);
        };
        let self_closing = remaining[..end_idx].ends_with('/');
        let attr_text = remaining[1 + name.len()..end_idx].trim_end_matches('/');
        let attrs = parse_attributes(attr_text);

        if name == "bind" {
            if !self_closing {
                return Err(Error::builder("<bind> must be self-closing"));
            }
            let bind_name = required(&attrs, "name", "bind")?;
            let value = required(&attrs, "value", "bind")?;
            self.append_node(SqlNode::Bind {
                name: bind_name,
                expression: expr::parse_expr(&value)?,
            });
            self.pos += end_idx + 1;
            return Ok(true);
        }

        let frame = match name {
            "if" => TagFrame::If {
                test: expr::parse_expr(&required(&attrs, "test", "if")?)?,
            },
            "when" => TagFrame::When {
                test: expr::parse_expr(&required(&attrs, "test", "when")?)?,
            },
            "otherwise" => TagFrame::Otherwise,
            "choose" => TagFrame::Choose {
                whens: Vec::new(),
                otherwise: None,
            },
            "trim" => TagFrame::Trim {
                prefix: attrs.get("prefix").cloned(),
                suffix: attrs.get("suffix").cloned(),
                prefix_overrides: split_overrides(attrs.get("prefixOverrides")),
                suffix_overrides: split_overrides(attrs.get("suffixOverrides")),
            },
            "where" => TagFrame::Where,
            "set" => TagFrame::Set,
            "foreach" => TagFrame::Foreach {
                collection: expr::parse_expr(&required(&attrs, "collection", "foreach")?)?,
                item: attrs.get("item").cloned(),
                index: attrs.get("index").cloned(),
                open: attrs.get("open").cloned().unwrap_or_default(),
                separator: attrs.get("separator").cloned().unwrap_or_default(),
                close: attrs.get("close").cloned().unwrap_or_default(),
            },
            _ => unreachable!(),
        };

        if self_closing {
            // An empty element contributes an empty body.
            self.piece_stack.push(Vec::new());
            self.tag_stack.push(frame);
            self.pos += end_idx + 1;
            self.finish_frame()?;
        } else {
            self.piece_stack.push(Vec::new());
            self.tag_stack.push(frame);
            self.pos += end_idx + 1;
        }
        Ok(true)
    }

    fn handle_close_tag(&mut self) -> crate::Result<bool> {
        let remaining = &self.template[self.pos..];
        for name in [
            "if", "when", "otherwise", "choose", "trim", "where", "set", "foreach",
        ] {
            let close = format!("</{}>", name);
            if remaining.starts_with(&close) {
                if !self.current_frame_is(name) {
                    return Err(Error::builder(format!(
                        "mismatched {} near '{}'",
                        close,
                        &remaining[..close.len()]
                    )));
                }
                self.pos += close.len();
                self.finish_frame()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current_frame_is(&self, name: &str) -> bool {
        match (self.tag_stack.last(), name) {
            (Some(TagFrame::If { .. }), "if")
            | (Some(TagFrame::When { .. }), "when")
            | (Some(TagFrame::Otherwise), "otherwise")
            | (Some(TagFrame::Choose { .. }), "choose")
            | (Some(TagFrame::Trim { .. }), "trim")
            | (Some(TagFrame::Where), "where")
            | (Some(TagFrame::Set), "set")
            | (Some(TagFrame::Foreach { .. }), "foreach") => true,
            _ => false,
        }
    }

    /// Pops the top frame and its body scope, builds the node, and attaches
    /// it to the enclosing scope (or, for when/otherwise, to the enclosing
    /// choose frame).
    fn finish_frame(&mut self) -> crate::Result<()> {
        let frame = self
            .tag_stack
            .pop()
            .ok_or_else(|| Error::builder("close tag without open tag"))?;
        let pieces = self.piece_stack.pop().unwrap_or_default();
        let body = SqlNode::Mixed(close_scope(pieces));

        match frame {
            TagFrame::If { test } => {
                self.append_node(SqlNode::If {
                    test,
                    contents: Box::new(body),
                });
            }
            TagFrame::When { test } => match self.tag_stack.last_mut() {
                Some(TagFrame::Choose { whens, .. }) => whens.push((test, body)),
                _ => return Err(Error::builder("<when> outside <choose>")),
            },
            TagFrame::Otherwise => match self.tag_stack.last_mut() {
                Some(TagFrame::Choose { otherwise, .. }) => {
                    if otherwise.is_some() {
                        return Err(Error::builder("multiple <otherwise> in <choose>"));
                    }
                    *otherwise = Some(body);
                }
                _ => return Err(Error::builder("<otherwise> outside <choose>")),
            },
            TagFrame::Choose { whens, otherwise } => {
                self.append_node(SqlNode::Choose {
                    whens,
                    otherwise: otherwise.map(Box::new),
                });
            }
            TagFrame::Trim {
                prefix,
                suffix,
                prefix_overrides,
                suffix_overrides,
            } => {
                self.append_node(SqlNode::Trim {
                    prefix,
                    suffix,
                    prefix_overrides,
                    suffix_overrides,
                    contents: Box::new(body),
                });
            }
            TagFrame::Where => self.append_node(SqlNode::where_node(body)),
            TagFrame::Set => self.append_node(SqlNode::set_node(body)),
            TagFrame::Foreach {
                collection,
                item,
                index,
                open,
                separator,
                close,
            } => {
                self.append_node(SqlNode::ForEach {
                    collection,
                    item,
                    index,
                    open,
                    separator,
                    close,
                    contents: Box::new(body),
                });
            }
        }
        Ok(())
    }

    /// Consume text until the next special sequence.
    fn parse_text(&mut self) {
        let remaining = &self.template[self.pos..];
        let next_stop = remaining.find('<').unwrap_or(remaining.len());

        if next_stop > 0 {
            let text = remaining[..next_stop].to_string();
            self.append_text(&text);
            self.pos += next_stop;
        } else {
            // A '<' that opened no known tag: consume it as literal text to
            // keep making progress.
            self.append_text("<");
            self.pos += 1;
        }
    }

    fn append_node(&mut self, node: SqlNode) {
        if let Some(pieces) = self.piece_stack.last_mut() {
            pieces.push(Piece::Node(node));
        }
    }

    /// Append text, merging with the previous raw chunk when possible.
    fn append_text(&mut self, text: &str) {
        if let Some(pieces) = self.piece_stack.last_mut() {
            if let Some(Piece::Raw(last)) = pieces.last_mut() {
                last.push_str(text);
            } else {
                pieces.push(Piece::Raw(text.to_string()));
            }
        }
    }

    /// Auto-close any tags left open at the end of the script.
    fn close_remaining_tags(&mut self) -> crate::Result<()> {
        while !self.tag_stack.is_empty() {
            self.finish_frame()?;
        }
        Ok(())
    }
}

/// Converts accumulated pieces into nodes, classifying each text chunk as
/// static or `${...}`-bearing and dropping whitespace-only chunks.
fn close_scope(pieces: Vec<Piece>) -> Vec<SqlNode> {
    let mut nodes = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match piece {
            Piece::Node(node) => nodes.push(node),
            Piece::Raw(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                let text = unescape_entities(&text);
                if text.contains("${") {
                    nodes.push(SqlNode::Text(text));
                } else {
                    nodes.push(SqlNode::StaticText(text));
                }
            }
        }
    }
    nodes
}

fn starts_tag(remaining: &str, name: &str) -> bool {
    let Some(rest) = remaining.strip_prefix('<') else {
        return false;
    };
    let Some(after) = rest.strip_prefix(name) else {
        return false;
    };
    matches!(
        after.as_bytes().first(),
        Some(b'>') | Some(b'/') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')
    )
}

/// Find the index of the closing `>` for a tag, ignoring quoted content.
pub(crate) fn find_tag_end(s: &str) -> Option<usize> {
    let mut in_quote = false;
    for (i, c) in s.char_indices() {
        if c == '"' {
            in_quote = !in_quote;
        } else if c == '>' && !in_quote {
            return Some(i);
        }
    }
    None
}

/// Parse attributes from tag content into a map; values are
/// entity-unescaped.
pub(crate) fn parse_attributes(content: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();

    let mut rest = content;
    while !rest.is_empty() {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let key_end = rest
            .find(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
            .unwrap_or(rest.len());
        if key_end == 0 {
            rest = &rest[1..];
            continue;
        }
        let key = &rest[..key_end];
        rest = rest[key_end..].trim_start();

        if !rest.starts_with('=') {
            continue;
        }
        rest = rest[1..].trim_start();

        if rest.is_empty() {
            break;
        }
        let quote = rest.chars().next().unwrap();
        if quote != '"' && quote != '\'' {
            continue;
        }
        rest = &rest[1..];

        if let Some(val_end) = rest.find(quote) {
            let val = &rest[..val_end];
            attrs.insert(key.to_string(), unescape_entities(val));
            rest = &rest[val_end + 1..];
        } else {
            break;
        }
    }
    attrs
}

fn required(attrs: &HashMap<String, String>, key: &str, tag: &str) -> crate::Result<String> {
    attrs
        .get(key)
        .cloned()
        .ok_or_else(|| Error::builder(format!("<{}> requires a '{}' attribute", tag, key)))
}

fn split_overrides(spec: Option<&String>) -> Vec<String> {
    spec.map(|s| s.split('|').map(str::to_string).collect())
        .unwrap_or_default()
}

/// The statement body arrives re-serialized from the XML reader, so the
/// five predefined entities must be folded back into characters.
fn unescape_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::expr::Expr;

    fn parse(tpl: &str) -> (SqlNode, bool) {
        ScriptParser::new(tpl).parse().unwrap()
    }

    fn children(node: &SqlNode) -> &[SqlNode] {
        match node {
            SqlNode::Mixed(nodes) => nodes,
            _ => panic!("expected Mixed, got {:?}", node),
        }
    }

    #[test]
    fn test_plain_text_is_static() {
        let (root, dynamic) = parse("SELECT * FROM t WHERE id = #{id}");
        assert!(!dynamic);
        let nodes = children(&root);
        assert_eq!(nodes.len(), 1);
        assert!(matches!(&nodes[0], SqlNode::StaticText(t) if t.contains("#{id}")));
    }

    #[test]
    fn test_dollar_text_is_dynamic() {
        let (root, dynamic) = parse("SELECT * FROM ${table}");
        assert!(dynamic);
        assert!(matches!(&children(&root)[0], SqlNode::Text(_)));
    }

    #[test]
    fn test_if_tag() {
        let (root, dynamic) = parse(r#"a <if test="x != null">AND x=#{x}</if>"#);
        assert!(dynamic);
        let nodes = children(&root);
        assert_eq!(nodes.len(), 2);
        match &nodes[1] {
            SqlNode::If { contents, .. } => {
                assert!(matches!(&children(contents)[0], SqlNode::StaticText(_)));
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_choose_when_otherwise() {
        let (root, _) = parse(
            r#"<choose><when test="a != null">A</when><when test="b != null">B</when><otherwise>C</otherwise></choose>"#,
        );
        match &children(&root)[0] {
            SqlNode::Choose { whens, otherwise } => {
                assert_eq!(whens.len(), 2);
                assert!(otherwise.is_some());
            }
            other => panic!("expected Choose, got {:?}", other),
        }
    }

    #[test]
    fn test_when_outside_choose_rejected() {
        let err = ScriptParser::new(r#"<when test="a">x</when>"#)
            .parse()
            .unwrap_err();
        assert!(matches!(err, Error::Builder(_)));
    }

    #[test]
    fn test_nested_foreach_in_if() {
        let (root, _) = parse(
            r#"<if test="ids != null"><foreach collection="ids" item="i" open="(" separator="," close=")">#{i}</foreach></if>"#,
        );
        match &children(&root)[0] {
            SqlNode::If { contents, .. } => match &children(contents)[0] {
                SqlNode::ForEach { item, open, .. } => {
                    assert_eq!(item.as_deref(), Some("i"));
                    assert_eq!(open, "(");
                }
                other => panic!("expected ForEach, got {:?}", other),
            },
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_trim_overrides_split() {
        let (root, _) = parse(
            r#"<trim prefix="(" suffix=")" suffixOverrides=",|;">#{a},</trim>"#,
        );
        match &children(&root)[0] {
            SqlNode::Trim {
                prefix,
                suffix,
                suffix_overrides,
                ..
            } => {
                assert_eq!(prefix.as_deref(), Some("("));
                assert_eq!(suffix.as_deref(), Some(")"));
                assert_eq!(suffix_overrides, &vec![",".to_string(), ";".to_string()]);
            }
            other => panic!("expected Trim, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_self_closing() {
        let (root, _) = parse(r#"<bind name="p" value="'%a%'"/>x"#);
        let nodes = children(&root);
        match &nodes[0] {
            SqlNode::Bind { name, expression } => {
                assert_eq!(name, "p");
                assert!(matches!(expression, Expr::Literal(_)));
            }
            other => panic!("expected Bind, got {:?}", other),
        }
    }

    #[test]
    fn test_cdata_passes_through() {
        let (root, dynamic) = parse("a <![CDATA[x < 3 AND]]> b");
        assert!(!dynamic);
        match &children(&root)[0] {
            SqlNode::StaticText(t) => assert!(t.contains("x < 3")),
            other => panic!("expected StaticText, got {:?}", other),
        }
    }

    #[test]
    fn test_entities_unescaped() {
        let (root, _) = parse("WHERE a &lt; #{max}");
        match &children(&root)[0] {
            SqlNode::StaticText(t) => assert_eq!(t, "WHERE a < #{max}"),
            other => panic!("expected StaticText, got {:?}", other),
        }
    }

    #[test]
    fn test_auto_close_at_eof() {
        let (root, _) = parse(r#"<if test="x">content"#);
        match &children(&root)[0] {
            SqlNode::If { .. } => {}
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_text() {
        let (root, _) = parse("a <unknown> b");
        let nodes = children(&root);
        assert_eq!(nodes.len(), 1);
        assert!(matches!(&nodes[0], SqlNode::StaticText(t) if t.contains("<unknown>")));
    }
}
