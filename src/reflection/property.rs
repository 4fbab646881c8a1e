/// One segment of a dotted property path.
///
/// `orders[0].item` tokenizes as `{name: "orders", index: Some("0")}` then
/// `{name: "item", index: None}`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropToken<'a> {
    pub name: &'a str,
    pub index: Option<&'a str>,
}

impl<'a> PropToken<'a> {
    fn parse(segment: &'a str) -> Self {
        if let Some(open) = segment.find('[') {
            let name = &segment[..open];
            let rest = &segment[open + 1..];
            let index = rest.strip_suffix(']').unwrap_or(rest);
            PropToken {
                name,
                index: Some(index),
            }
        } else {
            PropToken {
                name: segment,
                index: None,
            }
        }
    }
}

/// Lazy tokenizer over dotted property paths with optional `[index]`
/// segments.
pub struct PropertyTokenizer<'a> {
    rest: Option<&'a str>,
}

impl<'a> PropertyTokenizer<'a> {
    pub fn new(path: &'a str) -> Self {
        Self { rest: Some(path) }
    }

    pub fn has_next(&self) -> bool {
        self.rest.is_some()
    }
}

impl<'a> Iterator for PropertyTokenizer<'a> {
    type Item = PropToken<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        match rest.split_once('.') {
            Some((head, tail)) => {
                self.rest = Some(tail);
                Some(PropToken::parse(head))
            }
            None => {
                self.rest = None;
                Some(PropToken::parse(rest))
            }
        }
    }
}
