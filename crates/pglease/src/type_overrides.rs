//! Type-override cache.
//!
//! Type parsers are declared by backend type name. The first unit of work on
//! a pool resolves those names to OIDs on its freshly acquired connection;
//! the resulting [`TypeOverrides`] is memoized on the [`Pool`](crate::Pool)
//! and attached to every connection drawn from it afterwards.

use std::collections::HashMap;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

use crate::driver::NativeConnection;
use crate::error::{Error, Result};

/// Query used to resolve type names to element and array OIDs.
pub const TYPE_LOOKUP_QUERY: &str =
    "SELECT oid, typarray, typname FROM pg_type WHERE typname = ANY($1::text[])";

type ParseFn = dyn Fn(&str) -> serde_json::Value + Send + Sync;

/// A value parser for one backend type.
#[derive(Clone)]
pub struct TypeParser {
    name: Arc<str>,
    parse: Arc<ParseFn>,
}

impl TypeParser {
    /// Create a parser for the backend type called `name`.
    pub fn new<F>(name: impl Into<Arc<str>>, parse: F) -> Self
    where
        F: Fn(&str) -> serde_json::Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parse: Arc::new(parse),
        }
    }

    /// Backend type name this parser applies to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse one text value.
    #[must_use]
    pub fn parse(&self, text: &str) -> serde_json::Value {
        (self.parse)(text)
    }
}

impl fmt::Debug for TypeParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeParser")
            .field("name", &self.name)
            .field("parse", &"<fn>")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Override {
    parser: TypeParser,
    array: bool,
}

/// Decoding rules keyed by backend type OID.
#[derive(Debug, Clone, Default)]
pub struct TypeOverrides {
    by_oid: HashMap<u32, Override>,
}

impl TypeOverrides {
    /// Resolve `parsers` against the backend reachable through `native`.
    ///
    /// Returns an empty set without touching the backend when no parsers
    /// are configured.
    pub async fn resolve(native: &dyn NativeConnection, parsers: &[TypeParser]) -> Result<Self> {
        if parsers.is_empty() {
            return Ok(Self::default());
        }

        let names: Vec<&str> = parsers.iter().map(TypeParser::name).collect();
        let result = native
            .query(TYPE_LOOKUP_QUERY, &[serde_json::json!(names)])
            .await?;

        let mut overrides = Self::default();
        for row in &result.rows {
            let (oid, array_oid, name) = parse_type_row(row)?;
            let Some(parser) = parsers.iter().find(|p| p.name() == name) else {
                continue;
            };
            overrides.insert(oid, parser.clone(), false);
            if array_oid != 0 {
                overrides.insert(array_oid, parser.clone(), true);
            }
        }

        for parser in parsers {
            if !overrides.by_oid.values().any(|o| o.parser.name() == parser.name()) {
                tracing::warn!(type_name = parser.name(), "type parser references unknown type");
            }
        }

        tracing::debug!(types = overrides.by_oid.len(), "resolved type overrides");

        Ok(overrides)
    }

    /// Register a parser for an OID directly.
    pub fn insert(&mut self, oid: u32, parser: TypeParser, array: bool) {
        self.by_oid.insert(oid, Override { parser, array });
    }

    /// Get the parser registered for `oid`.
    #[must_use]
    pub fn parser_for(&self, oid: u32) -> Option<&TypeParser> {
        self.by_oid.get(&oid).map(|o| &o.parser)
    }

    /// Number of OIDs with a registered parser.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    /// Check if no overrides are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }

    /// Decode one text value of type `oid`.
    ///
    /// Values without a registered parser decode as JSON strings.
    #[must_use]
    pub fn decode(&self, oid: u32, text: Option<&str>) -> serde_json::Value {
        let Some(text) = text else {
            return serde_json::Value::Null;
        };

        match self.by_oid.get(&oid) {
            Some(o) if o.array => match parse_array_literal(text) {
                Some(items) => array_value(items, &o.parser),
                None => serde_json::Value::String(text.to_owned()),
            },
            Some(o) => o.parser.parse(text),
            None => serde_json::Value::String(text.to_owned()),
        }
    }
}

fn parse_type_row(row: &[Option<String>]) -> Result<(u32, u32, &str)> {
    let column = move |i: usize| row.get(i).and_then(Option::as_deref);
    let oid = column(0).and_then(|v| v.parse().ok());
    let array_oid = column(1).and_then(|v| v.parse().ok());
    match (oid, array_oid, column(2)) {
        (Some(oid), Some(array_oid), Some(name)) => Ok((oid, array_oid, name)),
        _ => Err(Error::UnexpectedState(format!("malformed pg_type row: {row:?}"))),
    }
}

/// One element of an array literal.
#[derive(Debug, PartialEq)]
enum ArrayElement {
    Value(Option<String>),
    Nested(Vec<ArrayElement>),
}

fn array_value(items: Vec<ArrayElement>, parser: &TypeParser) -> serde_json::Value {
    serde_json::Value::Array(
        items
            .into_iter()
            .map(|item| match item {
                ArrayElement::Value(Some(text)) => parser.parse(&text),
                ArrayElement::Value(None) => serde_json::Value::Null,
                ArrayElement::Nested(inner) => array_value(inner, parser),
            })
            .collect(),
    )
}

/// Parse an array literal (`{a,"b c",NULL}`, `{{1,2},{3,4}}`) into elements.
///
/// Returns `None` for anything that is not a well-formed literal, including
/// literals with explicit bounds (`[0:1]={a,b}`).
fn parse_array_literal(text: &str) -> Option<Vec<ArrayElement>> {
    let mut chars = text.chars().peekable();
    let items = parse_array_body(&mut chars)?;
    chars.next().is_none().then_some(items)
}

fn parse_array_body(chars: &mut Peekable<Chars<'_>>) -> Option<Vec<ArrayElement>> {
    if chars.next()? != '{' {
        return None;
    }

    let mut items = Vec::new();
    if chars.next_if_eq(&'}').is_some() {
        return Some(items);
    }

    loop {
        if chars.peek() == Some(&'{') {
            items.push(ArrayElement::Nested(parse_array_body(chars)?));
        } else {
            items.push(ArrayElement::Value(parse_array_scalar(chars)?));
        }

        match chars.next()? {
            ',' => {}
            '}' => return Some(items),
            _ => return None,
        }
    }
}

fn parse_array_scalar(chars: &mut Peekable<Chars<'_>>) -> Option<Option<String>> {
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;

    while let Some(&c) = chars.peek() {
        if !quoted && (c == ',' || c == '}') {
            break;
        }
        chars.next();
        match c {
            '\\' if quoted => current.push(chars.next()?),
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            '{' if !quoted => return None,
            _ => current.push(c),
        }
    }

    if quoted {
        return None;
    }
    Some(finish_element(&mut current, was_quoted))
}

fn finish_element(current: &mut String, was_quoted: bool) -> Option<String> {
    let item = std::mem::take(current);
    if !was_quoted && item.eq_ignore_ascii_case("NULL") {
        None
    } else {
        Some(item)
    }
}
