//! Raw, multi-valued query parameters.

use serde_json::Value;

use crate::error::{ParseError, ParseResult};

/// Ordered multimap of raw `(name, value)` pairs as received on the wire.
///
/// Repeated names are kept as separate pairs; the parser gives them AND
/// semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a parameter set from `(name, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parses a URL query string (with or without the leading `?`).
    pub fn from_query_string(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            pairs: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    /// Builds a parameter set from a JSON object whose values are strings,
    /// numbers, booleans or arrays of those.
    pub fn from_json(payload: &Value) -> ParseResult<Self> {
        let object = payload.as_object().ok_or(ParseError::NotAMapping)?;
        let mut params = Self::new();
        for (name, value) in object {
            match value {
                Value::Array(items) => {
                    for item in items {
                        params.push(name.clone(), scalar_to_string(item)?);
                    }
                }
                other => params.push(name.clone(), scalar_to_string(other)?),
            }
        }
        Ok(params)
    }

    /// Appends one pair.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Builder-style [`QueryParams::push`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Iterates the pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if `name` occurs at least once.
    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == name)
    }

    /// Returns the number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn scalar_to_string(value: &Value) -> ParseResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ParseError::NotAMapping),
    }
}
