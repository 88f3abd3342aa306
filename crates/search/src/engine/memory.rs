//! In-process search engine.
//!
//! Documents are kept per resource type and every request evaluates the
//! [`QueryExpr`] tree directly against the JSON. Analysis is approximated by
//! lowercasing and splitting on non-alphanumeric characters.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::{EngineHits, EngineRequest, SearchEngine, SourceFilter};
use crate::error::{EngineError, EngineResult};
use crate::path::{scalar_leaves, values_at_path};
use crate::query::{QueryExpr, RangeOp, is_numeric_literal};
use crate::types::{SCORE_FIELD, SortDirection, SortDirective};

const ENGINE_NAME: &str = "memory";

/// Search engine holding resources in memory.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    indices: RwLock<HashMap<String, Vec<Value>>>,
    known_fields: RwLock<HashMap<String, BTreeSet<String>>>,
    latency: Option<Duration>,
}

impl MemoryEngine {
    /// Creates an engine with no indices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every round trip by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Declares the element names searchable on `resource_type`.
    pub fn with_known_fields<I, S>(self, resource_type: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_fields.write().insert(
            resource_type.to_string(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Creates an empty index for `resource_type` if none exists.
    pub fn create_index(&self, resource_type: &str) {
        self.indices
            .write()
            .entry(resource_type.to_string())
            .or_default();
    }

    /// Stores a resource, replacing any resource with the same type and id.
    pub fn index(&self, resource: Value) -> EngineResult<()> {
        let (resource_type, id) = match (
            resource.get("resourceType").and_then(Value::as_str),
            resource.get("id").and_then(Value::as_str),
        ) {
            (Some(rt), Some(id)) => (rt.to_string(), id.to_string()),
            _ => {
                return Err(EngineError::internal(
                    ENGINE_NAME,
                    "resource must carry resourceType and id",
                ));
            }
        };

        let mut indices = self.indices.write();
        let documents = indices.entry(resource_type).or_default();
        match documents
            .iter_mut()
            .find(|doc| doc.get("id").and_then(Value::as_str) == Some(id.as_str()))
        {
            Some(existing) => *existing = resource,
            None => documents.push(resource),
        }
        Ok(())
    }

    /// Stores every resource in `resources`.
    pub fn index_all(&self, resources: impl IntoIterator<Item = Value>) -> EngineResult<()> {
        resources.into_iter().try_for_each(|r| self.index(r))
    }

    /// Number of resources stored for `resource_type`.
    pub fn len(&self, resource_type: &str) -> usize {
        self.indices
            .read()
            .get(resource_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// True when no resources are stored for `resource_type`.
    pub fn is_empty(&self, resource_type: &str) -> bool {
        self.len(resource_type) == 0
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn matching(&self, resource_type: &str, query: &QueryExpr) -> EngineResult<Vec<Value>> {
        let indices = self.indices.read();
        let documents = indices
            .get(resource_type)
            .ok_or_else(|| EngineError::IndexNotFound {
                resource_type: resource_type.to_string(),
            })?;
        Ok(documents
            .iter()
            .filter(|doc| evaluate(query, doc))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn search(&self, request: &EngineRequest) -> EngineResult<EngineHits> {
        self.simulate_latency().await;

        let mut matches = self.matching(&request.resource_type, &request.query)?;
        let total = matches.len() as u64;
        sort_documents(&mut matches, &request.sort);

        let documents = matches
            .into_iter()
            .skip(request.from as usize)
            .take(request.size as usize)
            .map(|doc| project(doc, &request.source))
            .collect();

        Ok(EngineHits { total, documents })
    }

    async fn count(&self, resource_type: &str, query: &QueryExpr) -> EngineResult<u64> {
        self.simulate_latency().await;
        Ok(self.matching(resource_type, query)?.len() as u64)
    }

    async fn known_fields(&self, resource_type: &str) -> EngineResult<Option<BTreeSet<String>>> {
        Ok(self.known_fields.read().get(resource_type).cloned())
    }
}

fn evaluate(query: &QueryExpr, doc: &Value) -> bool {
    match query {
        QueryExpr::MatchAll => true,
        QueryExpr::And(children) => children.iter().all(|c| evaluate(c, doc)),
        QueryExpr::Or(children) => children.iter().any(|c| evaluate(c, doc)),
        QueryExpr::Match { field, value } => leaves(doc, field)
            .iter()
            .any(|leaf| loosely_equal(leaf, value)),
        QueryExpr::Range { field, op, value } => leaves(doc, field)
            .iter()
            .any(|leaf| in_range(leaf, *op, value)),
        QueryExpr::Phrase { fields, text } => fields
            .iter()
            .any(|field| contains_phrase(&leaves(doc, field), text)),
        QueryExpr::Exact { field, value } => leaves(doc, field)
            .iter()
            .any(|leaf| leaf.as_str() == Some(value.as_str())),
        QueryExpr::Terms { field, values } => leaves(doc, field)
            .iter()
            .filter_map(|leaf| leaf.as_str())
            .any(|text| values.iter().any(|value| value == text)),
        QueryExpr::Wildcard { field, pattern } => {
            let Some(matcher) = glob_regex(pattern) else {
                return false;
            };
            leaves(doc, field)
                .iter()
                .any(|leaf| matcher.is_match(&leaf_text(leaf)))
        }
        QueryExpr::Negated { field, text } => !contains_phrase(&leaves(doc, field), text),
        QueryExpr::FullText { text } => {
            let wanted = tokenize(text);
            let present: BTreeSet<String> = scalar_leaves(doc)
                .iter()
                .flat_map(|leaf| tokenize(&leaf_text(leaf)))
                .collect();
            !wanted.is_empty() && wanted.iter().all(|t| present.contains(t))
        }
    }
}

fn leaves<'a>(doc: &'a Value, field: &str) -> Vec<&'a Value> {
    values_at_path(doc, field)
        .into_iter()
        .flat_map(scalar_leaves)
        .collect()
}

fn leaf_text(leaf: &Value) -> String {
    match leaf {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(leaves: &[&Value], text: &str) -> bool {
    let phrase = tokenize(text);
    if phrase.is_empty() {
        return false;
    }
    leaves.iter().any(|leaf| {
        let tokens = tokenize(&leaf_text(leaf));
        tokens.windows(phrase.len()).any(|w| w == phrase.as_slice())
    })
}

fn loosely_equal(leaf: &Value, value: &str) -> bool {
    let text = leaf_text(leaf);
    if is_numeric_literal(value) {
        if let (Ok(a), Ok(b)) = (text.parse::<f64>(), value.parse::<f64>()) {
            return a == b;
        }
    }
    text.eq_ignore_ascii_case(value) || (looks_like_date(value) && text.starts_with(value))
}

// a partial date matches every instant within it
fn looks_like_date(value: &str) -> bool {
    value.len() >= 4 && value.bytes().take(4).all(|b| b.is_ascii_digit())
}

fn compare_text(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn in_range(leaf: &Value, op: RangeOp, bound: &str) -> bool {
    let ordering = compare_text(&leaf_text(leaf), bound);
    match op {
        RangeOp::Gt => ordering == Ordering::Greater,
        RangeOp::Lt => ordering == Ordering::Less,
        RangeOp::Gte => ordering != Ordering::Less,
        RangeOp::Lte => ordering != Ordering::Greater,
    }
}

fn glob_regex(pattern: &str) -> Option<regex::Regex> {
    let mut source = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    source.push_str(&regex::escape(&next.to_string()));
                }
            }
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .ok()
}

fn sort_documents(documents: &mut [Value], sort: &[SortDirective]) {
    let keys: Vec<&SortDirective> = sort.iter().filter(|s| s.field != SCORE_FIELD).collect();
    if keys.is_empty() {
        return;
    }
    documents.sort_by(|a, b| {
        for directive in &keys {
            let left = leaves(a, &directive.field).first().map(|v| leaf_text(v));
            let right = leaves(b, &directive.field).first().map(|v| leaf_text(v));
            let ordering = match (left, right) {
                (Some(l), Some(r)) => {
                    let o = compare_text(&l, &r);
                    match directive.direction {
                        SortDirection::Ascending => o,
                        SortDirection::Descending => o.reverse(),
                    }
                }
                // missing values sort last either way
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn project(doc: Value, source: &SourceFilter) -> Value {
    let mut obj = match doc {
        Value::Object(obj) => obj,
        other => return other,
    };

    if let Some(includes) = &source.includes {
        let roots: BTreeSet<&str> = includes
            .iter()
            .filter_map(|path| path.split('.').next())
            .collect();
        obj = obj
            .into_iter()
            .filter(|(key, _)| roots.contains(key.as_str()))
            .collect::<Map<String, Value>>();
    }

    for excluded in &source.excludes {
        obj.remove(excluded);
    }

    Value::Object(obj)
}
