//! Search engine abstraction.
//!
//! The orchestrator talks to a document search engine through the
//! [`SearchEngine`] trait. Two implementations are provided:
//!
//! - [`ElasticsearchEngine`] (feature `elasticsearch`) - one index per
//!   resource type, `_source` holding the raw FHIR resource
//! - [`MemoryEngine`] - evaluates [`QueryExpr`] trees over in-process JSON
//!   documents; used by tests and embedded deployments

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
mod memory;

#[cfg(feature = "elasticsearch")]
pub use elasticsearch::{ElasticsearchAuth, ElasticsearchConfig, ElasticsearchEngine};
pub use memory::MemoryEngine;

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::{EngineError, EngineResult};
use crate::query::QueryExpr;
use crate::types::{DEFAULT_COUNT, SortDirective};

/// `_source` projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilter {
    /// Paths to keep; `None` keeps everything.
    pub includes: Option<Vec<String>>,
    /// Top-level elements to drop.
    pub excludes: Vec<String>,
}

impl SourceFilter {
    fn is_unfiltered(&self) -> bool {
        self.includes.is_none() && self.excludes.is_empty()
    }
}

/// One paginated query against one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    /// The resource type (and therefore index) searched.
    pub resource_type: String,
    /// The compiled predicate.
    pub query: QueryExpr,
    /// Sort order; empty means relevance.
    pub sort: Vec<SortDirective>,
    /// `_source` projection.
    pub source: SourceFilter,
    /// Offset of the first hit.
    pub from: u32,
    /// Maximum number of hits.
    pub size: u32,
}

impl EngineRequest {
    /// Creates a request for the first page of `query`.
    pub fn new(resource_type: impl Into<String>, query: QueryExpr) -> Self {
        Self {
            resource_type: resource_type.into(),
            query,
            sort: Vec::new(),
            source: SourceFilter::default(),
            from: 0,
            size: DEFAULT_COUNT,
        }
    }

    /// Sets the sort order.
    pub fn with_sort(mut self, sort: Vec<SortDirective>) -> Self {
        self.sort = sort;
        self
    }

    /// Restricts `_source` to `includes`.
    pub fn with_includes(mut self, includes: Vec<String>) -> Self {
        self.source.includes = Some(includes);
        self
    }

    /// Drops the `excludes` elements from `_source`.
    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.source.excludes = excludes;
        self
    }

    /// Sets the pagination window.
    pub fn with_window(mut self, from: u32, size: u32) -> Self {
        self.from = from;
        self.size = size;
        self
    }

    /// Builds the Elasticsearch `_search` body.
    pub fn to_search_body(&self) -> Value {
        let mut body = json!({
            "query": self.query.to_query_dsl(),
            "from": self.from,
            "size": self.size,
            "track_total_hits": true
        });

        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|s| json!({ s.field.as_str(): { "order": s.direction.as_str() } }))
                .collect();
            body["sort"] = Value::Array(sort);
        }

        if !self.source.is_unfiltered() {
            let mut source = Map::new();
            if let Some(includes) = &self.source.includes {
                source.insert("includes".to_string(), json!(includes));
            }
            if !self.source.excludes.is_empty() {
                source.insert("excludes".to_string(), json!(self.source.excludes));
            }
            body["_source"] = Value::Object(source);
        }

        body
    }
}

/// Builds the Elasticsearch `_count` body.
pub fn count_body(query: &QueryExpr) -> Value {
    json!({ "query": query.to_query_dsl() })
}

/// One page of hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineHits {
    /// Number of documents matching the query, ignoring pagination.
    pub total: u64,
    /// The `_source` of each hit, in engine order.
    pub documents: Vec<Value>,
}

/// What a primary query produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineResponse {
    /// Count-only query.
    Count(u64),
    /// Paginated fetch.
    Hits(EngineHits),
}

impl EngineResponse {
    /// The engine-reported match count.
    pub fn total(&self) -> u64 {
        match self {
            EngineResponse::Count(total) => *total,
            EngineResponse::Hits(hits) => hits.total,
        }
    }
}

/// A document search engine.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Runs a paginated query.
    async fn search(&self, request: &EngineRequest) -> EngineResult<EngineHits>;

    /// Counts the documents matching `query`.
    async fn count(&self, resource_type: &str, query: &QueryExpr) -> EngineResult<u64>;

    /// Top-level element names known for `resource_type`.
    ///
    /// `None` disables search parameter validation for that type.
    async fn known_fields(&self, _resource_type: &str) -> EngineResult<Option<BTreeSet<String>>> {
        Ok(None)
    }
}

/// Bounds one engine round trip by `timeout_ms`.
pub async fn with_deadline<T, F>(timeout_ms: u64, round_trip: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), round_trip).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout { timeout_ms }),
    }
}
