//! Elasticsearch search engine.
//!
//! Every FHIR resource type lives in its own index named
//! `{index_prefix}_{resource_type_lowercase}`; each document's `_source` is the
//! raw FHIR resource, so element paths such as `name.family` are queried
//! directly.
//!
//! # Modules
//!
//! - [`schema`] - index settings (normalizer, reference analyzer) and index
//!   lifecycle helpers

pub mod schema;

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::response::Response;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::indices::IndicesGetMappingParts;
use elasticsearch::{CountParts, Elasticsearch, SearchParts};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EngineHits, EngineRequest, SearchEngine, count_body};
use crate::error::{EngineError, EngineResult};
use crate::query::QueryExpr;

const ENGINE_NAME: &str = "elasticsearch";

/// Credentials sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElasticsearchAuth {
    /// HTTP basic auth.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// `Authorization: Bearer` token.
    Bearer {
        /// Token value.
        token: String,
    },
}

impl ElasticsearchAuth {
    fn credentials(&self) -> Credentials {
        match self {
            Self::Basic { username, password } => Credentials::Basic(username.clone(), password.clone()),
            Self::Bearer { token } => Credentials::Bearer(token.clone()),
        }
    }
}

/// Connection and index settings for [`ElasticsearchEngine`].
///
/// Missing fields deserialize to the values of [`ElasticsearchConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    /// Cluster URLs; only the first is contacted.
    pub nodes: Vec<String>,
    /// Prepended to every index name. Empty means no prefix.
    pub index_prefix: String,
    /// Primary shards for indices created through [`schema`].
    pub number_of_shards: u32,
    /// Replicas for indices created through [`schema`].
    pub number_of_replicas: u32,
    /// `refresh_interval` index setting.
    pub refresh_interval: String,
    /// `index.max_result_window`; `_offset + _count` may not exceed it.
    pub max_result_window: u32,
    /// Per-request transport timeout.
    pub request_timeout_ms: u64,
    /// Credentials, if the cluster requires them.
    pub auth: Option<ElasticsearchAuth>,
    /// Accept any TLS certificate. Development clusters only.
    pub disable_certificate_validation: bool,
    /// Reject parameters absent from the index mapping. Costs a mapping
    /// lookup per search.
    pub validate_parameters: bool,
}

const DEFAULT_NODE: &str = "http://localhost:9200";

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            nodes: vec![DEFAULT_NODE.to_string()],
            index_prefix: "fhirstore".to_string(),
            number_of_shards: 1,
            number_of_replicas: 1,
            refresh_interval: "1s".to_string(),
            max_result_window: 10_000,
            request_timeout_ms: 30_000,
            auth: None,
            disable_certificate_validation: false,
            validate_parameters: false,
        }
    }
}

/// Search engine backed by an Elasticsearch cluster.
pub struct ElasticsearchEngine {
    client: Elasticsearch,
    config: ElasticsearchConfig,
}

impl Debug for ElasticsearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ElasticsearchEngine {
    /// Connects to the first configured node.
    ///
    /// No request is sent; an unreachable cluster surfaces on the first
    /// search.
    pub fn new(config: ElasticsearchConfig) -> EngineResult<Self> {
        let node = config.nodes.first().map(String::as_str).unwrap_or(DEFAULT_NODE);
        let client = connect(node, &config)?;
        tracing::info!(node, index_prefix = %config.index_prefix, "connected search engine");
        Ok(Self { client, config })
    }

    /// Returns the Elasticsearch client.
    pub(crate) fn client(&self) -> &Elasticsearch {
        &self.client
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    /// Returns the index name for a resource type.
    pub fn index_name(&self, resource_type: &str) -> String {
        index_name(&self.config.index_prefix, resource_type)
    }

    fn transport_error(&self, err: elasticsearch::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout {
                timeout_ms: self.config.request_timeout_ms,
            }
        } else {
            EngineError::Unavailable {
                engine_name: ENGINE_NAME.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Reads a response body, turning failures into engine errors.
    async fn read_body(&self, response: Response, resource_type: &str) -> EngineResult<Value> {
        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &body, resource_type));
        }

        response.json::<Value>().await.map_err(|e| EngineError::Internal {
            engine_name: ENGINE_NAME.to_string(),
            message: format!("Failed to parse response: {}", e),
            source: Some(Box::new(e)),
        })
    }
}

fn connect(node: &str, config: &ElasticsearchConfig) -> EngineResult<Elasticsearch> {
    let unavailable = |message: String| EngineError::Unavailable {
        engine_name: ENGINE_NAME.to_string(),
        message,
    };

    let url = node
        .parse::<elasticsearch::http::Url>()
        .map_err(|e| unavailable(format!("bad node url {}: {}", node, e)))?;

    let mut transport = TransportBuilder::new(SingleNodeConnectionPool::new(url))
        .timeout(Duration::from_millis(config.request_timeout_ms));
    if config.disable_certificate_validation {
        transport = transport.cert_validation(CertificateValidation::None);
    }
    if let Some(auth) = &config.auth {
        transport = transport.auth(auth.credentials());
    }

    let transport = transport
        .build()
        .map_err(|e| unavailable(format!("transport setup failed: {}", e)))?;
    Ok(Elasticsearch::new(transport))
}

/// `{prefix}_{resource_type_lowercase}`, or the bare lowercase type when the
/// prefix is empty.
pub fn index_name(prefix: &str, resource_type: &str) -> String {
    if prefix.is_empty() {
        resource_type.to_lowercase()
    } else {
        format!("{}_{}", prefix, resource_type.to_lowercase())
    }
}

/// Maps a non-success status code to an engine error.
pub fn classify_failure(status: u16, body: &str, resource_type: &str) -> EngineError {
    if body.contains("index_not_found_exception") {
        return EngineError::IndexNotFound {
            resource_type: resource_type.to_string(),
        };
    }

    let message = error_reason(body).unwrap_or_else(|| format!("status {}", status));
    match status {
        400 => EngineError::QueryRejected {
            engine_name: ENGINE_NAME.to_string(),
            message,
        },
        401 | 403 => EngineError::Unauthorized {
            engine_name: ENGINE_NAME.to_string(),
            message,
        },
        404 => EngineError::IndexNotFound {
            resource_type: resource_type.to_string(),
        },
        502..=504 => EngineError::Unavailable {
            engine_name: ENGINE_NAME.to_string(),
            message,
        },
        _ => EngineError::internal(ENGINE_NAME, message),
    }
}

/// Pulls `error.root_cause[0].reason` (or `error.reason`) out of an error body.
fn error_reason(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let error = parsed.get("error")?;
    error
        .get("root_cause")
        .and_then(|causes| causes.get(0))
        .and_then(|cause| cause.get("reason"))
        .or_else(|| error.get("reason"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Extracts `_source` documents and the total from a `_search` response.
pub fn parse_hits(body: &Value) -> EngineHits {
    let hits = body.get("hits");

    let documents = hits
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source").cloned())
                .collect()
        })
        .unwrap_or_default();

    // `hits.total` is an object since 7.0 and a bare number before
    let total = hits
        .and_then(|h| h.get("total"))
        .and_then(|t| t.get("value").and_then(Value::as_u64).or_else(|| t.as_u64()))
        .unwrap_or(0);

    EngineHits { total, documents }
}

/// Top-level property names from a `_mapping` response.
pub fn mapping_fields(body: &Value) -> Option<BTreeSet<String>> {
    let fields: BTreeSet<String> = body
        .as_object()?
        .values()
        .filter_map(|index| index.get("mappings")?.get("properties")?.as_object())
        .flat_map(|props| props.keys().cloned())
        .collect();

    if fields.is_empty() { None } else { Some(fields) }
}

#[async_trait]
impl SearchEngine for ElasticsearchEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn search(&self, request: &EngineRequest) -> EngineResult<EngineHits> {
        let index = self.index_name(&request.resource_type);
        let body = request.to_search_body();
        tracing::debug!(index = %index, body = %body, "Elasticsearch search");

        let response = self
            .client()
            .search(SearchParts::Index(&[&index]))
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = self.read_body(response, &request.resource_type).await?;
        Ok(parse_hits(&body))
    }

    async fn count(&self, resource_type: &str, query: &QueryExpr) -> EngineResult<u64> {
        let index = self.index_name(resource_type);
        let body = count_body(query);
        tracing::debug!(index = %index, body = %body, "Elasticsearch count");

        let response = self
            .client()
            .count(CountParts::Index(&[&index]))
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = self.read_body(response, resource_type).await?;
        body.get("count").and_then(Value::as_u64).ok_or_else(|| {
            EngineError::internal(ENGINE_NAME, "count response carries no count")
        })
    }

    async fn known_fields(&self, resource_type: &str) -> EngineResult<Option<BTreeSet<String>>> {
        if !self.config.validate_parameters {
            return Ok(None);
        }

        let index = self.index_name(resource_type);
        let response = self
            .client()
            .indices()
            .get_mapping(IndicesGetMappingParts::Index(&[&index]))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = self.read_body(response, resource_type).await?;
        Ok(mapping_fields(&body))
    }
}
