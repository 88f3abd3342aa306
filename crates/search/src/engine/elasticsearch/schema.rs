//! Elasticsearch index settings for FHIR resource indices.
//!
//! Documents are raw FHIR resources, so the mapping is mostly dynamic. The
//! settings provide:
//! - `fhir_normalizer`: lowercase + asciifolding, for case/accent-insensitive
//!   keyword comparisons
//! - `fhir_reference_analyzer`: indexes `Patient/123` both whole and as its
//!   trailing id (or absolute URL), so references match either form
//!
//! Every string gets an unanalysed `exact` sub-field used by `:exact`.

use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts, IndicesRefreshParts};
use serde_json::{Value, json};

use super::{ElasticsearchConfig, ElasticsearchEngine};
use crate::error::{EngineError, EngineResult};
use crate::query::EXACT_SUBFIELD;

/// Captures the id (or absolute URL) part of a literal reference.
pub const REFERENCE_PATTERN: &str = r"(?:\w+\/)?(https?\:\/\/.*|[a-zA-Z0-9_-]+)";

/// Creates the settings and mapping for one resource type index.
pub fn create_index_settings(config: &ElasticsearchConfig) -> Value {
    json!({
        "settings": {
            "number_of_shards": config.number_of_shards,
            "number_of_replicas": config.number_of_replicas,
            "index.max_result_window": config.max_result_window,
            "refresh_interval": config.refresh_interval,
            "analysis": {
                "normalizer": {
                    "fhir_normalizer": {
                        "type": "custom",
                        "char_filter": [],
                        "filter": ["lowercase", "asciifolding"]
                    }
                },
                "filter": {
                    "fhir_reference_filter": {
                        "type": "pattern_capture",
                        "preserve_original": true,
                        "patterns": [REFERENCE_PATTERN]
                    }
                },
                "analyzer": {
                    "fhir_reference_analyzer": {
                        "type": "custom",
                        "tokenizer": "keyword",
                        "filter": ["fhir_reference_filter"]
                    }
                }
            }
        },
        "mappings": {
            "dynamic_templates": [
                {
                    "references": {
                        "path_match": "*.reference",
                        "match_mapping_type": "string",
                        "mapping": {
                            "type": "text",
                            "analyzer": "fhir_reference_analyzer"
                        }
                    }
                },
                {
                    "strings": {
                        "match_mapping_type": "string",
                        "mapping": {
                            "type": "text",
                            "fields": {
                                "keyword": {
                                    "type": "keyword",
                                    "normalizer": "fhir_normalizer",
                                    "ignore_above": 256
                                },
                                EXACT_SUBFIELD: {
                                    "type": "keyword",
                                    "ignore_above": 256
                                }
                            }
                        }
                    }
                }
            ],
            "properties": {
                "resourceType": { "type": "keyword" },
                "id": { "type": "keyword" },
                "meta": {
                    "properties": {
                        "lastUpdated": { "type": "date" },
                        "versionId": { "type": "keyword" }
                    }
                },
                "text": {
                    "properties": {
                        "div": { "type": "text", "analyzer": "standard" }
                    }
                }
            }
        }
    })
}

/// Ensures the index for a resource type exists, creating it if needed.
pub async fn ensure_index(engine: &ElasticsearchEngine, resource_type: &str) -> EngineResult<()> {
    let index = engine.index_name(resource_type);

    let exists_response = engine
        .client()
        .indices()
        .exists(IndicesExistsParts::Index(&[&index]))
        .send()
        .await
        .map_err(|e| {
            EngineError::internal("elasticsearch", format!("Failed to check index existence: {}", e))
        })?;

    if exists_response.status_code().is_success() {
        return Ok(());
    }

    let response = engine
        .client()
        .indices()
        .create(IndicesCreateParts::Index(&index))
        .body(create_index_settings(engine.config()))
        .send()
        .await
        .map_err(|e| {
            EngineError::internal(
                "elasticsearch",
                format!("Failed to create index {}: {}", index, e),
            )
        })?;

    let status = response.status_code();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        // Another writer created it first
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        return Err(EngineError::internal(
            "elasticsearch",
            format!("Failed to create index {}: {}", index, body),
        ));
    }

    tracing::info!(index = %index, "Created Elasticsearch index");
    Ok(())
}

/// Makes recent writes to a resource type's index visible to search.
pub async fn refresh_index(engine: &ElasticsearchEngine, resource_type: &str) -> EngineResult<()> {
    let index = engine.index_name(resource_type);
    let response = engine
        .client()
        .indices()
        .refresh(IndicesRefreshParts::Index(&[&index]))
        .send()
        .await
        .map_err(|e| {
            EngineError::internal("elasticsearch", format!("Failed to refresh {}: {}", index, e))
        })?;

    let status = response.status_code();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(super::classify_failure(status.as_u16(), &body, resource_type))
    }
}
