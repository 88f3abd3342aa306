//! Search orchestration.
//!
//! [`SearchOrchestrator::search`] runs one FHIR search end to end:
//!
//! 1. validate the resource type and parse the parameters
//! 2. check parameter names against the engine's known fields
//! 3. resolve `_has` chains into literal `id` restrictions
//! 4. compile and run the primary query (count or paginated fetch)
//! 5. expand `_include` / `_revinclude`
//!
//! Failures in steps 1-4 produce an `OperationOutcome` envelope. A failed
//! inclusion lookup is logged and skipped.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bundle::{IssueSeverity, IssueType, ResultEnvelope};
use crate::config::SearchConfig;
use crate::engine::{EngineRequest, EngineResponse, SearchEngine, with_deadline};
use crate::error::{SearchError, SearchResult};
use crate::include::{plan_includes, plan_revincludes, retain_unseen};
use crate::parser::parse_search_arguments;
use crate::query::{QueryExpr, compile_core, restrict};
use crate::reference::ResourceRef;
use crate::types::{Formatting, QueryParams, SearchArguments, is_resource_type};

const COUNT_PARAMETER: &str = "_count";

/// Element paths always returned when `_elements` narrows the payload.
const MANDATORY_ELEMENTS: &[&str] = &["id", "resourceType"];

/// Runs FHIR searches against a [`SearchEngine`].
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use helios_search::{MemoryEngine, QueryParams, SearchConfig, SearchOrchestrator};
///
/// let engine = Arc::new(MemoryEngine::new());
/// let orchestrator = SearchOrchestrator::new(engine, SearchConfig::default());
/// let params = QueryParams::from_query_string("gender=female&_count=10");
/// let bundle = orchestrator.search("Patient", &params).await.to_json();
/// ```
pub struct SearchOrchestrator<E> {
    engine: Arc<E>,
    config: Arc<SearchConfig>,
}

impl<E> Clone for SearchOrchestrator<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: Arc::clone(&self.config),
        }
    }
}

impl<E: SearchEngine> SearchOrchestrator<E> {
    /// Creates an orchestrator over `engine`.
    pub fn new(engine: Arc<E>, config: SearchConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Searches `resource_type` with `params`.
    ///
    /// Never fails: errors are reported inside the returned envelope.
    pub async fn search(&self, resource_type: &str, params: &QueryParams) -> ResultEnvelope {
        let mut envelope = ResultEnvelope::new();

        match self.execute(resource_type, params, &mut envelope).await {
            Ok(()) if envelope.is_error() => {}
            Ok(()) => info!(
                resource_type = %resource_type,
                total = envelope.total().unwrap_or(0),
                entries = envelope.entries().map_or(0, |e| e.len()),
                "Search completed"
            ),
            Err(err) => {
                error!(
                    resource_type = %resource_type,
                    category = %err.category(),
                    error = %err,
                    "Search failed"
                );
                envelope.fill_error(IssueSeverity::Error, err.issue_type(), err.to_string());
            }
        }

        envelope
    }

    /// Parses `params` for `resource_type`, applying configured defaults.
    pub fn parse(&self, resource_type: &str, params: &QueryParams) -> SearchResult<SearchArguments> {
        if self.config.validate_resource_types && !is_resource_type(resource_type) {
            return Err(SearchError::UnsupportedResourceType {
                resource_type: resource_type.to_string(),
            });
        }

        let mut args = parse_search_arguments(resource_type, params)?;
        if !params.contains(COUNT_PARAMETER) {
            args.paging.result_size = self.config.default_count;
        }
        Ok(args)
    }

    async fn execute(
        &self,
        resource_type: &str,
        params: &QueryParams,
        envelope: &mut ResultEnvelope,
    ) -> SearchResult<()> {
        let args = self.parse(resource_type, params)?;
        self.check_known_fields(&args).await?;

        let core = compile_core(&args.core_args)?;
        let mut restrictions = Vec::with_capacity(args.reverse_chains.len());
        for chain in &args.reverse_chains {
            match chain
                .resolve(resource_type, self.engine.as_ref(), &self.config)
                .await?
            {
                Some(restriction) => restrictions.push(restriction),
                None => {
                    warn!(
                        resource_type = %resource_type,
                        field = %chain.field,
                        "Reverse chain matched nothing"
                    );
                    envelope.fill_error(IssueSeverity::Warning, IssueType::NotFound, "no match");
                    return Ok(());
                }
            }
        }

        let query = restrict(core, restrictions);
        debug!(
            resource_type = %resource_type,
            query = %query.to_query_dsl(),
            "Compiled search query"
        );

        let response = self.run_primary(&args, query).await?;
        envelope.fill(&response, &args.formatting)?;

        if !args.formatting.is_summary_count && args.formatting.wants_inclusions() {
            self.expand_inclusions(resource_type, &args.formatting, envelope)
                .await?;
        }

        Ok(())
    }

    async fn check_known_fields(&self, args: &SearchArguments) -> SearchResult<()> {
        let known = with_deadline(
            self.config.request_timeout_ms,
            self.engine.known_fields(&args.resource_type),
        )
        .await?;
        let Some(known) = known else {
            return Ok(());
        };

        for arg in &args.core_args {
            let root = root_field(arg.field());
            if !is_reserved(root) && !known.contains(root) {
                return Err(SearchError::UnknownParameter {
                    resource_type: args.resource_type.clone(),
                    parameter: arg.field().to_string(),
                });
            }
        }
        Ok(())
    }

    async fn run_primary(
        &self,
        args: &SearchArguments,
        query: QueryExpr,
    ) -> SearchResult<EngineResponse> {
        let timeout_ms = self.config.request_timeout_ms;

        if args.formatting.is_summary_count {
            let total = with_deadline(
                timeout_ms,
                self.engine.count(&args.resource_type, &query),
            )
            .await?;
            debug!(resource_type = %args.resource_type, total, "Counted matches");
            return Ok(EngineResponse::Count(total));
        }

        let request = self.primary_request(args, query);
        let hits = with_deadline(timeout_ms, self.engine.search(&request)).await?;
        debug!(
            resource_type = %args.resource_type,
            total = hits.total,
            returned = hits.documents.len(),
            "Fetched matches"
        );
        Ok(EngineResponse::Hits(hits))
    }

    fn primary_request(&self, args: &SearchArguments, query: QueryExpr) -> EngineRequest {
        let formatting = &args.formatting;
        let size = args.paging.result_size.min(self.config.max_count);
        let mut request = EngineRequest::new(&args.resource_type, query)
            .with_window(args.paging.offset, size);

        if let Some(sort) = &formatting.sort {
            request = request.with_sort(sort.clone());
        }
        if let Some(elements) = &formatting.elements {
            request = request.with_includes(projection(elements, formatting));
        }
        if !formatting.excludes.is_empty() {
            request = request.with_excludes(formatting.excludes.clone());
        }
        request
    }

    async fn expand_inclusions(
        &self,
        resource_type: &str,
        formatting: &Formatting,
        envelope: &mut ResultEnvelope,
    ) -> SearchResult<()> {
        let matches: Vec<Value> = envelope
            .entries()
            .map(|entries| entries.iter().map(|e| e.resource.clone()).collect())
            .unwrap_or_default();
        if matches.is_empty() {
            return Ok(());
        }

        let mut lookups = Vec::new();
        if let Some(directives) = &formatting.include {
            lookups.extend(plan_includes(&matches, directives));
        }
        if let Some(directives) = &formatting.revinclude {
            lookups.extend(plan_revincludes(
                resource_type,
                &matches,
                directives,
                self.config.max_count,
            ));
        }

        let timeout_ms = self.config.request_timeout_ms;
        let results = join_all(
            lookups
                .iter()
                .map(|lookup| lookup.run(self.engine.as_ref(), timeout_ms)),
        )
        .await;

        let mut seen: HashSet<ResourceRef> =
            matches.iter().filter_map(ResourceRef::of_resource).collect();
        for (lookup, result) in lookups.iter().zip(results) {
            match result {
                Ok(documents) => {
                    let documents = retain_unseen(&mut seen, documents);
                    debug!(
                        directive = %lookup.directive,
                        included = documents.len(),
                        "Resolved inclusion"
                    );
                    envelope.append(documents, formatting)?;
                }
                Err(err) => warn!(
                    directive = %lookup.directive,
                    error = %err,
                    "Skipping inclusion"
                ),
            }
        }
        Ok(())
    }
}

/// `_elements` plus the elements every entry must carry and the reference
/// elements `_include` has to follow.
fn projection(elements: &[String], formatting: &Formatting) -> Vec<String> {
    let mut fields: Vec<String> = Vec::with_capacity(elements.len() + MANDATORY_ELEMENTS.len());
    let extra = MANDATORY_ELEMENTS
        .iter()
        .copied()
        .chain(formatting.include_fields().unwrap_or_default());
    for field in elements.iter().map(String::as_str).chain(extra) {
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }
    fields
}

fn root_field(field: &str) -> &str {
    let name = field.split(':').next().unwrap_or(field);
    name.split('.').next().unwrap_or(name)
}

// `_id`, `_text`, `_content` and `id` are valid on every type
fn is_reserved(root: &str) -> bool {
    root.starts_with('_') || root == "id"
}
