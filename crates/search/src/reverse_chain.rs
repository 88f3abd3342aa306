//! Reverse chaining (`_has`).
//!
//! `_has:Observation:patient:code=1234-5` selects the resources referenced by
//! the `patient` element of Observations whose `code` is `1234-5`. One level of
//! nesting is supported:
//!
//! ```text
//! _has:Observation:patient:_has:AuditEvent:entity:agent=MyUserId
//! ```
//!
//! Chains are resolved ahead of the main query by walking the hops from the
//! innermost outwards, each stage turning the matching documents into the set
//! of ids referenced one level up. The final id set becomes a literal `id`
//! restriction on the searched type. A stage matching more documents than
//! `max_chain_results` fails the search rather than resolving partially.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SearchConfig;
use crate::engine::{EngineRequest, SearchEngine, with_deadline};
use crate::error::{ParseError, ParseResult, SearchError, SearchResult};
use crate::query::{QueryExpr, compile_core};
use crate::reference::{collect_references, ids_for_type};
use crate::types::CoreArg;

/// Parameter name prefix introducing a reverse chain.
pub const HAS_PREFIX: &str = "_has:";

/// Maximum number of hops in one chain.
pub const MAX_CHAIN_DEPTH: usize = 2;

/// One `Type:referenceElement` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseChainHop {
    /// Resource type holding the reference.
    pub resource_type: String,
    /// Element on that type referencing the previous hop.
    pub reference_attribute: String,
}

impl ReverseChainHop {
    /// Path of the literal reference inside the hop's resources.
    pub fn reference_path(&self) -> String {
        format!("{}.reference", self.reference_attribute)
    }
}

/// A parsed `_has` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseChain {
    /// Hops from the searched type outwards.
    pub hops: Vec<ReverseChainHop>,
    /// Search field tested on the last hop's resources.
    pub field: String,
    /// Restriction on the last hop's resources.
    pub value: CoreArg,
}

/// One resolution query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStage {
    /// Type queried in this stage.
    pub resource_type: String,
    /// Reference path projected from the matches.
    pub reference_path: String,
    /// Only references to this type are kept.
    pub target_type: String,
}

impl ReverseChain {
    /// Returns true if `name` introduces a reverse chain.
    pub fn is_reverse_chain(name: &str) -> bool {
        name.starts_with(HAS_PREFIX)
    }

    /// Parses a `_has:...` predicate group.
    pub fn parse(arg: &CoreArg) -> ParseResult<Self> {
        let parameter = arg.field();
        let invalid = |message: &str| ParseError::InvalidReverseChain {
            parameter: parameter.to_string(),
            message: message.to_string(),
        };

        let body = parameter
            .strip_prefix(HAS_PREFIX)
            .ok_or_else(|| invalid("missing _has: prefix"))?;
        let segments: Vec<&str> = body.split(':').collect();

        let mut hops = Vec::new();
        let mut rest = segments.as_slice();
        let field = loop {
            let [resource_type, reference_attribute, tail @ ..] = rest else {
                return Err(invalid("expected _has:ResourceType:reference:parameter"));
            };
            if tail.is_empty() {
                return Err(invalid("expected _has:ResourceType:reference:parameter"));
            }
            if !resource_type.starts_with(|c: char| c.is_ascii_uppercase()) {
                return Err(invalid("resource type must start with an uppercase letter"));
            }
            if reference_attribute.is_empty() {
                return Err(invalid("reference element is empty"));
            }

            hops.push(ReverseChainHop {
                resource_type: resource_type.to_string(),
                reference_attribute: reference_attribute.to_string(),
            });

            if tail[0] == "_has" {
                if hops.len() == MAX_CHAIN_DEPTH {
                    return Err(ParseError::ReverseChainTooDeep {
                        parameter: parameter.to_string(),
                        max_depth: MAX_CHAIN_DEPTH,
                    });
                }
                rest = &tail[1..];
                continue;
            }

            // the field keeps any modifier, e.g. code:exact
            let field = tail.join(":");
            if tail[0].is_empty() {
                return Err(invalid("search parameter is empty"));
            }
            break field;
        };

        Ok(Self {
            hops,
            value: arg.retarget(field.as_str()),
            field,
        })
    }

    /// Stages in execution order (innermost hop first) for a chain rooted at
    /// `base_type`.
    pub fn stages(&self, base_type: &str) -> Vec<ChainStage> {
        (0..self.hops.len())
            .rev()
            .map(|i| ChainStage {
                resource_type: self.hops[i].resource_type.clone(),
                reference_path: self.hops[i].reference_path(),
                target_type: if i == 0 {
                    base_type.to_string()
                } else {
                    self.hops[i - 1].resource_type.clone()
                },
            })
            .collect()
    }

    /// The parameter name as written, e.g. `_has:Observation:subject:code`.
    pub fn parameter_name(&self) -> String {
        let mut name = String::new();
        for hop in &self.hops {
            name.push_str(HAS_PREFIX);
            name.push_str(&hop.resource_type);
            name.push(':');
            name.push_str(&hop.reference_attribute);
            name.push(':');
        }
        name.push_str(&self.field);
        name
    }

    /// Resolves the chain into an `id` restriction on `base_type`.
    ///
    /// Returns `None` as soon as a stage matches nothing, and
    /// [`SearchError::ChainTooBroad`] when a stage matches more documents
    /// than `max_chain_results`.
    pub async fn resolve(
        &self,
        base_type: &str,
        engine: &dyn SearchEngine,
        config: &SearchConfig,
    ) -> SearchResult<Option<QueryExpr>> {
        let mut restriction = compile_core(std::slice::from_ref(&self.value))?;

        for stage in self.stages(base_type) {
            let request = EngineRequest::new(&stage.resource_type, restriction)
                .with_includes(vec![stage.reference_path.clone()])
                .with_window(0, config.max_chain_results);

            let hits = with_deadline(config.request_timeout_ms, engine.search(&request)).await?;
            if hits.total > hits.documents.len() as u64 {
                return Err(SearchError::ChainTooBroad {
                    parameter: self.parameter_name(),
                    resource_type: stage.resource_type,
                    matched: hits.total,
                    limit: config.max_chain_results,
                });
            }

            let references = collect_references(&hits.documents, &stage.reference_path);
            let ids = ids_for_type(&references, &stage.target_type);

            debug!(
                stage_type = %stage.resource_type,
                target_type = %stage.target_type,
                matches = hits.documents.len(),
                ids = ids.len(),
                "Resolved _has stage"
            );

            if ids.is_empty() {
                return Ok(None);
            }
            restriction = QueryExpr::terms("id", ids);
        }

        Ok(Some(restriction))
    }
}
