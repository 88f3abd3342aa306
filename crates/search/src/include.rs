//! `_include` and `_revinclude` expansion.
//!
//! Lookups are planned from the match entries of a filled envelope, run
//! independently and then appended in plan order:
//!
//! - `_include`: one lookup per (directive, referenced type), ids in the
//!   order they were first seen, skipping resources that are already matches
//!   or were already planned
//! - `_revinclude`: one lookup per directive targeting the searched type,
//!   selecting `source_type` resources whose reference element points at any
//!   match entry

use std::collections::HashSet;

use serde_json::Value;

use crate::engine::{EngineRequest, SearchEngine, with_deadline};
use crate::error::EngineResult;
use crate::path::values_at_path;
use crate::query::QueryExpr;
use crate::reference::ResourceRef;
use crate::types::{IncludeDirective, IncludeType};

/// One secondary query.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeLookup {
    /// Forward or reverse include.
    pub include_type: IncludeType,
    /// The directive as written, for logging.
    pub directive: String,
    /// The query to run.
    pub request: EngineRequest,
    /// Expected ids in encounter order; forward includes only.
    pub ids: Vec<String>,
}

impl IncludeLookup {
    /// Runs the lookup, returning documents in the order they should be
    /// appended.
    pub async fn run(&self, engine: &dyn SearchEngine, timeout_ms: u64) -> EngineResult<Vec<Value>> {
        let hits = with_deadline(timeout_ms, engine.search(&self.request)).await?;
        if self.ids.is_empty() {
            return Ok(hits.documents);
        }

        let mut documents = hits.documents;
        documents.sort_by_key(|doc| {
            doc.get("id")
                .and_then(Value::as_str)
                .and_then(|id| self.ids.iter().position(|known| known == id))
                .unwrap_or(usize::MAX)
        });
        Ok(documents)
    }
}

/// Plans the forward include lookups for `matches`.
pub fn plan_includes(matches: &[Value], directives: &[IncludeDirective]) -> Vec<IncludeLookup> {
    let mut seen: HashSet<ResourceRef> = matches.iter().filter_map(ResourceRef::of_resource).collect();
    let mut lookups = Vec::new();

    for directive in directives {
        // (type, ids) in first-seen order
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        let path = directive.reference_path();

        for document in matches {
            if document.get("resourceType").and_then(Value::as_str)
                != Some(directive.source_type.as_str())
            {
                continue;
            }
            let references = values_at_path(document, &path)
                .into_iter()
                .filter_map(Value::as_str)
                .filter_map(ResourceRef::parse);

            for reference in references {
                if !directive.accepts_target(&reference.resource_type) || seen.contains(&reference) {
                    continue;
                }
                match groups.iter_mut().find(|(t, _)| *t == reference.resource_type) {
                    Some((_, ids)) => ids.push(reference.id.clone()),
                    None => groups.push((reference.resource_type.clone(), vec![reference.id.clone()])),
                }
                seen.insert(reference);
            }
        }

        lookups.extend(groups.into_iter().map(|(resource_type, ids)| {
            let query = QueryExpr::Or(ids.iter().map(|id| QueryExpr::matches("id", id)).collect());
            IncludeLookup {
                include_type: IncludeType::Include,
                directive: describe(directive),
                request: EngineRequest::new(resource_type, query).with_window(0, ids.len() as u32),
                ids,
            }
        }));
    }

    lookups
}

/// Plans the reverse include lookups for `matches` of `base_type`.
///
/// Each lookup reads at most `size` documents.
pub fn plan_revincludes(
    base_type: &str,
    matches: &[Value],
    directives: &[IncludeDirective],
    size: u32,
) -> Vec<IncludeLookup> {
    let targets: Vec<String> = matches
        .iter()
        .filter_map(ResourceRef::of_resource)
        .filter(|r| r.resource_type == base_type)
        .map(|r| r.to_string())
        .collect();
    if targets.is_empty() {
        return Vec::new();
    }

    directives
        .iter()
        .filter(|directive| directive.accepts_target(base_type))
        .map(|directive| {
            let path = directive.reference_path();
            let query = QueryExpr::Or(
                targets
                    .iter()
                    .map(|target| QueryExpr::phrase(path.as_str(), target.as_str()))
                    .collect(),
            );
            IncludeLookup {
                include_type: IncludeType::Revinclude,
                directive: describe(directive),
                request: EngineRequest::new(&directive.source_type, query).with_window(0, size),
                ids: Vec::new(),
            }
        })
        .collect()
}

/// Drops documents whose `Type/id` is already in `seen`, recording the rest.
pub fn retain_unseen(seen: &mut HashSet<ResourceRef>, documents: Vec<Value>) -> Vec<Value> {
    documents
        .into_iter()
        .filter(|doc| match ResourceRef::of_resource(doc) {
            Some(reference) => seen.insert(reference),
            None => true,
        })
        .collect()
}

fn describe(directive: &IncludeDirective) -> String {
    let mut text = format!(
        "{}={}:{}",
        directive.include_type.parameter_name(),
        directive.source_type,
        directive.search_param
    );
    if let Some(target) = &directive.target_type {
        text.push(':');
        text.push_str(target);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use serde_json::json;

    fn include(value: &str) -> IncludeDirective {
        IncludeDirective::parse(IncludeType::Include, value).unwrap()
    }

    fn revinclude(value: &str) -> IncludeDirective {
        IncludeDirective::parse(IncludeType::Revinclude, value).unwrap()
    }

    fn observation(id: &str, subject: &str) -> Value {
        json!({
            "resourceType": "Observation",
            "id": id,
            "subject": { "reference": subject }
        })
    }

    #[test]
    fn test_plan_groups_by_type_in_encounter_order() {
        let matches = vec![
            observation("o1", "Patient/p2"),
            observation("o2", "Group/g1"),
            observation("o3", "Patient/p1"),
            observation("o4", "Patient/p2"),
        ];
        let lookups = plan_includes(&matches, &[include("Observation:subject")]);

        assert_eq!(lookups.len(), 2);
        assert_eq!(lookups[0].request.resource_type, "Patient");
        assert_eq!(lookups[0].ids, vec!["p2".to_string(), "p1".to_string()]);
        assert_eq!(lookups[0].request.size, 2);
        assert_eq!(lookups[1].request.resource_type, "Group");
        assert_eq!(lookups[1].directive, "_include=Observation:subject");
    }

    #[test]
    fn test_plan_honours_target_type() {
        let matches = vec![
            observation("o1", "Patient/p1"),
            observation("o2", "Group/g1"),
        ];
        let lookups = plan_includes(&matches, &[include("Observation:subject:Group")]);
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].ids, vec!["g1".to_string()]);
    }

    #[test]
    fn test_plan_skips_matches_and_repeats() {
        let matches = vec![
            json!({
                "resourceType": "Patient",
                "id": "p1",
                "link": [
                    { "other": { "reference": "Patient/p1" } },
                    { "other": { "reference": "Patient/p2" } }
                ]
            }),
            json!({
                "resourceType": "Patient",
                "id": "p3",
                "generalPractitioner": [{ "reference": "Practitioner/dr1" }]
            }),
        ];
        let lookups = plan_includes(
            &matches,
            &[
                include("Patient:link.other"),
                include("Patient:link.other"),
                include("Patient:generalPractitioner"),
            ],
        );

        assert_eq!(lookups.len(), 2);
        assert_eq!(lookups[0].ids, vec!["p2".to_string()]);
        assert_eq!(lookups[1].request.resource_type, "Practitioner");
    }

    #[test]
    fn test_plan_ignores_other_source_types() {
        let matches = vec![json!({
            "resourceType": "Patient",
            "id": "p1",
            "subject": { "reference": "Group/g1" }
        })];
        assert!(plan_includes(&matches, &[include("Observation:subject")]).is_empty());
    }

    #[test]
    fn test_plan_revincludes() {
        let matches = vec![
            json!({ "resourceType": "Patient", "id": "p1" }),
            json!({ "resourceType": "Patient", "id": "p2" }),
        ];
        let lookups = plan_revincludes(
            "Patient",
            &matches,
            &[
                revinclude("Observation:subject"),
                revinclude("Provenance:target:Encounter"),
            ],
            50,
        );

        assert_eq!(lookups.len(), 1);
        let lookup = &lookups[0];
        assert_eq!(lookup.request.resource_type, "Observation");
        assert_eq!(lookup.request.size, 50);
        assert_eq!(
            lookup.request.query,
            QueryExpr::Or(vec![
                QueryExpr::phrase("subject.reference", "Patient/p1"),
                QueryExpr::phrase("subject.reference", "Patient/p2"),
            ])
        );
    }

    #[test]
    fn test_retain_unseen() {
        let mut seen = HashSet::from([ResourceRef::new("Patient", "p1")]);
        let kept = retain_unseen(
            &mut seen,
            vec![
                json!({ "resourceType": "Patient", "id": "p1" }),
                json!({ "resourceType": "Patient", "id": "p2" }),
                json!({ "resourceType": "Patient", "id": "p2" }),
            ],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["id"], "p2");
    }

    #[tokio::test]
    async fn test_run_orders_by_encounter() {
        let engine = MemoryEngine::new();
        engine
            .index_all(vec![
                json!({ "resourceType": "Patient", "id": "p1" }),
                json!({ "resourceType": "Patient", "id": "p2" }),
                json!({ "resourceType": "Patient", "id": "p3" }),
            ])
            .unwrap();

        let matches = vec![
            observation("o1", "Patient/p3"),
            observation("o2", "Patient/p1"),
        ];
        let lookups = plan_includes(&matches, &[include("Observation:subject")]);
        let documents = lookups[0].run(&engine, 1000).await.unwrap();

        let ids: Vec<&str> = documents.iter().filter_map(|d| d["id"].as_str()).collect();
        assert_eq!(ids, vec!["p3", "p1"]);
    }
}
