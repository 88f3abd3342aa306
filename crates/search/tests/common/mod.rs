//! Shared fixtures for the search integration tests.
//!
//! The fixture graph:
//! - three patients (`patient-3` has no gender or birth date)
//! - four observations; `obs-4` has a Group subject
//! - a Provenance targeting `obs-3`, with `pract-1` as agent
//! - a Group and an Organization
//!
//! Practitioners are deliberately not indexed so lookups against them fail.

#![allow(dead_code)]

use std::sync::Arc;

use helios_search::{MemoryEngine, QueryParams, SearchConfig, SearchOrchestrator};
use serde_json::{Value, json};

/// Patient resources.
pub fn patients() -> Vec<Value> {
    vec![
        json!({
            "resourceType": "Patient",
            "id": "patient-1",
            "active": true,
            "name": [{"family": "Smith", "given": ["John", "Michael"]}],
            "gender": "male",
            "birthDate": "1980-01-15",
            "identifier": [{"system": "http://example.org/mrn", "value": "MRN12345"}],
            "managingOrganization": {"reference": "Organization/org-1"},
            "text": {"status": "generated", "div": "<div>John Smith</div>"}
        }),
        json!({
            "resourceType": "Patient",
            "id": "patient-2",
            "active": true,
            "name": [{"family": "Jones", "given": ["Jane"]}],
            "gender": "female",
            "birthDate": "1990-05-20",
            "identifier": [{"system": "http://example.org/mrn", "value": "MRN67890"}]
        }),
        json!({
            "resourceType": "Patient",
            "id": "patient-3",
            "active": false,
            "name": [{"family": "Williams", "given": ["Robert"]}]
        }),
    ]
}

/// Observation resources.
pub fn observations() -> Vec<Value> {
    let mut resources = vec![
        observation("obs-1", "8867-4", "Heart rate", "Patient/patient-1", Some(72.0)),
        observation("obs-2", "8302-2", "Body height", "Patient/patient-1", Some(180.0)),
        observation("obs-3", "8867-4", "Heart rate", "Patient/patient-2", Some(68.0)),
        observation("obs-4", "8302-2", "Body height", "Group/group-1", None),
    ];
    resources[0]["performer"] = json!([{"reference": "Practitioner/pract-1"}]);
    resources
}

/// Everything else.
pub fn others() -> Vec<Value> {
    vec![
        json!({
            "resourceType": "Provenance",
            "id": "prov-1",
            "target": [{"reference": "Observation/obs-3"}],
            "agent": [{"who": {"reference": "Practitioner/pract-1"}}]
        }),
        json!({
            "resourceType": "Group",
            "id": "group-1",
            "type": "person",
            "actual": true
        }),
        json!({
            "resourceType": "Organization",
            "id": "org-1",
            "name": "General Hospital"
        }),
    ]
}

fn observation(id: &str, code: &str, display: &str, subject: &str, value: Option<f64>) -> Value {
    let mut resource = json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": code, "display": display}]},
        "subject": {"reference": subject}
    });
    if let Some(value) = value {
        resource["valueQuantity"] = json!({"value": value, "unit": "unit"});
    }
    resource
}

/// A memory engine holding every fixture.
pub fn seeded_engine() -> MemoryEngine {
    let engine = MemoryEngine::new();
    engine
        .index_all(patients().into_iter().chain(observations()).chain(others()))
        .expect("fixtures carry resourceType and id");
    engine
}

/// An orchestrator over [`seeded_engine`] with the test configuration.
pub fn orchestrator() -> SearchOrchestrator<MemoryEngine> {
    orchestrator_with(seeded_engine(), SearchConfig::for_testing())
}

/// An orchestrator over `engine`.
pub fn orchestrator_with(
    engine: MemoryEngine,
    config: SearchConfig,
) -> SearchOrchestrator<MemoryEngine> {
    SearchOrchestrator::new(Arc::new(engine), config)
}

/// Builds parameters from pairs.
pub fn params(pairs: &[(&str, &str)]) -> QueryParams {
    QueryParams::from_pairs(pairs.iter().copied())
}

/// `Type/id` of every entry, in order.
pub fn entry_refs(bundle: &Value) -> Vec<String> {
    bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|e| {
                    format!(
                        "{}/{}",
                        e["resource"]["resourceType"].as_str().unwrap_or_default(),
                        e["resource"]["id"].as_str().unwrap_or_default()
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `search.mode` of every entry, in order.
pub fn entry_modes(bundle: &Value) -> Vec<String> {
    bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e["search"]["mode"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
