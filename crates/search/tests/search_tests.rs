//! End-to-end search tests against the in-memory engine.
//!
//! Covers:
//! - Parameter grouping (AND / OR), prefixes, tokens and modifiers
//! - Reverse chaining (`_has`), one and two hops
//! - `_include` / `_revinclude`
//! - Paging, sorting and subsetting (`_count`, `_offset`, `_sort`, `_summary`, `_elements`)
//! - Error envelopes

mod common;

use std::time::Duration;

use common::*;
use helios_search::{IssueSeverity, IssueType, MemoryEngine, QueryParams, SearchConfig};
use serde_json::json;

// ============================================================================
// Basic Search Tests
// ============================================================================

#[tokio::test]
async fn test_plain_string_search() {
    let bundle = orchestrator()
        .search("Patient", &params(&[("name", "smith")]))
        .await
        .to_json();

    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "searchset");
    assert_eq!(bundle["total"], 1);
    assert_eq!(entry_refs(&bundle), vec!["Patient/patient-1"]);
    assert_eq!(entry_modes(&bundle), vec!["match"]);
    assert!(bundle.get("tag").is_none());
}

#[tokio::test]
async fn test_comma_values_are_ored() {
    let query = QueryParams::from_query_string("?gender=male,female");
    let envelope = orchestrator().search("Patient", &query).await;
    assert_eq!(envelope.total(), Some(2));
}

#[tokio::test]
async fn test_repeated_keys_are_anded() {
    let envelope = orchestrator()
        .search(
            "Patient",
            &params(&[("birthDate", "ge1980-01-01"), ("birthDate", "lt1985-01-01")]),
        )
        .await;
    let bundle = envelope.to_json();
    assert_eq!(entry_refs(&bundle), vec!["Patient/patient-1"]);
}

#[tokio::test]
async fn test_token_search() {
    let bundle = orchestrator()
        .search(
            "Patient",
            &params(&[("identifier", "http://example.org/mrn|MRN67890")]),
        )
        .await
        .to_json();
    assert_eq!(entry_refs(&bundle), vec!["Patient/patient-2"]);
}

#[tokio::test]
async fn test_number_prefixes() {
    let orchestrator = orchestrator();

    let greater = orchestrator
        .search("Observation", &params(&[("valueQuantity.value", "gt70")]))
        .await;
    assert_eq!(greater.total(), Some(2));

    let approx = orchestrator
        .search("Observation", &params(&[("valueQuantity.value", "ap70")]))
        .await
        .to_json();
    assert_eq!(
        entry_refs(&approx),
        vec!["Observation/obs-1", "Observation/obs-3"]
    );

    let exact = orchestrator
        .search("Observation", &params(&[("valueQuantity.value", "72")]))
        .await;
    assert_eq!(exact.total(), Some(1));
}

#[tokio::test]
async fn test_modifiers() {
    let orchestrator = orchestrator();

    let contains = orchestrator
        .search("Patient", &params(&[("name:contains", "mit")]))
        .await;
    assert_eq!(contains.total(), Some(1));

    let exact = orchestrator
        .search("Patient", &params(&[("gender:exact", "male")]))
        .await;
    assert_eq!(exact.total(), Some(1));

    let wrong_case = orchestrator
        .search("Patient", &params(&[("gender:exact", "Male")]))
        .await;
    assert_eq!(wrong_case.total(), Some(0));

    // patient-3 has no gender and is included
    let negated = orchestrator
        .search("Patient", &params(&[("gender:not", "male")]))
        .await;
    assert_eq!(negated.total(), Some(2));
}

#[tokio::test]
async fn test_full_text_search() {
    let bundle = orchestrator()
        .search("Patient", &params(&[("_content", "smith")]))
        .await
        .to_json();
    assert_eq!(entry_refs(&bundle), vec!["Patient/patient-1"]);
}

#[tokio::test]
async fn test_json_parameters() {
    let query = QueryParams::from_json(&json!({
        "gender": "male,female",
        "_sort": "birthDate"
    }))
    .unwrap();
    let bundle = orchestrator().search("Patient", &query).await.to_json();
    assert_eq!(
        entry_refs(&bundle),
        vec!["Patient/patient-1", "Patient/patient-2"]
    );
}

// ============================================================================
// Reverse Chaining Tests
// ============================================================================

#[tokio::test]
async fn test_has_single_hop() {
    let bundle = orchestrator()
        .search(
            "Patient",
            &params(&[("_has:Observation:subject:code", "8302-2")]),
        )
        .await
        .to_json();

    // obs-4 references a Group and does not contribute
    assert_eq!(bundle["total"], 1);
    assert_eq!(entry_refs(&bundle), vec!["Patient/patient-1"]);
}

#[tokio::test]
async fn test_has_combined_with_field() {
    let bundle = orchestrator()
        .search(
            "Patient",
            &params(&[
                ("_has:Observation:subject:code", "8867-4"),
                ("gender", "female"),
            ]),
        )
        .await
        .to_json();
    assert_eq!(entry_refs(&bundle), vec!["Patient/patient-2"]);
}

#[tokio::test]
async fn test_has_two_hops() {
    let bundle = orchestrator()
        .search(
            "Patient",
            &params(&[(
                "_has:Observation:subject:_has:Provenance:target:agent",
                "pract-1",
            )]),
        )
        .await
        .to_json();
    assert_eq!(entry_refs(&bundle), vec!["Patient/patient-2"]);
}

#[tokio::test]
async fn test_has_without_matches_is_a_warning() {
    let envelope = orchestrator()
        .search(
            "Patient",
            &params(&[("_has:Observation:subject:code", "0000-0")]),
        )
        .await;

    assert!(envelope.is_error());
    let issue = &envelope.issues()[0];
    assert_eq!(issue.severity, IssueSeverity::Warning);
    assert_eq!(issue.code, IssueType::NotFound);
    assert_eq!(issue.diagnostics, "no match");

    let outcome = envelope.to_json();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    assert_eq!(outcome["issue"][0]["severity"], "warning");
}

#[tokio::test]
async fn test_has_too_deep_is_rejected() {
    let envelope = orchestrator()
        .search(
            "Patient",
            &params(&[(
                "_has:Observation:subject:_has:Provenance:target:_has:AuditEvent:entity:agent",
                "x",
            )]),
        )
        .await;
    assert_eq!(envelope.issues()[0].code, IssueType::Invalid);
}

#[tokio::test]
async fn test_has_ids_are_not_read_as_prefixes() {
    let engine = MemoryEngine::new();
    engine
        .index_all([
            json!({ "resourceType": "Patient", "id": "ge2020" }),
            json!({ "resourceType": "Patient", "id": "p9" }),
            json!({ "resourceType": "Patient", "id": "ap5" }),
            json!({
                "resourceType": "Observation",
                "id": "o1",
                "code": "8302-2",
                "subject": { "reference": "Patient/ge2020" }
            }),
        ])
        .unwrap();

    let bundle = orchestrator_with(engine, SearchConfig::for_testing())
        .search(
            "Patient",
            &params(&[("_has:Observation:subject:code", "8302-2")]),
        )
        .await
        .to_json();

    assert_eq!(bundle["total"], 1);
    assert_eq!(entry_refs(&bundle), vec!["Patient/ge2020"]);
}

#[tokio::test]
async fn test_has_past_chain_limit_is_too_costly() {
    let engine = || {
        let engine = MemoryEngine::new();
        engine
            .index_all([
                json!({ "resourceType": "Patient", "id": "a" }),
                json!({ "resourceType": "Patient", "id": "b" }),
                json!({
                    "resourceType": "Observation",
                    "id": "o1",
                    "code": "x",
                    "subject": { "reference": "Patient/a" }
                }),
                json!({
                    "resourceType": "Observation",
                    "id": "o2",
                    "code": "x",
                    "subject": { "reference": "Patient/b" }
                }),
            ])
            .unwrap();
        engine
    };
    let query = params(&[("_has:Observation:subject:code", "x")]);

    let capped = SearchConfig {
        max_chain_results: 1,
        ..SearchConfig::for_testing()
    };
    let envelope = orchestrator_with(engine(), capped).search("Patient", &query).await;
    assert!(envelope.is_error());
    assert_eq!(envelope.issues()[0].code, IssueType::TooCostly);
    let outcome = envelope.to_json();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    assert_eq!(outcome["issue"][0]["code"], "too-costly");

    let roomy = SearchConfig {
        max_chain_results: 2,
        ..SearchConfig::for_testing()
    };
    let bundle = orchestrator_with(engine(), roomy)
        .search("Patient", &query)
        .await
        .to_json();
    assert_eq!(bundle["total"], 2);
}

// ============================================================================
// Include Tests
// ============================================================================

#[tokio::test]
async fn test_include_subject() {
    let bundle = orchestrator()
        .search(
            "Observation",
            &params(&[("code", "8302-2"), ("_include", "Observation:subject")]),
        )
        .await
        .to_json();

    assert_eq!(bundle["total"], 2);
    assert_eq!(
        entry_refs(&bundle),
        vec![
            "Observation/obs-2",
            "Observation/obs-4",
            "Patient/patient-1",
            "Group/group-1",
        ]
    );
    assert_eq!(
        entry_modes(&bundle),
        vec!["match", "match", "include", "include"]
    );
}

#[tokio::test]
async fn test_include_with_target_type() {
    let bundle = orchestrator()
        .search(
            "Observation",
            &params(&[
                ("code", "8302-2"),
                ("_include", "Observation:subject:Patient"),
            ]),
        )
        .await
        .to_json();
    assert_eq!(
        entry_refs(&bundle),
        vec!["Observation/obs-2", "Observation/obs-4", "Patient/patient-1"]
    );
}

#[tokio::test]
async fn test_include_deduplicates_in_encounter_order() {
    let bundle = orchestrator()
        .search("Observation", &params(&[("_include", "Observation:subject")]))
        .await
        .to_json();

    let refs = entry_refs(&bundle);
    assert_eq!(bundle["total"], 4);
    assert_eq!(
        &refs[4..],
        &["Patient/patient-1", "Patient/patient-2", "Group/group-1"]
    );
}

#[tokio::test]
async fn test_failed_include_is_skipped() {
    // Practitioner has no index
    let envelope = orchestrator()
        .search(
            "Observation",
            &params(&[("_id", "obs-1"), ("_include", "Observation:performer")]),
        )
        .await;

    assert!(!envelope.is_error());
    assert_eq!(entry_refs(&envelope.to_json()), vec!["Observation/obs-1"]);
}

#[tokio::test]
async fn test_revinclude() {
    let bundle = orchestrator()
        .search(
            "Patient",
            &params(&[("_id", "patient-1"), ("_revinclude", "Observation:subject")]),
        )
        .await
        .to_json();

    assert_eq!(bundle["total"], 1);
    assert_eq!(
        entry_refs(&bundle),
        vec![
            "Patient/patient-1",
            "Observation/obs-1",
            "Observation/obs-2",
        ]
    );
    assert_eq!(entry_modes(&bundle)[1], "include");
}

#[tokio::test]
async fn test_include_in_count_mode_is_ignored() {
    let bundle = orchestrator()
        .search(
            "Observation",
            &params(&[("_include", "Observation:subject"), ("_summary", "count")]),
        )
        .await
        .to_json();
    assert_eq!(bundle["total"], 4);
    assert!(bundle.get("entry").is_none());
}

// ============================================================================
// Paging, Sorting and Subsetting Tests
// ============================================================================

#[tokio::test]
async fn test_count_mode() {
    let orchestrator = orchestrator();

    for mode in [("_summary", "count"), ("_count", "0")] {
        let bundle = orchestrator
            .search("Patient", &params(&[("gender", "male"), mode]))
            .await
            .to_json();
        assert_eq!(bundle["total"], 1);
        assert!(bundle.get("entry").is_none());
        assert_eq!(bundle["tag"]["code"], "SUBSETTED");
    }
}

#[tokio::test]
async fn test_paging_and_sort() {
    let bundle = orchestrator()
        .search(
            "Patient",
            &params(&[("_sort", "-birthDate"), ("_count", "1"), ("_offset", "1")]),
        )
        .await
        .to_json();

    // total is the match count, not the page size
    assert_eq!(bundle["total"], 3);
    assert_eq!(entry_refs(&bundle), vec!["Patient/patient-1"]);
}

#[tokio::test]
async fn test_elements() {
    let bundle = orchestrator()
        .search(
            "Patient",
            &params(&[("_id", "patient-1"), ("_elements", "name")]),
        )
        .await
        .to_json();

    let resource = &bundle["entry"][0]["resource"];
    assert_eq!(resource["id"], "patient-1");
    assert_eq!(resource["resourceType"], "Patient");
    assert!(resource.get("name").is_some());
    assert!(resource.get("gender").is_none());
    assert_eq!(bundle["tag"]["code"], "SUBSETTED");
}

#[tokio::test]
async fn test_summary_drops_narrative() {
    let bundle = orchestrator()
        .search(
            "Patient",
            &params(&[("_id", "patient-1"), ("_summary", "true")]),
        )
        .await
        .to_json();

    let resource = &bundle["entry"][0]["resource"];
    assert!(resource.get("text").is_none());
    assert!(resource.get("name").is_some());
    assert_eq!(bundle["tag"]["code"], "SUBSETTED");
}

// ============================================================================
// Error Tests
// ============================================================================

#[tokio::test]
async fn test_invalid_count() {
    let envelope = orchestrator()
        .search("Patient", &params(&[("_count", "abc")]))
        .await;

    assert!(envelope.is_error());
    let outcome = envelope.to_json();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    assert_eq!(outcome["issue"][0]["severity"], "error");
    assert_eq!(outcome["issue"][0]["code"], "invalid");
}

#[tokio::test]
async fn test_unknown_resource_type() {
    let envelope = orchestrator()
        .search("Spaceship", &QueryParams::new())
        .await;
    let issue = &envelope.issues()[0];
    assert_eq!(issue.code, IssueType::Invalid);
    assert!(issue.diagnostics.contains("Spaceship"));
}

#[tokio::test]
async fn test_unsupported_modifier() {
    let envelope = orchestrator()
        .search("Patient", &params(&[("name:above", "x")]))
        .await;
    assert_eq!(envelope.issues()[0].code, IssueType::NotSupported);
}

#[tokio::test]
async fn test_unknown_parameter() {
    let engine = seeded_engine().with_known_fields("Patient", ["name", "gender", "birthDate"]);
    let orchestrator = orchestrator_with(engine, SearchConfig::for_testing());

    let envelope = orchestrator
        .search("Patient", &params(&[("shoeSize", "42")]))
        .await;
    assert_eq!(envelope.issues()[0].code, IssueType::NotFound);
    assert!(envelope.issues()[0].diagnostics.contains("shoeSize"));

    let known = orchestrator
        .search(
            "Patient",
            &params(&[("name:contains", "mit"), ("_id", "patient-1")]),
        )
        .await;
    assert_eq!(known.total(), Some(1));
}

#[tokio::test]
async fn test_missing_index() {
    let envelope = orchestrator().search("Encounter", &QueryParams::new()).await;
    assert_eq!(envelope.issues()[0].code, IssueType::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_engine_timeout() {
    let engine = MemoryEngine::new().with_latency(Duration::from_millis(200));
    engine.create_index("Patient");
    let config = SearchConfig {
        request_timeout_ms: 50,
        ..SearchConfig::for_testing()
    };

    let envelope = orchestrator_with(engine, config)
        .search("Patient", &QueryParams::new())
        .await;
    let issue = &envelope.issues()[0];
    assert_eq!(issue.code, IssueType::Timeout);
    assert!(issue.diagnostics.contains("50ms"));
}
