//! Search result envelope.
//!
//! A [`ResultEnvelope`] starts [`Empty`](EnvelopeState::Empty), becomes
//! `Filled` once the primary query has run and may turn `Errored` at any point.
//! `Errored` is absorbing: later fills are ignored and issues accumulate.
//!
//! The envelope renders to a `searchset` Bundle on success and to an
//! `OperationOutcome` on error.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::engine::EngineResponse;
use crate::types::Formatting;

/// OperationOutcome issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// The operation could not run at all.
    Fatal,
    /// The operation failed.
    Error,
    /// The operation completed with a caveat.
    Warning,
    /// Informational only.
    Information,
}

impl IssueSeverity {
    /// FHIR code.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Fatal => "fatal",
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Information => "information",
        }
    }
}

/// OperationOutcome issue type (the subset this crate reports).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    /// Malformed input.
    Invalid,
    /// Something referenced does not exist.
    NotFound,
    /// The request used a feature that is not implemented.
    NotSupported,
    /// Processing failure.
    Processing,
    /// Temporary failure; retrying may succeed.
    Transient,
    /// Authentication or authorization failure.
    Security,
    /// A deadline expired.
    Timeout,
    /// The search would touch too many resources.
    TooCostly,
    /// Unexpected internal failure.
    Exception,
}

impl IssueType {
    /// FHIR code.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Invalid => "invalid",
            IssueType::NotFound => "not-found",
            IssueType::NotSupported => "not-supported",
            IssueType::Processing => "processing",
            IssueType::Transient => "transient",
            IssueType::Security => "security",
            IssueType::Timeout => "timeout",
            IssueType::TooCostly => "too-costly",
            IssueType::Exception => "exception",
        }
    }
}

/// One OperationOutcome issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Severity.
    pub severity: IssueSeverity,
    /// Issue type.
    pub code: IssueType,
    /// Human-readable detail.
    pub diagnostics: String,
}

/// Why an entry is in the Bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Matched the search criteria.
    Match,
    /// Added by `_include` or `_revinclude`.
    Include,
}

impl SearchMode {
    /// FHIR code.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Match => "match",
            SearchMode::Include => "include",
        }
    }
}

/// A resource in the result.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    /// The resource, possibly projected.
    pub resource: Value,
    /// Match or include.
    pub search_mode: SearchMode,
}

impl BundleEntry {
    fn to_json(&self) -> Value {
        json!({
            "resource": self.resource,
            "search": { "mode": self.search_mode.as_str() }
        })
    }
}

/// Misuse of the envelope state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `complete` or `append` before any `fill`.
    #[error("result envelope has not been filled")]
    NotFilled,

    /// A count-only response filled into an envelope holding entries, or
    /// the reverse.
    #[error("cannot mix count-only and entry responses in one envelope")]
    ModeMismatch,
}

#[derive(Debug, Clone, PartialEq)]
enum EnvelopeState {
    Empty,
    Filled {
        total: u64,
        entries: Option<Vec<BundleEntry>>,
        subsetted: bool,
    },
    Errored {
        issues: Vec<Issue>,
    },
}

/// Accumulates the outcome of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    state: EnvelopeState,
}

impl Default for ResultEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultEnvelope {
    /// Creates an empty envelope.
    pub fn new() -> Self {
        Self {
            state: EnvelopeState::Empty,
        }
    }

    /// Adds a primary query response.
    ///
    /// In count mode only `total` changes and the envelope carries no
    /// entries. Otherwise every document becomes a `match` entry and the
    /// engine-reported total is added. Mixing count-only and entry
    /// responses in one envelope fails with [`EnvelopeError::ModeMismatch`]
    /// and leaves the envelope unchanged.
    pub fn fill(
        &mut self,
        response: &EngineResponse,
        formatting: &Formatting,
    ) -> Result<(), EnvelopeError> {
        let subsetted_now = formatting.is_subsetted();
        match &mut self.state {
            EnvelopeState::Errored { .. } => {}
            EnvelopeState::Empty => {
                self.state = EnvelopeState::Filled {
                    total: response.total(),
                    entries: entries_for(response, formatting),
                    subsetted: subsetted_now,
                };
            }
            EnvelopeState::Filled {
                total,
                entries,
                subsetted,
            } => {
                match (entries.as_mut(), entries_for(response, formatting)) {
                    (Some(existing), Some(more)) => existing.extend(more),
                    (None, None) => {}
                    _ => return Err(EnvelopeError::ModeMismatch),
                }
                *total += response.total();
                *subsetted |= subsetted_now;
            }
        }
        Ok(())
    }

    /// Merges another envelope into this one.
    ///
    /// Totals add up and entries are concatenated unless in count mode. An
    /// errored `other` turns this envelope into an error envelope.
    pub fn complete(
        &mut self,
        other: ResultEnvelope,
        formatting: &Formatting,
    ) -> Result<(), EnvelopeError> {
        if let EnvelopeState::Errored { issues } = other.state {
            for issue in issues {
                self.push_issue(issue);
            }
            return Ok(());
        }

        match &mut self.state {
            EnvelopeState::Errored { .. } => Ok(()),
            EnvelopeState::Empty => Err(EnvelopeError::NotFilled),
            EnvelopeState::Filled {
                total,
                entries,
                subsetted,
            } => {
                let EnvelopeState::Filled {
                    total: other_total,
                    entries: other_entries,
                    subsetted: other_subsetted,
                } = other.state
                else {
                    // an empty envelope has nothing to contribute
                    return Ok(());
                };
                *total += other_total;
                *subsetted |= other_subsetted;
                if !formatting.is_summary_count
                    && let Some(other_entries) = other_entries
                {
                    entries.get_or_insert_with(Vec::new).extend(other_entries);
                }
                Ok(())
            }
        }
    }

    /// Appends included resources. `total` is left alone.
    pub fn append(
        &mut self,
        documents: Vec<Value>,
        formatting: &Formatting,
    ) -> Result<(), EnvelopeError> {
        match &mut self.state {
            EnvelopeState::Errored { .. } => Ok(()),
            EnvelopeState::Empty => Err(EnvelopeError::NotFilled),
            EnvelopeState::Filled { entries, .. } => {
                if !formatting.wants_inclusions() || formatting.is_summary_count {
                    return Ok(());
                }
                entries
                    .get_or_insert_with(Vec::new)
                    .extend(documents.into_iter().map(|resource| BundleEntry {
                        resource,
                        search_mode: SearchMode::Include,
                    }));
                Ok(())
            }
        }
    }

    /// Turns the envelope into an error envelope, or adds an issue to one.
    pub fn fill_error(
        &mut self,
        severity: IssueSeverity,
        code: IssueType,
        diagnostics: impl Into<String>,
    ) {
        self.push_issue(Issue {
            severity,
            code,
            diagnostics: diagnostics.into(),
        });
    }

    fn push_issue(&mut self, issue: Issue) {
        match &mut self.state {
            EnvelopeState::Errored { issues } => issues.push(issue),
            _ => {
                self.state = EnvelopeState::Errored {
                    issues: vec![issue],
                }
            }
        }
    }

    /// True before the first `fill`.
    pub fn is_empty(&self) -> bool {
        matches!(self.state, EnvelopeState::Empty)
    }

    /// True once an issue has been recorded.
    pub fn is_error(&self) -> bool {
        matches!(self.state, EnvelopeState::Errored { .. })
    }

    /// Engine-reported match count, if filled.
    pub fn total(&self) -> Option<u64> {
        match &self.state {
            EnvelopeState::Filled { total, .. } => Some(*total),
            _ => None,
        }
    }

    /// Entries, if filled in entry mode.
    pub fn entries(&self) -> Option<&[BundleEntry]> {
        match &self.state {
            EnvelopeState::Filled {
                entries: Some(entries),
                ..
            } => Some(entries),
            _ => None,
        }
    }

    /// Recorded issues; empty unless errored.
    pub fn issues(&self) -> &[Issue] {
        match &self.state {
            EnvelopeState::Errored { issues } => issues,
            _ => &[],
        }
    }

    /// True when the entries are not complete resources.
    pub fn is_subsetted(&self) -> bool {
        matches!(self.state, EnvelopeState::Filled { subsetted: true, .. })
    }

    /// Renders the envelope as a FHIR resource.
    pub fn to_json(&self) -> Value {
        match &self.state {
            EnvelopeState::Errored { issues } => {
                let issues: Vec<Value> = issues
                    .iter()
                    .map(|issue| {
                        json!({
                            "severity": issue.severity.as_str(),
                            "code": issue.code.as_str(),
                            "diagnostics": issue.diagnostics,
                        })
                    })
                    .collect();
                json!({
                    "resourceType": "OperationOutcome",
                    "issue": issues
                })
            }
            EnvelopeState::Empty => json!({
                "resourceType": "Bundle",
                "type": "searchset",
                "total": 0,
                "entry": []
            }),
            EnvelopeState::Filled {
                total,
                entries,
                subsetted,
            } => {
                let mut bundle = json!({
                    "resourceType": "Bundle",
                    "type": "searchset",
                    "total": total
                });
                if let Some(entries) = entries {
                    bundle["entry"] = entries.iter().map(BundleEntry::to_json).collect();
                }
                if *subsetted {
                    bundle["tag"] = json!({ "code": "SUBSETTED" });
                }
                bundle
            }
        }
    }
}

fn entries_for(response: &EngineResponse, formatting: &Formatting) -> Option<Vec<BundleEntry>> {
    match response {
        EngineResponse::Hits(hits) if !formatting.is_summary_count => Some(
            hits.documents
                .iter()
                .cloned()
                .map(|resource| BundleEntry {
                    resource,
                    search_mode: SearchMode::Match,
                })
                .collect(),
        ),
        _ => None,
    }
}
