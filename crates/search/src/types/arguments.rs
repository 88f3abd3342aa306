//! Structured search arguments produced by the parser.

use serde::{Deserialize, Serialize};

use super::search_params::{IncludeDirective, SortDirective, SummaryMode};
use crate::reverse_chain::ReverseChain;

/// Default page size when `_count` is absent.
pub const DEFAULT_COUNT: u32 = 100;

/// Elements dropped by `_summary=true`.
pub const NON_SUMMARY_ELEMENTS: &[&str] = &["text", "contained", "extension"];

/// Elements kept by `_summary=text`.
pub const TEXT_SUMMARY_ELEMENTS: &[&str] = &["text", "id", "meta"];

/// One field predicate group.
///
/// `All` collects repeated occurrences of the same key (every value must
/// match); `Any` holds a single comma-joined occurrence (one value must match).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CoreArg {
    /// AND over values.
    All {
        /// Field name, possibly with a `:modifier` suffix.
        field: String,
        /// Raw values.
        values: Vec<String>,
    },
    /// OR over values.
    Any {
        /// Field name, possibly with a `:modifier` suffix.
        field: String,
        /// Raw values.
        values: Vec<String>,
    },
}

impl CoreArg {
    /// Single-valued AND group.
    pub fn all(field: impl Into<String>, value: impl Into<String>) -> Self {
        CoreArg::All {
            field: field.into(),
            values: vec![value.into()],
        }
    }

    /// OR group over `values`.
    pub fn any<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CoreArg::Any {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the field name.
    pub fn field(&self) -> &str {
        match self {
            CoreArg::All { field, .. } | CoreArg::Any { field, .. } => field,
        }
    }

    /// Returns the raw values.
    pub fn values(&self) -> &[String] {
        match self {
            CoreArg::All { values, .. } | CoreArg::Any { values, .. } => values,
        }
    }

    /// Returns the same group targeted at another field.
    pub fn retarget(&self, field: impl Into<String>) -> Self {
        let field = field.into();
        match self {
            CoreArg::All { values, .. } => CoreArg::All {
                field,
                values: values.clone(),
            },
            CoreArg::Any { values, .. } => CoreArg::Any {
                field,
                values: values.clone(),
            },
        }
    }
}

/// Presentation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formatting {
    /// `_sort`, in priority order.
    pub sort: Option<Vec<SortDirective>>,
    /// `_elements` allow-list (or the `_summary=text` list).
    pub elements: Option<Vec<String>>,
    /// Top-level elements removed by `_summary`.
    pub excludes: Vec<String>,
    /// Whether `_summary` narrowed the payload.
    pub summary: bool,
    /// The raw `_summary` mode.
    pub summary_mode: Option<SummaryMode>,
    /// Count-only mode (`_summary=count` or `_count=0`).
    pub is_summary_count: bool,
    /// `_include` directives, in declaration order.
    pub include: Option<Vec<IncludeDirective>>,
    /// `_revinclude` directives, in declaration order.
    pub revinclude: Option<Vec<IncludeDirective>>,
}

impl Formatting {
    /// Reference element names followed by `_include`.
    pub fn include_fields(&self) -> Option<Vec<&str>> {
        self.include
            .as_ref()
            .map(|directives| directives.iter().map(|d| d.search_param.as_str()).collect())
    }

    /// True when `_include` or `_revinclude` was requested.
    pub fn wants_inclusions(&self) -> bool {
        self.include.as_ref().is_some_and(|d| !d.is_empty())
            || self.revinclude.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// True when the returned resources are not complete.
    pub fn is_subsetted(&self) -> bool {
        self.elements.is_some() || self.summary || self.is_summary_count
    }
}

/// Paging window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    /// Number of matches to skip.
    pub offset: u32,
    /// Maximum number of matches to return.
    pub result_size: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            offset: 0,
            result_size: DEFAULT_COUNT,
        }
    }
}

/// Everything needed to run one search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchArguments {
    /// The resource type being searched.
    pub resource_type: String,
    /// Field predicates, in arrival order.
    pub core_args: Vec<CoreArg>,
    /// Presentation options.
    pub formatting: Formatting,
    /// Paging window.
    pub paging: Paging,
    /// `_has` chains; each one further restricts the result.
    pub reverse_chains: Vec<ReverseChain>,
}

impl SearchArguments {
    /// Creates arguments with no predicates for `resource_type`.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            core_args: Vec::new(),
            formatting: Formatting::default(),
            paging: Paging::default(),
            reverse_chains: Vec::new(),
        }
    }

    /// True when at least one `_has` chain was given.
    pub fn has_reverse_chains(&self) -> bool {
        !self.reverse_chains.is_empty()
    }
}
