//! Vocabulary shared by the parser and the query compiler.
//!
//! Comparison prefixes, modifiers, sort directives, summary modes and include
//! directives.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A `:modifier` suffix on a parameter name.
///
/// Reference: https://build.fhir.org/search.html#modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchModifier {
    /// Unanalysed term match.
    Exact,
    /// Substring match.
    Contains,
    /// Negation.
    Not,
    /// Negated value-set membership.
    NotIn,
    /// Value-set membership.
    In,
    /// Hierarchical / prefix match.
    Below,
    /// Match on a reference's logical identifier.
    Identifier,
    /// Any other suffix; the compiler rejects it.
    Unsupported(String),
}

impl SearchModifier {
    /// Parses the text after the `:`.
    ///
    /// Unknown suffixes come back as [`SearchModifier::Unsupported`] so the
    /// caller can report them.
    pub fn parse(suffix: &str) -> Self {
        match suffix.to_ascii_lowercase().as_str() {
            "exact" => Self::Exact,
            "contains" => Self::Contains,
            "not" => Self::Not,
            "not-in" => Self::NotIn,
            "in" => Self::In,
            "below" => Self::Below,
            "identifier" => Self::Identifier,
            _ => Self::Unsupported(suffix.to_string()),
        }
    }

    /// The suffix as written in a query.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::Not => "not",
            Self::NotIn => "not-in",
            Self::In => "in",
            Self::Below => "below",
            Self::Identifier => "identifier",
            Self::Unsupported(suffix) => suffix,
        }
    }

    /// Splits `field:modifier` into its parts.
    pub fn split_field(field: &str) -> (&str, Option<SearchModifier>) {
        match field.split_once(':') {
            Some((base, suffix)) => (base, Some(Self::parse(suffix))),
            None => (field, None),
        }
    }
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A two-letter comparator in front of a number or date value.
///
/// Reference: https://build.fhir.org/search.html#prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal; the implied prefix.
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Strictly greater.
    Gt,
    /// Strictly less.
    Lt,
    /// Greater or equal.
    Ge,
    /// Less or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately.
    Ap,
}

impl SearchPrefix {
    /// Every prefix, in FHIR's listing order.
    pub const ALL: [SearchPrefix; 9] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Lt,
        Self::Ge,
        Self::Le,
        Self::Sa,
        Self::Eb,
        Self::Ap,
    ];

    /// The two-letter code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Le => "le",
            Self::Sa => "sa",
            Self::Eb => "eb",
            Self::Ap => "ap",
        }
    }
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|prefix| prefix.as_str() == code)
            .ok_or_else(|| format!("not a search prefix: {}", code))
    }
}

/// Direction of one `_sort` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

impl SortDirection {
    /// Returns the engine's spelling of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// Relevance pseudo-field.
pub const SCORE_FIELD: &str = "_score";

/// One `_sort` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    /// Element path sorted on.
    pub field: String,
    /// Ascending or descending.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses one entry; a leading `-` sorts descending.
    ///
    /// `_score` has inverted polarity: a bare `_score` sorts by descending
    /// relevance and `-_score` by ascending relevance.
    pub fn parse(entry: &str) -> Option<Self> {
        let (field, flipped) = match entry.strip_prefix('-') {
            Some(stripped) => (stripped.trim(), true),
            None => (entry.trim(), false),
        };
        if field.is_empty() {
            return None;
        }
        let descending = if field == SCORE_FIELD { !flipped } else { flipped };
        Some(Self {
            field: field.to_string(),
            direction: if descending {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            },
        })
    }
}

/// `_summary` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    /// Drop narrative, contained resources and extensions.
    True,
    /// Whole resources.
    False,
    /// Narrative, id and meta only.
    Text,
    /// Everything except the narrative.
    Data,
    /// Total only, no entries.
    Count,
}

impl FromStr for SummaryMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "true" => Self::True,
            "false" => Self::False,
            "text" => Self::Text,
            "data" => Self::Data,
            "count" => Self::Count,
            _ => return Err(format!("not a _summary mode: {}", value)),
        })
    }
}

/// Direction in which an inclusion follows references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludeType {
    /// `_include`: resources the matches point at.
    Include,
    /// `_revinclude`: resources pointing at the matches.
    Revinclude,
}

impl IncludeType {
    /// Name of the query parameter.
    pub fn parameter_name(&self) -> &'static str {
        match self {
            IncludeType::Include => "_include",
            IncludeType::Revinclude => "_revinclude",
        }
    }
}

/// A parsed `_include` / `_revinclude` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    /// Forward or reverse.
    pub include_type: IncludeType,
    /// Type holding the reference element.
    pub source_type: String,
    /// Reference element followed.
    pub search_param: String,
    /// Only references to this type are followed.
    pub target_type: Option<String>,
}

impl IncludeDirective {
    /// Parses `ResourceType:searchParam[:TargetType]`.
    pub fn parse(include_type: IncludeType, value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.split(':').collect();
        if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.trim().is_empty()) {
            return None;
        }
        Some(Self {
            include_type,
            source_type: parts[0].trim().to_string(),
            search_param: parts[1].trim().to_string(),
            target_type: parts.get(2).map(|t| t.trim().to_string()),
        })
    }

    /// Returns the element path holding the literal reference.
    pub fn reference_path(&self) -> String {
        format!("{}.reference", self.search_param)
    }

    /// Returns true if a reference to `resource_type` passes the target filter.
    pub fn accepts_target(&self, resource_type: &str) -> bool {
        self.target_type
            .as_deref()
            .is_none_or(|target| target == resource_type)
    }
}
