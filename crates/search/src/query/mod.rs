//! Engine query expressions.
//!
//! [`QueryExpr`] is the compiled form of a search: a small boolean tree whose
//! leaves are the predicate kinds the compiler can emit. It is built by
//! [`compile_element`] / [`compile_core`] and serialised exactly once, by
//! [`QueryExpr::to_query_dsl`], into Elasticsearch query DSL.

mod builder;
mod element;

pub use builder::{compile_core, compile_simple, restrict};
pub use element::{check_prefix, compile_element, is_numeric_literal};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Unanalysed sub-field queried by `:exact`.
pub const EXACT_SUBFIELD: &str = "exact";

/// Range comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeOp {
    /// Strictly greater.
    Gt,
    /// Strictly less.
    Lt,
    /// Greater or equal.
    Gte,
    /// Less or equal.
    Lte,
}

impl RangeOp {
    /// Returns the engine's spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeOp::Gt => "gt",
            RangeOp::Lt => "lt",
            RangeOp::Gte => "gte",
            RangeOp::Lte => "lte",
        }
    }
}

/// A compiled search predicate.
// Leaf fields mirror the DSL they serialise to
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    /// Analysed match of a single value.
    Match { field: String, value: String },
    /// Ordered comparison.
    Range {
        field: String,
        op: RangeOp,
        value: String,
    },
    /// Phrase match against one or more fields.
    Phrase { fields: Vec<String>, text: String },
    /// Unanalysed term match.
    Exact { field: String, value: String },
    /// Keyword field equal to any of the literal values.
    Terms { field: String, values: Vec<String> },
    /// Case-insensitive glob match.
    Wildcard { field: String, pattern: String },
    /// Excludes documents where the phrase matches.
    Negated { field: String, text: String },
    /// Free text over the whole document.
    FullText { text: String },
    /// Every child must match.
    And(Vec<QueryExpr>),
    /// At least one child must match.
    Or(Vec<QueryExpr>),
    /// Matches everything.
    MatchAll,
}

impl QueryExpr {
    /// Phrase match against a single field.
    pub fn phrase(field: impl Into<String>, text: impl Into<String>) -> Self {
        QueryExpr::Phrase {
            fields: vec![field.into()],
            text: text.into(),
        }
    }

    /// Analysed match.
    pub fn matches(field: impl Into<String>, value: impl Into<String>) -> Self {
        QueryExpr::Match {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Literal membership test; values are not interpreted.
    pub fn terms<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryExpr::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Range comparison.
    pub fn range(field: impl Into<String>, op: RangeOp, value: impl Into<String>) -> Self {
        QueryExpr::Range {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Serialises the expression to Elasticsearch query DSL.
    pub fn to_query_dsl(&self) -> Value {
        match self {
            QueryExpr::Match { field, value } => json!({ "match": { field: value } }),
            QueryExpr::Range { field, op, value } => {
                json!({ "range": { field: { op.as_str(): value } } })
            }
            QueryExpr::Phrase { fields, text } => match fields.as_slice() {
                [field] => json!({ "match_phrase": { field: text } }),
                _ => json!({
                    "multi_match": {
                        "query": text,
                        "type": "phrase",
                        "fields": fields
                    }
                }),
            },
            QueryExpr::Exact { field, value } => {
                json!({ "term": { format!("{}.{}", field, EXACT_SUBFIELD): value } })
            }
            QueryExpr::Terms { field, values } => json!({ "terms": { field: values } }),
            QueryExpr::Wildcard { field, pattern } => json!({
                "wildcard": {
                    field: {
                        "value": pattern,
                        "case_insensitive": true
                    }
                }
            }),
            QueryExpr::Negated { field, text } => json!({
                "bool": {
                    "must_not": [{ "match_phrase": { field: text } }]
                }
            }),
            QueryExpr::FullText { text } => json!({
                "simple_query_string": {
                    "query": text,
                    "fields": ["*"],
                    "default_operator": "and"
                }
            }),
            QueryExpr::And(children) => json!({
                "bool": {
                    "must": children.iter().map(QueryExpr::to_query_dsl).collect::<Vec<_>>()
                }
            }),
            QueryExpr::Or(children) => json!({
                "bool": {
                    "should": children.iter().map(QueryExpr::to_query_dsl).collect::<Vec<_>>(),
                    "minimum_should_match": 1
                }
            }),
            QueryExpr::MatchAll => json!({ "match_all": {} }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_dsl() {
        let dsl = QueryExpr::matches("valueQuantity.value", "42").to_query_dsl();
        assert_eq!(dsl, json!({"match": {"valueQuantity.value": "42"}}));
    }

    #[test]
    fn test_range_dsl() {
        let dsl = QueryExpr::range("birthDate", RangeOp::Gte, "1974-12-25").to_query_dsl();
        assert_eq!(dsl, json!({"range": {"birthDate": {"gte": "1974-12-25"}}}));
    }

    #[test]
    fn test_phrase_dsl_single_and_multi_field() {
        let single = QueryExpr::phrase("family", "van Dyke").to_query_dsl();
        assert_eq!(single, json!({"match_phrase": {"family": "van Dyke"}}));

        let multi = QueryExpr::Phrase {
            fields: vec!["code.code".to_string(), "code.value".to_string()],
            text: "8302-2".to_string(),
        }
        .to_query_dsl();
        let s = serde_json::to_string(&multi).unwrap();
        assert!(s.contains("multi_match"));
        assert!(s.contains("\"type\":\"phrase\""));
        assert!(s.contains("code.value"));
    }

    #[test]
    fn test_wildcard_dsl_is_case_insensitive() {
        let dsl = QueryExpr::Wildcard {
            field: "name.family".to_string(),
            pattern: "*mit*".to_string(),
        }
        .to_query_dsl();
        assert_eq!(dsl["wildcard"]["name.family"]["value"], "*mit*");
        assert_eq!(dsl["wildcard"]["name.family"]["case_insensitive"], true);
    }

    #[test]
    fn test_negated_dsl() {
        let dsl = QueryExpr::Negated {
            field: "gender".to_string(),
            text: "male".to_string(),
        }
        .to_query_dsl();
        assert_eq!(
            dsl,
            json!({"bool": {"must_not": [{"match_phrase": {"gender": "male"}}]}})
        );
    }

    #[test]
    fn test_bool_dsl() {
        let and = QueryExpr::And(vec![QueryExpr::MatchAll, QueryExpr::MatchAll]).to_query_dsl();
        assert_eq!(and["bool"]["must"].as_array().unwrap().len(), 2);

        let or = QueryExpr::Or(vec![QueryExpr::phrase("language", "NL")]).to_query_dsl();
        assert_eq!(or["bool"]["minimum_should_match"], 1);
        assert_eq!(or["bool"]["should"][0]["match_phrase"]["language"], "NL");
    }

    #[test]
    fn test_full_text_and_exact_dsl() {
        let text = QueryExpr::FullText {
            text: "headache".to_string(),
        }
        .to_query_dsl();
        assert_eq!(text["simple_query_string"]["query"], "headache");

        let exact = QueryExpr::Exact {
            field: "family".to_string(),
            value: "Smith".to_string(),
        }
        .to_query_dsl();
        assert_eq!(exact, json!({"term": {"family.exact": "Smith"}}));
    }

    #[test]
    fn test_terms_dsl_keeps_values_literal() {
        let dsl = QueryExpr::terms("id", ["ge2020", "p9"]).to_query_dsl();
        assert_eq!(dsl, json!({"terms": {"id": ["ge2020", "p9"]}}));
    }

    #[test]
    fn test_match_all_dsl() {
        assert_eq!(QueryExpr::MatchAll.to_query_dsl(), json!({"match_all": {}}));
    }
}
