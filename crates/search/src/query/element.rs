//! Compilation of a single `(field, value)` pair into a leaf predicate.

use std::sync::LazyLock;

use regex::Regex;

use super::{QueryExpr, RangeOp};
use crate::error::{ParseError, ParseResult};
use crate::escape::{split_unescaped, unescape};
use crate::types::{SearchModifier, SearchPrefix};

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("number grammar is valid")
});

static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\d{4}(-\d{2}(-\d{2}(T\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?)?)?)?$",
    )
    .expect("date grammar is valid")
});

/// Free-text pseudo-parameters.
const FULL_TEXT_PARAMS: &[&str] = &["_text", "_content"];

/// Returns true if `value` is a plain integer or decimal literal.
pub fn is_numeric_literal(value: &str) -> bool {
    NUMBER.is_match(value)
}

fn is_date_literal(value: &str) -> bool {
    DATE.is_match(value)
}

/// Splits a comparison prefix off `value`.
///
/// The prefix is only recognised when the remainder is a number or a FHIR
/// date/dateTime, so `eqpatient` keeps its leading `eq`.
pub fn check_prefix(value: &str) -> (Option<SearchPrefix>, &str) {
    if value.len() > 2 && value.is_char_boundary(2) {
        let (head, rest) = value.split_at(2);
        if let Ok(prefix) = head.parse::<SearchPrefix>() {
            if is_numeric_literal(rest) || is_date_literal(rest) {
                return (Some(prefix), rest);
            }
        }
    }
    (None, value)
}

/// Compiles one field predicate.
///
/// The field may carry a `:modifier` suffix; `_id` targets the `id` element.
/// The value type is inferred in this order: numeric literal, prefixed
/// number/date, modifier, `system|code` token, plain phrase.
pub fn compile_element(field: &str, value: &str) -> ParseResult<QueryExpr> {
    let (base, modifier) = SearchModifier::split_field(field);
    let base = if base == "_id" { "id" } else { base };

    if FULL_TEXT_PARAMS.contains(&base) {
        return Ok(QueryExpr::FullText {
            text: unescape(value),
        });
    }

    if let Some(SearchModifier::Unsupported(name)) = &modifier {
        return Err(ParseError::UnsupportedModifier {
            parameter: base.to_string(),
            modifier: name.clone(),
        });
    }

    if is_numeric_literal(value) {
        return Ok(QueryExpr::matches(base, value));
    }

    if let (Some(prefix), rest) = check_prefix(value) {
        return Ok(compile_prefixed(base, prefix, rest));
    }

    let text = unescape(value);

    if let Some(modifier) = modifier {
        return Ok(compile_modified(base, modifier, &text));
    }

    let token = split_unescaped(value, '|');
    if let [system, code] = token.as_slice() {
        if let Some(expr) = compile_token(base, &unescape(system), &unescape(code)) {
            return Ok(expr);
        }
    }

    Ok(QueryExpr::phrase(base, text))
}

fn compile_prefixed(field: &str, prefix: SearchPrefix, value: &str) -> QueryExpr {
    match prefix {
        SearchPrefix::Eq => QueryExpr::matches(field, value),
        SearchPrefix::Ne => QueryExpr::Negated {
            field: field.to_string(),
            text: value.to_string(),
        },
        SearchPrefix::Gt | SearchPrefix::Sa => QueryExpr::range(field, RangeOp::Gt, value),
        SearchPrefix::Lt | SearchPrefix::Eb => QueryExpr::range(field, RangeOp::Lt, value),
        SearchPrefix::Ge => QueryExpr::range(field, RangeOp::Gte, value),
        SearchPrefix::Le => QueryExpr::range(field, RangeOp::Lte, value),
        SearchPrefix::Ap => approximate(field, value),
    }
}

/// `ap` on a number is a +/-10% window; on a date it is an equality match.
fn approximate(field: &str, value: &str) -> QueryExpr {
    if !is_numeric_literal(value) {
        return QueryExpr::matches(field, value);
    }
    match value.parse::<f64>() {
        Ok(n) => {
            let delta = n.abs() * 0.1;
            QueryExpr::And(vec![
                QueryExpr::range(field, RangeOp::Gte, (n - delta).to_string()),
                QueryExpr::range(field, RangeOp::Lte, (n + delta).to_string()),
            ])
        }
        Err(_) => QueryExpr::matches(field, value),
    }
}

fn compile_modified(field: &str, modifier: SearchModifier, value: &str) -> QueryExpr {
    match modifier {
        SearchModifier::Contains => QueryExpr::Wildcard {
            field: field.to_string(),
            pattern: format!("*{}*", escape_wildcard(value)),
        },
        SearchModifier::Below => QueryExpr::Wildcard {
            field: field.to_string(),
            pattern: format!("{}*", escape_wildcard(value)),
        },
        SearchModifier::Exact => QueryExpr::Exact {
            field: field.to_string(),
            value: value.to_string(),
        },
        SearchModifier::Not | SearchModifier::NotIn => QueryExpr::Negated {
            field: field.to_string(),
            text: value.to_string(),
        },
        SearchModifier::In => QueryExpr::phrase(field, value),
        SearchModifier::Identifier => QueryExpr::phrase(format!("{}.identifier.value", field), value),
        // rejected before dispatch
        SearchModifier::Unsupported(_) => QueryExpr::phrase(field, value),
    }
}

/// `system|code`, `system|` or `|code`.
///
/// An empty system does not restrict to codes without a system.
fn compile_token(field: &str, system: &str, code: &str) -> Option<QueryExpr> {
    let system_clause = QueryExpr::phrase(format!("{}.system", field), system);
    let code_clause = QueryExpr::Phrase {
        fields: vec![format!("{}.code", field), format!("{}.value", field)],
        text: code.to_string(),
    };

    match (system.is_empty(), code.is_empty()) {
        (false, false) => Some(QueryExpr::And(vec![system_clause, code_clause])),
        (false, true) => Some(system_clause),
        (true, false) => Some(code_clause),
        (true, true) => None,
    }
}

fn escape_wildcard(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
