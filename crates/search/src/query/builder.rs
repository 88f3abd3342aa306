//! Composition of element predicates into AND/OR trees.

use super::{QueryExpr, compile_element};
use crate::error::ParseResult;
use crate::types::CoreArg;

/// Compiles one predicate group.
///
/// `Any` groups become an OR over their values, `All` groups an AND. A group
/// with a single `All` value compiles to the bare leaf.
pub fn compile_simple(arg: &CoreArg) -> ParseResult<QueryExpr> {
    let field = arg.field();
    let mut leaves = arg
        .values()
        .iter()
        .map(|value| compile_element(field, value))
        .collect::<ParseResult<Vec<_>>>()?;

    Ok(match arg {
        _ if leaves.is_empty() => QueryExpr::MatchAll,
        CoreArg::Any { .. } => QueryExpr::Or(leaves),
        CoreArg::All { .. } if leaves.len() == 1 => leaves.remove(0),
        CoreArg::All { .. } => QueryExpr::And(leaves),
    })
}

/// Compiles the full predicate list; groups are ANDed together.
pub fn compile_core(args: &[CoreArg]) -> ParseResult<QueryExpr> {
    match args {
        [] => Ok(QueryExpr::MatchAll),
        [single] => compile_simple(single),
        _ => Ok(QueryExpr::And(
            args.iter()
                .map(compile_simple)
                .collect::<ParseResult<Vec<_>>>()?,
        )),
    }
}

/// ANDs `restrictions` onto an already compiled query.
pub fn restrict(query: QueryExpr, restrictions: Vec<QueryExpr>) -> QueryExpr {
    let mut clauses = match query {
        QueryExpr::MatchAll => Vec::new(),
        QueryExpr::And(children) => children,
        other => vec![other],
    };
    clauses.extend(restrictions);

    match clauses.len() {
        0 => QueryExpr::MatchAll,
        1 => clauses.remove(0),
        _ => QueryExpr::And(clauses),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::RangeOp;

    #[test]
    fn test_comma_values_are_ored() {
        let expr = compile_simple(&CoreArg::any("language", ["NL", "EN"])).unwrap();
        assert_eq!(
            expr,
            QueryExpr::Or(vec![
                QueryExpr::phrase("language", "NL"),
                QueryExpr::phrase("language", "EN"),
            ])
        );
    }

    #[test]
    fn test_repeated_values_are_anded() {
        let arg = CoreArg::All {
            field: "birthDate".to_string(),
            values: vec!["ge1970-01-01".to_string(), "lt1980-01-01".to_string()],
        };
        assert_eq!(
            compile_simple(&arg).unwrap(),
            QueryExpr::And(vec![
                QueryExpr::range("birthDate", RangeOp::Gte, "1970-01-01"),
                QueryExpr::range("birthDate", RangeOp::Lt, "1980-01-01"),
            ])
        );
    }

    #[test]
    fn test_single_value_is_bare_leaf() {
        assert_eq!(
            compile_simple(&CoreArg::all("family", "Smith")).unwrap(),
            QueryExpr::phrase("family", "Smith")
        );
    }

    #[test]
    fn test_empty_group_matches_all() {
        let arg = CoreArg::All {
            field: "family".to_string(),
            values: Vec::new(),
        };
        assert_eq!(compile_simple(&arg).unwrap(), QueryExpr::MatchAll);
    }

    #[test]
    fn test_compile_core_shapes() {
        assert_eq!(compile_core(&[]).unwrap(), QueryExpr::MatchAll);

        let one = [CoreArg::all("gender", "female")];
        assert_eq!(
            compile_core(&one).unwrap(),
            QueryExpr::phrase("gender", "female")
        );

        let two = [
            CoreArg::all("gender", "female"),
            CoreArg::any("language", ["FR", "NL"]),
        ];
        match compile_core(&two).unwrap() {
            QueryExpr::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], QueryExpr::Or(_)));
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_core_propagates_modifier_errors() {
        let args = [CoreArg::all("code:of-type", "x")];
        assert!(compile_core(&args).is_err());
    }

    #[test]
    fn test_restrict_appends_literal_clauses() {
        let ids = QueryExpr::terms("id", ["le1"]);
        assert_eq!(restrict(QueryExpr::MatchAll, vec![ids.clone()]), ids);

        let family = QueryExpr::phrase("family", "Smith");
        assert_eq!(
            restrict(family.clone(), vec![ids.clone()]),
            QueryExpr::And(vec![family.clone(), ids.clone()])
        );

        let both = QueryExpr::And(vec![family.clone(), QueryExpr::phrase("gender", "male")]);
        let restricted = restrict(both, vec![ids.clone()]);
        assert_eq!(
            restricted,
            QueryExpr::And(vec![family, QueryExpr::phrase("gender", "male"), ids])
        );
        assert_eq!(restrict(QueryExpr::MatchAll, Vec::new()), QueryExpr::MatchAll);
    }
}
