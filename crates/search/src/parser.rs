//! Turns raw query parameters into [`SearchArguments`].
//!
//! Grouping rules:
//! - a value with an unescaped comma becomes its own OR group (`Any`)
//! - repeated occurrences of a key accumulate into one AND group (`All`)
//!
//! Reserved parameters (`_sort`, `_count`, `_offset`, `_summary`,
//! `_elements`, `_include`, `_revinclude`, `_type`, `_has:*`) are then peeled
//! off into formatting, paging and reverse chains. Everything else is a field
//! predicate.

use crate::error::{ParseError, ParseResult};
use crate::escape::{split_unescaped, unescape};
use crate::reverse_chain::ReverseChain;
use crate::types::{
    CoreArg, Formatting, IncludeDirective, IncludeType, NON_SUMMARY_ELEMENTS, Paging, QueryParams,
    SearchArguments, SortDirective, SummaryMode, TEXT_SUMMARY_ELEMENTS,
};

const SORT: &str = "_sort";
const COUNT: &str = "_count";
const OFFSET: &str = "_offset";
const SUMMARY: &str = "_summary";
const ELEMENTS: &str = "_elements";
const TYPE: &str = "_type";

/// Parses `params` for a search on `resource_type`.
pub fn parse_search_arguments(
    resource_type: &str,
    params: &QueryParams,
) -> ParseResult<SearchArguments> {
    let mut args = SearchArguments::new(resource_type);
    let mut groups = group_params(params);

    let sort = take_values(&mut groups, SORT);
    let count = take_values(&mut groups, COUNT);
    let offset = take_values(&mut groups, OFFSET);
    let summary = take_values(&mut groups, SUMMARY);
    let elements = take_values(&mut groups, ELEMENTS);
    let include = take_values(&mut groups, IncludeType::Include.parameter_name());
    let revinclude = take_values(&mut groups, IncludeType::Revinclude.parameter_name());
    take_values(&mut groups, TYPE);

    let (chains, core_args): (Vec<CoreArg>, Vec<CoreArg>) = groups
        .into_iter()
        .partition(|arg| ReverseChain::is_reverse_chain(arg.field()));

    args.core_args = core_args;
    args.reverse_chains = chains
        .iter()
        .map(ReverseChain::parse)
        .collect::<ParseResult<Vec<_>>>()?;

    args.formatting = parse_formatting(sort, summary, elements, include, revinclude)?;
    args.paging = parse_paging(count, offset, &mut args.formatting)?;

    Ok(args)
}

/// Groups raw pairs into AND/OR predicate groups, preserving arrival order.
pub fn group_params(params: &QueryParams) -> Vec<CoreArg> {
    let mut groups: Vec<CoreArg> = Vec::new();

    for (key, value) in params.iter() {
        let parts = split_unescaped(value, ',');
        if parts.len() > 1 {
            groups.push(CoreArg::Any {
                field: key.to_string(),
                values: parts,
            });
            continue;
        }

        let value = parts.into_iter().next().unwrap_or_default();
        let existing = groups
            .iter()
            .position(|group| matches!(group, CoreArg::All { field, .. } if field == key));
        match existing {
            Some(i) => {
                if let CoreArg::All { values, .. } = &mut groups[i] {
                    values.push(value);
                }
            }
            None => groups.push(CoreArg::all(key, value)),
        }
    }

    groups
}

/// Removes every group for `name` and returns their values, flattened, in
/// arrival order. Returns `None` when the parameter is absent.
fn take_values(groups: &mut Vec<CoreArg>, name: &str) -> Option<Vec<String>> {
    let mut values = Vec::new();
    let mut found = false;
    groups.retain(|group| {
        if group.field() == name {
            found = true;
            values.extend(group.values().iter().map(|v| unescape(v)));
            false
        } else {
            true
        }
    });
    found.then_some(values)
}

fn parse_formatting(
    sort: Option<Vec<String>>,
    summary: Option<Vec<String>>,
    elements: Option<Vec<String>>,
    include: Option<Vec<String>>,
    revinclude: Option<Vec<String>>,
) -> ParseResult<Formatting> {
    let mut formatting = Formatting::default();

    if let Some(entries) = sort {
        let directives = entries
            .iter()
            .map(|entry| {
                SortDirective::parse(entry).ok_or_else(|| ParseError::InvalidSort {
                    value: entry.clone(),
                })
            })
            .collect::<ParseResult<Vec<_>>>()?;
        formatting.sort = Some(directives);
    }

    if let Some(fields) = elements {
        let fields: Vec<String> = fields
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if !fields.is_empty() {
            formatting.elements = Some(fields);
        }
    }

    // the last _summary wins
    if let Some(value) = summary.and_then(|values| values.into_iter().last()) {
        let mode = value
            .parse::<SummaryMode>()
            .map_err(|_| ParseError::InvalidSummary { value })?;
        apply_summary(&mut formatting, mode);
    }

    formatting.include = include
        .map(|values| parse_includes(IncludeType::Include, &values))
        .transpose()?;
    formatting.revinclude = revinclude
        .map(|values| parse_includes(IncludeType::Revinclude, &values))
        .transpose()?;

    Ok(formatting)
}

fn apply_summary(formatting: &mut Formatting, mode: SummaryMode) {
    formatting.summary_mode = Some(mode);
    match mode {
        SummaryMode::False => {}
        SummaryMode::True => {
            formatting.summary = true;
            formatting.excludes = NON_SUMMARY_ELEMENTS.iter().map(|e| e.to_string()).collect();
        }
        SummaryMode::Data => {
            formatting.summary = true;
            formatting.excludes = vec!["text".to_string()];
        }
        SummaryMode::Text => {
            formatting.summary = true;
            formatting.elements = Some(TEXT_SUMMARY_ELEMENTS.iter().map(|e| e.to_string()).collect());
        }
        SummaryMode::Count => {
            formatting.summary = true;
            formatting.is_summary_count = true;
        }
    }
}

fn parse_includes(include_type: IncludeType, values: &[String]) -> ParseResult<Vec<IncludeDirective>> {
    values
        .iter()
        .map(|value| {
            IncludeDirective::parse(include_type, value).ok_or_else(|| ParseError::InvalidInclude {
                directive: include_type.parameter_name().to_string(),
                value: value.clone(),
            })
        })
        .collect()
}

fn parse_paging(
    count: Option<Vec<String>>,
    offset: Option<Vec<String>>,
    formatting: &mut Formatting,
) -> ParseResult<Paging> {
    let mut paging = Paging::default();

    if let Some(value) = count.and_then(|values| values.into_iter().last()) {
        paging.result_size = parse_non_negative(COUNT, &value)?;
        if paging.result_size == 0 {
            formatting.is_summary_count = true;
        }
    }

    if let Some(value) = offset.and_then(|values| values.into_iter().last()) {
        paging.offset = parse_non_negative(OFFSET, &value)?;
    }

    Ok(paging)
}

fn parse_non_negative(parameter: &str, value: &str) -> ParseResult<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidPaging {
            parameter: parameter.to_string(),
            value: value.to_string(),
        })
}
