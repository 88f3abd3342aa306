//! Core types for the search layer.

mod arguments;
mod query_params;
mod resource_types;
mod search_params;

pub use arguments::{
    CoreArg, DEFAULT_COUNT, Formatting, NON_SUMMARY_ELEMENTS, Paging, SearchArguments,
    TEXT_SUMMARY_ELEMENTS,
};
pub use query_params::QueryParams;
pub use resource_types::{R4_RESOURCE_TYPES, is_resource_type};
pub use search_params::{
    IncludeDirective, IncludeType, SCORE_FIELD, SearchModifier, SearchPrefix, SortDirection,
    SortDirective, SummaryMode,
};
