//! Error types for the search layer.
//!
//! Errors are organised in two families: [`ParseError`] for problems found while
//! turning raw query parameters into search arguments, and [`EngineError`] for
//! failures reported by (or while talking to) the search engine. Both roll up
//! into [`SearchError`], which the orchestrator converts into an
//! `OperationOutcome` envelope.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::bundle::{EnvelopeError, IssueType};

/// The primary error type for search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Malformed search parameters.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Search engine failures.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The requested resource type is not a FHIR resource.
    #[error("unsupported FHIR resource: \"{resource_type}\"")]
    UnsupportedResourceType { resource_type: String },

    /// The result envelope was driven out of order.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A `_has` stage matched more resources than it may read.
    #[error(
        "_has parameter '{parameter}' matched {matched} {resource_type} resources, more than the limit of {limit}"
    )]
    ChainTooBroad {
        parameter: String,
        resource_type: String,
        matched: u64,
        limit: u32,
    },

    /// The parameter does not exist for the resource type.
    #[error("unknown search parameter '{parameter}' for resource type {resource_type}")]
    UnknownParameter {
        resource_type: String,
        parameter: String,
    },
}

/// Errors raised while parsing raw search parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The parameter payload was not a key/value mapping.
    #[error("search parameters must be a mapping of names to values")]
    NotAMapping,

    /// `_include` / `_revinclude` value is not `ResourceType:searchParam[:TargetType]`.
    #[error("invalid {directive} value '{value}': expected ResourceType:searchParam[:TargetType]")]
    InvalidInclude { directive: String, value: String },

    /// `_has` key is malformed.
    #[error("invalid _has parameter '{parameter}': {message}")]
    InvalidReverseChain { parameter: String, message: String },

    /// `_has` nests more hops than supported.
    #[error("_has parameter '{parameter}' nests more than {max_depth} reverse chains")]
    ReverseChainTooDeep { parameter: String, max_depth: usize },

    /// A paging parameter is not a non-negative integer.
    #[error("invalid {parameter} value '{value}': expected a non-negative integer")]
    InvalidPaging { parameter: String, value: String },

    /// Unknown `_summary` value.
    #[error("invalid _summary value '{value}': expected true, false, text, data or count")]
    InvalidSummary { value: String },

    /// Empty `_sort` entry.
    #[error("invalid _sort value '{value}'")]
    InvalidSort { value: String },

    /// Modifier is not supported by the query compiler.
    #[error("unsupported modifier ':{modifier}' on parameter '{parameter}'")]
    UnsupportedModifier { parameter: String, modifier: String },
}

/// Errors raised by a search engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No index exists for the resource type.
    #[error("no search index exists for resource type {resource_type}")]
    IndexNotFound { resource_type: String },

    /// The engine refused the compiled query.
    #[error("search engine '{engine_name}' rejected the query: {message}")]
    QueryRejected {
        engine_name: String,
        message: String,
    },

    /// The engine refused the credentials.
    #[error("search engine '{engine_name}' denied access: {message}")]
    Unauthorized {
        engine_name: String,
        message: String,
    },

    /// The engine could not be reached.
    #[error("search engine '{engine_name}' unavailable: {message}")]
    Unavailable {
        engine_name: String,
        message: String,
    },

    /// A round trip exceeded the configured deadline.
    #[error("search engine round trip timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Anything else, including unreadable responses.
    #[error("internal error in search engine '{engine_name}': {message}")]
    Internal {
        engine_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Coarse classification used to pick the OperationOutcome issue code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller sent something malformed.
    BadRequest,
    /// The caller referenced something that does not exist.
    NotFound,
    /// The engine rejected the compiled query.
    Validation,
    /// The engine failed.
    EngineFault,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::BadRequest => write!(f, "bad-request"),
            ErrorCategory::NotFound => write!(f, "not-found"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::EngineFault => write!(f, "engine-fault"),
        }
    }
}

impl SearchError {
    /// Returns the taxonomy bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SearchError::Parse(_)
            | SearchError::UnsupportedResourceType { .. }
            | SearchError::ChainTooBroad { .. } => ErrorCategory::BadRequest,
            SearchError::UnknownParameter { .. } => ErrorCategory::NotFound,
            SearchError::Envelope(_) => ErrorCategory::EngineFault,
            SearchError::Engine(e) => match e {
                EngineError::IndexNotFound { .. } => ErrorCategory::NotFound,
                EngineError::QueryRejected { .. } => ErrorCategory::Validation,
                _ => ErrorCategory::EngineFault,
            },
        }
    }

    /// Returns the OperationOutcome issue code reported for this error.
    pub fn issue_type(&self) -> IssueType {
        match self {
            SearchError::Parse(ParseError::UnsupportedModifier { .. }) => IssueType::NotSupported,
            SearchError::Parse(_) | SearchError::UnsupportedResourceType { .. } => {
                IssueType::Invalid
            }
            SearchError::UnknownParameter { .. } => IssueType::NotFound,
            SearchError::ChainTooBroad { .. } => IssueType::TooCostly,
            SearchError::Envelope(_) => IssueType::Exception,
            SearchError::Engine(e) => match e {
                EngineError::IndexNotFound { .. } => IssueType::NotFound,
                EngineError::QueryRejected { .. } => IssueType::Invalid,
                EngineError::Unauthorized { .. } => IssueType::Security,
                EngineError::Timeout { .. } => IssueType::Timeout,
                EngineError::Unavailable { .. } => IssueType::Transient,
                EngineError::Internal { .. } => IssueType::Exception,
            },
        }
    }
}

impl EngineError {
    /// Creates an internal error without an underlying cause.
    pub fn internal(engine_name: &str, message: impl Into<String>) -> Self {
        EngineError::Internal {
            engine_name: engine_name.to_string(),
            message: message.into(),
            source: None,
        }
    }
}

/// Result type alias for search operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// Result type alias for engine round trips.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for parameter parsing.
pub type ParseResult<T> = Result<T, ParseError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal {
            engine_name: "unknown".to_string(),
            message: format!("serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}
