//! # helios-search - FHIR Search for Elasticsearch
//!
//! This crate turns FHIR search requests (`GET /Patient?name=smith&_count=10`)
//! into Elasticsearch queries, runs them and assembles a `searchset` Bundle
//! (or an `OperationOutcome` when something goes wrong).
//!
//! ## Features
//!
//! - **Parameter grouping**: repeated keys are ANDed, comma-separated values
//!   are ORed, `\,` escapes a literal comma
//! - **Type inference**: numbers, dates with `eq`/`ne`/`gt`/`lt`/`ge`/`le`/
//!   `sa`/`eb`/`ap` prefixes, `system|code` tokens and plain strings each get
//!   the appropriate query
//! - **Modifiers**: `:exact`, `:contains`, `:not`, `:not-in`, `:in`,
//!   `:below`, `:identifier`
//! - **Reverse chaining**: `_has`, up to two hops
//! - **Includes**: `_include` and `_revinclude`
//! - **Result shaping**: `_sort`, `_count`, `_offset`, `_summary`,
//!   `_elements`
//!
//! ## Engines
//!
//! Queries run through the [`SearchEngine`] trait:
//!
//! - `elasticsearch` feature (default) - [`ElasticsearchEngine`]
//! - [`MemoryEngine`] - in-process evaluation, for tests and embedding
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use helios_search::{
//!     ElasticsearchConfig, ElasticsearchEngine, QueryParams, SearchConfig,
//!     SearchOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     helios_search::init_logging("info");
//!
//!     let engine = ElasticsearchEngine::new(ElasticsearchConfig::default())?;
//!     let orchestrator = SearchOrchestrator::new(Arc::new(engine), SearchConfig::from_env());
//!
//!     let params = QueryParams::from_query_string("_has:Observation:patient:code=8302-2");
//!     let bundle = orchestrator.search("Patient", &params).await;
//!     println!("{}", bundle.to_json());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bundle;
pub mod config;
pub mod engine;
pub mod error;
mod escape;
pub mod include;
pub mod orchestrator;
pub mod parser;
pub mod path;
pub mod query;
pub mod reference;
pub mod reverse_chain;
pub mod types;

// Re-export commonly used types at crate root
pub use bundle::{BundleEntry, EnvelopeError, Issue, IssueSeverity, IssueType, ResultEnvelope, SearchMode};
pub use config::SearchConfig;
pub use error::{EngineError, ErrorCategory, ParseError, SearchError, SearchResult};
pub use orchestrator::SearchOrchestrator;
pub use parser::parse_search_arguments;
pub use query::QueryExpr;
pub use reverse_chain::ReverseChain;
pub use types::{CoreArg, Formatting, Paging, QueryParams, SearchArguments};

// Re-export engines
#[cfg(feature = "elasticsearch")]
pub use engine::{ElasticsearchAuth, ElasticsearchConfig, ElasticsearchEngine};
pub use engine::{EngineHits, EngineRequest, EngineResponse, MemoryEngine, SearchEngine};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` takes precedence; otherwise this crate logs at `level`
/// (error, warn, info, debug, trace). Call once at startup.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_search={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
