//! Query compilation.
//!
//! [`Compiler`] turns a [`Query`] into a [`CompiledQuery`]: the collection
//! to aggregate and the ordered stages to run on it. The work is split
//! across submodules:
//!
//! - [`context`] - per-compile registries of joins, subqueries and
//!   annotations
//! - `expressions` - filters and value expressions
//! - [`join`] - `$lookup`/`$unwind` stages for relations
//! - `array` - predicates over embedded-array broadcasts
//! - `query` - stage assembly
//!
//! ```
//! use pipeql::ast::{Filter, Query};
//! use pipeql::schema::Schema;
//! use pipeql::Compiler;
//!
//! let schema = Schema::from_json(r#"[
//!     {"name": "Movie", "fields": [{"name": "title", "type": "string"}]}
//! ]"#).unwrap();
//!
//! let compiled = Compiler::new(&schema)
//!     .compile(&Query::new("Movie").filter(Filter::lookup("title", "Alien")))
//!     .unwrap();
//!
//! assert_eq!(compiled.collection, "movie");
//! assert_eq!(compiled.pipeline[0].to_string(), r#"{"$match":{"$expr":{"$eq":["$title","Alien"]}}}"#);
//! ```

pub mod context;
pub mod join;

mod array;
mod expressions;
mod query;

use tracing::debug;

use crate::ast::{Filter, Query};
use crate::config::CompilerConfig;
use crate::pipeline::{CompiledQuery, Stage};
use crate::schema::SchemaService;
use crate::value::Value;

use context::QueryContext;

/// Errors raised while compiling a query. None of them leave partial
/// output behind.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("{model} has no field named '{field}'")]
    FieldDoesNotExist { model: String, field: String },

    #[error("unsupported lookup '{name}' for {target}{}", format_suggestions(.suggestions))]
    UnsupportedLookup {
        name: String,
        target: String,
        suggestions: Vec<String>,
    },

    #[error("cannot perform multiple levels of array traversal in a query")]
    MultiLevelArrayTraversal,

    #[error(
        "cannot apply this lookup directly to an embedded model array; try querying one of its embedded fields instead"
    )]
    ArrayLookupNotAllowed,

    #[error("invalid slice '{0}': the end must be greater than the start")]
    InvalidSlice(String),

    #[error("invalid lookup path '{0}'")]
    InvalidPath(String),

    #[error("field reference '{path}' cannot end in the lookup '{lookup}'")]
    LookupInReference { path: String, lookup: &'static str },

    #[error("relational field '{field}' cannot be used inside embedded model '{model}'")]
    RelationInEmbedded { model: String, field: String },

    #[error("'{lookup}' lookup expects {expected}, got {actual}")]
    ValueShape {
        lookup: &'static str,
        expected: String,
        actual: String,
    },

    #[error("embedded model '{0}' has no collection to query")]
    EmbeddedQuery(String),

    #[error("outer reference '{0}' used outside a subquery")]
    OuterRefOutsideSubquery(String),

    #[error("subquery on '{model}' must return exactly one column, got {count}")]
    SubqueryColumns { model: String, count: usize },
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(", perhaps you meant {}?", suggestions.join(" or "))
    }
}

/// A compiled filter: the predicate plus the stages it depends on (joins
/// and subquery lookups), which must run before a `$match` on it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub stages: Vec<Stage>,
    pub expr: Value,
}

/// Compiles queries against a schema.
///
/// A compiler holds no per-query state; every call builds a fresh
/// [`QueryContext`], so one compiler can be reused for any number of
/// queries.
pub struct Compiler<'s> {
    schema: &'s dyn SchemaService,
    config: CompilerConfig,
}

impl<'s> Compiler<'s> {
    pub fn new(schema: &'s dyn SchemaService) -> Self {
        Compiler::with_config(schema, CompilerConfig::default())
    }

    pub fn with_config(schema: &'s dyn SchemaService, config: CompilerConfig) -> Self {
        Compiler { schema, config }
    }

    pub fn compile(&self, query: &Query) -> Result<CompiledQuery, CompileError> {
        let compiled = query::compile_query(self, query)?;
        debug!(
            collection = %compiled.collection,
            stages = compiled.pipeline.len(),
            "compiled query"
        );
        debug!("{}", compiled);
        Ok(compiled)
    }

    /// Compiles a filter on `model` without the rest of a query.
    pub fn compile_filter(&self, model: &str, filter: &Filter) -> Result<CompiledFilter, CompileError> {
        let model = query::queryable_model(self, model)?;
        let mut ctx = QueryContext::new(model);
        let expr = expressions::compile_filter(self, &mut ctx, filter)?;
        Ok(CompiledFilter {
            stages: query::prerequisite_stages(self, &ctx),
            expr,
        })
    }
}
