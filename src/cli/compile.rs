//! Compile filters against a schema file and run them on JSON data

use tracing::{debug, info};

use super::CliError;
use crate::ast::{Filter, Query};
use crate::parser::parse_filter;
use crate::pipeline::CompiledQuery;
use crate::schema::{CheckMessage, Schema};
use crate::store::{MemoryStore, Store};
use crate::value::Value;
use crate::{Compiler, CompilerConfig};

/// Options shared by `compile` and `run`
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Schema file contents (a JSON array of models)
    pub schema: String,
    /// Compiler configuration file contents
    pub config: Option<String>,
    /// Model to query
    pub model: String,
    /// Filter in the text filter language
    pub filter: Option<String>,
    /// Lookup paths to return instead of the model's fields
    pub values: Vec<String>,
    /// Lookup paths to order by; a leading `-` sorts descending
    pub order_by: Vec<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// Options for the run command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub compile: CompileOptions,
    /// JSON object mapping collection names to arrays of documents
    pub data: Option<String>,
}

fn load_schema(text: &str) -> Result<Schema, CliError> {
    let schema = Schema::from_json(text)?;
    schema.validate()?;
    Ok(schema)
}

fn build_query(options: &CompileOptions) -> Result<Query, CliError> {
    let mut query = Query::new(options.model.as_str());
    if let Some(text) = options.filter.as_deref().filter(|t| !t.trim().is_empty()) {
        let filter: Filter = parse_filter(text)?;
        query = query.filter(filter);
    }
    if !options.values.is_empty() {
        query = query.values(options.values.iter().cloned());
    }
    for order in &options.order_by {
        query = query.order_by(order.as_str());
    }
    if let Some(offset) = options.offset {
        query = query.offset(offset);
    }
    if let Some(limit) = options.limit {
        query = query.limit(limit);
    }
    Ok(query)
}

/// Parse and compile the filter described by `options`
pub fn execute_compile(options: &CompileOptions) -> Result<CompiledQuery, CliError> {
    let schema = load_schema(&options.schema)?;
    let config = match &options.config {
        Some(text) => CompilerConfig::from_json(text)?,
        None => CompilerConfig::default(),
    };
    let query = build_query(options)?;
    debug!(model = %options.model, "compiling");
    let compiled = Compiler::with_config(&schema, config).compile(&query)?;
    Ok(compiled)
}

/// Compile, then run the pipeline against in-memory data
pub fn execute_run(options: &RunOptions) -> Result<Vec<Value>, CliError> {
    let compiled = execute_compile(&options.compile)?;
    let data = options.data.as_deref().ok_or(CliError::NoData)?;
    let store = MemoryStore::from_json(data)?;
    let results: Vec<Value> = store.run(&compiled)?.collect();
    info!(collection = %compiled.collection, rows = results.len(), "ran query");
    Ok(results)
}

/// Run the definition-time checks on a schema file
pub fn check_schema(schema: &str) -> Result<Vec<CheckMessage>, CliError> {
    Ok(Schema::from_json(schema)?.check())
}
