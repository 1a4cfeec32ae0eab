//! CLI support for pipeql
//!
//! Provides programmatic access to the `pipeql` commands so other tools can
//! compile and run filters the same way the binary does.

mod compile;

pub use compile::{CompileOptions, RunOptions, check_schema, execute_compile, execute_run};

use std::io;

/// Errors that can occur during CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Parse error: {0}")]
    Parse(#[from] crate::parser::ParseError),

    #[error("Compile error: {0}")]
    Compile(#[from] crate::CompileError),

    #[error("Execution error: {0}")]
    Exec(#[from] crate::evaluator::ExecError),

    #[error("Schema error: {0}")]
    Schema(#[from] crate::schema::SchemaError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// `run` without any documents to run against
    #[error("No data provided. Use --data or pipe JSON to stdin.")]
    NoData,
}
