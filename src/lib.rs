//! # pipeql
//!
//! Compiles relational-style query trees into document-store aggregation
//! pipelines. Queries name fields with `__`-separated lookup paths that can
//! reach into embedded documents, broadcast over embedded arrays, follow
//! foreign keys (compiled to `$lookup` joins) and end in a lookup such as
//! `iexact`, `in` or `isnull`.
//!
//! ```
//! use pipeql::ast::{Filter, Query};
//! use pipeql::schema::Schema;
//! use pipeql::store::{MemoryStore, Store};
//! use pipeql::{doc, Compiler};
//!
//! let schema = Schema::from_json(r#"[
//!     {"name": "Section", "embedded": true, "fields": [{"name": "number", "type": "integer"}]},
//!     {"name": "Exhibit", "fields": [
//!         {"name": "name", "type": "string"},
//!         {"name": "sections", "type": "embedded_array", "model": "Section"}
//!     ]}
//! ]"#).unwrap();
//!
//! let query = Query::new("Exhibit")
//!     .filter(Filter::lookup("sections__number__gte", 2))
//!     .values(["name"]);
//! let compiled = Compiler::new(&schema).compile(&query).unwrap();
//!
//! let mut store = MemoryStore::new();
//! store.insert("exhibit", doc! { "_id" => 1, "name" => "a", "sections" => vec![doc! { "number" => 1 }] });
//! store.insert("exhibit", doc! { "_id" => 2, "name" => "b", "sections" => vec![doc! { "number" => 3 }] });
//!
//! let rows: Vec<_> = store.run(&compiled).unwrap().collect();
//! assert_eq!(rows, vec![doc! { "_id" => 2, "name" => "b" }]);
//! ```

pub mod ast;
pub mod compiler;
pub mod config;
pub mod convert;
pub mod evaluator;
pub mod lexer;
pub mod lookups;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod resolve;
pub mod schema;
pub mod store;
pub mod transform;
pub mod value;

#[cfg(feature = "cli")]
pub mod cli;

pub use ast::{Expr, Filter, Query, Token};
pub use compiler::{CompileError, CompiledFilter, Compiler};
pub use config::CompilerConfig;
pub use evaluator::{EvalContext, Evaluator, ExecError};
pub use lexer::{LexError, Lexer, Position};
pub use output::{to_json, to_json_pretty};
pub use parser::{ParseError, Parser, parse_filter};
pub use pipeline::{CompiledQuery, Stage};
pub use schema::{Schema, SchemaService};
pub use store::{MemoryStore, Store};
pub use value::{Document, Value};
