//! # Query trees
//!
//! This module defines the query representation the compiler consumes: a
//! [`Query`] against one model, its [`Filter`] tree, computed [`Expr`]
//! values and the tokens of the text filter language.
//!
//! ## Architecture Overview
//!
//! - **[tokens]** - Lexical tokens produced by the lexer
//! - **[filter]** - Filter nodes (lookups, `and`/`or`/`not`, `exists`)
//! - **[expressions]** - Value expressions (literals, field and outer
//!   references, arithmetic, `case`, subqueries)
//! - **[operators]** - Arithmetic and bitwise combinators
//! - **[query]** - A complete query with projection, ordering and unions
//!
//! ## Lookup paths
//!
//! Filters name what they test with a lookup path: field names separated by
//! `__`, optionally ending in a lookup.
//!
//! ```text
//! title__iexact = "the matrix"
//! sections__section_number__in = [1, 2]
//! sections__0__artifacts__len__gte = 2
//! author__name__startswith = "Le"
//! ```
//!
//! ### Embedded arrays
//!
//! A field name after an embedded array broadcasts over its elements: the
//! lookup matches when any element matches. An integer selects one element,
//! `a_b` selects a slice and `len` compares the array length.
//!
//! ## Building queries in code
//!
//! ```
//! use pipeql::ast::{Expr, Filter, Query};
//!
//! let query = Query::new("MuseumExhibit")
//!     .filter(Filter::lookup("sections__section_number__lte", 2))
//!     .values(["exhibit_name"])
//!     .order_by("-exhibit_name");
//!
//! assert_eq!(query.values, vec!["exhibit_name".to_string()]);
//! ```
pub mod tokens;
pub mod filter;
pub mod expressions;
pub mod operators;
pub mod query;

pub use tokens::Token;
pub use filter::Filter;
pub use expressions::{Expr, When};
pub use operators::CombineOp;
pub use query::{Combinator, OrderBy, Query};
