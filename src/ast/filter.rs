use crate::ast::{Expr, Query};

/// A boolean filter over the documents of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Lookup path compared against a value.
    ///
    /// # Examples
    /// ```text
    /// sections__section_number__in = [1, 2]
    /// title = F(original_title)
    /// ```
    Lookup { path: String, value: Expr },

    /// Every child matches. An empty `And` matches everything.
    And(Vec<Filter>),

    /// Any child matches.
    Or(Vec<Filter>),

    /// The child does not match.
    Not(Box<Filter>),

    /// The correlated subquery returns at least one document.
    Exists(Box<Query>),
}

impl Filter {
    pub fn lookup(path: impl Into<String>, value: impl Into<Expr>) -> Self {
        Filter::Lookup {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    pub fn exists(query: Query) -> Self {
        Filter::Exists(Box::new(query))
    }
}
