use crate::ast::{Expr, Filter};

/// A query against one model.
///
/// Built with chained setters:
///
/// ```
/// use pipeql::ast::{Filter, Query};
///
/// let query = Query::new("Tour")
///     .filter(Filter::lookup("exhibit__exhibit_name", "Egyptian Antiquities"))
///     .limit(10);
///
/// assert_eq!(query.limit, Some(10));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub model: String,

    pub filter: Option<Filter>,

    /// Computed fields, in definition order; later ones may refer to
    /// earlier ones by name.
    pub annotations: Vec<(String, Expr)>,

    /// Returned fields; all concrete fields when empty.
    pub values: Vec<String>,

    pub order_by: Vec<OrderBy>,

    pub offset: Option<usize>,

    pub limit: Option<usize>,

    /// Relations joined even when no filter goes through them.
    pub select_related: Vec<String>,

    pub combinator: Option<Combinator>,
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub path: String,
    pub descending: bool,
}

impl OrderBy {
    /// Parses `name` or `-name`.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(path) => OrderBy {
                path: path.to_string(),
                descending: true,
            },
            None => OrderBy {
                path: spec.to_string(),
                descending: false,
            },
        }
    }
}

/// Set combination with other queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Combinator {
    /// Documents of every query; duplicates removed unless `all`.
    Union { others: Vec<Query>, all: bool },
}

impl Query {
    pub fn new(model: impl Into<String>) -> Self {
        Query {
            model: model.into(),
            ..Query::default()
        }
    }

    /// Adds a filter, AND-ed with any existing one.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            None => filter,
            Some(Filter::And(mut children)) => {
                children.push(filter);
                Filter::And(children)
            }
            Some(existing) => Filter::And(vec![existing, filter]),
        });
        self
    }

    pub fn exclude(self, filter: Filter) -> Self {
        self.filter(Filter::not(filter))
    }

    pub fn annotate(mut self, name: impl Into<String>, expr: impl Into<Expr>) -> Self {
        self.annotations.push((name.into(), expr.into()));
        self
    }

    pub fn values<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an ordering key: `name` ascending, `-name` descending.
    pub fn order_by(mut self, spec: &str) -> Self {
        self.order_by.push(OrderBy::parse(spec));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn select_related(mut self, relation: impl Into<String>) -> Self {
        self.select_related.push(relation.into());
        self
    }

    pub fn union(mut self, others: impl IntoIterator<Item = Query>, all: bool) -> Self {
        self.combinator = Some(Combinator::Union {
            others: others.into_iter().collect(),
            all,
        });
        self
    }
}
