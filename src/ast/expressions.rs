use crate::ast::{CombineOp, Filter, Query};
use crate::value::Value;

/// A value expression: the right-hand side of a lookup, or a computed
/// annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    ///
    /// # Example
    /// ```text
    /// 42
    /// [1, 2]
    /// "the matrix"
    /// ```
    Value(Value),

    /// Reference to a field of the current document (`F(path)`).
    Field(String),

    /// Reference to a field of the enclosing query's document, only valid
    /// inside a subquery.
    OuterRef(String),

    /// List whose items are expressions, such as field references.
    List(Vec<Expr>),

    /// Binary arithmetic or bitwise combination.
    Combined {
        op: CombineOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// First `when` whose condition holds, else `default`.
    Case { whens: Vec<When>, default: Box<Expr> },

    /// A filter evaluated as a boolean.
    Condition(Box<Filter>),

    /// Single column of another query, correlated through `OuterRef`s.
    Subquery(Box<Query>),
}

/// One branch of a [`Expr::Case`].
#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub condition: Filter,
    pub then: Expr,
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn outer(path: impl Into<String>) -> Self {
        Expr::OuterRef(path.into())
    }

    pub fn subquery(query: Query) -> Self {
        Expr::Subquery(Box::new(query))
    }

    pub fn combine(op: CombineOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Expr::Combined {
            op,
            lhs: Box::new(lhs.into()),
            rhs: Box::new(rhs.into()),
        }
    }

    pub fn case(whens: Vec<When>, default: impl Into<Expr>) -> Self {
        Expr::Case {
            whens,
            default: Box::new(default.into()),
        }
    }

    pub fn condition(filter: Filter) -> Self {
        Expr::Condition(Box::new(filter))
    }
}

impl When {
    pub fn new(condition: Filter, then: impl Into<Expr>) -> Self {
        When {
            condition,
            then: then.into(),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Value(value)
    }
}

impl From<Query> for Expr {
    fn from(query: Query) -> Self {
        Expr::subquery(query)
    }
}

macro_rules! literal_exprs {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Value(Value::from(value))
                }
            }
        )*
    };
}

literal_exprs!(bool, i64, i32, f64, &str, String, Vec<Value>);

impl From<Vec<i64>> for Expr {
    fn from(items: Vec<i64>) -> Self {
        Expr::Value(Value::Array(items.into_iter().map(Value::from).collect()))
    }
}

impl From<Vec<&str>> for Expr {
    fn from(items: Vec<&str>) -> Self {
        Expr::Value(Value::Array(items.into_iter().map(Value::from).collect()))
    }
}

impl From<Vec<Expr>> for Expr {
    fn from(items: Vec<Expr>) -> Self {
        Expr::List(items)
    }
}
