use indexmap::IndexMap;
use rust_decimal::Decimal;

/// Field map of a document. Keys keep their insertion order, which keeps
/// emitted stages readable and stable from one compile to the next.
pub type Document = IndexMap<String, Value>;

/// A document value, used both for stored documents and for the pipeline
/// fragments the compiler emits.
///
/// # Type Preservation
///
/// Integers, floats and decimals stay distinct so that literals round-trip
/// into the emitted pipeline with the type their field declares:
/// - `Integer` for integer fields and auto ids
/// - `Float` for float fields
/// - `Decimal` for decimal fields (rendered as `{"$numberDecimal": "..."}`)
///
/// # Examples
///
/// ```
/// use pipeql::{doc, Value};
///
/// let null = Value::Null;
/// let number = Value::Integer(42);
/// let stage = doc! { "$limit" => 1 };
///
/// assert_eq!(stage.get("$limit"), Some(&Value::Integer(1)));
/// assert!(null.is_null());
/// assert_eq!(number.type_name(), "long");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null
    Null,

    /// Boolean (true/false)
    Boolean(bool),

    /// Floating-point number
    Float(f64),

    /// Integer number (preserved separately from floats)
    Integer(i64),

    /// High-precision decimal
    Decimal(Decimal),

    /// UTF-8 string
    String(String),

    /// Ordered array of values
    Array(Vec<Value>),

    /// Embedded document
    Object(Document),
}

impl Value {
    /// Truthiness as the aggregation engine defines it: `false`, `null` and
    /// numeric zero are false, everything else (empty arrays included) is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Float(n) => *n != 0.0,
            Value::Integer(n) => *n != 0,
            Value::Decimal(d) => !d.is_zero(),
            Value::String(_) | Value::Array(_) | Value::Object(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Storage type name, as reported by a `$type` expression.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "long",
            Value::Float(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Float(n) if n.fract() == 0.0 => Some(*n as i64),
            Value::Decimal(d) if d.is_integer() => rust_decimal::prelude::ToPrimitive::to_i64(d),
            _ => None,
        }
    }

    /// Field lookup on an object value; `None` for missing fields and for
    /// non-object values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Single-key object whose key is an operator (`{"$eq": ...}`).
    pub fn as_operator(&self) -> Option<(&str, &Value)> {
        match self {
            Value::Object(map) if map.len() == 1 => {
                let (key, value) = map.first()?;
                key.starts_with('$').then_some((key.as_str(), value))
            }
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Document> for Value {
    fn from(map: Document) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Builds an object value from `key => value` pairs, keeping pair order.
///
/// ```
/// use pipeql::{doc, Value};
///
/// let fragment = doc! { "$eq" => vec![Value::from("$name"), Value::from("x")] };
/// assert!(fragment.as_operator().is_some());
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::value::Value::Object($crate::value::Document::new())
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::Document::new();
        $(
            map.insert(::std::string::String::from($key), $crate::value::Value::from($value));
        )+
        $crate::value::Value::Object(map)
    }};
}
