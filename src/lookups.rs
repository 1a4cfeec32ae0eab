//! Lookup operators and the output types that accept them.
//!
//! Every lookup is a row in a static table: its name, the shape of the value
//! it takes and the function that builds the pipeline predicate from a
//! compiled left-hand side and a compiled value.
//!
//! ```
//! use pipeql::lookups::Lookup;
//! use pipeql::output::to_json;
//! use pipeql::Value;
//!
//! let lt = Lookup::Lt.build(Value::from("$age"), Value::from(18));
//! assert_eq!(
//!     to_json(&lt),
//!     r#"{"$and":[{"$lt":["$age",18]},{"$not":{"$or":[{"$eq":[{"$type":"$age"},"missing"]},{"$eq":["$age",null]}]}}]}"#
//! );
//! ```

use std::fmt;

use crate::doc;
use crate::schema::ScalarKind;
use crate::transform::OutputType;
use crate::value::Value;

/// A lookup operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Exact,
    IExact,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Range,
    IsNull,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Regex,
    IRegex,
    /// Every value is among the broadcast elements.
    All,
    /// Every broadcast element is among the values.
    ContainedBy,
}

/// Shape of the value a lookup takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// One value of the field's type.
    Single,
    /// A list of values, or an expression producing one.
    List,
    /// A two-element list of bounds; either may be null.
    Pair,
    /// A boolean flag.
    Flag,
    /// A string pattern.
    Pattern,
}

struct LookupDef {
    lookup: Lookup,
    name: &'static str,
    arity: Arity,
    build: fn(Value, Value) -> Value,
}

static LOOKUPS: &[LookupDef] = &[
    LookupDef { lookup: Lookup::Exact, name: "exact", arity: Arity::Single, build: |a, b| binary("$eq", a, b) },
    LookupDef { lookup: Lookup::IExact, name: "iexact", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![Value::from("^"), b, doc! { "$literal" => "$" }], true)
    } },
    LookupDef { lookup: Lookup::Gt, name: "gt", arity: Arity::Single, build: |a, b| binary("$gt", a, b) },
    LookupDef { lookup: Lookup::Gte, name: "gte", arity: Arity::Single, build: |a, b| binary("$gte", a, b) },
    LookupDef { lookup: Lookup::Lt, name: "lt", arity: Arity::Single, build: |a, b| {
        let not_null = isnull(a.clone(), false);
        doc! { "$and" => vec![binary("$lt", a, b), not_null] }
    } },
    LookupDef { lookup: Lookup::Lte, name: "lte", arity: Arity::Single, build: |a, b| {
        let not_null = isnull(a.clone(), false);
        doc! { "$and" => vec![binary("$lte", a, b), not_null] }
    } },
    LookupDef { lookup: Lookup::In, name: "in", arity: Arity::List, build: |a, b| binary("$in", a, b) },
    LookupDef { lookup: Lookup::Range, name: "range", arity: Arity::Pair, build: range },
    LookupDef { lookup: Lookup::IsNull, name: "isnull", arity: Arity::Flag, build: |a, b| {
        isnull(a, b.is_truthy())
    } },
    LookupDef { lookup: Lookup::Contains, name: "contains", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![b], false)
    } },
    LookupDef { lookup: Lookup::IContains, name: "icontains", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![b], true)
    } },
    LookupDef { lookup: Lookup::StartsWith, name: "startswith", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![Value::from("^"), b], false)
    } },
    LookupDef { lookup: Lookup::IStartsWith, name: "istartswith", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![Value::from("^"), b], true)
    } },
    LookupDef { lookup: Lookup::EndsWith, name: "endswith", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![b, doc! { "$literal" => "$" }], false)
    } },
    LookupDef { lookup: Lookup::IEndsWith, name: "iendswith", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![b, doc! { "$literal" => "$" }], true)
    } },
    LookupDef { lookup: Lookup::Regex, name: "regex", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![b], false)
    } },
    LookupDef { lookup: Lookup::IRegex, name: "iregex", arity: Arity::Pattern, build: |a, b| {
        regex_match(a, vec![b], true)
    } },
    LookupDef { lookup: Lookup::All, name: "all", arity: Arity::List, build: |a, b| {
        guarded_subset(a, b, false)
    } },
    LookupDef { lookup: Lookup::ContainedBy, name: "contained_by", arity: Arity::List, build: |a, b| {
        guarded_subset(a, b, true)
    } },
];

const NUMERIC: &[Lookup] = &[
    Lookup::Exact,
    Lookup::Gt,
    Lookup::Gte,
    Lookup::Lt,
    Lookup::Lte,
    Lookup::In,
    Lookup::Range,
    Lookup::IsNull,
];

const TEXT: &[Lookup] = &[
    Lookup::Exact,
    Lookup::IExact,
    Lookup::Gt,
    Lookup::Gte,
    Lookup::Lt,
    Lookup::Lte,
    Lookup::In,
    Lookup::Range,
    Lookup::IsNull,
    Lookup::Contains,
    Lookup::IContains,
    Lookup::StartsWith,
    Lookup::IStartsWith,
    Lookup::EndsWith,
    Lookup::IEndsWith,
    Lookup::Regex,
    Lookup::IRegex,
];

const BOOLEAN: &[Lookup] = &[Lookup::Exact, Lookup::In, Lookup::IsNull];

const EMBEDDED: &[Lookup] = &[Lookup::Exact, Lookup::IsNull];

/// Lookups a broadcast output may take, before intersecting with the
/// element's own lookups.
const MAPPED: &[Lookup] = &[
    Lookup::Exact,
    Lookup::IExact,
    Lookup::Gt,
    Lookup::Gte,
    Lookup::Lt,
    Lookup::Lte,
    Lookup::In,
    Lookup::All,
    Lookup::ContainedBy,
];

impl Lookup {
    /// Row of `LOOKUPS` describing this lookup.
    fn def(&self) -> &'static LookupDef {
        let row = match self {
            Lookup::Exact => 0,
            Lookup::IExact => 1,
            Lookup::Gt => 2,
            Lookup::Gte => 3,
            Lookup::Lt => 4,
            Lookup::Lte => 5,
            Lookup::In => 6,
            Lookup::Range => 7,
            Lookup::IsNull => 8,
            Lookup::Contains => 9,
            Lookup::IContains => 10,
            Lookup::StartsWith => 11,
            Lookup::IStartsWith => 12,
            Lookup::EndsWith => 13,
            Lookup::IEndsWith => 14,
            Lookup::Regex => 15,
            Lookup::IRegex => 16,
            Lookup::All => 17,
            Lookup::ContainedBy => 18,
        };
        &LOOKUPS[row]
    }

    pub fn from_name(name: &str) -> Option<Lookup> {
        LOOKUPS.iter().find(|d| d.name == name).map(|d| d.lookup)
    }

    pub fn name(&self) -> &'static str {
        self.def().name
    }

    pub fn arity(&self) -> Arity {
        self.def().arity
    }

    /// Pattern lookups whose literal operand is matched verbatim, so
    /// regex metacharacters in it get escaped.
    pub fn escapes_literals(&self) -> bool {
        self.arity() == Arity::Pattern && !matches!(self, Lookup::Regex | Lookup::IRegex)
    }

    /// Builds the predicate comparing `lhs` to `rhs`.
    pub fn build(&self, lhs: Value, rhs: Value) -> Value {
        (self.def().build)(lhs, rhs)
    }

    /// Lookups accepted by a transform output, in table order.
    pub fn allowed(output: &OutputType) -> Vec<Lookup> {
        match output {
            OutputType::Scalar(kind) => scalar_lookups(*kind).to_vec(),
            OutputType::Embedded(_) => EMBEDDED.to_vec(),
            OutputType::EmbeddedArray(_) => Vec::new(),
            OutputType::Mapped(inner) => {
                let element: Vec<Lookup> = match inner.as_ref() {
                    // Element comparisons on whole documents and JSON values
                    // accept anything the broadcast accepts.
                    OutputType::Embedded(_) | OutputType::Scalar(ScalarKind::Json) => MAPPED.to_vec(),
                    other => Lookup::allowed(other),
                };
                MAPPED
                    .iter()
                    .copied()
                    .filter(|l| matches!(l, Lookup::All | Lookup::ContainedBy) || element.contains(l))
                    .collect()
            }
        }
    }

    pub fn is_allowed(&self, output: &OutputType) -> bool {
        Lookup::allowed(output).contains(self)
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn scalar_lookups(kind: ScalarKind) -> &'static [Lookup] {
    match kind {
        ScalarKind::Integer | ScalarKind::Float | ScalarKind::Decimal => NUMERIC,
        ScalarKind::String | ScalarKind::Json => TEXT,
        ScalarKind::Boolean => BOOLEAN,
    }
}

fn binary(op: &str, a: Value, b: Value) -> Value {
    doc! { op => vec![a, b] }
}

/// True when `a` is missing or null; negated when `is_null` is false.
pub fn isnull(a: Value, is_null: bool) -> Value {
    let check = doc! {
        "$or" => vec![
            binary("$eq", doc! { "$type" => a.clone() }, Value::from("missing")),
            binary("$eq", a, Value::Null),
        ]
    };
    if is_null { check } else { doc! { "$not" => check } }
}

fn range(a: Value, bounds: Value) -> Value {
    let (lo, hi) = match bounds {
        Value::Array(mut pair) if pair.len() == 2 => {
            let hi = pair.pop().unwrap_or(Value::Null);
            let lo = pair.pop().unwrap_or(Value::Null);
            (lo, hi)
        }
        other => (other, Value::Null),
    };
    doc! {
        "$and" => vec![
            doc! { "$or" => vec![isnull(lo.clone(), true), binary("$gte", a.clone(), lo)] },
            doc! { "$or" => vec![isnull(hi.clone(), true), binary("$lte", a, hi)] },
        ]
    }
}

/// Subset test between the broadcast values and a list, with neither
/// side null. `mapped_in_values` picks the direction.
fn guarded_subset(mapped: Value, values: Value, mapped_in_values: bool) -> Value {
    let subset = if mapped_in_values {
        vec![mapped.clone(), values.clone()]
    } else {
        vec![values.clone(), mapped.clone()]
    };
    doc! {
        "$and" => vec![
            binary("$ne", mapped, Value::Null),
            binary("$ne", values, Value::Null),
            doc! { "$setIsSubset" => subset },
        ]
    }
}

/// `$regexMatch` over the concatenation of `pieces`.
///
/// Literal pieces (plain strings and `$literal` strings) fold into a single
/// pattern string; anything else produces a `$concat`.
pub fn regex_match(input: Value, pieces: Vec<Value>, insensitive: bool) -> Value {
    let literal: Option<String> = pieces.iter().map(literal_piece).collect();
    let regex = match literal {
        Some(pattern) if pattern.starts_with('$') => doc! { "$literal" => pattern },
        Some(pattern) => Value::String(pattern),
        None if pieces.len() == 1 => pieces.into_iter().next().unwrap_or(Value::Null),
        None => doc! { "$concat" => pieces },
    };

    let mut args = doc! { "input" => input, "regex" => regex };
    if insensitive {
        if let Value::Object(map) = &mut args {
            map.insert("options".to_string(), Value::from("i"));
        }
    }
    doc! { "$regexMatch" => args }
}

fn literal_piece(piece: &Value) -> Option<String> {
    match piece {
        Value::String(s) if !s.starts_with('$') => Some(s.clone()),
        other => match other.as_operator() {
            Some(("$literal", Value::String(s))) => Some(s.clone()),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::to_json;

    #[test]
    fn test_names_round_trip() {
        for def in LOOKUPS {
            assert_eq!(Lookup::from_name(def.name), Some(def.lookup));
        }
        assert_eq!(Lookup::from_name("ltee"), None);
    }

    #[test]
    fn test_every_lookup_owns_its_row() {
        let distinct: std::collections::HashSet<Lookup> = LOOKUPS.iter().map(|d| d.lookup).collect();
        assert_eq!(distinct.len(), 19);
        assert_eq!(LOOKUPS.len(), 19);
        for def in LOOKUPS {
            assert_eq!(def.lookup.def().lookup, def.lookup, "Failed for lookup: {}", def.name);
        }
    }

    #[test]
    fn test_iexact_folds_literal_pattern() {
        let fragment = Lookup::IExact.build(Value::from("$name"), Value::from("a\\.b"));
        assert_eq!(
            to_json(&fragment),
            r#"{"$regexMatch":{"input":"$name","regex":"^a\\.b$","options":"i"}}"#
        );
    }

    #[test]
    fn test_startswith_field_reference_concats() {
        let fragment = Lookup::StartsWith.build(Value::from("$name"), Value::from("$prefix"));
        assert_eq!(
            to_json(&fragment),
            r#"{"$regexMatch":{"input":"$name","regex":{"$concat":["^","$prefix"]}}}"#
        );
    }

    #[test]
    fn test_isnull_false_negates() {
        let fragment = Lookup::IsNull.build(Value::from("$a"), Value::Boolean(false));
        assert!(to_json(&fragment).starts_with(r#"{"$not":{"$or""#));
    }

    #[test]
    fn test_mapped_intersects_element_lookups() {
        let mapped = OutputType::Mapped(Box::new(OutputType::Scalar(ScalarKind::Integer)));
        let allowed = Lookup::allowed(&mapped);
        assert!(allowed.contains(&Lookup::Lte));
        assert!(allowed.contains(&Lookup::All));
        assert!(!allowed.contains(&Lookup::IExact));
        assert!(!allowed.contains(&Lookup::IsNull));
        assert!(!allowed.contains(&Lookup::Range));
    }

    #[test]
    fn test_whole_array_takes_no_lookups() {
        assert!(Lookup::allowed(&OutputType::EmbeddedArray("Section".into())).is_empty());
    }
}
