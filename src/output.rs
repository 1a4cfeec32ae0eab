//! JSON output for document values and compiled pipelines.
//!
//! Object keys print in insertion order, so a compiled stage prints the way
//! the compiler built it (`$lookup` as `from`, `let`, `pipeline`, `as`).
//! Decimals print in extended-JSON form and non-finite floats as `null`.
//!
//! # Examples
//!
//! ```
//! use pipeql::{doc, Value};
//! use pipeql::output::{to_json, to_json_pretty};
//!
//! let stage = doc! { "$unwind" => "$tags" };
//!
//! assert_eq!(to_json(&stage), r#"{"$unwind":"$tags"}"#);
//! assert_eq!(to_json_pretty(&stage), "{\n  \"$unwind\": \"$tags\"\n}");
//! ```

use std::fmt::Write;

use crate::pipeline::CompiledQuery;
use crate::value::Value;

/// Layout of printed JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    /// No whitespace at all; what golden pipelines compare against.
    #[default]
    Compact,
    /// Two-space indentation, one member per line.
    Pretty,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPrinter {
    style: Style,
}

impl JsonPrinter {
    pub fn new(style: Style) -> Self {
        JsonPrinter { style }
    }

    pub fn print(&self, value: &Value) -> String {
        let mut out = String::new();
        self.write_value(&mut out, value, 0);
        out
    }

    /// Shell form of a compiled query, `db.<collection>.aggregate([...])`.
    pub fn print_query(&self, query: &CompiledQuery) -> String {
        let mut out = format!("db.{}.aggregate(", query.collection);
        self.write_value(&mut out, &query.to_documents(), 0);
        out.push(')');
        out
    }

    fn write_value(&self, out: &mut String, value: &Value, depth: usize) {
        match value {
            Value::Null => out.push_str("null"),
            Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Integer(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Float(n) if n.is_finite() => {
                let _ = write!(out, "{:?}", n);
            }
            Value::Float(_) => out.push_str("null"),
            Value::Decimal(d) => {
                out.push('{');
                self.open_member(out, 0, depth + 1);
                self.write_key(out, "$numberDecimal");
                write_string(out, &d.to_string());
                self.close(out, '}', depth);
            }
            Value::String(s) => write_string(out, s),
            Value::Array(items) if items.is_empty() => out.push_str("[]"),
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    self.open_member(out, i, depth + 1);
                    self.write_value(out, item, depth + 1);
                }
                self.close(out, ']', depth);
            }
            Value::Object(map) if map.is_empty() => out.push_str("{}"),
            Value::Object(map) => {
                out.push('{');
                for (i, (key, child)) in map.iter().enumerate() {
                    self.open_member(out, i, depth + 1);
                    self.write_key(out, key);
                    self.write_value(out, child, depth + 1);
                }
                self.close(out, '}', depth);
            }
        }
    }

    fn open_member(&self, out: &mut String, index: usize, depth: usize) {
        if index > 0 {
            out.push(',');
        }
        if self.style == Style::Pretty {
            out.push('\n');
            indent(out, depth);
        }
    }

    fn write_key(&self, out: &mut String, key: &str) {
        write_string(out, key);
        out.push(':');
        if self.style == Style::Pretty {
            out.push(' ');
        }
    }

    fn close(&self, out: &mut String, bracket: char, depth: usize) {
        if self.style == Style::Pretty {
            out.push('\n');
            indent(out, depth);
        }
        out.push(bracket);
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Converts a value to compact JSON.
pub fn to_json(value: &Value) -> String {
    JsonPrinter::new(Style::Compact).print(value)
}

/// Converts a value to JSON with 2-space indentation, one member per line.
pub fn to_json_pretty(value: &Value) -> String {
    JsonPrinter::new(Style::Pretty).print(value)
}
