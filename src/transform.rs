use std::rc::Rc;

use crate::doc;
use crate::schema::{FieldKind, ScalarKind};
use crate::value::Value;

/// What a transform chain evaluates to, which decides the lookups and
/// further transforms it accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputType {
    Scalar(ScalarKind),
    /// A single embedded document of the named model.
    Embedded(String),
    /// An array of embedded documents of the named model.
    EmbeddedArray(String),
    /// Per-element values of a broadcast over an embedded array.
    Mapped(Box<OutputType>),
}

impl OutputType {
    /// Output of reading a stored field. Foreign keys read as the key they
    /// store.
    pub fn of_field(kind: &FieldKind) -> OutputType {
        match kind {
            FieldKind::Embedded { model } => OutputType::Embedded(model.clone()),
            FieldKind::EmbeddedArray { model } => OutputType::EmbeddedArray(model.clone()),
            FieldKind::ForeignKey { stored_as, .. } => {
                OutputType::Scalar(stored_as.unwrap_or(ScalarKind::Integer))
            }
            other => OutputType::Scalar(other.scalar().unwrap_or(ScalarKind::Json)),
        }
    }

    /// Scalar kind, looking through broadcasts.
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            OutputType::Scalar(kind) => Some(*kind),
            OutputType::Mapped(inner) => inner.scalar(),
            _ => None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, OutputType::Mapped(_))
    }

    /// Description used in lookup errors.
    pub fn describe(&self) -> String {
        match self {
            OutputType::Scalar(kind) => format!("'{}'", kind),
            OutputType::Embedded(model) => format!("embedded model '{}'", model),
            OutputType::EmbeddedArray(model) => format!("embedded model array of '{}'", model),
            OutputType::Mapped(inner) => match inner.as_ref() {
                OutputType::Embedded(model) => format!("embedded model array of '{}'", model),
                other => format!("embedded model array of {}", other.describe()),
            },
        }
    }
}

/// One step of a transform chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Stored column of the current collection or of a joined alias.
    ///
    /// # Examples
    /// - `title` on the root collection → `"$title"`
    /// - `name` through the join alias `author` → `"$author.name"`
    Column { alias: Option<String>, column: String },

    /// The element bound by a broadcast: `"$$item"`.
    Item,

    /// A computed field added by the query: `"$name"`.
    Annotation(String),

    /// Field of an embedded document.
    Key(String),

    /// Key below a JSON field, read with `$getField`.
    JsonKey(String),

    /// Array element by position; negative positions count from the end.
    Index(i64),

    /// Sub-array from `start` (inclusive) to `end` (exclusive).
    Slice { start: i64, end: i64 },

    /// Array length, null when the value is not an array.
    Len,

    /// Broadcast: evaluate the inner chain for every element of the
    /// previous array.
    Each(Rc<Transform>),
}

/// A persistent linked chain of transforms.
///
/// Nodes are immutable and shared through `Rc`; extending a chain allocates
/// a new head and leaves the old chain usable.
#[derive(Debug, PartialEq)]
pub struct Transform {
    step: Step,
    prev: Option<Rc<Transform>>,
    output: OutputType,
}

impl Transform {
    pub fn column(alias: Option<String>, column: impl Into<String>, output: OutputType) -> Rc<Self> {
        Rc::new(Transform {
            step: Step::Column {
                alias,
                column: column.into(),
            },
            prev: None,
            output,
        })
    }

    pub fn item(output: OutputType) -> Rc<Self> {
        Rc::new(Transform {
            step: Step::Item,
            prev: None,
            output,
        })
    }

    pub fn annotation(name: impl Into<String>, output: OutputType) -> Rc<Self> {
        Rc::new(Transform {
            step: Step::Annotation(name.into()),
            prev: None,
            output,
        })
    }

    /// Appends a step.
    pub fn chain(self: &Rc<Self>, step: Step, output: OutputType) -> Rc<Self> {
        Rc::new(Transform {
            step,
            prev: Some(Rc::clone(self)),
            output,
        })
    }

    /// Broadcasts `inner` (rooted at [`Step::Item`]) over `array`.
    pub fn each(array: &Rc<Self>, inner: Rc<Transform>) -> Rc<Self> {
        let output = OutputType::Mapped(Box::new(inner.output.clone()));
        array.chain(Step::Each(inner), output)
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn prev(&self) -> Option<&Rc<Transform>> {
        self.prev.as_ref()
    }

    pub fn output(&self) -> &OutputType {
        &self.output
    }

    /// Inner chain of a broadcast node.
    pub fn inner(&self) -> Option<&Rc<Transform>> {
        match &self.step {
            Step::Each(inner) => Some(inner),
            _ => None,
        }
    }

    /// Renders the chain as a pipeline expression.
    ///
    /// Keys on a plain path extend it (`"$a.b"`); keys on anything computed
    /// go through `$getField`.
    pub fn render(&self) -> Value {
        let prev = || self.prev.as_ref().map_or(Value::Null, |p| p.render());

        match &self.step {
            Step::Column { alias: Some(alias), column } => Value::String(format!("${}.{}", alias, column)),
            Step::Column { alias: None, column } => Value::String(format!("${}", column)),
            Step::Item => Value::from("$$item"),
            Step::Annotation(name) => Value::String(format!("${}", name)),
            Step::Key(name) => match prev() {
                Value::String(path) => Value::String(format!("{}.{}", path, name)),
                input => get_field(input, name),
            },
            Step::JsonKey(name) => get_field(prev(), name),
            Step::Index(index) => doc! { "$arrayElemAt" => vec![prev(), Value::Integer(*index)] },
            Step::Slice { start, end } => doc! {
                "$slice" => vec![prev(), Value::Integer(*start), Value::Integer(end - start)]
            },
            Step::Len => {
                let array = prev();
                doc! {
                    "$cond" => doc! {
                        "if" => doc! { "$isArray" => array.clone() },
                        "then" => doc! { "$size" => array },
                        "else" => Value::Null,
                    }
                }
            }
            Step::Each(inner) => doc! {
                "$ifNull" => vec![
                    doc! {
                        "$map" => doc! {
                            "input" => prev(),
                            "as" => "item",
                            "in" => inner.render(),
                        }
                    },
                    Value::Array(vec![]),
                ]
            },
        }
    }
}

fn get_field(input: Value, field: &str) -> Value {
    doc! { "$getField" => doc! { "input" => input, "field" => field } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::to_json;

    fn sections() -> Rc<Transform> {
        Transform::column(None, "sections", OutputType::EmbeddedArray("Section".into()))
    }

    #[test]
    fn test_key_extends_plain_path() {
        let main = Transform::column(None, "main", OutputType::Embedded("Section".into()));
        let number = main.chain(Step::Key("number".into()), OutputType::Scalar(ScalarKind::Integer));
        assert_eq!(number.render(), Value::from("$main.number"));
    }

    #[test]
    fn test_key_after_index_uses_get_field() {
        let first = sections().chain(Step::Index(0), OutputType::Embedded("Section".into()));
        let number = first.chain(Step::Key("number".into()), OutputType::Scalar(ScalarKind::Integer));
        assert_eq!(
            to_json(&number.render()),
            r#"{"$getField":{"input":{"$arrayElemAt":["$sections",0]},"field":"number"}}"#
        );
    }

    #[test]
    fn test_broadcast_render() {
        let inner = Transform::item(OutputType::Embedded("Section".into()))
            .chain(Step::Key("number".into()), OutputType::Scalar(ScalarKind::Integer));
        let each = Transform::each(&sections(), inner);
        assert!(each.output().is_mapped());
        assert_eq!(
            to_json(&each.render()),
            r#"{"$ifNull":[{"$map":{"input":"$sections","as":"item","in":"$$item.number"}},[]]}"#
        );
    }

    #[test]
    fn test_slice_length() {
        let slice = sections().chain(
            Step::Slice { start: 1, end: 3 },
            OutputType::EmbeddedArray("Section".into()),
        );
        assert_eq!(to_json(&slice.render()), r#"{"$slice":["$sections",1,2]}"#);
    }

    #[test]
    fn test_describe_mapped() {
        let mapped = OutputType::Mapped(Box::new(OutputType::Scalar(ScalarKind::Integer)));
        assert_eq!(mapped.describe(), "embedded model array of 'integer'");
    }
}
