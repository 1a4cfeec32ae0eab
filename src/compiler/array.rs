use crate::doc;
use crate::lookups::Lookup;
use crate::transform::Transform;
use crate::value::Value;

use super::CompileError;

/// Compiles a lookup on a broadcast over an embedded array.
///
/// `all` and `contained_by` compare the mapped values as a set. Every other
/// lookup is applied to each element and matches when any element does;
/// absent arrays map to `[]` and never match.
pub(super) fn compile_mapped(target: &Transform, lookup: Lookup, rhs: Value) -> Result<Value, CompileError> {
    if matches!(lookup, Lookup::All | Lookup::ContainedBy) {
        return Ok(lookup.build(target.render(), rhs));
    }

    let (Some(array), Some(inner)) = (target.prev(), target.inner()) else {
        return Err(CompileError::InvalidPath(lookup.name().to_string()));
    };

    let per_element = lookup.build(inner.render(), rhs);
    Ok(doc! {
        "$anyElementTrue" => doc! {
            "$ifNull" => vec![
                doc! {
                    "$map" => doc! {
                        "input" => array.render(),
                        "as" => "item",
                        "in" => per_element,
                    }
                },
                Value::Array(vec![]),
            ]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::to_json;
    use crate::schema::ScalarKind;
    use crate::transform::{OutputType, Step};

    fn numbers() -> std::rc::Rc<Transform> {
        let array = Transform::column(None, "sections", OutputType::EmbeddedArray("Section".into()));
        let inner = Transform::item(OutputType::Embedded("Section".into()))
            .chain(Step::Key("number".into()), OutputType::Scalar(ScalarKind::Integer));
        Transform::each(&array, inner)
    }

    #[test]
    fn test_any_element_match() {
        let compiled = compile_mapped(&numbers(), Lookup::Exact, Value::Integer(1)).unwrap();
        assert_eq!(
            to_json(&compiled),
            r#"{"$anyElementTrue":{"$ifNull":[{"$map":{"input":"$sections","as":"item","in":{"$eq":["$$item.number",1]}}},[]]}}"#
        );
    }

    #[test]
    fn test_all_is_guarded_subset() {
        let values = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        let compiled = compile_mapped(&numbers(), Lookup::All, values).unwrap();
        let json = to_json(&compiled);
        assert!(json.starts_with(r#"{"$and":[{"$ne":[{"$ifNull""#));
        assert!(json.contains(r#"{"$setIsSubset":[[1,2],{"$ifNull""#));
    }
}
