// Schema loading and definition-time checks.

use pipeql::schema::{CheckMessage, Field, FieldKind, Model, Schema, SchemaError, SchemaService};

fn checks(models: Vec<Model>) -> Vec<CheckMessage> {
    Schema::new(models).unwrap().check()
}

fn section() -> Model {
    Model::embedded("Section", vec![Field::new("number", FieldKind::Integer)])
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_from_json() {
    let schema = Schema::from_json(
        r#"[
            {"name": "Section", "embedded": true, "fields": [{"name": "number", "type": "integer"}]},
            {"name": "Exhibit", "collection": "exhibits", "fields": [
                {"name": "title", "type": "string", "null": true},
                {"name": "sections", "type": "embedded_array", "model": "Section"},
                {"name": "owner", "type": "foreign_key", "model": "Owner", "stored_as": "string"}
            ]},
            {"name": "Owner", "fields": [{"name": "name", "type": "string"}]}
        ]"#,
    )
    .unwrap();

    let exhibit = schema.model("Exhibit").unwrap();
    assert_eq!(exhibit.collection(), "exhibits");
    assert!(exhibit.field("title").unwrap().null);
    assert_eq!(exhibit.field("pk").unwrap().column(), "_id");
    assert_eq!(exhibit.field("owner").unwrap().column(), "owner_id");
    assert_eq!(exhibit.field("owner").unwrap().kind.storage_type(), "string");

    let section = schema.model("Section").unwrap();
    assert!(section.embedded);
    assert!(section.field("pk").is_none());
}

#[test]
fn test_default_collection_is_lowercase() {
    let schema = Schema::new(vec![Model::new("MuseumExhibit", vec![])]).unwrap();
    assert_eq!(schema.model("MuseumExhibit").unwrap().collection(), "museumexhibit");
}

#[test]
fn test_invalid_json() {
    let err = Schema::from_json("[{").unwrap_err();
    assert!(matches!(err, SchemaError::Json(_)));
}

#[test]
fn test_unknown_field_type() {
    let err = Schema::from_json(r#"[{"name": "A", "fields": [{"name": "x", "type": "uuid"}]}]"#).unwrap_err();
    assert!(matches!(err, SchemaError::Json(_)));
}

// ============================================================================
// Embedded model checks
// ============================================================================

#[test]
fn test_valid_schema_has_no_messages() {
    let messages = checks(vec![
        section(),
        Model::new(
            "Exhibit",
            vec![
                Field::new("main", FieldKind::Embedded { model: "Section".into() }),
                Field::new("sections", FieldKind::EmbeddedArray { model: "Section".into() }),
            ],
        ),
    ]);
    assert!(messages.is_empty(), "{:?}", messages);
}

#[test]
fn test_embedded_model_with_relation() {
    let messages = checks(vec![
        Model::new("Owner", vec![]),
        Model::embedded("Section", vec![Field::new("owner", FieldKind::foreign_key("Owner"))]),
        Model::new("Exhibit", vec![Field::new("main", FieldKind::Embedded { model: "Section".into() })]),
    ]);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "embedded_model.E001");
    assert_eq!(
        messages[0].msg,
        "Embedded models cannot have relational fields (Section.owner is a ForeignKey)."
    );
}

#[test]
fn test_embedded_target_not_marked_embedded() {
    let messages = checks(vec![
        Model::new("Section", vec![]),
        Model::new("Exhibit", vec![Field::new("main", FieldKind::Embedded { model: "Section".into() })]),
    ]);
    assert_eq!(messages[0].id, "embedded_model.E002");
    assert_eq!(messages[0].to_string(), "Exhibit.main: (embedded_model.E002) Embedded models must be declared as embedded.");
}

#[test]
fn test_embedded_target_undefined() {
    let messages = checks(vec![Model::new(
        "Exhibit",
        vec![Field::new("main", FieldKind::Embedded { model: "Nope".into() })],
    )]);
    assert_eq!(messages[0].id, "embedded_model.E003");
    assert_eq!(messages[0].msg, "Embedded model 'Nope' is not defined.");
}

#[test]
fn test_array_wraps_base_field_error() {
    let messages = checks(vec![Model::new(
        "Exhibit",
        vec![Field::new("sections", FieldKind::EmbeddedArray { model: "Nope".into() })],
    )]);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "array.E001");
    assert_eq!(
        messages[0].msg,
        "Base field for array has errors:\n    Embedded model 'Nope' is not defined. (embedded_model.E003)"
    );
}

// ============================================================================
// Relation checks
// ============================================================================

#[test]
fn test_relation_to_unknown_model() {
    let messages = checks(vec![Model::new("Tour", vec![Field::new("exhibit", FieldKind::foreign_key("Exhibit"))])]);
    assert_eq!(messages[0].id, "relation.E001");
    assert_eq!(messages[0].field, "exhibit");
}

#[test]
fn test_relation_to_embedded_model() {
    let messages = checks(vec![
        section(),
        Model::new("Tour", vec![Field::new("section", FieldKind::foreign_key("Section"))]),
    ]);
    assert_eq!(messages[0].id, "relation.E002");
}

#[test]
fn test_validate_reports_every_problem() {
    let schema = Schema::new(vec![Model::new(
        "Exhibit",
        vec![
            Field::new("main", FieldKind::Embedded { model: "A".into() }),
            Field::new("owner", FieldKind::foreign_key("B")),
        ],
    )])
    .unwrap();
    let err = schema.validate().unwrap_err();
    match err {
        SchemaError::Check(messages) => assert_eq!(messages.len(), 2),
        other => panic!("Expected check error, got {:?}", other),
    }
}

#[test]
fn test_duplicate_model() {
    let err = Schema::new(vec![section(), section()]).unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateModel(name) if name == "Section"));
}
