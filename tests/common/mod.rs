// Shared fixtures: a small museum schema and documents for it.
#![allow(dead_code)]

use pipeql::ast::Query;
use pipeql::schema::{Field, FieldKind, Model, Schema};
use pipeql::store::{MemoryStore, Store};
use pipeql::{Compiler, Value, doc};

pub fn museum_schema() -> Schema {
    let embedded_array = |model: &str| FieldKind::EmbeddedArray { model: model.into() };

    Schema::new(vec![
        Model::embedded(
            "ArtifactDetail",
            vec![
                Field::new("name", FieldKind::String),
                Field::new("metadata", FieldKind::Json).nullable(),
                Field::new("year", FieldKind::Integer).nullable(),
            ],
        ),
        Model::embedded(
            "ExhibitSection",
            vec![
                Field::new("section_number", FieldKind::Integer),
                Field::new("title", FieldKind::String).nullable(),
                Field::new("artifacts", embedded_array("ArtifactDetail")).nullable(),
            ],
        ),
        Model::new("Curator", vec![Field::new("name", FieldKind::String)]),
        Model::new(
            "MuseumExhibit",
            vec![
                Field::new("exhibit_name", FieldKind::String),
                Field::new("opened_year", FieldKind::Integer).nullable(),
                Field::new("sections", embedded_array("ExhibitSection")).nullable(),
                Field::new("main_section", FieldKind::Embedded { model: "ExhibitSection".into() }).nullable(),
                Field::new("curator", FieldKind::foreign_key("Curator")).nullable(),
            ],
        ),
        Model::new(
            "Tour",
            vec![
                Field::new("guide", FieldKind::String),
                Field::new("exhibit", FieldKind::foreign_key("MuseumExhibit")),
            ],
        ),
        Model::new(
            "ExhibitAudit",
            vec![
                Field::new("related_section_number", FieldKind::Integer),
                Field::new("reviewed", FieldKind::Boolean),
            ],
        ),
    ])
    .unwrap()
}

fn artifact(name: &str, origin: &str) -> Value {
    doc! { "name" => name, "metadata" => doc! { "origin" => origin } }
}

pub fn museum_store() -> MemoryStore {
    let mut store = MemoryStore::new();

    store.insert_many(
        "museumexhibit",
        vec![
            doc! {
                "_id" => 1,
                "exhibit_name" => "Egyptian Art",
                "opened_year" => 1990,
                "sections" => vec![
                    doc! { "section_number" => 1, "title" => "Tombs", "artifacts" => vec![artifact("Ankh", "Thebes")] },
                    doc! { "section_number" => 2, "title" => "Gods", "artifacts" => Value::Array(vec![]) },
                ],
                "main_section" => doc! { "section_number" => 1, "title" => "Tombs" },
                "curator_id" => 1,
            },
            doc! {
                "_id" => 2,
                "exhibit_name" => "Art. (Modern)",
                "opened_year" => Value::Null,
                "sections" => vec![
                    doc! { "section_number" => 3, "title" => "Readymades", "artifacts" => vec![artifact("Fountain", "Paris")] },
                ],
                "main_section" => Value::Null,
                "curator_id" => Value::Null,
            },
            doc! {
                "_id" => 3,
                "exhibit_name" => "Empty",
                "opened_year" => 2005,
                "sections" => Value::Array(vec![]),
                "curator_id" => 1,
            },
            doc! {
                "_id" => 4,
                "exhibit_name" => "Lost",
                "curator_id" => 99,
            },
        ],
    );

    store.insert("curator", doc! { "_id" => 1, "name" => "Ada" });

    store.insert_many(
        "tour",
        vec![
            doc! { "_id" => 1, "guide" => "Bo", "exhibit_id" => 1 },
            doc! { "_id" => 2, "guide" => "Cy", "exhibit_id" => 2 },
            doc! { "_id" => 3, "guide" => "Dee", "exhibit_id" => 42 },
        ],
    );

    store.insert_many(
        "exhibitaudit",
        vec![
            doc! { "_id" => 1, "related_section_number" => 1, "reviewed" => true },
            doc! { "_id" => 2, "related_section_number" => 3, "reviewed" => false },
        ],
    );

    store
}

/// Compiles and runs `query` against the museum data.
pub fn run(query: &Query) -> Vec<Value> {
    let schema = museum_schema();
    let compiled = Compiler::new(&schema).compile(query).unwrap();
    museum_store().run(&compiled).unwrap().collect()
}

/// Values of `field` in the result rows, in result order.
pub fn column(rows: &[Value], field: &str) -> Vec<Value> {
    rows.iter().map(|row| row.get(field).cloned().unwrap_or(Value::Null)).collect()
}

/// `_id`s of the result rows, sorted.
pub fn ids(rows: &[Value]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows.iter().filter_map(|row| row.get("_id").and_then(Value::as_int)).collect();
    ids.sort();
    ids
}
