//! Document schema: models, fields and definition-time checks.
//!
//! A schema is a set of [`Model`]s. Top-level models live in their own
//! collection; embedded models only exist nested inside another document,
//! either as a single sub-document or as the elements of an embedded array.
//!
//! Schemas are usually loaded from JSON:
//!
//! ```
//! use pipeql::schema::{Schema, SchemaService};
//!
//! let schema = Schema::from_json(r#"[
//!     {"name": "Movie", "fields": [
//!         {"name": "title", "type": "string"},
//!         {"name": "reviews", "type": "embedded_array", "model": "Review", "null": true}
//!     ]},
//!     {"name": "Review", "embedded": true, "fields": [
//!         {"name": "rating", "type": "integer"}
//!     ]}
//! ]"#).unwrap();
//!
//! assert!(schema.check().is_empty());
//! assert_eq!(schema.model("Movie").unwrap().collection(), "movie");
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Column holding the primary key of every top-level model.
pub const PRIMARY_KEY_COLUMN: &str = "_id";

/// Errors raised while loading or validating a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model '{0}' is defined more than once")]
    DuplicateModel(String),

    #[error("schema has errors:\n{}", format_checks(.0))]
    Check(Vec<CheckMessage>),
}

fn format_checks(checks: &[CheckMessage]) -> String {
    checks
        .iter()
        .map(|c| format!("  {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scalar storage kinds a field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Integer,
    Float,
    Decimal,
    String,
    Boolean,
    /// Arbitrary JSON; any key below it is reachable.
    Json,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Integer => "integer",
            ScalarKind::Float => "float",
            ScalarKind::Decimal => "decimal",
            ScalarKind::String => "string",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Json => "json",
        }
    }

    /// Type name the store reports for values of this kind.
    pub fn storage_type(&self) -> &'static str {
        match self {
            ScalarKind::Integer => "long",
            ScalarKind::Float => "double",
            ScalarKind::Decimal => "decimal",
            ScalarKind::String => "string",
            ScalarKind::Boolean => "bool",
            ScalarKind::Json => "object",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Float,
    Decimal,
    String,
    Boolean,
    Json,
    /// A single nested document of an embedded model.
    Embedded { model: String },
    /// An ordered array of documents of an embedded model.
    EmbeddedArray { model: String },
    /// A reference to another top-level model, matched against its primary
    /// key unless `to_field` names another field.
    ForeignKey {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_field: Option<String>,
        /// Stored type of the key; integer unless given.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stored_as: Option<ScalarKind>,
    },
}

impl FieldKind {
    pub fn foreign_key(model: impl Into<String>) -> Self {
        FieldKind::ForeignKey {
            model: model.into(),
            to_field: None,
            stored_as: None,
        }
    }

    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            FieldKind::Integer => Some(ScalarKind::Integer),
            FieldKind::Float => Some(ScalarKind::Float),
            FieldKind::Decimal => Some(ScalarKind::Decimal),
            FieldKind::String => Some(ScalarKind::String),
            FieldKind::Boolean => Some(ScalarKind::Boolean),
            FieldKind::Json => Some(ScalarKind::Json),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, FieldKind::ForeignKey { .. })
    }

    /// Human-readable kind, used in check messages.
    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Embedded { .. } => "EmbeddedModelField",
            FieldKind::EmbeddedArray { .. } => "EmbeddedModelArrayField",
            FieldKind::ForeignKey { .. } => "ForeignKey",
            other => other.scalar().map_or("Field", |s| s.name()),
        }
    }

    /// Type name of the stored value. Foreign keys store the target's key.
    pub fn storage_type(&self) -> &'static str {
        match self {
            FieldKind::Embedded { .. } => "object",
            FieldKind::EmbeddedArray { .. } => "array",
            FieldKind::ForeignKey { stored_as, .. } => {
                stored_as.unwrap_or(ScalarKind::Integer).storage_type()
            }
            other => other.scalar().map_or("object", |s| s.storage_type()),
        }
    }
}

/// A named field of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(flatten)]
    pub kind: FieldKind,

    /// Whether the stored value may be null or absent.
    #[serde(default)]
    pub null: bool,

    /// Stored column name; defaults to the field name (`<name>_id` for
    /// foreign keys).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Field {
            name: name.into(),
            kind,
            null: false,
            column: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn column(&self) -> String {
        match (&self.column, &self.kind) {
            (Some(column), _) => column.clone(),
            (None, FieldKind::ForeignKey { .. }) => format!("{}_id", self.name),
            (None, _) => self.name.clone(),
        }
    }
}

/// A document schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,

    /// Collection name; defaults to the lowercased model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Embedded models have no collection of their own.
    #[serde(default)]
    pub embedded: bool,

    pub fields: Vec<Field>,
}

impl Model {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Model {
            name: name.into(),
            collection: None,
            embedded: false,
            fields,
        }
    }

    pub fn embedded(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Model {
            embedded: true,
            ..Model::new(name, fields)
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn collection(&self) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| self.name.to_lowercase())
    }

    /// Field by name; `pk` is an alias of the primary key.
    pub fn field(&self, name: &str) -> Option<&Field> {
        let name = if name == "pk" && !self.embedded { "id" } else { name };
        self.fields.iter().find(|f| f.name == name)
    }

    /// Stored column names, `_id` included.
    pub fn columns(&self) -> impl Iterator<Item = String> + '_ {
        self.fields.iter().map(Field::column)
    }
}

/// Collaborator the compiler asks for model metadata.
///
/// Lookups are synchronous and must not have side effects.
pub trait SchemaService {
    fn model(&self, name: &str) -> Option<&Model>;
}

/// In-memory schema registry.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: IndexMap<String, Model>,
}

impl Schema {
    /// Builds a registry. Top-level models without an `id` field get one
    /// stored in `_id`.
    pub fn new(models: Vec<Model>) -> Result<Self, SchemaError> {
        let mut registry = IndexMap::new();
        for mut model in models {
            if !model.embedded && model.field("id").is_none() {
                model.fields.insert(
                    0,
                    Field::new("id", FieldKind::Integer).with_column(PRIMARY_KEY_COLUMN),
                );
            }
            if registry.contains_key(&model.name) {
                return Err(SchemaError::DuplicateModel(model.name));
            }
            registry.insert(model.name.clone(), model);
        }
        Ok(Schema { models: registry })
    }

    pub fn from_json(input: &str) -> Result<Self, SchemaError> {
        let models: Vec<Model> = serde_json::from_str(input)?;
        Schema::new(models)
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    /// Runs the definition-time checks and returns every problem found.
    pub fn check(&self) -> Vec<CheckMessage> {
        let mut messages = Vec::new();
        for model in self.models.values() {
            for field in &model.fields {
                if let Some(message) = self.check_field(model, field) {
                    messages.push(message);
                }
            }
        }
        messages
    }

    /// Like [`Schema::check`], but fails on the first batch of problems.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let messages = self.check();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Check(messages))
        }
    }

    fn check_field(&self, model: &Model, field: &Field) -> Option<CheckMessage> {
        let at = |id: &'static str, msg: String| CheckMessage {
            id,
            model: model.name.clone(),
            field: field.name.clone(),
            msg,
        };

        match &field.kind {
            FieldKind::Embedded { model: target } => self
                .check_embedded_target(target)
                .map(|(id, msg)| at(id, msg)),
            FieldKind::EmbeddedArray { model: target } => {
                self.check_embedded_target(target).map(|(id, msg)| {
                    at(
                        "array.E001",
                        format!("Base field for array has errors:\n    {} ({})", msg, id),
                    )
                })
            }
            FieldKind::ForeignKey { model: target, .. } => match self.models.get(target) {
                None => Some(at(
                    "relation.E001",
                    format!("Field defines a relation with unknown model '{}'.", target),
                )),
                Some(t) if t.embedded => Some(at(
                    "relation.E002",
                    format!(
                        "Field defines a relation with embedded model '{}'; relations must target a top-level model.",
                        target
                    ),
                )),
                Some(_) => None,
            },
            _ => None,
        }
    }

    fn check_embedded_target(&self, target: &str) -> Option<(&'static str, String)> {
        let Some(embedded) = self.models.get(target) else {
            return Some((
                "embedded_model.E003",
                format!("Embedded model '{}' is not defined.", target),
            ));
        };
        if !embedded.embedded {
            return Some((
                "embedded_model.E002",
                "Embedded models must be declared as embedded.".to_string(),
            ));
        }
        embedded
            .fields
            .iter()
            .find(|f| f.kind.is_relation())
            .map(|f| {
                (
                    "embedded_model.E001",
                    format!(
                        "Embedded models cannot have relational fields ({}.{} is a {}).",
                        embedded.name,
                        f.name,
                        f.kind.label()
                    ),
                )
            })
    }
}

impl SchemaService for Schema {
    fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }
}

/// One problem reported by [`Schema::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckMessage {
    pub id: &'static str,
    pub model: String,
    pub field: String,
    pub msg: String,
}

impl fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: ({}) {}", self.model, self.field, self.id, self.msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_is_added() {
        let schema = Schema::new(vec![Model::new("Book", vec![])]).unwrap();
        let book = schema.model("Book").unwrap();
        assert_eq!(book.field("pk").unwrap().column(), "_id");
    }

    #[test]
    fn test_foreign_key_column() {
        let field = Field::new("author", FieldKind::foreign_key("Author"));
        assert_eq!(field.column(), "author_id");
    }

    #[test]
    fn test_duplicate_model() {
        let err = Schema::new(vec![Model::new("A", vec![]), Model::new("A", vec![])]).unwrap_err();
        assert_eq!(err.to_string(), "model 'A' is defined more than once");
    }
}
