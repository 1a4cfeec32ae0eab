//! Aggregation pipeline stages.
//!
//! [`Stage`] is a tagged variant per stage kind. Stages render to documents
//! with [`Stage::to_document`] and parse back with [`Stage::from_document`],
//! so pipelines loaded from JSON run through the same executor.

use std::fmt;

use indexmap::IndexMap;

use crate::doc;
use crate::output::{JsonPrinter, to_json};
use crate::value::{Document, Value};

/// Sort direction of a `$sort` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_value(&self) -> Value {
        match self {
            SortOrder::Ascending => Value::Integer(1),
            SortOrder::Descending => Value::Integer(-1),
        }
    }
}

/// A `$lookup` with a `let`-bound sub-pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupStage {
    pub from: String,
    pub let_vars: Document,
    pub pipeline: Vec<Stage>,
    pub as_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// `{$match: <query>}`; compiled filters use `{$expr: ...}`.
    Match(Value),
    Project(Document),
    AddFields(Document),
    Set(Document),
    Lookup(LookupStage),
    /// `{$unwind: "$path"}`; preserving nulls and empty arrays when the flag
    /// is set.
    Unwind { path: String, preserve_empty: bool },
    Facet(IndexMap<String, Vec<Stage>>),
    Group { id: Value, fields: Document },
    Sort(Vec<(String, SortOrder)>),
    Skip(usize),
    Limit(usize),
    UnionWith { coll: String, pipeline: Vec<Stage> },
    Count(String),
}

/// Errors from reading a stage document.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("a stage must be an object with exactly one key, got {0}")]
    Shape(String),

    #[error("unknown stage '{0}'")]
    Unknown(String),

    #[error("invalid argument to {stage}: {reason}")]
    Argument { stage: &'static str, reason: String },
}

impl Stage {
    /// `{$match: {$expr: expr}}`.
    pub fn match_expr(expr: Value) -> Self {
        Stage::Match(doc! { "$expr" => expr })
    }

    pub fn unwind(path: impl Into<String>) -> Self {
        Stage::Unwind {
            path: path.into(),
            preserve_empty: false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::AddFields(_) => "$addFields",
            Stage::Set(_) => "$set",
            Stage::Lookup(_) => "$lookup",
            Stage::Unwind { .. } => "$unwind",
            Stage::Facet(_) => "$facet",
            Stage::Group { .. } => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::UnionWith { .. } => "$unionWith",
            Stage::Count(_) => "$count",
        }
    }

    pub fn to_document(&self) -> Value {
        let body = match self {
            Stage::Match(query) => query.clone(),
            Stage::Project(fields) | Stage::AddFields(fields) | Stage::Set(fields) => {
                Value::Object(fields.clone())
            }
            Stage::Lookup(lookup) => doc! {
                "from" => lookup.from.as_str(),
                "let" => Value::Object(lookup.let_vars.clone()),
                "pipeline" => to_documents(&lookup.pipeline),
                "as" => lookup.as_field.as_str(),
            },
            Stage::Unwind { path, preserve_empty: false } => Value::String(format!("${}", path)),
            Stage::Unwind { path, preserve_empty: true } => doc! {
                "path" => format!("${}", path),
                "preserveNullAndEmptyArrays" => true,
            },
            Stage::Facet(facets) => Value::Object(
                facets
                    .iter()
                    .map(|(name, stages)| (name.clone(), to_documents(stages)))
                    .collect(),
            ),
            Stage::Group { id, fields } => {
                let mut group = Document::new();
                group.insert("_id".to_string(), id.clone());
                group.extend(fields.clone());
                Value::Object(group)
            }
            Stage::Sort(keys) => Value::Object(
                keys.iter()
                    .map(|(key, order)| (key.clone(), order.as_value()))
                    .collect(),
            ),
            Stage::Skip(n) => Value::from(*n),
            Stage::Limit(n) => Value::from(*n),
            Stage::UnionWith { coll, pipeline } => doc! {
                "coll" => coll.as_str(),
                "pipeline" => to_documents(pipeline),
            },
            Stage::Count(field) => Value::from(field.as_str()),
        };
        doc! { self.name() => body }
    }

    pub fn from_document(document: &Value) -> Result<Self, StageError> {
        let (name, body) = document
            .as_operator()
            .ok_or_else(|| StageError::Shape(to_json(document)))?;

        let fields = |stage: &'static str| {
            body.as_object().cloned().ok_or_else(|| StageError::Argument {
                stage,
                reason: "expected an object".to_string(),
            })
        };
        let count = |stage: &'static str| {
            body.as_int()
                .filter(|n| *n >= 0)
                .map(|n| n as usize)
                .ok_or_else(|| StageError::Argument {
                    stage,
                    reason: "expected a non-negative integer".to_string(),
                })
        };

        match name {
            "$match" => Ok(Stage::Match(body.clone())),
            "$project" => Ok(Stage::Project(fields("$project")?)),
            "$addFields" => Ok(Stage::AddFields(fields("$addFields")?)),
            "$set" => Ok(Stage::Set(fields("$set")?)),
            "$lookup" => {
                let spec = fields("$lookup")?;
                let text = |key: &str| {
                    spec.get(key)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| StageError::Argument {
                            stage: "$lookup",
                            reason: format!("missing '{}'", key),
                        })
                };
                Ok(Stage::Lookup(LookupStage {
                    from: text("from")?,
                    let_vars: spec.get("let").and_then(Value::as_object).cloned().unwrap_or_default(),
                    pipeline: from_documents(spec.get("pipeline").unwrap_or(&Value::Array(vec![])))?,
                    as_field: text("as")?,
                }))
            }
            "$unwind" => match body {
                Value::String(path) => Ok(Stage::unwind(strip_dollar(path, "$unwind")?)),
                Value::Object(spec) => {
                    let path = spec.get("path").and_then(Value::as_str).unwrap_or_default();
                    Ok(Stage::Unwind {
                        path: strip_dollar(path, "$unwind")?,
                        preserve_empty: spec
                            .get("preserveNullAndEmptyArrays")
                            .is_some_and(Value::is_truthy),
                    })
                }
                _ => Err(StageError::Argument {
                    stage: "$unwind",
                    reason: "expected a field path".to_string(),
                }),
            },
            "$facet" => {
                let mut facets = IndexMap::new();
                for (facet, stages) in fields("$facet")? {
                    facets.insert(facet, from_documents(&stages)?);
                }
                Ok(Stage::Facet(facets))
            }
            "$group" => {
                let mut spec = fields("$group")?;
                let id = spec.shift_remove("_id").ok_or_else(|| StageError::Argument {
                    stage: "$group",
                    reason: "missing '_id'".to_string(),
                })?;
                Ok(Stage::Group { id, fields: spec })
            }
            "$sort" => fields("$sort")?
                .into_iter()
                .map(|(key, order)| match order.as_int() {
                    Some(1) => Ok((key, SortOrder::Ascending)),
                    Some(-1) => Ok((key, SortOrder::Descending)),
                    _ => Err(StageError::Argument {
                        stage: "$sort",
                        reason: format!("invalid order for '{}'", key),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Stage::Sort),
            "$skip" => Ok(Stage::Skip(count("$skip")?)),
            "$limit" => Ok(Stage::Limit(count("$limit")?)),
            "$unionWith" => match body {
                Value::String(coll) => Ok(Stage::UnionWith {
                    coll: coll.clone(),
                    pipeline: vec![],
                }),
                _ => {
                    let spec = fields("$unionWith")?;
                    Ok(Stage::UnionWith {
                        coll: spec.get("coll").and_then(Value::as_str).unwrap_or_default().to_string(),
                        pipeline: from_documents(spec.get("pipeline").unwrap_or(&Value::Array(vec![])))?,
                    })
                }
            },
            "$count" => body
                .as_str()
                .map(|field| Stage::Count(field.to_string()))
                .ok_or_else(|| StageError::Argument {
                    stage: "$count",
                    reason: "expected a field name".to_string(),
                }),
            other => Err(StageError::Unknown(other.to_string())),
        }
    }
}

fn strip_dollar(path: &str, stage: &'static str) -> Result<String, StageError> {
    path.strip_prefix('$')
        .map(str::to_string)
        .ok_or_else(|| StageError::Argument {
            stage,
            reason: format!("field path '{}' must start with '$'", path),
        })
}

pub fn to_documents(stages: &[Stage]) -> Value {
    Value::Array(stages.iter().map(Stage::to_document).collect())
}

pub fn from_documents(documents: &Value) -> Result<Vec<Stage>, StageError> {
    match documents {
        Value::Array(items) => items.iter().map(Stage::from_document).collect(),
        other => Err(StageError::Shape(to_json(other))),
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_json(&self.to_document()))
    }
}

/// Result of compiling a query: the collection to aggregate and the stages
/// to run on it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub collection: String,
    pub pipeline: Vec<Stage>,
}

impl CompiledQuery {
    pub fn to_documents(&self) -> Value {
        to_documents(&self.pipeline)
    }
}

/// Shell form, `db.<collection>.aggregate([...])`, as logged after compiling.
impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&JsonPrinter::default().print_query(self))
    }
}

/// Sorts the operands of commutative operators (`$and`, `$or`, `$all`) so
/// that pipelines built in a different order compare equal.
///
/// ```
/// use pipeql::pipeline::normalize;
/// use pipeql::{doc, Value};
///
/// let a = doc! { "$and" => vec![doc! { "$eq" => vec![Value::from("$b"), 2.into()] }, doc! { "$eq" => vec![Value::from("$a"), 1.into()] }] };
/// let b = doc! { "$and" => vec![doc! { "$eq" => vec![Value::from("$a"), 1.into()] }, doc! { "$eq" => vec![Value::from("$b"), 2.into()] }] };
/// assert_eq!(normalize(&a), normalize(&b));
/// ```
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| {
                    let child = normalize(child);
                    let child = match (key.as_str(), child) {
                        ("$and" | "$or" | "$all", Value::Array(mut items)) => {
                            items.sort_by_cached_key(to_json);
                            Value::Array(items)
                        }
                        (_, other) => other,
                    };
                    (key.clone(), child)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// [`normalize`] applied to every stage of a pipeline.
pub fn normalize_pipeline(stages: &[Stage]) -> Value {
    normalize(&to_documents(stages))
}
