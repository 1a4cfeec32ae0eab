//! Document stores that run compiled pipelines.

use std::collections::HashMap;

use tracing::debug;

use crate::evaluator::{Evaluator, ExecError};
use crate::pipeline::{CompiledQuery, Stage};
use crate::value::Value;

/// Results of an aggregation.
#[derive(Debug, Clone)]
pub struct Cursor {
    documents: std::vec::IntoIter<Value>,
}

impl Cursor {
    pub fn new(documents: Vec<Value>) -> Self {
        Cursor {
            documents: documents.into_iter(),
        }
    }
}

impl Iterator for Cursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.documents.next()
    }
}

/// Something that can run an aggregation pipeline on a named collection.
pub trait Store {
    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> Result<Cursor, ExecError>;

    fn run(&self, query: &CompiledQuery) -> Result<Cursor, ExecError> {
        self.aggregate(&query.collection, &query.pipeline)
    }
}

/// Collections held in memory, executed with [`Evaluator`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: &str, document: Value) {
        self.collections.entry(collection.to_string()).or_default().push(document);
    }

    pub fn insert_many(&mut self, collection: &str, documents: impl IntoIterator<Item = Value>) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    pub fn collection(&self, name: &str) -> &[Value] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Loads `{"collection": [documents...]}`.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(input)?;
        let mut store = MemoryStore::new();
        for (name, documents) in raw {
            let documents = match documents {
                serde_json::Value::Array(items) => items,
                single => vec![single],
            };
            store.insert_many(&name, documents.into_iter().map(crate::convert::json_to_value));
        }
        Ok(store)
    }
}

impl Store for MemoryStore {
    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> Result<Cursor, ExecError> {
        debug!(collection, stages = pipeline.len(), "aggregate");
        let evaluator = Evaluator::new(&self.collections);
        let documents = evaluator.run(self.collection(collection).to_vec(), pipeline, &HashMap::new())?;
        Ok(Cursor::new(documents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.aggregate("nothing", &[]).unwrap().count(), 0);
    }

    #[test]
    fn test_lookup_sees_let_vars() {
        let mut store = MemoryStore::new();
        store.insert("a", doc! { "_id" => 1, "b_id" => 10 });
        store.insert_many("b", vec![doc! { "_id" => 10, "n" => "ten" }, doc! { "_id" => 11, "n" => "eleven" }]);

        let pipeline = crate::pipeline::from_documents(&Value::Array(vec![doc! {
            "$lookup" => doc! {
                "from" => "b",
                "let" => doc! { "key" => "$b_id" },
                "pipeline" => vec![doc! { "$match" => doc! { "$expr" => doc! { "$eq" => vec![Value::from("$_id"), Value::from("$$key")] } } }],
                "as" => "b",
            }
        }]))
        .unwrap();

        let rows: Vec<Value> = store.aggregate("a", &pipeline).unwrap().collect();
        assert_eq!(rows.len(), 1);
        let joined = rows[0].get("b").and_then(Value::as_array).unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].get("n"), Some(&Value::from("ten")));
    }
}
