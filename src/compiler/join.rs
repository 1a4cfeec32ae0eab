use tracing::trace;

use crate::config::CompilerConfig;
use crate::doc;
use crate::pipeline::{LookupStage, Stage};
use crate::value::{Document, Value};

/// How unmatched parent documents are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Parents without a match are dropped.
    Inner,
    /// Parents without a match are kept with the alias set to null.
    Left,
}

/// One equality between a parent column and a child column.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPair {
    pub parent: String,
    pub child: String,
    /// Stored types of both sides; when they differ the keys are compared
    /// as strings.
    pub parent_type: &'static str,
    pub child_type: &'static str,
}

/// A join registered while compiling a query.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    /// Alias the parent columns live under; `None` for the root collection.
    pub parent_alias: Option<String>,
    pub collection: String,
    pub alias: String,
    pub pairs: Vec<JoinPair>,
    pub kind: JoinKind,
}

/// Turns join specifications into `$lookup`/`$unwind` stages.
pub struct JoinCompiler<'c> {
    config: &'c CompilerConfig,
}

impl<'c> JoinCompiler<'c> {
    pub fn new(config: &'c CompilerConfig) -> Self {
        JoinCompiler { config }
    }

    pub fn compile(&self, join: &JoinSpec) -> Vec<Stage> {
        let mut let_vars = Document::new();
        let mut conditions = Vec::with_capacity(join.pairs.len());

        for (i, pair) in join.pairs.iter().enumerate() {
            let var = self.config.parent_var(i);
            let parent = match &join.parent_alias {
                Some(alias) => format!("${}.{}", alias, pair.parent),
                None => format!("${}", pair.parent),
            };
            let mut parent = Value::String(parent);
            let mut child = Value::String(format!("${}", pair.child));

            if pair.parent_type != pair.child_type {
                if pair.parent_type != "string" {
                    parent = doc! { "$toString" => parent };
                }
                if pair.child_type != "string" {
                    child = doc! { "$toString" => child };
                }
            }

            let_vars.insert(var.clone(), parent);
            conditions.push(doc! { "$eq" => vec![Value::String(format!("$${}", var)), child] });
        }

        let mut stages = vec![Stage::Lookup(LookupStage {
            from: join.collection.clone(),
            let_vars,
            pipeline: vec![Stage::match_expr(doc! { "$and" => conditions })],
            as_field: join.alias.clone(),
        })];

        if join.kind == JoinKind::Left {
            let alias = Value::String(format!("${}", join.alias));
            let mut placeholder = Document::new();
            placeholder.insert(
                join.alias.clone(),
                doc! {
                    "$cond" => doc! {
                        "if" => doc! {
                            "$or" => vec![
                                doc! { "$eq" => vec![doc! { "$type" => alias.clone() }, Value::from("missing")] },
                                doc! { "$eq" => vec![doc! { "$size" => alias.clone() }, Value::from(0)] },
                            ]
                        },
                        "then" => vec![Value::Null],
                        "else" => alias,
                    }
                },
            );
            stages.push(Stage::Set(placeholder));
        }

        stages.push(Stage::unwind(join.alias.clone()));

        trace!(collection = %join.collection, alias = %join.alias, kind = ?join.kind, "compiled join");
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::to_json;
    use crate::pipeline::to_documents;

    fn join(kind: JoinKind, child_type: &'static str) -> JoinSpec {
        JoinSpec {
            parent_alias: None,
            collection: "author".into(),
            alias: "author".into(),
            pairs: vec![JoinPair {
                parent: "author_id".into(),
                child: "_id".into(),
                parent_type: "long",
                child_type,
            }],
            kind,
        }
    }

    #[test]
    fn test_inner_join_stages() {
        let config = CompilerConfig::default();
        let stages = JoinCompiler::new(&config).compile(&join(JoinKind::Inner, "long"));
        assert_eq!(
            to_json(&to_documents(&stages)),
            concat!(
                r#"[{"$lookup":{"from":"author","let":{"parent__field__0":"$author_id"},"#,
                r#""pipeline":[{"$match":{"$expr":{"$and":[{"$eq":["$$parent__field__0","$_id"]}]}}}],"as":"author"}},"#,
                r#"{"$unwind":"$author"}]"#
            )
        );
    }

    #[test]
    fn test_left_join_keeps_placeholder() {
        let config = CompilerConfig::default();
        let stages = JoinCompiler::new(&config).compile(&join(JoinKind::Left, "long"));
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[1].name(), "$set");
    }

    #[test]
    fn test_mismatched_key_types_cast_to_string() {
        let config = CompilerConfig::default();
        let stages = JoinCompiler::new(&config).compile(&join(JoinKind::Inner, "string"));
        let json = to_json(&stages[0].to_document());
        assert!(json.contains(r#""let":{"parent__field__0":{"$toString":"$author_id"}}"#));
        assert!(json.contains(r#"{"$eq":["$$parent__field__0","$_id"]}"#));
    }

    #[test]
    fn test_multi_column_join() {
        let config = CompilerConfig::default();
        let mut spec = join(JoinKind::Inner, "long");
        spec.parent_alias = Some("T1".into());
        spec.pairs.push(JoinPair {
            parent: "edition".into(),
            child: "edition".into(),
            parent_type: "int",
            child_type: "int",
        });
        let stages = JoinCompiler::new(&config).compile(&spec);
        assert_eq!(
            to_json(&stages[0].to_document()),
            concat!(
                r#"{"$lookup":{"from":"author","let":{"parent__field__0":"$T1.author_id","parent__field__1":"$T1.edition"},"#,
                r#""pipeline":[{"$match":{"$expr":{"$and":["#,
                r#"{"$eq":["$$parent__field__0","$_id"]},{"$eq":["$$parent__field__1","$edition"]}"#,
                r#"]}}}],"as":"author"}}"#
            )
        );
    }
}
