use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::compiler::join::{JoinKind, JoinPair, JoinSpec};
use crate::pipeline::Stage;
use crate::schema::{Field, Model};
use crate::transform::OutputType;

/// Per-compile state of one query (or of one subquery).
///
/// Holds the joins, subquery lookups and annotations registered while the
/// query's expressions compile. A fresh context is created for every
/// compile and dropped with it.
#[derive(Debug)]
pub struct QueryContext<'s> {
    pub(crate) model: &'s Model,
    joins: Vec<JoinSpec>,
    join_paths: HashMap<String, usize>,
    subqueries: Vec<Stage>,
    subquery_count: usize,
    /// Outer paths referenced from inside a subquery, by variable index.
    outer_refs: Option<IndexMap<String, usize>>,
    annotations: IndexMap<String, OutputType>,
    annotation_refs: HashSet<String>,
    /// Nesting depth of OR/NOT branches; joins made inside them must keep
    /// unmatched rows.
    nullable_depth: usize,
}

impl<'s> QueryContext<'s> {
    pub fn new(model: &'s Model) -> Self {
        QueryContext {
            model,
            joins: Vec::new(),
            join_paths: HashMap::new(),
            subqueries: Vec::new(),
            subquery_count: 0,
            outer_refs: None,
            annotations: IndexMap::new(),
            annotation_refs: HashSet::new(),
            nullable_depth: 0,
        }
    }

    /// Context of a correlated subquery, which may reference outer fields.
    pub fn subquery(model: &'s Model) -> Self {
        QueryContext {
            outer_refs: Some(IndexMap::new()),
            ..QueryContext::new(model)
        }
    }

    pub fn collection(&self) -> String {
        self.model.collection()
    }

    /// Registers (or reuses) the join reached through `path`, returning its
    /// alias and index.
    pub fn join(
        &mut self,
        path: &str,
        parent_alias: Option<String>,
        field: &Field,
        target: &Model,
        target_field: &Field,
    ) -> (String, usize) {
        let kind = if field.null || self.nullable_depth > 0 {
            JoinKind::Left
        } else {
            JoinKind::Inner
        };

        if let Some(&index) = self.join_paths.get(path) {
            if kind == JoinKind::Left {
                self.joins[index].kind = JoinKind::Left;
            }
            return (self.joins[index].alias.clone(), index);
        }

        let collection = target.collection();
        let mut alias = collection.clone();
        let mut n = self.joins.len();
        while self.alias_taken(&alias) {
            n += 1;
            alias = format!("T{}", n);
        }

        let index = self.joins.len();
        self.joins.push(JoinSpec {
            parent_alias,
            collection,
            alias: alias.clone(),
            pairs: vec![JoinPair {
                parent: field.column(),
                child: target_field.column(),
                parent_type: field.kind.storage_type(),
                child_type: target_field.kind.storage_type(),
            }],
            kind,
        });
        self.join_paths.insert(path.to_string(), index);
        (alias, index)
    }

    /// Join aliases live at the top level of the root document, next to its
    /// stored columns and annotations.
    fn alias_taken(&self, alias: &str) -> bool {
        alias == self.collection()
            || self.model.columns().any(|column| column == alias)
            || self.has_annotation(alias)
            || self.joins.iter().any(|j| j.alias == alias)
    }

    /// Makes the given joins keep parents without a match.
    pub fn promote(&mut self, joins: &[usize]) {
        for &index in joins {
            if let Some(join) = self.joins.get_mut(index) {
                join.kind = JoinKind::Left;
            }
        }
    }

    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    pub fn enter_nullable(&mut self) {
        self.nullable_depth += 1;
    }

    pub fn leave_nullable(&mut self) {
        self.nullable_depth = self.nullable_depth.saturating_sub(1);
    }

    /// Reserves the index of the next subquery output field.
    pub fn next_subquery(&mut self) -> usize {
        let index = self.subquery_count;
        self.subquery_count += 1;
        index
    }

    pub fn push_subquery_stages(&mut self, stages: Vec<Stage>) {
        self.subqueries.extend(stages);
    }

    pub fn subquery_stages(&self) -> &[Stage] {
        &self.subqueries
    }

    /// Index of the `let` variable carrying an outer path, or `None` when
    /// this is not a subquery context.
    pub fn outer_ref(&mut self, path: &str) -> Option<usize> {
        let refs = self.outer_refs.as_mut()?;
        let next = refs.len();
        Some(*refs.entry(path.to_string()).or_insert(next))
    }

    pub fn outer_refs(&self) -> impl Iterator<Item = (&str, usize)> {
        self.outer_refs
            .iter()
            .flat_map(|refs| refs.iter().map(|(path, i)| (path.as_str(), *i)))
    }

    pub fn add_annotation(&mut self, name: &str, output: OutputType) {
        self.annotations.insert(name.to_string(), output);
    }

    /// Output type of an annotation, recording the reference.
    pub fn annotation(&mut self, name: &str) -> Option<OutputType> {
        let output = self.annotations.get(name).cloned()?;
        self.annotation_refs.insert(name.to_string());
        Some(output)
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.contains_key(name)
    }

    /// Annotations referenced since the last call.
    pub fn take_annotation_refs(&mut self) -> HashSet<String> {
        std::mem::take(&mut self.annotation_refs)
    }
}
