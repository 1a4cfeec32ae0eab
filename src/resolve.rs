//! Lookup path resolution.
//!
//! A lookup path is a `__`-separated list of names, such as
//! `sections__artifacts__0__name__icontains`. Resolution walks it from the
//! query's model one name at a time:
//!
//! - on a model, a name selects a field; relation fields register a join
//!   and continue on the target model
//! - on an embedded document, a name selects one of its fields
//! - on an embedded array, a name is an index (`0`), a slice (`0_2`), the
//!   `len` transform, or a field of the element model, which broadcasts
//!   over the elements
//! - on a JSON value, any name that is not a lookup selects a key
//! - the last name may be a lookup; `exact` is implied otherwise
//!
//! The result is a [`Transform`] chain plus the lookup to apply to it.

use std::rc::Rc;

use tracing::trace;

use crate::compiler::CompileError;
use crate::compiler::context::QueryContext;
use crate::config::CompilerConfig;
use crate::lookups::Lookup;
use crate::schema::{FieldKind, Model, ScalarKind, SchemaService};
use crate::transform::{OutputType, Step, Transform};

/// A resolved lookup path.
#[derive(Debug)]
pub struct Resolved {
    pub target: Rc<Transform>,
    pub lookup: Lookup,
    /// Indices of the joins the path went through.
    pub joins: Vec<usize>,
}

enum Cursor<'s> {
    Model {
        model: &'s Model,
        alias: Option<String>,
        relation_path: String,
    },
    Value(Rc<Transform>),
}

enum Next {
    Transform(Rc<Transform>),
    Lookup(Lookup),
}

pub struct Resolver<'a, 's> {
    schema: &'s dyn SchemaService,
    config: &'a CompilerConfig,
}

impl<'a, 's> Resolver<'a, 's> {
    pub fn new(schema: &'s dyn SchemaService, config: &'a CompilerConfig) -> Self {
        Resolver { schema, config }
    }

    /// Resolves a filter path, which may end in a lookup.
    pub fn lookup(&self, ctx: &mut QueryContext<'s>, path: &str) -> Result<Resolved, CompileError> {
        self.walk(ctx, path, true)
    }

    /// Resolves a field reference, which must not end in a lookup.
    pub fn field(&self, ctx: &mut QueryContext<'s>, path: &str) -> Result<Resolved, CompileError> {
        self.walk(ctx, path, false)
    }

    fn walk(&self, ctx: &mut QueryContext<'s>, path: &str, allow_lookup: bool) -> Result<Resolved, CompileError> {
        let segments: Vec<&str> = path.split("__").collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CompileError::InvalidPath(path.to_string()));
        }

        let mut joins = Vec::new();
        let mut terminal = None;
        let mut rest = &segments[..];

        let mut cursor = match ctx.annotation(segments[0]) {
            Some(output) => {
                rest = &segments[1..];
                Cursor::Value(Transform::annotation(segments[0], output))
            }
            None => Cursor::Model {
                model: ctx.model,
                alias: None,
                relation_path: String::new(),
            },
        };

        while let Some((&name, tail)) = rest.split_first() {
            let last = tail.is_empty();
            cursor = match cursor {
                Cursor::Model {
                    model,
                    alias,
                    relation_path,
                } => {
                    let field = model.field(name).ok_or_else(|| no_field(model, name))?;
                    match &field.kind {
                        FieldKind::ForeignKey {
                            model: target_name,
                            to_field,
                            ..
                        } => {
                            let target = self.model(target_name)?;
                            let local = match tail.first() {
                                None => true,
                                Some(next) => Lookup::from_name(next).is_some() && target.field(next).is_none(),
                            };
                            if local {
                                let output = OutputType::of_field(&field.kind);
                                Cursor::Value(Transform::column(alias, field.column(), output))
                            } else {
                                let key = to_field.as_deref().unwrap_or("id");
                                let target_field = target.field(key).ok_or_else(|| no_field(target, key))?;
                                let relation_path = if relation_path.is_empty() {
                                    name.to_string()
                                } else {
                                    format!("{}__{}", relation_path, name)
                                };
                                let (alias, index) = ctx.join(&relation_path, alias, field, target, target_field);
                                joins.push(index);
                                Cursor::Model {
                                    model: target,
                                    alias: Some(alias),
                                    relation_path,
                                }
                            }
                        }
                        kind => {
                            let output = OutputType::of_field(kind);
                            Cursor::Value(Transform::column(alias, field.column(), output))
                        }
                    }
                }
                Cursor::Value(transform) => match self.step(&transform, name, last)? {
                    Next::Transform(next) => Cursor::Value(next),
                    Next::Lookup(lookup) => {
                        terminal = Some(lookup);
                        Cursor::Value(transform)
                    }
                },
            };
            rest = tail;
        }

        let target = match cursor {
            Cursor::Value(target) => target,
            Cursor::Model { .. } => return Err(CompileError::InvalidPath(path.to_string())),
        };

        if !allow_lookup {
            if let Some(lookup) = terminal {
                return Err(CompileError::LookupInReference {
                    path: path.to_string(),
                    lookup: lookup.name(),
                });
            }
        }

        let lookup = terminal.unwrap_or(Lookup::Exact);
        if allow_lookup && !lookup.is_allowed(target.output()) {
            return Err(match target.output() {
                OutputType::EmbeddedArray(_) => CompileError::ArrayLookupNotAllowed,
                output => self.unsupported(lookup.name(), output),
            });
        }

        trace!(path, lookup = lookup.name(), "resolved lookup path");
        Ok(Resolved { target, lookup, joins })
    }

    fn step(&self, transform: &Rc<Transform>, name: &str, last: bool) -> Result<Next, CompileError> {
        let output = transform.output();
        match output {
            OutputType::Embedded(model_name) => {
                let model = self.model(model_name)?;
                match model.field(name) {
                    Some(field) => {
                        if field.kind.is_relation() {
                            return Err(CompileError::RelationInEmbedded {
                                model: model.name.clone(),
                                field: field.name.clone(),
                            });
                        }
                        let output = OutputType::of_field(&field.kind);
                        Ok(Next::Transform(transform.chain(Step::Key(field.column()), output)))
                    }
                    None => terminal_lookup(name, last).ok_or_else(|| no_field(model, name)),
                }
            }
            OutputType::EmbeddedArray(model_name) => {
                if let Some(next) = array_step(transform, model_name, name)? {
                    return Ok(Next::Transform(next));
                }
                let model = self.model(model_name)?;
                match model.field(name) {
                    Some(field) => {
                        if field.kind.is_relation() {
                            return Err(CompileError::RelationInEmbedded {
                                model: model.name.clone(),
                                field: field.name.clone(),
                            });
                        }
                        let inner = Transform::item(OutputType::Embedded(model_name.clone()))
                            .chain(Step::Key(field.column()), OutputType::of_field(&field.kind));
                        Ok(Next::Transform(Transform::each(transform, inner)))
                    }
                    None if Lookup::from_name(name).is_some() => Err(CompileError::ArrayLookupNotAllowed),
                    None => Err(no_field(model, name)),
                }
            }
            OutputType::Mapped(_) => {
                let (Some(array), Some(inner)) = (transform.prev(), transform.inner()) else {
                    return Err(CompileError::InvalidPath(name.to_string()));
                };
                match self.step_element(inner, output, name, last)? {
                    Next::Transform(next) => Ok(Next::Transform(Transform::each(array, next))),
                    lookup => Ok(lookup),
                }
            }
            OutputType::Scalar(ScalarKind::Json) => match terminal_lookup(name, last) {
                Some(Next::Lookup(lookup)) if lookup.is_allowed(output) => Ok(Next::Lookup(lookup)),
                _ => Ok(Next::Transform(
                    transform.chain(Step::JsonKey(name.to_string()), OutputType::Scalar(ScalarKind::Json)),
                )),
            },
            OutputType::Scalar(_) => {
                if name == "len" {
                    return Err(self.unsupported(name, output));
                }
                terminal_lookup(name, last).ok_or_else(|| self.unsupported(name, output))
            }
        }
    }

    /// One step on the element chain of a broadcast. `mapped` is the
    /// broadcast's own output, used for lookup validation.
    fn step_element(
        &self,
        inner: &Rc<Transform>,
        mapped: &OutputType,
        name: &str,
        last: bool,
    ) -> Result<Next, CompileError> {
        match inner.output() {
            OutputType::EmbeddedArray(model_name) => {
                if let Some(next) = array_step(inner, model_name, name)? {
                    return Ok(Next::Transform(next));
                }
                if self.model(model_name)?.field(name).is_some() {
                    return Err(CompileError::MultiLevelArrayTraversal);
                }
                terminal_lookup(name, last).ok_or_else(|| self.unsupported(name, mapped))
            }
            OutputType::Embedded(model_name) => {
                let model = self.model(model_name)?;
                match model.field(name) {
                    Some(field) if !field.kind.is_relation() => {
                        let output = OutputType::of_field(&field.kind);
                        Ok(Next::Transform(inner.chain(Step::Key(field.column()), output)))
                    }
                    Some(field) => Err(CompileError::RelationInEmbedded {
                        model: model.name.clone(),
                        field: field.name.clone(),
                    }),
                    None => terminal_lookup(name, last).ok_or_else(|| self.unsupported(name, mapped)),
                }
            }
            OutputType::Scalar(ScalarKind::Json) => match terminal_lookup(name, last) {
                Some(Next::Lookup(lookup)) if lookup.is_allowed(mapped) => Ok(Next::Lookup(lookup)),
                _ => Ok(Next::Transform(
                    inner.chain(Step::JsonKey(name.to_string()), OutputType::Scalar(ScalarKind::Json)),
                )),
            },
            OutputType::Scalar(_) | OutputType::Mapped(_) => {
                terminal_lookup(name, last).ok_or_else(|| self.unsupported(name, mapped))
            }
        }
    }

    fn model(&self, name: &str) -> Result<&'s Model, CompileError> {
        self.schema
            .model(name)
            .ok_or_else(|| CompileError::UnknownModel(name.to_string()))
    }

    fn unsupported(&self, name: &str, output: &OutputType) -> CompileError {
        let allowed = Lookup::allowed(output);
        CompileError::UnsupportedLookup {
            name: name.to_string(),
            target: output.describe(),
            suggestions: suggest(name, allowed.iter().map(Lookup::name), self.config),
        }
    }
}

fn no_field(model: &Model, name: &str) -> CompileError {
    CompileError::FieldDoesNotExist {
        model: model.name.clone(),
        field: name.to_string(),
    }
}

fn terminal_lookup(name: &str, last: bool) -> Option<Next> {
    if !last {
        return None;
    }
    Lookup::from_name(name).map(Next::Lookup)
}

/// Index, slice or `len` on an embedded array.
fn array_step(array: &Rc<Transform>, model: &str, name: &str) -> Result<Option<Rc<Transform>>, CompileError> {
    if name == "len" {
        return Ok(Some(array.chain(Step::Len, OutputType::Scalar(ScalarKind::Integer))));
    }
    if let Ok(index) = name.parse::<u32>() {
        return Ok(Some(
            array.chain(Step::Index(i64::from(index)), OutputType::Embedded(model.to_string())),
        ));
    }
    if let Some((start, end)) = name.split_once('_') {
        if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) {
            if end <= start {
                return Err(CompileError::InvalidSlice(name.to_string()));
            }
            let step = Step::Slice {
                start: i64::from(start),
                end: i64::from(end),
            };
            return Ok(Some(array.chain(step, OutputType::EmbeddedArray(model.to_string()))));
        }
    }
    Ok(None)
}

/// Close matches for a misspelled name, best first.
///
/// Similarity is `2·M / (|a| + |b|)` where `M` is the number of characters
/// the two names share in order.
pub fn suggest<'n>(name: &str, candidates: impl IntoIterator<Item = &'n str>, config: &CompilerConfig) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = candidates
        .into_iter()
        .map(|candidate| (similarity(name, candidate), candidate))
        .filter(|(score, _)| *score >= config.suggestion_cutoff)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(a.1)));
    scored
        .into_iter()
        .take(config.max_suggestions)
        .map(|(_, candidate)| candidate.to_string())
        .collect()
}

fn similarity(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    let matched = total - indel_distance(a, b);
    matched as f64 / total as f64
}

/// Edit distance counting only insertions and deletions.
fn indel_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();

    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];

    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            curr[j] = if *ca == b_chars[j - 1] {
                prev[j - 1]
            } else {
                (prev[j] + 1).min(curr[j - 1] + 1)
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
