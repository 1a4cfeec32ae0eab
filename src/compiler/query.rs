use indexmap::IndexMap;
use tracing::trace;

use super::context::QueryContext;
use super::join::JoinCompiler;
use super::{CompileError, Compiler, expressions};
use crate::ast::{Combinator, Query};
use crate::doc;
use crate::pipeline::{CompiledQuery, LookupStage, SortOrder, Stage};
use crate::resolve::Resolver;
use crate::schema::Model;
use crate::value::{Document, Value};

/// Stages of one query, before assembly.
struct Plan {
    annotations: Vec<Stage>,
    filter: Option<Value>,
    order: Vec<Stage>,
    window: Vec<Stage>,
    /// Returned fields with the expressions that produce them.
    columns: Vec<(String, Value)>,
}

pub(super) fn queryable_model<'s>(c: &Compiler<'s>, name: &str) -> Result<&'s Model, CompileError> {
    let model = c
        .schema
        .model(name)
        .ok_or_else(|| CompileError::UnknownModel(name.to_string()))?;
    if model.embedded {
        return Err(CompileError::EmbeddedQuery(model.name.clone()));
    }
    Ok(model)
}

/// Join and subquery stages registered in `ctx`, in that order.
pub(super) fn prerequisite_stages(c: &Compiler<'_>, ctx: &QueryContext<'_>) -> Vec<Stage> {
    let joins = JoinCompiler::new(&c.config);
    let mut stages: Vec<Stage> = ctx.joins().iter().flat_map(|join| joins.compile(join)).collect();
    stages.extend(ctx.subquery_stages().iter().cloned());
    stages
}

pub(super) fn compile_query(c: &Compiler<'_>, query: &Query) -> Result<CompiledQuery, CompileError> {
    let model = queryable_model(c, &query.model)?;
    let mut ctx = QueryContext::new(model);
    let plan = plan(c, &mut ctx, query)?;
    let pipeline = assemble(c, &ctx, plan, query)?;
    Ok(CompiledQuery {
        collection: model.collection(),
        pipeline,
    })
}

fn plan<'s>(c: &Compiler<'s>, ctx: &mut QueryContext<'s>, query: &Query) -> Result<Plan, CompileError> {
    let resolver = Resolver::new(c.schema, &c.config);

    for relation in &query.select_related {
        resolver.field(ctx, &format!("{}__pk", relation))?;
    }

    let mut annotations = Vec::new();
    let mut pending = Document::new();
    for (name, expr) in &query.annotations {
        let (value, output) = expressions::compile_expr(c, ctx, expr)?;
        // A stage cannot see fields it adds itself.
        if ctx.take_annotation_refs().iter().any(|r| pending.contains_key(r)) {
            annotations.push(Stage::AddFields(std::mem::take(&mut pending)));
        }
        pending.insert(name.clone(), value);
        ctx.add_annotation(name, output);
    }
    if !pending.is_empty() {
        annotations.push(Stage::AddFields(pending));
    }

    let filter = query
        .filter
        .as_ref()
        .map(|filter| expressions::compile_filter(c, ctx, filter))
        .transpose()?;

    let mut keys = Vec::new();
    let mut computed = Document::new();
    for (i, order) in query.order_by.iter().enumerate() {
        let resolved = resolver.field(ctx, &order.path)?;
        let key = match resolved.target.render() {
            Value::String(path) if !path.starts_with("$$") => path[1..].to_string(),
            expr => {
                let key = format!("__order{}", i);
                computed.insert(key.clone(), expr);
                key
            }
        };
        let direction = if order.descending {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        };
        keys.push((key, direction));
    }
    let mut order = Vec::new();
    if !computed.is_empty() {
        order.push(Stage::AddFields(computed));
    }
    if !keys.is_empty() {
        order.push(Stage::Sort(keys));
    }

    let mut window = Vec::new();
    if let Some(offset) = query.offset {
        window.push(Stage::Skip(offset));
    }
    if let Some(limit) = query.limit {
        window.push(Stage::Limit(limit));
    }

    let columns = if query.values.is_empty() {
        let fields = ctx.model.fields.iter().map(|field| field.column());
        let annotated = query.annotations.iter().map(|(name, _)| name.clone());
        fields
            .chain(annotated)
            .map(|name| {
                let expr = Value::String(format!("${}", name));
                (name, expr)
            })
            .collect()
    } else {
        let mut columns = Vec::with_capacity(query.values.len());
        for path in &query.values {
            let resolved = resolver.field(ctx, path)?;
            columns.push((path.clone(), resolved.target.render()));
        }
        columns
    };

    Ok(Plan {
        annotations,
        filter,
        order,
        window,
        columns,
    })
}

fn assemble(c: &Compiler<'_>, ctx: &QueryContext<'_>, plan: Plan, query: &Query) -> Result<Vec<Stage>, CompileError> {
    let projection: Document = plan
        .columns
        .iter()
        .map(|(name, expr)| {
            let value = if *expr == Value::String(format!("${}", name)) {
                Value::Integer(1)
            } else {
                expr.clone()
            };
            (name.clone(), value)
        })
        .collect();

    let mut stages = prerequisite_stages(c, ctx);
    stages.extend(plan.annotations);
    if let Some(filter) = plan.filter {
        stages.push(Stage::match_expr(filter));
    }

    let Some(Combinator::Union { others, all }) = &query.combinator else {
        stages.extend(plan.order);
        stages.extend(plan.window);
        stages.push(Stage::Project(projection));
        return Ok(stages);
    };

    stages.push(Stage::Project(projection.clone()));
    for other in others {
        let compiled = compile_query(c, other)?;
        stages.push(Stage::UnionWith {
            coll: compiled.collection,
            pipeline: compiled.pipeline,
        });
    }

    if !all {
        let mut id = Document::new();
        let mut restore = Document::new();
        for name in projection.keys() {
            id.insert(name.clone(), Value::String(format!("${}", name)));
            restore.insert(name.clone(), Value::String(format!("$_id.{}", name)));
        }
        stages.push(Stage::Group {
            id: Value::Object(id),
            fields: Document::new(),
        });
        stages.push(Stage::AddFields(restore));
    }

    // Combined results only carry the projected fields, so ordering goes by
    // their names.
    if !query.order_by.is_empty() {
        let keys = query
            .order_by
            .iter()
            .map(|order| {
                let direction = if order.descending {
                    SortOrder::Descending
                } else {
                    SortOrder::Ascending
                };
                (order.path.clone(), direction)
            })
            .collect();
        stages.push(Stage::Sort(keys));
    }
    stages.extend(plan.window);
    Ok(stages)
}

/// Compiles a correlated subquery into a `$lookup` registered in `ctx` and
/// returns the expression reading its single column.
///
/// With `wrap`, the subquery's column is collected into one array so the
/// result can feed `in`-style lookups.
pub(super) fn compile_subquery<'s>(
    c: &Compiler<'s>,
    ctx: &mut QueryContext<'s>,
    query: &Query,
    wrap: bool,
) -> Result<Value, CompileError> {
    let model = queryable_model(c, &query.model)?;
    let mut sub = QueryContext::subquery(model);
    let mut plan = plan(c, &mut sub, query)?;

    if query.values.is_empty() {
        plan.columns = vec![("_id".to_string(), Value::from("$_id"))];
    } else if plan.columns.len() != 1 {
        return Err(CompileError::SubqueryColumns {
            model: model.name.clone(),
            count: plan.columns.len(),
        });
    }
    let (field, expr) = plan.columns[0].clone();

    let mut stages = assemble(c, &sub, plan, query)?;
    if wrap {
        let expr = if query.combinator.is_none() && matches!(stages.last(), Some(Stage::Project(_))) {
            stages.pop();
            expr
        } else {
            Value::String(format!("${}", field))
        };
        stages.extend(wrapping_stages(&field, expr));
    }

    let resolver = Resolver::new(c.schema, &c.config);
    let outer: Vec<(String, usize)> = sub.outer_refs().map(|(path, i)| (path.to_string(), i)).collect();
    let mut let_vars = Document::new();
    for (path, index) in outer {
        let resolved = resolver.field(ctx, &path)?;
        let_vars.insert(c.config.parent_var(index), resolved.target.render());
    }

    let output = c.config.subquery_field(ctx.next_subquery());
    trace!(collection = %model.collection(), output = %output, wrap, "compiled subquery");

    ctx.push_subquery_stages(vec![
        Stage::Lookup(LookupStage {
            from: model.collection(),
            let_vars,
            pipeline: stages,
            as_field: output.clone(),
        }),
        first_or_empty(&output),
    ]);

    Ok(Value::String(format!("${}.{}", output, field)))
}

/// Collects the values of `expr` over all subquery documents into a single
/// `{field: [...]}` document.
fn wrapping_stages(field: &str, expr: Value) -> Vec<Stage> {
    let mut tmp = Document::new();
    tmp.insert("tmp_name".to_string(), expr);

    let mut collect = Document::new();
    collect.insert("tmp_name".to_string(), doc! { "$addToSet" => "$tmp_name" });

    let mut facets = IndexMap::new();
    facets.insert(
        "group".to_string(),
        vec![
            Stage::Project(tmp),
            Stage::unwind("tmp_name"),
            Stage::Group {
                id: Value::Null,
                fields: collect,
            },
        ],
    );

    let mut result = Document::new();
    result.insert(
        field.to_string(),
        doc! {
            "$ifNull" => vec![
                doc! {
                    "$getField" => doc! {
                        "input" => doc! { "$arrayElemAt" => vec![Value::from("$group"), Value::Integer(0)] },
                        "field" => "tmp_name",
                    }
                },
                Value::Array(vec![]),
            ]
        },
    );

    vec![Stage::Facet(facets), Stage::Project(result)]
}

/// Replaces the `$lookup` output array by its first document, or `{}`.
fn first_or_empty(output: &str) -> Stage {
    let path = Value::String(format!("${}", output));
    let mut set = Document::new();
    set.insert(
        output.to_string(),
        doc! {
            "$cond" => doc! {
                "if" => doc! {
                    "$or" => vec![
                        doc! { "$eq" => vec![doc! { "$type" => path.clone() }, Value::from("missing")] },
                        doc! { "$eq" => vec![doc! { "$size" => path.clone() }, Value::Integer(0)] },
                    ]
                },
                "then" => doc! {},
                "else" => doc! { "$arrayElemAt" => vec![path, Value::Integer(0)] },
            }
        },
    );
    Stage::Set(set)
}
