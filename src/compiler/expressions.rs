use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tracing::trace;

use super::context::QueryContext;
use super::{CompileError, Compiler, array, query};
use crate::ast::{CombineOp, Expr, Filter};
use crate::doc;
use crate::lookups::{self, Arity, Lookup};
use crate::resolve::Resolver;
use crate::schema::ScalarKind;
use crate::transform::OutputType;
use crate::value::Value;

/// Compiles a filter into a boolean expression.
pub(super) fn compile_filter<'s>(
    c: &Compiler<'s>,
    ctx: &mut QueryContext<'s>,
    filter: &Filter,
) -> Result<Value, CompileError> {
    match filter {
        Filter::Lookup { path, value } => compile_lookup(c, ctx, path, value),
        Filter::And(children) => {
            let mut compiled = children
                .iter()
                .map(|child| compile_filter(c, ctx, child))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match compiled.len() {
                0 => Value::Boolean(true),
                1 => compiled.remove(0),
                _ => doc! { "$and" => compiled },
            })
        }
        Filter::Or(children) => {
            ctx.enter_nullable();
            let compiled = children
                .iter()
                .map(|child| compile_filter(c, ctx, child))
                .collect::<Result<Vec<_>, _>>();
            ctx.leave_nullable();
            let mut compiled = compiled?;
            Ok(match compiled.len() {
                0 => Value::Boolean(false),
                1 => compiled.remove(0),
                _ => doc! { "$or" => compiled },
            })
        }
        Filter::Not(child) => {
            ctx.enter_nullable();
            let compiled = compile_filter(c, ctx, child);
            ctx.leave_nullable();
            Ok(doc! { "$not" => vec![compiled?] })
        }
        Filter::Exists(subquery) => {
            let field = query::compile_subquery(c, ctx, subquery, false)?;
            Ok(lookups::isnull(field, false))
        }
    }
}

fn compile_lookup<'s>(
    c: &Compiler<'s>,
    ctx: &mut QueryContext<'s>,
    path: &str,
    value: &Expr,
) -> Result<Value, CompileError> {
    let resolved = Resolver::new(c.schema, &c.config).lookup(ctx, path)?;
    if resolved.lookup == Lookup::IsNull {
        ctx.promote(&resolved.joins);
    }

    let output = resolved.target.output();
    let rhs = compile_rhs(c, ctx, output, resolved.lookup, value)?;
    trace!(path, lookup = %resolved.lookup, "compiling lookup");

    if output.is_mapped() {
        array::compile_mapped(&resolved.target, resolved.lookup, rhs)
    } else {
        Ok(resolved.lookup.build(resolved.target.render(), rhs))
    }
}

/// Compiles the value side of a lookup.
fn compile_rhs<'s>(
    c: &Compiler<'s>,
    ctx: &mut QueryContext<'s>,
    output: &OutputType,
    lookup: Lookup,
    value: &Expr,
) -> Result<Value, CompileError> {
    match value {
        Expr::Value(literal) => prepare_literal(lookup, output.scalar(), literal),
        Expr::List(items) => {
            if !matches!(lookup.arity(), Arity::List | Arity::Pair) {
                return Err(shape(lookup, "a single value", "array"));
            }
            if lookup.arity() == Arity::Pair && items.len() != 2 {
                return Err(shape(lookup, "a two-element list", "array"));
            }
            let mut compiled = Vec::with_capacity(items.len());
            for item in items {
                compiled.push(match item {
                    Expr::Value(literal) => prepare_scalar(lookup, output.scalar(), literal)?,
                    other => compile_expr(c, ctx, other)?.0,
                });
            }
            Ok(Value::Array(compiled))
        }
        Expr::Subquery(subquery) => {
            let wrap = lookup.arity() == Arity::List;
            query::compile_subquery(c, ctx, subquery, wrap)
        }
        other => Ok(compile_expr(c, ctx, other)?.0),
    }
}

fn prepare_literal(lookup: Lookup, kind: Option<ScalarKind>, value: &Value) -> Result<Value, CompileError> {
    match lookup.arity() {
        Arity::Single => prepare_scalar(lookup, kind, value),
        Arity::Flag => match value {
            Value::Boolean(flag) => Ok(Value::Boolean(*flag)),
            other => Err(shape(lookup, "a boolean", other.type_name())),
        },
        Arity::List => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| prepare_scalar(lookup, kind, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Err(shape(lookup, "a list", other.type_name())),
        },
        Arity::Pair => match value {
            Value::Array(items) if items.len() == 2 => items
                .iter()
                .map(|item| prepare_scalar(lookup, kind, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Err(shape(lookup, "a two-element list", other.type_name())),
        },
        Arity::Pattern => match value {
            Value::String(pattern) if lookup.escapes_literals() => Ok(literal(Value::String(regex::escape(pattern)))),
            Value::String(pattern) => Ok(literal(Value::String(pattern.clone()))),
            other => Err(shape(lookup, "a string", other.type_name())),
        },
    }
}

/// Converts a literal to the stored type of the field it is compared with.
fn prepare_scalar(lookup: Lookup, kind: Option<ScalarKind>, value: &Value) -> Result<Value, CompileError> {
    let mismatch = |expected: &str| shape(lookup, expected, value.type_name());

    let prepared = match (kind, value) {
        (_, Value::Null) => Value::Null,
        (None | Some(ScalarKind::Json), other) => other.clone(),
        (Some(ScalarKind::Integer), Value::Integer(n)) => Value::Integer(*n),
        (Some(ScalarKind::Integer), Value::Float(f)) if f.fract() == 0.0 => Value::Integer(*f as i64),
        (Some(ScalarKind::Integer), _) => return Err(mismatch("an integer")),
        (Some(ScalarKind::Float), Value::Integer(n)) => Value::Float(*n as f64),
        (Some(ScalarKind::Float), Value::Float(f)) => Value::Float(*f),
        (Some(ScalarKind::Float), Value::Decimal(d)) => Value::Float(d.to_f64().ok_or_else(|| mismatch("a float"))?),
        (Some(ScalarKind::Float), _) => return Err(mismatch("a float")),
        (Some(ScalarKind::Decimal), Value::Integer(n)) => Value::Decimal(Decimal::from(*n)),
        (Some(ScalarKind::Decimal), Value::Float(f)) => {
            Value::Decimal(Decimal::from_f64(*f).ok_or_else(|| mismatch("a decimal"))?)
        }
        (Some(ScalarKind::Decimal), Value::Decimal(d)) => Value::Decimal(*d),
        (Some(ScalarKind::Decimal), Value::String(s)) => {
            Value::Decimal(Decimal::from_str(s).map_err(|_| mismatch("a decimal"))?)
        }
        (Some(ScalarKind::Decimal), _) => return Err(mismatch("a decimal")),
        (Some(ScalarKind::String), Value::String(s)) => Value::String(s.clone()),
        (Some(ScalarKind::String), _) => return Err(mismatch("a string")),
        (Some(ScalarKind::Boolean), Value::Boolean(b)) => Value::Boolean(*b),
        (Some(ScalarKind::Boolean), _) => return Err(mismatch("a boolean")),
    };
    Ok(literal(prepared))
}

fn shape(lookup: Lookup, expected: &str, actual: &str) -> CompileError {
    CompileError::ValueShape {
        lookup: lookup.name(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Protects a literal from being read as an expression: strings starting
/// with `$` would be field paths and objects would be evaluated.
fn literal(value: Value) -> Value {
    match value {
        Value::String(s) if s.starts_with('$') => doc! { "$literal" => s },
        Value::Object(_) => doc! { "$literal" => value },
        Value::Array(items) => Value::Array(items.into_iter().map(literal).collect()),
        other => other,
    }
}

/// Compiles a value expression, returning it with its output type.
pub(super) fn compile_expr<'s>(
    c: &Compiler<'s>,
    ctx: &mut QueryContext<'s>,
    expr: &Expr,
) -> Result<(Value, OutputType), CompileError> {
    match expr {
        Expr::Value(value) => {
            let output = literal_output(value);
            let compiled = match value {
                Value::Integer(_) | Value::Array(_) => doc! { "$literal" => value.clone() },
                other => literal(other.clone()),
            };
            Ok((compiled, output))
        }
        Expr::Field(path) => {
            let resolved = Resolver::new(c.schema, &c.config).field(ctx, path)?;
            Ok((resolved.target.render(), resolved.target.output().clone()))
        }
        Expr::OuterRef(path) => {
            let index = ctx
                .outer_ref(path)
                .ok_or_else(|| CompileError::OuterRefOutsideSubquery(path.clone()))?;
            let var = Value::String(format!("$${}", c.config.parent_var(index)));
            Ok((var, OutputType::Scalar(ScalarKind::Json)))
        }
        Expr::List(items) => {
            let compiled = items
                .iter()
                .map(|item| compile_expr(c, ctx, item).map(|(v, _)| v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((Value::Array(compiled), OutputType::Scalar(ScalarKind::Json)))
        }
        Expr::Combined { op, lhs, rhs } => {
            let (lhs, lhs_output) = compile_expr(c, ctx, lhs)?;
            let (rhs, rhs_output) = compile_expr(c, ctx, rhs)?;
            let output = combined_output(*op, &lhs_output, &rhs_output);
            Ok((combine(*op, lhs, rhs), output))
        }
        Expr::Case { whens, default } => {
            let mut branches = Vec::with_capacity(whens.len());
            for when in whens {
                let condition = compile_filter(c, ctx, &when.condition)?;
                let (then, _) = compile_expr(c, ctx, &when.then)?;
                branches.push(doc! { "case" => condition, "then" => then });
            }
            let (default, output) = compile_expr(c, ctx, default)?;
            if branches.is_empty() {
                return Ok((default, output));
            }
            Ok((doc! { "$switch" => doc! { "branches" => branches, "default" => default } }, output))
        }
        Expr::Condition(filter) => Ok((compile_filter(c, ctx, filter)?, OutputType::Scalar(ScalarKind::Boolean))),
        Expr::Subquery(subquery) => {
            let field = query::compile_subquery(c, ctx, subquery, false)?;
            Ok((field, OutputType::Scalar(ScalarKind::Json)))
        }
    }
}

fn combine(op: CombineOp, lhs: Value, rhs: Value) -> Value {
    match op {
        CombineOp::BitLeftShift => doc! {
            "$multiply" => vec![lhs, doc! { "$pow" => vec![Value::Integer(2), rhs] }]
        },
        CombineOp::BitRightShift => doc! {
            "$floor" => doc! { "$divide" => vec![lhs, doc! { "$pow" => vec![Value::Integer(2), rhs] }] }
        },
        other => doc! { other.operator().unwrap_or("$add") => vec![lhs, rhs] },
    }
}

fn literal_output(value: &Value) -> OutputType {
    OutputType::Scalar(match value {
        Value::Integer(_) => ScalarKind::Integer,
        Value::Float(_) => ScalarKind::Float,
        Value::Decimal(_) => ScalarKind::Decimal,
        Value::String(_) => ScalarKind::String,
        Value::Boolean(_) => ScalarKind::Boolean,
        _ => ScalarKind::Json,
    })
}

fn combined_output(op: CombineOp, lhs: &OutputType, rhs: &OutputType) -> OutputType {
    use ScalarKind as K;

    let kind = match (op, lhs.scalar(), rhs.scalar()) {
        (_, Some(K::Decimal), Some(K::Integer | K::Float | K::Decimal))
        | (_, Some(K::Integer | K::Float), Some(K::Decimal)) => K::Decimal,
        (CombineOp::Divide | CombineOp::Power, Some(K::Integer | K::Float), Some(K::Integer | K::Float)) => K::Float,
        (_, Some(K::Integer), Some(K::Integer)) => K::Integer,
        (_, Some(K::Integer | K::Float), Some(K::Integer | K::Float)) => K::Float,
        _ => K::Json,
    };
    OutputType::Scalar(kind)
}
