//! Reference executor for aggregation pipelines.
//!
//! Runs [`Stage`]s over in-memory documents with the store's semantics for
//! the operators the compiler emits. A missing field is kept distinct from
//! an explicit null: expression evaluation returns `Option<Value>`, with
//! `None` standing for "missing".

use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::IndexMap;
use regex::RegexBuilder;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tracing::trace;

use crate::output::to_json;
use crate::pipeline::{SortOrder, Stage, StageError};
use crate::value::{Document, Value};

/// Evaluation context: the current document and the bound variables
/// (`$$name`).
#[derive(Debug, Clone)]
pub struct EvalContext<'a> {
    /// The current document (what `$field` paths read)
    pub root: &'a Value,
    /// Variables from `$lookup.let` and `$map.as`
    pub vars: HashMap<String, Value>,
}

impl<'a> EvalContext<'a> {
    pub fn new(root: &'a Value) -> Self {
        EvalContext {
            root,
            vars: HashMap::new(),
        }
    }

    pub fn with_vars(root: &'a Value, vars: HashMap<String, Value>) -> Self {
        EvalContext { root, vars }
    }

    /// Create a new context with one more variable bound
    pub fn with_var(&self, name: &str, value: Value) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(name.to_string(), value);
        EvalContext { root: self.root, vars }
    }
}

/// Errors raised while executing a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Operand of the wrong type for an operator
    #[error("type error: {0}")]
    TypeError(String),

    #[error("unknown expression operator '{0}'")]
    UnknownOperator(String),

    #[error("use of undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("division by zero")]
    DivisionByZero,

    #[error(transparent)]
    Stage(#[from] StageError),
}

fn type_error(message: impl Into<String>) -> ExecError {
    ExecError::TypeError(message.into())
}

/// `$type` name of a possibly missing value.
fn type_name(value: Option<&Value>) -> &'static str {
    value.map_or("missing", Value::type_name)
}

pub fn truthy(value: Option<&Value>) -> bool {
    value.is_some_and(Value::is_truthy)
}

/// Executes pipelines against a set of named collections.
pub struct Evaluator<'c> {
    collections: &'c HashMap<String, Vec<Value>>,
}

impl<'c> Evaluator<'c> {
    pub fn new(collections: &'c HashMap<String, Vec<Value>>) -> Self {
        Evaluator { collections }
    }

    /// Runs `stages` over `docs`. `vars` are visible to every expression,
    /// which is how `$lookup` pipelines see their `let` variables.
    pub fn run(&self, docs: Vec<Value>, stages: &[Stage], vars: &HashMap<String, Value>) -> Result<Vec<Value>, ExecError> {
        stages.iter().try_fold(docs, |docs, stage| {
            trace!(stage = stage.name(), input = docs.len(), "running stage");
            self.run_stage(docs, stage, vars)
        })
    }

    fn collection(&self, name: &str) -> Vec<Value> {
        self.collections.get(name).cloned().unwrap_or_default()
    }

    fn run_stage(&self, docs: Vec<Value>, stage: &Stage, vars: &HashMap<String, Value>) -> Result<Vec<Value>, ExecError> {
        match stage {
            Stage::Match(query) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    let keep = {
                        let ctx = EvalContext::with_vars(&doc, vars.clone());
                        self.matches_query(query, &ctx)?
                    };
                    if keep {
                        kept.push(doc);
                    }
                }
                Ok(kept)
            }
            Stage::Project(spec) => docs.iter().map(|doc| self.project(doc, spec, vars)).collect(),
            Stage::AddFields(fields) | Stage::Set(fields) => docs
                .into_iter()
                .map(|doc| self.add_fields(doc, fields, vars))
                .collect(),
            Stage::Lookup(lookup) => {
                let foreign = self.collection(&lookup.from);
                let mut joined = Vec::with_capacity(docs.len());
                for doc in docs {
                    let mut inner_vars = vars.clone();
                    {
                        let ctx = EvalContext::with_vars(&doc, vars.clone());
                        for (name, expr) in &lookup.let_vars {
                            let value = self.eval(expr, &ctx)?.unwrap_or(Value::Null);
                            inner_vars.insert(name.clone(), value);
                        }
                    }
                    let matched = self.run(foreign.clone(), &lookup.pipeline, &inner_vars)?;
                    joined.push(set_field(doc, &lookup.as_field, Value::Array(matched)));
                }
                Ok(joined)
            }
            Stage::Unwind { path, preserve_empty } => {
                let mut unwound = Vec::new();
                for doc in docs {
                    match get_path(&doc, path) {
                        Some(Value::Array(items)) if !items.is_empty() => {
                            for item in items {
                                unwound.push(set_field(doc.clone(), path, item));
                            }
                        }
                        Some(Value::Array(_)) | Some(Value::Null) | None => {
                            if *preserve_empty {
                                unwound.push(doc);
                            }
                        }
                        Some(_) => unwound.push(doc),
                    }
                }
                Ok(unwound)
            }
            Stage::Facet(facets) => {
                let mut out = Document::new();
                for (name, stages) in facets {
                    let results = self.run(docs.clone(), stages, vars)?;
                    out.insert(name.clone(), Value::Array(results));
                }
                Ok(vec![Value::Object(out)])
            }
            Stage::Group { id, fields } => self.group(docs, id, fields, vars),
            Stage::Sort(keys) => {
                let mut docs = docs;
                docs.sort_by(|a, b| {
                    keys.iter()
                        .map(|(key, order)| {
                            let ordering = compare(get_path(a, key).as_ref(), get_path(b, key).as_ref());
                            match order {
                                SortOrder::Ascending => ordering,
                                SortOrder::Descending => ordering.reverse(),
                            }
                        })
                        .find(|ordering| *ordering != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                });
                Ok(docs)
            }
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Stage::UnionWith { coll, pipeline } => {
                let mut docs = docs;
                docs.extend(self.run(self.collection(coll), pipeline, vars)?);
                Ok(docs)
            }
            Stage::Count(field) => {
                if docs.is_empty() {
                    return Ok(vec![]);
                }
                let mut out = Document::new();
                out.insert(field.clone(), Value::from(docs.len()));
                Ok(vec![Value::Object(out)])
            }
        }
    }

    // ========================================
    // Stages
    // ========================================

    /// Query-language `$match`. Supports `$expr`, `$and`/`$or`, equality
    /// (array fields match when any element is equal) and comparison
    /// operators on field paths.
    fn matches_query(&self, query: &Value, ctx: &EvalContext) -> Result<bool, ExecError> {
        let Value::Object(conditions) = query else {
            return Err(type_error(format!("$match expects an object, got {}", query.type_name())));
        };

        for (key, condition) in conditions {
            let matched = match key.as_str() {
                "$expr" => truthy(self.eval(condition, ctx)?.as_ref()),
                "$and" | "$or" => {
                    let clauses = condition
                        .as_array()
                        .ok_or_else(|| type_error(format!("{} expects an array", key)))?;
                    let mut results = Vec::with_capacity(clauses.len());
                    for clause in clauses {
                        results.push(self.matches_query(clause, ctx)?);
                    }
                    if key == "$and" {
                        results.into_iter().all(|r| r)
                    } else {
                        results.into_iter().any(|r| r)
                    }
                }
                path => self.matches_condition(get_path(ctx.root, path).as_ref(), condition)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_condition(&self, value: Option<&Value>, condition: &Value) -> Result<bool, ExecError> {
        let operators = match condition {
            Value::Object(map) if map.keys().all(|k| k.starts_with('$')) && !map.is_empty() => map,
            literal => return Ok(query_equals(value, literal)),
        };

        for (op, operand) in operators {
            let matched = match op.as_str() {
                "$eq" => query_equals(value, operand),
                "$ne" => !query_equals(value, operand),
                "$gt" => value.is_some_and(|v| compare(Some(v), Some(operand)) == Ordering::Greater),
                "$gte" => value.is_some_and(|v| compare(Some(v), Some(operand)) != Ordering::Less),
                "$lt" => value.is_some_and(|v| compare(Some(v), Some(operand)) == Ordering::Less),
                "$lte" => value.is_some_and(|v| compare(Some(v), Some(operand)) != Ordering::Greater),
                "$in" | "$nin" => {
                    let candidates = operand
                        .as_array()
                        .ok_or_else(|| type_error(format!("{} needs an array", op)))?;
                    let found = candidates.iter().any(|c| query_equals(value, c));
                    if op == "$in" { found } else { !found }
                }
                "$exists" => value.is_some() == operand.is_truthy(),
                other => return Err(ExecError::UnknownOperator(other.to_string())),
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn project(&self, doc: &Value, spec: &Document, vars: &HashMap<String, Value>) -> Result<Value, ExecError> {
        let is_flag = |v: &Value| matches!(v, Value::Integer(_) | Value::Boolean(_) | Value::Float(_));
        let exclusion = spec
            .iter()
            .filter(|(key, _)| key.as_str() != "_id")
            .all(|(_, v)| is_flag(v) && !v.is_truthy())
            && !spec.is_empty();

        if exclusion {
            let mut out = doc.as_object().cloned().unwrap_or_default();
            for (key, value) in spec {
                if !value.is_truthy() {
                    out.shift_remove(key);
                }
            }
            return Ok(Value::Object(out));
        }

        let ctx = EvalContext::with_vars(doc, vars.clone());
        let mut out = Document::new();
        if !spec.contains_key("_id") {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
        for (key, value) in spec {
            if is_flag(value) {
                if value.is_truthy() {
                    if let Some(current) = get_path(doc, key) {
                        out.insert(key.clone(), current);
                    }
                }
            } else if let Some(computed) = self.eval(value, &ctx)? {
                out.insert(key.clone(), computed);
            }
        }
        Ok(Value::Object(out))
    }

    fn add_fields(&self, doc: Value, fields: &Document, vars: &HashMap<String, Value>) -> Result<Value, ExecError> {
        let mut computed = Vec::with_capacity(fields.len());
        {
            let ctx = EvalContext::with_vars(&doc, vars.clone());
            for (key, expr) in fields {
                computed.push((key.clone(), self.eval(expr, &ctx)?));
            }
        }
        let mut doc = doc;
        for (key, value) in computed {
            match value {
                Some(value) => doc = set_field(doc, &key, value),
                None => {
                    if let Value::Object(map) = &mut doc {
                        map.shift_remove(&key);
                    }
                }
            }
        }
        Ok(doc)
    }

    fn group(&self, docs: Vec<Value>, id: &Value, fields: &Document, vars: &HashMap<String, Value>) -> Result<Vec<Value>, ExecError> {
        let mut groups: IndexMap<String, (Value, Vec<Value>)> = IndexMap::new();
        for doc in docs {
            let key = {
                let ctx = EvalContext::with_vars(&doc, vars.clone());
                self.eval(id, &ctx)?.unwrap_or(Value::Null)
            };
            groups
                .entry(to_json(&key))
                .or_insert_with(|| (key, Vec::new()))
                .1
                .push(doc);
        }

        let mut out = Vec::with_capacity(groups.len());
        for (_, (key, members)) in groups {
            let mut result = Document::new();
            result.insert("_id".to_string(), key);
            for (name, accumulator) in fields {
                let (op, expr) = accumulator
                    .as_operator()
                    .ok_or_else(|| type_error(format!("the field '{}' must be an accumulator object", name)))?;
                let mut inputs = Vec::with_capacity(members.len());
                for member in &members {
                    let ctx = EvalContext::with_vars(member, vars.clone());
                    inputs.push(self.eval(expr, &ctx)?);
                }
                result.insert(name.clone(), accumulate(op, inputs)?);
            }
            out.push(Value::Object(result));
        }
        Ok(out)
    }

    // ========================================
    // Expressions
    // ========================================

    /// Evaluates an expression; `None` means the result is missing.
    pub fn eval(&self, expr: &Value, ctx: &EvalContext) -> Result<Option<Value>, ExecError> {
        match expr {
            Value::String(s) if s.starts_with("$$") => self.variable(&s[2..], ctx),
            Value::String(s) if s.starts_with('$') => Ok(get_path(ctx.root, &s[1..])),
            Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, ctx)?.unwrap_or(Value::Null));
                }
                Ok(Some(Value::Array(values)))
            }
            Value::Object(map) => match expr.as_operator() {
                Some((op, arg)) => self.operator(op, arg, ctx),
                None => {
                    let mut out = Document::new();
                    for (key, value) in map {
                        if let Some(value) = self.eval(value, ctx)? {
                            out.insert(key.clone(), value);
                        }
                    }
                    Ok(Some(Value::Object(out)))
                }
            },
            literal => Ok(Some(literal.clone())),
        }
    }

    fn variable(&self, reference: &str, ctx: &EvalContext) -> Result<Option<Value>, ExecError> {
        let (name, path) = match reference.split_once('.') {
            Some((name, path)) => (name, Some(path)),
            None => (reference, None),
        };
        let value = match name {
            "ROOT" | "CURRENT" => ctx.root.clone(),
            _ => ctx
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExecError::UndefinedVariable(name.to_string()))?,
        };
        Ok(match path {
            Some(path) => get_path(&value, path),
            None => Some(value),
        })
    }

    /// Operands of an operator: an array is the argument list, anything
    /// else is a single argument.
    fn args(&self, arg: &Value, ctx: &EvalContext) -> Result<Vec<Option<Value>>, ExecError> {
        match arg {
            Value::Array(items) => items.iter().map(|item| self.eval(item, ctx)).collect(),
            single => Ok(vec![self.eval(single, ctx)?]),
        }
    }

    fn args_exact<const N: usize>(&self, op: &str, arg: &Value, ctx: &EvalContext) -> Result<[Option<Value>; N], ExecError> {
        let args = self.args(arg, ctx)?;
        let count = args.len();
        args.try_into()
            .map_err(|_| type_error(format!("Expression {} takes exactly {} arguments. {} were passed in.", op, N, count)))
    }

    fn operator(&self, op: &str, arg: &Value, ctx: &EvalContext) -> Result<Option<Value>, ExecError> {
        let boolean = |b: bool| Ok(Some(Value::Boolean(b)));

        match op {
            "$literal" => Ok(Some(arg.clone())),

            "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
                let [a, b] = self.args_exact::<2>(op, arg, ctx)?;
                let ordering = compare(a.as_ref(), b.as_ref());
                boolean(match op {
                    "$eq" => ordering == Ordering::Equal,
                    "$ne" => ordering != Ordering::Equal,
                    "$gt" => ordering == Ordering::Greater,
                    "$gte" => ordering != Ordering::Less,
                    "$lt" => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                })
            }

            "$and" | "$or" => {
                let operands = match arg {
                    Value::Array(items) => items.as_slice(),
                    single => std::slice::from_ref(single),
                };
                let want = op == "$or";
                for operand in operands {
                    if truthy(self.eval(operand, ctx)?.as_ref()) == want {
                        return boolean(want);
                    }
                }
                boolean(!want)
            }

            "$not" => {
                let [a] = self.args_exact::<1>(op, arg, ctx)?;
                boolean(!truthy(a.as_ref()))
            }

            "$in" => {
                let [needle, haystack] = self.args_exact::<2>(op, arg, ctx)?;
                match haystack {
                    Some(Value::Array(items)) => {
                        boolean(items.iter().any(|item| compare(needle.as_ref(), Some(item)) == Ordering::Equal))
                    }
                    other => Err(type_error(format!(
                        "$in requires an array as a second argument, found: {}",
                        type_name(other.as_ref())
                    ))),
                }
            }

            "$type" => {
                let [a] = self.args_exact::<1>(op, arg, ctx)?;
                Ok(Some(Value::from(type_name(a.as_ref()))))
            }

            "$size" => {
                let [a] = self.args_exact::<1>(op, arg, ctx)?;
                match a {
                    Some(Value::Array(items)) => Ok(Some(Value::from(items.len()))),
                    other => Err(type_error(format!(
                        "The argument to $size must be an array. Type of argument was: {}",
                        type_name(other.as_ref())
                    ))),
                }
            }

            "$isArray" => {
                let [a] = self.args_exact::<1>(op, arg, ctx)?;
                boolean(matches!(a, Some(Value::Array(_))))
            }

            "$cond" => {
                let (condition, then, otherwise) = match arg {
                    Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                    Value::Object(spec) => (
                        spec.get("if").ok_or_else(|| type_error("Missing 'if' parameter to $cond"))?,
                        spec.get("then").ok_or_else(|| type_error("Missing 'then' parameter to $cond"))?,
                        spec.get("else").ok_or_else(|| type_error("Missing 'else' parameter to $cond"))?,
                    ),
                    _ => return Err(type_error("$cond takes an object or an array of three expressions")),
                };
                if truthy(self.eval(condition, ctx)?.as_ref()) {
                    self.eval(then, ctx)
                } else {
                    self.eval(otherwise, ctx)
                }
            }

            "$switch" => {
                let branches = arg
                    .get("branches")
                    .and_then(Value::as_array)
                    .ok_or_else(|| type_error("$switch requires an array of branches"))?;
                for branch in branches {
                    let case = branch.get("case").ok_or_else(|| type_error("$switch branch is missing 'case'"))?;
                    if truthy(self.eval(case, ctx)?.as_ref()) {
                        let then = branch.get("then").ok_or_else(|| type_error("$switch branch is missing 'then'"))?;
                        return self.eval(then, ctx);
                    }
                }
                match arg.get("default") {
                    Some(default) => self.eval(default, ctx),
                    None => Err(type_error("$switch could not find a matching branch and no default was given")),
                }
            }

            "$ifNull" => {
                let args = self.args(arg, ctx)?;
                let count = args.len();
                for (i, value) in args.into_iter().enumerate() {
                    match value {
                        Some(Value::Null) | None if i + 1 < count => continue,
                        other => return Ok(other),
                    }
                }
                Err(type_error("$ifNull needs at least two arguments"))
            }

            "$map" => {
                let input = arg.get("input").ok_or_else(|| type_error("Missing 'input' parameter to $map"))?;
                let body = arg.get("in").ok_or_else(|| type_error("Missing 'in' parameter to $map"))?;
                let name = arg.get("as").and_then(Value::as_str).unwrap_or("this");
                match self.eval(input, ctx)? {
                    None | Some(Value::Null) => Ok(Some(Value::Null)),
                    Some(Value::Array(items)) => {
                        let mut mapped = Vec::with_capacity(items.len());
                        for item in items {
                            let inner = ctx.with_var(name, item);
                            mapped.push(self.eval(body, &inner)?.unwrap_or(Value::Null));
                        }
                        Ok(Some(Value::Array(mapped)))
                    }
                    Some(other) => Err(type_error(format!(
                        "input to $map must be an array not {}",
                        other.type_name()
                    ))),
                }
            }

            "$anyElementTrue" | "$allElementsTrue" => {
                let [a] = self.args_exact::<1>(op, arg, ctx)?;
                let Some(Value::Array(items)) = a else {
                    return Err(type_error(format!(
                        "{}'s argument must be an array, but is {}",
                        op,
                        type_name(a.as_ref())
                    )));
                };
                if op == "$anyElementTrue" {
                    boolean(items.iter().any(Value::is_truthy))
                } else {
                    boolean(items.iter().all(Value::is_truthy))
                }
            }

            "$setIsSubset" => {
                let [a, b] = self.args_exact::<2>(op, arg, ctx)?;
                match (a, b) {
                    (Some(Value::Array(subset)), Some(Value::Array(superset))) => boolean(
                        subset
                            .iter()
                            .all(|x| superset.iter().any(|y| compare(Some(x), Some(y)) == Ordering::Equal)),
                    ),
                    (a, b) => Err(type_error(format!(
                        "both operands of $setIsSubset must be arrays, got {} and {}",
                        type_name(a.as_ref()),
                        type_name(b.as_ref())
                    ))),
                }
            }

            "$regexMatch" => {
                let input = arg.get("input").ok_or_else(|| type_error("$regexMatch requires 'input' parameter"))?;
                let regex = arg.get("regex").ok_or_else(|| type_error("$regexMatch requires 'regex' parameter"))?;
                let input = self.eval(input, ctx)?;
                let pattern = self.eval(regex, ctx)?;
                let options = match arg.get("options") {
                    Some(options) => self.eval(options, ctx)?,
                    None => None,
                };

                let text = match input {
                    None | Some(Value::Null) => return boolean(false),
                    Some(Value::String(text)) => text,
                    Some(other) => {
                        return Err(type_error(format!(
                            "$regexMatch needs 'input' to be of type string, got {}",
                            other.type_name()
                        )));
                    }
                };
                let Some(Value::String(pattern)) = pattern else {
                    return Err(type_error("$regexMatch needs 'regex' to be of type string"));
                };
                let insensitive = options
                    .as_ref()
                    .and_then(Value::as_str)
                    .is_some_and(|o| o.contains('i'));
                let regex = RegexBuilder::new(&pattern).case_insensitive(insensitive).build()?;
                boolean(regex.is_match(&text))
            }

            "$concat" => {
                let mut out = String::new();
                for value in self.args(arg, ctx)? {
                    match value {
                        None | Some(Value::Null) => return Ok(Some(Value::Null)),
                        Some(Value::String(s)) => out.push_str(&s),
                        Some(other) => {
                            return Err(type_error(format!(
                                "$concat only supports strings, not {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                Ok(Some(Value::String(out)))
            }

            "$getField" => {
                let (field, input) = match arg {
                    Value::Object(spec) if spec.contains_key("field") => (
                        spec.get("field").and_then(Value::as_str),
                        match spec.get("input") {
                            Some(input) => self.eval(input, ctx)?,
                            None => Some(ctx.root.clone()),
                        },
                    ),
                    other => (other.as_str(), Some(ctx.root.clone())),
                };
                let field = field.ok_or_else(|| type_error("$getField requires 'field' to be a string"))?;
                Ok(match input {
                    Some(Value::Object(map)) => map.get(field).cloned(),
                    Some(Value::Null) => Some(Value::Null),
                    _ => None,
                })
            }

            "$arrayElemAt" => {
                let [array, index] = self.args_exact::<2>(op, arg, ctx)?;
                let items = match array {
                    None | Some(Value::Null) => return Ok(Some(Value::Null)),
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        return Err(type_error(format!(
                            "$arrayElemAt's first argument must be an array, but is {}",
                            other.type_name()
                        )));
                    }
                };
                let index = index
                    .as_ref()
                    .and_then(Value::as_int)
                    .ok_or_else(|| type_error("$arrayElemAt's second argument must be a numeric value"))?;
                let position = if index < 0 { items.len() as i64 + index } else { index };
                Ok(usize::try_from(position).ok().and_then(|p| items.get(p).cloned()))
            }

            "$slice" => {
                let args = self.args(arg, ctx)?;
                let (array, position, count) = match args.as_slice() {
                    [array, count] => (array, None, count),
                    [array, position, count] => (array, position.as_ref(), count),
                    _ => return Err(type_error("$slice takes two or three arguments")),
                };
                let items = match array {
                    None | Some(Value::Null) => return Ok(Some(Value::Null)),
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        return Err(type_error(format!(
                            "First argument to $slice must be an array, but is of type: {}",
                            other.type_name()
                        )));
                    }
                };
                let count = count
                    .as_ref()
                    .and_then(Value::as_int)
                    .ok_or_else(|| type_error("$slice count must be a numeric value"))?;
                let len = items.len() as i64;
                let (start, end) = match position.map(Value::as_int) {
                    Some(Some(_)) if count <= 0 => {
                        return Err(type_error(format!("Third argument to $slice must be positive: {}", count)));
                    }
                    Some(Some(position)) => {
                        let start = if position < 0 { (len + position).max(0) } else { position.min(len) };
                        (start, (start + count).min(len))
                    }
                    Some(None) => return Err(type_error("$slice position must be a numeric value")),
                    None if count < 0 => ((len + count).max(0), len),
                    None => (0, count.min(len)),
                };
                Ok(Some(Value::Array(items[start as usize..end as usize].to_vec())))
            }

            "$add" | "$subtract" | "$multiply" | "$divide" | "$mod" | "$pow" => {
                let [a, b] = self.args_exact::<2>(op, arg, ctx)?;
                match (a, b) {
                    (Some(a), Some(b)) if !a.is_null() && !b.is_null() => arithmetic(op, &a, &b).map(Some),
                    _ => Ok(Some(Value::Null)),
                }
            }

            "$floor" => {
                let [a] = self.args_exact::<1>(op, arg, ctx)?;
                Ok(Some(match a {
                    None | Some(Value::Null) => Value::Null,
                    Some(Value::Integer(n)) => Value::Integer(n),
                    Some(Value::Float(f)) => Value::Float(f.floor()),
                    Some(Value::Decimal(d)) => Value::Decimal(d.floor()),
                    Some(other) => {
                        return Err(type_error(format!("$floor only supports numeric types, not {}", other.type_name())));
                    }
                }))
            }

            "$bitAnd" | "$bitOr" | "$bitXor" => {
                let mut result: Option<i64> = None;
                for value in self.args(arg, ctx)? {
                    let n = match value {
                        None | Some(Value::Null) => return Ok(Some(Value::Null)),
                        Some(Value::Integer(n)) => n,
                        Some(other) => {
                            return Err(type_error(format!(
                                "{} only supports int and long, not: {}",
                                op,
                                other.type_name()
                            )));
                        }
                    };
                    result = Some(match (result, op) {
                        (None, _) => n,
                        (Some(acc), "$bitAnd") => acc & n,
                        (Some(acc), "$bitOr") => acc | n,
                        (Some(acc), _) => acc ^ n,
                    });
                }
                Ok(Some(result.map_or(Value::Null, Value::Integer)))
            }

            "$toString" => {
                let [a] = self.args_exact::<1>(op, arg, ctx)?;
                Ok(Some(match a {
                    None | Some(Value::Null) => Value::Null,
                    Some(Value::String(s)) => Value::String(s),
                    Some(Value::Integer(n)) => Value::String(n.to_string()),
                    Some(Value::Float(f)) => Value::String(f.to_string()),
                    Some(Value::Decimal(d)) => Value::String(d.to_string()),
                    Some(Value::Boolean(b)) => Value::String(b.to_string()),
                    Some(other) => {
                        return Err(type_error(format!("Unsupported conversion from {} to string", other.type_name())));
                    }
                }))
            }

            other => Err(ExecError::UnknownOperator(other.to_string())),
        }
    }
}

/// `$group` accumulator over the evaluated inputs of one group.
fn accumulate(op: &str, inputs: Vec<Option<Value>>) -> Result<Value, ExecError> {
    match op {
        "$addToSet" => {
            let mut set: Vec<Value> = Vec::new();
            for value in inputs.into_iter().flatten() {
                if !set.iter().any(|v| compare(Some(v), Some(&value)) == Ordering::Equal) {
                    set.push(value);
                }
            }
            Ok(Value::Array(set))
        }
        "$push" => Ok(Value::Array(inputs.into_iter().map(|v| v.unwrap_or(Value::Null)).collect())),
        "$first" => Ok(inputs.into_iter().next().flatten().unwrap_or(Value::Null)),
        "$last" => Ok(inputs.into_iter().last().flatten().unwrap_or(Value::Null)),
        "$sum" => inputs
            .into_iter()
            .flatten()
            .filter(|v| matches!(v, Value::Integer(_) | Value::Float(_) | Value::Decimal(_)))
            .try_fold(Value::Integer(0), |acc, v| arithmetic("$add", &acc, &v)),
        other => Err(ExecError::UnknownOperator(other.to_string())),
    }
}

fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Integer(n) => Some(Decimal::from(*n)),
        Value::Float(f) => Decimal::from_f64(*f),
        Value::Decimal(d) => Some(*d),
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::Decimal(d) => d.to_f64(),
        _ => None,
    }
}

/// Numeric arithmetic. Integers stay integers unless the result overflows
/// or the operation is a division; decimals win over floats.
fn arithmetic(op: &str, a: &Value, b: &Value) -> Result<Value, ExecError> {
    let unsupported = || {
        type_error(format!(
            "{} only supports numeric types, not {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))
    };

    if let (Value::Integer(x), Value::Integer(y)) = (a, b) {
        let exact = match op {
            "$add" => x.checked_add(*y),
            "$subtract" => x.checked_sub(*y),
            "$multiply" => x.checked_mul(*y),
            "$mod" if *y == 0 => return Err(ExecError::DivisionByZero),
            "$mod" => Some(x % y),
            "$pow" if *y >= 0 => u32::try_from(*y).ok().and_then(|e| x.checked_pow(e)),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(Value::Integer(n));
        }
    }

    if matches!(a, Value::Decimal(_)) || matches!(b, Value::Decimal(_)) {
        let (Some(x), Some(y)) = (to_decimal(a), to_decimal(b)) else {
            return Err(unsupported());
        };
        let result = match op {
            "$add" => x.checked_add(y),
            "$subtract" => x.checked_sub(y),
            "$multiply" => x.checked_mul(y),
            "$divide" | "$mod" if y.is_zero() => return Err(ExecError::DivisionByZero),
            "$divide" => x.checked_div(y),
            "$mod" => x.checked_rem(y),
            _ => None,
        };
        if let Some(d) = result {
            return Ok(Value::Decimal(d));
        }
    }

    let (Some(x), Some(y)) = (to_f64(a), to_f64(b)) else {
        return Err(unsupported());
    };
    Ok(Value::Float(match op {
        "$add" => x + y,
        "$subtract" => x - y,
        "$multiply" => x * y,
        "$divide" if y == 0.0 => return Err(ExecError::DivisionByZero),
        "$divide" => x / y,
        "$mod" if y == 0.0 => return Err(ExecError::DivisionByZero),
        "$mod" => x % y,
        _ => x.powf(y),
    }))
}

/// Sort rank of a type; values of different types order by rank.
fn rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Integer(_) | Value::Float(_) | Value::Decimal(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Object(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Boolean(_)) => 8,
    }
}

/// Total order over possibly missing values: missing < null < numbers <
/// strings < objects < arrays < booleans.
pub fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let by_rank = rank(a).cmp(&rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }

    match (a, b) {
        (Some(Value::Integer(x)), Some(Value::Integer(y))) => x.cmp(y),
        (Some(x @ (Value::Integer(_) | Value::Float(_) | Value::Decimal(_))), Some(y)) => {
            match (to_decimal(x), to_decimal(y)) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => to_f64(x)
                    .zip(to_f64(y))
                    .and_then(|(x, y)| x.partial_cmp(&y))
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Boolean(x)), Some(Value::Boolean(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare(Some(x), Some(y)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Some(Value::Object(x)), Some(Value::Object(y))) => x
            .iter()
            .zip(y)
            .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| compare(Some(vx), Some(vy))))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => Ordering::Equal,
    }
}

/// Query-language equality: an array matches a scalar it contains.
fn query_equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(Value::Array(items)) if !matches!(expected, Value::Array(_)) => {
            items.iter().any(|item| compare(Some(item), Some(expected)) == Ordering::Equal)
        }
        Some(value) => compare(Some(value), Some(expected)) == Ordering::Equal,
    }
}

/// Reads a dotted path. Arrays along the way yield the values read from
/// each of their documents.
pub fn get_path(value: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    walk(value, &parts)
}

fn walk(value: &Value, parts: &[&str]) -> Option<Value> {
    let Some((first, rest)) = parts.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => map.get(*first).and_then(|child| walk(child, rest)),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter(|item| matches!(item, Value::Object(_)))
                .filter_map(|item| walk(item, parts))
                .collect(),
        )),
        _ => None,
    }
}

/// Sets a dotted path, creating intermediate documents.
fn set_field(doc: Value, path: &str, value: Value) -> Value {
    let mut map = match doc {
        Value::Object(map) => map,
        _ => Document::new(),
    };
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let child = map.shift_remove(head).unwrap_or(Value::Null);
            let updated = set_field(child, tail, value);
            map.insert(head.to_string(), updated);
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn eval(expr: Value, root: Value) -> Option<Value> {
        let collections = HashMap::new();
        let evaluator = Evaluator::new(&collections);
        evaluator.eval(&expr, &EvalContext::new(&root)).unwrap()
    }

    #[test]
    fn test_missing_is_not_null() {
        let root = doc! { "a" => Value::Null };
        let missing_eq_null = doc! { "$eq" => vec![Value::from("$b"), Value::Null] };
        let null_eq_null = doc! { "$eq" => vec![Value::from("$a"), Value::Null] };
        assert_eq!(eval(missing_eq_null, root.clone()), Some(Value::Boolean(false)));
        assert_eq!(eval(null_eq_null, root), Some(Value::Boolean(true)));
    }

    #[test]
    fn test_missing_sorts_below_numbers() {
        assert_eq!(compare(None, Some(&Value::Integer(0))), Ordering::Less);
        assert_eq!(compare(Some(&Value::Null), Some(&Value::Integer(-5))), Ordering::Less);
        assert_eq!(compare(Some(&Value::Integer(2)), Some(&Value::Float(2.0))), Ordering::Equal);
    }

    #[test]
    fn test_map_over_missing_is_null() {
        let expr = doc! { "$map" => doc! { "input" => "$xs", "as" => "item", "in" => "$$item.a" } };
        assert_eq!(eval(expr, doc! {}), Some(Value::Null));
    }

    #[test]
    fn test_path_through_array() {
        let root = doc! { "xs" => vec![doc! { "a" => 1 }, doc! { "b" => 2 }, doc! { "a" => 3 }] };
        assert_eq!(
            get_path(&root, "xs.a"),
            Some(Value::Array(vec![Value::Integer(1), Value::Integer(3)]))
        );
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        assert_eq!(arithmetic("$add", &Value::Integer(2), &Value::Integer(3)).unwrap(), Value::Integer(5));
        assert_eq!(arithmetic("$divide", &Value::Integer(3), &Value::Integer(2)).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_regex_match_on_null_is_false() {
        let expr = doc! { "$regexMatch" => doc! { "input" => "$name", "regex" => "^a" } };
        assert_eq!(eval(expr, doc! { "name" => Value::Null }), Some(Value::Boolean(false)));
    }

    #[test]
    fn test_slice_with_position_needs_positive_count() {
        let collections = HashMap::new();
        let evaluator = Evaluator::new(&collections);
        let root = doc! { "xs" => vec![Value::from(1), Value::from(2), Value::from(3)] };
        let empty = doc! { "$slice" => vec![Value::from("$xs"), Value::from(1), Value::from(0)] };
        assert!(evaluator.eval(&empty, &EvalContext::new(&root)).is_err());

        let window = doc! { "$slice" => vec![Value::from("$xs"), Value::from(1), Value::from(1)] };
        assert_eq!(eval(window, root), Some(Value::Array(vec![Value::Integer(2)])));
    }
}
