// Golden pipelines and compile errors.

mod common;

use common::museum_schema;
use pipeql::ast::{Expr, Filter, Query};
use pipeql::pipeline::{normalize, normalize_pipeline};
use pipeql::{CompileError, Compiler, to_json};

fn compile(query: &Query) -> Result<pipeql::CompiledQuery, CompileError> {
    let schema = museum_schema();
    Compiler::new(&schema).compile(query)
}

fn filter_json(model: &str, filter: Filter) -> String {
    let schema = museum_schema();
    let compiled = Compiler::new(&schema).compile_filter(model, &filter).unwrap();
    to_json(&compiled.expr)
}

fn error(model: &str, filter: Filter) -> CompileError {
    compile(&Query::new(model).filter(filter)).unwrap_err()
}

// ============================================================================
// Fragments
// ============================================================================

#[test]
fn test_exact_on_column() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("exhibit_name", "Lost")),
        r#"{"$eq":["$exhibit_name","Lost"]}"#
    );
}

#[test]
fn test_dollar_literal_is_protected() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("exhibit_name", "$ref")),
        r#"{"$eq":["$exhibit_name",{"$literal":"$ref"}]}"#
    );
}

#[test]
fn test_embedded_subfield_path() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("main_section__section_number__gt", 1)),
        r#"{"$gt":["$main_section.section_number",1]}"#
    );
}

#[test]
fn test_broadcast_over_array() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("sections__section_number", 1)),
        concat!(
            r#"{"$anyElementTrue":{"$ifNull":[{"$map":{"input":"$sections","as":"item","#,
            r#""in":{"$eq":["$$item.section_number",1]}}},[]]}}"#
        )
    );
}

#[test]
fn test_slice_applies_before_broadcast() {
    let json = filter_json("MuseumExhibit", Filter::lookup("sections__0_2__section_number", 1));
    assert!(json.contains(r#""input":{"$slice":["$sections",0,2]}"#), "{}", json);
}

#[test]
fn test_index_then_key() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("sections__1__title", "Gods")),
        r#"{"$eq":[{"$getField":{"input":{"$arrayElemAt":["$sections",1]},"field":"title"}},"Gods"]}"#
    );
}

#[test]
fn test_len_guards_non_arrays() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("sections__len", 2)),
        r#"{"$eq":[{"$cond":{"if":{"$isArray":"$sections"},"then":{"$size":"$sections"},"else":null}},2]}"#
    );
}

#[test]
fn test_iexact_escapes_literal() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("exhibit_name__iexact", "a.b")),
        r#"{"$regexMatch":{"input":"$exhibit_name","regex":"^a\\.b$","options":"i"}}"#
    );
}

#[test]
fn test_regex_keeps_pattern() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("exhibit_name__regex", "a.b")),
        r#"{"$regexMatch":{"input":"$exhibit_name","regex":"a.b"}}"#
    );
}

#[test]
fn test_integral_float_for_integer_field() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("opened_year", 1990.0)),
        r#"{"$eq":["$opened_year",1990]}"#
    );
}

#[test]
fn test_json_key_uses_get_field() {
    let json = filter_json("MuseumExhibit", Filter::lookup("sections__0__artifacts__metadata__origin", "Paris"));
    assert!(json.contains(r#"{"$getField":{"input":"$$item.metadata","field":"origin"}}"#), "{}", json);
}

#[test]
fn test_field_reference_value() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::lookup("exhibit_name", Expr::field("main_section__title"))),
        r#"{"$eq":["$exhibit_name","$main_section.title"]}"#
    );
}

#[test]
fn test_not_wraps_child() {
    assert_eq!(
        filter_json("MuseumExhibit", Filter::not(Filter::lookup("exhibit_name", "x"))),
        r#"{"$not":[{"$eq":["$exhibit_name","x"]}]}"#
    );
}

// ============================================================================
// Pipelines
// ============================================================================

#[test]
fn test_simple_query_pipeline() {
    let compiled = compile(&Query::new("Curator").filter(Filter::lookup("name", "Ada"))).unwrap();
    assert_eq!(compiled.collection, "curator");
    assert_eq!(
        to_json(&compiled.to_documents()),
        r#"[{"$match":{"$expr":{"$eq":["$name","Ada"]}}},{"$project":{"_id":1,"name":1}}]"#
    );
}

#[test]
fn test_display_is_shell_form() {
    let compiled = compile(&Query::new("Curator")).unwrap();
    assert_eq!(compiled.to_string(), r#"db.curator.aggregate([{"$project":{"_id":1,"name":1}}])"#);
}

#[test]
fn test_inner_join_pipeline() {
    let compiled = compile(
        &Query::new("Tour")
            .filter(Filter::lookup("exhibit__exhibit_name", "Lost"))
            .values(["guide"]),
    )
    .unwrap();
    assert_eq!(
        to_json(&compiled.to_documents()),
        concat!(
            r#"[{"$lookup":{"from":"museumexhibit","let":{"parent__field__0":"$exhibit_id"},"#,
            r#""pipeline":[{"$match":{"$expr":{"$and":[{"$eq":["$$parent__field__0","$_id"]}]}}}],"#,
            r#""as":"museumexhibit"}},"#,
            r#"{"$unwind":"$museumexhibit"},"#,
            r#"{"$match":{"$expr":{"$eq":["$museumexhibit.exhibit_name","Lost"]}}},"#,
            r#"{"$project":{"guide":1}}]"#
        )
    );
}

#[test]
fn test_nullable_relation_joins_left() {
    let compiled = compile(&Query::new("MuseumExhibit").filter(Filter::lookup("curator__name", "Ada"))).unwrap();
    let names: Vec<&str> = compiled.pipeline.iter().map(|s| s.name()).collect();
    assert_eq!(names[..4], ["$lookup", "$set", "$unwind", "$match"]);
}

#[test]
fn test_isnull_promotes_join() {
    let compiled = compile(&Query::new("Tour").filter(Filter::lookup("exhibit__exhibit_name__isnull", true))).unwrap();
    assert_eq!(compiled.pipeline[1].name(), "$set");
}

#[test]
fn test_join_under_or_is_left() {
    let filter = Filter::or([Filter::lookup("exhibit__exhibit_name", "Lost"), Filter::lookup("guide", "Bo")]);
    let compiled = compile(&Query::new("Tour").filter(filter)).unwrap();
    assert_eq!(compiled.pipeline[1].name(), "$set");
}

#[test]
fn test_foreign_key_column_is_local() {
    let compiled = compile(&Query::new("Tour").filter(Filter::lookup("exhibit__in", vec![1, 2]))).unwrap();
    assert_eq!(compiled.pipeline[0].to_string(), r#"{"$match":{"$expr":{"$in":["$exhibit_id",[1,2]]}}}"#);
}

#[test]
fn test_select_related_adds_join() {
    let compiled = compile(&Query::new("Tour").select_related("exhibit")).unwrap();
    let names: Vec<&str> = compiled.pipeline.iter().map(|s| s.name()).collect();
    assert_eq!(names, ["$lookup", "$unwind", "$project"]);
}

#[test]
fn test_exclude_negates_filter() {
    let compiled = compile(&Query::new("Curator").exclude(Filter::lookup("name", "Ada"))).unwrap();
    assert_eq!(
        compiled.pipeline[0].to_string(),
        r#"{"$match":{"$expr":{"$not":[{"$eq":["$name","Ada"]}]}}}"#
    );
}

#[test]
fn test_subquery_lookup_stages() {
    let reviewed = Query::new("ExhibitAudit").values(["related_section_number"]);
    let compiled = compile(&Query::new("MuseumExhibit").filter(Filter::lookup("sections__section_number__in", reviewed)))
        .unwrap();
    let lookup = compiled.pipeline[0].to_string();
    assert!(lookup.starts_with(r#"{"$lookup":{"from":"exhibitaudit","let":{},"pipeline":[{"$facet""#), "{}", lookup);
    assert!(lookup.ends_with(r#""as":"__subquery0"}}"#), "{}", lookup);
    assert_eq!(compiled.pipeline[1].name(), "$set");
    assert!(compiled.pipeline[2].to_string().contains(r#""$in":["$$item.section_number","$__subquery0.related_section_number"]"#));
}

#[test]
fn test_correlated_subquery_binds_outer_fields() {
    let tours = Query::new("Tour").filter(Filter::lookup("exhibit", Expr::outer("pk")));
    let compiled = compile(&Query::new("MuseumExhibit").filter(Filter::exists(tours))).unwrap();
    let lookup = compiled.pipeline[0].to_string();
    assert!(lookup.contains(r#""let":{"parent__field__0":"$_id"}"#), "{}", lookup);
    assert!(lookup.contains(r#"{"$eq":["$exhibit_id","$$parent__field__0"]}"#), "{}", lookup);
}

#[test]
fn test_annotations_split_on_dependency() {
    let compiled = compile(
        &Query::new("MuseumExhibit")
            .annotate("count", Expr::field("sections__len"))
            .annotate("label", "x")
            .annotate("double", Expr::combine(pipeql::ast::CombineOp::Multiply, Expr::field("count"), 2)),
    )
    .unwrap();
    let names: Vec<&str> = compiled.pipeline.iter().map(|s| s.name()).collect();
    assert_eq!(names, ["$addFields", "$addFields", "$project"]);
}

#[test]
fn test_union_pipeline() {
    let names = |name: &str| Query::new("Curator").filter(Filter::lookup("name", name)).values(["name"]);
    let compiled = compile(&names("Ada").union([names("Bo")], false)).unwrap();
    let stages: Vec<&str> = compiled.pipeline.iter().map(|s| s.name()).collect();
    assert_eq!(stages, ["$match", "$project", "$unionWith", "$group", "$addFields"]);
    assert_eq!(compiled.pipeline[3].to_string(), r#"{"$group":{"_id":{"name":"$name"}}}"#);
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn test_recompiling_is_identical() {
    let query = Query::new("MuseumExhibit")
        .filter(Filter::and([
            Filter::lookup("sections__section_number__in", vec![1, 2]),
            Filter::lookup("curator__name__icontains", "a"),
        ]))
        .order_by("-opened_year");
    assert_eq!(compile(&query).unwrap(), compile(&query).unwrap());
}

#[test]
fn test_commutative_order_normalizes() {
    let a = Filter::lookup("exhibit_name", "x");
    let b = Filter::lookup("opened_year__gt", 1);
    let left = compile(&Query::new("MuseumExhibit").filter(Filter::and([a.clone(), b.clone()]))).unwrap();
    let right = compile(&Query::new("MuseumExhibit").filter(Filter::and([b, a]))).unwrap();
    assert_ne!(left.pipeline, right.pipeline);
    assert_eq!(normalize_pipeline(&left.pipeline), normalize_pipeline(&right.pipeline));
    assert_eq!(normalize(&left.to_documents()), normalize_pipeline(&right.pipeline));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_unknown_field() {
    let err = error("MuseumExhibit", Filter::lookup("nope", 1));
    assert_eq!(err.to_string(), "MuseumExhibit has no field named 'nope'");
}

#[test]
fn test_unknown_embedded_field() {
    let err = error("MuseumExhibit", Filter::lookup("main_section__nope", 1));
    assert_eq!(err.to_string(), "ExhibitSection has no field named 'nope'");
}

#[test]
fn test_unsupported_lookup_suggests() {
    let err = error("MuseumExhibit", Filter::lookup("exhibit_name__icontainz", "a"));
    assert_eq!(
        err.to_string(),
        "unsupported lookup 'icontainz' for 'string', perhaps you meant icontains or contains?"
    );

    let err = error("MuseumExhibit", Filter::lookup("opened_year__ltee", 1));
    assert_eq!(err.to_string(), "unsupported lookup 'ltee' for 'integer', perhaps you meant lte or lt?");
}

#[test]
fn test_unsupported_lookup_without_suggestion() {
    let err = error("MuseumExhibit", Filter::lookup("opened_year__icontains", "1"));
    assert_eq!(
        err,
        CompileError::UnsupportedLookup {
            name: "icontains".into(),
            target: "'integer'".into(),
            suggestions: vec![],
        }
    );
}

#[test]
fn test_mapped_lookup_names_element_type() {
    let err = error("MuseumExhibit", Filter::lookup("sections__section_number__isnull", true));
    assert_eq!(err.to_string(), "unsupported lookup 'isnull' for embedded model array of 'integer'");
}

#[test]
fn test_multi_level_traversal() {
    let err = error("MuseumExhibit", Filter::lookup("sections__artifacts__name", "Ankh"));
    assert_eq!(err, CompileError::MultiLevelArrayTraversal);
    assert_eq!(err.to_string(), "cannot perform multiple levels of array traversal in a query");

    let err = error("MuseumExhibit", Filter::lookup("sections__artifacts__year__gt", 1));
    assert_eq!(err, CompileError::MultiLevelArrayTraversal);
}

#[test]
fn test_lookup_on_whole_array() {
    assert_eq!(error("MuseumExhibit", Filter::lookup("sections", 1)), CompileError::ArrayLookupNotAllowed);
    assert_eq!(
        error("MuseumExhibit", Filter::lookup("sections__isnull", true)),
        CompileError::ArrayLookupNotAllowed
    );
}

#[test]
fn test_invalid_slice() {
    assert_eq!(
        error("MuseumExhibit", Filter::lookup("sections__3_1__section_number", 1)),
        CompileError::InvalidSlice("3_1".into())
    );
}

#[test]
fn test_empty_slice_is_rejected() {
    let err = error("MuseumExhibit", Filter::lookup("sections__1_1__section_number", 2));
    assert_eq!(err, CompileError::InvalidSlice("1_1".into()));
    assert_eq!(err.to_string(), "invalid slice '1_1': the end must be greater than the start");
}

#[test]
fn test_value_shape() {
    let err = error("MuseumExhibit", Filter::lookup("opened_year", "soon"));
    assert_eq!(err.to_string(), "'exact' lookup expects an integer, got string");

    let err = error("MuseumExhibit", Filter::lookup("opened_year__in", 1));
    assert_eq!(err.to_string(), "'in' lookup expects a list, got long");
}

#[test]
fn test_embedded_model_is_not_queryable() {
    assert_eq!(
        compile(&Query::new("ExhibitSection")).unwrap_err(),
        CompileError::EmbeddedQuery("ExhibitSection".into())
    );
}

#[test]
fn test_outer_ref_outside_subquery() {
    assert_eq!(
        error("Tour", Filter::lookup("exhibit", Expr::outer("pk"))),
        CompileError::OuterRefOutsideSubquery("pk".into())
    );
}

#[test]
fn test_subquery_with_two_columns() {
    let two = Query::new("ExhibitAudit").values(["related_section_number", "reviewed"]);
    assert_eq!(
        error("MuseumExhibit", Filter::lookup("sections__section_number__in", two)),
        CompileError::SubqueryColumns {
            model: "ExhibitAudit".into(),
            count: 2,
        }
    );
}
