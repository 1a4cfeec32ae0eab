// tests/parser_tests.rs

use pipeql::ast::{Expr, Filter, Token};
use pipeql::lexer::{Lexer, Position};
use pipeql::parser::{ParseError, Parser, parse_filter};
use pipeql::Value;

// ============================================================================
// Simple tests
// ============================================================================

#[test]
fn test_single_lookup() {
    let filter = parse_filter("exhibit_name__iexact = 'egyptian art'").unwrap();
    assert_eq!(filter, Filter::lookup("exhibit_name__iexact", "egyptian art"));
}

#[test]
fn test_parser_from_lexer() {
    let lexer = Lexer::new("opened_year__gte = 1990");
    let mut parser = Parser::new(lexer).unwrap();
    assert_eq!(parser.parse().unwrap(), Filter::lookup("opened_year__gte", 1990));
}

#[test]
fn test_literals() {
    let cases = vec![
        ("a = 1.5", Value::Float(1.5)),
        ("a = -3", Value::Integer(-3)),
        ("a = -0.5", Value::Float(-0.5)),
        ("a = true", Value::Boolean(true)),
        ("a = null", Value::Null),
        ("a = \"x\"", Value::from("x")),
    ];

    for (input, expected) in cases {
        let filter = parse_filter(input).unwrap();
        assert_eq!(filter, Filter::lookup("a", expected), "Failed for input: {}", input);
    }
}

#[test]
fn test_literal_list_is_array_value() {
    let filter = parse_filter("sections__section_number__in = [1, 2, 3]").unwrap();
    match filter {
        Filter::Lookup { value: Expr::Value(Value::Array(items)), .. } => assert_eq!(items.len(), 3),
        other => panic!("Expected array value, got {:?}", other),
    }
}

#[test]
fn test_list_with_reference_stays_expression() {
    let filter = parse_filter("opened_year__range = [F(main_section__section_number), 2000]").unwrap();
    assert_eq!(
        filter,
        Filter::lookup(
            "opened_year__range",
            Expr::List(vec![Expr::field("main_section__section_number"), Expr::Value(Value::Integer(2000))])
        )
    );
}

#[test]
fn test_trailing_comma_in_list() {
    let filter = parse_filter("a__in = [1, 2,]").unwrap();
    assert_eq!(filter, Filter::lookup("a__in", vec![1, 2]));
}

#[test]
fn test_outer_reference() {
    let filter = parse_filter("exhibit = outer(pk)").unwrap();
    assert_eq!(filter, Filter::lookup("exhibit", Expr::outer("pk")));
}

// ============================================================================
// Boolean structure
// ============================================================================

#[test]
fn test_and_binds_tighter_than_or() {
    let filter = parse_filter("a = 1 or b = 2 and c = 3").unwrap();

    // Should be: Or(a, And(b, c))
    match filter {
        Filter::Or(children) => {
            assert_eq!(children.len(), 2);
            assert!(matches!(&children[0], Filter::Lookup { path, .. } if path == "a"));
            assert!(matches!(&children[1], Filter::And(inner) if inner.len() == 2));
        }
        other => panic!("Expected or, got {:?}", other),
    }
}

#[test]
fn test_parentheses_group() {
    let filter = parse_filter("(a = 1 or b = 2) and c = 3").unwrap();
    match filter {
        Filter::And(children) => assert!(matches!(&children[0], Filter::Or(_))),
        other => panic!("Expected and, got {:?}", other),
    }
}

#[test]
fn test_not_applies_to_next_term() {
    let filter = parse_filter("not a = 1 and b = 2").unwrap();
    assert_eq!(
        filter,
        Filter::and([Filter::not(Filter::lookup("a", 1)), Filter::lookup("b", 2)])
    );
}

#[test]
fn test_chains_flatten() {
    let filter = parse_filter("a = 1 and b = 2 and c = 3").unwrap();
    assert!(matches!(filter, Filter::And(children) if children.len() == 3));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_missing_equals() {
    let err = parse_filter("a 1").unwrap_err();
    assert_eq!(
        err,
        ParseError::Unexpected {
            expected: "'='",
            found: Token::Integer(1),
            position: Position { line: 1, column: 3 },
        }
    );
}

#[test]
fn test_missing_value() {
    let err = parse_filter("a =").unwrap_err();
    assert!(matches!(err, ParseError::Unexpected { expected: "a value", found: Token::Eof, .. }));
}

#[test]
fn test_trailing_input() {
    let err = parse_filter("a = 1 b = 2").unwrap_err();
    assert_eq!(err.to_string(), "expected 'and', 'or' or end of input at 1:7, got Identifier(\"b\")");
}

#[test]
fn test_unclosed_paren() {
    let err = parse_filter("(a = 1").unwrap_err();
    assert!(matches!(err, ParseError::Unexpected { expected: "')'", found: Token::Eof, .. }));
}

#[test]
fn test_unknown_function() {
    let err = parse_filter("a = G(b)").unwrap_err();
    assert_eq!(
        err,
        ParseError::UnknownFunction {
            name: "G".to_string(),
            position: Position { line: 1, column: 5 },
        }
    );
}

#[test]
fn test_lex_errors_pass_through() {
    let err = parse_filter("a = 'open").unwrap_err();
    assert!(matches!(err, ParseError::Lex(_)));
}
