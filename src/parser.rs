//! Parser for the text filter language.
//!
//! ```text
//! filter  := or EOF
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | "(" or ")" | IDENT "=" operand
//! operand := literal | "-" number | "[" operand ("," operand)* "]"
//!          | "F" "(" IDENT ")" | "outer" "(" IDENT ")"
//! ```

use std::mem;

use crate::{
    ast::{Expr, Filter, Token},
    lexer::{LexError, Lexer, Position},
    value::Value,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("expected {expected} at {position}, got {found:?}")]
    Unexpected {
        expected: &'static str,
        found: Token,
        position: Position,
    },

    #[error("unknown function '{name}' at {position}; expected F or outer")]
    UnknownFunction { name: String, position: Position },
}

pub struct Parser {
    lexer: Lexer,
    current_token: Token,
    current_position: Position,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Result<Self, ParseError> {
        let current_token = lexer.next_token()?;
        Ok(Parser {
            current_position: lexer.token_start(),
            lexer,
            current_token,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current_token = self.lexer.next_token()?;
        self.current_position = self.lexer.token_start();
        Ok(())
    }

    fn check(&self, token: &Token) -> bool {
        mem::discriminant(&self.current_token) == mem::discriminant(token)
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        ParseError::Unexpected {
            expected,
            found: self.current_token.clone(),
            position: self.current_position,
        }
    }

    fn expect(&mut self, expected: Token, description: &'static str) -> Result<(), ParseError> {
        if !self.check(&expected) {
            return Err(self.unexpected(description));
        }
        self.advance()
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Identifier(name) => {
                self.advance()?;
                Ok(name)
            }
            other => {
                self.current_token = other;
                Err(self.unexpected("a lookup path"))
            }
        }
    }

    /// Parses a complete filter; trailing input is an error.
    pub fn parse(&mut self) -> Result<Filter, ParseError> {
        let filter = self.parse_or()?;
        if !self.check(&Token::Eof) {
            return Err(self.unexpected("'and', 'or' or end of input"));
        }
        Ok(filter)
    }

    fn parse_or(&mut self) -> Result<Filter, ParseError> {
        let mut children = vec![self.parse_and()?];
        while self.check(&Token::Or) {
            self.advance()?;
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Filter::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<Filter, ParseError> {
        let mut children = vec![self.parse_unary()?];
        while self.check(&Token::And) {
            self.advance()?;
            children.push(self.parse_unary()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Filter::And(children)
        })
    }

    fn parse_unary(&mut self) -> Result<Filter, ParseError> {
        match &self.current_token {
            Token::Not => {
                self.advance()?;
                Ok(Filter::not(self.parse_unary()?))
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Identifier(_) => {
                let path = self.expect_identifier()?;
                self.expect(Token::Eq, "'='")?;
                let value = self.parse_operand()?;
                Ok(Filter::Lookup { path, value })
            }
            _ => Err(self.unexpected("a lookup, 'not' or '('")),
        }
    }

    fn parse_operand(&mut self) -> Result<Expr, ParseError> {
        match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Integer(n) => {
                self.advance()?;
                Ok(Expr::Value(Value::Integer(n)))
            }
            Token::Float(n) => {
                self.advance()?;
                Ok(Expr::Value(Value::Float(n)))
            }
            Token::String(s) => {
                self.advance()?;
                Ok(Expr::Value(Value::String(s)))
            }
            Token::Boolean(b) => {
                self.advance()?;
                Ok(Expr::Value(Value::Boolean(b)))
            }
            Token::Null => {
                self.advance()?;
                Ok(Expr::Value(Value::Null))
            }
            Token::Minus => {
                self.advance()?;
                match self.current_token {
                    Token::Integer(n) => {
                        self.advance()?;
                        Ok(Expr::Value(Value::Integer(-n)))
                    }
                    Token::Float(n) => {
                        self.advance()?;
                        Ok(Expr::Value(Value::Float(-n)))
                    }
                    _ => Err(self.unexpected("a number after '-'")),
                }
            }
            Token::LBracket => {
                self.advance()?;
                self.parse_list()
            }
            Token::Identifier(name) => {
                let position = self.current_position;
                self.advance()?;
                self.expect(Token::LParen, "'(' after a function name")?;
                let path = self.expect_identifier()?;
                self.expect(Token::RParen, "')'")?;
                match name.as_str() {
                    "F" => Ok(Expr::field(path)),
                    "outer" => Ok(Expr::outer(path)),
                    _ => Err(ParseError::UnknownFunction { name, position }),
                }
            }
            other => {
                self.current_token = other;
                Err(self.unexpected("a value"))
            }
        }
    }

    /// Items after `[`. A list of plain literals becomes an array value;
    /// a list with field references stays a list of expressions.
    fn parse_list(&mut self) -> Result<Expr, ParseError> {
        let mut items = vec![];
        while !self.check(&Token::RBracket) {
            items.push(self.parse_operand()?);
            if !self.check(&Token::RBracket) {
                self.expect(Token::Comma, "',' or ']'")?;
            }
        }
        self.expect(Token::RBracket, "']'")?;

        if items.iter().all(|item| matches!(item, Expr::Value(_))) {
            let values = items
                .into_iter()
                .filter_map(|item| match item {
                    Expr::Value(value) => Some(value),
                    _ => None,
                })
                .collect();
            return Ok(Expr::Value(Value::Array(values)));
        }
        Ok(Expr::List(items))
    }
}

/// Parses a filter from text.
///
/// ```
/// use pipeql::ast::Filter;
/// use pipeql::parser::parse_filter;
///
/// let filter = parse_filter("sections__section_number__in = [1, 2]").unwrap();
/// assert!(matches!(filter, Filter::Lookup { .. }));
/// ```
pub fn parse_filter(input: &str) -> Result<Filter, ParseError> {
    Parser::new(Lexer::new(input))?.parse()
}
