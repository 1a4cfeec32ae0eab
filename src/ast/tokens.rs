#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    /// Floating-point number
    ///
    /// # Examples
    /// ```text
    /// 3.14
    /// 0.5
    /// ```
    Float(f64),

    /// Integer
    ///
    /// # Examples
    /// ```text
    /// 42
    /// 0
    /// ```
    Integer(i64),

    /// String literal enclosed in double or single quotes
    ///
    /// # Examples
    /// ```text
    /// "Ancient Egypt"
    /// 'item #1'
    /// ```
    String(String),

    /// Boolean values
    ///
    /// # Examples
    /// ```text
    /// true
    /// false
    /// ```
    Boolean(bool),

    /// Null value
    Null,

    // Identifiers
    /// Lookup path or function name
    ///
    /// Letters, digits and underscores; digits may lead so that index and
    /// slice segments stay part of the path.
    ///
    /// # Examples
    /// ```text
    /// exhibit_name
    /// sections__0__section_number
    /// sections__1_3__artifacts__name__iexact
    /// ```
    Identifier(String),

    // Operators
    /// `=` between a lookup path and its value
    Eq,
    /// `-` before a number
    Minus,

    // Keywords
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,

    Eof,
}

impl Token {
    /// Keyword or literal for a bare word, if it is one.
    pub fn keyword(word: &str) -> Option<Token> {
        match word {
            "and" => Some(Token::And),
            "or" => Some(Token::Or),
            "not" => Some(Token::Not),
            "true" => Some(Token::Boolean(true)),
            "false" => Some(Token::Boolean(false)),
            "null" => Some(Token::Null),
            _ => None,
        }
    }
}
