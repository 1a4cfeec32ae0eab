//! Compiler configuration.

use serde::{Deserialize, Serialize};

/// Tunables for one [`Compiler`](crate::compiler::Compiler).
///
/// Every field has a default, so a config file only needs the keys it
/// overrides:
///
/// ```
/// use pipeql::CompilerConfig;
///
/// let config = CompilerConfig::from_json(r#"{"max_suggestions": 1}"#).unwrap();
/// assert_eq!(config.max_suggestions, 1);
/// assert_eq!(config.subquery_prefix, "__subquery");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Most "perhaps you meant" candidates listed in a lookup error.
    pub max_suggestions: usize,

    /// Minimum similarity ratio for a suggestion, in `0.0..=1.0`.
    pub suggestion_cutoff: f64,

    /// Prefix of the `let` variables that carry parent values into a
    /// `$lookup` pipeline.
    pub parent_field_prefix: String,

    /// Prefix of the fields correlated subqueries write their result to.
    pub subquery_prefix: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            max_suggestions: 3,
            suggestion_cutoff: 0.6,
            parent_field_prefix: "parent__field__".to_string(),
            subquery_prefix: "__subquery".to_string(),
        }
    }
}

impl CompilerConfig {
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    pub(crate) fn parent_var(&self, index: usize) -> String {
        format!("{}{}", self.parent_field_prefix, index)
    }

    pub(crate) fn subquery_field(&self, index: usize) -> String {
        format!("{}{}", self.subquery_prefix, index)
    }
}
