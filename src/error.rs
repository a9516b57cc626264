//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Crate-wide result alias
pub type Result<T, E = PlayerError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Expression errors (PLY-010 to PLY-016)
    // ─────────────────────────────────────────────────────────────
    #[error("PLY-010: {message} at character {index}")]
    ExpressionSyntax { message: String, index: usize },

    #[error("PLY-011: Error parsing expression: {expression}")]
    ExpressionParse {
        expression: String,
        #[source]
        source: Box<PlayerError>,
    },

    #[error("PLY-012: Error evaluating expression: {expression}")]
    ExpressionEvaluate {
        expression: String,
        #[source]
        source: Box<PlayerError>,
    },

    #[error("PLY-013: Expression type: {kind} is not supported")]
    UnsupportedExpression { kind: String },

    #[error("PLY-014: Unknown expression function: {name}")]
    UnknownFunction { name: String },

    #[error("PLY-015: Usage of await outside of async context")]
    AwaitOutsideAsync,

    #[error("PLY-016: Expression function '{name}' failed: {details}")]
    FunctionFailed { name: String, details: String },

    // ─────────────────────────────────────────────────────────────
    // Binding errors (PLY-020 to PLY-024)
    // ─────────────────────────────────────────────────────────────
    #[error("PLY-020: {message}")]
    BindingSyntax { message: String },

    #[error("PLY-021: Cannot normalize path \"{path}\": {reason}")]
    NormalizePath { path: String, reason: String },

    #[error("PLY-022: Cannot resolve binding: {path}")]
    ResolveBinding {
        path: String,
        #[source]
        source: Box<PlayerError>,
    },

    #[error("PLY-023: {details}")]
    BindingConversion { details: String },

    #[error("PLY-024: Unable to resolve path segment: {segment}")]
    UnresolvedSegment {
        segment: String,
        #[source]
        source: Box<PlayerError>,
    },

    // ─────────────────────────────────────────────────────────────
    // Data errors (PLY-030)
    // ─────────────────────────────────────────────────────────────
    #[error("PLY-030: Invalid arguments: delete expects a data path (string)")]
    InvalidDelete,

    // ─────────────────────────────────────────────────────────────
    // Schema errors (PLY-040 to PLY-041)
    // ─────────────────────────────────────────────────────────────
    #[error("PLY-040: Path has already been processed. There's a loop in the schema: {path}")]
    SchemaLoop { path: String },

    #[error("PLY-041: Path already contained type: {type_name}. There's a loop in the schema: {path}")]
    SchemaTypeLoop { type_name: String, path: String },

    // ─────────────────────────────────────────────────────────────
    // String resolution errors (PLY-050)
    // ─────────────────────────────────────────────────────────────
    #[error("PLY-050: Unbalanced {{{{ and }}}} in exp: {expression}")]
    UnbalancedExpression { expression: String },

    // ─────────────────────────────────────────────────────────────
    // View errors (PLY-060 to PLY-063)
    // ─────────────────────────────────────────────────────────────
    #[error("PLY-060: Unable to parse object into a view")]
    ViewParse,

    #[error("PLY-061: Template using '{binding}' but is not an array")]
    TemplateNotArray { binding: String },

    #[error("PLY-062: Async node '{id}' failed: {details}")]
    AsyncNode { id: String, details: String },

    #[error("PLY-063: Invalid template substitution '{pattern}': {details}")]
    TemplateSubstitution { pattern: String, details: String },

    // ─────────────────────────────────────────────────────────────
    // Validation errors (PLY-070)
    // ─────────────────────────────────────────────────────────────
    #[error("PLY-070: Validator '{name}' failed: {details}")]
    Validator { name: String, details: String },

    // ─────────────────────────────────────────────────────────────
    // Config errors (PLY-080)
    // ─────────────────────────────────────────────────────────────
    #[error("PLY-080: Invalid config '{path}': {details}")]
    Config { path: String, details: String },
}

impl PlayerError {
    /// Walk `#[source]` links down to the innermost player error
    pub fn root_cause(&self) -> &PlayerError {
        match self {
            PlayerError::ExpressionParse { source, .. }
            | PlayerError::ExpressionEvaluate { source, .. }
            | PlayerError::ResolveBinding { source, .. }
            | PlayerError::UnresolvedSegment { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl FixSuggestion for PlayerError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            PlayerError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            PlayerError::JsonParse(_) => Some("Check JSON syntax: trailing commas and quoting"),
            PlayerError::Io(_) => Some("Check file path and permissions"),

            PlayerError::ExpressionSyntax { .. } => {
                Some("Check the expression near the reported character")
            }
            PlayerError::ExpressionParse { .. } => Some("Fix the expression syntax"),
            PlayerError::ExpressionEvaluate { .. } => {
                Some("Check the values the expression reads from the model")
            }
            PlayerError::UnsupportedExpression { .. } => {
                Some("Split statements into an array of expressions")
            }
            PlayerError::UnknownFunction { .. } => {
                Some("Register the function with add_expression_function before evaluating")
            }
            PlayerError::AwaitOutsideAsync => Some("Use evaluate_async for expressions with await()"),
            PlayerError::FunctionFailed { .. } => Some("Check the arguments passed to the function"),

            PlayerError::BindingSyntax { .. } => Some("Use format: foo.bar[0].baz or foo[key='value']"),
            PlayerError::NormalizePath { .. } => Some("Use format: foo.bar[0].baz or foo[key='value']"),
            PlayerError::ResolveBinding { .. } => {
                Some("Ensure nested {{refs}} resolve to a string or number")
            }
            PlayerError::BindingConversion { .. } => {
                Some("Nested path values must be strings, numbers or booleans")
            }
            PlayerError::UnresolvedSegment { .. } => Some("Check the nested path exists in the model"),

            PlayerError::InvalidDelete => Some("Pass a binding or a data path string to delete"),

            PlayerError::SchemaLoop { .. } | PlayerError::SchemaTypeLoop { .. } => {
                Some("Remove the recursive type reference from the schema")
            }

            PlayerError::UnbalancedExpression { .. } => Some("Every {{ needs a matching }}"),

            PlayerError::ViewParse => Some("A view must be a JSON object with an id"),
            PlayerError::TemplateNotArray { .. } => Some("Point the template data at an array"),
            PlayerError::AsyncNode { .. } => Some("Check the async node handler"),
            PlayerError::TemplateSubstitution { .. } => Some("Substitution expressions must be valid regexes"),

            PlayerError::Validator { .. } => Some("Check the validator's parameters"),

            PlayerError::Config { .. } => Some("Check config keys and PLAYER_* environment values"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_report_character_offset() {
        let err = PlayerError::ExpressionSyntax {
            message: "Unclosed [".to_string(),
            index: 4,
        };

        assert_eq!(err.to_string(), "PLY-010: Unclosed [ at character 4");
        assert!(err.fix_suggestion().is_some());
    }

    #[test]
    fn root_cause_unwraps_nested_errors() {
        let err = PlayerError::ExpressionEvaluate {
            expression: "foo()".to_string(),
            source: Box::new(PlayerError::UnknownFunction {
                name: "foo".to_string(),
            }),
        };

        assert!(matches!(err.root_cause(), PlayerError::UnknownFunction { .. }));
        assert!(err.to_string().contains("Error evaluating expression: foo()"));
    }

    #[test]
    fn unbalanced_message_keeps_braces() {
        let err = PlayerError::UnbalancedExpression {
            expression: "{{foo".to_string(),
        };

        assert_eq!(err.to_string(), "PLY-050: Unbalanced {{ and }} in exp: {{foo");
    }
}
