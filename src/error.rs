use crate::parser::Rule;
use std::fmt;

/// An error raised while lexing, parsing, or evaluating a JPath query.
///
/// Mirrors the four-way split in the spec: a lexical error happens while
/// producing tokens, a syntax error happens while matching the grammar, a
/// function error happens while dispatching a named function, and a runtime
/// error covers everything else the evaluator can trip over (arithmetic and
/// comparison type mismatches, empty-selection coercions).
#[derive(Debug, Clone, PartialEq)]
pub enum JPathError {
    Lexical(Position, String),
    Syntax(Position, String),
    Function(String),
    Runtime(String),
}

/// Source position of an error, when one could be determined.
///
/// `line` is 1-based, `column` is 0-based, matching the spec's user-visible
/// format `<message> at line <L> (position: <C>)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Position {
    pub const UNKNOWN: Position = Position {
        line: None,
        column: None,
    };

    pub fn new(line: usize, column: usize) -> Self {
        Position {
            line: Some(line),
            column: Some(column),
        }
    }
}

impl JPathError {
    pub fn lexical<S: Into<String>>(pos: Position, message: S) -> Self {
        JPathError::Lexical(pos, message.into())
    }

    pub fn syntax<S: Into<String>>(pos: Position, message: S) -> Self {
        JPathError::Syntax(pos, message.into())
    }

    pub fn function<S: Into<String>>(message: S) -> Self {
        JPathError::Function(message.into())
    }

    pub fn runtime<S: Into<String>>(message: S) -> Self {
        JPathError::Runtime(message.into())
    }

    /// Wraps a non-JPath error message as raised from inside a function body.
    ///
    /// Per the spec's wrapping rule, an error already belonging to the JPath
    /// family passes through unchanged rather than being double-wrapped.
    pub fn wrap_function_error(self) -> Self {
        match self {
            JPathError::Function(_) => self,
            JPathError::Lexical(..) | JPathError::Syntax(..) | JPathError::Runtime(_) => self,
            // (kept for clarity: every variant above is already "JPath family")
        }
    }

    pub fn position(&self) -> Position {
        match self {
            JPathError::Lexical(pos, _) | JPathError::Syntax(pos, _) => *pos,
            JPathError::Function(_) | JPathError::Runtime(_) => Position::UNKNOWN,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JPathError::Lexical(_, msg)
            | JPathError::Syntax(_, msg)
            | JPathError::Function(msg)
            | JPathError::Runtime(msg) => msg,
        }
    }
}

impl fmt::Display for JPathError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let pos = self.position();
        match (pos.line, pos.column) {
            (Some(line), Some(column)) => {
                write!(f, "{} at line {} (position: {})", self.message(), line, column)
            }
            _ => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for JPathError {}

impl From<pest::error::Error<Rule>> for JPathError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        use pest::error::{ErrorVariant, LineColLocation};

        let (line, column) = match err.line_col {
            LineColLocation::Pos((line, column)) => (line, column),
            LineColLocation::Span((line, column), _) => (line, column),
        };
        // pest reports 1-based columns; the spec's Position is 0-based.
        let pos = Position::new(line, column.saturating_sub(1));

        let is_eoi = matches!(err.location, pest::error::InputLocation::Pos(p) if p == err_input_len(&err));

        let message = match &err.variant {
            _ if is_eoi => "unexpected end of input".to_string(),
            ErrorVariant::ParsingError { positives, negatives } => {
                format_parsing_error(positives, negatives)
            }
            ErrorVariant::CustomError { message } => message.clone(),
        };

        JPathError::syntax(pos, message)
    }
}

/// pest's own `Display` impl already computed whether the cursor sits at
/// end-of-input when rendering "unexpected end of input"; re-derive the same
/// fact cheaply by checking whether the error string contains that phrase,
/// since `pest::error::Error` does not expose input length directly.
fn err_input_len(err: &pest::error::Error<Rule>) -> usize {
    if err.to_string().contains("end of input") {
        match err.location {
            pest::error::InputLocation::Pos(p) => p,
            pest::error::InputLocation::Span((p, _)) => p,
        }
    } else {
        usize::MAX
    }
}

fn format_parsing_error(positives: &[Rule], negatives: &[Rule]) -> String {
    if positives.is_empty() && negatives.is_empty() {
        return "invalid syntax".to_string();
    }
    if negatives.is_empty() {
        format!("expected {}", describe_rules(positives))
    } else if positives.is_empty() {
        format!("unexpected {}", describe_rules(negatives))
    } else {
        format!(
            "expected {}, found {}",
            describe_rules(positives),
            describe_rules(negatives)
        )
    }
}

fn describe_rules(rules: &[Rule]) -> String {
    rules
        .iter()
        .map(|r| format!("{:?}", r))
        .collect::<Vec<_>>()
        .join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_with_position() {
        let err = JPathError::syntax(Position::new(1, 3), "unexpected '.'");
        assert_eq!(format!("{}", err), "unexpected '.' at line 1 (position: 3)");
    }

    #[test]
    fn display_without_position() {
        let err = JPathError::function("unknown function 'nope'");
        assert_eq!(format!("{}", err), "unknown function 'nope'");
    }
}
