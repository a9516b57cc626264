//! Binding path grammar
//!
//! Single-pass, char-by-char parser producing a [`BindingAst`]:
//! - segments separated by `.`
//! - a segment concatenates identifiers, `{{nested.path}}` and `` `expression` ``
//! - brackets hold an optionally quoted segment, or a `key = value` query

/// Parsed (but unresolved) binding
#[derive(Debug, Clone, PartialEq)]
pub enum BindingAst {
    /// Full path; also used for nested `{{...}}` refs
    Path(Vec<BindingAst>),
    /// Literal segment (may still contain dots when it came from a bracket)
    Value(String),
    /// `[key = value]` lookup into an array of objects
    Query {
        key: Box<BindingAst>,
        value: Option<Box<BindingAst>>,
    },
    /// `` `exp` `` evaluated at resolution time
    Expression(String),
    /// Adjacent parts joined into one segment: `foo_{{bar}}`
    Concatenated(Vec<BindingAst>),
}

const SEGMENT_SEPARATOR: char = '.';
const OPEN_CURL: char = '{';
const CLOSE_CURL: char = '}';
const OPEN_BRACKET: char = '[';
const CLOSE_BRACKET: char = ']';
const EQUALS: char = '=';
const SINGLE_QUOTE: char = '\'';
const DOUBLE_QUOTE: char = '"';
const BACK_TICK: char = '`';

fn is_identifier_char(ch: Option<char>) -> bool {
    match ch {
        None => false,
        Some(c) => !matches!(
            c,
            ' ' | '"' | '\'' | '(' | ')' | '*' | '.' | '=' | '[' | ']' | '`' | '{' | '}'
        ),
    }
}

struct Cursor {
    chars: Vec<char>,
    index: usize,
    ch: Option<char>,
}

type Step<T> = Result<T, String>;

impl Cursor {
    fn new(path: &str) -> Self {
        let chars: Vec<char> = path.chars().collect();
        let ch = chars.first().copied();
        Self { chars, index: 1, ch }
    }

    fn next(&mut self, expected: Option<char>) -> Step<Option<char>> {
        if let Some(expected) = expected {
            if self.ch != Some(expected) {
                return Err(format!(
                    "Expected char: {expected} but got: {}",
                    self.ch.map(String::from).unwrap_or_default()
                ));
            }
        }
        self.ch = self.chars.get(self.index).copied();
        self.index += 1;
        Ok(self.ch)
    }

    fn whitespace(&mut self) -> Step<()> {
        while self.ch == Some(' ') {
            self.next(None)?;
        }
        Ok(())
    }

    fn identifier(&mut self) -> Step<Option<BindingAst>> {
        if !is_identifier_char(self.ch) {
            return Ok(None);
        }
        let mut value = String::new();
        value.extend(self.ch);
        while self.next(None)?.is_some() {
            if !is_identifier_char(self.ch) {
                break;
            }
            value.extend(self.ch);
        }
        Ok(Some(BindingAst::Value(value)))
    }

    fn expression(&mut self) -> Step<Option<BindingAst>> {
        if self.ch != Some(BACK_TICK) {
            return Ok(None);
        }
        self.next(Some(BACK_TICK))?;

        let mut exp = String::new();
        while let Some(c) = self.ch {
            if c == BACK_TICK {
                break;
            }
            exp.push(c);
            self.next(None)?;
        }
        self.next(Some(BACK_TICK))?;

        Ok((!exp.is_empty()).then_some(BindingAst::Expression(exp)))
    }

    fn quoted(&mut self) -> Step<Option<BindingAst>> {
        let mut value = String::new();
        while let Some(c) = self.ch {
            if c == SINGLE_QUOTE || c == DOUBLE_QUOTE {
                break;
            }
            value.push(c);
            self.next(None)?;
        }
        Ok((!value.is_empty()).then_some(BindingAst::Value(value)))
    }

    fn nested_path(&mut self) -> Step<Option<BindingAst>> {
        if self.ch != Some(OPEN_CURL) {
            return Ok(None);
        }
        self.next(Some(OPEN_CURL))?;
        if self.ch != Some(OPEN_CURL) {
            return Ok(None);
        }
        self.next(Some(OPEN_CURL))?;

        let model_ref = self.parse_path()?;
        self.next(Some(CLOSE_CURL))?;
        self.next(Some(CLOSE_CURL))?;
        Ok(Some(model_ref))
    }

    fn simple_segment(&mut self) -> Step<Option<BindingAst>> {
        if let Some(nested) = self.nested_path()? {
            return Ok(Some(nested));
        }
        if let Some(exp) = self.expression()? {
            return Ok(Some(exp));
        }
        self.identifier()
    }

    fn segment(&mut self) -> Step<Option<BindingAst>> {
        let mut parts = Vec::new();
        while let Some(part) = self.simple_segment()? {
            parts.push(part);
        }

        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(BindingAst::Concatenated(parts)),
        })
    }

    fn optionally_quoted_segment(&mut self) -> Step<Option<BindingAst>> {
        self.whitespace()?;

        if let Some(quote @ (SINGLE_QUOTE | DOUBLE_QUOTE)) = self.ch {
            self.next(Some(quote))?;
            let id = self.quoted()?;
            self.next(Some(quote))?;
            return Ok(id);
        }

        self.simple_segment()
    }

    fn equals(&mut self) -> Step<bool> {
        if self.ch != Some(EQUALS) {
            return Ok(false);
        }
        while self.ch == Some(EQUALS) {
            self.next(None)?;
        }
        Ok(true)
    }

    fn bracket(&mut self) -> Step<Option<BindingAst>> {
        if self.ch != Some(OPEN_BRACKET) {
            return Ok(None);
        }
        self.next(Some(OPEN_BRACKET))?;
        self.whitespace()?;

        let Some(mut value) = self.optionally_quoted_segment()? else {
            return Err("Expected identifier".to_string());
        };

        self.whitespace()?;
        if self.equals()? {
            self.whitespace()?;
            let second = self.optionally_quoted_segment()?;
            value = BindingAst::Query {
                key: Box::new(value),
                value: second.map(Box::new),
            };
            self.whitespace()?;
        }

        self.next(Some(CLOSE_BRACKET))?;
        Ok(Some(value))
    }

    fn segment_and_brackets(&mut self) -> Step<Vec<BindingAst>> {
        let mut parsed = Vec::new();

        if let Some(first) = self.segment()? {
            parsed.push(first);
            while let Some(bracket) = self.bracket()? {
                parsed.push(bracket);
            }
        }

        Ok(parsed)
    }

    fn parse_path(&mut self) -> Step<BindingAst> {
        let mut parts = Vec::new();

        loop {
            let next_segment = self.segment_and_brackets()?;
            let was_empty = next_segment.is_empty();
            parts.extend(next_segment);

            match self.ch {
                None | Some(CLOSE_CURL) => break,
                Some(c) if was_empty => return Err(format!("Unexpected character: {c}")),
                Some(_) => {
                    self.next(Some(SEGMENT_SEPARATOR))?;
                }
            }
        }

        Ok(BindingAst::Path(parts))
    }
}

/// Parse a raw binding string into its AST
///
/// Errors are plain messages; the parser wraps them with the offending path.
pub fn parse(path: &str) -> Result<BindingAst, String> {
    Cursor::new(path).parse_path()
}
