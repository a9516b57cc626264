//! Expression parser
//!
//! Precedence-climbing parser over a char buffer. Grammar:
//! - literals: numbers (`12`, `3.4`, `.5`, `1e3`), strings (`'a'`, `"b"`), `true false null undefined`
//! - `{{model.ref}}` with nested brace counting
//! - identifiers, member access (`a.b`, `a[b]`), calls (`fn(a, b)`), groups
//! - array `[a, b]` and object `{"key": value}` literals
//! - unary `- ! ~ +`, binary operators by precedence, ternary `a ? b : c`
//! - top-level statements separated by `;` or `,` (more than one → `Compound`)

use serde_json::Value;

use super::ast::{ExpressionNode, NodeLocation, ObjectAttribute};
use crate::error::{PlayerError, Result};
use crate::util::number_value;

const BINARY_OPS: &[(&str, u8)] = &[
    ("=", 3),
    ("+=", 3),
    ("-=", 3),
    ("&=", 3),
    ("|=", 3),
    ("||", 5),
    ("&&", 6),
    ("|", 7),
    ("^", 8),
    ("&", 9),
    ("==", 10),
    ("!=", 10),
    ("===", 10),
    ("!==", 10),
    ("<", 11),
    (">", 11),
    ("<=", 11),
    (">=", 11),
    ("<<", 12),
    (">>", 12),
    (">>>", 12),
    ("+", 13),
    ("-", 13),
    ("*", 14),
    ("/", 14),
    ("%", 14),
];

const UNARY_OPS: &[char] = &['-', '!', '~', '+'];
const MAX_BINOP_LEN: usize = 3;

/// Precedence of a binary operator, `0` when unknown
pub fn binary_precedence(op: &str) -> u8 {
    BINARY_OPS
        .iter()
        .find(|(candidate, _)| *candidate == op)
        .map(|(_, prec)| *prec)
        .unwrap_or(0)
}

fn is_identifier_start(ch: Option<char>) -> bool {
    matches!(ch, Some('$' | '_' | 'A'..='Z' | 'a'..='z'))
}

fn is_identifier_part(ch: Option<char>) -> bool {
    matches!(ch, Some('$' | '_' | 'A'..='Z' | 'a'..='z' | '0'..='9'))
}

fn is_digit(ch: Option<char>) -> bool {
    matches!(ch, Some('0'..='9'))
}

fn syntax(message: impl Into<String>, index: usize) -> PlayerError {
    PlayerError::ExpressionSyntax {
        message: message.into(),
        index,
    }
}

/// Best-effort parse result
#[derive(Debug)]
pub struct LenientParse {
    /// Everything parsed before the first error
    pub node: Option<ExpressionNode>,
    pub error: Option<PlayerError>,
}

/// Parse an expression, failing on the first syntax error
pub fn parse_expression(source: &str) -> Result<ExpressionNode> {
    let mut parser = Parser::new(source);
    let mut nodes = Vec::new();
    parser.statements(&mut nodes)?;
    Ok(parser.finish(nodes))
}

/// Parse an expression, keeping whatever parsed before an error
pub fn parse_expression_lenient(source: &str) -> LenientParse {
    let mut parser = Parser::new(source);
    let mut nodes = Vec::new();
    let error = parser.statements(&mut nodes).err();
    let node = (!nodes.is_empty() || error.is_none()).then(|| parser.finish(nodes));
    LenientParse { node, error }
}

struct Parser {
    chars: Vec<char>,
    index: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
        }
    }

    fn at(&self, i: usize) -> Option<char> {
        self.chars.get(i).copied()
    }

    fn peek(&self) -> Option<char> {
        self.at(self.index)
    }

    fn location(&self, start: usize) -> NodeLocation {
        NodeLocation::new(start, self.index)
    }

    fn char_text(&self, i: usize) -> String {
        self.at(i).map(String::from).unwrap_or_default()
    }

    fn statements(&mut self, nodes: &mut Vec<ExpressionNode>) -> Result<()> {
        while self.index < self.chars.len() {
            if matches!(self.peek(), Some(';' | ',')) {
                self.index += 1;
                continue;
            }

            match self.expression()? {
                Some(node) => nodes.push(node),
                None if self.index < self.chars.len() => {
                    return Err(syntax(
                        format!("Unexpected \"{}\"", self.char_text(self.index)),
                        self.index,
                    ))
                }
                None => {}
            }
        }
        Ok(())
    }

    fn finish(&self, mut nodes: Vec<ExpressionNode>) -> ExpressionNode {
        if nodes.len() == 1 {
            if let Some(node) = nodes.pop() {
                return node;
            }
        }
        ExpressionNode::Compound {
            body: nodes,
            location: self.location(0),
        }
    }

    fn spaces(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.index += 1;
        }
    }

    /// Full expression including a trailing ternary
    fn expression(&mut self) -> Result<Option<ExpressionNode>> {
        let test = self.binary_expression()?;
        self.spaces();

        if self.peek() != Some('?') {
            return Ok(test);
        }
        self.index += 1;

        let test = test.ok_or_else(|| syntax("Expected expression", self.index))?;
        let consequent = self
            .expression()?
            .ok_or_else(|| syntax("Expected expression", self.index))?;
        self.spaces();

        if self.peek() != Some(':') {
            return Err(syntax("Expected :", self.index));
        }
        self.index += 1;

        let alternate = self
            .expression()?
            .ok_or_else(|| syntax("Expected expression", self.index))?;

        let location = NodeLocation::spanning(test.location(), alternate.location());
        Ok(Some(ExpressionNode::ConditionalExpression {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
            location,
        }))
    }

    /// Longest matching binary operator at the cursor
    fn binary_op(&mut self) -> Option<&'static str> {
        self.spaces();

        let available = self.chars.len().saturating_sub(self.index).min(MAX_BINOP_LEN);
        for len in (1..=available).rev() {
            let candidate: String = self.chars[self.index..self.index + len].iter().collect();
            if let Some((op, _)) = BINARY_OPS.iter().find(|(op, _)| *op == candidate) {
                self.index += len;
                return Some(*op);
            }
        }
        None
    }

    fn binary_expression(&mut self) -> Result<Option<ExpressionNode>> {
        let left = self.token()?;
        let op_start = self.index;
        let Some(first_op) = self.binary_op() else {
            return Ok(left);
        };

        let Some(left) = left else {
            return Err(syntax(
                format!("Unexpected \"{}\"", first_op),
                op_start,
            ));
        };

        let right = self
            .token()?
            .ok_or_else(|| syntax(format!("Expected expression after {first_op}"), self.index))?;

        let mut nodes = vec![left, right];
        let mut ops = vec![(first_op, binary_precedence(first_op))];

        while let Some(op) = self.binary_op() {
            let prec = binary_precedence(op);

            while let Some(&(top, top_prec)) = ops.last() {
                if prec > top_prec || nodes.len() < 2 {
                    break;
                }
                ops.pop();
                let (Some(right), Some(left)) = (nodes.pop(), nodes.pop()) else {
                    break;
                };
                nodes.push(ExpressionNode::binary(top, left, right));
            }

            let node = self
                .token()?
                .ok_or_else(|| syntax(format!("Expected expression after {op}"), self.index))?;
            ops.push((op, prec));
            nodes.push(node);
        }

        let mut node = nodes.pop().ok_or_else(|| syntax("Expected expression", self.index))?;
        while let Some((op, _)) = ops.pop() {
            let left = nodes.pop().ok_or_else(|| syntax("Expected expression", self.index))?;
            node = ExpressionNode::binary(op, left, node);
        }

        Ok(Some(node))
    }

    /// A single operand: literal, variable, group, array, object, model ref or unary
    fn token(&mut self) -> Result<Option<ExpressionNode>> {
        self.spaces();
        let ch = self.peek();
        let start = self.index;

        if is_digit(ch) || ch == Some('.') {
            return self.numeric_literal().map(Some);
        }
        if matches!(ch, Some('\'' | '"')) {
            return self.string_literal().map(Some);
        }
        if is_identifier_start(ch) || ch == Some('(') {
            return self.variable().map(Some);
        }
        if ch == Some('[') {
            return self.array().map(Some);
        }
        if ch == Some('{') && self.at(self.index + 1) == Some('{') {
            return self.model_ref().map(Some);
        }
        if ch == Some('{') {
            return self.object().map(Some);
        }

        match ch {
            Some(op) if UNARY_OPS.contains(&op) => {
                self.index += 1;
                let argument = self
                    .token()?
                    .ok_or_else(|| syntax(format!("Expected expression after {op}"), self.index))?;
                Ok(Some(ExpressionNode::UnaryExpression {
                    operator: op.to_string(),
                    argument: Box::new(argument),
                    location: self.location(start),
                }))
            }
            _ => Ok(None),
        }
    }

    fn numeric_literal(&mut self) -> Result<ExpressionNode> {
        let start = self.index;
        let mut num = String::new();

        while is_digit(self.peek()) {
            num.extend(self.peek());
            self.index += 1;
        }

        if self.peek() == Some('.') {
            num.push('.');
            self.index += 1;
            while is_digit(self.peek()) {
                num.extend(self.peek());
                self.index += 1;
            }
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            num.extend(self.peek());
            self.index += 1;

            if matches!(self.peek(), Some('+' | '-')) {
                num.extend(self.peek());
                self.index += 1;
            }
            while is_digit(self.peek()) {
                num.extend(self.peek());
                self.index += 1;
            }

            if !is_digit(self.at(self.index.wrapping_sub(1))) {
                return Err(syntax(
                    format!("Expected exponent ({num}{})", self.char_text(self.index)),
                    self.index,
                ));
            }
        }

        if is_identifier_start(self.peek()) {
            return Err(syntax(
                format!(
                    "Variable names cannot start with a number ({num}{})",
                    self.char_text(self.index)
                ),
                self.index,
            ));
        }
        if self.peek() == Some('.') {
            return Err(syntax("Unexpected period", self.index));
        }

        let value = num.parse::<f64>().map(number_value).unwrap_or(Value::Null);
        Ok(ExpressionNode::Literal {
            value,
            raw: num,
            location: self.location(start),
        })
    }

    fn string_literal(&mut self) -> Result<ExpressionNode> {
        let quote = self.peek().unwrap_or('"');
        self.index += 1;
        let start = self.index;
        let mut text = String::new();
        let mut closed = false;

        while let Some(ch) = self.peek() {
            self.index += 1;

            if ch == quote {
                closed = true;
                break;
            }
            if ch != '\\' {
                text.push(ch);
                continue;
            }

            let escaped = self.peek();
            self.index += 1;
            match escaped {
                Some('n') => text.push('\n'),
                Some('r') => text.push('\r'),
                Some('t') => text.push('\t'),
                Some('b') => text.push('\u{8}'),
                Some('f') => text.push('\u{c}'),
                Some('v') => text.push('\u{b}'),
                Some(other) => text.push(other),
                None => {}
            }
        }

        if !closed {
            return Err(syntax(format!("Unclosed quote after \"{text}\""), self.index));
        }

        Ok(ExpressionNode::Literal {
            raw: format!("{quote}{text}{quote}"),
            value: Value::String(text),
            location: self.location(start),
        })
    }

    fn model_ref(&mut self) -> Result<ExpressionNode> {
        let start = self.index;
        let mut text = String::new();
        let mut closed = false;
        let mut open_braces = 1;

        self.index += 2;
        while let Some(ch) = self.peek() {
            self.index += 1;

            if ch == '}' && self.peek() == Some('}') {
                self.index += 1;
                open_braces -= 1;
                if open_braces == 0 {
                    closed = true;
                    break;
                }
                text.push_str("}}");
            } else if ch == '{' && self.peek() == Some('{') {
                open_braces += 1;
                text.push_str("{{");
                self.index += 1;
            } else {
                text.push(ch);
            }
        }

        if !closed {
            return Err(syntax(format!("Unclosed brace after \"{text}\""), self.index));
        }

        Ok(ExpressionNode::ModelRef {
            reference: text,
            location: self.location(start),
        })
    }

    fn identifier(&mut self) -> Result<ExpressionNode> {
        let start = self.index;

        if !is_identifier_start(self.peek()) {
            return Err(syntax(
                format!("Unexpected {}", self.char_text(self.index)),
                self.index,
            ));
        }
        self.index += 1;
        while is_identifier_part(self.peek()) {
            self.index += 1;
        }

        let name: String = self.chars[start..self.index].iter().collect();
        let location = self.location(start);

        let literal = match name.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" | "undefined" => Some(Value::Null),
            _ => None,
        };

        Ok(match literal {
            Some(value) => ExpressionNode::Literal {
                value,
                raw: name,
                location,
            },
            None if name == "this" => ExpressionNode::ThisExpression { location },
            None => ExpressionNode::Identifier { name, location },
        })
    }

    /// Comma-separated expressions up to `termination` (already past the opener)
    fn arguments(&mut self, termination: char) -> Result<Vec<ExpressionNode>> {
        let mut args = Vec::new();

        while self.index < self.chars.len() {
            self.spaces();
            let ch = self.peek();

            if ch == Some(termination) {
                self.index += 1;
                break;
            }
            if ch == Some(',') {
                self.index += 1;
                continue;
            }

            match self.expression()? {
                Some(node) if !matches!(node, ExpressionNode::Compound { .. }) => args.push(node),
                _ => return Err(syntax("Expected comma", self.index)),
            }
        }

        Ok(args)
    }

    fn variable(&mut self) -> Result<ExpressionNode> {
        let start = self.index;
        let mut node = if self.peek() == Some('(') {
            self.group()?
        } else {
            self.identifier()?
        };

        self.spaces();
        while let Some(ch @ ('.' | '[' | '(')) = self.peek() {
            self.index += 1;

            node = match ch {
                '.' => {
                    self.spaces();
                    let property = self.identifier()?;
                    ExpressionNode::MemberExpression {
                        object: Box::new(node),
                        property: Box::new(property),
                        computed: false,
                        location: self.location(start),
                    }
                }
                '[' => {
                    let property = self
                        .expression()?
                        .ok_or_else(|| syntax("Expected expression", self.index))?;
                    self.spaces();
                    if self.peek() != Some(']') {
                        return Err(syntax("Unclosed [", self.index));
                    }
                    self.index += 1;
                    ExpressionNode::MemberExpression {
                        object: Box::new(node),
                        property: Box::new(property),
                        computed: true,
                        location: self.location(start),
                    }
                }
                _ => {
                    let args = self.arguments(')')?;
                    ExpressionNode::CallExpression {
                        callee: Box::new(node),
                        args,
                        location: self.location(start),
                    }
                }
            };

            self.spaces();
        }

        Ok(node)
    }

    fn group(&mut self) -> Result<ExpressionNode> {
        self.index += 1;
        let node = self.expression()?;
        self.spaces();

        if self.peek() != Some(')') {
            return Err(syntax("Unclosed (", self.index));
        }
        self.index += 1;
        node.ok_or_else(|| syntax("Expected expression", self.index))
    }

    fn array(&mut self) -> Result<ExpressionNode> {
        let start = self.index;
        self.index += 1;
        let elements = self.arguments(']')?;
        Ok(ExpressionNode::ArrayExpression {
            elements,
            location: self.location(start),
        })
    }

    fn object(&mut self) -> Result<ExpressionNode> {
        let start = self.index;
        let mut attributes = Vec::new();
        let mut closed = false;
        let mut key: Option<ExpressionNode> = None;

        self.index += 1;
        while self.index < self.chars.len() {
            self.spaces();
            let ch = self.peek();

            if ch == Some('}') {
                if key.is_some() {
                    return Err(syntax("A key was defined but a value was not", self.index));
                }
                self.index += 1;
                closed = true;
                break;
            }

            match key.take() {
                None => {
                    if !matches!(ch, Some('\'' | '"')) {
                        return Err(syntax("An object must start wtih a key", self.index));
                    }
                    let parsed = self.string_literal()?;
                    self.spaces();
                    if self.peek() != Some(':') {
                        return Err(syntax("A colon must follow an object key", self.index));
                    }
                    self.index += 1;
                    key = Some(parsed);
                }
                Some(current) => {
                    let value = self
                        .expression()?
                        .ok_or_else(|| syntax("A key was defined but a value was not", self.index))?;
                    attributes.push(ObjectAttribute {
                        key: current,
                        value,
                    });

                    self.spaces();
                    match self.peek() {
                        Some(',') => self.index += 1,
                        Some('}') => {}
                        _ => {
                            return Err(syntax("Please add a comma to add another key", self.index))
                        }
                    }
                }
            }
        }

        if !closed {
            return Err(syntax("Unclosed brace in object", self.index));
        }

        Ok(ExpressionNode::Object {
            attributes,
            location: self.location(start),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(source: &str) -> String {
        parse_expression(source).unwrap_err().to_string()
    }

    #[test]
    fn respects_precedence() {
        let node = parse_expression("1 + 2 * 3").unwrap();

        let ExpressionNode::BinaryExpression { operator, right, .. } = node else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, "+");
        assert!(matches!(*right, ExpressionNode::BinaryExpression { ref operator, .. } if operator == "*"));
    }

    #[test]
    fn logical_assignment_and_modification_kinds() {
        assert_eq!(parse_expression("a && b").unwrap().kind(), "LogicalExpression");
        assert_eq!(parse_expression("{{foo}} = 3").unwrap().kind(), "Assignment");
        assert_eq!(parse_expression("{{foo}} += 3").unwrap().kind(), "Modification");
        assert_eq!(parse_expression("a === b").unwrap().kind(), "BinaryExpression");
    }

    #[test]
    fn parses_model_refs_with_nesting() {
        let node = parse_expression("{{foo.{{bar}}}}").unwrap();
        assert!(matches!(node, ExpressionNode::ModelRef { ref reference, .. } if reference == "foo.{{bar}}"));
    }

    #[test]
    fn parses_literals() {
        let ExpressionNode::Literal { value, .. } = parse_expression("'a\\nb'").unwrap() else {
            panic!("expected literal");
        };
        assert_eq!(value, json!("a\nb"));

        let ExpressionNode::Literal { value, .. } = parse_expression("1.5e1").unwrap() else {
            panic!("expected literal");
        };
        assert_eq!(value, json!(15));

        assert!(matches!(
            parse_expression("undefined").unwrap(),
            ExpressionNode::Literal { value: Value::Null, .. }
        ));
        assert_eq!(parse_expression("this").unwrap().kind(), "ThisExpression");
    }

    #[test]
    fn parses_calls_members_arrays_objects() {
        assert_eq!(parse_expression("foo(1, 'a')").unwrap().kind(), "CallExpression");
        assert_eq!(parse_expression("foo.bar[0]").unwrap().kind(), "MemberExpression");
        assert_eq!(parse_expression("[1, 2]").unwrap().kind(), "ArrayExpression");
        assert_eq!(parse_expression("{'a': 1, \"b\": [2]}").unwrap().kind(), "Object");
        assert_eq!(parse_expression("a ? b : c").unwrap().kind(), "ConditionalExpression");
    }

    #[test]
    fn separators_make_compound() {
        let ExpressionNode::Compound { body, .. } = parse_expression("a = 1; b = 2").unwrap() else {
            panic!("expected compound");
        };
        assert_eq!(body.len(), 2);
        assert_eq!(parse_expression("a;").unwrap().kind(), "Identifier");
    }

    #[test]
    fn reports_errors_with_character_offsets() {
        assert!(message("1a").contains("Variable names cannot start with a number"));
        assert_eq!(message("1.2.3"), "PLY-010: Unexpected period at character 3");
        assert!(message("1e").contains("Expected exponent"));
        assert!(message("'abc").contains("Unclosed quote after \"abc\""));
        assert!(message("{{foo").contains("Unclosed brace after \"foo\""));
        assert!(message("{1: 2}").contains("An object must start wtih a key"));
        assert!(message("{'a' 2}").contains("A colon must follow an object key"));
        assert!(message("{'a': 1 'b': 2}").contains("Please add a comma to add another key"));
        assert!(message("{'a': }").contains("A key was defined but a value was not"));
        assert!(message("{'a': 1,").contains("Unclosed brace in object"));
        assert!(message("foo[1").contains("Unclosed ["));
        assert!(message("(1 + 2").contains("Unclosed ("));
        assert!(message("1 +").contains("Expected expression after +"));
        assert!(message("a ? b").contains("Expected :"));
        assert!(message(")").contains("Unexpected \")\""));
    }

    #[test]
    fn locations_span_operands() {
        let node = parse_expression("ab + cd").unwrap();
        assert_eq!(node.location(), NodeLocation::new(0, 7));
    }

    #[test]
    fn lenient_keeps_partial_tree() {
        let parsed = parse_expression_lenient("a = 1; (b");

        assert!(parsed.error.is_some());
        assert_eq!(parsed.node.map(|n| n.kind()), Some("Assignment"));

        let clean = parse_expression_lenient("1 + 1");
        assert!(clean.error.is_none());
        assert!(clean.node.is_some());
    }
}
