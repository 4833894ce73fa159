/// Routing predicates
///
/// A small boolean expression language over state key paths, parsed once when a
/// graph is submitted and evaluated by the edge router at every decision:
///
/// ```text
/// quality_score >= 7
/// exists review.summary and not review.blocked
/// (status == "ok" or retries < 3) && $meta.step <= 20
/// tags contains "urgent"
/// ```
///
/// Evaluation is pure and total with respect to missing data: a path that does
/// not resolve is "absent", which makes comparisons false (and `!=` true). Only
/// genuinely ill-typed comparisons (ordering a string against a number,
/// `contains` on a scalar) are reported as errors.

use crate::workflow::state::{KeyPath, WorkflowState};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::{cmp::Ordering, fmt};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredicateError {
    #[error("Cannot parse predicate '{input}': {message}")]
    Parse { input: String, message: String },

    #[error("Cannot evaluate '{path} {op} {literal}': {message}")]
    TypeMismatch {
        path: String,
        op: CompareOp,
        literal: Value,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Contains => "contains",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(bool),
    Truthy(KeyPath),
    Exists(KeyPath),
    Compare {
        path: KeyPath,
        op: CompareOp,
        literal: Value,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Compiled predicate; serializes back to its source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Self, PredicateError> {
        let parse_error = |message: String| PredicateError::Parse {
            input: input.to_string(),
            message,
        };

        let tokens = tokenize(input).map_err(parse_error)?;
        if tokens.is_empty() {
            return Err(parse_error("empty predicate".to_string()));
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or().map_err(parse_error)?;
        if let Some(token) = parser.peek() {
            return Err(parse_error(format!("unexpected trailing {:?}", token)));
        }

        Ok(Self {
            source: input.trim().to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, state: &WorkflowState) -> Result<bool, PredicateError> {
        eval(&self.expr, state)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Predicate {
    type Error = PredicateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Predicate::parse(&value)
    }
}

impl From<Predicate> for String {
    fn from(predicate: Predicate) -> Self {
        predicate.source
    }
}

fn eval(expr: &Expr, state: &WorkflowState) -> Result<bool, PredicateError> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Truthy(path) => Ok(state.resolve(path).map(truthy).unwrap_or(false)),
        Expr::Exists(path) => Ok(state.resolve(path).is_some()),
        Expr::Compare { path, op, literal } => compare(path, *op, literal, state.resolve(path)),
        Expr::Not(inner) => Ok(!eval(inner, state)?),
        Expr::And(left, right) => Ok(eval(left, state)? && eval(right, state)?),
        Expr::Or(left, right) => Ok(eval(left, state)? || eval(right, state)?),
    }
}

fn compare(
    path: &KeyPath,
    op: CompareOp,
    literal: &Value,
    actual: Option<&Value>,
) -> Result<bool, PredicateError> {
    let Some(actual) = actual else {
        return Ok(op == CompareOp::Ne);
    };

    let mismatch = |message: String| PredicateError::TypeMismatch {
        path: path.to_string(),
        op,
        literal: literal.clone(),
        message,
    };

    match op {
        CompareOp::Eq => Ok(values_equal(actual, literal)),
        CompareOp::Ne => Ok(!values_equal(actual, literal)),
        CompareOp::Contains => match (actual, literal) {
            (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
            (Value::Array(items), needle) => Ok(items.iter().any(|item| values_equal(item, needle))),
            (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
            (other, _) => Err(mismatch(format!("cannot search inside {}", type_name(other)))),
        },
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (actual, literal) {
                // null orders against nothing, same as an absent key
                (Value::Null, _) | (_, Value::Null) => return Ok(false),
                (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                (a, b) => {
                    return Err(mismatch(format!(
                        "cannot order {} against {}",
                        type_name(a),
                        type_name(b)
                    )))
                }
            };

            Ok(match ordering {
                Some(ordering) => match op {
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Le => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                },
                None => false,
            })
        }
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Number(Number),
    Str(String),
    Op(CompareOp),
    And,
    Or,
    Not,
    Exists,
    True,
    False,
    Null,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let (text, consumed) = read_string(&chars[i..])?;
                tokens.push(Token::Str(text));
                i += consumed;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                let op = match (c, inclusive) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                tokens.push(Token::Op(op));
                i += if inclusive { 2 } else { 1 };
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(parse_number(&text)?));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '.' | '$'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "exists" => Token::Exists,
                    "contains" => Token::Op(CompareOp::Contains),
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Path(word),
                });
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

/// Reads a quoted string starting at `chars[0]`; returns the text and chars consumed
fn read_string(chars: &[char]) -> Result<(String, usize), String> {
    let quote = chars[0];
    let mut text = String::new();
    let mut i = 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars.get(i + 1).ok_or("unterminated escape")?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err("unterminated string literal".to_string())
}

fn parse_number(text: &str) -> Result<Number, String> {
    if let Ok(int) = text.parse::<i64>() {
        return Ok(Number::from(int));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| format!("invalid number '{}'", text))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(Token::True) => Ok(Expr::Literal(true)),
            Some(Token::False) => Ok(Expr::Literal(false)),
            Some(Token::Exists) => match self.advance() {
                Some(Token::Path(raw)) => Ok(Expr::Exists(KeyPath::parse(&raw)?)),
                _ => Err("'exists' must be followed by a key path".to_string()),
            },
            Some(Token::Path(raw)) => {
                let path = KeyPath::parse(&raw)?;
                if let Some(Token::Op(op)) = self.peek().cloned() {
                    self.advance();
                    let literal = self.parse_literal()?;
                    Ok(Expr::Compare { path, op, literal })
                } else {
                    Ok(Expr::Truthy(path))
                }
            }
            Some(token) => Err(format!("unexpected {:?}", token)),
            None => Err("unexpected end of predicate".to_string()),
        }
    }

    fn parse_literal(&mut self) -> Result<Value, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Value::Number(n)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Null) => Ok(Value::Null),
            Some(token) => Err(format!("expected a literal, found {:?}", token)),
            None => Err("expected a literal after comparison operator".to_string()),
        }
    }
}
