//! Step condition expressions
//!
//! A small, side-effect free expression language evaluated against an
//! execution's shared context:
//!
//! ```text
//! context.get('score', 0) > 80
//! len(context.get('leads', [])) > 0 and not context['paused']
//! customer.tier == "enterprise" || retries <= 2
//! ```
//!
//! Lookups start either at `context` or at a bare key name. Missing keys
//! resolve to the `.get()` default when one is given, otherwise `null`.
//! [`evaluate_condition`] treats any parse or evaluation error as `true`
//! so that a malformed condition never silently drops a step.

use crate::ConditionError;
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string '{}'", s),
            Token::Ident(s) => format!("'{}'", s),
            Token::Cmp(op) => format!("'{}'", op.symbol()),
            Token::And => "'and'".into(),
            Token::Or => "'or'".into(),
            Token::Not => "'not'".into(),
            Token::Minus => "'-'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
            Token::Comma => "','".into(),
            Token::Dot => "'.'".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
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
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Cmp(CmpOp::Gt));
                i += 1;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Cmp(CmpOp::Lt));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let start = i;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ConditionError::UnterminatedString(start)),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                value.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(q) if *q == c => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            value.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::UnexpectedChar { ch: c, offset: start })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ConditionError::UnexpectedChar { ch: other, offset: i }),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Access {
    Key(String),
    Get { key: String, default: Option<Box<Expr>> },
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Lookup(Vec<Access>),
    Len(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
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

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionError> {
        match self.advance() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(ConditionError::UnexpectedToken {
                found: t.describe(),
                expected: expected.describe(),
            }),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn expect_string(&mut self) -> Result<String, ConditionError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(s),
            Some(t) => Err(ConditionError::UnexpectedToken {
                found: t.describe(),
                expected: "string key".into(),
            }),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_operand(&mut self) -> Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Minus) => match self.advance() {
                Some(Token::Number(n)) => Ok(Expr::Literal(number(-n))),
                Some(t) => Err(ConditionError::UnexpectedToken {
                    found: t.describe(),
                    expected: "number".into(),
                }),
                None => Err(ConditionError::UnexpectedEnd),
            },
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::LBrace) => {
                self.expect(Token::RBrace)?;
                Ok(Expr::Literal(Value::Object(Map::new())))
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "None" => Ok(Expr::Literal(Value::Null)),
                "len" if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let inner = self.parse_or()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Len(Box::new(inner)))
                }
                "context" => self.parse_accessors(Vec::new()),
                _ => self.parse_accessors(vec![Access::Key(word)]),
            },
            Some(t) => Err(ConditionError::UnexpectedToken {
                found: t.describe(),
                expected: "operand".into(),
            }),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn parse_accessors(&mut self, mut path: Vec<Access>) -> Result<Expr, ConditionError> {
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    Some(t) => {
                        return Err(ConditionError::UnexpectedToken {
                            found: t.describe(),
                            expected: "attribute name".into(),
                        })
                    }
                    None => return Err(ConditionError::UnexpectedEnd),
                };
                if name == "get" && self.eat(&Token::LParen) {
                    let key = self.expect_string()?;
                    let default = if self.eat(&Token::Comma) {
                        Some(Box::new(self.parse_or()?))
                    } else {
                        None
                    };
                    self.expect(Token::RParen)?;
                    path.push(Access::Get { key, default });
                } else {
                    path.push(Access::Key(name));
                }
            } else if self.eat(&Token::LBracket) {
                let key = self.expect_string()?;
                self.expect(Token::RBracket)?;
                path.push(Access::Key(key));
            } else {
                return Ok(Expr::Lookup(path));
            }
        }
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Python-style truthiness
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn lookup_key<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = object.get(key) {
        return Some(value);
    }
    if !key.contains('.') {
        return None;
    }
    let mut current: Option<&Value> = None;
    for (i, part) in key.split('.').enumerate() {
        current = if i == 0 {
            object.get(part)
        } else {
            current?.as_object()?.get(part)
        };
    }
    current
}

fn eval(expr: &Expr, ctx: &Map<String, Value>) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Lookup(path) => {
            let mut current = Value::Object(ctx.clone());
            for access in path {
                current = match access {
                    Access::Key(key) => current
                        .as_object()
                        .and_then(|o| lookup_key(o, key))
                        .cloned()
                        .unwrap_or(Value::Null),
                    Access::Get { key, default } => {
                        match current.as_object().and_then(|o| lookup_key(o, key)) {
                            Some(found) => found.clone(),
                            None => match default {
                                Some(d) => eval(d, ctx)?,
                                None => Value::Null,
                            },
                        }
                    }
                };
            }
            Ok(current)
        }
        Expr::Len(inner) => {
            let value = eval(inner, ctx)?;
            let len = match &value {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => return Err(ConditionError::NoLength(type_name(other).to_string())),
            };
            Ok(Value::from(len))
        }
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&eval(inner, ctx)?))),
        Expr::And(l, r) => {
            if !is_truthy(&eval(l, ctx)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&eval(r, ctx)?)))
        }
        Expr::Or(l, r) => {
            if is_truthy(&eval(l, ctx)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&eval(r, ctx)?)))
        }
        Expr::Compare(l, op, r) => {
            let left = eval(l, ctx)?;
            let right = eval(r, ctx)?;
            compare(&left, *op, &right).map(Value::Bool)
        }
    }
}

/// Numeric view of a value; numeric strings parse as numbers
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> Result<bool, ConditionError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match op {
        CmpOp::Eq => Ok(ordering.map_or_else(|| left == right, |o| o == Ordering::Equal)),
        CmpOp::Ne => Ok(ordering.map_or_else(|| left != right, |o| o != Ordering::Equal)),
        _ => {
            let numeric = || match (left, right) {
                (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
                    as_number(left).zip(as_number(right)).and_then(|(a, b)| a.partial_cmp(&b))
                }
                _ => None,
            };
            let ordering = ordering.or_else(numeric).ok_or_else(|| ConditionError::Incomparable {
                left: type_name(left).to_string(),
                right: type_name(right).to_string(),
            })?;
            Ok(match op {
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Ge => ordering != Ordering::Less,
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            })
        }
    }
}

/// A parsed condition, reusable across evaluations
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            return Err(ConditionError::UnexpectedToken {
                found: extra.describe(),
                expected: "end of expression".into(),
            });
        }
        Ok(Self { expr })
    }

    pub fn evaluate(&self, context: &Map<String, Value>) -> Result<bool, ConditionError> {
        eval(&self.expr, context).map(|v| is_truthy(&v))
    }
}

/// Evaluate `source` against `context`, failing open on any error
pub fn evaluate_condition(source: &str, context: &Map<String, Value>) -> bool {
    match Condition::parse(source).and_then(|c| c.evaluate(context)) {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!(condition = source, error = %e, "condition evaluation failed, treating as true");
            true
        }
    }
}
