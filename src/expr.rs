//! ExpressionEvaluator (C5): compiles conditional expression texts against
//! the fixed variable environment `{request.path, request.host, request.time}`
//! and evaluates them per request.
//!
//! No CEL-like crate exists anywhere in this project's dependency stack, so
//! this is a small, self-contained recursive-descent parser/evaluator for the
//! closed grammar the bindings actually use: string equality and the
//! `startsWith`/`endsWith`/`contains` string methods, integer comparisons
//! against `request.time`, and `&&` / `||` / `!` / parens.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::AuthError;
use crate::singleflight::SingleFlight;

/// The closed set of values an expression may reference.
#[derive(Clone, Debug)]
pub struct Params {
    pub path: String,
    pub host: String,
    pub time: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Value {
    Str(String),
    Int(i64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Operand {
    Var(String),
    StrLit(String),
    IntLit(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StringMethod {
    StartsWith,
    EndsWith,
    Contains,
}

#[derive(Clone, Debug)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare { left: Operand, op: CmpOp, right: Operand },
    MethodCall { var: String, method: StringMethod, arg: String },
    BoolLiteral(bool),
}

/// Opaque compiled form; identity is the exact source text it came from.
pub type CompiledExpression = Arc<Expr>;

pub struct ExpressionEvaluator {
    cache: DashMap<String, CompiledExpression>,
    single_flight: SingleFlight<Result<Expr, String>>,
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self { cache: DashMap::new(), single_flight: SingleFlight::new() }
    }

    /// Compiles `text` on first use. Concurrent callers compiling the same
    /// text for the first time collapse to a single parse; every caller —
    /// leader and waiters alike — receives the same parsed `Expr` back from
    /// `SingleFlight::run` and inserts it into the cache itself, so nobody
    /// can observe a woken waiter racing ahead of the cache write.
    fn compiled(&self, text: &str, title: Option<&str>) -> Result<CompiledExpression, AuthError> {
        if let Some(expr) = self.cache.get(text) {
            return Ok(expr.clone());
        }

        let result = self.single_flight.run(text, || parse(text));
        match result {
            Some(Ok(expr)) => {
                let expr = Arc::new(expr);
                self.cache.insert(text.to_string(), expr.clone());
                Ok(expr)
            }
            Some(Err(reason)) => {
                Err(AuthError::BadExpression { title: title.map(str::to_string), reason })
            }
            None => {
                // The flight timed out without a result ever being
                // published (the leader is still stuck parsing, which
                // should not happen for a pure in-memory parse but is
                // handled defensively). Nothing fresher to report.
                match self.cache.get(text) {
                    Some(expr) => Ok(expr.clone()),
                    None => Err(AuthError::BadExpression {
                        title: title.map(str::to_string),
                        reason: "expression compilation timed out".to_string(),
                    }),
                }
            }
        }
    }

    /// `Evaluate(text, params) -> bool`. Compile-on-first-use; `title` is
    /// carried through only for the structured error log on failure.
    pub fn evaluate(
        &self,
        text: &str,
        params: &Params,
        title: Option<&str>,
    ) -> Result<bool, AuthError> {
        let expr = self.compiled(text, title)?;
        eval(&expr, params).map_err(|reason| AuthError::ExpressionError {
            title: title.map(str::to_string),
            reason,
        })
    }
}

fn eval(expr: &Expr, params: &Params) -> Result<bool, String> {
    match expr {
        Expr::And(a, b) => Ok(eval(a, params)? && eval(b, params)?),
        Expr::Or(a, b) => Ok(eval(a, params)? || eval(b, params)?),
        Expr::Not(a) => Ok(!eval(a, params)?),
        Expr::BoolLiteral(b) => Ok(*b),
        Expr::MethodCall { var, method, arg } => {
            let value = resolve(var, params)?;
            let Value::Str(s) = value else {
                return Err(format!("{var} is not a string"));
            };
            Ok(match method {
                StringMethod::StartsWith => s.starts_with(arg.as_str()),
                StringMethod::EndsWith => s.ends_with(arg.as_str()),
                StringMethod::Contains => s.contains(arg.as_str()),
            })
        }
        Expr::Compare { left, op, right } => {
            let left = resolve_operand(left, params)?;
            let right = resolve_operand(right, params)?;
            compare(&left, *op, &right)
        }
    }
}

fn resolve(var: &str, params: &Params) -> Result<Value, String> {
    match var {
        "request.path" => Ok(Value::Str(params.path.clone())),
        "request.host" => Ok(Value::Str(params.host.clone())),
        "request.time" => Ok(Value::Int(params.time)),
        other => Err(format!("unknown variable: {other}")),
    }
}

fn resolve_operand(operand: &Operand, params: &Params) -> Result<Value, String> {
    match operand {
        Operand::Var(name) => resolve(name, params),
        Operand::StrLit(s) => Ok(Value::Str(s.clone())),
        Operand::IntLit(i) => Ok(Value::Int(*i)),
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> Result<bool, String> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            _ => Err("ordering comparisons are not defined for strings".to_string()),
        },
        (Value::Int(a), Value::Int(b)) => Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }),
        _ => Err("comparison operands have mismatched types".to_string()),
    }
}

// --- Lexer/parser ---

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

fn lex(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                let n = s.parse::<i64>().map_err(|e| e.to_string())?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(s));
            }
            other => return Err(format!("unexpected character: {other:?}")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Token) -> Result<(), String> {
        match self.next() {
            Some(t) if &t == tok => Ok(()),
            other => Err(format!("expected {tok:?}, got {other:?}")),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.next();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.next();
            let inner = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }

        match self.next() {
            Some(Token::Ident(name)) => {
                if name == "true" {
                    return Ok(Expr::BoolLiteral(true));
                }
                if name == "false" {
                    return Ok(Expr::BoolLiteral(false));
                }
                if matches!(self.peek(), Some(Token::LParen)) {
                    return self.parse_method_call(name);
                }
                let left = Operand::Var(name);
                self.parse_comparison_tail(left)
            }
            Some(Token::Str(s)) => self.parse_comparison_tail(Operand::StrLit(s)),
            Some(Token::Int(n)) => self.parse_comparison_tail(Operand::IntLit(n)),
            other => Err(format!("unexpected token: {other:?}")),
        }
    }

    fn parse_method_call(&mut self, ident: String) -> Result<Expr, String> {
        let (var, method_name) =
            ident.rsplit_once('.').ok_or_else(|| format!("not a method call: {ident}"))?;
        let method = match method_name {
            "startsWith" => StringMethod::StartsWith,
            "endsWith" => StringMethod::EndsWith,
            "contains" => StringMethod::Contains,
            other => return Err(format!("unknown method: {other}")),
        };
        self.expect(&Token::LParen)?;
        let arg = match self.next() {
            Some(Token::Str(s)) => s,
            other => return Err(format!("expected string literal argument, got {other:?}")),
        };
        self.expect(&Token::RParen)?;
        Ok(Expr::MethodCall { var: var.to_string(), method, arg })
    }

    fn parse_comparison_tail(&mut self, left: Operand) -> Result<Expr, String> {
        let op = match self.peek() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            _ => {
                // A bare identifier with no comparison: treat as boolean
                // truthiness only if it resolves to a literal bool; otherwise
                // this is a malformed expression fragment.
                return match left {
                    Operand::Var(_) => {
                        Err("bare variable reference is not a boolean expression".to_string())
                    }
                    _ => Err("bare literal is not a boolean expression".to_string()),
                };
            }
        };
        self.next();
        let right = match self.next() {
            Some(Token::Ident(name)) => Operand::Var(name),
            Some(Token::Str(s)) => Operand::StrLit(s),
            Some(Token::Int(n)) => Operand::IntLit(n),
            other => return Err(format!("expected operand, got {other:?}")),
        };
        Ok(Expr::Compare { left, op, right })
    }
}

fn parse(text: &str) -> Result<Expr, String> {
    let tokens = lex(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing tokens after expression".to_string());
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(path: &str, host: &str, time: i64) -> Params {
        Params { path: path.to_string(), host: host.to_string(), time }
    }

    #[test]
    fn path_prefix_and_host_match() {
        let evaluator = ExpressionEvaluator::new();
        let text = r#"request.path.startsWith("/v1/") && request.host == "api.example""#;
        assert!(evaluator.evaluate(text, &params("/v1/users", "api.example", 0), None).unwrap());
        assert!(!evaluator.evaluate(text, &params("/v2/users", "api.example", 0), None).unwrap());
    }

    #[test]
    fn compile_once_across_concurrent_callers() {
        let evaluator = Arc::new(ExpressionEvaluator::new());
        let text = r#"request.host == "api.example""#;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let evaluator = evaluator.clone();
            handles.push(std::thread::spawn(move || {
                evaluator.evaluate(text, &params("/x", "api.example", 0), None).unwrap()
            }));
        }
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(evaluator.cache.len(), 1);
    }

    #[test]
    fn malformed_expression_is_bad_expression() {
        let evaluator = ExpressionEvaluator::new();
        let err = evaluator.evaluate("request.path ==", &params("/x", "h", 0), None).unwrap_err();
        assert!(matches!(err, AuthError::BadExpression { .. }));
    }

    #[test]
    fn integer_comparison_against_request_time() {
        let evaluator = ExpressionEvaluator::new();
        assert!(evaluator
            .evaluate("request.time > 1000", &params("/x", "h", 2000), None)
            .unwrap());
        assert!(!evaluator
            .evaluate("request.time > 1000", &params("/x", "h", 500), None)
            .unwrap());
    }
}
