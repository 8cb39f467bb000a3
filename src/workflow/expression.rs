//! Load-time Expressions
//!
//! The small language behind the `!eval` directive. An expression sees the
//! invocation arguments as `args` and the environment snapshot as `env`:
//!
//! ```text
//! len(args) > 1 and args[0] == 'deploy'
//! env.CI == 'true' or 'DEBUG' in env
//! max(len(args), 2) - 1
//! ```
//!
//! Supported: string and integer literals, `true`/`false`/`none`,
//! comparisons, `in` / `not in`, `and` / `or` / `not`, `+` and `-`,
//! indexing, attribute access on `env`, and the functions `len`, `str`,
//! `int`, `bool`, `abs`, `min`, `max`, `sum`, `any`, `all`.
//!
//! Missing environment entries and out-of-range indexes read as `none`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use serde_yaml::{Mapping, Number};

/// What an expression can see.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub args: &'a [String],
    pub env: &'a HashMap<String, String>,
}

/// Parses and evaluates `text`, returning the result as YAML.
pub fn evaluate(text: &str, scope: &Scope<'_>) -> Result<serde_yaml::Value, String> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {} after expression", token));
    }
    Ok(eval(&expr, scope)?.into_yaml())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "'{}'", n),
            Token::Str(s) => write!(f, "string '{}'", s),
            Token::Ident(name) => write!(f, "'{}'", name),
            Token::Equal => f.write_str("'=='"),
            Token::NotEqual => f.write_str("'!='"),
            Token::Less => f.write_str("'<'"),
            Token::LessEqual => f.write_str("'<='"),
            Token::Greater => f.write_str("'>'"),
            Token::GreaterEqual => f.write_str("'>='"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::LeftParen => f.write_str("'('"),
            Token::RightParen => f.write_str("')'"),
            Token::LeftBracket => f.write_str("'['"),
            Token::RightBracket => f.write_str("']'"),
            Token::Comma => f.write_str("','"),
            Token::Dot => f.write_str("'.'"),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' | '"' => tokens.push(Token::Str(parse_string(&mut chars)?)),
            c if c.is_ascii_digit() => tokens.push(parse_number(&mut chars)?),
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => tokens.push(parse_operator(&mut chars)?),
        }
    }

    Ok(tokens)
}

fn parse_string(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
    let quote = chars.next().unwrap_or('\'');
    let mut out = String::new();
    loop {
        match chars.next() {
            Some('\\') => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(c) => out.push(c),
                None => return Err("unterminated string".to_string()),
            },
            Some(c) if c == quote => return Ok(out),
            Some(c) => out.push(c),
            None => return Err("unterminated string".to_string()),
        }
    }
}

fn parse_number(chars: &mut Peekable<Chars<'_>>) -> Result<Token, String> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            chars.next();
        } else {
            break;
        }
    }
    digits
        .parse()
        .map(Token::Int)
        .map_err(|_| format!("number '{}' is out of range", digits))
}

fn parse_operator(chars: &mut Peekable<Chars<'_>>) -> Result<Token, String> {
    let ch = chars.next().unwrap_or_default();
    let followed_by_eq = chars.peek() == Some(&'=');
    let token = match ch {
        '=' if followed_by_eq => Token::Equal,
        '!' if followed_by_eq => Token::NotEqual,
        '<' if followed_by_eq => Token::LessEqual,
        '>' if followed_by_eq => Token::GreaterEqual,
        '<' => return Ok(Token::Less),
        '>' => return Ok(Token::Greater),
        '+' => return Ok(Token::Plus),
        '-' => return Ok(Token::Minus),
        '(' => return Ok(Token::LeftParen),
        ')' => return Ok(Token::RightParen),
        '[' => return Ok(Token::LeftBracket),
        ']' => return Ok(Token::RightBracket),
        ',' => return Ok(Token::Comma),
        '.' => return Ok(Token::Dot),
        other => return Err(format!("unexpected character '{}'", other)),
    };
    chars.next();
    Ok(token)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Name(String),
    Attribute(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
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
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.eat(&Token::Ident(keyword.to_string()))
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.next() {
            Some(ref found) if *found == token => Ok(()),
            Some(found) => Err(format!("expected {}, found {}", token, found)),
            None => Err(format!("expected {}, found end of expression", token)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_additive()?;

        let op = match self.peek() {
            Some(Token::Equal) => BinaryOp::Equal,
            Some(Token::NotEqual) => BinaryOp::NotEqual,
            Some(Token::Less) => BinaryOp::Less,
            Some(Token::LessEqual) => BinaryOp::LessEqual,
            Some(Token::Greater) => BinaryOp::Greater,
            Some(Token::GreaterEqual) => BinaryOp::GreaterEqual,
            Some(Token::Ident(word)) if word == "in" => BinaryOp::In,
            Some(Token::Ident(word)) if word == "not" => {
                let negated_in = self.tokens.get(self.pos + 1) == Some(&Token::Ident("in".into()));
                if !negated_in {
                    return Ok(left);
                }
                self.pos += 1;
                BinaryOp::NotIn
            }
            _ => return Ok(left),
        };
        self.pos += 1;

        let right = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinaryOp::Add
            } else if self.eat(&Token::Minus) {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.next() {
                    Some(Token::Ident(name)) => expr = Expr::Attribute(Box::new(expr), name),
                    Some(other) => return Err(format!("expected a name after '.', found {}", other)),
                    None => return Err("expected a name after '.'".to_string()),
                }
            } else if self.eat(&Token::LeftBracket) {
                let index = self.parse_or()?;
                self.expect(Token::RightBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::Int(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::LeftParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RightParen)?;
                Ok(inner)
            }
            Some(Token::LeftBracket) => {
                let items = self.parse_arguments(Token::RightBracket)?;
                Ok(Expr::Call("list".to_string(), items))
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "none" | "None" | "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.eat(&Token::LeftParen) => {
                    let arguments = self.parse_arguments(Token::RightParen)?;
                    Ok(Expr::Call(name, arguments))
                }
                _ => Ok(Expr::Name(name)),
            },
            Some(other) => Err(format!("unexpected {}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    /// Comma-separated expressions up to `close`.
    fn parse_arguments(&mut self, close: Token) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(Token::Comma)?;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    fn into_yaml(self) -> serde_yaml::Value {
        match self {
            Value::Null => serde_yaml::Value::Null,
            Value::Bool(b) => serde_yaml::Value::Bool(b),
            Value::Int(n) => serde_yaml::Value::Number(Number::from(n)),
            Value::Str(s) => serde_yaml::Value::String(s),
            Value::List(items) => {
                serde_yaml::Value::Sequence(items.into_iter().map(Value::into_yaml).collect())
            }
            Value::Map(entries) => {
                let mut map = Mapping::new();
                for (key, value) in entries {
                    map.insert(serde_yaml::Value::String(key), value.into_yaml());
                }
                serde_yaml::Value::Mapping(map)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| format!("{:?}", v.to_string())).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(entries) => {
                let parts: Vec<String> = entries.keys().cloned().collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => match name.as_str() {
            "args" => Ok(Value::List(
                scope.args.iter().cloned().map(Value::Str).collect(),
            )),
            "env" => Ok(Value::Map(
                scope
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
                    .collect(),
            )),
            other => Err(format!("unknown name '{}'", other)),
        },
        Expr::Attribute(target, name) => match eval(target, scope)? {
            Value::Map(entries) => Ok(entries.get(name).cloned().unwrap_or(Value::Null)),
            other => Err(format!("{} has no attribute '{}'", other.type_name(), name)),
        },
        Expr::Index(target, index) => index_value(eval(target, scope)?, eval(index, scope)?),
        Expr::Call(name, arguments) => {
            let values = arguments
                .iter()
                .map(|a| eval(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, values)
        }
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, scope)?.truthy())),
        Expr::Negate(inner) => match eval(inner, scope)? {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            other => Err(format!("cannot negate {}", other.type_name())),
        },
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = eval(left, scope)?;
            if left.truthy() {
                Ok(left)
            } else {
                eval(right, scope)
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = eval(left, scope)?;
            if left.truthy() {
                eval(right, scope)
            } else {
                Ok(left)
            }
        }
        Expr::Binary(op, left, right) => binary(*op, eval(left, scope)?, eval(right, scope)?),
    }
}

fn index_value(target: Value, index: Value) -> Result<Value, String> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            let len = items.len() as i64;
            let i = if i < 0 { i + len } else { i };
            Ok(usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null))
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let i = if i < 0 { i + len } else { i };
            Ok(usize::try_from(i)
                .ok()
                .and_then(|i| chars.get(i))
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or(Value::Null))
        }
        (Value::Map(entries), Value::Str(key)) => {
            Ok(entries.get(&key).cloned().unwrap_or(Value::Null))
        }
        (target, index) => Err(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        )),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, String> {
    use std::cmp::Ordering;

    let ordering = |left: &Value, right: &Value| -> Result<Ordering, String> {
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (a, b) => Err(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            )),
        }
    };

    let result = match op {
        BinaryOp::Equal => Value::Bool(left == right),
        BinaryOp::NotEqual => Value::Bool(left != right),
        BinaryOp::Less => Value::Bool(ordering(&left, &right)? == Ordering::Less),
        BinaryOp::LessEqual => Value::Bool(ordering(&left, &right)? != Ordering::Greater),
        BinaryOp::Greater => Value::Bool(ordering(&left, &right)? == Ordering::Greater),
        BinaryOp::GreaterEqual => Value::Bool(ordering(&left, &right)? != Ordering::Less),
        BinaryOp::In => Value::Bool(contains(&right, &left)?),
        BinaryOp::NotIn => Value::Bool(!contains(&right, &left)?),
        BinaryOp::Add => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Value::Int(checked(a.checked_add(b))?),
            (Value::Str(a), Value::Str(b)) => Value::Str(a + &b),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Value::List(a)
            }
            (a, b) => {
                return Err(format!(
                    "cannot add {} and {}",
                    a.type_name(),
                    b.type_name()
                ))
            }
        },
        BinaryOp::Sub => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Value::Int(checked(a.checked_sub(b))?),
            (a, b) => {
                return Err(format!(
                    "cannot subtract {} from {}",
                    b.type_name(),
                    a.type_name()
                ))
            }
        },
        BinaryOp::Or => Value::Bool(left.truthy() || right.truthy()),
        BinaryOp::And => Value::Bool(left.truthy() && right.truthy()),
    };
    Ok(result)
}

fn checked(result: Option<i64>) -> Result<i64, String> {
    result.ok_or_else(|| "integer overflow".to_string())
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, String> {
    match (haystack, needle) {
        (Value::List(items), needle) => Ok(items.contains(needle)),
        (Value::Str(s), Value::Str(sub)) => Ok(s.contains(sub.as_str())),
        (Value::Map(entries), Value::Str(key)) => Ok(entries.contains_key(key)),
        (h, n) => Err(format!(
            "cannot test {} membership in {}",
            n.type_name(),
            h.type_name()
        )),
    }
}

fn call(name: &str, mut args: Vec<Value>) -> Result<Value, String> {
    let single = |args: &mut Vec<Value>| -> Result<Value, String> {
        if args.len() == 1 {
            Ok(args.remove(0))
        } else {
            Err(format!("{}() takes exactly one argument", name))
        }
    };

    match name {
        "list" => Ok(Value::List(args)),
        "len" => match single(&mut args)? {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
            other => Err(format!("len() of {}", other.type_name())),
        },
        "str" => Ok(Value::Str(single(&mut args)?.to_string())),
        "int" => match single(&mut args)? {
            Value::Int(n) => Ok(Value::Int(n)),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            Value::Str(s) => s
                .trim()
                .parse()
                .map(Value::Int)
                .map_err(|_| format!("int() of '{}'", s)),
            other => Err(format!("int() of {}", other.type_name())),
        },
        "bool" => Ok(Value::Bool(single(&mut args)?.truthy())),
        "abs" => match single(&mut args)? {
            Value::Int(n) => Ok(Value::Int(checked(n.checked_abs())?)),
            other => Err(format!("abs() of {}", other.type_name())),
        },
        "any" | "all" => {
            let items = match single(&mut args)? {
                Value::List(items) => items,
                other => return Err(format!("{}() of {}", name, other.type_name())),
            };
            Ok(Value::Bool(if name == "any" {
                items.iter().any(Value::truthy)
            } else {
                items.iter().all(Value::truthy)
            }))
        }
        "sum" => {
            let items = match single(&mut args)? {
                Value::List(items) => items,
                other => return Err(format!("sum() of {}", other.type_name())),
            };
            items.into_iter().try_fold(Value::Int(0), |acc, item| binary(BinaryOp::Add, acc, item))
        }
        "min" | "max" => {
            let items = match args.len() {
                0 => return Err(format!("{}() needs at least one argument", name)),
                1 => match args.remove(0) {
                    Value::List(items) => items,
                    other => vec![other],
                },
                _ => args,
            };
            let mut best: Option<Value> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let wanted = if name == "min" {
                            BinaryOp::Less
                        } else {
                            BinaryOp::Greater
                        };
                        if binary(wanted, item.clone(), current.clone())?.truthy() {
                            item
                        } else {
                            current
                        }
                    }
                });
            }
            best.ok_or_else(|| format!("{}() of an empty list", name))
        }
        other => Err(format!("unknown function '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value as Yaml;

    fn run(text: &str, args: &[&str], env: &[(&str, &str)]) -> Result<Yaml, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        evaluate(text, &Scope { args: &args, env: &env })
    }

    #[test]
    fn test_argument_checks() {
        let text = "len(args) > 1 and args[0] == 'deploy'";
        assert_eq!(run(text, &["deploy", "prod"], &[]), Ok(Yaml::Bool(true)));
        assert_eq!(run(text, &["deploy"], &[]), Ok(Yaml::Bool(false)));
        assert_eq!(run("'--force' in args", &["push", "--force"], &[]), Ok(Yaml::Bool(true)));
        assert_eq!(run("'--force' not in args", &[], &[]), Ok(Yaml::Bool(true)));
    }

    #[test]
    fn test_missing_index_and_env_read_as_none() {
        assert_eq!(run("args[3]", &["a"], &[]), Ok(Yaml::Null));
        assert_eq!(run("args[-1]", &["a", "b"], &[]), Ok(Yaml::String("b".into())));
        assert_eq!(run("env.MISSING", &[], &[]), Ok(Yaml::Null));
        assert_eq!(run("env['CI'] == 'true'", &[], &[("CI", "true")]), Ok(Yaml::Bool(true)));
    }

    #[test]
    fn test_or_returns_operand() {
        assert_eq!(
            run("env.TARGET or 'local'", &[], &[]),
            Ok(Yaml::String("local".into()))
        );
        assert_eq!(
            run("env.TARGET or 'local'", &[], &[("TARGET", "prod")]),
            Ok(Yaml::String("prod".into()))
        );
    }

    #[test]
    fn test_functions_and_arithmetic() {
        assert_eq!(run("max(len(args), 2) - 1", &["a", "b", "c"], &[]), Ok(Yaml::Number(2.into())));
        assert_eq!(run("sum([1, 2, 3]) + abs(-4)", &[], &[]), Ok(Yaml::Number(10.into())));
        assert_eq!(run("int('7') + 1", &[], &[]), Ok(Yaml::Number(8.into())));
        assert_eq!(run("all([true, 1, 'x']) and not any([])", &[], &[]), Ok(Yaml::Bool(true)));
        assert_eq!(run("str(3) + 'rd'", &[], &[]), Ok(Yaml::String("3rd".into())));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(run("not 1 == 2 and (true or false)", &[], &[]), Ok(Yaml::Bool(true)));
        assert_eq!(run("1 + 2 == 3", &[], &[]), Ok(Yaml::Bool(true)));
    }

    #[test]
    fn test_errors() {
        assert!(run("len(args", &[], &[]).is_err());
        assert!(run("'open", &[], &[]).is_err());
        assert!(run("1 < 'a'", &[], &[]).is_err());
        assert!(run("os.environ", &[], &[]).unwrap_err().contains("unknown name"));
        assert!(run("eval('1')", &[], &[]).unwrap_err().contains("unknown function"));
        assert!(run("1 2", &[], &[]).unwrap_err().contains("after expression"));
        assert!(run("a = 1", &[], &[]).is_err());
    }
}
