// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A small arithmetic language for sharding rules, e.g.
//! `crc32(concat(${tenant}, '-', ${user_id})) % 8`.
//!
//! Integers are `i64` and every operation is checked. `NULL` propagates
//! through operators and functions except `coalesce`.

use std::{collections::HashMap, fmt, iter::Peekable, str::Chars};

use crc32fast::Hasher;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Null,
    Int(i64),
    Str(String),
}

impl Scalar {
    fn from_value(v: &Value) -> Scalar {
        match v {
            Value::Null => Scalar::Null,
            Value::Text(s) => Scalar::Str(s.clone()),
            Value::Bytes(b) => Scalar::Str(String::from_utf8_lossy(b).into_owned()),
            v => match v.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Str(v.to_string()),
            },
        }
    }

    fn as_int(&self) -> Result<i64, String> {
        match self {
            Scalar::Int(i) => Ok(*i),
            Scalar::Str(s) => {
                s.trim().parse::<i64>().map_err(|_| format!("{:?} is not an integer", s))
            }
            Scalar::Null => Err("unexpected NULL".to_string()),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            Scalar::Int(i) => i.to_be_bytes().to_vec(),
            Scalar::Str(s) => s.as_bytes().to_vec(),
            Scalar::Null => vec![],
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Placeholder(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer { chars: input.chars().peekable() }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = vec![];
        while let Some(&c) = self.chars.peek() {
            let token = match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '0'..='9' => self.number()?,
                '\'' => self.string()?,
                '$' => self.placeholder()?,
                c if c.is_ascii_alphabetic() || c == '_' => Token::Ident(self.word()),
                _ => {
                    self.chars.next();
                    match c {
                        '+' => Token::Plus,
                        '-' => Token::Minus,
                        '*' => Token::Star,
                        '/' => Token::Slash,
                        '%' => Token::Percent,
                        '(' => Token::LParen,
                        ')' => Token::RParen,
                        ',' => Token::Comma,
                        c => return Err(format!("unexpected character {:?}", c)),
                    }
                }
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        word
    }

    fn number(&mut self) -> Result<Token, String> {
        let digits = self.word();
        digits.parse::<i64>().map(Token::Int).map_err(|_| format!("invalid number {:?}", digits))
    }

    fn string(&mut self) -> Result<Token, String> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some('\'') => {
                    // '' is an escaped quote
                    if self.chars.peek() == Some(&'\'') {
                        self.chars.next();
                        s.push('\'');
                    } else {
                        return Ok(Token::Str(s));
                    }
                }
                Some(c) => s.push(c),
                None => return Err("unterminated string literal".to_string()),
            }
        }
    }

    fn placeholder(&mut self) -> Result<Token, String> {
        self.chars.next();
        if self.chars.next() != Some('{') {
            return Err("expected '{' after '$'".to_string());
        }
        let mut name = String::new();
        loop {
            match self.chars.next() {
                Some('}') => break,
                Some(c) => name.push(c),
                None => return Err("unterminated placeholder".to_string()),
            }
        }
        let name = name.trim();
        if name.is_empty() {
            return Err("empty placeholder".to_string());
        }
        Ok(Token::Placeholder(super::normalize_ident(name)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Hash,
    Crc32,
    Abs,
    Substr,
    Concat,
    Coalesce,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        match name.to_ascii_lowercase().as_str() {
            "hash" => Some(Func::Hash),
            "crc32" => Some(Func::Crc32),
            "abs" => Some(Func::Abs),
            "substr" => Some(Func::Substr),
            "concat" => Some(Func::Concat),
            "coalesce" => Some(Func::Coalesce),
            _ => None,
        }
    }

    fn check_arity(&self, n: usize) -> bool {
        match self {
            Func::Hash | Func::Crc32 | Func::Abs => n == 1,
            Func::Substr => n == 2 || n == 3,
            Func::Concat | Func::Coalesce => n >= 1,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Lit(Scalar),
    Column(String),
    Neg(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
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

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(format!("expected {:?}, found {:?}", token, t)),
            None => Err(format!("expected {:?}, found end of input", token)),
        }
    }

    fn expr(&mut self) -> Result<Node, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> Result<Node, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Node, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Node::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, String> {
        match self.next() {
            Some(Token::Int(i)) => Ok(Node::Lit(Scalar::Int(i))),
            Some(Token::Str(s)) => Ok(Node::Lit(Scalar::Str(s))),
            Some(Token::Placeholder(name)) => Ok(Node::Column(name)),
            Some(Token::LParen) => {
                let node = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(node)
            }
            Some(Token::Ident(name)) => {
                let func = Func::lookup(&name).ok_or_else(|| format!("unknown function {}", name))?;
                self.expect(Token::LParen)?;
                let mut args = vec![];
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen)?;
                if !func.check_arity(args.len()) {
                    return Err(format!("wrong number of arguments for {}", name));
                }
                Ok(Node::Call(func, args))
            }
            Some(t) => Err(format!("unexpected token {:?}", t)),
            None => Err("unexpected end of input".to_string()),
        }
    }
}

/// Parsed rule expression. Parsing happens once, evaluation per row.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Expression, String> {
        let tokens = Lexer::new(source).tokenize()?;
        if tokens.is_empty() {
            return Err("empty expression".to_string());
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr()?;
        if let Some(t) = parser.peek() {
            return Err(format!("unexpected trailing token {:?}", t));
        }
        Ok(Expression { source: source.to_string(), root })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, values: &HashMap<String, Value>) -> Result<Scalar, String> {
        eval_node(&self.root, values)
    }
}

fn eval_node(node: &Node, values: &HashMap<String, Value>) -> Result<Scalar, String> {
    match node {
        Node::Lit(s) => Ok(s.clone()),
        Node::Column(name) => Ok(values.get(name).map(Scalar::from_value).unwrap_or(Scalar::Null)),
        Node::Neg(inner) => match eval_node(inner, values)? {
            Scalar::Null => Ok(Scalar::Null),
            s => s
                .as_int()?
                .checked_neg()
                .map(Scalar::Int)
                .ok_or_else(|| "integer overflow".to_string()),
        },
        Node::Binary(op, lhs, rhs) => {
            let (lhs, rhs) = (eval_node(lhs, values)?, eval_node(rhs, values)?);
            if lhs == Scalar::Null || rhs == Scalar::Null {
                return Ok(Scalar::Null);
            }
            let (a, b) = (lhs.as_int()?, rhs.as_int()?);
            let res = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err("division by zero".to_string()),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
            };
            res.map(Scalar::Int).ok_or_else(|| "integer overflow".to_string())
        }
        Node::Call(Func::Coalesce, args) => {
            for arg in args {
                let v = eval_node(arg, values)?;
                if v != Scalar::Null {
                    return Ok(v);
                }
            }
            Ok(Scalar::Null)
        }
        Node::Call(func, args) => {
            let args = args.iter().map(|a| eval_node(a, values)).collect::<Result<Vec<_>, _>>()?;
            if args.iter().any(|a| *a == Scalar::Null) {
                return Ok(Scalar::Null);
            }
            call(*func, &args)
        }
    }
}

fn call(func: Func, args: &[Scalar]) -> Result<Scalar, String> {
    match func {
        Func::Hash => Ok(Scalar::Int(string_hash(&args[0].to_string()))),
        Func::Crc32 => {
            let mut hasher = Hasher::new();
            hasher.update(&args[0].bytes());
            Ok(Scalar::Int(hasher.finalize() as i64))
        }
        Func::Abs => args[0]
            .as_int()?
            .checked_abs()
            .map(Scalar::Int)
            .ok_or_else(|| "integer overflow".to_string()),
        Func::Substr => {
            // 1-based like SQL SUBSTR
            let s = args[0].to_string();
            let start = args[1].as_int()?.max(1) as usize - 1;
            let chars = s.chars().skip(start);
            let out: String = match args.get(2) {
                Some(len) => chars.take(len.as_int()?.max(0) as usize).collect(),
                None => chars.collect(),
            };
            Ok(Scalar::Str(out))
        }
        Func::Concat => Ok(Scalar::Str(args.iter().map(|a| a.to_string()).collect())),
        Func::Coalesce => Ok(args[0].clone()),
    }
}

/// Non negative 31 based polynomial string hash, stable across processes.
pub fn string_hash(s: &str) -> i64 {
    let h = s.chars().fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32));
    (h as i64).abs()
}

#[cfg(test)]
mod test {
    use super::*;

    fn values(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_arithmetic_precedence() {
        let expr = Expression::parse("${user_id} % 2 + 10 * (3 - 1)").unwrap();
        let res = expr.eval(&values(&[("user_id", Value::from(5))])).unwrap();
        assert_eq!(res, Scalar::Int(21));

        let expr = Expression::parse("-${a} / 2").unwrap();
        assert_eq!(expr.eval(&values(&[("a", Value::from(7))])).unwrap(), Scalar::Int(-3));
    }

    #[test]
    fn test_text_operand_coerced() {
        let expr = Expression::parse("${user_id} % 2").unwrap();
        let res = expr.eval(&values(&[("user_id", Value::from(" 7 "))])).unwrap();
        assert_eq!(res, Scalar::Int(1));

        let err = expr.eval(&values(&[("user_id", Value::from("abc"))])).unwrap_err();
        assert!(err.contains("not an integer"));
    }

    #[test]
    fn test_functions() {
        let v = values(&[("name", Value::from("shard_03")), ("id", Value::from(-9))]);

        let expr = Expression::parse("substr(${name}, 7)").unwrap();
        assert_eq!(expr.eval(&v).unwrap(), Scalar::Str("03".into()));

        let expr = Expression::parse("substr(${name}, 1, 5)").unwrap();
        assert_eq!(expr.eval(&v).unwrap(), Scalar::Str("shard".into()));

        let expr = Expression::parse("concat('t_', abs(${id}))").unwrap();
        assert_eq!(expr.eval(&v).unwrap(), Scalar::Str("t_9".into()));

        let expr = Expression::parse("crc32(${name}) % 4").unwrap();
        let expect = crc32fast::hash(b"shard_03") as i64 % 4;
        assert_eq!(expr.eval(&v).unwrap(), Scalar::Int(expect));

        let expr = Expression::parse("hash('abc')").unwrap();
        assert_eq!(expr.eval(&v).unwrap(), Scalar::Int(96354));
    }

    #[test]
    fn test_null_propagation() {
        let expr = Expression::parse("${a} + 1").unwrap();
        assert_eq!(expr.eval(&HashMap::new()).unwrap(), Scalar::Null);

        let expr = Expression::parse("coalesce(${a}, ${b}, 0) % 3").unwrap();
        assert_eq!(expr.eval(&values(&[("b", Value::from(4))])).unwrap(), Scalar::Int(1));
        assert_eq!(expr.eval(&HashMap::new()).unwrap(), Scalar::Int(0));
    }

    #[test]
    fn test_eval_errors() {
        let expr = Expression::parse("${a} % 0").unwrap();
        assert!(expr.eval(&values(&[("a", Value::from(1))])).is_err());

        let expr = Expression::parse("${a} * 2").unwrap();
        assert!(expr.eval(&values(&[("a", Value::from(i64::MAX))])).is_err());
    }

    #[test]
    fn test_parse_errors() {
        for src in ["", "1 +", "(1", "foo(1)", "abs(1, 2)", "${a", "${}", "1 ? 2", "'abc", "1 2"] {
            assert!(Expression::parse(src).is_err(), "{:?} should not parse", src);
        }
        assert_eq!(Expression::parse("${ User_Id } % 2").unwrap().source(), "${ User_Id } % 2");
    }
}
