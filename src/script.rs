//! Agent-script parser.
//!
//! Planner-generated scripts are a closed statement language over the
//! verified-action library rather than general-purpose code. Statements are
//! separated by newlines or semicolons:
//!
//! ```text
//! import time
//! click_and_verify(120, 340, "submit button")
//! click_candidates([(1877, 17), (960, 17)], label="close button")
//! hotkey_and_verify("ctrl", "w", label="close tab")
//! time.sleep(0.5)
//! ```
//!
//! Call arguments are numbers, strings, bare identifiers, `(x, y)` tuples or
//! `[...]` lists, positional or `key=value`. A bare statement form
//! (`import os`) accepts identifier/number/string arguments without parens.
//! Parsing never executes anything; validation and dispatch happen elsewhere.

use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    /// Bare (possibly dotted) identifier reference.
    Ident(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
}

impl Value {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `(x, y)` tuple or two-element list of numbers.
    pub fn as_point(&self) -> Option<(f64, f64)> {
        match self {
            Value::Tuple(items) | Value::List(items) if items.len() == 2 => {
                Some((items[0].as_num()?, items[1].as_num()?))
            }
            _ => None,
        }
    }

    /// List of `(x, y)` tuples.
    pub fn as_points(&self) -> Option<Vec<(f64, f64)>> {
        match self {
            Value::List(items) => items.iter().map(|v| v.as_point()).collect(),
            _ => None,
        }
    }

    /// List of strings.
    pub fn as_strings(&self) -> Option<Vec<String>> {
        match self {
            Value::List(items) => items
                .iter()
                .map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub key: Option<String>,
    pub value: Value,
}

/// One parsed statement: a dotted name plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: usize,
    pub name: Vec<String>,
    pub args: Vec<Arg>,
}

impl Stmt {
    /// First segment of the dotted name; the unit allow-listing operates on.
    pub fn root(&self) -> &str {
        &self.name[0]
    }

    pub fn full_name(&self) -> String {
        self.name.join(".")
    }

    pub fn positional(&self, idx: usize) -> Option<&Value> {
        self.args
            .iter()
            .filter(|a| a.key.is_none())
            .nth(idx)
            .map(|a| &a.value)
    }

    pub fn keyword(&self, key: &str) -> Option<&Value> {
        self.args
            .iter()
            .find(|a| a.key.as_deref() == Some(key))
            .map(|a| &a.value)
    }

    /// Keyword lookup falling back to a positional slot, the way the original
    /// action functions accepted either.
    pub fn arg(&self, key: &str, idx: usize) -> Option<&Value> {
        self.keyword(key).or_else(|| self.positional(idx))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub stmts: Vec<Stmt>,
}

impl Script {
    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Dot,
    /// Statement break: newline or semicolon.
    Break,
}

fn syntax_err(line: usize, msg: impl AsRef<str>) -> AgentError {
    AgentError::Validation(format!("Invalid script syntax at line {}: {}", line, msg.as_ref()))
}

fn tokenize(text: &str) -> Result<Vec<(Tok, usize)>, AgentError> {
    let mut toks = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1usize;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                chars.next();
                toks.push((Tok::Break, line));
                line += 1;
            }
            ';' => {
                chars.next();
                toks.push((Tok::Break, line));
            }
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '(' => {
                chars.next();
                toks.push((Tok::LParen, line));
            }
            ')' => {
                chars.next();
                toks.push((Tok::RParen, line));
            }
            '[' => {
                chars.next();
                toks.push((Tok::LBracket, line));
            }
            ']' => {
                chars.next();
                toks.push((Tok::RBracket, line));
            }
            ',' => {
                chars.next();
                toks.push((Tok::Comma, line));
            }
            '=' => {
                chars.next();
                toks.push((Tok::Eq, line));
            }
            '.' => {
                chars.next();
                toks.push((Tok::Dot, line));
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\n' {
                        return Err(syntax_err(line, "unterminated string literal"));
                    }
                    if c == '\\' {
                        match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err(syntax_err(line, "unterminated string literal")),
                        }
                    } else {
                        s.push(c);
                    }
                }
                if !closed {
                    return Err(syntax_err(line, "unterminated string literal"));
                }
                toks.push((Tok::Str(s), line));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let mut s = String::new();
                s.push(c);
                chars.next();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = s
                    .parse()
                    .map_err(|_| syntax_err(line, format!("bad number literal '{}'", s)))?;
                toks.push((Tok::Num(n), line));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push((Tok::Ident(s), line));
            }
            other => {
                return Err(syntax_err(line, format!("unexpected character '{}'", other)));
            }
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map(|(_, l)| *l)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), AgentError> {
        let line = self.line();
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(syntax_err(line, format!("expected {}", what)))
        }
    }

    fn dotted_name(&mut self) -> Result<Vec<String>, AgentError> {
        let line = self.line();
        let mut parts = Vec::new();
        match self.next() {
            Some(Tok::Ident(s)) => parts.push(s),
            _ => return Err(syntax_err(line, "expected a statement name")),
        }
        while self.eat(&Tok::Dot) {
            let line = self.line();
            match self.next() {
                Some(Tok::Ident(s)) => parts.push(s),
                _ => return Err(syntax_err(line, "expected an identifier after '.'")),
            }
        }
        Ok(parts)
    }

    fn value(&mut self) -> Result<Value, AgentError> {
        let line = self.line();
        match self.peek().cloned() {
            Some(Tok::Num(n)) => {
                self.next();
                Ok(Value::Num(n))
            }
            Some(Tok::Str(s)) => {
                self.next();
                Ok(Value::Str(s))
            }
            Some(Tok::Ident(_)) => {
                let parts = self.dotted_name()?;
                Ok(Value::Ident(parts.join(".")))
            }
            Some(Tok::LParen) => {
                self.next();
                let items = self.value_list(&Tok::RParen)?;
                self.expect(Tok::RParen, "')'")?;
                Ok(Value::Tuple(items))
            }
            Some(Tok::LBracket) => {
                self.next();
                let items = self.value_list(&Tok::RBracket)?;
                self.expect(Tok::RBracket, "']'")?;
                Ok(Value::List(items))
            }
            _ => Err(syntax_err(line, "expected a value")),
        }
    }

    fn value_list(&mut self, close: &Tok) -> Result<Vec<Value>, AgentError> {
        let mut items = Vec::new();
        loop {
            // Tolerate newlines inside brackets and a trailing comma.
            while self.eat(&Tok::Break) {}
            if self.peek() == Some(close) || self.peek().is_none() {
                break;
            }
            items.push(self.value()?);
            while self.eat(&Tok::Break) {}
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        while self.eat(&Tok::Break) {}
        Ok(items)
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, AgentError> {
        let mut args = Vec::new();
        loop {
            while self.eat(&Tok::Break) {}
            if self.peek() == Some(&Tok::RParen) || self.peek().is_none() {
                break;
            }
            // key=value needs two tokens of lookahead.
            let key = match (self.toks.get(self.pos), self.toks.get(self.pos + 1)) {
                (Some((Tok::Ident(k), _)), Some((Tok::Eq, _))) => {
                    let k = k.clone();
                    self.pos += 2;
                    Some(k)
                }
                _ => None,
            };
            let value = self.value()?;
            args.push(Arg { key, value });
            while self.eat(&Tok::Break) {}
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn bare_args(&mut self) -> Result<Vec<Arg>, AgentError> {
        let mut args = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::Ident(_)) | Some(Tok::Num(_)) | Some(Tok::Str(_)) => {
                    let value = self.value()?;
                    args.push(Arg { key: None, value });
                    self.eat(&Tok::Comma);
                }
                Some(Tok::Break) | None => break,
                _ => return Err(syntax_err(self.line(), "unexpected token in statement")),
            }
        }
        Ok(args)
    }

    fn stmt(&mut self) -> Result<Stmt, AgentError> {
        let line = self.line();
        let name = self.dotted_name()?;
        let args = if self.eat(&Tok::LParen) {
            let args = self.call_args()?;
            self.expect(Tok::RParen, "')' to close the argument list")?;
            args
        } else {
            self.bare_args()?
        };
        Ok(Stmt { line, name, args })
    }
}

/// Parse script text into statements. Syntax errors carry the line number;
/// nothing is executed or policy-checked here.
pub fn parse(text: &str) -> Result<Script, AgentError> {
    let toks = tokenize(text)?;
    let mut parser = Parser { toks, pos: 0 };
    let mut stmts = Vec::new();
    loop {
        while parser.eat(&Tok::Break) {}
        if parser.peek().is_none() {
            break;
        }
        stmts.push(parser.stmt()?);
        match parser.peek() {
            Some(Tok::Break) | None => {}
            _ => return Err(syntax_err(parser.line(), "expected end of statement")),
        }
    }
    Ok(Script { stmts })
}
