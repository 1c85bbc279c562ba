//! Reference frontend for a small line-oriented declaration language
//!
//! ```text
//! %include "lib" {new/old; -hidden; n = 3; T == [num]}
//! %insert "common.m"
//! %export + "lib" -helper
//! %free { n :: num; T * :: type }
//! type tree * = Leaf | Node (tree *) * (tree *)
//! abstype stack *
//! synonym forest * = [tree *]
//! size :: num
//! size = 42
//! ```
//!
//! A line continues onto the next while it has unclosed braces. `||` starts
//! a comment.

use crate::errors::SourceLocation;
use crate::frontend::syntax::{
    Binding, DefBody, Definition, ExportItem, ExportSpec, ExprSyntax, FreeKind, FreeParam,
    Frontend, IncludeDirective, ParsedScript, SyntaxError, TypeSyntax,
};
use num_traits::{CheckedAdd, CheckedMul, CheckedNeg};
use std::fs;
use std::path::{Path, PathBuf};

const MAX_INSERT_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(i64),
    Stars(u32),
    Directive(String),
    Sym(&'static str),
}

/// Append one decimal digit, failing on overflow
fn push_digit<T>(acc: T, digit: u8) -> Option<T>
where
    T: CheckedMul + CheckedAdd + From<u8>,
{
    acc.checked_mul(&T::from(10))?.checked_add(&T::from(digit))
}

fn lex(text: &str, line: usize) -> Result<Vec<Tok>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    break;
                }
                tokens.push(Tok::Sym("|"));
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None => return Err(SyntaxError::at(line, "unterminated string")),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err(SyntaxError::at(line, "unterminated string")),
                        },
                        Some(other) => s.push(other),
                    }
                }
                tokens.push(Tok::Str(s));
            }
            '0'..='9' => {
                let mut value: i64 = 0;
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                    chars.next();
                    value = push_digit(value, d as u8).ok_or(SyntaxError::NumberOutOfRange { line })?;
                }
                tokens.push(Tok::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '\'' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Tok::Ident(name));
            }
            '%' => {
                chars.next();
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphabetic() {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Tok::Directive(name));
            }
            '*' => {
                let mut n = 0;
                while chars.peek() == Some(&'*') {
                    chars.next();
                    n += 1;
                }
                tokens.push(Tok::Stars(n));
            }
            ':' => {
                chars.next();
                if chars.next() != Some(':') {
                    return Err(SyntaxError::at(line, "expected ::"));
                }
                tokens.push(Tok::Sym("::"));
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Tok::Sym("=="));
                } else {
                    tokens.push(Tok::Sym("="));
                }
            }
            '-' => {
                chars.next();
                if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Tok::Sym("->"));
                } else {
                    tokens.push(Tok::Sym("-"));
                }
            }
            _ => {
                chars.next();
                let sym = match c {
                    '[' => "[",
                    ']' => "]",
                    '(' => "(",
                    ')' => ")",
                    ',' => ",",
                    '{' => "{",
                    '}' => "}",
                    ';' => ";",
                    '/' => "/",
                    '+' => "+",
                    other => return Err(SyntaxError::at(line, format!("unexpected character '{}'", other))),
                };
                tokens.push(Tok::Sym(sym));
            }
        }
    }

    Ok(tokens)
}

/// Split source into logical lines: (first line number, text)
fn logical_lines(source: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    let mut depth: i64 = 0;

    for (i, raw) in source.lines().enumerate() {
        let text = strip_comment(raw);
        if pending.is_none() && text.trim().is_empty() {
            continue;
        }
        depth += brace_balance(text);
        let (start, mut acc) = pending.take().unwrap_or((i + 1, String::new()));
        acc.push(' ');
        acc.push_str(text);
        if depth > 0 {
            pending = Some((start, acc));
        } else {
            depth = 0;
            lines.push((start, acc));
        }
    }
    if let Some(rest) = pending {
        lines.push(rest);
    }
    lines
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut prev = '\0';
    for (i, c) in line.char_indices() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '|' if !in_string && prev == '|' => return &line[..i - 1],
            _ => {}
        }
        prev = c;
    }
    line
}

fn brace_balance(text: &str) -> i64 {
    let mut in_string = false;
    let mut prev = '\0';
    let mut balance = 0;
    for c in text.chars() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '{' if !in_string => balance += 1,
            '}' if !in_string => balance -= 1,
            _ => {}
        }
        prev = c;
    }
    balance
}

struct Cursor<'a> {
    tokens: &'a [Tok],
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Tok> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::at(self.line, message)
    }

    fn eat(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, sym: &str) -> Result<(), SyntaxError> {
        if self.eat(sym) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", sym)))
        }
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(name.clone()),
            _ => Err(self.error("expected a name")),
        }
    }

    fn end(&self) -> Result<(), SyntaxError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected text at end of line"))
        }
    }

    /// Count `*`, `**`, ... parameters after a type name
    fn params(&mut self) -> usize {
        let mut arity = 0;
        while let Some(Tok::Stars(_)) = self.peek() {
            self.pos += 1;
            arity += 1;
        }
        arity
    }

    fn ty(&mut self) -> Result<TypeSyntax, SyntaxError> {
        let lhs = self.btype()?;
        if self.eat("->") {
            Ok(TypeSyntax::Arrow(Box::new(lhs), Box::new(self.ty()?)))
        } else {
            Ok(lhs)
        }
    }

    fn btype(&mut self) -> Result<TypeSyntax, SyntaxError> {
        if let Some(Tok::Ident(name)) = self.peek() {
            self.pos += 1;
            let mut args = Vec::new();
            while self.atype_start() {
                args.push(self.atype()?);
            }
            return Ok(TypeSyntax::Name(name.clone(), args));
        }
        self.atype()
    }

    fn atype_start(&self) -> bool {
        matches!(
            self.peek(),
            Some(Tok::Ident(_)) | Some(Tok::Stars(_)) | Some(Tok::Sym("[")) | Some(Tok::Sym("("))
        )
    }

    fn atype(&mut self) -> Result<TypeSyntax, SyntaxError> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(TypeSyntax::name(name)),
            Some(Tok::Stars(n)) => Ok(TypeSyntax::Var(*n)),
            Some(Tok::Sym("[")) => {
                let elem = self.ty()?;
                self.expect("]")?;
                Ok(TypeSyntax::List(Box::new(elem)))
            }
            Some(Tok::Sym("(")) => {
                let mut items = vec![self.ty()?];
                while self.eat(",") {
                    items.push(self.ty()?);
                }
                self.expect(")")?;
                if items.len() == 1 {
                    Ok(items.remove(0))
                } else {
                    Ok(TypeSyntax::Tuple(items))
                }
            }
            _ => Err(self.error("badly formed type")),
        }
    }

    fn expr(&mut self) -> Result<ExprSyntax, SyntaxError> {
        match self.next() {
            Some(Tok::Num(n)) => Ok(ExprSyntax::Num(*n)),
            Some(Tok::Str(s)) => Ok(ExprSyntax::Str(s.clone())),
            Some(Tok::Ident(name)) => Ok(ExprSyntax::Name(name.clone())),
            Some(Tok::Sym("-")) => match self.next() {
                Some(Tok::Num(n)) => CheckedNeg::checked_neg(n)
                    .map(ExprSyntax::Num)
                    .ok_or(SyntaxError::NumberOutOfRange { line: self.line }),
                _ => Err(self.error("expected a number after -")),
            },
            _ => Err(self.error("badly formed expression")),
        }
    }
}

/// Parser for the reference declaration language
#[derive(Debug, Clone)]
pub struct DeclParser {
    source_extension: String,
}

impl Default for DeclParser {
    fn default() -> Self {
        Self::new("m")
    }
}

impl DeclParser {
    pub fn new(source_extension: impl Into<String>) -> Self {
        Self { source_extension: source_extension.into() }
    }

    /// Resolve a quoted path relative to the including script, adding the
    /// source extension when it has none
    fn target_path(&self, including: &Path, target: &str) -> PathBuf {
        let mut path = PathBuf::from(target);
        if path.is_relative() {
            if let Some(dir) = including.parent() {
                path = dir.join(path);
            }
        }
        if path.extension().is_none() {
            path.set_extension(&self.source_extension);
        }
        path
    }

    fn parse_into(
        &self,
        path: &Path,
        source: &str,
        file: usize,
        script: &mut ParsedScript,
        depth: usize,
    ) -> Result<(), SyntaxError> {
        for (line, text) in logical_lines(source) {
            let tokens = lex(&text, line)?;
            if tokens.is_empty() {
                continue;
            }
            let mut cur = Cursor { tokens: &tokens, pos: 0, line };

            match cur.next() {
                Some(Tok::Directive(directive)) => match directive.as_str() {
                    "include" => {
                        let include = self.include(&mut cur, path)?;
                        script.includes.push(include);
                    }
                    "insert" => {
                        let target = match cur.next() {
                            Some(Tok::Str(target)) => self.target_path(path, target),
                            _ => return Err(cur.error("expected a file name after %insert")),
                        };
                        cur.end()?;
                        if depth >= MAX_INSERT_DEPTH {
                            return Err(cur.error("%insert nested too deeply"));
                        }
                        let text = fs::read_to_string(&target)
                            .map_err(|_| SyntaxError::CannotInsert { line, path: target.clone() })?;
                        script.inserted.push(target.clone());
                        let index = script.inserted.len();
                        self.parse_into(&target, &text, index, script, depth + 1)?;
                    }
                    "export" => {
                        if script.exports.is_some() {
                            return Err(cur.error("multiple %export directives"));
                        }
                        script.exports = Some(self.export(&mut cur, path)?);
                    }
                    "free" => {
                        if !script.free.is_empty() {
                            return Err(cur.error("multiple %free directives"));
                        }
                        script.free = Self::free(&mut cur)?;
                    }
                    other => return Err(cur.error(format!("unknown directive %{}", other))),
                },
                Some(Tok::Ident(keyword)) if keyword == "type" => {
                    let name = cur.ident()?;
                    let arity = cur.params();
                    cur.expect("=")?;
                    let mut constructors = Vec::new();
                    loop {
                        let con = cur.ident()?;
                        let mut fields = Vec::new();
                        while cur.atype_start() {
                            fields.push(cur.atype()?);
                        }
                        constructors.push((con, fields));
                        if !cur.eat("|") {
                            break;
                        }
                    }
                    cur.end()?;
                    script.definitions.push(Definition {
                        name,
                        line,
                        file,
                        body: DefBody::Algebraic { arity, constructors },
                    });
                }
                Some(Tok::Ident(keyword)) if keyword == "abstype" => {
                    let name = cur.ident()?;
                    let arity = cur.params();
                    cur.end()?;
                    script.definitions.push(Definition { name, line, file, body: DefBody::Abstract { arity } });
                }
                Some(Tok::Ident(keyword)) if keyword == "synonym" => {
                    let name = cur.ident()?;
                    let arity = cur.params();
                    cur.expect("=")?;
                    let body = cur.ty()?;
                    cur.end()?;
                    script.definitions.push(Definition { name, line, file, body: DefBody::Synonym { arity, body } });
                }
                Some(Tok::Ident(name)) => {
                    let body = if cur.eat("::") {
                        DefBody::Spec(cur.ty()?)
                    } else if cur.eat("=") {
                        DefBody::Value(cur.expr()?)
                    } else {
                        return Err(cur.error(format!("expected :: or = after {}", name)));
                    };
                    cur.end()?;
                    script.definitions.push(Definition { name: name.clone(), line, file, body });
                }
                _ => return Err(cur.error("unexpected token at start of line")),
            }
        }
        Ok(())
    }

    fn include(&self, cur: &mut Cursor<'_>, path: &Path) -> Result<IncludeDirective, SyntaxError> {
        let target = match cur.next() {
            Some(Tok::Str(target)) => self.target_path(path, target),
            _ => return Err(cur.error("expected a file name after %include")),
        };
        let mut directive = IncludeDirective::new(target, SourceLocation::new(path, cur.line));

        if cur.eat("{") {
            while !cur.eat("}") {
                if cur.eat(";") {
                    continue;
                }
                let binding = if cur.eat("-") {
                    Binding::Suppress(cur.ident()?)
                } else {
                    let name = cur.ident()?;
                    if cur.eat("/") {
                        Binding::Alias { new: name, old: cur.ident()? }
                    } else {
                        let arity = cur.params();
                        if cur.eat("==") {
                            Binding::Type { name, arity, body: cur.ty()? }
                        } else if arity == 0 && cur.eat("=") {
                            Binding::Value { name, expr: cur.expr()? }
                        } else {
                            return Err(cur.error("badly formed %include binding"));
                        }
                    }
                };
                directive.bindings.push(binding);
                if cur.at_end() {
                    return Err(cur.error("missing } in %include"));
                }
            }
        }
        cur.end()?;
        Ok(directive)
    }

    fn export(&self, cur: &mut Cursor<'_>, path: &Path) -> Result<ExportSpec, SyntaxError> {
        let mut spec = ExportSpec {
            items: Vec::new(),
            embargoes: Vec::new(),
            location: SourceLocation::new(path, cur.line),
        };
        while let Some(tok) = cur.next() {
            match tok {
                Tok::Sym("+") => spec.items.push(ExportItem::Own),
                Tok::Str(file) => spec.items.push(ExportItem::File(self.target_path(path, file))),
                Tok::Ident(name) => spec.items.push(ExportItem::Name(name.clone())),
                Tok::Sym("-") => spec.embargoes.push(cur.ident()?),
                _ => return Err(cur.error("badly formed %export list")),
            }
        }
        Ok(spec)
    }

    fn free(cur: &mut Cursor<'_>) -> Result<Vec<FreeParam>, SyntaxError> {
        cur.expect("{")?;
        let mut params = Vec::new();
        while !cur.eat("}") {
            if cur.at_end() {
                return Err(cur.error("missing } in %free"));
            }
            if cur.eat(";") {
                continue;
            }
            let name = cur.ident()?;
            let arity = cur.params();
            cur.expect("::")?;
            let kind = match cur.peek() {
                Some(Tok::Ident(word)) if word == "type" => {
                    cur.next();
                    FreeKind::Type { arity }
                }
                _ if arity == 0 => FreeKind::Value(cur.ty()?),
                _ => return Err(cur.error("type parameter must be declared :: type")),
            };
            params.push(FreeParam { name, line: cur.line, kind });
        }
        cur.end()?;
        Ok(params)
    }
}

impl Frontend for DeclParser {
    fn parse(&self, path: &Path, source: &str) -> Result<ParsedScript, SyntaxError> {
        let mut script = ParsedScript::default();
        self.parse_into(path, source, 0, &mut script, 0)?;
        Ok(script)
    }
}
