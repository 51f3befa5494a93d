//! Tokenizer for C declarations

use crate::error::{FfiError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    /// Integer or character constant; unsigned values above `i64::MAX` wrap
    Int(i64),
    Punct(&'static str),
    /// A `#` line, without the `#`, continuation lines joined
    Directive(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    /// Source-ish rendering for error messages.
    pub fn fragment(&self) -> String {
        match &self.kind {
            TokenKind::Ident(s) => s.clone(),
            TokenKind::Int(v) => v.to_string(),
            TokenKind::Punct(p) => (*p).to_string(),
            TokenKind::Directive(d) => format!("#{}", d),
            TokenKind::Eof => "<end of input>".to_string(),
        }
    }
}

const PUNCTS: &[&str] = &[
    "...", "<<", ">>", "(", ")", "[", "]", "{", "}", ";", ",", "*", ":", "=", "+", "-", "~", "!",
    "/", "%", "&", "^", "|", "<", ">", "?", ".",
];

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// Only whitespace seen so far on this line
    line_start: bool,
    source: &'a str,
}

/// Split `text` into tokens. `first_line` is the line number of the first line.
pub fn tokenize(text: &str, first_line: usize) -> Result<Vec<Token>> {
    let mut lexer = Lexer {
        chars: text.chars().collect(),
        pos: 0,
        line: first_line,
        column: 1,
        line_start: true,
        source: text,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.line_start = true;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: &str, line: usize, column: usize, start: usize) -> FfiError {
        let fragment: String = self.chars[start..self.pos.min(self.chars.len())]
            .iter()
            .take(24)
            .collect();
        FfiError::Syntax {
            message: message.to_string(),
            fragment: if fragment.is_empty() {
                self.source.chars().skip(start).take(12).collect()
            } else {
                fragment
            },
            line,
            column,
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let (line, column, start) = (self.line, self.column, self.pos);
                    let was_line_start = self.line_start;
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                return Err(self.error("unterminated comment", line, column, start))
                            }
                        }
                    }
                    // a comment does not end the leading whitespace of a line
                    if self.line == line {
                        self.line_start = was_line_start;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;
        let (line, column, start) = (self.line, self.column, self.pos);
        let at_line_start = self.line_start;
        self.line_start = false;

        let c = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                })
            }
        };

        let kind = if c == '#' {
            if !at_line_start {
                return Err(self.error("'#' must start a line", line, column, start));
            }
            self.bump();
            TokenKind::Directive(self.directive_body())
        } else if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let mut ident = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                    ident.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            TokenKind::Ident(ident)
        } else if c.is_ascii_digit() {
            TokenKind::Int(self.number(line, column, start)?)
        } else if c == '\'' {
            TokenKind::Int(self.char_literal(line, column, start)?)
        } else if c == '"' {
            self.bump();
            return Err(self.error("string literals are not supported", line, column, start));
        } else {
            let rest: String = self.chars[self.pos..].iter().take(3).collect();
            match PUNCTS.iter().find(|p| rest.starts_with(**p)) {
                Some(p) => {
                    for _ in 0..p.len() {
                        self.bump();
                    }
                    TokenKind::Punct(p)
                }
                None => {
                    self.bump();
                    return Err(self.error("unexpected character", line, column, start));
                }
            }
        };
        Ok(Token { kind, line, column })
    }

    fn directive_body(&mut self) -> String {
        let mut body = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' && self.peek_at(1) == Some('\n') {
                self.bump();
                self.bump();
                body.push(' ');
                continue;
            }
            if c == '\n' {
                break;
            }
            body.push(c);
            self.bump();
        }
        body.trim().to_string()
    }

    fn number(&mut self, line: usize, column: usize, start: usize) -> Result<i64> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '.' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let lower = text.to_ascii_lowercase();
        let digits = lower.trim_end_matches(['u', 'l']);
        if lower.len() - digits.len() > 3 {
            return Err(self.error("invalid integer suffix", line, column, start));
        }
        let parsed = if let Some(hex) = digits.strip_prefix("0x") {
            u64::from_str_radix(hex, 16)
        } else if digits.len() > 1 && digits.starts_with('0') {
            u64::from_str_radix(&digits[1..], 8)
        } else {
            digits.parse::<u64>()
        };
        match parsed {
            Ok(v) => Ok(v as i64),
            Err(_) if digits.contains('.') || (!digits.starts_with("0x") && digits.contains('e')) => {
                Err(self.error("floating constants are not supported", line, column, start))
            }
            Err(_) => Err(self.error("invalid integer constant", line, column, start)),
        }
    }

    fn char_literal(&mut self, line: usize, column: usize, start: usize) -> Result<i64> {
        self.bump();
        let value = match self.bump() {
            Some('\\') => match self.bump() {
                Some('n') => 10,
                Some('t') => 9,
                Some('r') => 13,
                Some('a') => 7,
                Some('b') => 8,
                Some('f') => 12,
                Some('v') => 11,
                Some('\\') => 92,
                Some('\'') => 39,
                Some('"') => 34,
                Some('?') => 63,
                Some('x') => {
                    let mut v: i64 = 0;
                    let mut any = false;
                    while let Some(d) = self.peek().and_then(|c| c.to_digit(16)) {
                        v = v.wrapping_mul(16) + d as i64;
                        any = true;
                        self.bump();
                    }
                    if !any {
                        return Err(self.error("invalid hex escape", line, column, start));
                    }
                    v
                }
                Some(c) if c.is_digit(8) => {
                    let mut v = c.to_digit(8).unwrap_or(0) as i64;
                    for _ in 0..2 {
                        match self.peek().and_then(|c| c.to_digit(8)) {
                            Some(d) => {
                                v = v * 8 + d as i64;
                                self.bump();
                            }
                            None => break,
                        }
                    }
                    v
                }
                _ => return Err(self.error("invalid escape sequence", line, column, start)),
            },
            Some('\'') | Some('\n') | None => {
                return Err(self.error("empty character constant", line, column, start))
            }
            Some(c) => c as i64,
        };
        if self.bump() != Some('\'') {
            return Err(self.error("unterminated character constant", line, column, start));
        }
        Ok(value)
    }
}
