// ABOUTME: Lexer for the template script language used by generated programs
// ABOUTME: Produces line-tagged tokens and tracks line breaks for automatic semicolon insertion

use super::error::{Result, ScriptError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    /// Identifiers and keywords; the parser tells them apart.
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    /// A line terminator separates this token from the previous one.
    pub newline_before: bool,
}

impl Token {
    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(p) if *p == punct)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(i) if i == name)
    }

    /// Token text as V8 would quote it in an "Unexpected token" message.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Number(_) => "Unexpected number".to_string(),
            TokenKind::Str(_) => "Unexpected string".to_string(),
            TokenKind::Ident(name) if super::parser::is_reserved(name) => {
                format!("Unexpected token '{}'", name)
            }
            TokenKind::Ident(_) => "Unexpected identifier".to_string(),
            TokenKind::Punct(p) => format!("Unexpected token '{}'", p),
            TokenKind::Eof => "Unexpected end of input".to_string(),
        }
    }
}

// Longest first so that greedy matching picks `===` over `==`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "??=", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "{", "}", "(", ")", "[", "]", ";", ",", ".", "?", ":", "+", "-",
    "*", "/", "%", "<", ">", "=", "!",
];

pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    newline_before: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            newline_before: false,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.remaining().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let newline_before = std::mem::take(&mut self.newline_before);
            let kind = match self.peek() {
                None => TokenKind::Eof,
                Some(c) => self.lex_token(c)?,
            };
            let done = kind == TokenKind::Eof;
            tokens.push(Token {
                kind,
                line,
                newline_before,
            });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        while let Some(c) = self.peek() {
            if is_line_terminator(c) {
                self.newline_before = true;
                self.bump();
            } else if c.is_whitespace() {
                self.bump();
            } else if self.remaining().starts_with("//") {
                while let Some(c) = self.peek() {
                    if is_line_terminator(c) {
                        break;
                    }
                    self.bump();
                }
            } else if self.remaining().starts_with("/*") {
                let start_line = self.line;
                self.pos += 2;
                loop {
                    if self.remaining().starts_with("*/") {
                        self.pos += 2;
                        break;
                    }
                    match self.bump() {
                        Some(c) if is_line_terminator(c) => self.newline_before = true,
                        Some(_) => {}
                        None => {
                            return Err(ScriptError::syntax("Invalid or unexpected token", start_line))
                        }
                    }
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn lex_token(&mut self, c: char) -> Result<TokenKind> {
        if c.is_ascii_digit() || (c == '.' && self.peek_second().is_some_and(|n| n.is_ascii_digit())) {
            return self.lex_number();
        }
        if c == '"' || c == '\'' {
            return self.lex_string(c);
        }
        if is_ident_start(c) {
            let start = self.pos;
            while self.peek().is_some_and(is_ident_part) {
                self.bump();
            }
            return Ok(TokenKind::Ident(self.source[start..self.pos].to_string()));
        }

        let rest = self.remaining();
        for punct in PUNCTUATORS {
            if rest.starts_with(punct) {
                // `a?.5:1` is a conditional, not optional chaining.
                if *punct == "?." && rest[2..].starts_with(|n: char| n.is_ascii_digit()) {
                    continue;
                }
                self.pos += punct.len();
                return Ok(TokenKind::Punct(punct));
            }
        }

        Err(ScriptError::syntax(
            format!("Invalid or unexpected token '{}'", c),
            self.line,
        ))
    }

    fn lex_number(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        let rest = self.remaining();
        if rest.starts_with("0x") || rest.starts_with("0X") {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let value = i64::from_str_radix(&self.source[digits_start..self.pos], 16)
                .map_err(|_| ScriptError::syntax("Invalid or unexpected token", self.line))?;
            return Ok(TokenKind::Number(value as f64));
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_second().map_or(true, |c| !is_ident_start(c)) {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let checkpoint = self.pos;
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                self.pos = checkpoint;
            }
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(ScriptError::syntax(
                "Invalid or unexpected token",
                self.line,
            ));
        }

        self.source[start..self.pos]
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ScriptError::syntax("Invalid or unexpected token", self.line))
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind> {
        let line = self.line;
        self.bump();
        let mut value = String::new();
        loop {
            let c = match self.bump() {
                Some(c) if c == quote => return Ok(TokenKind::Str(value)),
                // U+2028 and U+2029 are allowed inside string literals.
                Some('\n') | Some('\r') => {
                    return Err(ScriptError::syntax("Invalid or unexpected token", line))
                }
                Some(c) => c,
                None => return Err(ScriptError::syntax("Invalid or unexpected token", line)),
            };
            if c != '\\' {
                value.push(c);
                continue;
            }
            match self.bump() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some('0') => value.push('\0'),
                Some('b') => value.push('\u{8}'),
                Some('f') => value.push('\u{c}'),
                Some('v') => value.push('\u{b}'),
                Some('u') => value.push(self.lex_unicode_escape(line)?),
                // Line continuation.
                Some('\n') => {}
                Some(other) => value.push(other),
                None => return Err(ScriptError::syntax("Invalid or unexpected token", line)),
            }
        }
    }

    fn lex_unicode_escape(&mut self, line: usize) -> Result<char> {
        let invalid = || ScriptError::syntax("Invalid Unicode escape sequence", line);
        let rest = self.remaining();
        let (digits, consumed) = if let Some(braced) = rest.strip_prefix('{') {
            let end = braced.find('}').ok_or_else(invalid)?;
            (&braced[..end], end + 2)
        } else {
            (rest.get(..4).ok_or_else(invalid)?, 4)
        };
        let code = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
        self.pos += consumed;
        char::from_u32(code).ok_or_else(invalid)
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).tokenize()
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}
