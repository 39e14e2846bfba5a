//! Lexer — tokenizes Anzu source code.
//!
//! The scanner walks the source byte by byte, producing one token per
//! call. Key behavior:
//!
//! - **Borrowed text**: tokens slice the source buffer rather than
//!   copying, so the buffer must outlive the token stream.
//!
//! - **Greedy punctuation**: two-character combinations (`!=`, `==`,
//!   `<=`, `>=`, `:=`, `->`, `&&`, `||`) win over their one-character
//!   prefixes.
//!
//! - **Keyword recognition**: identifiers are scanned first and then
//!   reclassified against the keyword table.
//!
//! - **Numeric suffixes**: `u64`/`u` produce `uint64`, `i32`/`i64`
//!   their typed variants, `f64` a float; a `.` followed by a digit
//!   also makes a float. The suffix stays in the token text.
//!
//! [`TokenStream`] wraps the scanner with the two-token lookahead the
//! parser works against.

use crate::errors::CompileError;
use crate::token::{Span, Token, TokenKind};

pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    curr: usize,
    line: u32,
    col: u32,
    // Position of the first character of the token being scanned.
    token_line: u32,
    token_col: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            start: 0,
            curr: 0,
            line: 1,
            col: 1,
            token_line: 1,
            token_col: 1,
        }
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Scan and return the next token. At end of input this returns an
    /// `eof` token (repeatedly, if called again).
    pub fn next_token(&mut self) -> Result<Token<'src>, CompileError> {
        self.skip_whitespace();

        self.start = self.curr;
        self.token_line = self.line;
        self.token_col = self.col;

        if !self.valid() {
            return Ok(self.make_token(TokenKind::Eof));
        }

        let c = self.advance();
        if c.is_ascii_alphabetic() || c == b'_' {
            return Ok(self.identifier());
        }
        if c.is_ascii_digit() {
            return Ok(self.number());
        }

        let kind = match c {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b';' => TokenKind::Semicolon,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b'+' => TokenKind::Plus,
            b'/' => TokenKind::Slash,
            b'*' => TokenKind::Star,
            b'%' => TokenKind::Percent,
            b'@' => TokenKind::At,
            b'-' => {
                if self.match_str(">") {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            b'!' => {
                if self.match_str("=") {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                }
            }
            b'=' => {
                if self.match_str("=") {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                }
            }
            b'<' => {
                if self.match_str("=") {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            b'>' => {
                if self.match_str("=") {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            b':' => {
                if self.match_str("=") {
                    TokenKind::ColonEqual
                } else {
                    TokenKind::Colon
                }
            }
            b'&' => {
                if self.match_str("&") {
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Ampersand
                }
            }
            b'|' => {
                if self.match_str("|") {
                    TokenKind::BarBar
                } else {
                    TokenKind::Bar
                }
            }
            b'\'' => return self.char_literal(),
            b'"' => return self.string_literal(),
            _ => return Err(self.error(format!("unknown token '{}'", c as char))),
        };
        Ok(self.make_token(kind))
    }

    // ── Token scanners ───────────────────────────────────────────────

    fn identifier(&mut self) -> Token<'src> {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
        let kind = match &self.source[self.start..self.curr] {
            "assert" => TokenKind::KwAssert,
            "bool" => TokenKind::KwBool,
            "break" => TokenKind::KwBreak,
            "char" => TokenKind::KwChar,
            "const" => TokenKind::KwConst,
            "continue" => TokenKind::KwContinue,
            "default" => TokenKind::KwDefault,
            "delete" => TokenKind::KwDelete,
            "else" => TokenKind::KwElse,
            "f64" => TokenKind::KwF64,
            "false" => TokenKind::KwFalse,
            "fn" => TokenKind::KwFn,
            "for" => TokenKind::KwFor,
            "i32" => TokenKind::KwI32,
            "i64" => TokenKind::KwI64,
            "if" => TokenKind::KwIf,
            "import" => TokenKind::KwImport,
            "in" => TokenKind::KwIn,
            "loop" => TokenKind::KwLoop,
            "new" => TokenKind::KwNew,
            "null" => TokenKind::KwNull,
            "nullptr" => TokenKind::KwNullptr,
            "return" => TokenKind::KwReturn,
            "sizeof" => TokenKind::KwSizeof,
            "struct" => TokenKind::KwStruct,
            "true" => TokenKind::KwTrue,
            "typeof" => TokenKind::KwTypeof,
            "u64" => TokenKind::KwU64,
            "while" => TokenKind::KwWhile,
            _ => TokenKind::Identifier,
        };
        self.make_token(kind)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // A fractional part makes it a float; an f64 suffix is allowed
        // on top of it.
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            self.match_str("f64");
            return self.make_token(TokenKind::Float64);
        }

        if self.match_str("u64") || self.match_str("u") {
            return self.make_token(TokenKind::Uint64);
        }
        if self.match_str("i32") {
            return self.make_token(TokenKind::Int32);
        }
        if self.match_str("f64") {
            return self.make_token(TokenKind::Float64);
        }
        self.match_str("i64");
        self.make_token(TokenKind::Int64)
    }

    fn string_literal(&mut self) -> Result<Token<'src>, CompileError> {
        self.delimited_literal(b'"', TokenKind::Str)
    }

    fn char_literal(&mut self) -> Result<Token<'src>, CompileError> {
        let tok = self.delimited_literal(b'\'', TokenKind::Character)?;
        if tok.text.len() != 1 {
            return Err(self.error(format!(
                "char literal is not one character, got '{}' ({})",
                tok.text,
                tok.text.len()
            )));
        }
        Ok(tok)
    }

    fn delimited_literal(
        &mut self,
        delimiter: u8,
        kind: TokenKind,
    ) -> Result<Token<'src>, CompileError> {
        while self.valid() && self.peek() != delimiter {
            if self.peek() == b'\n' {
                self.line += 1;
                self.col = 0;
            }
            self.advance();
        }
        if !self.valid() {
            return Err(self.error("unterminated string"));
        }
        self.advance(); // closing delimiter

        // Strip the quotes from the token text.
        let text = &self.source[self.start + 1..self.curr - 1];
        Ok(Token::new(
            kind,
            text,
            Span::new(self.start, self.curr),
            self.token_line,
            self.token_col,
        ))
    }

    // ── Character-level helpers ──────────────────────────────────────

    fn skip_whitespace(&mut self) {
        while self.valid() {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'\n' => {
                    self.advance();
                    self.line += 1;
                    self.col = 1;
                }
                b'#' => {
                    while self.valid() && self.peek() != b'\n' {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn valid(&self) -> bool {
        self.curr < self.source.len()
    }

    fn peek(&self) -> u8 {
        if self.valid() {
            self.source.as_bytes()[self.curr]
        } else {
            0
        }
    }

    fn peek_next(&self) -> u8 {
        if self.curr + 1 < self.source.len() {
            self.source.as_bytes()[self.curr + 1]
        } else {
            0
        }
    }

    fn advance(&mut self) -> u8 {
        let c = self.source.as_bytes()[self.curr];
        self.curr += 1;
        self.col += 1;
        c
    }

    /// Consume `expected` if the upcoming bytes match it exactly,
    /// rolling back on a partial match.
    fn match_str(&mut self, expected: &str) -> bool {
        let (curr, col) = (self.curr, self.col);
        for &c in expected.as_bytes() {
            if !self.valid() || self.peek() != c {
                self.curr = curr;
                self.col = col;
                return false;
            }
            self.advance();
        }
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token::new(
            kind,
            &self.source[self.start..self.curr],
            Span::new(self.start, self.curr),
            self.token_line,
            self.token_col,
        )
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(
            message,
            self.source,
            Span::new(self.start, self.curr),
            self.token_line,
            self.token_col,
        )
    }
}

/// Strip a type suffix (`u64`, `i32`, `f64`, ...) from a numeric
/// token's text, leaving the digits (and decimal point) to parse.
pub fn numeric_prefix(text: &str) -> &str {
    match text.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => &text[..idx],
        None => text,
    }
}

// ── Token stream ─────────────────────────────────────────────────────

/// The scanner plus a two-token lookahead, which is all the parser
/// ever needs.
pub struct TokenStream<'src> {
    scanner: Scanner<'src>,
    curr: Token<'src>,
    next: Token<'src>,
}

impl<'src> TokenStream<'src> {
    pub fn new(source: &'src str) -> Result<Self, CompileError> {
        let mut scanner = Scanner::new(source);
        let curr = scanner.next_token()?;
        let next = scanner.next_token()?;
        Ok(Self {
            scanner,
            curr,
            next,
        })
    }

    pub fn source(&self) -> &'src str {
        self.scanner.source()
    }

    pub fn curr(&self) -> Token<'src> {
        self.curr
    }

    pub fn next(&self) -> Token<'src> {
        self.next
    }

    pub fn valid(&self) -> bool {
        self.curr.kind != TokenKind::Eof
    }

    pub fn peek(&self, kind: TokenKind) -> bool {
        self.curr.kind == kind
    }

    pub fn peek_next(&self, kind: TokenKind) -> bool {
        self.next.kind == kind
    }

    /// Advance, returning the token that was current.
    pub fn consume(&mut self) -> Result<Token<'src>, CompileError> {
        let token = self.curr;
        self.curr = self.next;
        self.next = self.scanner.next_token()?;
        Ok(token)
    }

    /// Advance only if the current token matches `kind`.
    pub fn consume_maybe(&mut self, kind: TokenKind) -> Result<bool, CompileError> {
        if self.curr.kind == kind {
            self.consume()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Advance past a token of the given kind, or fail.
    pub fn consume_only(&mut self, kind: TokenKind) -> Result<Token<'src>, CompileError> {
        if self.curr.kind != kind {
            return Err(self.error_at(
                self.curr,
                format!("expected '{}', got '{}'", kind, self.curr.kind),
            ));
        }
        self.consume()
    }

    pub fn consume_i64(&mut self) -> Result<i64, CompileError> {
        let token = self.consume_only(TokenKind::Int64)?;
        numeric_prefix(token.text)
            .parse::<i64>()
            .map_err(|_| self.error_at(token, format!("cannot convert '{}' to i64", token.text)))
    }

    pub fn consume_u64(&mut self) -> Result<u64, CompileError> {
        if self.curr.kind != TokenKind::Uint64 {
            return Err(self.error_at(
                self.curr,
                format!("expected u64, got '{}'", self.curr.kind),
            ));
        }
        let token = self.consume()?;
        numeric_prefix(token.text)
            .parse::<u64>()
            .map_err(|_| self.error_at(token, format!("cannot convert '{}' to u64", token.text)))
    }

    pub fn error_at(&self, token: Token<'src>, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.source(), token.span, token.line, token.col)
    }
}
