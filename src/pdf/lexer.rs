//! Byte-level tokenizer for PDF object syntax

use log::trace;
use crate::error::{PDFError, PDFResult};

/// Kinds of lexical tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    StartDictionary,
    EndDictionary,
    StartArray,
    EndArray,
    Name,
    String { hex: bool },
    Number,
    /// Keywords and anything else that is not a delimiter-bound token
    Other,
    Comment,
    Eof,
}

/// A token with its decoded value.
///
/// Names carry their bytes with `#xx` escapes resolved and without the slash; strings carry
/// their unescaped bytes; numbers and keywords carry their source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: Vec<u8>,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    fn bare(kind: TokenKind) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Check for a keyword token
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Other && self.value == keyword.as_bytes()
    }
}

/// Source of PDF tokens
pub trait TokenSource {
    /// Produce the next token, `TokenKind::Eof` once input is exhausted
    fn next_token(&mut self) -> PDFResult<Token>;
}

pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Tokenizer over an in-memory byte slice
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Lexer positioned at `pos`
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos: pos.min(data.len()),
        }
    }

    /// Current byte offset
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub(crate) fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if !is_whitespace(b) {
                break;
            }
            self.pos += 1;
        }
    }

    /// Skip the end-of-line marker following the `stream` keyword
    pub fn skip_stream_eol(&mut self) {
        match self.peek_byte() {
            Some(b'\r') => {
                self.pos += 1;
                if self.peek_byte() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            Some(b'\n') => self.pos += 1,
            _ => {}
        }
    }

    fn read_comment(&mut self) -> Token {
        let start = self.pos + 1;
        while let Some(b) = self.peek_byte() {
            if b == b'\r' || b == b'\n' {
                break;
            }
            self.pos += 1;
        }
        Token::new(TokenKind::Comment, &self.data[start.min(self.pos)..self.pos])
    }

    fn read_name(&mut self) -> PDFResult<Token> {
        // Skip the slash
        self.pos += 1;
        let mut name = Vec::new();
        while let Some(b) = self.peek_byte() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            self.pos += 1;
            if b == b'#' {
                let hi = self.data.get(self.pos).copied().and_then(hex_value);
                let lo = self.data.get(self.pos + 1).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        name.push(hi << 4 | lo);
                        self.pos += 2;
                    }
                    // A lone '#' is kept as is, matching lenient readers
                    _ => name.push(b'#'),
                }
            } else {
                name.push(b);
            }
        }
        Ok(Token::new(TokenKind::Name, name))
    }

    fn read_literal_string(&mut self) -> PDFResult<Token> {
        // Skip the opening parenthesis
        self.pos += 1;
        let mut out = Vec::new();
        let mut depth = 1usize;

        loop {
            let b = self.peek_byte().ok_or_else(|| PDFError::eof("literal string"))?;
            self.pos += 1;
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(b);
                }
                b'\\' => {
                    let esc = self.peek_byte().ok_or_else(|| PDFError::eof("string escape"))?;
                    self.pos += 1;
                    match esc {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0C),
                        b'\r' => {
                            // Line continuation
                            if self.peek_byte() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut value = (esc - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek_byte() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + (d - b'0') as u32;
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((value & 0xFF) as u8);
                        }
                        // Unknown escapes drop the backslash
                        other => out.push(other),
                    }
                }
                b'\r' => {
                    // End-of-line inside a string reads as a single newline
                    if self.peek_byte() == Some(b'\n') {
                        self.pos += 1;
                    }
                    out.push(b'\n');
                }
                _ => out.push(b),
            }
        }

        Ok(Token::new(TokenKind::String { hex: false }, out))
    }

    fn read_hex_string(&mut self) -> PDFResult<Token> {
        // Skip '<'
        self.pos += 1;
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;

        loop {
            let b = self.peek_byte().ok_or_else(|| PDFError::eof("hex string"))?;
            self.pos += 1;
            if b == b'>' {
                break;
            }
            if is_whitespace(b) {
                continue;
            }
            let digit = hex_value(b).ok_or_else(|| {
                PDFError::parse(format!("invalid hex digit {:?} in string", b as char))
            })?;
            match pending.take() {
                Some(hi) => out.push(hi << 4 | digit),
                None => pending = Some(digit),
            }
        }

        if let Some(hi) = pending {
            out.push(hi << 4);
        }
        Ok(Token::new(TokenKind::String { hex: true }, out))
    }

    fn read_regular(&mut self) -> Token {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
        let text = &self.data[start..self.pos];
        let kind = match text.first() {
            Some(b'0'..=b'9') | Some(b'+') | Some(b'-') | Some(b'.') => TokenKind::Number,
            _ => TokenKind::Other,
        };
        Token::new(kind, text)
    }
}

impl<'a> TokenSource for Lexer<'a> {
    fn next_token(&mut self) -> PDFResult<Token> {
        self.skip_whitespace();

        let b = match self.peek_byte() {
            Some(b) => b,
            None => return Ok(Token::bare(TokenKind::Eof)),
        };

        let token = match b {
            b'%' => self.read_comment(),
            b'/' => self.read_name()?,
            b'(' => self.read_literal_string()?,
            b'<' => {
                if self.data.get(self.pos + 1) == Some(&b'<') {
                    self.pos += 2;
                    Token::bare(TokenKind::StartDictionary)
                } else {
                    self.read_hex_string()?
                }
            }
            b'>' => {
                if self.data.get(self.pos + 1) == Some(&b'>') {
                    self.pos += 2;
                    Token::bare(TokenKind::EndDictionary)
                } else {
                    return Err(PDFError::parse(format!("stray '>' at offset {}", self.pos)));
                }
            }
            b'[' => {
                self.pos += 1;
                Token::bare(TokenKind::StartArray)
            }
            b']' => {
                self.pos += 1;
                Token::bare(TokenKind::EndArray)
            }
            b'{' | b'}' | b')' => {
                self.pos += 1;
                Token::new(TokenKind::Other, vec![b])
            }
            _ => self.read_regular(),
        };

        trace!("token {:?} at {}", token.kind, self.pos);
        Ok(token)
    }
}
