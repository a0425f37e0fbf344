//! Object parser built on a token source

use std::collections::VecDeque;
use log::trace;
use crate::error::{PDFError, PDFResult};
use super::lexer::{Lexer, Token, TokenKind, TokenSource};
use super::{Dictionary, ObjectId, PDFValue};

/// Nesting depth beyond which input is rejected instead of recursing further
const MAX_DEPTH: usize = 256;

/// Header of an indirect object found in a byte buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedObject {
    pub id: ObjectId,
    /// Object value; for streams this is the stream dictionary
    pub value: PDFValue,
    /// Offset of the first stream data byte, relative to the parsed buffer
    pub stream_start: Option<usize>,
}

/// Builds PDF values from tokens
pub struct ObjectParser<S> {
    source: S,
    lookahead: VecDeque<Token>,
}

impl<S: TokenSource> ObjectParser<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            lookahead: VecDeque::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn pull(&mut self) -> PDFResult<Token> {
        loop {
            let token = self.source.next_token()?;
            if token.kind != TokenKind::Comment {
                return Ok(token);
            }
        }
    }

    /// Next non-comment token
    pub fn next_token(&mut self) -> PDFResult<Token> {
        match self.lookahead.pop_front() {
            Some(token) => Ok(token),
            None => self.pull(),
        }
    }

    fn peek(&mut self, index: usize) -> PDFResult<&Token> {
        while self.lookahead.len() <= index {
            let token = self.pull()?;
            self.lookahead.push_back(token);
        }
        Ok(&self.lookahead[index])
    }

    /// Tokens read ahead but not consumed yet
    pub fn has_lookahead(&self) -> bool {
        !self.lookahead.is_empty()
    }

    /// Parse the next complete value
    pub fn parse_value(&mut self) -> PDFResult<PDFValue> {
        let token = self.next_token()?;
        self.parse_from(token, 0)
    }

    fn parse_from(&mut self, token: Token, depth: usize) -> PDFResult<PDFValue> {
        if depth > MAX_DEPTH {
            return Err(PDFError::parse("objects nested too deeply"));
        }

        match token.kind {
            TokenKind::StartDictionary => self.parse_dictionary(depth).map(PDFValue::Dictionary),
            TokenKind::StartArray => {
                let mut items = Vec::new();
                loop {
                    let token = self.next_token()?;
                    match token.kind {
                        TokenKind::EndArray => break,
                        TokenKind::Eof => return Err(PDFError::eof("array")),
                        _ => items.push(self.parse_from(token, depth + 1)?),
                    }
                }
                Ok(PDFValue::Array(items))
            }
            TokenKind::Name => Ok(PDFValue::Name(token.value)),
            TokenKind::String { hex } => Ok(PDFValue::String(token.value, hex)),
            TokenKind::Number => self.parse_number_or_reference(token),
            TokenKind::Other => match token.value.as_slice() {
                b"true" => Ok(PDFValue::Boolean(true)),
                b"false" => Ok(PDFValue::Boolean(false)),
                b"null" => Ok(PDFValue::Null),
                other => Err(PDFError::parse(format!(
                    "unexpected keyword {:?}",
                    String::from_utf8_lossy(other)
                ))),
            },
            TokenKind::EndDictionary | TokenKind::EndArray => {
                Err(PDFError::parse(format!("unbalanced {:?}", token.kind)))
            }
            TokenKind::Comment => self.parse_value(),
            TokenKind::Eof => Err(PDFError::eof("value")),
        }
    }

    fn parse_dictionary(&mut self, depth: usize) -> PDFResult<Dictionary> {
        let mut dict = Dictionary::new();
        loop {
            let token = self.next_token()?;
            match token.kind {
                TokenKind::EndDictionary => break,
                TokenKind::Name => {
                    if self.peek(0)?.kind == TokenKind::EndDictionary {
                        // Key without value
                        dict.set(&token.value, PDFValue::Null);
                        continue;
                    }
                    let next = self.next_token()?;
                    let value = self.parse_from(next, depth + 1)?;
                    dict.set(&token.value, value);
                }
                TokenKind::Eof => return Err(PDFError::eof("dictionary")),
                other => {
                    return Err(PDFError::parse(format!(
                        "dictionary key must be a name, found {:?}",
                        other
                    )))
                }
            }
        }
        Ok(dict)
    }

    fn parse_number_or_reference(&mut self, token: Token) -> PDFResult<PDFValue> {
        if let Some(number) = parse_unsigned(&token.value) {
            let generation = match self.peek(0)? {
                t if t.kind == TokenKind::Number => parse_unsigned(&t.value),
                _ => None,
            };
            if let Some(generation) = generation {
                if self.peek(1)?.is_keyword("R") {
                    self.lookahead.pop_front();
                    self.lookahead.pop_front();
                    return Ok(PDFValue::Reference(ObjectId::new(
                        number as u32,
                        generation.min(u16::MAX as u64) as u16,
                    )));
                }
            }
        }
        PDFValue::parse_number(&token.value)
    }

    /// Parse `N G obj`
    pub fn parse_object_header(&mut self) -> PDFResult<ObjectId> {
        let number = self.next_token()?;
        let generation = self.next_token()?;
        let keyword = self.next_token()?;

        match (parse_unsigned(&number.value), parse_unsigned(&generation.value)) {
            (Some(n), Some(g)) if keyword.is_keyword("obj") && n <= u32::MAX as u64 => {
                Ok(ObjectId::new(n as u32, g.min(u16::MAX as u64) as u16))
            }
            _ if number.kind == TokenKind::Eof || keyword.kind == TokenKind::Eof => {
                Err(PDFError::eof("object header"))
            }
            _ => Err(PDFError::parse("invalid object header")),
        }
    }
}

fn parse_unsigned(text: &[u8]) -> Option<u64> {
    if text.is_empty() || text.len() > 10 || !text.iter().all(u8::is_ascii_digit) {
        return None;
    }
    text.iter()
        .try_fold(0u64, |acc, d| acc.checked_mul(10)?.checked_add((d - b'0') as u64))
}

/// Parse a single value from bytes
pub fn parse_value(data: &[u8]) -> PDFResult<PDFValue> {
    ObjectParser::new(Lexer::new(data)).parse_value()
}

/// Parse the indirect object starting at `pos`.
///
/// For streams, the stream dictionary is returned and `stream_start` points at the first data
/// byte; locating the end of the data is left to the caller, which may need to resolve an
/// indirect `/Length`.
pub fn parse_indirect_object(data: &[u8], pos: usize) -> PDFResult<ParsedObject> {
    let mut parser = ObjectParser::new(Lexer::at(data, pos));
    let id = parser.parse_object_header()?;
    let value = parser.parse_value()?;
    trace!("parsed object {} ({})", id, value.type_name());

    let mut stream_start = None;
    if let PDFValue::Dictionary(_) = value {
        // Dictionaries never leave lookahead behind, so the lexer position is exact
        if !parser.has_lookahead() {
            let mut lexer = parser.into_inner();
            let keyword = lexer.next_token()?;
            if keyword.is_keyword("stream") {
                lexer.skip_stream_eol();
                stream_start = Some(lexer.position());
            }
        }
    }

    Ok(ParsedObject {
        id,
        value,
        stream_start,
    })
}

/// Locate `endstream` at or after `from`, returning the offset where stream data ends
pub fn find_endstream(data: &[u8], from: usize) -> Option<usize> {
    const MARKER: &[u8] = b"endstream";
    if from > data.len() {
        return None;
    }
    let found = data[from..]
        .windows(MARKER.len())
        .position(|w| w == MARKER)
        .map(|p| from + p)?;

    // Trim the end-of-line that precedes the keyword
    let mut end = found;
    if end > from && data[end - 1] == b'\n' {
        end -= 1;
    }
    if end > from && data[end - 1] == b'\r' {
        end -= 1;
    }
    Some(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn test_parse_references() {
        let value = parse_value(b"[1 0 R 2 5 R 3 4 5]").unwrap();
        assert_eq!(
            value,
            PDFValue::Array(vec![
                PDFValue::Reference(ObjectId::new(1, 0)),
                PDFValue::Reference(ObjectId::new(2, 5)),
                PDFValue::Number(3.0),
                PDFValue::Number(4.0),
                PDFValue::Number(5.0),
            ])
        );
    }

    #[test_log::test]
    fn test_parse_dictionary() {
        let value = parse_value(b"<< /Type /Catalog /Pages 2 0 R /Flag true /Empty >>").unwrap();
        let dict = value.as_dict().unwrap();
        assert!(dict.has_type("Catalog"));
        assert_eq!(dict.get_reference("Pages"), Some(ObjectId::new(2, 0)));
        assert_eq!(dict.get_bool("Flag"), Some(true));
        assert_eq!(dict.get("Empty"), Some(&PDFValue::Null));
    }

    #[test_log::test]
    fn test_parse_malformed_number() {
        assert!(matches!(parse_value(b"[1.2.3]"), Err(PDFError::Parse(_))));
    }

    #[test_log::test]
    fn test_truncated_input() {
        assert!(matches!(parse_value(b"<< /A [1 2"), Err(PDFError::UnexpectedEof(_))));
    }

    #[test_log::test]
    fn test_parse_indirect_stream() {
        let data = b"junk 7 0 obj\n<< /Length 5 >>\nstream\r\nhello\nendstream\nendobj";
        let parsed = parse_indirect_object(data, 5).unwrap();
        assert_eq!(parsed.id, ObjectId::new(7, 0));
        let start = parsed.stream_start.unwrap();
        assert_eq!(&data[start..start + 5], b"hello");
        assert_eq!(find_endstream(data, start), Some(start + 5));
    }

    #[test_log::test]
    fn test_parse_indirect_plain() {
        let data = b"12 3 obj (text) endobj";
        let parsed = parse_indirect_object(data, 0).unwrap();
        assert_eq!(parsed.id, ObjectId::new(12, 3));
        assert_eq!(parsed.value, PDFValue::string(&b"text"[..]));
        assert_eq!(parsed.stream_start, None);
    }
}
