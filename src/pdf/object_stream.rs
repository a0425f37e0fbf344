//! Object streams (`/Type /ObjStm`)

use log::{debug, warn};
use crate::error::{PDFError, PDFResult};
use super::filter::FilterRegistry;
use super::lexer::{Lexer, TokenKind, TokenSource};
use super::parser::parse_value;
use super::{Dictionary, PDFValue, Stream};

/// A decoded object stream
#[derive(Debug, Clone)]
pub struct ObjectStream {
    /// (object number, offset relative to `/First`)
    entries: Vec<(u32, usize)>,
    data: Vec<u8>,
    first: usize,
}

impl ObjectStream {
    pub fn parse(stream: &Stream, registry: &FilterRegistry) -> PDFResult<Self> {
        let count = stream.dict.require_integer("N")?;
        let first = stream.dict.require_integer("First")?;
        if count < 0 {
            return Err(PDFError::invalid_dict_value("N", "negative object count"));
        }
        if first < 0 {
            return Err(PDFError::invalid_dict_value("First", "negative offset"));
        }

        let data = stream.decoded_data(registry)?;
        let first = (first as usize).min(data.len());
        let mut lexer = Lexer::new(&data[..first]);
        // Each header pair takes at least four bytes ("1 0 ")
        let mut entries = Vec::with_capacity((count as usize).min(first / 2));
        for _ in 0..count {
            let number = lexer.next_token()?;
            let offset = lexer.next_token()?;
            if number.kind != TokenKind::Number || offset.kind != TokenKind::Number {
                warn!("Object stream header ends after {} of {} entries", entries.len(), count);
                break;
            }
            match (parse_usize(&number.value), parse_usize(&offset.value)) {
                (Some(number), Some(offset)) if number <= u32::MAX as usize => {
                    entries.push((number as u32, offset))
                }
                _ => return Err(PDFError::parse("bad object stream header entry")),
            }
        }
        debug!("Object stream holds {} objects", entries.len());

        Ok(Self {
            entries,
            data,
            first,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object numbers in slot order
    pub fn object_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|&(number, _)| number)
    }

    /// Object held in slot `index`
    pub fn get(&self, index: usize) -> PDFResult<(u32, PDFValue)> {
        let &(number, offset) = self.entries.get(index).ok_or_else(|| {
            PDFError::xref(format!(
                "object stream slot {} out of {} entries",
                index,
                self.entries.len()
            ))
        })?;
        let start = self.first.saturating_add(offset).min(self.data.len());
        let end = self
            .entries
            .get(index + 1)
            .map(|&(_, next)| self.first.saturating_add(next))
            .unwrap_or(self.data.len())
            .clamp(start, self.data.len());
        Ok((number, parse_value(&self.data[start..end])?))
    }
}

fn parse_usize(text: &[u8]) -> Option<usize> {
    std::str::from_utf8(text).ok()?.parse().ok()
}

/// Collects objects into a new object stream
#[derive(Debug, Default)]
pub struct ObjectStreamBuilder {
    header: Vec<u8>,
    body: Vec<u8>,
    count: usize,
}

impl ObjectStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an object; returns its slot index
    pub fn push(&mut self, number: u32, value: &PDFValue) -> usize {
        if self.count > 0 {
            self.header.push(b' ');
        }
        self.header
            .extend_from_slice(format!("{} {}", number, self.body.len()).as_bytes());
        value.write_to(&mut self.body);
        self.body.push(b'\n');
        self.count += 1;
        self.count - 1
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Plain stream to be Flate encoded by the writer
    pub fn build(mut self) -> Stream {
        self.header.push(b'\n');
        let mut dict = Dictionary::with_type("ObjStm");
        dict.set("N", self.count);
        dict.set("First", self.header.len());
        dict.set("Filter", PDFValue::name("FlateDecode"));
        let mut data = self.header;
        data.extend_from_slice(&self.body);
        Stream::new(dict, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn test_build_and_parse() {
        let registry = FilterRegistry::standard();
        let mut builder = ObjectStreamBuilder::new();
        assert_eq!(builder.push(5, &PDFValue::Number(42.0)), 0);
        let mut dict = Dictionary::with_type("Font");
        dict.set("Name", PDFValue::string(&b"F1"[..]));
        assert_eq!(builder.push(9, &PDFValue::Dictionary(dict.clone())), 1);

        let mut stream = builder.build();
        stream.encode(&registry).unwrap();

        let parsed = ObjectStream::parse(&stream, &registry).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.object_numbers().collect::<Vec<_>>(), vec![5, 9]);
        assert_eq!(parsed.get(0).unwrap(), (5, PDFValue::Number(42.0)));
        assert_eq!(parsed.get(1).unwrap(), (9, PDFValue::Dictionary(dict)));
        assert!(parsed.get(2).is_err());
    }

    #[test_log::test]
    fn test_parse_handwritten_stream() {
        let mut dict = Dictionary::with_type("ObjStm");
        dict.set("N", 2);
        dict.set("First", 10);
        let stream = Stream::new(dict, b"11 0 12 4 (ab) [1 2]".to_vec());
        let parsed = ObjectStream::parse(&stream, &FilterRegistry::standard()).unwrap();
        assert_eq!(parsed.get(0).unwrap(), (11, PDFValue::string(&b"ab"[..])));
        assert_eq!(
            parsed.get(1).unwrap(),
            (12, PDFValue::Array(vec![PDFValue::Number(1.0), PDFValue::Number(2.0)]))
        );
    }

    #[test_log::test]
    fn test_missing_count() {
        let stream = Stream::new(Dictionary::with_type("ObjStm"), Vec::new());
        assert!(ObjectStream::parse(&stream, &FilterRegistry::standard()).is_err());
    }

    #[test_log::test]
    fn test_huge_count_stops_at_header_end() {
        let mut dict = Dictionary::with_type("ObjStm");
        dict.set("N", 1_000_000_000_000_000i64);
        dict.set("First", 4);
        let stream = Stream::new(dict, b"7 0 true".to_vec());
        let parsed = ObjectStream::parse(&stream, &FilterRegistry::standard()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get(0).unwrap(), (7, PDFValue::Boolean(true)));
    }

    #[test_log::test]
    fn test_offsets_past_the_data() {
        let mut dict = Dictionary::with_type("ObjStm");
        dict.set("N", 2);
        dict.set("First", 1_000_000);
        let stream = Stream::new(dict, format!("3 0 4 {} 5", usize::MAX).into_bytes());
        let parsed = ObjectStream::parse(&stream, &FilterRegistry::standard()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.get(0).is_err());
        assert!(parsed.get(1).is_err());
    }

    #[test_log::test]
    fn test_negative_header_values() {
        let registry = FilterRegistry::standard();
        let mut dict = Dictionary::with_type("ObjStm");
        dict.set("N", -1);
        dict.set("First", 0);
        assert!(ObjectStream::parse(&Stream::new(dict.clone(), Vec::new()), &registry).is_err());
        dict.set("N", 1);
        dict.set("First", -5);
        assert!(ObjectStream::parse(&Stream::new(dict, Vec::new()), &registry).is_err());
    }
}
