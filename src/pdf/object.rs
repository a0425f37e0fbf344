//! PDF object types, number formatting and serialization

use std::fmt;
use std::io::Write;
use crate::error::{PDFError, PDFResult};
use super::{Dictionary, Stream};

/// Identity of an indirect object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    /// Object number
    pub number: u32,
    /// Generation number
    pub generation: u16,
}

impl ObjectId {
    /// Create new object identity
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// A PDF value
#[derive(Debug, Clone, PartialEq)]
pub enum PDFValue {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Numeric value (integer or real)
    Number(f64),
    /// String value; the flag records hexadecimal notation
    String(Vec<u8>, bool),
    /// Name object, without the leading slash
    Name(Vec<u8>),
    /// Array object
    Array(Vec<PDFValue>),
    /// Dictionary object
    Dictionary(Dictionary),
    /// Stream object
    Stream(Stream),
    /// Indirect reference
    Reference(ObjectId),
}

impl Default for PDFValue {
    fn default() -> Self {
        PDFValue::Null
    }
}

impl From<bool> for PDFValue {
    fn from(value: bool) -> Self {
        PDFValue::Boolean(value)
    }
}

impl From<i64> for PDFValue {
    fn from(value: i64) -> Self {
        PDFValue::Number(value as f64)
    }
}

impl From<i32> for PDFValue {
    fn from(value: i32) -> Self {
        PDFValue::Number(value as f64)
    }
}

impl From<u32> for PDFValue {
    fn from(value: u32) -> Self {
        PDFValue::Number(value as f64)
    }
}

impl From<usize> for PDFValue {
    fn from(value: usize) -> Self {
        PDFValue::Number(value as f64)
    }
}

impl From<f64> for PDFValue {
    fn from(value: f64) -> Self {
        PDFValue::Number(value)
    }
}

impl From<ObjectId> for PDFValue {
    fn from(id: ObjectId) -> Self {
        PDFValue::Reference(id)
    }
}

impl From<Dictionary> for PDFValue {
    fn from(dict: Dictionary) -> Self {
        PDFValue::Dictionary(dict)
    }
}

impl From<Stream> for PDFValue {
    fn from(stream: Stream) -> Self {
        PDFValue::Stream(stream)
    }
}

impl From<Vec<PDFValue>> for PDFValue {
    fn from(items: Vec<PDFValue>) -> Self {
        PDFValue::Array(items)
    }
}

impl PDFValue {
    /// Name value from text
    pub fn name(name: impl AsRef<[u8]>) -> Self {
        PDFValue::Name(name.as_ref().to_vec())
    }

    /// Literal string value
    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        PDFValue::String(bytes.into(), false)
    }

    /// Hexadecimal string value
    pub fn hex_string(bytes: impl Into<Vec<u8>>) -> Self {
        PDFValue::String(bytes.into(), true)
    }

    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            PDFValue::Null => "null",
            PDFValue::Boolean(_) => "boolean",
            PDFValue::Number(_) => "number",
            PDFValue::String(..) => "string",
            PDFValue::Name(_) => "name",
            PDFValue::Array(_) => "array",
            PDFValue::Dictionary(_) => "dictionary",
            PDFValue::Stream(_) => "stream",
            PDFValue::Reference(_) => "reference",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PDFValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PDFValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PDFValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer value; reals are truncated toward zero
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PDFValue::Number(n) if n.is_finite() => Some(n.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&[u8]> {
        match self {
            PDFValue::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            PDFValue::String(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PDFValue]> {
        match self {
            PDFValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary of a dictionary or of a stream
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            PDFValue::Dictionary(d) => Some(d),
            PDFValue::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            PDFValue::Dictionary(d) => Some(d),
            PDFValue::Stream(s) => Some(&mut s.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Stream> {
        match self {
            PDFValue::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            PDFValue::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Check that the value is a name equal to `name`
    pub fn is_name(&self, name: &str) -> bool {
        self.as_name() == Some(name.as_bytes())
    }

    /// Parse a PDF numeric token.
    ///
    /// Accepts an optional sign, digits and at most one decimal point with at least one digit
    /// somewhere. Exponents are not PDF syntax and are rejected.
    pub fn parse_number(text: &[u8]) -> PDFResult<PDFValue> {
        let body = match text.first() {
            Some(b'+') | Some(b'-') => &text[1..],
            _ => text,
        };

        let mut digits = 0;
        let mut points = 0;
        for &b in body {
            match b {
                b'0'..=b'9' => digits += 1,
                b'.' => points += 1,
                _ => {
                    return Err(PDFError::parse(format!(
                        "invalid character {:?} in number {:?}",
                        b as char,
                        String::from_utf8_lossy(text)
                    )))
                }
            }
        }

        if digits == 0 || points > 1 {
            return Err(PDFError::parse(format!(
                "malformed number {:?}",
                String::from_utf8_lossy(text)
            )));
        }

        // The scan above guarantees ASCII
        let s = std::str::from_utf8(text).map_err(|e| PDFError::parse(e.to_string()))?;
        let s = s.strip_prefix('+').unwrap_or(s);
        let value = if s.ends_with('.') {
            s[..s.len() - 1].parse::<f64>()
        } else if s.starts_with('.') || s.starts_with("-.") {
            s.replacen('.', "0.", 1).parse::<f64>()
        } else {
            s.parse::<f64>()
        }
        .map_err(|e| PDFError::parse(format!("malformed number {:?}: {}", s, e)))?;

        Ok(PDFValue::Number(value))
    }

    /// Serialize the value in PDF syntax
    pub fn write_to(&self, output: &mut Vec<u8>) {
        match self {
            PDFValue::Null => output.extend_from_slice(b"null"),
            PDFValue::Boolean(true) => output.extend_from_slice(b"true"),
            PDFValue::Boolean(false) => output.extend_from_slice(b"false"),
            PDFValue::Number(n) => output.extend_from_slice(format_number(*n).as_bytes()),
            PDFValue::String(bytes, true) => write_hex_string(output, bytes),
            PDFValue::String(bytes, false) => write_literal_string(output, bytes),
            PDFValue::Name(name) => write_name(output, name),
            PDFValue::Array(items) => {
                output.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        output.push(b' ');
                    }
                    item.write_to(output);
                }
                output.push(b']');
            }
            PDFValue::Dictionary(dict) => dict.write_to(output),
            PDFValue::Stream(stream) => stream.write_to(output),
            PDFValue::Reference(id) => {
                let _ = write!(output, "{} {} R", id.number, id.generation);
            }
        }
    }

    /// Serialized form as an owned buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }
}

/// Format a number in its shortest PDF form.
///
/// Integral values print without a decimal point; reals use the shortest decimal text that parses
/// back to the same double, with no exponent and no leading zero.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return format!("{}", value as i64);
    }

    // f64 Display is shortest-roundtrip and never uses exponent notation
    let text = format!("{}", value);
    if let Some(rest) = text.strip_prefix("0.") {
        format!(".{}", rest)
    } else if let Some(rest) = text.strip_prefix("-0.") {
        format!("-.{}", rest)
    } else {
        text
    }
}

fn write_literal_string(output: &mut Vec<u8>, bytes: &[u8]) {
    output.push(b'(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                output.push(b'\\');
                output.push(b);
            }
            b'\r' => output.extend_from_slice(b"\\r"),
            _ => output.push(b),
        }
    }
    output.push(b')');
}

fn write_hex_string(output: &mut Vec<u8>, bytes: &[u8]) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    output.push(b'<');
    for &b in bytes {
        output.push(HEX[(b >> 4) as usize]);
        output.push(HEX[(b & 0x0F) as usize]);
    }
    output.push(b'>');
}

/// Bytes that must be escaped inside a name
fn needs_name_escape(b: u8) -> bool {
    !(0x21..=0x7E).contains(&b)
        || matches!(b, b'#' | b'/' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'%')
}

pub(crate) fn write_name(output: &mut Vec<u8>, name: &[u8]) {
    output.push(b'/');
    for &b in name {
        if needs_name_escape(b) {
            let _ = write!(output, "#{:02X}", b);
        } else {
            output.push(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(value: &PDFValue) -> String {
        String::from_utf8(value.to_bytes()).unwrap()
    }

    #[test_log::test]
    fn test_parse_numbers() {
        assert_eq!(PDFValue::parse_number(b"42").unwrap(), PDFValue::Number(42.0));
        assert_eq!(PDFValue::parse_number(b"-17").unwrap(), PDFValue::Number(-17.0));
        assert_eq!(PDFValue::parse_number(b"+3.5").unwrap(), PDFValue::Number(3.5));
        assert_eq!(PDFValue::parse_number(b".25").unwrap(), PDFValue::Number(0.25));
        assert_eq!(PDFValue::parse_number(b"-.5").unwrap(), PDFValue::Number(-0.5));
        assert_eq!(PDFValue::parse_number(b"4.").unwrap(), PDFValue::Number(4.0));
    }

    #[test_log::test]
    fn test_parse_malformed_numbers() {
        for bad in [&b""[..], b"-", b".", b"+.", b"1.2.3", b"1e5", b"12a", b"--1"] {
            assert!(
                matches!(PDFValue::parse_number(bad), Err(PDFError::Parse(_))),
                "{:?} should not parse",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test_log::test]
    fn test_format_numbers() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(612.0), "612");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.5), ".5");
        assert_eq!(format_number(-0.25), "-.25");
        assert_eq!(format_number(12.125), "12.125");
        assert_eq!(format_number(1e-7), ".0000001");
    }

    #[test_log::test]
    fn test_number_format_round_trip() {
        for value in [0.1, 1.0 / 3.0, 72.0, -1234.5678, 2.5e-5, 16777216.0] {
            let formatted = format_number(value);
            let parsed = PDFValue::parse_number(formatted.as_bytes()).unwrap();
            assert_eq!(parsed, PDFValue::Number(value));
        }
    }

    #[test_log::test]
    fn test_serialize_primitives() {
        assert_eq!(text(&PDFValue::Null), "null");
        assert_eq!(text(&PDFValue::Boolean(true)), "true");
        assert_eq!(text(&PDFValue::string(&b"a(b)c\\"[..])), "(a\\(b\\)c\\\\)");
        assert_eq!(text(&PDFValue::hex_string(vec![0x00, 0xAB])), "<00AB>");
        assert_eq!(text(&PDFValue::name("Type")), "/Type");
        assert_eq!(text(&PDFValue::name("A B#")), "/A#20B#23");
        assert_eq!(text(&PDFValue::Reference(ObjectId::new(12, 0))), "12 0 R");
        assert_eq!(
            text(&PDFValue::Array(vec![1.into(), PDFValue::Number(0.5), PDFValue::name("X")])),
            "[1 .5 /X]"
        );
    }

    #[test_log::test]
    fn test_byte_exact_equality() {
        assert_eq!(PDFValue::name("Font"), PDFValue::Name(b"Font".to_vec()));
        assert_ne!(PDFValue::name("Font"), PDFValue::name("font"));
        assert_ne!(PDFValue::string(&b"abc"[..]), PDFValue::name("abc"));
    }
}
