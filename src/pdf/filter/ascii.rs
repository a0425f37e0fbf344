//! ASCIIHex and ASCII85 codecs

use log::warn;
use crate::error::{PDFError, PDFResult};
use crate::pdf::lexer::is_whitespace;

pub(super) fn decode_hex(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;

    for &byte in data {
        if byte == b'>' {
            break;
        }
        if is_whitespace(byte) {
            continue;
        }
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => {
                return Err(PDFError::parse(format!(
                    "invalid character {:?} in ASCIIHex data",
                    byte as char
                )))
            }
        };
        match pending.take() {
            Some(hi) => output.push(hi << 4 | digit),
            None => pending = Some(digit),
        }
    }

    // Odd digit count: the last digit is followed by an implicit zero
    if let Some(hi) = pending {
        output.push(hi << 4);
    }
    Ok(output)
}

pub(super) fn encode_hex(data: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut output = Vec::with_capacity(data.len() * 2 + data.len() / 32 + 1);
    for (i, &byte) in data.iter().enumerate() {
        if i > 0 && i % 32 == 0 {
            output.push(b'\n');
        }
        output.push(HEX[(byte >> 4) as usize]);
        output.push(HEX[(byte & 0x0F) as usize]);
    }
    output.push(b'>');
    output
}

pub(super) fn decode_85(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut count = 0;

    let body = data.strip_prefix(b"<~").unwrap_or(data);
    let mut iter = body.iter().copied().peekable();

    while let Some(byte) = iter.next() {
        match byte {
            b'~' => {
                if iter.peek().map_or(false, |&b| b != b'>') {
                    warn!("ASCII85: '~' not followed by '>'");
                }
                break;
            }
            b'z' if count == 0 => output.extend_from_slice(&[0, 0, 0, 0]),
            b'z' => {
                return Err(PDFError::parse("ASCII85: 'z' inside a group"));
            }
            b'!'..=b'u' => {
                group[count] = byte - b'!';
                count += 1;
                if count == 5 {
                    let value = group_value(&group)?;
                    output.extend_from_slice(&value.to_be_bytes());
                    count = 0;
                }
            }
            b if is_whitespace(b) => {}
            other => {
                return Err(PDFError::parse(format!(
                    "invalid character {:?} in ASCII85 data",
                    other as char
                )))
            }
        }
    }

    match count {
        0 => {}
        1 => warn!("ASCII85: single trailing character ignored"),
        n => {
            // Pad the partial group with 'u' and keep n - 1 bytes
            for slot in group.iter_mut().skip(n) {
                *slot = b'u' - b'!';
            }
            let value = group_value(&group)?;
            output.extend_from_slice(&value.to_be_bytes()[..n - 1]);
        }
    }

    Ok(output)
}

fn group_value(group: &[u8; 5]) -> PDFResult<u32> {
    let value = group
        .iter()
        .fold(0u64, |acc, &digit| acc * 85 + digit as u64);
    u32::try_from(value).map_err(|_| PDFError::parse("ASCII85 group exceeds 32 bits"))
}

pub(super) fn encode_85(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 5 / 4 + 4);

    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        let value = u32::from_be_bytes(word);

        if value == 0 && chunk.len() == 4 {
            output.push(b'z');
            continue;
        }

        let mut digits = [0u8; 5];
        let mut v = value;
        for slot in digits.iter_mut().rev() {
            *slot = (v % 85) as u8 + b'!';
            v /= 85;
        }
        output.extend_from_slice(&digits[..chunk.len() + 1]);
    }

    output.extend_from_slice(b"~>");
    output
}
