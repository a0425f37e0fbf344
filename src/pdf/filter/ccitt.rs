//! CCITT Group 3 and Group 4 fax codec.
//!
//! Rows are handled as lists of changing elements: the pixel positions where the color flips,
//! starting from an imaginary white pixel left of column 0. Even entries turn the row black, odd
//! entries turn it white again.

use log::{debug, trace, warn};
use crate::error::{PDFError, PDFResult};
use crate::pdf::Dictionary;
use super::bits::{BitReader, BitWriter};
use super::ccitt_tables::{
    makeup_code, mode_code, terminating_code, Mode, BLACK_CODES, EOFB, EOL, MAX_CODE_BITS, MODES,
    WHITE_CODES,
};
use super::FilterParams;

/// Largest decoded image accepted, in bytes
const MAX_IMAGE_BYTES: usize = 256 * 1024 * 1024;

/// Fax parameters resolved against the image dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcittParams {
    /// Negative for Group 4, zero for Group 3 1-D, positive for Group 3 mixed
    pub k: i64,
    pub columns: usize,
    pub rows: usize,
    pub encoded_byte_align: bool,
    pub end_of_line: bool,
    pub end_of_block: bool,
    pub black_is_1: bool,
}

impl CcittParams {
    /// Combine `/DecodeParms` with the stream's `/Width` and `/Height`.
    ///
    /// Both dimensions are required; `Columns` and `Rows` default to them.
    pub fn resolve(params: &FilterParams, stream_dict: &Dictionary) -> PDFResult<Self> {
        let dimension = |long: &str, short: &str| {
            stream_dict
                .get_integer(long)
                .or_else(|| stream_dict.get_integer(short))
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .ok_or_else(|| {
                    PDFError::UnsupportedFormat(format!(
                        "CCITTFaxDecode requires /{} in the stream dictionary",
                        long
                    ))
                })
        };
        let width = dimension("Width", "W")?;
        let height = dimension("Height", "H")?;

        Ok(Self {
            k: params.k,
            columns: params.columns.unwrap_or(width),
            rows: params.rows.unwrap_or(height),
            encoded_byte_align: params.encoded_byte_align,
            end_of_line: params.end_of_line,
            end_of_block: params.end_of_block,
            black_is_1: params.black_is_1,
        })
    }

    fn stride(&self) -> usize {
        self.columns.div_ceil(8)
    }

    /// Bytes in the decoded image
    fn image_len(&self) -> PDFResult<usize> {
        self.rows
            .checked_mul(self.stride())
            .filter(|&len| len <= MAX_IMAGE_BYTES)
            .ok_or_else(|| {
                PDFError::UnsupportedFormat(format!(
                    "CCITT image of {}x{} exceeds {} bytes",
                    self.columns, self.rows, MAX_IMAGE_BYTES
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowError {
    InvalidCode,
    Overflow,
    EndOfData,
}

/// One decoding pass over the whole image
struct Attempt {
    output: Vec<u8>,
    failures: usize,
}

/// Decode fax data into packed rows.
///
/// Only oversized images fail; undecodable rows come out white and are logged.
pub(super) fn decode(data: &[u8], params: &CcittParams) -> PDFResult<Vec<u8>> {
    params.image_len()?;
    let attempt = if params.k < 0 {
        decode_group4(data, params)
    } else {
        let primary = decode_group3(data, params, false);
        if primary.failures == 0 {
            primary
        } else {
            warn!(
                "CCITT Group 3 decode had {} failed row(s), retrying as RLE-only",
                primary.failures
            );
            let fallback = decode_group3(data, params, true);
            if fallback.failures < primary.failures {
                debug!("RLE-only decode kept ({} failed row(s))", fallback.failures);
                fallback
            } else {
                primary
            }
        }
    };

    let mut output = attempt.output;
    if !params.black_is_1 {
        output.iter_mut().for_each(|b| *b = !*b);
    }
    Ok(output)
}

fn decode_group4(data: &[u8], params: &CcittParams) -> Attempt {
    let mut decoder = RowDecoder::new(data, params.columns);
    let mut output = Vec::new();
    let mut reference: Vec<usize> = Vec::new();
    let mut decoded = 0;
    let mut failures = 0;
    let mut terminated = false;

    while decoded < params.rows {
        if params.encoded_byte_align {
            decoder.reader.align();
        }
        if decoder.reader.peek_bits(24) == Some(EOFB) {
            trace!("CCITT EOFB after {} row(s)", decoded);
            terminated = true;
            break;
        }
        match decoder.decode_2d_row(&reference) {
            Ok(changes) => {
                render_row(&changes, params.columns, &mut output);
                reference = changes;
                decoded += 1;
            }
            Err(err) => {
                // Group 4 has no EOL to resynchronize on
                warn!("CCITT Group 4 row {} failed ({:?}), stopping", decoded, err);
                break;
            }
        }
    }

    if !terminated {
        // The failed row and everything after it
        failures = params.rows - decoded;
    }
    pad_rows(&mut output, params);
    Attempt { output, failures }
}

fn decode_group3(data: &[u8], params: &CcittParams, rle_only: bool) -> Attempt {
    let mut decoder = RowDecoder::new(data, params.columns);
    let mut output = Vec::new();
    let mut reference: Vec<usize> = Vec::new();
    let mut row = 0;
    let mut failures = 0;
    let mut terminated = false;
    let tagged = params.k > 0 && !rle_only;

    while row < params.rows {
        if rle_only {
            decoder.reader.align();
            decoder.skip_eols(false);
        } else {
            let mut eols = decoder.skip_eols(tagged);
            if eols == 0 && params.encoded_byte_align {
                decoder.reader.align();
                eols = decoder.skip_eols(tagged);
            }
            if eols >= 2 {
                trace!("CCITT RTC after {} row(s)", row);
                terminated = true;
                break;
            }
        }
        if decoder.reader.at_end() {
            break;
        }

        let two_dimensional = if tagged {
            match decoder.reader.read_bit() {
                Some(bit) => !bit,
                None => break,
            }
        } else {
            false
        };

        let result = if two_dimensional {
            decoder.decode_2d_row(&reference)
        } else {
            decoder.decode_1d_row()
        };

        match result {
            Ok(changes) => {
                render_row(&changes, params.columns, &mut output);
                reference = changes;
            }
            Err(err) => {
                trace!("CCITT row {} failed: {:?}", row, err);
                failures += 1;
                render_row(&[], params.columns, &mut output);
                reference.clear();
                if rle_only {
                    // Next row starts at the following byte
                    decoder.reader.skip_bits(1);
                } else if !decoder.find_eol() {
                    row += 1;
                    break;
                }
            }
        }
        row += 1;
    }

    if !terminated {
        failures += params.rows - row;
    }
    pad_rows(&mut output, params);
    Attempt { output, failures }
}

/// Complete the image with white rows
fn pad_rows(output: &mut Vec<u8>, params: &CcittParams) {
    output.resize(params.rows * params.stride(), 0);
}

fn render_row(changes: &[usize], columns: usize, output: &mut Vec<u8>) {
    let start = output.len();
    output.resize(start + columns.div_ceil(8), 0);
    let row = &mut output[start..];
    for span in changes.chunks(2) {
        let from = span[0].min(columns);
        let to = span.get(1).copied().unwrap_or(columns).min(columns);
        for x in from..to {
            row[x / 8] |= 0x80 >> (x % 8);
        }
    }
}

/// Drop entries past the row end and pairs of flips at the same position
fn normalize(changes: Vec<usize>, columns: usize) -> Vec<usize> {
    let mut result: Vec<usize> = Vec::with_capacity(changes.len());
    for change in changes.into_iter().filter(|&c| c < columns) {
        if result.last() == Some(&change) {
            result.pop();
        } else {
            result.push(change);
        }
    }
    result
}

/// `b1` and `b2` on the reference line for a coding position `a0` (`None` before column 0)
fn reference_changes(
    reference: &[usize],
    a0: Option<usize>,
    white: bool,
    columns: usize,
) -> (usize, usize) {
    let mut i = reference
        .iter()
        .position(|&c| a0.map_or(true, |a| c > a))
        .unwrap_or(reference.len());
    if (i % 2 == 0) != white {
        i += 1;
    }
    let b1 = reference.get(i).copied().unwrap_or(columns).min(columns);
    let b2 = reference.get(i + 1).copied().unwrap_or(columns).min(columns);
    (b1, b2)
}

struct RowDecoder<'a> {
    reader: BitReader<'a>,
    columns: usize,
}

impl<'a> RowDecoder<'a> {
    fn new(data: &'a [u8], columns: usize) -> Self {
        Self {
            reader: BitReader::new(data),
            columns,
        }
    }

    /// Read one variable-length code, leaving the reader untouched on failure
    fn read_code<T: Copy>(
        &mut self,
        table: &std::collections::HashMap<(u8, u16), T>,
    ) -> Result<T, RowError> {
        let start = self.reader.bit_position();
        let mut code = 0u16;
        for len in 1..=MAX_CODE_BITS {
            let bit = match self.reader.read_bit() {
                Some(bit) => bit,
                None => {
                    self.reader.seek_bits(start);
                    return Err(RowError::EndOfData);
                }
            };
            code = (code << 1) | bit as u16;
            if let Some(&value) = table.get(&(len, code)) {
                return Ok(value);
            }
        }
        self.reader.seek_bits(start);
        Err(RowError::InvalidCode)
    }

    /// Make-up codes followed by one terminating code
    fn read_run(&mut self, white: bool) -> Result<usize, RowError> {
        let table = if white { &*WHITE_CODES } else { &*BLACK_CODES };
        let mut total = 0usize;
        loop {
            let part = self.read_code(table)?;
            total += part as usize;
            if part < 64 {
                return Ok(total);
            }
        }
    }

    fn decode_1d_row(&mut self) -> Result<Vec<usize>, RowError> {
        let mut changes = Vec::new();
        let mut a0 = 0;
        let mut white = true;

        while a0 < self.columns {
            a0 += self.read_run(white)?;
            if a0 > self.columns {
                return Err(RowError::Overflow);
            }
            if a0 < self.columns {
                changes.push(a0);
            }
            white = !white;
        }
        Ok(normalize(changes, self.columns))
    }

    fn decode_2d_row(&mut self, reference: &[usize]) -> Result<Vec<usize>, RowError> {
        let columns = self.columns;
        let mut changes = Vec::new();
        let mut a0: Option<usize> = None;
        let mut white = true;

        while a0.map_or(true, |a| a < columns) {
            let (b1, b2) = reference_changes(reference, a0, white, columns);
            match self.read_code(&*MODES)? {
                Mode::Pass => a0 = Some(b2),
                Mode::Horizontal => {
                    let start = a0.unwrap_or(0);
                    let a1 = start + self.read_run(white)?;
                    let a2 = a1 + self.read_run(!white)?;
                    if a2 > columns {
                        return Err(RowError::Overflow);
                    }
                    changes.push(a1);
                    changes.push(a2);
                    a0 = Some(a2);
                }
                Mode::Vertical(delta) => {
                    let a1 = b1 as i64 + delta as i64;
                    if a1 < a0.unwrap_or(0) as i64 || a1 > columns as i64 {
                        return Err(RowError::Overflow);
                    }
                    changes.push(a1 as usize);
                    a0 = Some(a1 as usize);
                    white = !white;
                }
            }
        }
        Ok(normalize(changes, columns))
    }

    /// Consume fill bits and EOL codes; returns how many EOLs were read.
    ///
    /// In tagged (K > 0) data consecutive EOLs are separated by a `1` tag bit.
    fn skip_eols(&mut self, tagged: bool) -> usize {
        let mut count = 0;
        loop {
            let start = self.reader.bit_position();
            if tagged && count > 0 {
                if self.reader.peek_bits(13) == Some(0x1001) {
                    self.reader.skip_bits(1);
                } else {
                    break;
                }
            }
            let mut zeros = 0;
            while self.reader.peek_bits(1) == Some(0) {
                zeros += 1;
                self.reader.skip_bits(1);
            }
            if zeros >= 11 && self.reader.read_bit() == Some(true) {
                count += 1;
            } else {
                self.reader.seek_bits(start);
                break;
            }
        }
        count
    }

    /// Move to the start of the next EOL
    fn find_eol(&mut self) -> bool {
        while let Some(bits) = self.reader.peek_bits(12) {
            if bits == EOL {
                return true;
            }
            self.reader.skip_bits(1);
        }
        false
    }
}

/// Encode packed rows as Group 4 (K < 0), Group 3 1-D (K = 0) or Group 3 with every row tagged 1-D
/// (K > 0)
pub(super) fn encode(data: &[u8], params: &CcittParams) -> PDFResult<Vec<u8>> {
    let stride = params.stride();
    let expected = params.image_len()?;
    if data.len() < expected {
        return Err(PDFError::UnsupportedFormat(format!(
            "CCITT image of {}x{} needs {} bytes, got {}",
            params.columns,
            params.rows,
            expected,
            data.len()
        )));
    }

    let mut writer = BitWriter::new();
    let mut reference: Vec<usize> = Vec::new();

    for row in data.chunks(stride).take(params.rows) {
        let changes = row_changes(row, params.columns, params.black_is_1);
        if params.k < 0 {
            if params.encoded_byte_align {
                writer.align();
            }
            encode_2d_row(&mut writer, &changes, &reference, params.columns);
        } else {
            if params.end_of_line {
                if params.encoded_byte_align {
                    // EOL ends on a byte boundary
                    writer.align();
                    writer.write_bits(0, 4);
                }
                writer.write_bits(EOL, 12);
            } else if params.encoded_byte_align {
                writer.align();
            }
            if params.k > 0 {
                writer.write_bits(1, 1);
            }
            encode_1d_row(&mut writer, &changes, params.columns);
        }
        reference = changes;
    }

    if params.end_of_block {
        if params.k < 0 {
            writer.write_bits(EOFB, 24);
        } else {
            for _ in 0..6 {
                writer.write_bits(EOL, 12);
                if params.k > 0 {
                    writer.write_bits(1, 1);
                }
            }
        }
    }

    trace!("CCITT encoded {} row(s) (K={})", params.rows, params.k);
    Ok(writer.finish())
}

fn row_changes(row: &[u8], columns: usize, black_is_1: bool) -> Vec<usize> {
    let mut changes = Vec::new();
    let mut black = false;
    for x in 0..columns {
        let bit = row.get(x / 8).map_or(0, |b| (b >> (7 - x % 8)) & 1) == 1;
        if (bit == black_is_1) != black {
            changes.push(x);
            black = !black;
        }
    }
    changes
}

fn write_run(writer: &mut BitWriter, mut run: usize, white: bool) {
    while run >= 2560 + 64 {
        let (len, code) = makeup_code(2560, white);
        writer.write_bits(code as u32, len);
        run -= 2560;
    }
    if run >= 64 {
        let makeup = run / 64 * 64;
        let (len, code) = makeup_code(makeup, white);
        writer.write_bits(code as u32, len);
        run -= makeup;
    }
    let (len, code) = terminating_code(run, white);
    writer.write_bits(code as u32, len);
}

fn write_mode(writer: &mut BitWriter, mode: Mode) {
    let (len, code) = mode_code(mode);
    writer.write_bits(code as u32, len);
}

fn encode_1d_row(writer: &mut BitWriter, changes: &[usize], columns: usize) {
    let mut a0 = 0;
    let mut white = true;
    for &change in changes.iter().chain(std::iter::once(&columns)) {
        write_run(writer, change - a0, white);
        a0 = change;
        white = !white;
    }
}

fn next_change(changes: &[usize], after: Option<usize>, columns: usize) -> usize {
    changes
        .iter()
        .copied()
        .find(|&c| after.map_or(true, |a| c > a))
        .unwrap_or(columns)
}

fn encode_2d_row(writer: &mut BitWriter, changes: &[usize], reference: &[usize], columns: usize) {
    let mut a0: Option<usize> = None;
    let mut white = true;

    while a0.map_or(true, |a| a < columns) {
        let a1 = next_change(changes, a0, columns);
        let (b1, b2) = reference_changes(reference, a0, white, columns);

        if b2 < a1 {
            write_mode(writer, Mode::Pass);
            a0 = Some(b2);
        } else if (a1 as i64 - b1 as i64).abs() <= 3 {
            write_mode(writer, Mode::Vertical((a1 as i64 - b1 as i64) as i8));
            a0 = Some(a1);
            white = !white;
        } else {
            let a2 = next_change(changes, Some(a1), columns);
            let start = a0.unwrap_or(0);
            write_mode(writer, Mode::Horizontal);
            write_run(writer, a1 - start, white);
            write_run(writer, a2 - a1, !white);
            a0 = Some(a2);
        }
    }
}
