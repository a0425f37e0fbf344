//! LZW codec with variable code width (9 to 12 bits)

use std::collections::HashMap;
use log::{trace, warn};
use super::bits::{BitReader, BitWriter};

const CLEAR_CODE: u16 = 256;
const EOD_CODE: u16 = 257;
const FIRST_CODE: u16 = 258;
const MAX_ENTRIES: usize = 4096;
/// The encoder clears once its table reaches this size
const ENCODER_RESET_AT: u16 = 4094;

/// Code width for a table holding `size` entries (plus one with early change)
fn code_width(size: usize) -> u8 {
    match size {
        0..=511 => 9,
        512..=1023 => 10,
        1024..=2047 => 11,
        _ => 12,
    }
}

/// LZW decoding dictionary
struct LzwTable {
    entries: Vec<Vec<u8>>,
    early_change: usize,
}

impl LzwTable {
    fn new(early_change: bool) -> Self {
        let mut table = Self {
            entries: Vec::with_capacity(MAX_ENTRIES),
            early_change: early_change as usize,
        };
        table.reset();
        table
    }

    /// Back to the 256 literal entries plus the two control codes
    fn reset(&mut self) {
        self.entries.clear();
        self.entries.extend((0..=255u8).map(|b| vec![b]));
        // Placeholders for clear and end-of-data
        self.entries.push(Vec::new());
        self.entries.push(Vec::new());
    }

    fn width(&self) -> u8 {
        code_width(self.entries.len() + self.early_change)
    }

    fn get(&self, code: u16) -> Option<&[u8]> {
        self.entries.get(code as usize).map(Vec::as_slice)
    }

    fn push(&mut self, entry: Vec<u8>) {
        if self.entries.len() < MAX_ENTRIES {
            self.entries.push(entry);
        }
    }

    fn next_code(&self) -> usize {
        self.entries.len()
    }
}

/// Decode LZW data.
///
/// Running out of input or meeting a code that cannot be resolved ends decoding as if an
/// end-of-data code had been read.
pub(super) fn decode(data: &[u8], early_change: bool) -> Vec<u8> {
    let mut reader = BitReader::new(data);
    let mut table = LzwTable::new(early_change);
    let mut output = Vec::with_capacity(data.len() * 3);
    let mut previous: Option<Vec<u8>> = None;

    loop {
        let code = match reader.read_bits(table.width()) {
            Some(code) => code as u16,
            None => {
                trace!("LZW data ended without end-of-data code");
                break;
            }
        };

        match code {
            CLEAR_CODE => {
                table.reset();
                previous = None;
            }
            EOD_CODE => break,
            _ => {
                let entry = match (table.get(code), &previous) {
                    (Some(entry), _) if code < FIRST_CODE || !entry.is_empty() => entry.to_vec(),
                    (_, Some(prev)) if code as usize == table.next_code() => {
                        // KwKwK: the code being defined right now
                        let mut entry = prev.clone();
                        entry.push(prev[0]);
                        entry
                    }
                    _ => {
                        warn!("LZW code {} out of range, treating as end of data", code);
                        break;
                    }
                };

                output.extend_from_slice(&entry);
                if let Some(mut prev) = previous.take() {
                    prev.push(entry[0]);
                    table.push(prev);
                }
                previous = Some(entry);
            }
        }
    }

    output
}

/// Encode data as LZW, starting with a clear code and ending with end-of-data
pub(super) fn encode(data: &[u8], early_change: bool) -> Vec<u8> {
    let early = early_change as usize;
    let mut writer = BitWriter::new();
    let mut table: HashMap<Vec<u8>, u16> = HashMap::new();
    let mut next_code = FIRST_CODE;

    // The decoder's table is one entry behind the encoder's
    let width = |next: u16| code_width(next as usize - 1 + early);

    writer.write_bits(CLEAR_CODE as u32, width(next_code));

    let mut current: Vec<u8> = Vec::new();
    for &byte in data {
        if current.is_empty() {
            current.push(byte);
            continue;
        }

        current.push(byte);
        if table.contains_key(&current) {
            continue;
        }

        current.pop();
        writer.write_bits(code_for(&table, &current) as u32, width(next_code));
        current.push(byte);
        table.insert(std::mem::take(&mut current), next_code);
        next_code += 1;
        current.push(byte);

        if next_code >= ENCODER_RESET_AT {
            writer.write_bits(CLEAR_CODE as u32, width(next_code));
            table.clear();
            next_code = FIRST_CODE;
        }
    }

    if !current.is_empty() {
        writer.write_bits(code_for(&table, &current) as u32, width(next_code));
        // The decoder adds one more entry on reading the final code
        next_code += 1;
    }
    writer.write_bits(EOD_CODE as u32, width(next_code));
    writer.finish()
}

fn code_for(table: &HashMap<Vec<u8>, u16>, sequence: &[u8]) -> u16 {
    if sequence.len() == 1 {
        sequence[0] as u16
    } else {
        // Multi-byte sequences are only formed from table hits
        table.get(sequence).copied().unwrap_or(sequence[0] as u16)
    }
}
