//! MSB-first bit reader and writer shared by the LZW and CCITT codecs

/// Reads bits most significant first
#[derive(Debug, Clone)]
pub(super) struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub(super) fn bit_position(&self) -> usize {
        self.bit_pos
    }

    pub(super) fn seek_bits(&mut self, bit_pos: usize) {
        self.bit_pos = bit_pos.min(self.data.len() * 8);
    }

    pub(super) fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    pub(super) fn at_end(&self) -> bool {
        self.bits_remaining() == 0
    }

    /// Read `count` bits (at most 32); `None` when fewer remain
    pub(super) fn read_bits(&mut self, count: u8) -> Option<u32> {
        let value = self.peek_bits(count)?;
        self.bit_pos += count as usize;
        Some(value)
    }

    /// Look at the next `count` bits without consuming them
    pub(super) fn peek_bits(&self, count: u8) -> Option<u32> {
        if count as usize > self.bits_remaining() {
            return None;
        }
        let mut value = 0u32;
        for i in 0..count as usize {
            let pos = self.bit_pos + i;
            let bit = (self.data[pos / 8] >> (7 - pos % 8)) & 1;
            value = (value << 1) | bit as u32;
        }
        Some(value)
    }

    pub(super) fn read_bit(&mut self) -> Option<bool> {
        self.read_bits(1).map(|b| b == 1)
    }

    pub(super) fn skip_bits(&mut self, count: usize) {
        self.seek_bits(self.bit_pos + count);
    }

    /// Advance to the next byte boundary
    pub(super) fn align(&mut self) {
        let rem = self.bit_pos % 8;
        if rem != 0 {
            self.skip_bits(8 - rem);
        }
    }
}

/// Writes bits most significant first
#[derive(Debug, Default)]
pub(super) struct BitWriter {
    output: Vec<u8>,
    bit_buffer: u32,
    bits_in_buffer: u8,
}

impl BitWriter {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Append the low `count` bits of `value` (at most 24)
    pub(super) fn write_bits(&mut self, value: u32, count: u8) {
        debug_assert!(count <= 24);
        let mask = if count == 0 { 0 } else { u32::MAX >> (32 - count) };
        self.bit_buffer = (self.bit_buffer << count) | (value & mask);
        self.bits_in_buffer += count;

        while self.bits_in_buffer >= 8 {
            let byte = (self.bit_buffer >> (self.bits_in_buffer - 8)) as u8;
            self.output.push(byte);
            self.bits_in_buffer -= 8;
        }
        // Keep only the pending bits
        self.bit_buffer &= (1u32 << self.bits_in_buffer) - 1;
    }

    /// Pad with zero bits to the next byte boundary
    pub(super) fn align(&mut self) {
        if self.bits_in_buffer > 0 {
            let pad = 8 - self.bits_in_buffer;
            self.write_bits(0, pad);
        }
    }

    pub(super) fn finish(mut self) -> Vec<u8> {
        self.align();
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3);
        writer.write_bits(0x1FF, 9);
        writer.write_bits(0b1, 1);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 2);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(3), Some(0b101));
        assert_eq!(reader.read_bits(9), Some(0x1FF));
        assert_eq!(reader.read_bit(), Some(true));
        assert_eq!(reader.bits_remaining(), 3);
        assert_eq!(reader.read_bits(4), None);
        reader.align();
        assert!(reader.at_end());
    }
}
