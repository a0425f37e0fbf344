//! PNG and TIFF predictors for Flate and LZW streams

use log::warn;
use crate::error::{PDFError, PDFResult};

/// Predictor parameters from `/DecodeParms`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictorParams {
    pub predictor: u8,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    fn bits_per_pixel(&self) -> usize {
        self.colors * self.bits_per_component
    }

    /// Bytes per pixel, at least one
    fn bytes_per_pixel(&self) -> usize {
        ((self.bits_per_pixel() + 7) / 8).max(1)
    }

    fn bytes_per_row(&self) -> usize {
        (self.columns * self.bits_per_pixel() + 7) / 8
    }

    fn validate(&self) -> PDFResult<()> {
        if !matches!(self.bits_per_component, 1 | 2 | 4 | 8 | 16) {
            return Err(PDFError::UnsupportedFormat(format!(
                "predictor with {} bits per component",
                self.bits_per_component
            )));
        }
        if self.colors == 0 || self.colors > 32 || self.columns == 0 {
            return Err(PDFError::UnsupportedFormat(format!(
                "predictor with {} colors and {} columns",
                self.colors, self.columns
            )));
        }
        // Row arithmetic below adds up to eight bits on top of the row width
        if self
            .columns
            .checked_mul(self.bits_per_pixel())
            .and_then(|bits| bits.checked_add(8))
            .is_none()
        {
            return Err(PDFError::parse(format!(
                "predictor row of {} columns overflows",
                self.columns
            )));
        }
        Ok(())
    }
}

/// Undo the predictor named by `params`
pub(super) fn decode(data: Vec<u8>, params: &PredictorParams) -> PDFResult<Vec<u8>> {
    match params.predictor {
        0 | 1 => Ok(data),
        2 => {
            params.validate()?;
            Ok(tiff_decode(data, params))
        }
        10..=15 => {
            params.validate()?;
            Ok(png_decode(&data, params))
        }
        other => Err(PDFError::UnsupportedFormat(format!("predictor {}", other))),
    }
}

/// Apply the predictor named by `params` ahead of compression
pub(super) fn encode(data: &[u8], params: &PredictorParams) -> PDFResult<Vec<u8>> {
    match params.predictor {
        0 | 1 => Ok(data.to_vec()),
        2 => {
            params.validate()?;
            Ok(tiff_encode(data, params))
        }
        10..=15 => {
            params.validate()?;
            let tag = match params.predictor {
                10 => 0,
                11 => 1,
                12 => 2,
                13 => 3,
                _ => 4,
            };
            Ok(png_encode(data, params, tag))
        }
        other => Err(PDFError::UnsupportedFormat(format!("predictor {}", other))),
    }
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn png_decode(data: &[u8], params: &PredictorParams) -> Vec<u8> {
    let row_len = params.bytes_per_row();
    let bpp = params.bytes_per_pixel();
    let mut output = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len.min(data.len())];

    for chunk in data.chunks(row_len + 1) {
        let tag = chunk[0];
        let mut row = chunk[1..].to_vec();
        if row.len() < row_len {
            warn!("PNG predictor: truncated last row ({} of {} bytes)", row.len(), row_len);
        }

        for i in 0..row.len() {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            row[i] = match tag {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    warn!("PNG predictor: unknown row tag {}, row kept as is", other);
                    row[i]
                }
            };
        }

        output.extend_from_slice(&row);
        prev[..row.len()].copy_from_slice(&row);
    }

    output
}

fn png_encode(data: &[u8], params: &PredictorParams, tag: u8) -> Vec<u8> {
    let row_len = params.bytes_per_row();
    let bpp = params.bytes_per_pixel();
    let mut output = Vec::with_capacity(data.len() + data.len() / row_len.max(1) + 1);
    let mut prev = vec![0u8; row_len.min(data.len())];

    for row in data.chunks(row_len) {
        output.push(tag);
        for i in 0..row.len() {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                _ => paeth(left, up, up_left),
            };
            output.push(row[i].wrapping_sub(predicted));
        }
        prev[..row.len()].copy_from_slice(row);
    }

    output
}

/// Read component `index` of a row packed at `bits` per component
fn read_component(row: &[u8], index: usize, bits: usize) -> u16 {
    match bits {
        8 => row[index] as u16,
        16 => (row[index * 2] as u16) << 8 | row[index * 2 + 1] as u16,
        _ => {
            let bit_pos = index * bits;
            let shift = 8 - bits - bit_pos % 8;
            ((row[bit_pos / 8] >> shift) as u16) & ((1 << bits) - 1)
        }
    }
}

fn write_component(row: &mut [u8], index: usize, bits: usize, value: u16) {
    match bits {
        8 => row[index] = value as u8,
        16 => {
            row[index * 2] = (value >> 8) as u8;
            row[index * 2 + 1] = value as u8;
        }
        _ => {
            let bit_pos = index * bits;
            let shift = 8 - bits - bit_pos % 8;
            let mask = (((1u16 << bits) - 1) as u8) << shift;
            let byte = &mut row[bit_pos / 8];
            *byte = (*byte & !mask) | (((value as u8) << shift) & mask);
        }
    }
}

/// Components fully contained in a row of `len` bytes
fn components_in(len: usize, params: &PredictorParams) -> usize {
    let full = params.columns * params.colors;
    full.min(len * 8 / params.bits_per_component)
}

fn tiff_decode(mut data: Vec<u8>, params: &PredictorParams) -> Vec<u8> {
    let row_len = params.bytes_per_row();
    let bits = params.bits_per_component;
    let colors = params.colors;
    let modulus: u32 = 1 << bits;

    for row in data.chunks_mut(row_len) {
        let count = components_in(row.len(), params);
        for i in colors..count {
            let left = read_component(row, i - colors, bits) as u32;
            let current = read_component(row, i, bits) as u32;
            write_component(row, i, bits, ((current + left) % modulus) as u16);
        }
    }
    data
}

fn tiff_encode(data: &[u8], params: &PredictorParams) -> Vec<u8> {
    let row_len = params.bytes_per_row();
    let bits = params.bits_per_component;
    let colors = params.colors;
    let modulus: u32 = 1 << bits;
    let mut output = data.to_vec();

    for (src, dst) in data.chunks(row_len).zip(output.chunks_mut(row_len)) {
        let count = components_in(src.len(), params);
        for i in colors..count {
            let left = read_component(src, i - colors, bits) as u32;
            let current = read_component(src, i, bits) as u32;
            write_component(dst, i, bits, ((current + modulus - left) % modulus) as u16);
        }
    }
    output
}
