//! Byte sources backing a reader: owned bytes or a memory-mapped file

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;
use log::{debug, trace, warn};
use memmap2::{Mmap, MmapOptions};
use crate::error::{PDFError, PDFResult};
use super::lexer::is_whitespace;
use super::parser::{find_endstream, parse_indirect_object};
use super::{ObjectId, PDFValue, Stream};

/// Default size of one mapped window (1 GiB)
pub const DEFAULT_WINDOW_SIZE: u64 = 1 << 30;

/// Window sizes are rounded up to a multiple of this, which covers common page sizes and the
/// Windows allocation granularity
const WINDOW_ALIGNMENT: u64 = 1 << 16;

/// First chunk size for reads whose end is not known up front
const READ_AHEAD: usize = 64 * 1024;

/// A file mapped as consecutive read-only windows
pub struct MappedFile {
    windows: Vec<Mmap>,
    window_size: u64,
    len: u64,
}

impl MappedFile {
    pub fn open(path: impl AsRef<Path>, window_size: u64) -> PDFResult<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        let window_size = window_size.max(1).div_ceil(WINDOW_ALIGNMENT) * WINDOW_ALIGNMENT;

        let mut windows = Vec::new();
        let mut offset = 0u64;
        while offset < len {
            let size = (len - offset).min(window_size);
            // Safety: the mapping is read-only and the file must not be truncated while mapped
            let window = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(size as usize)
                    .map(&file)?
            };
            windows.push(window);
            offset += size;
        }
        debug!(
            "Mapped {} ({} bytes) in {} window(s)",
            path.as_ref().display(),
            len,
            windows.len()
        );

        Ok(Self {
            windows,
            window_size,
            len,
        })
    }

    fn read(&self, offset: u64, len: usize) -> Cow<'_, [u8]> {
        let index = (offset / self.window_size) as usize;
        let within = (offset % self.window_size) as usize;
        if let Some(window) = self.windows.get(index) {
            if within + len <= window.len() {
                return Cow::Borrowed(&window[within..within + len]);
            }
        }

        trace!("Read of {} bytes at {} crosses a window boundary", len, offset);
        let mut output = Vec::with_capacity(len);
        let mut position = offset;
        while output.len() < len {
            let index = (position / self.window_size) as usize;
            let within = (position % self.window_size) as usize;
            let Some(window) = self.windows.get(index) else { break };
            let take = (len - output.len()).min(window.len() - within);
            output.extend_from_slice(&window[within..within + take]);
            position += take as u64;
        }
        Cow::Owned(output)
    }
}

/// Random-access bytes of a PDF file
pub enum ByteSource {
    Memory(Vec<u8>),
    Mapped(MappedFile),
}

impl ByteSource {
    /// Map a file in windows of `window_size` bytes
    pub fn open(path: impl AsRef<Path>, window_size: u64) -> PDFResult<Self> {
        Ok(ByteSource::Mapped(MappedFile::open(path, window_size)?))
    }

    pub fn len(&self) -> u64 {
        match self {
            ByteSource::Memory(data) => data.len() as u64,
            ByteSource::Mapped(file) => file.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `len` bytes at `offset`, shorter at the end of the source.
    ///
    /// Reads inside one window are borrowed; reads crossing windows are copied.
    pub fn read(&self, offset: u64, len: usize) -> PDFResult<Cow<'_, [u8]>> {
        let total = self.len();
        if offset > total || (offset == total && len > 0) {
            return Err(PDFError::eof(format!("byte {} of a {} byte source", offset, total)));
        }
        let len = len.min((total - offset) as usize);
        Ok(match self {
            ByteSource::Memory(data) => {
                let start = offset as usize;
                Cow::Borrowed(&data[start..start + len])
            }
            ByteSource::Mapped(file) => file.read(offset, len),
        })
    }

    /// Hand `parse` growing chunks at `offset` until it has enough.
    ///
    /// `parse` also learns whether the chunk reaches the end of the source. Returning
    /// `PDFError::UnexpectedEof` before the end asks for a chunk four times larger.
    pub fn read_growing<T>(
        &self,
        offset: u64,
        mut parse: impl FnMut(&[u8], bool) -> PDFResult<T>,
    ) -> PDFResult<T> {
        let mut want = READ_AHEAD;
        loop {
            let chunk = self.read(offset, want)?;
            let complete = offset + chunk.len() as u64 >= self.len();
            match parse(&chunk, complete) {
                Err(PDFError::UnexpectedEof(_)) if !complete => {
                    trace!("{} bytes at {} were not enough", chunk.len(), offset);
                    want = want.saturating_mul(4);
                }
                result => return result,
            }
        }
    }

    /// Parse the indirect object at `offset`.
    ///
    /// Stream data is located through `/Length`; an indirect length is looked up with
    /// `length_of`. When the length is missing or does not land on `endstream`, the data runs up
    /// to the next `endstream` keyword instead.
    pub fn read_object_at(
        &self,
        offset: u64,
        mut length_of: impl FnMut(ObjectId) -> Option<i64>,
    ) -> PDFResult<(ObjectId, PDFValue)> {
        let parsed = self.read_growing(offset, |chunk, _| parse_indirect_object(chunk, 0))?;

        let (id, dict, stream_start) = match (parsed.value, parsed.stream_start) {
            (PDFValue::Dictionary(dict), Some(start)) => (parsed.id, dict, start),
            (value, _) => return Ok((parsed.id, value)),
        };

        let data_start = offset + stream_start as u64;
        let declared = match dict.get("Length") {
            Some(PDFValue::Reference(length_id)) => length_of(*length_id),
            Some(value) => value.as_i64(),
            None => None,
        };
        let declared = declared
            .filter(|&n| n >= 0)
            .map(|n| n as usize)
            .filter(|&n| self.ends_stream(data_start, n));

        let data = match declared {
            Some(n) => self.read(data_start, n)?.into_owned(),
            None => {
                warn!("Stream {} has no usable /Length, searching for endstream", id);
                self.read_growing(data_start, |chunk, complete| match find_endstream(chunk, 0) {
                    Some(end) => Ok(chunk[..end].to_vec()),
                    None if complete => Ok(chunk.to_vec()),
                    None => Err(PDFError::eof("endstream")),
                })?
            }
        };
        Ok((id, PDFValue::Stream(Stream::encoded(dict, data))))
    }

    /// Check that `endstream` follows `len` bytes of data at `start`
    fn ends_stream(&self, start: u64, len: usize) -> bool {
        let end = start + len as u64;
        if end > self.len() {
            return false;
        }
        let Ok(tail) = self.read(end, 32) else { return false };
        let skip = tail.iter().take_while(|&&b| is_whitespace(b)).count();
        tail[skip..].starts_with(b"endstream")
    }
}
