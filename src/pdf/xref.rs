//! PDF cross-reference table implementation

use std::collections::{BTreeMap, HashSet};
use byteorder::{BigEndian, ByteOrder};
use lazy_static::lazy_static;
use log::{debug, trace, warn};
use regex::bytes::Regex;
use crate::error::{PDFError, PDFResult};
use super::filter::FilterRegistry;
use super::lexer::{Lexer, TokenKind, TokenSource};
use super::object_stream::ObjectStream;
use super::parser::ObjectParser;
use super::source::ByteSource;
use super::{Dictionary, ObjectId, PDFValue, Stream};

lazy_static! {
    static ref OBJECT_HEADER: Regex = Regex::new(r"(\d+)\s+(\d+)\s+obj\b").unwrap();
    static ref TRAILER: Regex = Regex::new(r"trailer\s*<<").unwrap();
}

/// Bytes searched for `startxref` at the end of the file
const STARTXREF_WINDOW: usize = 1024;

/// Bytes scanned per step while rebuilding
const REBUILD_WINDOW: usize = 4 << 20;

/// Extra bytes read on both sides of a rebuild window so headers crossing its edges still match
const REBUILD_OVERLAP: usize = 256;

/// Generation written for the head of the free list
const FREE_HEAD_GENERATION: u16 = 65535;

/// Trailer keys that only describe the section they were read from
const SECTION_KEYS: [&str; 9] = [
    "Prev", "XRefStm", "Type", "W", "Index", "Length", "Filter", "DecodeParms", "DL",
];

/// Location of one object number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Object at a byte offset
    Offset { offset: u64, generation: u16 },
    /// Object held in slot `index` of object stream `stream`
    InObjectStream { stream: u32, index: u32 },
    /// Free slot; `generation` is the one the next tenant receives
    Free { next: u32, generation: u16 },
}

/// Outcome of looking up an object identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLocation {
    Offset(u64),
    ObjectStreamSlot { stream: u32, index: u32 },
    Free,
}

/// PDF cross-reference table with its trailer dictionary
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    entries: BTreeMap<u32, XRefEntry>,
    trailer: Dictionary,
}

impl XRefTable {
    /// Create new xref table
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, number: u32) -> Option<&XRefEntry> {
        self.entries.get(&number)
    }

    pub fn insert(&mut self, number: u32, entry: XRefEntry) {
        self.entries.insert(number, entry);
    }

    /// Entries ordered by object number
    pub fn entries(&self) -> impl Iterator<Item = (u32, &XRefEntry)> {
        self.entries.iter().map(|(&number, entry)| (number, entry))
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn trailer_mut(&mut self) -> &mut Dictionary {
        &mut self.trailer
    }

    pub fn set_trailer(&mut self, trailer: Dictionary) {
        self.trailer = trailer;
    }

    /// One more than the highest object number
    pub fn size(&self) -> u32 {
        self.entries
            .keys()
            .next_back()
            .map_or(1, |&n| n.saturating_add(1))
    }

    /// Locate `(number, generation)`; unknown numbers and stale generations are free
    pub fn resolve(&self, number: u32, generation: u16) -> ResolvedLocation {
        match self.entries.get(&number) {
            Some(&XRefEntry::Offset { offset, generation: g }) if g == generation => {
                ResolvedLocation::Offset(offset)
            }
            Some(&XRefEntry::InObjectStream { stream, index }) if generation == 0 => {
                ResolvedLocation::ObjectStreamSlot { stream, index }
            }
            _ => ResolvedLocation::Free,
        }
    }

    /// Add entries and trailer keys from an older section without overriding newer ones
    pub fn merge_older(&mut self, older: XRefTable) {
        for (number, entry) in older.entries {
            self.entries.entry(number).or_insert(entry);
        }
        self.trailer.merge_missing(&older.trailer);
    }

    /// Apply a hybrid file's `/XRefStm` section: it fills numbers that are free or missing here
    fn fill_from_stream(&mut self, stream_section: XRefTable) {
        for (number, entry) in stream_section.entries {
            match self.entries.get(&number) {
                None | Some(XRefEntry::Free { .. }) => {
                    self.entries.insert(number, entry);
                }
                Some(_) => {}
            }
        }
    }

    /// Free entries chained from object 0, each pointing at the next free number
    fn free_list(&self, size: u32) -> Vec<(u32, XRefEntry)> {
        let mut free: Vec<(u32, u16)> = (1..size)
            .filter_map(|number| match self.entries.get(&number) {
                Some(XRefEntry::Free { generation, .. }) => Some((number, *generation)),
                None => Some((number, 0)),
                Some(_) => None,
            })
            .collect();
        free.insert(0, (0, FREE_HEAD_GENERATION));

        let mut list = Vec::with_capacity(free.len());
        for (i, &(number, generation)) in free.iter().enumerate() {
            let next = free.get(i + 1).map_or(0, |&(n, _)| n);
            list.push((number, XRefEntry::Free { next, generation }));
        }
        list
    }

    fn entry_or_free(&self, number: u32, free: &BTreeMap<u32, XRefEntry>) -> XRefEntry {
        match free.get(&number) {
            Some(entry) => *entry,
            None => self
                .entries
                .get(&number)
                .copied()
                .unwrap_or(XRefEntry::Free { next: 0, generation: 0 }),
        }
    }

    /// Classic `xref` section covering objects `0..size`
    pub fn write_classic(&self, output: &mut Vec<u8>) {
        let size = self.size();
        let free: BTreeMap<u32, XRefEntry> = self.free_list(size).into_iter().collect();

        output.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        for number in 0..size {
            let line = match self.entry_or_free(number, &free) {
                XRefEntry::Offset { offset, generation } => {
                    format!("{:010} {:05} n\r\n", offset, generation)
                }
                XRefEntry::Free { next, generation } => {
                    format!("{:010} {:05} f\r\n", next, generation)
                }
                XRefEntry::InObjectStream { .. } => {
                    // Not expressible in a classic table; the writer forces a stream instead
                    warn!("Object {} lives in an object stream, written as free", number);
                    format!("{:010} {:05} f\r\n", 0, 0)
                }
            };
            output.extend_from_slice(line.as_bytes());
        }
        debug!("Wrote classic xref section with {} entries", size);
    }

    /// Cross-reference stream covering objects `0..size` with `trailer` keys merged in.
    ///
    /// The stream's own object must already have an entry. Field widths are the smallest
    /// that hold every value.
    pub fn to_stream(&self, trailer: &Dictionary) -> Stream {
        let size = self.size();
        let free: BTreeMap<u32, XRefEntry> = self.free_list(size).into_iter().collect();
        let rows: Vec<(u8, u64, u64)> = (0..size)
            .map(|number| match self.entry_or_free(number, &free) {
                XRefEntry::Free { next, generation } => (0, next as u64, generation as u64),
                XRefEntry::Offset { offset, generation } => (1, offset, generation as u64),
                XRefEntry::InObjectStream { stream, index } => (2, stream as u64, index as u64),
            })
            .collect();

        let w2 = byte_width(rows.iter().map(|r| r.1).max().unwrap_or(0)).max(1);
        let w3 = byte_width(rows.iter().map(|r| r.2).max().unwrap_or(0));
        let mut data = Vec::with_capacity(rows.len() * (1 + w2 + w3));
        for (kind, field2, field3) in rows {
            data.push(kind);
            data.extend_from_slice(&field2.to_be_bytes()[8 - w2..]);
            data.extend_from_slice(&field3.to_be_bytes()[8 - w3..]);
        }

        let mut dict = trailer.clone();
        dict.set("Type", PDFValue::name("XRef"));
        dict.set("Size", size);
        dict.set(
            "W",
            vec![PDFValue::from(1), PDFValue::from(w2), PDFValue::from(w3)],
        );
        dict.set("Index", vec![PDFValue::from(0), PDFValue::from(size)]);
        dict.set("Filter", PDFValue::name("FlateDecode"));
        debug!("Built xref stream with {} entries, /W [1 {} {}]", size, w2, w3);
        Stream::new(dict, data)
    }
}

fn byte_width(max: u64) -> usize {
    (64 - max.leading_zeros() as usize).div_ceil(8)
}

/// Offset named by the last `startxref` in the file
pub fn find_startxref(source: &ByteSource) -> Option<u64> {
    let len = source.len();
    let start = len.saturating_sub(STARTXREF_WINDOW as u64);
    let tail = source.read(start, STARTXREF_WINDOW).ok()?;
    let keyword = b"startxref";
    let at = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)?;
    let mut lexer = Lexer::at(&tail, at + keyword.len());
    let token = lexer.next_token().ok()?;
    if token.kind != TokenKind::Number {
        return None;
    }
    std::str::from_utf8(&token.value).ok()?.parse().ok()
}

/// Read the section at `offset` and everything reachable through `/Prev` and `/XRefStm`.
///
/// Newer sections win; a `/Prev` pointing back at a section already read ends the chain.
pub fn read_chain(source: &ByteSource, offset: u64, registry: &FilterRegistry) -> PDFResult<XRefTable> {
    let mut table = XRefTable::new();
    let mut visited = HashSet::new();
    let mut next = Some(offset);

    while let Some(offset) = next {
        if !visited.insert(offset) {
            warn!("Cross-reference chain loops back to offset {}", offset);
            break;
        }
        let mut section = read_section(source, offset, registry)?;

        if let Some(stream_offset) = section.trailer.get_integer("XRefStm") {
            if stream_offset >= 0 && visited.insert(stream_offset as u64) {
                match read_section(source, stream_offset as u64, registry) {
                    Ok(stream_section) => section.fill_from_stream(stream_section),
                    Err(err) => warn!("Ignoring unreadable /XRefStm section: {}", err),
                }
            }
        }

        next = section
            .trailer
            .get_integer("Prev")
            .filter(|&prev| prev >= 0)
            .map(|prev| prev as u64);
        table.merge_older(section);
    }

    for key in SECTION_KEYS {
        table.trailer.remove(key);
    }
    debug!("Read {} cross-reference entries from {} section(s)", table.len(), visited.len());
    Ok(table)
}

/// Read one classic section or cross-reference stream
pub fn read_section(source: &ByteSource, offset: u64, registry: &FilterRegistry) -> PDFResult<XRefTable> {
    let head = source.read(offset, 16)?;
    let skip = head
        .iter()
        .take_while(|&&b| super::lexer::is_whitespace(b))
        .count();
    if head[skip..].starts_with(b"xref") {
        source.read_growing(offset + (skip + 4) as u64, |chunk, complete| {
            if complete {
                return parse_classic_section(chunk);
            }
            if !chunk.windows(7).any(|w| w == b"trailer") {
                return Err(PDFError::eof("cross-reference trailer"));
            }
            // A chunk may cut the trailer dictionary anywhere
            match parse_classic_section(chunk) {
                Err(PDFError::XRefCorrupt(msg)) => Err(PDFError::XRefCorrupt(msg)),
                Err(_) => Err(PDFError::eof("cross-reference trailer")),
                result => result,
            }
        })
    } else {
        let (id, value) = source.read_object_at(offset, |_| None)?;
        match value {
            PDFValue::Stream(stream) if stream.dict.has_type("XRef") => {
                trace!("Cross-reference stream in object {}", id);
                parse_xref_stream(&stream, registry)
            }
            other => Err(PDFError::xref(format!(
                "offset {} holds a {}, not a cross-reference section",
                offset,
                other.type_name()
            ))),
        }
    }
}

/// Parse subsections and the trailer that follow the `xref` keyword
pub fn parse_classic_section(data: &[u8]) -> PDFResult<XRefTable> {
    let mut table = XRefTable::new();
    let mut lexer = Lexer::new(data);
    let mut first_subsection = true;

    loop {
        let token = lexer.next_token()?;
        if token.is_keyword("trailer") {
            let mut parser = ObjectParser::new(lexer);
            match parser.parse_value()? {
                PDFValue::Dictionary(dict) => table.trailer = dict,
                other => {
                    return Err(PDFError::xref(format!("trailer is a {}", other.type_name())))
                }
            }
            break;
        }
        if token.kind != TokenKind::Number {
            return Err(PDFError::xref("expected subsection header or trailer"));
        }
        let start = parse_field(&token.value)?;
        let count = parse_field(&lexer.next_token()?.value)?;

        let mut entries = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            let offset = lexer.next_token()?;
            let generation = lexer.next_token()?;
            let kind = lexer.next_token()?;
            let offset = parse_field(&offset.value)?;
            let generation = parse_field(&generation.value)?.min(u16::MAX as u64) as u16;
            let entry = match kind.value.as_slice() {
                b"n" => XRefEntry::Offset { offset, generation },
                b"f" => XRefEntry::Free {
                    next: offset.min(u32::MAX as u64) as u32,
                    generation,
                },
                _ => return Err(PDFError::xref("entry type must be n or f")),
            };
            entries.push(entry);
        }

        // A common producer bug numbers the first subsection from 1 while it starts with the
        // free-list head
        let start = match entries.first() {
            Some(XRefEntry::Free { generation: FREE_HEAD_GENERATION, .. })
                if first_subsection && start == 1 =>
            {
                warn!("First xref subsection starts at 1, renumbering from 0");
                0
            }
            _ => start,
        };
        first_subsection = false;

        for (i, entry) in entries.into_iter().enumerate() {
            let number = start + i as u64;
            if number <= u32::MAX as u64 {
                trace!("xref entry {}: {:?}", number, entry);
                table.entries.insert(number as u32, entry);
            }
        }
    }
    Ok(table)
}

fn parse_field(text: &[u8]) -> PDFResult<u64> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PDFError::xref(format!("bad number {:?}", String::from_utf8_lossy(text))))
}

/// Decode a `/Type /XRef` stream
pub fn parse_xref_stream(stream: &Stream, registry: &FilterRegistry) -> PDFResult<XRefTable> {
    let dict = &stream.dict;
    let widths: Vec<usize> = dict
        .get_array("W")
        .ok_or_else(|| PDFError::MissingDictionaryEntry("W".to_string()))?
        .iter()
        .map(|w| w.as_i64().filter(|&w| (0..=8).contains(&w)).map(|w| w as usize))
        .collect::<Option<_>>()
        .ok_or_else(|| PDFError::invalid_dict_value("W", "widths must be 0 to 8"))?;
    if widths.len() != 3 {
        return Err(PDFError::invalid_dict_value("W", "expected three widths"));
    }
    let size = dict.require_integer("Size")?;

    let index: Vec<(u64, u64)> = match dict.get_array("Index") {
        Some(items) => items
            .chunks(2)
            .filter_map(|pair| match pair {
                [start, count] => Some((start.as_i64()?.max(0) as u64, count.as_i64()?.max(0) as u64)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size.max(0) as u64)],
    };

    let data = stream.decoded_data(registry)?;
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        return Err(PDFError::invalid_dict_value("W", "zero row width"));
    }
    let mut rows = data.chunks_exact(row);

    let mut table = XRefTable::new();
    'sections: for (start, count) in index {
        for i in 0..count {
            let Some(bytes) = rows.next() else {
                warn!("Cross-reference stream ends before its /Index is covered");
                break 'sections;
            };
            let (kind, rest) = bytes.split_at(widths[0]);
            let (field2, field3) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { be_value(kind) };
            let (field2, field3) = (be_value(field2), be_value(field3));

            let entry = match kind {
                0 => XRefEntry::Free {
                    next: field2.min(u32::MAX as u64) as u32,
                    generation: field3.min(u16::MAX as u64) as u16,
                },
                1 => XRefEntry::Offset {
                    offset: field2,
                    generation: field3.min(u16::MAX as u64) as u16,
                },
                2 => XRefEntry::InObjectStream {
                    stream: field2.min(u32::MAX as u64) as u32,
                    index: field3.min(u32::MAX as u64) as u32,
                },
                other => {
                    trace!("Skipping xref stream entry of type {}", other);
                    continue;
                }
            };
            let number = start + i;
            if number <= u32::MAX as u64 {
                table.entries.insert(number as u32, entry);
            }
        }
    }

    let mut trailer = dict.clone();
    for key in SECTION_KEYS {
        if key != "Prev" {
            trailer.remove(key);
        }
    }
    table.trailer = trailer;
    debug!("Cross-reference stream holds {} entries", table.len());
    Ok(table)
}

fn be_value(bytes: &[u8]) -> u64 {
    match bytes.len() {
        0 => 0,
        n => BigEndian::read_uint(bytes, n),
    }
}

/// Rebuild the table by scanning the whole source for `N G obj`.
///
/// Later occurrences of a number override earlier ones. The trailer is the last readable
/// `trailer` dictionary, or is synthesized around the object whose `/Type` is `/Catalog`.
/// Objects inside object streams are indexed too.
pub fn rebuild(source: &ByteSource, registry: &FilterRegistry) -> XRefTable {
    rebuild_in_windows(source, registry, REBUILD_WINDOW)
}

fn rebuild_in_windows(source: &ByteSource, registry: &FilterRegistry, window: usize) -> XRefTable {
    warn!("Rebuilding cross-reference table by scanning {} bytes", source.len());
    let mut table = XRefTable::new();
    let mut trailers = Vec::new();
    let window = window.max(1);

    let mut base = 0u64;
    while base < source.len() {
        let lead = base.min(REBUILD_OVERLAP as u64) as usize;
        let start = base - lead as u64;
        let data = match source.read(start, lead + window + REBUILD_OVERLAP) {
            Ok(data) => data,
            Err(err) => {
                warn!("Rebuild scan stopped at byte {}: {}", base, err);
                break;
            }
        };
        // Matches starting in the overlap belong to the neighbouring window
        let owned = lead..lead + window;

        for capture in OBJECT_HEADER.captures_iter(&data) {
            let (Some(whole), Some(number), Some(generation)) =
                (capture.get(0), capture.get(1), capture.get(2))
            else {
                continue;
            };
            if !owned.contains(&whole.start()) {
                continue;
            }
            // Reject matches glued to a preceding number such as "12 0 obj" inside "112 0 obj"
            if whole.start() > 0 && data[whole.start() - 1].is_ascii_digit() {
                continue;
            }
            let (Ok(number), Ok(generation)) = (parse_field(number.as_bytes()), parse_field(generation.as_bytes())) else {
                continue;
            };
            if number > u32::MAX as u64 || generation > u16::MAX as u64 {
                continue;
            }
            table.entries.insert(
                number as u32,
                XRefEntry::Offset {
                    offset: start + whole.start() as u64,
                    generation: generation as u16,
                },
            );
        }
        trailers.extend(
            TRAILER
                .find_iter(&data)
                .map(|found| found.start())
                .filter(|at| owned.contains(at))
                .map(|at| start + at as u64),
        );
        base += window as u64;
    }

    // Trailer dictionaries, newest first
    for offset in trailers.into_iter().rev() {
        let parsed = source.read_growing(offset + b"trailer".len() as u64, |chunk, _| {
            ObjectParser::new(Lexer::new(chunk)).parse_value()
        });
        match parsed {
            Ok(PDFValue::Dictionary(dict)) if dict.get_reference("Root").is_some() => {
                table.trailer = dict;
                break;
            }
            Ok(_) => {}
            Err(err) => trace!("Unreadable trailer at {}: {}", offset, err),
        }
    }

    index_object_streams(source, registry, &mut table);

    if table.trailer.get_reference("Root").is_none() {
        match find_catalog(source, &table) {
            Some(root) => {
                debug!("Using catalog {} as /Root", root);
                table.trailer.set_reference("Root", root);
            }
            None => warn!("No catalog found while rebuilding"),
        }
    }
    for key in SECTION_KEYS {
        table.trailer.remove(key);
    }
    let size = table.size();
    table.trailer.set("Size", size);
    debug!("Rebuilt {} cross-reference entries", table.len());
    table
}

fn index_object_streams(source: &ByteSource, registry: &FilterRegistry, table: &mut XRefTable) {
    let candidates: Vec<(u32, u64)> = table
        .entries()
        .filter_map(|(number, entry)| match entry {
            XRefEntry::Offset { offset, .. } => Some((number, *offset)),
            _ => None,
        })
        .collect();

    for (number, offset) in candidates {
        let Ok((_, PDFValue::Stream(stream))) = source.read_object_at(offset, |_| None) else {
            continue;
        };
        if !stream.dict.has_type("ObjStm") {
            continue;
        }
        match ObjectStream::parse(&stream, registry) {
            Ok(objects) => {
                for (index, contained) in objects.object_numbers().enumerate() {
                    table.entries.entry(contained).or_insert(XRefEntry::InObjectStream {
                        stream: number,
                        index: index as u32,
                    });
                }
            }
            // Encrypted containers cannot be read before authentication
            Err(err) => trace!("Skipping object stream {}: {}", number, err),
        }
    }
}

fn find_catalog(source: &ByteSource, table: &XRefTable) -> Option<ObjectId> {
    table.entries().find_map(|(number, entry)| {
        let XRefEntry::Offset { offset, generation } = *entry else {
            return None;
        };
        match source.read_object_at(offset, |_| None) {
            Ok((_, PDFValue::Dictionary(dict))) if dict.has_type("Catalog") => {
                Some(ObjectId::new(number, generation))
            }
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn test_xref_parsing() {
        let data = b" \n0 3\n\
                     0000000000 65535 f\r\n\
                     0000000012 00000 n\r\n\
                     0000000234 00002 n\r\n\
                     trailer\n<< /Size 3 /Root 1 0 R >>";
        let table = parse_classic_section(data).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.resolve(1, 0), ResolvedLocation::Offset(12));
        assert_eq!(table.resolve(2, 2), ResolvedLocation::Offset(234));
        assert_eq!(table.resolve(2, 0), ResolvedLocation::Free);
        assert_eq!(table.resolve(7, 0), ResolvedLocation::Free);
        assert_eq!(table.trailer().get_reference("Root"), Some(ObjectId::new(1, 0)));
    }

    #[test_log::test]
    fn test_first_subsection_renumbered() {
        let data = b"1 2\n0000000000 65535 f \n0000000017 00000 n \ntrailer << >>";
        let table = parse_classic_section(data).unwrap();
        assert_eq!(table.resolve(1, 0), ResolvedLocation::Offset(17));
    }

    #[test_log::test]
    fn test_invalid_xref() {
        let data = b"0 2\ninvalid entry\n0000000234 00000 n \ntrailer << >>";
        assert!(matches!(parse_classic_section(data), Err(PDFError::XRefCorrupt(_))));
    }

    #[test_log::test]
    fn test_classic_output_links_free_list() {
        let mut table = XRefTable::new();
        table.insert(1, XRefEntry::Offset { offset: 15, generation: 0 });
        table.insert(2, XRefEntry::Free { next: 0, generation: 1 });
        table.insert(4, XRefEntry::Offset { offset: 99, generation: 0 });

        let mut output = Vec::new();
        table.write_classic(&mut output);
        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(lines[0], "xref\n0 5\n0000000002 65535 f");
        assert_eq!(lines[1], "0000000015 00000 n");
        assert_eq!(lines[2], "0000000003 00001 f");
        assert_eq!(lines[3], "0000000000 00000 f");
        assert_eq!(lines[4], "0000000099 00000 n");

        let reread = parse_classic_section(format!("{}trailer << >>", &text[4..]).as_bytes()).unwrap();
        assert_eq!(reread.resolve(4, 0), ResolvedLocation::Offset(99));
        assert_eq!(reread.get(2), Some(&XRefEntry::Free { next: 3, generation: 1 }));
    }

    #[test_log::test]
    fn test_stream_round_trip_with_minimal_widths() {
        let registry = FilterRegistry::standard();
        let mut table = XRefTable::new();
        table.insert(1, XRefEntry::Offset { offset: 70_000, generation: 0 });
        table.insert(2, XRefEntry::InObjectStream { stream: 3, index: 0 });
        table.insert(3, XRefEntry::Offset { offset: 500, generation: 0 });

        let mut trailer = Dictionary::new();
        trailer.set_reference("Root", ObjectId::new(2, 0));
        let mut stream = table.to_stream(&trailer);
        let widths: Vec<i64> = stream
            .dict
            .get_array("W")
            .unwrap()
            .iter()
            .map(|w| w.as_i64().unwrap())
            .collect();
        // The free-list head carries generation 65535
        assert_eq!(widths, vec![1, 3, 2]);

        stream.encode(&registry).unwrap();
        let parsed = parse_xref_stream(&stream, &registry).unwrap();
        assert_eq!(parsed.resolve(1, 0), ResolvedLocation::Offset(70_000));
        assert_eq!(
            parsed.resolve(2, 0),
            ResolvedLocation::ObjectStreamSlot { stream: 3, index: 0 }
        );
        assert_eq!(parsed.trailer().get_reference("Root"), Some(ObjectId::new(2, 0)));
        assert!(parsed.trailer().get("W").is_none());
    }

    #[test_log::test]
    fn test_merge_keeps_newest() {
        let mut newer = XRefTable::new();
        newer.insert(1, XRefEntry::Offset { offset: 900, generation: 0 });
        newer.trailer_mut().set("Size", 3);
        let mut older = XRefTable::new();
        older.insert(1, XRefEntry::Offset { offset: 100, generation: 0 });
        older.insert(2, XRefEntry::Offset { offset: 200, generation: 0 });
        older.trailer_mut().set("Size", 2);
        older.trailer_mut().set_reference("Root", ObjectId::new(1, 0));

        newer.merge_older(older);
        assert_eq!(newer.resolve(1, 0), ResolvedLocation::Offset(900));
        assert_eq!(newer.resolve(2, 0), ResolvedLocation::Offset(200));
        assert_eq!(newer.trailer().get_integer("Size"), Some(3));
        assert!(newer.trailer().get_reference("Root").is_some());
    }

    #[test_log::test]
    fn test_prev_cycle_is_cut() {
        let text = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\nxref\n0 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R /Prev 45 >>\nstartxref\n45\n%%EOF\n";
        let source = ByteSource::Memory(text.to_vec());
        assert_eq!(find_startxref(&source), Some(45));
        let table = read_chain(&source, 45, &FilterRegistry::standard()).unwrap();
        assert_eq!(table.resolve(1, 0), ResolvedLocation::Offset(9));
        assert!(table.trailer().get("Prev").is_none());
    }

    #[test_log::test]
    fn test_rebuild_finds_objects_and_catalog() {
        let text = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n2 0 obj\n<< /Type /Pages /Kids [] /Count 0 /Newer true >>\nendobj\n";
        let source = ByteSource::Memory(text.to_vec());
        let table = rebuild(&source, &FilterRegistry::standard());
        assert_eq!(table.resolve(1, 0), ResolvedLocation::Offset(9));
        let newer = text.windows(7).rposition(|w| w == b"2 0 obj").unwrap() as u64;
        assert_eq!(table.resolve(2, 0), ResolvedLocation::Offset(newer));
        assert_eq!(table.trailer().get_reference("Root"), Some(ObjectId::new(1, 0)));
        assert_eq!(table.trailer().get_integer("Size"), Some(3));
    }

    const SCATTERED: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
112 0 obj\n(glued)\nendobj\n2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
trailer\n<< /Size 3 /Root 1 0 R >>\n3 0 obj\n<< /Type /ObjStm /N 1000000000000000 /First 4 /Length 8 >>\n\
stream\n7 0 true\nendstream\nendobj\n";

    fn entries_of(table: &XRefTable) -> Vec<(u32, XRefEntry)> {
        table.entries().map(|(number, entry)| (number, *entry)).collect()
    }

    #[test_log::test]
    fn test_rebuild_windows_agree() {
        let registry = FilterRegistry::standard();
        let source = ByteSource::Memory(SCATTERED.to_vec());
        let whole = rebuild(&source, &registry);
        assert_eq!(whole.trailer().get_reference("Root"), Some(ObjectId::new(1, 0)));
        assert!(whole.get(112).is_some());

        for window in [1, 7, 40, 300] {
            let split = rebuild_in_windows(&source, &registry, window);
            assert_eq!(entries_of(&split), entries_of(&whole), "window of {} bytes", window);
            assert_eq!(split.trailer(), whole.trailer());
        }
    }

    #[test_log::test]
    fn test_rebuild_survives_huge_object_stream_count() {
        let source = ByteSource::Memory(SCATTERED.to_vec());
        let table = rebuild(&source, &FilterRegistry::standard());
        assert_eq!(
            table.resolve(7, 0),
            ResolvedLocation::ObjectStreamSlot { stream: 3, index: 0 }
        );
    }

    #[test_log::test]
    fn test_long_classic_section_is_read_in_chunks() {
        let mut table = XRefTable::new();
        for number in 1..=6000u32 {
            table.insert(number, XRefEntry::Offset { offset: number as u64 * 10, generation: 0 });
        }
        let mut data = b"%PDF-1.4\n".to_vec();
        let offset = data.len() as u64;
        table.write_classic(&mut data);
        data.extend_from_slice(b"trailer\n<< /Size 6001 /Root 1 0 R >>\nstartxref\n9\n%%EOF\n");
        assert!(data.len() > 100_000);

        let section = read_section(&ByteSource::Memory(data), offset, &FilterRegistry::standard()).unwrap();
        assert_eq!(section.resolve(6000, 0), ResolvedLocation::Offset(60_000));
        assert_eq!(section.trailer().get_integer("Size"), Some(6001));
    }

    #[test_log::test]
    fn test_classic_section_without_trailer() {
        let data = b"xref\n0 1\n0000000000 65535 f \n".to_vec();
        assert!(read_section(&ByteSource::Memory(data), 0, &FilterRegistry::standard()).is_err());
    }

    #[test_log::test]
    fn test_xref_stream_with_oversized_fields() {
        let registry = FilterRegistry::standard();
        let mut dict = Dictionary::with_type("XRef");
        dict.set("W", vec![PDFValue::from(1), PDFValue::from(8), PDFValue::from(8)]);
        dict.set("Size", 1_000_000_000_000i64);
        dict.set("Index", vec![PDFValue::from(u32::MAX as i64 - 1), PDFValue::from(1_000_000_000_000i64)]);
        let mut row = vec![2u8];
        row.extend_from_slice(&u64::MAX.to_be_bytes());
        row.extend_from_slice(&u64::MAX.to_be_bytes());
        let first = row.clone();
        row.extend_from_slice(&first);
        row.extend_from_slice(&[1u8; 17]);
        let stream = Stream::new(dict, row);

        let table = parse_xref_stream(&stream, &registry).unwrap();
        assert_eq!(
            table.get(u32::MAX - 1),
            Some(&XRefEntry::InObjectStream { stream: u32::MAX, index: u32::MAX })
        );
        assert_eq!(table.len(), 2);
    }
}
