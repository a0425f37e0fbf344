//! Document writer: encode, encrypt, serialize

use std::collections::BTreeMap;
use std::io::Write;
use log::{debug, trace};
use rand::{thread_rng, RngCore};
use crate::crypto::PDFCryptoEngine;
use crate::error::{PDFError, PDFResult};
use crate::handlers::StandardSecurityHandler;
use crate::tree::{PageTree, DEFAULT_LEAF_SIZE};
use crate::{EncryptionAlgorithm, EncryptionSettings};
use super::filter::{FilterRegistry, DEFAULT_COMPRESSION_LEVEL};
use super::object_stream::ObjectStreamBuilder;
use super::xref::{XRefEntry, XRefTable};
use super::{Dictionary, ObjectId, ObjectResolver, PDFValue};

/// Binary comment written after the header so transfer tools treat the file as binary
const BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3\n";

/// Writer configuration
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Header version, raised when a feature needs a newer one
    pub version: (u8, u8),
    /// Write a cross-reference stream instead of a classic table
    pub xref_stream: bool,
    /// Pack eligible objects into object streams; implies `xref_stream`
    pub object_streams: bool,
    pub objects_per_stream: usize,
    /// Flate level 0..=9
    pub compression_level: u32,
    /// Children per page tree node
    pub leaf_size: usize,
    /// Keep every page under the root `/Pages` node
    pub linear_page_mode: bool,
    pub encryption: Option<EncryptionSettings>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            version: (1, 7),
            xref_stream: false,
            object_streams: false,
            objects_per_stream: 100,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            leaf_size: DEFAULT_LEAF_SIZE,
            linear_page_mode: false,
            encryption: None,
        }
    }
}

/// Sink wrapper tracking the number of bytes written
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    fn put(&mut self, bytes: &[u8]) -> PDFResult<()> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

/// Builds a new PDF document.
///
/// Objects are numbered from 1 in allocation order; a freed number is handed out again with
/// its generation increased. [`PDFWriter::write_to`] adds the catalog, page tree, info and
/// encryption dictionaries and serializes everything.
pub struct PDFWriter {
    options: WriterOptions,
    registry: FilterRegistry,
    objects: BTreeMap<u32, (u16, PDFValue)>,
    /// Freed numbers with the generation of their next tenant
    free: BTreeMap<u32, u16>,
    next_number: u32,
    catalog: Dictionary,
    info: Option<Dictionary>,
    pages: PageTree,
}

impl Default for PDFWriter {
    fn default() -> Self {
        Self::new(WriterOptions::default())
    }
}

impl PDFWriter {
    pub fn new(options: WriterOptions) -> Self {
        let registry = FilterRegistry::standard().with_compression_level(options.compression_level);
        let pages = PageTree::new(options.leaf_size, options.linear_page_mode);
        Self {
            options,
            registry,
            objects: BTreeMap::new(),
            free: BTreeMap::new(),
            next_number: 1,
            catalog: Dictionary::with_type("Catalog"),
            info: None,
            pages,
        }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Reserve an identity; the object is `null` until [`PDFWriter::set`] fills it
    pub fn allocate(&mut self) -> ObjectId {
        let id = match self.free.pop_first() {
            Some((number, generation)) => ObjectId::new(number, generation),
            None => {
                let number = self.next_number;
                self.next_number += 1;
                ObjectId::new(number, 0)
            }
        };
        self.objects.insert(id.number, (id.generation, PDFValue::Null));
        trace!("Allocated object {}", id);
        id
    }

    pub fn add(&mut self, value: impl Into<PDFValue>) -> ObjectId {
        let id = self.allocate();
        if let Some(slot) = self.objects.get_mut(&id.number) {
            slot.1 = value.into();
        }
        id
    }

    /// Replace the value of a live object
    pub fn set(&mut self, id: ObjectId, value: impl Into<PDFValue>) -> PDFResult<()> {
        match self.objects.get_mut(&id.number) {
            Some((generation, slot)) if *generation == id.generation => {
                *slot = value.into();
                Ok(())
            }
            _ => Err(PDFError::misuse(format!("object {} is not live", id))),
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&PDFValue> {
        match self.objects.get(&id.number) {
            Some((generation, value)) if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut PDFValue> {
        match self.objects.get_mut(&id.number) {
            Some((generation, value)) if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Release an object; its number comes back from `allocate` with the next generation
    pub fn free(&mut self, id: ObjectId) -> PDFResult<()> {
        if self.get(id).is_none() {
            return Err(PDFError::misuse(format!("object {} is not live", id)));
        }
        self.objects.remove(&id.number);
        self.pages.remove(id);
        match id.generation.checked_add(1) {
            Some(next) => {
                self.free.insert(id.number, next);
            }
            // A slot whose generation is exhausted is never reused
            None => debug!("Object number {} retired", id.number),
        }
        Ok(())
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Append a page; `/Type /Page` is filled in when missing
    pub fn add_page(&mut self, mut page: Dictionary) -> ObjectId {
        if !page.contains_key("Type") {
            page.set("Type", PDFValue::name("Page"));
        }
        let id = self.add(page);
        self.pages.push(id);
        id
    }

    pub fn pages(&self) -> &[ObjectId] {
        self.pages.pages()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// See [`PageTree::reorder`]
    pub fn reorder_pages(&mut self, order: &[usize]) -> PDFResult<()> {
        self.pages.reorder(order)
    }

    pub fn set_info(&mut self, info: Dictionary) {
        self.info = Some(info);
    }

    /// Catalog entries other than `/Pages`, which is written from the page tree
    pub fn catalog_mut(&mut self) -> &mut Dictionary {
        &mut self.catalog
    }

    fn header_version(&self) -> (u8, u8) {
        let mut required = (1, 0);
        if self.options.xref_stream || self.options.object_streams {
            required = (1, 5);
        }
        match self.options.encryption.as_ref().map(|e| e.algorithm) {
            Some(EncryptionAlgorithm::AES_256) => required = required.max((1, 7)),
            Some(EncryptionAlgorithm::AES_128) => required = required.max((1, 6)),
            Some(EncryptionAlgorithm::RC4_128) => required = required.max((1, 4)),
            _ => {}
        }
        if required > self.options.version {
            debug!(
                "Raising header version from {}.{} to {}.{}",
                self.options.version.0, self.options.version.1, required.0, required.1
            );
        }
        self.options.version.max(required)
    }

    /// Serialize the document and hand back the sink
    pub fn write_to<W: Write>(mut self, sink: W) -> PDFResult<W> {
        let mut file_id = vec![0u8; 16];
        thread_rng().fill_bytes(&mut file_id);

        let security = match &self.options.encryption {
            Some(settings) => {
                let handler = StandardSecurityHandler::new(settings, &file_id)?;
                let key = handler
                    .file_key()
                    .ok_or_else(|| PDFError::misuse("security handler has no file key"))?;
                let engine = handler.engine(key)?;
                Some((engine, handler.to_dict()))
            }
            None => None,
        };

        let pages_root = self.allocate();
        let pages = self.pages.clone();
        pages.build(&mut self, pages_root)?;
        let mut catalog = std::mem::take(&mut self.catalog);
        catalog.set("Type", PDFValue::name("Catalog"));
        catalog.set_reference("Pages", pages_root);
        let root = self.add(catalog);
        let info = self.info.take().map(|info| self.add(info));

        let (engine, encrypt_id) = match security {
            Some((engine, dict)) => (Some(engine), Some(self.add(dict))),
            None => (None, None),
        };

        let use_object_streams = self.options.object_streams;
        let use_xref_stream = self.options.xref_stream || use_object_streams;
        let mut xref = XRefTable::new();
        for (&number, &generation) in &self.free {
            xref.insert(number, XRefEntry::Free { next: 0, generation });
        }

        let packed = if use_object_streams {
            self.pack_object_streams(encrypt_id, &mut xref)
        } else {
            Vec::new()
        };

        let version = self.header_version();
        let mut out = CountingWriter { inner: sink, written: 0 };
        out.put(format!("%PDF-{}.{}\n", version.0, version.1).as_bytes())?;
        out.put(BINARY_MARKER)?;

        let objects = std::mem::take(&mut self.objects);
        for (number, (generation, value)) in objects {
            if packed.contains(&number) {
                continue;
            }
            let id = ObjectId::new(number, generation);
            let encrypt = if encrypt_id == Some(id) { None } else { engine.as_ref() };
            xref.insert(number, XRefEntry::Offset { offset: out.written, generation });
            let bytes = self.serialize_object(id, value, encrypt)?;
            out.put(&bytes)?;
        }

        let mut trailer = Dictionary::new();
        trailer.set_reference("Root", root);
        if let Some(info) = info {
            trailer.set_reference("Info", info);
        }
        trailer.set(
            "ID",
            vec![
                PDFValue::hex_string(file_id.clone()),
                PDFValue::hex_string(file_id),
            ],
        );
        if let Some(encrypt) = encrypt_id {
            trailer.set_reference("Encrypt", encrypt);
        }

        let startxref = out.written;
        if use_xref_stream {
            let id = ObjectId::new(self.next_number, 0);
            xref.insert(id.number, XRefEntry::Offset { offset: startxref, generation: 0 });
            let mut stream = xref.to_stream(&trailer);
            stream.encode(&self.registry)?;
            let bytes = self.serialize_object(id, PDFValue::Stream(stream), None)?;
            out.put(&bytes)?;
        } else {
            let mut table = Vec::new();
            xref.write_classic(&mut table);
            trailer.set("Size", xref.size());
            table.extend_from_slice(b"trailer\n");
            trailer.write_to(&mut table);
            table.push(b'\n');
            out.put(&table)?;
        }
        out.put(format!("startxref\n{}\n%%EOF\n", startxref).as_bytes())?;
        debug!(
            "Wrote PDF {}.{}: {} objects, {} pages, {} bytes",
            version.0,
            version.1,
            xref.len(),
            self.pages.len(),
            out.written
        );
        Ok(out.inner)
    }

    /// Move eligible objects into object streams; returns the packed numbers
    fn pack_object_streams(&mut self, encrypt_id: Option<ObjectId>, xref: &mut XRefTable) -> Vec<u32> {
        let eligible: Vec<u32> = self
            .objects
            .iter()
            .filter(|&(number, (generation, value))| {
                *generation == 0
                    && !matches!(value, PDFValue::Stream(_))
                    && encrypt_id.map_or(true, |id| id.number != *number)
            })
            .map(|(&number, _)| number)
            .collect();

        let per_stream = self.options.objects_per_stream.max(1);
        let mut packed = Vec::with_capacity(eligible.len());
        for group in eligible.chunks(per_stream) {
            let mut builder = ObjectStreamBuilder::new();
            for &number in group {
                if let Some((_, value)) = self.objects.get(&number) {
                    builder.push(number, value);
                }
            }
            let container = self.add(builder.build());
            for (index, &number) in group.iter().enumerate() {
                xref.insert(
                    number,
                    XRefEntry::InObjectStream {
                        stream: container.number,
                        index: index as u32,
                    },
                );
            }
            packed.extend_from_slice(group);
        }
        debug!("Packed {} objects into object streams", packed.len());
        packed
    }

    /// `N G obj ... endobj` with streams encoded, then encrypted when an engine is given
    fn serialize_object(
        &self,
        id: ObjectId,
        mut value: PDFValue,
        engine: Option<&PDFCryptoEngine>,
    ) -> PDFResult<Vec<u8>> {
        if let PDFValue::Stream(stream) = &mut value {
            stream.encode(&self.registry)?;
        }
        if let Some(engine) = engine {
            engine.encrypt_object(id, &mut value)?;
        }
        let mut output = format!("{} {} obj\n", id.number, id.generation).into_bytes();
        value.write_to(&mut output);
        output.extend_from_slice(b"\nendobj\n");
        Ok(output)
    }
}

impl ObjectResolver for PDFWriter {
    fn resolve(&mut self, id: ObjectId) -> PDFResult<PDFValue> {
        Ok(self.get(id).cloned().unwrap_or(PDFValue::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn test_allocation_and_reuse() {
        let mut writer = PDFWriter::default();
        let first = writer.add(PDFValue::from(1));
        let second = writer.add(PDFValue::from(2));
        assert_eq!(first, ObjectId::new(1, 0));
        assert_eq!(second, ObjectId::new(2, 0));

        writer.free(first).unwrap();
        assert!(writer.get(first).is_none());
        assert!(writer.free(first).is_err());
        assert!(writer.set(first, PDFValue::Null).is_err());

        let reused = writer.allocate();
        assert_eq!(reused, ObjectId::new(1, 1));
        assert_eq!(writer.get(reused), Some(&PDFValue::Null));
        assert_eq!(writer.allocate(), ObjectId::new(3, 0));
    }

    #[test_log::test]
    fn test_classic_output_layout() {
        let mut writer = PDFWriter::default();
        writer.add_page(Dictionary::new());
        let bytes = writer.write_to(Vec::new()).unwrap();

        assert!(bytes.starts_with(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n"));
        assert!(bytes.ends_with(b"%%EOF\n"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("1 0 obj\n<</Type /Page/Parent 2 0 R>>"));
        assert!(text.contains("xref\n0 4\n0000000000 65535 f\r\n"));
        assert!(text.contains("/Root 3 0 R"));
    }

    #[test_log::test]
    fn test_version_raised_for_features() {
        let options = WriterOptions {
            version: (1, 4),
            object_streams: true,
            ..WriterOptions::default()
        };
        let bytes = PDFWriter::new(options).write_to(Vec::new()).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5\n"));
        assert!(!String::from_utf8_lossy(&bytes).contains("\nxref\n"));
    }

    #[test_log::test]
    fn test_offsets_point_at_objects() {
        let mut writer = PDFWriter::default();
        let id = writer.add(PDFValue::string(&b"payload"[..]));
        let bytes = writer.write_to(Vec::new()).unwrap();
        let text = String::from_utf8_lossy(&bytes).into_owned();

        // Skip the "startxref" keyword further down
        let xref_start = text.find("\nxref\n").unwrap() + 1;
        let line = text[xref_start..].lines().nth(2 + id.number as usize).unwrap();
        let offset: usize = line[..10].parse().unwrap();
        assert!(text[offset..].starts_with("1 0 obj\n(payload)"));
    }
}
