//! Document reader: locate, decrypt, decode

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use log::{debug, trace, warn};
use lru::LruCache;
use crate::crypto::PDFCryptoEngine;
use crate::error::{PDFError, PDFResult};
use crate::handlers::{security_handler, StandardSecurityHandler};
use crate::tree::PageTree;
use crate::PDFPermissions;
use super::filter::FilterRegistry;
use super::object_stream::ObjectStream;
use super::source::{ByteSource, DEFAULT_WINDOW_SIZE};
use super::xref::{self, ResolvedLocation, XRefEntry, XRefTable};
use super::{Dictionary, ObjectId, ObjectResolver, PDFValue, Stream};

/// Parsed object streams kept around at most
const OBJECT_STREAM_CACHE: usize = 16;

/// Reference chains longer than this resolve to null
const MAX_REFERENCE_DEPTH: usize = 32;

/// Reader configuration
#[derive(Clone)]
pub struct ReaderOptions {
    /// Password tried as owner and user password; empty opens most restricted-only files
    pub password: Vec<u8>,
    /// Resolved objects kept in the LRU cache
    pub cache_capacity: usize,
    /// Size of each mapped window for file-backed readers
    pub window_size: u64,
    pub registry: Arc<FilterRegistry>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            password: Vec::new(),
            cache_capacity: 1024,
            window_size: DEFAULT_WINDOW_SIZE,
            registry: Arc::new(FilterRegistry::standard()),
        }
    }
}

impl fmt::Debug for ReaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderOptions")
            .field("password", &"<redacted>")
            .field("cache_capacity", &self.cache_capacity)
            .field("window_size", &self.window_size)
            .finish_non_exhaustive()
    }
}

impl ReaderOptions {
    pub fn with_password(password: impl Into<Vec<u8>>) -> Self {
        Self {
            password: password.into(),
            ..Self::default()
        }
    }
}

/// Reads objects from an existing PDF file on demand
pub struct PDFReader {
    source: ByteSource,
    xref: XRefTable,
    registry: Arc<FilterRegistry>,
    cache: LruCache<ObjectId, PDFValue>,
    object_streams: LruCache<u32, Arc<ObjectStream>>,
    security: Option<(StandardSecurityHandler, PDFCryptoEngine)>,
    encrypt_id: Option<ObjectId>,
    version: (u8, u8),
    rebuilt: bool,
    /// Objects being loaded, to stop self-referencing object streams
    loading: HashSet<ObjectId>,
}

impl PDFReader {
    /// Open a file through memory-mapped windows
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> PDFResult<Self> {
        let source = ByteSource::open(path, options.window_size)?;
        Self::from_source(source, options)
    }

    pub fn from_bytes(bytes: Vec<u8>, options: ReaderOptions) -> PDFResult<Self> {
        Self::from_source(ByteSource::Memory(bytes), options)
    }

    pub fn from_source(source: ByteSource, options: ReaderOptions) -> PDFResult<Self> {
        let mut reader = Self::unauthenticated(source, &options);
        reader.authenticate(&options.password)?;
        debug!(
            "Opened PDF {}.{} with {} cross-reference entries{}",
            reader.version.0,
            reader.version.1,
            reader.xref.len(),
            if reader.rebuilt { " (rebuilt)" } else { "" }
        );
        Ok(reader)
    }

    /// Reader over `source` that has not set up decryption yet
    pub(crate) fn unauthenticated(source: ByteSource, options: &ReaderOptions) -> Self {
        let registry = options.registry.clone();
        let version = header_version(&source);

        let (xref, rebuilt) = match load_xref(&source, &registry) {
            Ok(table) if table.trailer().get_reference("Root").is_some() => (table, false),
            Ok(table) => {
                warn!("Trailer has no /Root");
                let mut rebuilt = xref::rebuild(&source, &registry);
                rebuilt.trailer_mut().merge_missing(table.trailer());
                (rebuilt, true)
            }
            Err(err) => {
                warn!("Cross-reference data unusable: {}", err);
                (xref::rebuild(&source, &registry), true)
            }
        };

        let capacity = NonZeroUsize::new(options.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            xref,
            registry,
            cache: LruCache::new(capacity),
            object_streams: LruCache::new(
                NonZeroUsize::new(OBJECT_STREAM_CACHE).unwrap_or(NonZeroUsize::MIN),
            ),
            security: None,
            encrypt_id: None,
            version,
            rebuilt,
            loading: HashSet::new(),
        }
    }

    /// The `/Encrypt` dictionary named by the trailer, if any
    pub(crate) fn encryption_dictionary(&mut self) -> PDFResult<Option<Dictionary>> {
        let encrypt = match self.xref.trailer().get("Encrypt") {
            Some(PDFValue::Reference(id)) => {
                let id = *id;
                self.encrypt_id = Some(id);
                self.resolve(id)?
            }
            Some(value) => value.clone(),
            None => return Ok(None),
        };
        match encrypt {
            PDFValue::Dictionary(dict) => Ok(Some(dict)),
            other => Err(PDFError::InvalidObjectType {
                expected: "dictionary",
                found: other.type_name(),
            }),
        }
    }

    /// First string of the trailer `/ID`, empty when absent
    pub(crate) fn file_id(&self) -> Vec<u8> {
        self.xref
            .trailer()
            .get_array("ID")
            .and_then(|ids| ids.first())
            .and_then(PDFValue::as_string)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    fn authenticate(&mut self, password: &[u8]) -> PDFResult<()> {
        let Some(encrypt) = self.encryption_dictionary()? else {
            return Ok(());
        };
        let handler = security_handler(&encrypt, &self.file_id())?;
        let key = handler.authenticate_password(password)?;
        let engine = handler.engine(&key)?;
        debug!("Authenticated {} document", handler.algorithm());

        self.security = Some((handler, engine));
        // Anything cached so far was read without decryption
        self.cache.clear();
        self.object_streams.clear();
        Ok(())
    }

    /// Object number of the encryption dictionary when it is an indirect object
    pub fn encrypt_id(&self) -> Option<ObjectId> {
        self.encrypt_id
    }

    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    pub fn xref(&self) -> &XRefTable {
        &self.xref
    }

    pub fn is_encrypted(&self) -> bool {
        self.security.is_some()
    }

    /// Permissions granted by the security handler
    pub fn permissions(&self) -> Option<PDFPermissions> {
        self.security.as_ref().map(|(handler, _)| handler.permissions())
    }

    pub fn security_handler(&self) -> Option<&StandardSecurityHandler> {
        self.security.as_ref().map(|(handler, _)| handler)
    }

    /// Whether the cross-reference table came from a full scan
    pub fn was_rebuilt(&self) -> bool {
        self.rebuilt
    }

    /// Identities of every object in use
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.xref
            .entries()
            .filter_map(|(number, entry)| match *entry {
                XRefEntry::Offset { generation, .. } if number > 0 => {
                    Some(ObjectId::new(number, generation))
                }
                XRefEntry::InObjectStream { .. } => Some(ObjectId::new(number, 0)),
                _ => None,
            })
            .collect()
    }

    /// Object `id`, decrypted; free or unreadable objects are null
    pub fn resolve(&mut self, id: ObjectId) -> PDFResult<PDFValue> {
        if let Some(value) = self.cache.get(&id) {
            return Ok(value.clone());
        }
        if !self.loading.insert(id) {
            warn!("Object {} refers to itself while loading", id);
            return Ok(PDFValue::Null);
        }
        let loaded = self.load(id);
        self.loading.remove(&id);

        let value = match loaded {
            Ok(value) => value,
            Err(err) if err.is_auth_error() || matches!(err, PDFError::Io(_)) => return Err(err),
            Err(err) if !self.rebuilt => {
                warn!("Cannot read object {} ({}), rebuilding cross-references", id, err);
                self.rebuild_index();
                return self.resolve(id);
            }
            Err(err) => {
                warn!("Cannot read object {}: {}", id, err);
                PDFValue::Null
            }
        };
        self.cache.put(id, value.clone());
        Ok(value)
    }

    fn rebuild_index(&mut self) {
        let mut table = xref::rebuild(&self.source, &self.registry);
        table.trailer_mut().merge_missing(self.xref.trailer());
        self.xref = table;
        self.rebuilt = true;
        self.cache.clear();
        self.object_streams.clear();
    }

    fn load(&mut self, id: ObjectId) -> PDFResult<PDFValue> {
        match self.xref.resolve(id.number, id.generation) {
            ResolvedLocation::Free => {
                trace!("Object {} is free", id);
                Ok(PDFValue::Null)
            }
            ResolvedLocation::Offset(offset) => self.load_at(id, offset),
            ResolvedLocation::ObjectStreamSlot { stream, index } => {
                self.load_from_object_stream(id, stream, index as usize)
            }
        }
    }

    fn load_at(&self, id: ObjectId, offset: u64) -> PDFResult<PDFValue> {
        let (found, mut value) = self
            .source
            .read_object_at(offset, |length| self.lookup_integer(length))?;
        if found != id {
            return Err(PDFError::xref(format!("offset {} holds {} instead of {}", offset, found, id)));
        }
        if let Some((_, engine)) = &self.security {
            if self.encrypt_id != Some(id) {
                engine.decrypt_object(id, &mut value)?;
            }
        }
        Ok(value)
    }

    /// Integer object read without caching, for indirect stream lengths
    fn lookup_integer(&self, id: ObjectId) -> Option<i64> {
        if let Some(value) = self.cache.peek(&id) {
            return value.as_i64();
        }
        match self.xref.resolve(id.number, id.generation) {
            ResolvedLocation::Offset(offset) => {
                let (_, value) = self.source.read_object_at(offset, |_| None).ok()?;
                value.as_i64()
            }
            ResolvedLocation::ObjectStreamSlot { stream, index } => {
                let objects = self.object_streams.peek(&stream)?;
                objects.get(index as usize).ok()?.1.as_i64()
            }
            ResolvedLocation::Free => None,
        }
    }

    fn load_from_object_stream(&mut self, id: ObjectId, stream: u32, index: usize) -> PDFResult<PDFValue> {
        let objects = self.object_stream(stream)?;
        let (number, value) = objects.get(index)?;
        if number == id.number {
            return Ok(value);
        }
        // Slot numbers disagree with the xref; trust the object stream header
        let slot = objects.object_numbers().position(|n| n == id.number);
        match slot {
            Some(slot) => Ok(objects.get(slot)?.1),
            None => Err(PDFError::xref(format!("object {} not in object stream {}", id, stream))),
        }
    }

    fn object_stream(&mut self, number: u32) -> PDFResult<Arc<ObjectStream>> {
        if let Some(objects) = self.object_streams.get(&number) {
            return Ok(objects.clone());
        }
        let container = match self.resolve(ObjectId::new(number, 0))? {
            PDFValue::Stream(stream) => stream,
            other => {
                return Err(PDFError::InvalidObjectType {
                    expected: "object stream",
                    found: other.type_name(),
                })
            }
        };
        let objects = Arc::new(ObjectStream::parse(&container, &self.registry)?);
        self.object_streams.put(number, objects.clone());
        Ok(objects)
    }

    /// Follow references until a direct value is reached
    pub fn resolve_value(&mut self, value: &PDFValue) -> PDFResult<PDFValue> {
        let mut current = value.clone();
        for _ in 0..MAX_REFERENCE_DEPTH {
            match current {
                PDFValue::Reference(id) => current = self.resolve(id)?,
                other => return Ok(other),
            }
        }
        warn!("Reference chain longer than {} links", MAX_REFERENCE_DEPTH);
        Ok(PDFValue::Null)
    }

    /// Dictionary named by `/Root`
    pub fn catalog(&mut self) -> PDFResult<Dictionary> {
        let root = self
            .trailer()
            .get("Root")
            .cloned()
            .ok_or_else(|| PDFError::MissingDictionaryEntry("Root".to_string()))?;
        match self.resolve_value(&root)? {
            PDFValue::Dictionary(dict) => Ok(dict),
            other => Err(PDFError::InvalidObjectType {
                expected: "dictionary",
                found: other.type_name(),
            }),
        }
    }

    /// Plain content of a stream read from this document
    pub fn decode_stream(&mut self, stream: &Stream) -> PDFResult<Vec<u8>> {
        let mut stream = stream.clone();
        for key in ["Filter", "DecodeParms"] {
            if let Some(PDFValue::Reference(id)) = stream.dict.get(key) {
                let id = *id;
                let value = self.resolve(id)?;
                stream.dict.set(key, value);
            }
        }
        if let Some(PDFValue::Array(params)) = stream.dict.get("DecodeParms") {
            let mut params = params.clone();
            for item in params.iter_mut() {
                if let PDFValue::Reference(id) = item {
                    *item = self.resolve(*id)?;
                }
            }
            stream.dict.set("DecodeParms", params);
        }
        stream.decoded_data(&self.registry)
    }

    /// Pages in document order
    pub fn pages(&mut self) -> PDFResult<Vec<ObjectId>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get_reference("Pages")
            .ok_or_else(|| PDFError::MissingDictionaryEntry("Pages".to_string()))?;
        PageTree::collect(self, root)
    }

    pub fn page_count(&mut self) -> PDFResult<usize> {
        Ok(self.pages()?.len())
    }

    /// Drop one object from the cache
    pub fn release(&mut self, id: ObjectId) {
        self.cache.pop(&id);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.object_streams.clear();
    }

    /// Release the cache and the mapped windows
    pub fn close(self) {
        debug!("Closing reader over {} bytes", self.source.len());
    }
}

impl ObjectResolver for PDFReader {
    fn resolve(&mut self, id: ObjectId) -> PDFResult<PDFValue> {
        PDFReader::resolve(self, id)
    }
}

fn load_xref(source: &ByteSource, registry: &FilterRegistry) -> PDFResult<XRefTable> {
    let offset = xref::find_startxref(source).ok_or_else(|| PDFError::xref("no startxref"))?;
    xref::read_chain(source, offset, registry)
}

/// `%PDF-x.y` from the first kilobyte, 1.4 when absent
fn header_version(source: &ByteSource) -> (u8, u8) {
    let parsed = source.read(0, 1024).ok().and_then(|head| {
        let at = head.windows(5).position(|w| w == b"%PDF-")?;
        let digits = head.get(at + 5..at + 8)?;
        match digits {
            [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
                Some((major - b'0', minor - b'0'))
            }
            _ => None,
        }
    });
    parsed.unwrap_or_else(|| {
        warn!("No PDF header found");
        (1, 4)
    })
}
