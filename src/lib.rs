//! PDF document engine for Rust
//!
//! Reads and writes PDF object graphs: cross-reference tables and streams, the stream filter
//! chain, per-object encryption under the standard security handler, and the balanced name,
//! number and page trees.
//!
//! ```no_run
//! use pdf_engine::pdf::{PDFReader, ReaderOptions};
//!
//! let mut reader = PDFReader::open("document.pdf", ReaderOptions::with_password("secret"))?;
//! println!("{} pages", reader.page_count()?);
//! # Ok::<(), pdf_engine::PDFError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use log::{debug, info};

pub mod crypto;
pub mod error;
pub mod handlers;
pub mod pdf;
pub mod tree;

pub use error::{PDFError, PDFResult};

use pdf::{ByteSource, Dictionary, ObjectId, PDFReader, PDFValue, PDFWriter, ReaderOptions, WriterOptions};
use tree::page_with_inherited;

/// Supported encryption algorithms for PDF encryption
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    /// RC4 encryption with 40-bit key (PDF 1.3)
    RC4_40,
    /// RC4 encryption with 128-bit key (PDF 1.4)
    RC4_128,
    /// AES encryption with 128-bit key (PDF 1.6)
    AES_128,
    /// AES encryption with 256-bit key (PDF 1.7+/2.0)
    AES_256,
}

impl EncryptionAlgorithm {
    /// File key length in bytes
    pub fn key_length(&self) -> usize {
        match self {
            EncryptionAlgorithm::RC4_40 => 5,
            EncryptionAlgorithm::RC4_128 | EncryptionAlgorithm::AES_128 => 16,
            EncryptionAlgorithm::AES_256 => 32,
        }
    }

    pub fn is_aes(&self) -> bool {
        matches!(self, EncryptionAlgorithm::AES_128 | EncryptionAlgorithm::AES_256)
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionAlgorithm::RC4_40 => write!(f, "RC4-40"),
            EncryptionAlgorithm::RC4_128 => write!(f, "RC4-128"),
            EncryptionAlgorithm::AES_128 => write!(f, "AES-128"),
            EncryptionAlgorithm::AES_256 => write!(f, "AES-256"),
        }
    }
}

/// PDF permissions flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PDFPermissions(u32);

impl PDFPermissions {
    /// No permissions
    pub const NONE: u32 = 0;
    /// Print the document
    pub const PRINT: u32 = 1 << 2;
    /// Modify the document
    pub const MODIFY: u32 = 1 << 3;
    /// Copy text and graphics
    pub const COPY: u32 = 1 << 4;
    /// Add or modify annotations
    pub const ANNOTATE: u32 = 1 << 5;
    /// Fill form fields
    pub const FILL_FORMS: u32 = 1 << 8;
    /// Extract text and graphics for accessibility
    pub const EXTRACT: u32 = 1 << 9;
    /// Assemble the document
    pub const ASSEMBLE: u32 = 1 << 10;
    /// Print in high quality
    pub const PRINT_HIGH: u32 = 1 << 11;
    /// All permissions
    pub const ALL: u32 = 0xF_FFFF;

    /// Bits a writer may clear; every other bit of `/P` is written as 1
    const GRANTABLE: u32 = 0x0F3C;

    /// Create new permissions from raw bits
    pub fn new(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Get raw permission bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if specific permission is granted
    pub fn has_permission(&self, permission: u32) -> bool {
        (self.0 & permission) == permission
    }

    /// The `/P` value, reserved bits set
    pub fn to_p_value(&self) -> u32 {
        (self.0 & Self::GRANTABLE) | 0xFFFF_F0C0
    }
}

/// What the writer needs to encrypt a document
#[derive(Clone)]
pub struct EncryptionSettings {
    pub algorithm: EncryptionAlgorithm,
    pub user_password: Vec<u8>,
    pub owner_password: Vec<u8>,
    pub permissions: PDFPermissions,
    /// Encrypt `/Type /Metadata` streams; forced on for revisions without the switch
    pub encrypt_metadata: bool,
    /// Encrypt only embedded file streams
    pub embedded_files_only: bool,
}

impl EncryptionSettings {
    pub fn new(
        algorithm: EncryptionAlgorithm,
        user_password: impl Into<Vec<u8>>,
        owner_password: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            algorithm,
            user_password: user_password.into(),
            owner_password: owner_password.into(),
            permissions: PDFPermissions::new(PDFPermissions::ALL),
            encrypt_metadata: true,
            embedded_files_only: false,
        }
    }
}

impl fmt::Debug for EncryptionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionSettings")
            .field("algorithm", &self.algorithm)
            .field("user_password", &"<redacted>")
            .field("owner_password", &"<redacted>")
            .field("permissions", &self.permissions)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .field("embedded_files_only", &self.embedded_files_only)
            .finish()
    }
}

/// Whole-document encryption and decryption
#[derive(Debug, Clone, Default)]
pub struct PDFCrypto {
    writer_options: WriterOptions,
}

impl PDFCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout used for re-serialized documents; its `encryption` entry is replaced per call
    pub fn with_writer_options(writer_options: WriterOptions) -> Self {
        Self { writer_options }
    }

    /// Decrypt PDF with the user or owner password
    pub fn decrypt_with_password(&self, pdf_data: &[u8], password: &str) -> PDFResult<Vec<u8>> {
        let mut reader = PDFReader::from_bytes(
            pdf_data.to_vec(),
            ReaderOptions::with_password(password.as_bytes()),
        )?;
        let options = WriterOptions {
            encryption: None,
            ..self.writer_options.clone()
        };
        let output = copy_document(&mut reader, options)?;
        info!("Decrypted document: {} -> {} bytes", pdf_data.len(), output.len());
        Ok(output)
    }

    /// Encrypt a plain PDF
    pub fn encrypt_with_password(&self, pdf_data: &[u8], settings: EncryptionSettings) -> PDFResult<Vec<u8>> {
        let mut reader = PDFReader::from_bytes(pdf_data.to_vec(), ReaderOptions::default())?;
        if reader.is_encrypted() {
            return Err(PDFError::misuse("document is already encrypted"));
        }
        let algorithm = settings.algorithm;
        let options = WriterOptions {
            encryption: Some(settings),
            ..self.writer_options.clone()
        };
        let output = copy_document(&mut reader, options)?;
        info!("Encrypted document with {}: {} bytes", algorithm, output.len());
        Ok(output)
    }

    /// Get encryption information without needing a password
    pub fn get_encryption_info(&self, pdf_data: &[u8]) -> PDFResult<EncryptionInfo> {
        let source = ByteSource::Memory(pdf_data.to_vec());
        let mut reader = PDFReader::unauthenticated(source, &ReaderOptions::default());
        let Some(dict) = reader.encryption_dictionary()? else {
            return Ok(EncryptionInfo {
                algorithm: None,
                is_encrypted: false,
                encryption_type: EncryptionType::None,
            });
        };

        let filter = dict.get_name("Filter").unwrap_or_default();
        let encryption_type = match filter {
            b"Standard" => EncryptionType::Password,
            b"Adobe.PubSec" | b"Adobe.PPKLite" | b"Adobe.PPKMS" => EncryptionType::Certificate,
            _ => EncryptionType::Unknown,
        };
        let algorithm = match encryption_type {
            EncryptionType::Password => {
                Some(handlers::security_handler(&dict, &reader.file_id())?.algorithm())
            }
            _ => None,
        };
        Ok(EncryptionInfo {
            algorithm,
            is_encrypted: true,
            encryption_type,
        })
    }
}

/// Information about PDF encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    /// Known only for the standard security handler
    pub algorithm: Option<EncryptionAlgorithm>,
    pub is_encrypted: bool,
    pub encryption_type: EncryptionType,
}

/// Type of encryption used in PDF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionType {
    None,
    /// Password-based encryption
    Password,
    /// Certificate-based encryption
    Certificate,
    /// Unknown encryption type
    Unknown,
}

/// Re-serialize every live object of `reader` through a fresh writer
fn copy_document(reader: &mut PDFReader, options: WriterOptions) -> PDFResult<Vec<u8>> {
    let pages = reader.pages()?;
    let root = reader.trailer().get_reference("Root");
    let info = reader.trailer().get("Info").cloned();
    let info_id = info.as_ref().and_then(PDFValue::as_reference);
    let encrypt_id = reader.encrypt_id();

    let mut writer = PDFWriter::new(options);
    let mut renumbered: HashMap<ObjectId, ObjectId> = HashMap::new();
    for &page in &pages {
        renumbered.insert(page, writer.add_page(Dictionary::new()));
    }

    let mut bodies = Vec::new();
    for id in reader.object_ids() {
        if renumbered.contains_key(&id) || Some(id) == root || Some(id) == info_id || Some(id) == encrypt_id {
            continue;
        }
        let value = reader.resolve(id)?;
        if is_structural(&value) {
            continue;
        }
        renumbered.insert(id, writer.allocate());
        bodies.push((id, value));
    }

    for (old, value) in bodies {
        writer.set(renumbered[&old], renumber(value, &renumbered))?;
    }
    for &page in &pages {
        let mut dict = page_with_inherited(reader, page)?;
        dict.remove("Parent");
        writer.set(renumbered[&page], renumber(dict.into(), &renumbered))?;
    }

    let catalog = reader.catalog()?;
    for (key, value) in catalog.iter() {
        if key != b"Pages" {
            writer.catalog_mut().set(key, renumber(value.clone(), &renumbered));
        }
    }
    if let Some(info) = info {
        if let PDFValue::Dictionary(info) = renumber(reader.resolve_value(&info)?, &renumbered) {
            writer.set_info(info);
        }
    }

    debug!("Copying {} objects and {} pages", writer.len(), pages.len());
    writer.write_to(Vec::new())
}

/// Objects the writer regenerates itself
fn is_structural(value: &PDFValue) -> bool {
    let dict = match value {
        PDFValue::Dictionary(dict) => dict,
        PDFValue::Stream(stream) => &stream.dict,
        _ => return false,
    };
    ["Pages", "Catalog", "XRef", "ObjStm"]
        .iter()
        .any(|kind| dict.has_type(kind))
}

/// Rewrite references through `map`; references to dropped objects become null
fn renumber(value: PDFValue, map: &HashMap<ObjectId, ObjectId>) -> PDFValue {
    match value {
        PDFValue::Reference(id) => map
            .get(&id)
            .map_or(PDFValue::Null, |&new| PDFValue::Reference(new)),
        PDFValue::Array(items) => {
            PDFValue::Array(items.into_iter().map(|item| renumber(item, map)).collect())
        }
        PDFValue::Dictionary(dict) => PDFValue::Dictionary(renumber_dict(dict, map)),
        PDFValue::Stream(mut stream) => {
            stream.dict = renumber_dict(stream.dict, map);
            PDFValue::Stream(stream)
        }
        other => other,
    }
}

fn renumber_dict(dict: Dictionary, map: &HashMap<ObjectId, ObjectId>) -> Dictionary {
    let mut out = Dictionary::new();
    for (key, value) in dict.iter() {
        out.set(key, renumber(value.clone(), map));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use pretty_assertions::assert_eq;

    fn sample_pdf() -> Vec<u8> {
        let mut writer = PDFWriter::default();
        let mut content = pdf::Stream::new(Dictionary::new(), b"BT /F1 12 Tf (Hello) Tj ET".to_vec());
        content.dict.set("Filter", PDFValue::name("FlateDecode"));
        let content = writer.add(content);
        let mut page = Dictionary::with_type("Page");
        page.set_reference("Contents", content);
        page.set("MediaBox", vec![PDFValue::from(0), 0.into(), 612.into(), 792.into()]);
        writer.add_page(page);
        let mut info = Dictionary::new();
        info.set("Title", PDFValue::string("Sample"));
        writer.set_info(info);
        writer.write_to(Vec::new()).unwrap()
    }

    fn first_page_text(data: &[u8], password: &str) -> Vec<u8> {
        let mut reader = PDFReader::from_bytes(data.to_vec(), ReaderOptions::with_password(password)).unwrap();
        let page = reader.pages().unwrap()[0];
        let page = reader.resolve(page).unwrap();
        let contents = page.as_dict().unwrap().get("Contents").cloned().unwrap();
        let stream = reader.resolve_value(&contents).unwrap();
        reader.decode_stream(stream.as_stream().unwrap()).unwrap()
    }

    #[test_log::test]
    fn test_permissions() {
        let perms = PDFPermissions::new(PDFPermissions::PRINT | PDFPermissions::COPY);
        assert!(perms.has_permission(PDFPermissions::PRINT));
        assert!(perms.has_permission(PDFPermissions::COPY));
        assert!(!perms.has_permission(PDFPermissions::MODIFY));
        assert_eq!(perms.to_p_value(), 0xFFFF_F0D4);
        assert_eq!(PDFPermissions::new(PDFPermissions::NONE).to_p_value() as i32, -3904);
    }

    #[test_log::test]
    fn test_settings_debug_hides_passwords() {
        let settings = EncryptionSettings::new(EncryptionAlgorithm::AES_128, "user-secret", "owner-secret");
        let text = format!("{:?}", settings);
        assert!(!text.contains("secret"));
        assert!(text.contains("AES_128"));
    }

    #[rstest]
    #[case(EncryptionAlgorithm::RC4_40)]
    #[case(EncryptionAlgorithm::RC4_128)]
    #[case(EncryptionAlgorithm::AES_128)]
    #[case(EncryptionAlgorithm::AES_256)]
    fn test_password_encryption(#[case] algorithm: EncryptionAlgorithm) {
        let pdf_crypto = PDFCrypto::new();
        let sample = sample_pdf();

        let settings = EncryptionSettings::new(algorithm, "user123", "owner123");
        let encrypted = pdf_crypto.encrypt_with_password(&sample, settings).unwrap();
        assert!(!encrypted.windows(5).any(|w| w == b"Hello"));

        let info = pdf_crypto.get_encryption_info(&encrypted).unwrap();
        assert!(info.is_encrypted);
        assert_eq!(info.algorithm, Some(algorithm));
        assert_eq!(info.encryption_type, EncryptionType::Password);

        assert_eq!(first_page_text(&encrypted, "user123"), b"BT /F1 12 Tf (Hello) Tj ET".to_vec());
        assert_eq!(first_page_text(&encrypted, "owner123"), b"BT /F1 12 Tf (Hello) Tj ET".to_vec());

        let decrypted = pdf_crypto.decrypt_with_password(&encrypted, "user123").unwrap();
        assert!(!pdf_crypto.get_encryption_info(&decrypted).unwrap().is_encrypted);
        assert_eq!(first_page_text(&decrypted, ""), b"BT /F1 12 Tf (Hello) Tj ET".to_vec());

        let mut reader = PDFReader::from_bytes(decrypted, ReaderOptions::default()).unwrap();
        let info = reader.trailer().get("Info").cloned().unwrap();
        let info = reader.resolve_value(&info).unwrap();
        assert_eq!(info.as_dict().unwrap().get_string("Title"), Some(&b"Sample"[..]));
    }

    #[test_log::test]
    fn test_wrong_password() {
        let pdf_crypto = PDFCrypto::new();
        let settings = EncryptionSettings::new(EncryptionAlgorithm::AES_256, "user123", "owner123");
        let encrypted = pdf_crypto.encrypt_with_password(&sample_pdf(), settings).unwrap();
        let result = pdf_crypto.decrypt_with_password(&encrypted, "nope");
        assert!(matches!(result, Err(PDFError::AuthenticationFailed)));
    }

    #[test_log::test]
    fn test_encrypting_twice_is_rejected() {
        let pdf_crypto = PDFCrypto::new();
        let settings = EncryptionSettings::new(EncryptionAlgorithm::RC4_128, "", "owner");
        let encrypted = pdf_crypto.encrypt_with_password(&sample_pdf(), settings.clone()).unwrap();
        assert!(matches!(
            pdf_crypto.encrypt_with_password(&encrypted, settings),
            Err(PDFError::ApiMisuse(_))
        ));
    }

    #[test_log::test]
    fn test_page_attributes_survive_copy() {
        let pdf_crypto = PDFCrypto::new();
        let settings = EncryptionSettings::new(EncryptionAlgorithm::AES_128, "", "owner");
        let encrypted = pdf_crypto.encrypt_with_password(&sample_pdf(), settings).unwrap();
        let mut reader = PDFReader::from_bytes(encrypted, ReaderOptions::default()).unwrap();
        let page = reader.pages().unwrap()[0];
        let page = reader.resolve(page).unwrap();
        let media_box = page.as_dict().unwrap().get_array("MediaBox").unwrap();
        assert_eq!(media_box.len(), 4);
    }
}
