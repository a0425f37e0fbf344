//! Core cryptographic engine implementation

use std::fmt;
use std::io::{self, Write};
use log::{trace, warn};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;
use crate::error::{PDFError, PDFResult};
use crate::pdf::{FilterSpec, ObjectId, PDFValue, Stream};
use crate::EncryptionAlgorithm;
use super::{AesDecryptor, AesEncryptor, CryptoProvider, Rc4Cipher};

/// How AES-256 object keys relate to the file key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectKeyPolicy {
    /// SHA-256 over the file key and object position
    #[default]
    Derived,
    /// The file key itself, as security handler revisions 5 and 6 require
    FileKey,
}

/// Encrypts and decrypts object payloads under one file key
#[derive(Clone)]
pub struct PDFCryptoEngine {
    algorithm: EncryptionAlgorithm,
    file_key: Zeroizing<Vec<u8>>,
    key_policy: ObjectKeyPolicy,
    encrypt_metadata: bool,
    embedded_files_only: bool,
}

impl fmt::Debug for PDFCryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PDFCryptoEngine")
            .field("algorithm", &self.algorithm)
            .field("key_policy", &self.key_policy)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .field("embedded_files_only", &self.embedded_files_only)
            .finish_non_exhaustive()
    }
}

impl PDFCryptoEngine {
    /// Create an engine, checking the file key length against the algorithm
    pub fn new(algorithm: EncryptionAlgorithm, file_key: &[u8]) -> PDFResult<Self> {
        let valid = match algorithm {
            EncryptionAlgorithm::RC4_40 => file_key.len() == 5,
            EncryptionAlgorithm::RC4_128 => (5..=16).contains(&file_key.len()),
            EncryptionAlgorithm::AES_128 => file_key.len() == 16,
            EncryptionAlgorithm::AES_256 => file_key.len() == 32,
        };
        if !valid {
            return Err(PDFError::crypto_init(format!(
                "{} does not take a {}-byte file key",
                algorithm,
                file_key.len()
            )));
        }

        Ok(Self {
            algorithm,
            file_key: Zeroizing::new(file_key.to_vec()),
            key_policy: ObjectKeyPolicy::default(),
            encrypt_metadata: true,
            embedded_files_only: false,
        })
    }

    pub fn with_key_policy(mut self, policy: ObjectKeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }

    pub fn with_encrypt_metadata(mut self, encrypt_metadata: bool) -> Self {
        self.encrypt_metadata = encrypt_metadata;
        self
    }

    /// Only encipher `/EmbeddedFile` streams, leaving strings and other streams in clear
    pub fn with_embedded_files_only(mut self, embedded_files_only: bool) -> Self {
        self.embedded_files_only = embedded_files_only;
        self
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    pub fn embedded_files_only(&self) -> bool {
        self.embedded_files_only
    }

    /// Key for the object at `id`.
    ///
    /// MD5 of the file key, three low bytes of the object number and two of the generation (plus
    /// `sAlT` for AES), cut to `min(n + 5, 16)` bytes. AES-256 hashes the same input with SHA-256
    /// unless the policy says to use the file key as is.
    pub fn object_key(&self, id: ObjectId) -> Zeroizing<Vec<u8>> {
        if self.algorithm == EncryptionAlgorithm::AES_256
            && self.key_policy == ObjectKeyPolicy::FileKey
        {
            return self.file_key.clone();
        }

        let mut input = Zeroizing::new(Vec::with_capacity(self.file_key.len() + 9));
        input.extend_from_slice(&self.file_key);
        input.extend_from_slice(&id.number.to_le_bytes()[..3]);
        input.extend_from_slice(&id.generation.to_le_bytes());
        if self.algorithm.is_aes() {
            input.extend_from_slice(b"sAlT");
        }

        let key = match self.algorithm {
            EncryptionAlgorithm::AES_256 => Sha256::digest(input.as_slice()).to_vec(),
            _ => {
                let digest = md5::compute(input.as_slice()).0;
                digest[..(self.file_key.len() + 5).min(16)].to_vec()
            }
        };
        trace!("Derived {}-byte key for {}", key.len(), id);
        Zeroizing::new(key)
    }

    /// Streaming encryptor for the object at `id`
    pub fn encryptor(&self, id: ObjectId) -> PDFResult<Box<dyn CryptoProvider>> {
        let key = self.object_key(id);
        Ok(if self.algorithm.is_aes() {
            Box::new(AesEncryptor::new(&key)?)
        } else {
            Box::new(Rc4Cipher::new(&key)?)
        })
    }

    /// Streaming decryptor for the object at `id`
    pub fn decryptor(&self, id: ObjectId) -> PDFResult<Box<dyn CryptoProvider>> {
        let key = self.object_key(id);
        Ok(if self.algorithm.is_aes() {
            Box::new(AesDecryptor::new(&key)?)
        } else {
            Box::new(Rc4Cipher::new(&key)?)
        })
    }

    pub fn encrypt_bytes(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        let mut cipher = self.encryptor(id)?;
        let mut output = cipher.update(data)?;
        output.extend(cipher.finish()?);
        Ok(output)
    }

    pub fn decrypt_bytes(&self, id: ObjectId, data: &[u8]) -> PDFResult<Vec<u8>> {
        let mut cipher = self.decryptor(id)?;
        let mut output = cipher.update(data)?;
        output.extend(cipher.finish()?);
        Ok(output)
    }

    /// Wrap `sink` so everything written to it is encrypted for `id`
    pub fn writer<W: Write>(&self, id: ObjectId, sink: W) -> PDFResult<CipherWriter<W>> {
        Ok(CipherWriter::new(sink, self.encryptor(id)?))
    }

    /// Encipher the strings and stream payloads inside `value`
    pub fn encrypt_object(&self, id: ObjectId, value: &mut PDFValue) -> PDFResult<()> {
        self.transform(id, value, true)
    }

    /// Decipher the strings and stream payloads inside `value`
    pub fn decrypt_object(&self, id: ObjectId, value: &mut PDFValue) -> PDFResult<()> {
        self.transform(id, value, false)
    }

    fn transform(&self, id: ObjectId, value: &mut PDFValue, encrypt: bool) -> PDFResult<()> {
        match value {
            PDFValue::String(bytes, hex) => {
                if !self.embedded_files_only {
                    *bytes = self.apply(id, bytes, encrypt)?;
                    if encrypt {
                        // Ciphertext is written as a hex string
                        *hex = true;
                    }
                }
            }
            PDFValue::Array(items) => {
                for item in items.iter_mut() {
                    self.transform(id, item, encrypt)?;
                }
            }
            PDFValue::Dictionary(dict) => {
                for item in dict.values_mut() {
                    self.transform(id, item, encrypt)?;
                }
            }
            PDFValue::Stream(stream) => {
                let encipher = self.covers_stream(stream);
                for item in stream.dict.values_mut() {
                    self.transform(id, item, encrypt)?;
                }
                if encipher {
                    stream.data = self.apply(id, &stream.data, encrypt)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply(&self, id: ObjectId, data: &[u8], encrypt: bool) -> PDFResult<Vec<u8>> {
        if encrypt {
            self.encrypt_bytes(id, data)
        } else {
            self.decrypt_bytes(id, data)
        }
    }

    /// Whether the payload of `stream` is enciphered
    pub fn covers_stream(&self, stream: &Stream) -> bool {
        let dict = &stream.dict;
        let stream_type = dict.get_name("Type");
        if stream_type == Some(b"XRef".as_slice()) {
            return false;
        }
        match FilterSpec::from_dict(dict) {
            Ok(filters) if FilterSpec::names_crypt(&filters) => return false,
            Ok(_) => {}
            Err(err) => warn!("Unreadable /Filter on stream, enciphering anyway: {}", err),
        }
        if self.embedded_files_only {
            return stream_type == Some(b"EmbeddedFile".as_slice());
        }
        !(stream_type == Some(b"Metadata".as_slice()) && !self.encrypt_metadata)
    }
}

/// Byte sink that enciphers everything written through it.
///
/// Call [`CipherWriter::finish`] to flush the final block; dropping the writer loses it.
pub struct CipherWriter<W: Write> {
    sink: W,
    cipher: Box<dyn CryptoProvider>,
}

impl<W: Write> CipherWriter<W> {
    pub fn new(sink: W, cipher: Box<dyn CryptoProvider>) -> Self {
        Self { sink, cipher }
    }

    /// Write any held-back bytes and hand back the sink
    pub fn finish(mut self) -> PDFResult<W> {
        let tail = self.cipher.finish()?;
        self.sink.write_all(&tail)?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let output = self
            .cipher
            .update(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.sink.write_all(&output)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use pretty_assertions::assert_eq;
    use crate::pdf::Dictionary;

    fn engine(algorithm: EncryptionAlgorithm) -> PDFCryptoEngine {
        let key_len = match algorithm {
            EncryptionAlgorithm::RC4_40 => 5,
            EncryptionAlgorithm::AES_256 => 32,
            _ => 16,
        };
        let key: Vec<u8> = (0..key_len as u8).collect();
        PDFCryptoEngine::new(algorithm, &key).unwrap()
    }

    #[rstest]
    #[case(EncryptionAlgorithm::RC4_40, 10)]
    #[case(EncryptionAlgorithm::RC4_128, 16)]
    #[case(EncryptionAlgorithm::AES_128, 16)]
    #[case(EncryptionAlgorithm::AES_256, 32)]
    fn test_object_key_length(#[case] algorithm: EncryptionAlgorithm, #[case] expected: usize) {
        let key = engine(algorithm).object_key(ObjectId::new(1, 0));
        assert_eq!(key.len(), expected);
    }

    #[test_log::test]
    fn test_object_key_known_value() {
        // MD5(01 02 03 04 05 | 07 00 00 | 00 00) cut to 10 bytes
        let engine = PDFCryptoEngine::new(EncryptionAlgorithm::RC4_40, &[1, 2, 3, 4, 5]).unwrap();
        let expected = md5::compute([1u8, 2, 3, 4, 5, 7, 0, 0, 0, 0]).0;
        assert_eq!(engine.object_key(ObjectId::new(7, 0)).as_slice(), &expected[..10]);
    }

    #[test_log::test]
    fn test_file_key_policy() {
        let key = [0xABu8; 32];
        let engine = PDFCryptoEngine::new(EncryptionAlgorithm::AES_256, &key)
            .unwrap()
            .with_key_policy(ObjectKeyPolicy::FileKey);
        assert_eq!(engine.object_key(ObjectId::new(9, 2)).as_slice(), &key[..]);
    }

    #[rstest]
    fn test_position_sensitive_round_trip(
        #[values(EncryptionAlgorithm::RC4_128, EncryptionAlgorithm::AES_256)] algorithm: EncryptionAlgorithm,
    ) {
        let engine = engine(algorithm);
        let id = ObjectId::new(5, 0);
        let plaintext = b"secret page content".to_vec();

        let encrypted = engine.encrypt_bytes(id, &plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert_eq!(engine.decrypt_bytes(id, &encrypted).unwrap(), plaintext);

        let elsewhere = engine.decrypt_bytes(ObjectId::new(6, 0), &encrypted).unwrap();
        assert_ne!(elsewhere, plaintext);
    }

    #[test_log::test]
    fn test_key_length_mismatch() {
        assert!(matches!(
            PDFCryptoEngine::new(EncryptionAlgorithm::AES_128, &[0u8; 5]),
            Err(PDFError::CryptoInit(_))
        ));
        assert!(matches!(
            PDFCryptoEngine::new(EncryptionAlgorithm::RC4_128, &[0u8; 17]),
            Err(PDFError::CryptoInit(_))
        ));
    }

    fn sample_object() -> PDFValue {
        let mut info = Dictionary::new();
        info.set("Title", PDFValue::string("Quarterly report"));
        info.set("Tags", vec![PDFValue::string("a"), PDFValue::name("Plain")]);
        PDFValue::Dictionary(info)
    }

    #[test_log::test]
    fn test_object_strings_round_trip() {
        let engine = engine(EncryptionAlgorithm::AES_128);
        let id = ObjectId::new(3, 0);
        let original = sample_object();

        let mut value = original.clone();
        engine.encrypt_object(id, &mut value).unwrap();
        let dict = value.as_dict().unwrap();
        assert!(matches!(dict.get("Title"), Some(PDFValue::String(_, true))));
        assert_ne!(dict.get_string("Title"), Some(b"Quarterly report".as_slice()));
        assert!(dict.get("Tags").unwrap().as_array().unwrap()[1].is_name("Plain"));

        engine.decrypt_object(id, &mut value).unwrap();
        assert_eq!(
            value.as_dict().unwrap().get_string("Title"),
            Some(b"Quarterly report".as_slice())
        );
    }

    #[test_log::test]
    fn test_stream_exemptions() {
        let engine = engine(EncryptionAlgorithm::RC4_128).with_encrypt_metadata(false);
        let stream = |type_name: &str| Stream::new(Dictionary::with_type(type_name), b"data".to_vec());

        assert!(!engine.covers_stream(&stream("XRef")));
        assert!(!engine.covers_stream(&stream("Metadata")));
        assert!(engine.covers_stream(&stream("XObject")));

        let mut crypt = Dictionary::new();
        crypt.set("Filter", vec![PDFValue::name("Crypt")]);
        assert!(!engine.covers_stream(&Stream::new(crypt, b"x".to_vec())));
    }

    #[test_log::test]
    fn test_embedded_files_only() {
        let engine = engine(EncryptionAlgorithm::AES_128).with_embedded_files_only(true);
        let id = ObjectId::new(4, 0);

        let mut plain = sample_object();
        engine.encrypt_object(id, &mut plain).unwrap();
        assert_eq!(plain, sample_object());

        let mut file = PDFValue::Stream(Stream::new(
            Dictionary::with_type("EmbeddedFile"),
            b"attachment".to_vec(),
        ));
        engine.encrypt_object(id, &mut file).unwrap();
        assert_ne!(file.as_stream().unwrap().data, b"attachment".to_vec());
        engine.decrypt_object(id, &mut file).unwrap();
        assert_eq!(file.as_stream().unwrap().data, b"attachment".to_vec());
    }

    #[test_log::test]
    fn test_cipher_writer() {
        let engine = engine(EncryptionAlgorithm::AES_256);
        let id = ObjectId::new(12, 0);
        let data = b"streamed through a writer ".repeat(50);

        let mut writer = engine.writer(id, Vec::new()).unwrap();
        for chunk in data.chunks(33) {
            writer.write_all(chunk).unwrap();
        }
        let encrypted = writer.finish().unwrap();
        assert_eq!(engine.decrypt_bytes(id, &encrypted).unwrap(), data);
    }
}
