//! PDF cryptographic engine implementation

mod aes;
mod engine;
mod rc4;

pub use self::aes::{AesDecryptor, AesEncryptor, AES_BLOCK_SIZE};
pub use self::engine::{CipherWriter, ObjectKeyPolicy, PDFCryptoEngine};
pub use self::rc4::Rc4Cipher;
pub(crate) use self::aes::{cbc_decrypt_raw, cbc_encrypt_raw};

use crate::error::PDFResult;

/// Streaming transform over a byte sequence.
///
/// `update` may hold bytes back; `finish` flushes them and ends the stream.
pub trait CryptoProvider: Send {
    fn update(&mut self, data: &[u8]) -> PDFResult<Vec<u8>>;
    fn finish(&mut self) -> PDFResult<Vec<u8>>;
}
