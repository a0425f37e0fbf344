//! AES-CBC with PKCS#7 padding, streaming in both directions

use aes::{Aes128, Aes256};
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use log::warn;
use rand::{thread_rng, RngCore};
use zeroize::Zeroizing;
use crate::error::{PDFError, PDFResult};
use super::CryptoProvider;

pub const AES_BLOCK_SIZE: usize = 16;

fn check_key(key: &[u8]) -> PDFResult<()> {
    match key.len() {
        16 | 32 => Ok(()),
        n => Err(PDFError::crypto_init(format!(
            "AES key must be 16 or 32 bytes, got {}",
            n
        ))),
    }
}

enum BlockEncryptor {
    Aes128(cbc::Encryptor<Aes128>),
    Aes256(cbc::Encryptor<Aes256>),
}

impl BlockEncryptor {
    fn new(key: &[u8], iv: &[u8]) -> PDFResult<Self> {
        check_key(key)?;
        Ok(match key.len() {
            16 => Self::Aes128(cbc::Encryptor::<Aes128>::new_from_slices(key, iv)?),
            _ => Self::Aes256(cbc::Encryptor::<Aes256>::new_from_slices(key, iv)?),
        })
    }

    /// Encrypt whole blocks in place
    fn encrypt_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(c) => c.encrypt_block_mut(block),
                Self::Aes256(c) => c.encrypt_block_mut(block),
            }
        }
    }
}

enum BlockDecryptor {
    Aes128(cbc::Decryptor<Aes128>),
    Aes256(cbc::Decryptor<Aes256>),
}

impl BlockDecryptor {
    fn new(key: &[u8], iv: &[u8]) -> PDFResult<Self> {
        check_key(key)?;
        Ok(match key.len() {
            16 => Self::Aes128(cbc::Decryptor::<Aes128>::new_from_slices(key, iv)?),
            _ => Self::Aes256(cbc::Decryptor::<Aes256>::new_from_slices(key, iv)?),
        })
    }

    fn decrypt_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(c) => c.decrypt_block_mut(block),
                Self::Aes256(c) => c.decrypt_block_mut(block),
            }
        }
    }
}

/// Streaming AES-CBC encryptor.
///
/// The IV leads the ciphertext; the final block carries PKCS#7 padding.
pub struct AesEncryptor {
    cipher: BlockEncryptor,
    iv: Option<[u8; AES_BLOCK_SIZE]>,
    pending: Vec<u8>,
    finished: bool,
}

impl AesEncryptor {
    /// Encryptor with a random IV
    pub fn new(key: &[u8]) -> PDFResult<Self> {
        let mut iv = [0u8; AES_BLOCK_SIZE];
        thread_rng().fill_bytes(&mut iv);
        Self::with_iv(key, iv)
    }

    pub fn with_iv(key: &[u8], iv: [u8; AES_BLOCK_SIZE]) -> PDFResult<Self> {
        Ok(Self {
            cipher: BlockEncryptor::new(key, &iv)?,
            iv: Some(iv),
            pending: Vec::with_capacity(AES_BLOCK_SIZE),
            finished: false,
        })
    }

    pub fn update(&mut self, data: &[u8]) -> PDFResult<Vec<u8>> {
        if self.finished {
            return Err(PDFError::misuse("AES encryptor used after finish"));
        }
        let mut output = Vec::with_capacity(data.len() + 2 * AES_BLOCK_SIZE);
        if let Some(iv) = self.iv.take() {
            output.extend_from_slice(&iv);
        }

        self.pending.extend_from_slice(data);
        let whole = self.pending.len() - self.pending.len() % AES_BLOCK_SIZE;
        let start = output.len();
        output.extend(self.pending.drain(..whole));
        self.cipher.encrypt_blocks(&mut output[start..]);
        Ok(output)
    }

    pub fn finish(&mut self) -> PDFResult<Vec<u8>> {
        if self.finished {
            return Err(PDFError::misuse("AES encryptor finished twice"));
        }
        self.finished = true;

        let mut output = Vec::with_capacity(2 * AES_BLOCK_SIZE);
        if let Some(iv) = self.iv.take() {
            output.extend_from_slice(&iv);
        }
        let pad = AES_BLOCK_SIZE - self.pending.len() % AES_BLOCK_SIZE;
        let start = output.len();
        output.append(&mut self.pending);
        output.resize(output.len() + pad, pad as u8);
        self.cipher.encrypt_blocks(&mut output[start..]);
        Ok(output)
    }

    /// Encrypt a whole buffer with a random IV
    pub fn encrypt(key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
        let mut encryptor = Self::new(key)?;
        let mut output = encryptor.update(data)?;
        output.extend(encryptor.finish()?);
        Ok(output)
    }
}

impl CryptoProvider for AesEncryptor {
    fn update(&mut self, data: &[u8]) -> PDFResult<Vec<u8>> {
        AesEncryptor::update(self, data)
    }

    fn finish(&mut self) -> PDFResult<Vec<u8>> {
        AesEncryptor::finish(self)
    }
}

/// Streaming AES-CBC decryptor, the counterpart of [`AesEncryptor`].
///
/// The last block is held back until `finish` so its padding can be stripped.
pub struct AesDecryptor {
    key: Zeroizing<Vec<u8>>,
    cipher: Option<BlockDecryptor>,
    iv: Vec<u8>,
    pending: Vec<u8>,
    finished: bool,
}

impl AesDecryptor {
    pub fn new(key: &[u8]) -> PDFResult<Self> {
        check_key(key)?;
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
            cipher: None,
            iv: Vec::with_capacity(AES_BLOCK_SIZE),
            pending: Vec::new(),
            finished: false,
        })
    }

    pub fn update(&mut self, mut data: &[u8]) -> PDFResult<Vec<u8>> {
        if self.finished {
            return Err(PDFError::misuse("AES decryptor used after finish"));
        }

        if self.cipher.is_none() {
            let take = (AES_BLOCK_SIZE - self.iv.len()).min(data.len());
            self.iv.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.iv.len() < AES_BLOCK_SIZE {
                return Ok(Vec::new());
            }
            self.cipher = Some(BlockDecryptor::new(&self.key, &self.iv)?);
        }

        self.pending.extend_from_slice(data);
        // Keep the last complete block (or the partial tail) for finish
        let tail = match self.pending.len() % AES_BLOCK_SIZE {
            0 => AES_BLOCK_SIZE.min(self.pending.len()),
            rem => rem,
        };
        let ready = self.pending.len() - tail;
        let mut output: Vec<u8> = self.pending.drain(..ready).collect();
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt_blocks(&mut output);
        }
        Ok(output)
    }

    pub fn finish(&mut self) -> PDFResult<Vec<u8>> {
        if self.finished {
            return Err(PDFError::misuse("AES decryptor finished twice"));
        }
        self.finished = true;

        let cipher = match self.cipher.as_mut() {
            Some(cipher) => cipher,
            None => {
                if !self.iv.is_empty() {
                    warn!("AES data shorter than its IV ({} bytes)", self.iv.len());
                }
                return Ok(Vec::new());
            }
        };

        let mut block = std::mem::take(&mut self.pending);
        if block.len() % AES_BLOCK_SIZE != 0 {
            warn!(
                "AES ciphertext not block aligned, dropping {} trailing byte(s)",
                block.len() % AES_BLOCK_SIZE
            );
            block.truncate(block.len() - block.len() % AES_BLOCK_SIZE);
        }
        if block.is_empty() {
            return Ok(block);
        }

        cipher.decrypt_blocks(&mut block);
        let pad = block[block.len() - 1] as usize;
        let valid = (1..=AES_BLOCK_SIZE).contains(&pad)
            && block[block.len() - pad..].iter().all(|&b| b as usize == pad);
        if valid {
            block.truncate(block.len() - pad);
        } else {
            warn!("Invalid PKCS#7 padding in AES data, keeping final block as is");
        }
        Ok(block)
    }

    /// Decrypt a whole buffer whose first block is the IV
    pub fn decrypt(key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
        let mut decryptor = Self::new(key)?;
        let mut output = decryptor.update(data)?;
        output.extend(decryptor.finish()?);
        Ok(output)
    }
}

impl CryptoProvider for AesDecryptor {
    fn update(&mut self, data: &[u8]) -> PDFResult<Vec<u8>> {
        AesDecryptor::update(self, data)
    }

    fn finish(&mut self) -> PDFResult<Vec<u8>> {
        AesDecryptor::finish(self)
    }
}

/// CBC encryption of block-aligned data without IV prefix or padding
pub(crate) fn cbc_encrypt_raw(key: &[u8], iv: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(PDFError::crypto_init("unpadded AES input must be block aligned"));
    }
    let mut output = data.to_vec();
    BlockEncryptor::new(key, iv)?.encrypt_blocks(&mut output);
    Ok(output)
}

/// CBC decryption of block-aligned data without IV prefix or padding
pub(crate) fn cbc_decrypt_raw(key: &[u8], iv: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(PDFError::crypto_init("unpadded AES input must be block aligned"));
    }
    let mut output = data.to_vec();
    BlockDecryptor::new(key, iv)?.decrypt_blocks(&mut output);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn test_fips197_block() {
        // FIPS-197 appendix C.1, as a single CBC block with a zero IV
        let key = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let ciphertext = cbc_encrypt_raw(&key, &[0u8; 16], &plaintext).unwrap();
        assert_eq!(hex::encode(&ciphertext), "69c4e0d86a7b0430d8cdb78070b4c55a");
        assert_eq!(cbc_decrypt_raw(&key, &[0u8; 16], &ciphertext).unwrap(), plaintext);
    }

    #[rstest]
    fn test_round_trip(#[values(16, 32)] key_len: usize, #[values(0, 1, 15, 16, 17, 100)] len: usize) {
        let key = vec![0x42u8; key_len];
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let encrypted = AesEncryptor::encrypt(&key, &data).unwrap();
        // IV plus padded payload
        assert_eq!(encrypted.len(), 16 + (len / 16 + 1) * 16);
        assert_eq!(AesDecryptor::decrypt(&key, &encrypted).unwrap(), data);
    }

    #[test_log::test]
    fn test_streaming_chunks() {
        let key = [9u8; 32];
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 31) as u8).collect();

        let mut encryptor = AesEncryptor::new(&key).unwrap();
        let mut encrypted = Vec::new();
        for chunk in data.chunks(7) {
            encrypted.extend(encryptor.update(chunk).unwrap());
        }
        encrypted.extend(encryptor.finish().unwrap());

        let mut decryptor = AesDecryptor::new(&key).unwrap();
        let mut decrypted = Vec::new();
        for chunk in encrypted.chunks(5) {
            decrypted.extend(decryptor.update(chunk).unwrap());
        }
        decrypted.extend(decryptor.finish().unwrap());
        assert_eq!(decrypted, data);
    }

    #[test_log::test]
    fn test_fixed_iv_is_emitted_first() {
        let iv = [3u8; 16];
        let mut encryptor = AesEncryptor::with_iv(&[1u8; 16], iv).unwrap();
        let output = encryptor.update(b"abc").unwrap();
        assert_eq!(output, iv.to_vec());
        assert_eq!(encryptor.finish().unwrap().len(), 16);
    }

    #[test_log::test]
    fn test_use_after_finish() {
        let mut encryptor = AesEncryptor::new(&[1u8; 16]).unwrap();
        encryptor.finish().unwrap();
        assert!(matches!(encryptor.update(b"x"), Err(PDFError::ApiMisuse(_))));
        assert!(matches!(encryptor.finish(), Err(PDFError::ApiMisuse(_))));

        let mut decryptor = AesDecryptor::new(&[1u8; 16]).unwrap();
        decryptor.finish().unwrap();
        assert!(matches!(decryptor.update(b"x"), Err(PDFError::ApiMisuse(_))));
    }

    #[test_log::test]
    fn test_invalid_key_size() {
        assert!(matches!(AesEncryptor::new(&[0u8; 24]), Err(PDFError::CryptoInit(_))));
        assert!(matches!(AesDecryptor::new(&[0u8; 8]), Err(PDFError::CryptoInit(_))));
    }

    #[test_log::test]
    fn test_bad_padding_keeps_block() {
        let key = [5u8; 16];
        let iv = [0u8; 16];
        // A raw block whose plaintext ends in 0x00 is not valid PKCS#7
        let ciphertext = cbc_encrypt_raw(&key, &iv, &[0u8; 16]).unwrap();
        let mut data = iv.to_vec();
        data.extend(ciphertext);
        assert_eq!(AesDecryptor::decrypt(&key, &data).unwrap(), vec![0u8; 16]);
    }

    #[test_log::test]
    fn test_short_input() {
        assert_eq!(AesDecryptor::decrypt(&[1u8; 16], &[0u8; 10]).unwrap(), Vec::<u8>::new());
    }
}
