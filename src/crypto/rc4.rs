//! RC4 stream cipher

use std::fmt;
use rc4::cipher::consts::{U1, U10, U11, U12, U13, U14, U15, U16, U2, U3, U4, U5, U6, U7, U8, U9};
use rc4::{KeyInit, Rc4, StreamCipher};
use crate::error::{PDFError, PDFResult};
use super::CryptoProvider;

/// Object-safe view of an `Rc4<N>` for any key size
trait Keystream: Send {
    fn apply(&mut self, buf: &mut [u8]);
}

impl<N> Keystream for Rc4<N>
where
    Rc4<N>: StreamCipher + Send,
{
    fn apply(&mut self, buf: &mut [u8]) {
        self.apply_keystream(buf);
    }
}

fn keystream(key: &[u8]) -> PDFResult<Box<dyn Keystream>> {
    macro_rules! sized {
        ($($len:literal => $size:ty),* $(,)?) => {
            match key.len() {
                $($len => Box::new(
                    Rc4::<$size>::new_from_slice(key)
                        .map_err(|e| PDFError::crypto_init(format!("RC4: {}", e)))?,
                ) as Box<dyn Keystream>,)*
                n => {
                    return Err(PDFError::crypto_init(format!(
                        "RC4 key must be 1 to 16 bytes, got {}",
                        n
                    )))
                }
            }
        };
    }

    Ok(sized!(
        1 => U1, 2 => U2, 3 => U3, 4 => U4, 5 => U5, 6 => U6, 7 => U7, 8 => U8,
        9 => U9, 10 => U10, 11 => U11, 12 => U12, 13 => U13, 14 => U14, 15 => U15, 16 => U16,
    ))
}

/// RC4 keystream with state carried across calls
pub struct Rc4Cipher {
    keystream: Box<dyn Keystream>,
}

impl fmt::Debug for Rc4Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rc4Cipher").finish_non_exhaustive()
    }
}

impl Rc4Cipher {
    pub fn new(key: &[u8]) -> PDFResult<Self> {
        Ok(Self {
            keystream: keystream(key)?,
        })
    }

    /// Encrypt or decrypt the next chunk of the stream
    pub fn update(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = data.to_vec();
        self.keystream.apply(&mut output);
        output
    }

    /// Same as `update`, in place
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.keystream.apply(buf);
    }

    /// One-shot transform with a fresh keystream
    pub fn process(key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
        Ok(Self::new(key)?.update(data))
    }
}

impl CryptoProvider for Rc4Cipher {
    fn update(&mut self, data: &[u8]) -> PDFResult<Vec<u8>> {
        Ok(Rc4Cipher::update(self, data))
    }

    fn finish(&mut self) -> PDFResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use pretty_assertions::assert_eq;

    #[rstest]
    #[case(b"Key", b"Plaintext", "bbf316e8d940af0ad3")]
    #[case(b"Wiki", b"pedia", "1021bf0420")]
    #[case(b"Secret", b"Attack at dawn", "45a01f645fc35b383552544b9bf5")]
    fn test_known_vectors(#[case] key: &[u8], #[case] plaintext: &[u8], #[case] expected: &str) {
        let output = Rc4Cipher::process(key, plaintext).unwrap();
        assert_eq!(hex::encode(output), expected);
    }

    #[test_log::test]
    fn test_rfc6229_keystream() {
        let key = hex::decode("0102030405").unwrap();
        let keystream = Rc4Cipher::process(&key, &[0u8; 16]).unwrap();
        assert_eq!(hex::encode(keystream), "b2396305f03dc027ccc3524a0a1118a8");
    }

    #[test_log::test]
    fn test_streaming_matches_one_shot() {
        let key = [7u8; 16];
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let expected = Rc4Cipher::process(&key, &data).unwrap();

        let mut cipher = Rc4Cipher::new(&key).unwrap();
        let mut output = Vec::new();
        for chunk in data.chunks(37) {
            output.extend(cipher.update(chunk));
        }
        assert_eq!(output, expected);

        let mut in_place = data.clone();
        Rc4Cipher::new(&key).unwrap().apply(&mut in_place);
        assert_eq!(in_place, expected);
    }

    #[test_log::test]
    fn test_symmetric() {
        let key = b"0123456789abcdef";
        let encrypted = Rc4Cipher::process(key, b"Test RC4 encryption").unwrap();
        assert_ne!(encrypted, b"Test RC4 encryption".to_vec());
        assert_eq!(Rc4Cipher::process(key, &encrypted).unwrap(), b"Test RC4 encryption".to_vec());
    }

    #[test_log::test]
    fn test_invalid_key_length() {
        assert!(matches!(Rc4Cipher::new(&[]), Err(PDFError::CryptoInit(_))));
        assert!(matches!(Rc4Cipher::new(&[1u8; 17]), Err(PDFError::CryptoInit(_))));
    }
}
