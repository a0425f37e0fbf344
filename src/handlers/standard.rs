//! Standard security handler: passwords, file keys and the `/Encrypt` dictionary for revisions 2 to 6

use std::fmt;
use log::{debug, warn};
use rand::{thread_rng, RngCore};
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::crypto::{cbc_decrypt_raw, cbc_encrypt_raw, ObjectKeyPolicy, PDFCryptoEngine, Rc4Cipher};
use crate::error::{PDFError, PDFResult};
use crate::pdf::{Dictionary, PDFValue};
use crate::{EncryptionAlgorithm, EncryptionSettings, PDFPermissions};

const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41,
    0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80,
    0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Revision 5 and 6 passwords are cut to this many bytes
const MAX_PASSWORD_LEN: usize = 127;

/// Standard security handler for password-based encryption
#[derive(Clone, ZeroizeOnDrop)]
pub struct StandardSecurityHandler {
    #[zeroize(skip)]
    algorithm: EncryptionAlgorithm,
    #[zeroize(skip)]
    version: u8,
    #[zeroize(skip)]
    revision: u8,
    #[zeroize(skip)]
    key_length: usize,
    /// Raw `/P` bits
    #[zeroize(skip)]
    permissions: u32,
    #[zeroize(skip)]
    encrypt_metadata: bool,
    #[zeroize(skip)]
    embedded_files_only: bool,
    o_value: Vec<u8>,
    u_value: Vec<u8>,
    oe_value: Option<Vec<u8>>,
    ue_value: Option<Vec<u8>>,
    perms_value: Option<Vec<u8>>,
    encryption_key: Option<Vec<u8>>,
    #[zeroize(skip)]
    file_id: Vec<u8>,
}

impl fmt::Debug for StandardSecurityHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardSecurityHandler")
            .field("algorithm", &self.algorithm)
            .field("version", &self.version)
            .field("revision", &self.revision)
            .field("key_length", &self.key_length)
            .field("permissions", &format_args!("{:#010x}", self.permissions))
            .field("encrypt_metadata", &self.encrypt_metadata)
            .field("embedded_files_only", &self.embedded_files_only)
            .finish_non_exhaustive()
    }
}

impl StandardSecurityHandler {
    /// Create a handler for writing a new document.
    ///
    /// Computes `/O` and `/U` (and `/OE`, `/UE`, `/Perms` for AES-256) from the settings; the file
    /// key is then available through [`Self::file_key`].
    pub fn new(settings: &EncryptionSettings, file_id: &[u8]) -> PDFResult<Self> {
        let algorithm = settings.algorithm;
        let needs_crypt_filters = !settings.encrypt_metadata || settings.embedded_files_only;
        let (version, revision, key_length) = match algorithm {
            EncryptionAlgorithm::RC4_40 if settings.embedded_files_only => {
                return Err(PDFError::misuse(
                    "embedded-files-only encryption needs crypt filters, which RC4-40 lacks",
                ))
            }
            EncryptionAlgorithm::RC4_40 => (1, 2, 5),
            EncryptionAlgorithm::RC4_128 if needs_crypt_filters => (4, 4, 16),
            EncryptionAlgorithm::RC4_128 => (2, 3, 16),
            EncryptionAlgorithm::AES_128 => (4, 4, 16),
            EncryptionAlgorithm::AES_256 => (5, 6, 32),
        };

        let encrypt_metadata = if revision < 4 && !settings.encrypt_metadata {
            warn!("Revision {} cannot leave metadata in clear, encrypting it", revision);
            true
        } else {
            settings.encrypt_metadata
        };

        let mut handler = Self {
            algorithm,
            version,
            revision,
            key_length,
            permissions: settings.permissions.to_p_value(),
            encrypt_metadata,
            embedded_files_only: settings.embedded_files_only,
            o_value: Vec::new(),
            u_value: Vec::new(),
            oe_value: None,
            ue_value: None,
            perms_value: None,
            encryption_key: None,
            file_id: file_id.to_vec(),
        };

        if revision >= 5 {
            handler.generate_r6_values(&settings.user_password, &settings.owner_password)?;
        } else {
            handler.generate_legacy_values(&settings.user_password, &settings.owner_password)?;
        }
        debug!("Created {} standard security handler (V{} R{})", algorithm, version, revision);
        Ok(handler)
    }

    /// Read an `/Encrypt` dictionary; `file_id` is the first element of the trailer `/ID`
    pub fn from_dict(dict: &Dictionary, file_id: &[u8]) -> PDFResult<Self> {
        match dict.get_name("Filter") {
            Some(b"Standard") => {}
            Some(other) => {
                return Err(PDFError::UnsupportedSecurityHandler(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
            None => return Err(PDFError::MissingDictionaryEntry("Filter".to_string())),
        }

        let version = dict.get_integer("V").unwrap_or(0);
        let revision = dict.require_integer("R")?;
        if !(2..=6).contains(&revision) {
            return Err(PDFError::UnsupportedRevision(revision.clamp(0, 255) as u8));
        }
        let length_bits = dict.get_integer("Length").unwrap_or(40);

        let (algorithm, key_length, embedded_files_only) = match version {
            0 | 1 => (EncryptionAlgorithm::RC4_40, 5, false),
            2 | 3 => {
                let n = (length_bits / 8).clamp(5, 16) as usize;
                (rc4_algorithm(n), n, false)
            }
            4 | 5 => crypt_filter_algorithm(dict, length_bits)?,
            v => {
                return Err(PDFError::UnsupportedSecurityHandler(format!(
                    "Standard handler version {}",
                    v
                )))
            }
        };

        let required = |key: &str| {
            dict.get_string(key)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| PDFError::MissingDictionaryEntry(key.to_string()))
        };
        let optional = |key: &str| dict.get_string(key).map(<[u8]>::to_vec);

        let handler = Self {
            algorithm,
            version: version as u8,
            revision: revision as u8,
            key_length,
            permissions: dict
                .get_integer("P")
                .ok_or_else(|| PDFError::MissingDictionaryEntry("P".to_string()))?
                as i32 as u32,
            encrypt_metadata: dict.get_bool("EncryptMetadata").unwrap_or(true),
            embedded_files_only,
            o_value: required("O")?,
            u_value: required("U")?,
            oe_value: optional("OE"),
            ue_value: optional("UE"),
            perms_value: optional("Perms"),
            encryption_key: None,
            file_id: file_id.to_vec(),
        };
        debug!(
            "Read {} standard security handler (V{} R{}, {}-byte key)",
            algorithm, version, revision, key_length
        );
        Ok(handler)
    }

    /// Check `password` as owner then user password and return the file key
    pub fn authenticate_password(&self, password: &[u8]) -> PDFResult<Vec<u8>> {
        let key = if self.revision >= 5 {
            self.authenticate_r56(password)?
        } else {
            match self.authenticate_owner_legacy(password)? {
                Some(key) => {
                    debug!("Owner password accepted");
                    Some(key)
                }
                None => self.authenticate_user_legacy(password)?,
            }
        };
        key.map(|k| k.to_vec()).ok_or(PDFError::AuthenticationFailed)
    }

    /// Per-document cipher engine for a file key
    pub fn engine(&self, file_key: &[u8]) -> PDFResult<PDFCryptoEngine> {
        let policy = if self.revision >= 5 {
            ObjectKeyPolicy::FileKey
        } else {
            ObjectKeyPolicy::Derived
        };
        Ok(PDFCryptoEngine::new(self.algorithm, file_key)?
            .with_key_policy(policy)
            .with_encrypt_metadata(self.encrypt_metadata)
            .with_embedded_files_only(self.embedded_files_only))
    }

    /// File key computed by [`Self::new`]; `None` for handlers read from a document
    pub fn file_key(&self) -> Option<&[u8]> {
        self.encryption_key.as_deref()
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn permissions(&self) -> PDFPermissions {
        PDFPermissions::new(self.permissions)
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    pub fn embedded_files_only(&self) -> bool {
        self.embedded_files_only
    }

    /// The `/Encrypt` dictionary for this handler
    pub fn to_dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Filter", PDFValue::name("Standard"));
        dict.set("V", self.version as i64);
        dict.set("R", self.revision as i64);
        dict.set("Length", (self.key_length * 8) as i64);

        if self.version >= 4 {
            let method = match self.algorithm {
                EncryptionAlgorithm::AES_256 => "AESV3",
                EncryptionAlgorithm::AES_128 => "AESV2",
                _ => "V2",
            };
            let mut std_cf = Dictionary::with_type("CryptFilter");
            std_cf.set("CFM", PDFValue::name(method));
            std_cf.set(
                "AuthEvent",
                PDFValue::name(if self.embedded_files_only { "EFOpen" } else { "DocOpen" }),
            );
            std_cf.set("Length", self.key_length as i64);
            let mut filters = Dictionary::new();
            filters.set("StdCF", std_cf);
            dict.set("CF", filters);

            let default_filter = if self.embedded_files_only { "Identity" } else { "StdCF" };
            dict.set("StmF", PDFValue::name(default_filter));
            dict.set("StrF", PDFValue::name(default_filter));
            if self.embedded_files_only {
                dict.set("EFF", PDFValue::name("StdCF"));
            }
            if !self.encrypt_metadata {
                dict.set("EncryptMetadata", false);
            }
        }

        dict.set("O", PDFValue::hex_string(self.o_value.clone()));
        dict.set("U", PDFValue::hex_string(self.u_value.clone()));
        dict.set("P", self.permissions as i32 as i64);
        for (key, value) in [
            ("OE", &self.oe_value),
            ("UE", &self.ue_value),
            ("Perms", &self.perms_value),
        ] {
            if let Some(bytes) = value {
                dict.set(key, PDFValue::hex_string(bytes.clone()));
            }
        }
        dict
    }

    // Revisions 2 to 4

    fn generate_legacy_values(&mut self, user_password: &[u8], owner_password: &[u8]) -> PDFResult<()> {
        let owner_password = if owner_password.is_empty() {
            user_password
        } else {
            owner_password
        };

        let owner_key = self.owner_rc4_key(owner_password);
        let mut o_value = pad_password(user_password).to_vec();
        self.rc4_rounds(&owner_key, &mut o_value, false)?;
        self.o_value = o_value;

        let key = self.compute_file_key(user_password);
        self.u_value = self.compute_u_value(&key)?;
        self.encryption_key = Some(key.to_vec());
        Ok(())
    }

    /// RC4 key protecting `/O`, from the owner password
    fn owner_rc4_key(&self, owner_password: &[u8]) -> Zeroizing<Vec<u8>> {
        let mut hash = md5::compute(pad_password(owner_password)).0;
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = md5::compute(hash).0;
            }
        }
        Zeroizing::new(hash[..self.key_length].to_vec())
    }

    /// One RC4 pass for revision 2, twenty passes with XOR-ed keys from revision 3
    fn rc4_rounds(&self, key: &[u8], data: &mut [u8], reverse: bool) -> PDFResult<()> {
        if self.revision == 2 {
            Rc4Cipher::new(key)?.apply(data);
            return Ok(());
        }
        let rounds: Vec<u8> = if reverse {
            (0..20).rev().collect()
        } else {
            (0..20).collect()
        };
        for i in rounds {
            let round_key = Zeroizing::new(key.iter().map(|b| b ^ i).collect::<Vec<u8>>());
            Rc4Cipher::new(&round_key)?.apply(data);
        }
        Ok(())
    }

    fn compute_file_key(&self, password: &[u8]) -> Zeroizing<Vec<u8>> {
        let mut context = md5::Context::new();
        context.consume(pad_password(password));
        context.consume(&self.o_value[..self.o_value.len().min(32)]);
        context.consume(self.permissions.to_le_bytes());
        context.consume(&self.file_id);
        if self.revision >= 4 && !self.encrypt_metadata {
            context.consume([0xFF; 4]);
        }
        let mut hash = context.finalize().0;

        let n = self.key_length;
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = md5::compute(&hash[..n]).0;
            }
        }
        Zeroizing::new(hash[..n].to_vec())
    }

    fn compute_u_value(&self, key: &[u8]) -> PDFResult<Vec<u8>> {
        if self.revision == 2 {
            let mut u_value = PADDING.to_vec();
            self.rc4_rounds(key, &mut u_value, false)?;
            return Ok(u_value);
        }

        let mut context = md5::Context::new();
        context.consume(PADDING);
        context.consume(&self.file_id);
        let mut u_value = context.finalize().0.to_vec();
        self.rc4_rounds(key, &mut u_value, false)?;
        // Arbitrary padding up to 32 bytes
        u_value.resize(32, 0);
        Ok(u_value)
    }

    fn authenticate_user_legacy(&self, password: &[u8]) -> PDFResult<Option<Zeroizing<Vec<u8>>>> {
        let key = self.compute_file_key(password);
        let expected = self.compute_u_value(&key)?;
        let compared = if self.revision == 2 { 32 } else { 16 };
        if self.u_value.len() >= compared && expected[..compared] == self.u_value[..compared] {
            Ok(Some(key))
        } else {
            Ok(None)
        }
    }

    fn authenticate_owner_legacy(&self, password: &[u8]) -> PDFResult<Option<Zeroizing<Vec<u8>>>> {
        if self.o_value.len() < 32 {
            return Err(PDFError::invalid_dict_value("O", "shorter than 32 bytes"));
        }
        let owner_key = self.owner_rc4_key(password);
        let mut user_password = Zeroizing::new(self.o_value[..32].to_vec());
        self.rc4_rounds(&owner_key, &mut user_password, true)?;
        self.authenticate_user_legacy(&user_password)
    }

    // Revisions 5 and 6

    fn generate_r6_values(&mut self, user_password: &[u8], owner_password: &[u8]) -> PDFResult<()> {
        let user_password = &user_password[..user_password.len().min(MAX_PASSWORD_LEN)];
        let owner_password = if owner_password.is_empty() {
            user_password
        } else {
            &owner_password[..owner_password.len().min(MAX_PASSWORD_LEN)]
        };

        let mut rng = thread_rng();
        let mut file_key = Zeroizing::new(vec![0u8; 32]);
        rng.fill_bytes(&mut file_key);
        let mut salts = [0u8; 32];
        rng.fill_bytes(&mut salts);
        let (user_salts, owner_salts) = salts.split_at(16);

        let mut u_value = self.hash_r56(user_password, &user_salts[..8], &[])?.to_vec();
        u_value.extend_from_slice(user_salts);
        let user_key = self.hash_r56(user_password, &user_salts[8..], &[])?;
        self.ue_value = Some(cbc_encrypt_raw(&user_key, &[0u8; 16], &file_key)?);

        let mut o_value = self.hash_r56(owner_password, &owner_salts[..8], &u_value)?.to_vec();
        o_value.extend_from_slice(owner_salts);
        let owner_key = self.hash_r56(owner_password, &owner_salts[8..], &u_value)?;
        self.oe_value = Some(cbc_encrypt_raw(&owner_key, &[0u8; 16], &file_key)?);

        let mut perms = [0u8; 16];
        perms[..4].copy_from_slice(&self.permissions.to_le_bytes());
        perms[4..8].copy_from_slice(&[0xFF; 4]);
        perms[8] = if self.encrypt_metadata { b'T' } else { b'F' };
        perms[9..12].copy_from_slice(b"adb");
        rng.fill_bytes(&mut perms[12..]);
        self.perms_value = Some(cbc_encrypt_raw(&file_key, &[0u8; 16], &perms)?);

        self.u_value = u_value;
        self.o_value = o_value;
        self.encryption_key = Some(file_key.to_vec());
        Ok(())
    }

    /// Password hash: plain SHA-256 for revision 5, the iterated hash for revision 6
    fn hash_r56(&self, password: &[u8], salt: &[u8], user_data: &[u8]) -> PDFResult<Zeroizing<Vec<u8>>> {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        hasher.update(user_data);
        let mut k = Zeroizing::new(hasher.finalize().to_vec());
        if self.revision == 5 {
            return Ok(k);
        }

        let mut round = 0usize;
        loop {
            let mut k1 = Zeroizing::new(Vec::with_capacity(
                64 * (password.len() + k.len() + user_data.len()),
            ));
            for _ in 0..64 {
                k1.extend_from_slice(password);
                k1.extend_from_slice(&k);
                k1.extend_from_slice(user_data);
            }
            let e = Zeroizing::new(cbc_encrypt_raw(&k[..16], &k[16..32], &k1)?);

            // The first 16 bytes as a big-endian number, mod 3
            let selector = e[..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
            *k = match selector {
                0 => Sha256::digest(e.as_slice()).to_vec(),
                1 => Sha384::digest(e.as_slice()).to_vec(),
                _ => Sha512::digest(e.as_slice()).to_vec(),
            };

            round += 1;
            let last = e.last().copied().unwrap_or(0) as usize;
            if round >= 64 && last + 32 <= round {
                break;
            }
        }
        k.truncate(32);
        Ok(k)
    }

    fn authenticate_r56(&self, password: &[u8]) -> PDFResult<Option<Zeroizing<Vec<u8>>>> {
        let password = &password[..password.len().min(MAX_PASSWORD_LEN)];
        if self.u_value.len() < 48 {
            return Err(PDFError::invalid_dict_value("U", "shorter than 48 bytes"));
        }
        if self.o_value.len() < 48 {
            return Err(PDFError::invalid_dict_value("O", "shorter than 48 bytes"));
        }
        let u48 = &self.u_value[..48];

        let (key_hash, wrapped, name) =
            if *self.hash_r56(password, &self.o_value[32..40], u48)? == self.o_value[..32] {
                debug!("Owner password accepted");
                (self.hash_r56(password, &self.o_value[40..48], u48)?, &self.oe_value, "OE")
            } else if *self.hash_r56(password, &self.u_value[32..40], &[])? == self.u_value[..32] {
                (self.hash_r56(password, &self.u_value[40..48], &[])?, &self.ue_value, "UE")
            } else {
                return Ok(None);
            };

        let wrapped = wrapped
            .as_deref()
            .filter(|w| w.len() >= 32)
            .ok_or_else(|| PDFError::MissingDictionaryEntry(name.to_string()))?;
        let file_key = Zeroizing::new(cbc_decrypt_raw(&key_hash, &[0u8; 16], &wrapped[..32])?);
        self.check_perms(&file_key);
        Ok(Some(file_key))
    }

    /// Compare the decrypted `/Perms` with `/P`; a mismatch is only logged
    fn check_perms(&self, file_key: &[u8]) {
        let perms = match self.perms_value.as_deref() {
            Some(p) if p.len() >= 16 => p,
            _ => return,
        };
        match cbc_decrypt_raw(file_key, &[0u8; 16], &perms[..16]) {
            Ok(plain) if &plain[9..12] == b"adb" && plain[..4] == self.permissions.to_le_bytes() => {}
            Ok(_) => warn!("/Perms does not match /P"),
            Err(err) => warn!("Cannot decrypt /Perms: {}", err),
        }
    }
}

fn rc4_algorithm(key_length: usize) -> EncryptionAlgorithm {
    if key_length == 5 {
        EncryptionAlgorithm::RC4_40
    } else {
        EncryptionAlgorithm::RC4_128
    }
}

/// Algorithm, key length and embedded-files-only flag from `/CF`, `/StmF`, `/StrF` and `/EFF`
fn crypt_filter_algorithm(
    dict: &Dictionary,
    length_bits: i64,
) -> PDFResult<(EncryptionAlgorithm, usize, bool)> {
    let identity: &[u8] = b"Identity";
    let stream_filter = dict.get_name("StmF").unwrap_or(identity);
    let string_filter = dict.get_name("StrF").unwrap_or(identity);
    let embedded_filter = dict.get_name("EFF").filter(|name| *name != identity);

    let embedded_only =
        stream_filter == identity && string_filter == identity && embedded_filter.is_some();
    let selected = match embedded_filter {
        Some(name) if embedded_only => name,
        _ if stream_filter != identity => stream_filter,
        _ if string_filter != identity => string_filter,
        _ => {
            return Err(PDFError::invalid_dict_value(
                "StmF",
                "every crypt filter is Identity",
            ))
        }
    };

    let filter = dict
        .get_dict("CF")
        .and_then(|cf| cf.get_dict(selected))
        .ok_or_else(|| {
            PDFError::MissingDictionaryEntry(format!("CF/{}", String::from_utf8_lossy(selected)))
        })?;

    match filter.get_name("CFM") {
        Some(b"V2") => {
            // Crypt filter /Length is in bytes, though some writers use bits
            let n = filter
                .get_integer("Length")
                .map(|l| if l > 16 { l / 8 } else { l })
                .unwrap_or(length_bits / 8)
                .clamp(5, 16) as usize;
            Ok((rc4_algorithm(n), n, embedded_only))
        }
        Some(b"AESV2") => Ok((EncryptionAlgorithm::AES_128, 16, embedded_only)),
        Some(b"AESV3") => Ok((EncryptionAlgorithm::AES_256, 32, embedded_only)),
        other => Err(PDFError::UnsupportedSecurityHandler(format!(
            "crypt filter method {}",
            other.map_or("None".into(), String::from_utf8_lossy)
        ))),
    }
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PADDING;
    let n = password.len().min(32);
    padded[..n].copy_from_slice(&password[..n]);
    padded[n..].copy_from_slice(&PADDING[..32 - n]);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use pretty_assertions::assert_eq;

    const FILE_ID: &[u8] = b"0123456789abcdef";

    fn settings(algorithm: EncryptionAlgorithm) -> EncryptionSettings {
        EncryptionSettings::new(algorithm, "user", "owner")
    }

    #[test_log::test]
    fn test_password_padding() {
        let padded = pad_password(b"test");
        assert_eq!(&padded[..4], b"test");
        assert_eq!(&padded[4..], &PADDING[..28]);
        assert_eq!(pad_password(b""), PADDING);
        assert_eq!(pad_password(&[b'x'; 40]), [b'x'; 32]);
    }

    #[rstest]
    #[case(EncryptionAlgorithm::RC4_40, 2)]
    #[case(EncryptionAlgorithm::RC4_128, 3)]
    #[case(EncryptionAlgorithm::AES_128, 4)]
    #[case(EncryptionAlgorithm::AES_256, 6)]
    fn test_authenticate_through_dictionary(#[case] algorithm: EncryptionAlgorithm, #[case] revision: u8) {
        let created = StandardSecurityHandler::new(&settings(algorithm), FILE_ID).unwrap();
        assert_eq!(created.revision(), revision);
        let file_key = created.file_key().unwrap().to_vec();

        let read = StandardSecurityHandler::from_dict(&created.to_dict(), FILE_ID).unwrap();
        assert_eq!(read.algorithm(), algorithm);
        assert_eq!(read.authenticate_password(b"user").unwrap(), file_key);
        assert_eq!(read.authenticate_password(b"owner").unwrap(), file_key);
        assert!(matches!(
            read.authenticate_password(b"wrong"),
            Err(PDFError::AuthenticationFailed)
        ));
    }

    #[test_log::test]
    fn test_empty_user_password() {
        let settings = EncryptionSettings::new(EncryptionAlgorithm::RC4_128, "", "secret");
        let handler = StandardSecurityHandler::new(&settings, FILE_ID).unwrap();
        assert_eq!(
            handler.authenticate_password(b"").unwrap(),
            handler.file_key().unwrap().to_vec()
        );
    }

    #[test_log::test]
    fn test_file_id_matters() {
        let handler = StandardSecurityHandler::new(&settings(EncryptionAlgorithm::AES_128), FILE_ID).unwrap();
        let other = StandardSecurityHandler::from_dict(&handler.to_dict(), b"another document").unwrap();
        assert!(other.authenticate_password(b"user").is_err());
    }

    #[test_log::test]
    fn test_revision5_sha256() {
        // Build revision 5 values by hand: U = SHA-256(pw || vsalt) || vsalt || ksalt
        let file_key = [7u8; 32];
        let (vsalt, ksalt) = ([1u8; 8], [2u8; 8]);
        let mut u_value = Sha256::digest([b"pw".as_slice(), &vsalt].concat()).to_vec();
        u_value.extend_from_slice(&vsalt);
        u_value.extend_from_slice(&ksalt);
        let user_key = Sha256::digest([b"pw".as_slice(), &ksalt].concat());
        let ue = cbc_encrypt_raw(&user_key, &[0u8; 16], &file_key).unwrap();

        let mut dict = Dictionary::new();
        dict.set("Filter", PDFValue::name("Standard"));
        dict.set("V", 5);
        dict.set("R", 5);
        dict.set("Length", 256);
        let mut std_cf = Dictionary::new();
        std_cf.set("CFM", PDFValue::name("AESV3"));
        let mut cf = Dictionary::new();
        cf.set("StdCF", std_cf);
        dict.set("CF", cf);
        dict.set("StmF", PDFValue::name("StdCF"));
        dict.set("StrF", PDFValue::name("StdCF"));
        dict.set("O", PDFValue::hex_string(vec![0u8; 48]));
        dict.set("U", PDFValue::hex_string(u_value));
        dict.set("UE", PDFValue::hex_string(ue));
        dict.set("P", -4);

        let handler = StandardSecurityHandler::from_dict(&dict, b"").unwrap();
        assert_eq!(handler.authenticate_password(b"pw").unwrap(), file_key.to_vec());
    }

    // Reference values from an independent Python implementation of the revision 6 hash
    #[rstest]
    #[case(b"Secret!", false, "b3943fe236a3c85fc794743527895b2253824c0aa05de758dc0d06159e34da9d")]
    #[case(b"Secret!", true, "6969ad3aec532ed8fde0a8160bf809ab3f90e7ec83c19549d18c0045eaabaca2")]
    #[case(b"", false, "6e4191b6c94dd4705af38c7cc94ad87520e458d9ffc057b7104b429880f633be")]
    fn test_revision6_hash_known_answers(#[case] password: &[u8], #[case] owner: bool, #[case] expected: &str) {
        let handler = StandardSecurityHandler::new(&settings(EncryptionAlgorithm::AES_256), FILE_ID).unwrap();
        assert_eq!(handler.revision(), 6);
        let salt: Vec<u8> = (0x10..0x18).collect();
        let user_data: Vec<u8> = if owner { (0x30..0x60).collect() } else { Vec::new() };
        let hash = handler.hash_r56(password, &salt, &user_data).unwrap();
        assert_eq!(hex::encode(hash.as_slice()), expected);
    }

    #[test_log::test]
    fn test_metadata_flag_changes_key() {
        let mut plain = settings(EncryptionAlgorithm::AES_128);
        plain.encrypt_metadata = false;
        let handler = StandardSecurityHandler::new(&plain, FILE_ID).unwrap();
        let dict = handler.to_dict();
        assert_eq!(dict.get_bool("EncryptMetadata"), Some(false));

        let read = StandardSecurityHandler::from_dict(&dict, FILE_ID).unwrap();
        assert!(!read.encrypt_metadata());
        assert_eq!(
            read.authenticate_password(b"user").unwrap(),
            handler.file_key().unwrap().to_vec()
        );
    }

    #[test_log::test]
    fn test_embedded_files_only_dictionary() {
        let mut eff = settings(EncryptionAlgorithm::AES_256);
        eff.embedded_files_only = true;
        let handler = StandardSecurityHandler::new(&eff, FILE_ID).unwrap();
        let dict = handler.to_dict();
        assert_eq!(dict.get_name("StmF"), Some(b"Identity".as_slice()));
        assert_eq!(dict.get_name("EFF"), Some(b"StdCF".as_slice()));

        let read = StandardSecurityHandler::from_dict(&dict, FILE_ID).unwrap();
        assert!(read.embedded_files_only());
        let key = read.authenticate_password(b"user").unwrap();
        assert!(read.engine(&key).unwrap().embedded_files_only());

        let mut rc4 = settings(EncryptionAlgorithm::RC4_40);
        rc4.embedded_files_only = true;
        assert!(matches!(
            StandardSecurityHandler::new(&rc4, FILE_ID),
            Err(PDFError::ApiMisuse(_))
        ));
    }

    #[test_log::test]
    fn test_permissions_round_trip() {
        let mut restricted = settings(EncryptionAlgorithm::RC4_128);
        restricted.permissions = PDFPermissions::new(PDFPermissions::PRINT | PDFPermissions::COPY);
        let handler = StandardSecurityHandler::new(&restricted, FILE_ID).unwrap();
        let read = StandardSecurityHandler::from_dict(&handler.to_dict(), FILE_ID).unwrap();
        let permissions = read.permissions();
        assert!(permissions.has_permission(PDFPermissions::PRINT));
        assert!(permissions.has_permission(PDFPermissions::COPY));
        assert!(!permissions.has_permission(PDFPermissions::MODIFY));
        assert!(read.to_dict().get_integer("P").unwrap() < 0);
    }

    #[test_log::test]
    fn test_unsupported_dictionaries() {
        let mut dict = Dictionary::new();
        dict.set("Filter", PDFValue::name("Adobe.PubSec"));
        assert!(matches!(
            StandardSecurityHandler::from_dict(&dict, FILE_ID),
            Err(PDFError::UnsupportedSecurityHandler(name)) if name == "Adobe.PubSec"
        ));

        dict.set("Filter", PDFValue::name("Standard"));
        dict.set("V", 2);
        dict.set("R", 7);
        assert!(matches!(
            StandardSecurityHandler::from_dict(&dict, FILE_ID),
            Err(PDFError::UnsupportedRevision(7))
        ));
    }
}
