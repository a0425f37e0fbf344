//! Security handlers for PDF encryption/decryption

mod standard;

pub use standard::StandardSecurityHandler;

use log::debug;
use crate::error::{PDFError, PDFResult};
use crate::pdf::Dictionary;

/// Pick the handler for an `/Encrypt` dictionary.
///
/// Only the password-based `/Standard` handler is available; certificate handlers
/// (`Adobe.PubSec`, `Adobe.PPKLite`) are reported as unsupported.
pub fn security_handler(encrypt: &Dictionary, file_id: &[u8]) -> PDFResult<StandardSecurityHandler> {
    let filter = encrypt
        .get_name("Filter")
        .ok_or_else(|| PDFError::MissingDictionaryEntry("Filter".to_string()))?;
    debug!("Selecting security handler {}", String::from_utf8_lossy(filter));
    match filter {
        b"Standard" => StandardSecurityHandler::from_dict(encrypt, file_id),
        other => Err(PDFError::UnsupportedSecurityHandler(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}
