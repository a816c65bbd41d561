//! Per-upload encryption keys
//!
//! A key is generated fresh for every upload and exported once, as unpadded
//! URL-safe base64, into the share link fragment. The receiving side imports
//! the same text back into an equivalent key. No key is ever held globally.

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use percent_encoding::percent_decode_str;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

/// 256-bit symmetric key for AES-256-GCM
#[derive(Clone)]
pub struct EncryptionKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl EncryptionKey {
    /// Generate a fresh random key from the OS CSPRNG
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(key.as_mut());
        EncryptionKey { key }
    }

    /// Build a key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyFormat);
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(EncryptionKey { key })
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Serialize to the fragment-safe text form
    pub fn export(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.key.as_ref())
    }

    /// Parse the fragment-safe text form
    ///
    /// Accepts the text with or without trailing `=` padding, and tolerates a
    /// percent-encoded copy (as produced by some link shorteners and mail
    /// clients). Anything that does not decode to exactly 32 bytes is rejected.
    pub fn import(text: &str) -> Result<Self> {
        let text = text.trim();
        let text = if text.contains('%') {
            percent_decode_str(text)
                .decode_utf8()
                .map_err(|_| Error::InvalidKeyFormat)?
                .into_owned()
        } else {
            text.to_string()
        };
        let text = text.trim_end_matches('=');
        if text.is_empty() {
            return Err(Error::InvalidKeyFormat);
        }

        let bytes = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(text.as_bytes())
                .map_err(|_| Error::InvalidKeyFormat)?,
        );

        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Generate a fresh random 256-bit key
pub fn generate_key() -> EncryptionKey {
    EncryptionKey::generate()
}

/// Export a key to its URL-fragment-safe text form
pub fn export_key(key: &EncryptionKey) -> Result<String> {
    let text = key.export();
    if text.contains(['+', '/', '=']) {
        return Err(Error::Serialization(
            "key export produced non URL-safe characters".to_string(),
        ));
    }
    Ok(text)
}

/// Import a key from its text form
pub fn import_key(text: &str) -> Result<EncryptionKey> {
    EncryptionKey::import(text)
}
