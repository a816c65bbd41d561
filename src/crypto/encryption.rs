//! AES-256-GCM Encryption Implementation
//!
//! Every payload is sealed under a fresh random 96-bit IV. The stored and
//! transported form is a single blob:
//!
//! ```text
//! [ IV: 12 bytes ][ ciphertext ][ tag: 16 bytes ]
//! ```
//!
//! No associated data is bound. Any failure to open a blob is reported as
//! [`Error::DecryptionFailed`] regardless of cause.

use crate::crypto::{EncryptionKey, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};

/// Output of a single encryption: the IV and the ciphertext with appended tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Nonce used for encryption (unique per encryption)
    pub iv: [u8; NONCE_SIZE],
    /// Ciphertext with appended authentication tag
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// Frame into the wire/storage blob
    pub fn to_blob(&self) -> Vec<u8> {
        frame(&self.iv, &self.ciphertext)
    }
}

fn cipher_key(key: &EncryptionKey) -> Result<LessSafeKey> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| Error::Encryption("Failed to create encryption key".to_string()))?;
    Ok(LessSafeKey::new(unbound_key))
}

/// Encrypt data using AES-256-GCM under a freshly drawn IV
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<SealedPayload> {
    let sealing_key = cipher_key(key)?;

    let mut iv = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::assume_unique_for_key(iv);

    let mut in_out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    in_out.extend_from_slice(plaintext);

    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::Encryption("Encryption failed".to_string()))?;

    Ok(SealedPayload {
        iv,
        ciphertext: in_out,
    })
}

/// Decrypt data using AES-256-GCM
///
/// Wrong key, tampering and truncation are deliberately indistinguishable.
pub fn decrypt(ciphertext: &[u8], iv: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if iv.len() != NONCE_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let opening_key = cipher_key(key).map_err(|_| Error::DecryptionFailed)?;
    let nonce = Nonce::try_assume_unique_for_key(iv).map_err(|_| Error::DecryptionFailed)?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::DecryptionFailed)?;

    Ok(plaintext.to_vec())
}

/// Concatenate IV and ciphertext into a blob, IV first
pub fn frame(iv: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(iv);
    blob.extend_from_slice(ciphertext);
    blob
}

/// Split a blob into IV and ciphertext
pub fn unframe(blob: &[u8]) -> Result<([u8; NONCE_SIZE], &[u8])> {
    if blob.len() <= NONCE_SIZE {
        return Err(Error::MalformedBlob { len: blob.len() });
    }

    let mut iv = [0u8; NONCE_SIZE];
    iv.copy_from_slice(&blob[..NONCE_SIZE]);
    Ok((iv, &blob[NONCE_SIZE..]))
}

/// Encrypt and frame in one step
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    Ok(encrypt(plaintext, key)?.to_blob())
}

/// Unframe and decrypt in one step
pub fn open(blob: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let (iv, ciphertext) = unframe(blob)?;
    decrypt(ciphertext, &iv, key)
}
