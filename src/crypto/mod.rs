//! Cryptography module for filepush
//!
//! Provides AES-256-GCM encryption of whole files with a per-upload random key.
//! Keys travel only in the share link fragment; the server sees ciphertext only.

mod encryption;
mod keys;

pub use encryption::{decrypt, encrypt, frame, open, seal, unframe, SealedPayload};
pub use keys::{export_key, generate_key, import_key, EncryptionKey};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce (IV) in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;
