//! filepush - Zero-knowledge encrypted file sharing
//!
//! Files are encrypted locally with a fresh AES-256-GCM key, the ciphertext
//! is uploaded to a server that stores it blindly, and the key travels only in
//! the share link's URL fragment.

pub mod config;
pub mod crypto;
pub mod error;
pub mod retrieve;
pub mod share;
pub mod transport;
pub mod upload;
pub mod validation;

pub use config::ClientConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ClientConfig;
    pub use crate::crypto::EncryptionKey;
    pub use crate::error::{Error, Result};
    pub use crate::retrieve::{retrieve, RetrievalOrchestrator, RetrievalState, RetrievedFile};
    pub use crate::share::{build_share_url, parse_key_from_url, ShareDescriptor};
    pub use crate::transport::{HttpTransport, MemoryTransport, OwnerInfo, Transport};
    pub use crate::upload::{upload, ShareReceipt, UploadOptions, UploadOrchestrator, UploadSource, UploadState};
}
