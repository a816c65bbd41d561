//! Transport to the blind storage server
//!
//! The [`Transport`] trait is the contract between the orchestrators and the
//! server: it carries ciphertext and plaintext metadata, and never a key.
//!
//! ## Implementations
//!
//! - [`HttpTransport`]: talks to the real server over HTTPS
//! - [`MemoryTransport`]: in-process server emulation, records every request

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::{MemoryTransport, RecordedRequest};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Everything sent to the server for one upload
#[derive(Clone)]
pub struct UploadRequest {
    /// Framed ciphertext blob (IV ‖ ciphertext ‖ tag)
    pub blob: Vec<u8>,
    /// Original file name
    pub file_name: String,
    /// Declared MIME type of the plaintext
    pub mime_type: String,
    /// Plaintext size in bytes
    pub size: u64,
    /// Requested lifetime in minutes
    pub expires_in_minutes: u32,
    /// Optional access password, checked by the server before release
    pub password: Option<String>,
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("blob_len", &self.blob.len())
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .field("expires_in_minutes", &self.expires_in_minutes)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Server reply to a successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Opaque share identifier
    #[serde(rename = "shareId")]
    pub opaque_id: String,
    /// Secret that allows deleting the upload early
    pub owner_token: String,
    /// When the server will drop the blob
    pub expires_at: DateTime<Utc>,
}

/// Metadata reported for a share, without the blob
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    #[serde(rename = "fileType")]
    pub mime_type: String,
    #[serde(rename = "fileSize", deserialize_with = "size_from_string_or_number")]
    pub size: u64,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub password_protected: bool,
}

/// What the owner of a share can see about it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerInfo {
    #[serde(rename = "shareId")]
    pub opaque_id: String,
    pub file_name: String,
    #[serde(rename = "fileType")]
    pub mime_type: String,
    #[serde(rename = "fileSize", deserialize_with = "size_from_string_or_number")]
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub password_protected: bool,
}

/// Blob released by the server once the password gate (if any) passed
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    /// Framed ciphertext, standard base64
    #[serde(rename = "encryptedData")]
    pub blob_base64: String,
    pub file_name: String,
    #[serde(rename = "fileType")]
    pub mime_type: String,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("blob_base64_len", &self.blob_base64.len())
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Server contract used by the upload and retrieval flows
///
/// Implementations must never add anything derived from a share link's
/// fragment to a request. Failures map onto [`crate::Error`]:
/// `Validation`, `PayloadTooLarge`, `Unauthorized`, `NotFound`, `Expired`,
/// or `Transmission` for everything else.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Store a ciphertext blob with its metadata
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse>;

    /// Look up metadata for a share
    async fn info(&self, opaque_id: &str) -> Result<FileMetadata>;

    /// Exchange a share id (and password, when gated) for the blob
    async fn fetch(&self, opaque_id: &str, password: Option<&str>) -> Result<FetchResponse>;

    /// Delete a share before it expires
    async fn delete(&self, owner_token: &str) -> Result<()>;

    /// Look up a share by its owner token, including deleted ones
    async fn owner_info(&self, owner_token: &str) -> Result<OwnerInfo>;
}

/// Error body returned by the server
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

fn size_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
