//! In-process emulation of the storage server
//!
//! Behaves like the real server: validates uploads, hashes access passwords
//! with Argon2id, stores owner tokens hashed, enforces expiry and counts
//! views. Every request is recorded in the same shape it would take on the
//! wire so callers can assert nothing key-derived ever left the client.

use super::{FetchResponse, FileMetadata, OwnerInfo, Transport, UploadRequest, UploadResponse};
use crate::error::{Error, Result};
use crate::validation;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

/// Shortest share id the server accepts on lookup
const MIN_SHARE_ID_LEN: usize = 10;

/// Shortest owner token the server accepts on delete
const MIN_OWNER_TOKEN_LEN: usize = 20;

/// One request as it would have appeared on the wire
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: &'static str,
    /// Request path, relative to the API root
    pub path: String,
    /// Form or JSON fields, in send order
    pub fields: Vec<(String, String)>,
    /// Raw body bytes (the blob, for uploads)
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Whether `needle` appears anywhere in the request
    pub fn contains(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return false;
        }
        self.path.contains(needle)
            || self
                .fields
                .iter()
                .any(|(k, v)| k.contains(needle) || v.contains(needle))
            || self
                .body
                .windows(needle.len())
                .any(|w| w == needle.as_bytes())
    }
}

struct StoredUpload {
    blob: Vec<u8>,
    file_name: String,
    mime_type: String,
    size: u64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    password_hash: Option<String>,
    view_count: u64,
    deleted: bool,
}

/// In-memory server
pub struct MemoryTransport {
    uploads: DashMap<String, StoredUpload>,
    /// blake3(owner token) -> share id
    owners: DashMap<String, String>,
    requests: RwLock<Vec<RecordedRequest>>,
    clock_offset: Mutex<Duration>,
    forced_failure: Mutex<Option<u16>>,
    max_file_size: u64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create an empty server with the standard size cap
    pub fn new() -> Self {
        Self::with_max_file_size(validation::MAX_FILE_SIZE)
    }

    /// Create an empty server with a custom size cap
    pub fn with_max_file_size(max_file_size: u64) -> Self {
        MemoryTransport {
            uploads: DashMap::new(),
            owners: DashMap::new(),
            requests: RwLock::new(Vec::new()),
            clock_offset: Mutex::new(Duration::zero()),
            forced_failure: Mutex::new(None),
            max_file_size,
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.read().clone()
    }

    /// Number of requests received so far
    pub fn request_count(&self) -> usize {
        self.requests.read().len()
    }

    /// Number of shares currently stored (including deleted ones)
    pub fn stored_count(&self) -> usize {
        self.uploads.len()
    }

    /// Raw stored blob for a share
    pub fn stored_blob(&self, opaque_id: &str) -> Option<Vec<u8>> {
        self.uploads.get(opaque_id).map(|u| u.blob.clone())
    }

    /// Overwrite the stored blob, emulating storage corruption
    pub fn replace_blob(&self, opaque_id: &str, blob: Vec<u8>) -> bool {
        match self.uploads.get_mut(opaque_id) {
            Some(mut upload) => {
                upload.blob = blob;
                true
            }
            None => false,
        }
    }

    /// Times a share has been released
    pub fn view_count(&self, opaque_id: &str) -> Option<u64> {
        self.uploads.get(opaque_id).map(|u| u.view_count)
    }

    /// Move the server clock forward
    pub fn advance_clock(&self, by: Duration) {
        *self.clock_offset.lock() += by;
    }

    /// Make every following request fail with `status` (None clears it)
    pub fn fail_with_status(&self, status: Option<u16>) {
        *self.forced_failure.lock() = status;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now() + *self.clock_offset.lock()
    }

    fn record(&self, request: RecordedRequest) -> Result<()> {
        debug!("{} {}", request.method, request.path);
        self.requests.write().push(request);

        match *self.forced_failure.lock() {
            Some(status) => Err(Error::from_status(status, "injected failure")),
            None => Ok(()),
        }
    }

    fn hasher() -> Result<Argon2<'static>> {
        let params = Params::new(8 * 1024, 1, 1, None)
            .map_err(|e| Error::Transmission {
                status: Some(500),
                message: format!("argon2 params: {}", e),
            })?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Self::hasher()?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::Transmission {
                status: Some(500),
                message: format!("password hashing failed: {}", e),
            })
    }

    fn verify_password(hash: &str, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Self::hasher()
            .map(|h| h.verify_password(password.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    }

    fn hash_owner_token(token: &str) -> String {
        blake3::hash(token.as_bytes()).to_hex().to_string()
    }

    fn random_token(len: usize) -> String {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn check_share_id(opaque_id: &str) -> Result<()> {
        if opaque_id.len() < MIN_SHARE_ID_LEN {
            return Err(Error::Validation("Invalid share ID".to_string()));
        }
        Ok(())
    }

    fn owned_share(&self, owner_token: &str) -> Result<String> {
        if owner_token.len() < MIN_OWNER_TOKEN_LEN {
            return Err(Error::Validation("Invalid owner token".to_string()));
        }
        self.owners
            .get(&Self::hash_owner_token(owner_token))
            .map(|id| id.value().clone())
            .ok_or(Error::NotFound)
    }

    fn check_live(&self, upload: &StoredUpload) -> Result<()> {
        if upload.deleted {
            return Err(Error::NotFound);
        }
        if self.now() > upload.expires_at {
            return Err(Error::Expired);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse> {
        let mut fields = vec![
            ("fileName".to_string(), request.file_name.clone()),
            ("fileType".to_string(), request.mime_type.clone()),
            ("fileSize".to_string(), request.size.to_string()),
            ("expiresIn".to_string(), request.expires_in_minutes.to_string()),
        ];
        if let Some(password) = &request.password {
            fields.push(("password".to_string(), password.clone()));
        }
        self.record(RecordedRequest {
            method: "POST",
            path: "/upload".to_string(),
            fields,
            body: request.blob.clone(),
        })?;

        validation::validate_file_name(&request.file_name)?;
        validation::validate_mime_type(&request.mime_type)?;
        validation::validate_size(request.size, self.max_file_size)?;
        validation::validate_expiry(request.expires_in_minutes)?;
        if request.blob.is_empty() {
            return Err(Error::Validation("No file provided".to_string()));
        }

        let password_hash = match request.password.as_deref() {
            Some(p) if !p.is_empty() => Some(Self::hash_password(p)?),
            _ => None,
        };

        let opaque_id = Self::random_token(12);
        let owner_token = Self::random_token(32);
        let created_at = self.now();
        let expires_at = created_at + Duration::minutes(i64::from(request.expires_in_minutes));

        self.owners
            .insert(Self::hash_owner_token(&owner_token), opaque_id.clone());
        self.uploads.insert(
            opaque_id.clone(),
            StoredUpload {
                blob: request.blob,
                file_name: request.file_name,
                mime_type: request.mime_type,
                size: request.size,
                created_at,
                expires_at,
                password_hash,
                view_count: 0,
                deleted: false,
            },
        );

        Ok(UploadResponse {
            opaque_id,
            owner_token,
            expires_at,
        })
    }

    async fn info(&self, opaque_id: &str) -> Result<FileMetadata> {
        self.record(RecordedRequest {
            method: "GET",
            path: format!("/view/{}/info", opaque_id),
            fields: Vec::new(),
            body: Vec::new(),
        })?;
        Self::check_share_id(opaque_id)?;

        let upload = self.uploads.get(opaque_id).ok_or(Error::NotFound)?;
        self.check_live(&upload)?;

        Ok(FileMetadata {
            file_name: upload.file_name.clone(),
            mime_type: upload.mime_type.clone(),
            size: upload.size,
            expires_at: upload.expires_at,
            view_count: upload.view_count,
            password_protected: upload.password_hash.is_some(),
        })
    }

    async fn fetch(&self, opaque_id: &str, password: Option<&str>) -> Result<FetchResponse> {
        let fields = password
            .map(|p| vec![("password".to_string(), p.to_string())])
            .unwrap_or_default();
        self.record(RecordedRequest {
            method: "POST",
            path: format!("/view/{}", opaque_id),
            fields,
            body: Vec::new(),
        })?;
        Self::check_share_id(opaque_id)?;

        let mut upload = self.uploads.get_mut(opaque_id).ok_or(Error::NotFound)?;
        self.check_live(&upload)?;

        if let Some(hash) = &upload.password_hash {
            match password {
                Some(p) if Self::verify_password(hash, p) => {}
                _ => return Err(Error::Unauthorized),
            }
        }

        upload.view_count += 1;

        Ok(FetchResponse {
            blob_base64: STANDARD.encode(&upload.blob),
            file_name: upload.file_name.clone(),
            mime_type: upload.mime_type.clone(),
        })
    }

    async fn delete(&self, owner_token: &str) -> Result<()> {
        self.record(RecordedRequest {
            method: "DELETE",
            path: format!("/delete/{}", owner_token),
            fields: Vec::new(),
            body: Vec::new(),
        })?;
        let opaque_id = self.owned_share(owner_token)?;
        let mut upload = self.uploads.get_mut(&opaque_id).ok_or(Error::NotFound)?;
        if upload.deleted {
            return Err(Error::NotFound);
        }

        upload.deleted = true;
        upload.blob.clear();
        Ok(())
    }

    async fn owner_info(&self, owner_token: &str) -> Result<OwnerInfo> {
        self.record(RecordedRequest {
            method: "GET",
            path: format!("/delete/{}/info", owner_token),
            fields: Vec::new(),
            body: Vec::new(),
        })?;

        let opaque_id = self.owned_share(owner_token)?;
        let upload = self.uploads.get(&opaque_id).ok_or(Error::NotFound)?;

        Ok(OwnerInfo {
            opaque_id,
            file_name: upload.file_name.clone(),
            mime_type: upload.mime_type.clone(),
            size: upload.size,
            created_at: upload.created_at,
            expires_at: upload.expires_at,
            view_count: upload.view_count,
            is_deleted: upload.deleted,
            password_protected: upload.password_hash.is_some(),
        })
    }
}
