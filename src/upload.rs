//! Upload flow
//!
//! Sequences one upload through
//! `Idle -> KeyGenerated -> Encrypted -> Transmitted -> LinkReady`, with
//! `Failed` reachable from every step. A flow is single-use; a failed upload
//! is restarted with a new orchestrator and a new key.

use crate::config::ClientConfig;
use crate::crypto::{self, EncryptionKey};
use crate::error::{Error, Result};
use crate::share::{build_share_url, parse_view_base, ShareDescriptor};
use crate::transport::{Transport, UploadRequest};
use crate::validation::{self, MAX_FILE_SIZE};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// File name used for text shares
pub const TEXT_FILE_NAME: &str = "shared-text.txt";

/// MIME type of a multi-file bundle
pub const BUNDLE_MIME_TYPE: &str = "application/zip";

/// Upload flow states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    KeyGenerated,
    Encrypted,
    Transmitted,
    LinkReady,
    Failed,
}

/// Where the plaintext comes from
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Read from a local file
    Path(PathBuf),
    /// Already in memory
    Bytes(Vec<u8>),
    /// Several local files, zipped into one archive before encryption
    Bundle(Vec<PathBuf>),
}

/// Plaintext metadata sent alongside the ciphertext
#[derive(Clone)]
pub struct UploadOptions {
    pub file_name: String,
    pub mime_type: String,
    pub expires_in_minutes: u32,
    pub password: Option<String>,
}

impl UploadOptions {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, expires_in_minutes: u32) -> Self {
        UploadOptions {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            expires_in_minutes,
            password: None,
        }
    }

    /// Gate the share behind a password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Options for sharing a snippet of text
    pub fn text(expires_in_minutes: u32) -> Self {
        Self::new(TEXT_FILE_NAME, "text/plain", expires_in_minutes)
    }

    /// Options for a bundle of `count` files, named `<count>_files.zip`
    pub fn bundle(count: usize, expires_in_minutes: u32) -> Self {
        Self::new(format!("{}_files.zip", count), BUNDLE_MIME_TYPE, expires_in_minutes)
    }

    fn validate(&self) -> Result<()> {
        validation::validate_file_name(&self.file_name)?;
        validation::validate_mime_type(&self.mime_type)?;
        validation::validate_expiry(self.expires_in_minutes)?;
        validation::validate_password(self.password.as_deref())
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("expires_in_minutes", &self.expires_in_minutes)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Result of a completed upload
#[derive(Clone)]
pub struct ShareReceipt {
    /// Complete link, key in the fragment
    pub share_url: Url,
    /// The two halves of the link
    pub descriptor: ShareDescriptor,
    /// Secret for early deletion; never part of the share link
    pub owner_token: String,
    /// When the server drops the blob
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for ShareReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareReceipt")
            .field("descriptor", &self.descriptor)
            .field("owner_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Drives a single upload
pub struct UploadOrchestrator<'a, T: Transport + ?Sized> {
    transport: &'a T,
    view_url: String,
    max_file_size: u64,
    state: UploadState,
    history: Vec<UploadState>,
}

impl<'a, T: Transport + ?Sized> UploadOrchestrator<'a, T> {
    /// Create a flow that renders links under `view_url`
    pub fn new(transport: &'a T, view_url: impl Into<String>) -> Self {
        UploadOrchestrator {
            transport,
            view_url: view_url.into(),
            max_file_size: MAX_FILE_SIZE,
            state: UploadState::Idle,
            history: vec![UploadState::Idle],
        }
    }

    /// Create a flow from client configuration
    pub fn from_config(transport: &'a T, config: &ClientConfig) -> Self {
        Self::new(transport, config.server.view_url.clone())
            .with_max_file_size(config.upload.max_file_size)
    }

    /// Cap the plaintext size (never above the server's limit)
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size.min(MAX_FILE_SIZE);
        self
    }

    /// Current state
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[UploadState] {
        &self.history
    }

    /// How many times `state` was entered
    pub fn visits(&self, state: UploadState) -> usize {
        self.history.iter().filter(|s| **s == state).count()
    }

    fn transition(&mut self, next: UploadState) {
        debug!("Upload: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!("Upload failed in {:?}: {}", self.state, error);
        self.transition(UploadState::Failed);
        error
    }

    /// Run the whole flow
    pub async fn run(&mut self, source: UploadSource, options: UploadOptions) -> Result<ShareReceipt> {
        if self.state != UploadState::Idle {
            return Err(Error::InvalidState(format!(
                "upload already ran (state {:?}); start a new flow",
                self.state
            )));
        }

        match self.execute(source, options).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn execute(&mut self, source: UploadSource, options: UploadOptions) -> Result<ShareReceipt> {
        options.validate()?;
        parse_view_base(&self.view_url)?;

        let key = crypto::generate_key();
        self.transition(UploadState::KeyGenerated);

        let plaintext = read_source(source).await?;
        validation::validate_size(plaintext.len() as u64, self.max_file_size)?;
        let blob = crypto::seal(&plaintext, &key)?;
        let size = plaintext.len() as u64;
        drop(plaintext);
        self.transition(UploadState::Encrypted);

        let password_protected = options.password.is_some();
        let request = UploadRequest {
            blob,
            file_name: options.file_name,
            mime_type: options.mime_type,
            size,
            expires_in_minutes: options.expires_in_minutes,
            password: options.password,
        };
        let response = self.transport.upload(request).await.map_err(into_transmission)?;
        self.transition(UploadState::Transmitted);

        let receipt = self.link(&key, response.opaque_id, response.owner_token, response.expires_at, password_protected)?;
        self.transition(UploadState::LinkReady);

        info!(
            "Upload ready: share {} expires {}",
            receipt.descriptor.opaque_id, receipt.expires_at
        );
        Ok(receipt)
    }

    fn link(
        &self,
        key: &EncryptionKey,
        opaque_id: String,
        owner_token: String,
        expires_at: DateTime<Utc>,
        password_protected: bool,
    ) -> Result<ShareReceipt> {
        let key_string = crypto::export_key(key)?;
        let share_url = build_share_url(&self.view_url, &opaque_id, &key_string)?;

        Ok(ShareReceipt {
            share_url,
            descriptor: ShareDescriptor::new(opaque_id, key_string, password_protected),
            owner_token,
            expires_at,
        })
    }
}

/// Upload a file or buffer in one call
pub async fn upload<T: Transport + ?Sized>(
    transport: &T,
    view_url: &str,
    source: UploadSource,
    options: UploadOptions,
) -> Result<ShareReceipt> {
    UploadOrchestrator::new(transport, view_url).run(source, options).await
}

/// Share a snippet of text
pub async fn upload_text<T: Transport + ?Sized>(
    transport: &T,
    view_url: &str,
    text: &str,
    options: UploadOptions,
) -> Result<ShareReceipt> {
    if text.trim().is_empty() {
        return Err(Error::Validation("no text entered".to_string()));
    }
    upload(transport, view_url, UploadSource::Bytes(text.as_bytes().to_vec()), options).await
}

async fn read_source(source: UploadSource) -> Result<Vec<u8>> {
    match source {
        UploadSource::Bytes(bytes) => Ok(bytes),
        UploadSource::Path(path) => read_file(&path).await,
        UploadSource::Bundle(paths) => {
            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| Error::SourceRead(format!("{}: no file name", path.display())))?;
                files.push((name.to_string(), read_file(path).await?));
            }
            bundle_files(&files)
        }
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::SourceRead(format!("{}: {}", path.display(), e)))
}

/// Zip `(name, contents)` pairs into one archive
///
/// Entry names must be unique.
pub fn bundle_files(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    if files.is_empty() {
        return Err(Error::Validation("no files selected".to_string()));
    }

    let mut seen = HashSet::new();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, contents) in files {
        if !seen.insert(name.as_str()) {
            return Err(Error::Validation(format!("{} appears twice in the bundle", name)));
        }
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| Error::SourceRead(format!("zip {}: {}", name, e)))?;
        writer.write_all(contents)?;
    }

    let archive = writer
        .finish()
        .map_err(|e| Error::SourceRead(format!("zip: {}", e)))?;
    debug!("Bundled {} files", files.len());
    Ok(archive.into_inner())
}

/// Server-side rejections keep their meaning; everything else is a
/// transmission failure.
fn into_transmission(error: Error) -> Error {
    match error {
        e @ (Error::Validation(_)
        | Error::PayloadTooLarge(_)
        | Error::Unauthorized
        | Error::Transmission { .. }) => e,
        other => Error::Transmission {
            status: None,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::parse_share_url;
    use crate::transport::MemoryTransport;

    const VIEW: &str = "https://share.example.com/view";

    #[tokio::test]
    async fn test_upload_produces_link() {
        let server = MemoryTransport::new();
        let mut flow = UploadOrchestrator::new(&server, VIEW);
        let receipt = flow
            .run(
                UploadSource::Bytes(b"hello world".to_vec()),
                UploadOptions::new("hello.txt", "text/plain", 60),
            )
            .await
            .unwrap();

        assert_eq!(flow.state(), UploadState::LinkReady);
        assert_eq!(
            flow.history(),
            &[
                UploadState::Idle,
                UploadState::KeyGenerated,
                UploadState::Encrypted,
                UploadState::Transmitted,
                UploadState::LinkReady,
            ]
        );

        let parsed = parse_share_url(receipt.share_url.as_str()).unwrap();
        assert_eq!(parsed.opaque_id, receipt.descriptor.opaque_id);
        assert_eq!(parsed.key, receipt.descriptor.key);
        assert!(receipt.share_url.as_str().starts_with(VIEW));
    }

    #[tokio::test]
    async fn test_blob_on_server_is_ciphertext() {
        let server = MemoryTransport::new();
        let receipt = upload(
            &server,
            VIEW,
            UploadSource::Bytes(b"top secret plans".to_vec()),
            UploadOptions::new("plans.txt", "text/plain", 60),
        )
        .await
        .unwrap();

        let blob = server.stored_blob(&receipt.descriptor.opaque_id).unwrap();
        assert_eq!(blob.len(), crypto::NONCE_SIZE + 16 + crypto::TAG_SIZE);
        assert!(!blob.windows(6).any(|w| w == b"secret"));

        let key = crypto::import_key(&receipt.descriptor.key).unwrap();
        assert_eq!(crypto::open(&blob, &key).unwrap(), b"top secret plans");
    }

    #[tokio::test]
    async fn test_key_never_sent() {
        let server = MemoryTransport::new();
        let receipt = upload(
            &server,
            VIEW,
            UploadSource::Bytes(vec![1, 2, 3, 4]),
            UploadOptions::new("a.bin", "application/octet-stream", 60).with_password("pw"),
        )
        .await
        .unwrap();

        let fragment = receipt.share_url.fragment().unwrap().to_string();
        for request in server.requests() {
            assert!(!request.contains(&receipt.descriptor.key));
            assert!(!request.contains(&fragment));
        }
    }

    #[tokio::test]
    async fn test_unreadable_source_fails() {
        let server = MemoryTransport::new();
        let dir = tempfile::tempdir().unwrap();
        let mut flow = UploadOrchestrator::new(&server, VIEW);
        let result = flow
            .run(
                UploadSource::Path(dir.path().join("missing.txt")),
                UploadOptions::new("missing.txt", "text/plain", 60),
            )
            .await;

        assert!(matches!(result, Err(Error::SourceRead(_))));
        assert_eq!(flow.state(), UploadState::Failed);
        assert_eq!(flow.visits(UploadState::Encrypted), 0);
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_reads_file_source() {
        let server = MemoryTransport::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let receipt = upload(
            &server,
            VIEW,
            UploadSource::Path(path),
            UploadOptions::new("data.csv", "text/csv", 60),
        )
        .await
        .unwrap();
        let info = server.info(&receipt.descriptor.opaque_id).await.unwrap();
        assert_eq!(info.size, 8);
    }

    #[tokio::test]
    async fn test_transmission_failure() {
        let server = MemoryTransport::new();
        server.fail_with_status(Some(500));
        let mut flow = UploadOrchestrator::new(&server, VIEW);
        let result = flow
            .run(
                UploadSource::Bytes(b"x".to_vec()),
                UploadOptions::new("x.txt", "text/plain", 60),
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Transmission { status: Some(500), .. }));
        assert!(err.is_retryable());
        assert_eq!(flow.state(), UploadState::Failed);
        assert_eq!(flow.visits(UploadState::Transmitted), 0);
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_key() {
        let server = MemoryTransport::new();
        let mut flow = UploadOrchestrator::new(&server, VIEW);
        let result = flow
            .run(
                UploadSource::Bytes(b"x".to_vec()),
                UploadOptions::new("x.exe", "application/x-msdownload", 60),
            )
            .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(flow.history(), &[UploadState::Idle, UploadState::Failed]);
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_password_rejected() {
        let server = MemoryTransport::new();
        let result = upload(
            &server,
            VIEW,
            UploadSource::Bytes(b"x".to_vec()),
            UploadOptions::new("x.txt", "text/plain", 60).with_password(""),
        )
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_size_cap() {
        let server = MemoryTransport::new();
        let mut flow = UploadOrchestrator::new(&server, VIEW).with_max_file_size(4);
        let result = flow
            .run(
                UploadSource::Bytes(b"12345".to_vec()),
                UploadOptions::new("x.txt", "text/plain", 60),
            )
            .await;
        assert!(matches!(result, Err(Error::PayloadTooLarge(_))));
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_flow_is_single_use() {
        let server = MemoryTransport::new();
        let mut flow = UploadOrchestrator::new(&server, VIEW);
        flow.run(
            UploadSource::Bytes(b"x".to_vec()),
            UploadOptions::new("x.txt", "text/plain", 60),
        )
        .await
        .unwrap();

        let again = flow
            .run(
                UploadSource::Bytes(b"y".to_vec()),
                UploadOptions::new("y.txt", "text/plain", 60),
            )
            .await;
        assert!(matches!(again, Err(Error::InvalidState(_))));
        assert_eq!(flow.state(), UploadState::LinkReady);
    }

    #[tokio::test]
    async fn test_bad_view_url_fails_before_upload() {
        let server = MemoryTransport::new();
        for view in ["not a url", "mailto:someone@example.com"] {
            let mut flow = UploadOrchestrator::new(&server, view);
            let result = flow
                .run(
                    UploadSource::Bytes(b"secret".to_vec()),
                    UploadOptions::new("x.txt", "text/plain", 60),
                )
                .await;

            assert!(matches!(result, Err(Error::InvalidShareUrl(_))));
            assert_eq!(flow.history(), &[UploadState::Idle, UploadState::Failed]);
        }
        assert_eq!(server.request_count(), 0);
        assert_eq!(server.stored_count(), 0);
    }

    #[test]
    fn test_bundle_rejects_duplicates_and_empty() {
        assert!(matches!(bundle_files(&[]), Err(Error::Validation(_))));
        let files = vec![
            ("a.txt".to_string(), b"one".to_vec()),
            ("a.txt".to_string(), b"two".to_vec()),
        ];
        assert!(matches!(bundle_files(&files), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_bundle_upload() {
        let server = MemoryTransport::new();
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, "alpha").unwrap();
        std::fs::write(&b, "x,y\n").unwrap();

        let receipt = upload(
            &server,
            VIEW,
            UploadSource::Bundle(vec![a, b]),
            UploadOptions::bundle(2, 60),
        )
        .await
        .unwrap();

        let info = server.info(&receipt.descriptor.opaque_id).await.unwrap();
        assert_eq!(info.file_name, "2_files.zip");
        assert_eq!(info.mime_type, BUNDLE_MIME_TYPE);
    }

    #[tokio::test]
    async fn test_text_share() {
        let server = MemoryTransport::new();
        assert!(matches!(
            upload_text(&server, VIEW, "   \n", UploadOptions::text(60)).await,
            Err(Error::Validation(_))
        ));

        let receipt = upload_text(&server, VIEW, "meet at noon", UploadOptions::text(60))
            .await
            .unwrap();
        let info = server.info(&receipt.descriptor.opaque_id).await.unwrap();
        assert_eq!(info.file_name, TEXT_FILE_NAME);
        assert_eq!(info.mime_type, "text/plain");
    }
}
