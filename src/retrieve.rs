//! Retrieval flow
//!
//! Sequences one download through
//! `Idle -> KeyExtracted -> MetadataFetched -> [PasswordRequired ->
//! PasswordSubmitted] -> BlobFetched -> Decrypted`, with a terminal `Failed`.
//!
//! The key is taken from the share link fragment and used only locally; the
//! server is given the opaque id and, when gated, the password. A missing or
//! malformed key stops the flow before any request is made.

use crate::crypto::{self, EncryptionKey};
use crate::error::{Error, Result};
use crate::share::parse_share_url;
use crate::transport::{FileMetadata, Transport};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Numbered names tried before a save gives up
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Retrieval flow states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    Idle,
    KeyExtracted,
    MetadataFetched,
    PasswordRequired,
    PasswordSubmitted,
    BlobFetched,
    Decrypted,
    Failed,
}

/// Decrypted file and its declared metadata
#[derive(Clone, PartialEq, Eq)]
pub struct RetrievedFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for RetrievedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievedFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Destination for decrypted files
#[async_trait]
pub trait Sink: Send {
    async fn deliver(&mut self, file: RetrievedFile) -> Result<()>;
}

/// Collects delivered files in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub files: Vec<RetrievedFile>,
}

#[async_trait]
impl Sink for MemorySink {
    async fn deliver(&mut self, file: RetrievedFile) -> Result<()> {
        self.files.push(file);
        Ok(())
    }
}

/// Writes delivered files into a directory without overwriting
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    saved: Vec<PathBuf>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSink {
            dir: dir.into(),
            saved: Vec::new(),
        }
    }

    /// Paths written so far
    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    /// `name`, then `stem (1).ext`, `stem (2).ext`, ...
    fn candidate(&self, name: &str, attempt: u32) -> PathBuf {
        if attempt == 0 {
            return self.dir.join(name);
        }

        let path = Path::new(name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("download");
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) => self.dir.join(format!("{} ({}).{}", stem, attempt, ext)),
            None => self.dir.join(format!("{} ({})", stem, attempt)),
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn deliver(&mut self, file: RetrievedFile) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = sanitize_file_name(&file.file_name);

        let mut attempt = 0;
        let (path, mut out) = loop {
            let path = self.candidate(&name, attempt);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(out) => break (path, out),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        out.write_all(&file.bytes).await?;
        out.flush().await?;
        info!("Saved {} ({} bytes)", path.display(), file.bytes.len());
        self.saved.push(path);
        Ok(())
    }
}

/// Reduce a server-supplied name to a plain file name inside the target dir
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .trim_start_matches('.');
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        "download.bin".to_string()
    } else {
        cleaned
    }
}

/// Drives a single retrieval
pub struct RetrievalOrchestrator<'a, T: Transport + ?Sized> {
    transport: &'a T,
    state: RetrievalState,
    history: Vec<RetrievalState>,
    opaque_id: Option<String>,
    key: Option<EncryptionKey>,
    metadata: Option<FileMetadata>,
    password: Option<Zeroizing<String>>,
}

impl<'a, T: Transport + ?Sized> RetrievalOrchestrator<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        RetrievalOrchestrator {
            transport,
            state: RetrievalState::Idle,
            history: vec![RetrievalState::Idle],
            opaque_id: None,
            key: None,
            metadata: None,
            password: None,
        }
    }

    /// Current state
    pub fn state(&self) -> RetrievalState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[RetrievalState] {
        &self.history
    }

    /// Metadata reported by the server, once fetched
    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    /// Whether the flow is waiting for a password
    pub fn needs_password(&self) -> bool {
        self.state == RetrievalState::PasswordRequired
    }

    fn transition(&mut self, next: RetrievalState) {
        debug!("Retrieval: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!("Retrieval failed in {:?}: {}", self.state, error);
        self.key = None;
        self.password = None;
        self.transition(RetrievalState::Failed);
        error
    }

    fn expect_state(&self, allowed: &[RetrievalState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot {} in state {:?}",
                action, self.state
            )))
        }
    }

    /// Extract the key from `share_url` and fetch the share's metadata
    pub async fn open(&mut self, share_url: &str) -> Result<&FileMetadata> {
        self.expect_state(&[RetrievalState::Idle], "open a share")?;

        let (opaque_id, key) = match extract(share_url) {
            Ok(parts) => parts,
            Err(e) => return Err(self.fail(e)),
        };
        self.key = Some(key);
        self.transition(RetrievalState::KeyExtracted);

        let metadata = match self.transport.info(&opaque_id).await {
            Ok(metadata) => metadata,
            Err(e) => return Err(self.fail(e)),
        };
        self.opaque_id = Some(opaque_id);
        self.transition(RetrievalState::MetadataFetched);

        if metadata.password_protected {
            self.transition(RetrievalState::PasswordRequired);
        }
        Ok(self.metadata.insert(metadata))
    }

    /// Provide the share password
    ///
    /// An empty password is refused and leaves the flow where it was.
    pub fn submit_password(&mut self, password: &str) -> Result<()> {
        self.expect_state(&[RetrievalState::PasswordRequired], "submit a password")?;
        if password.is_empty() {
            return Err(Error::Validation("password must not be empty".to_string()));
        }

        self.password = Some(Zeroizing::new(password.to_string()));
        self.transition(RetrievalState::PasswordSubmitted);
        Ok(())
    }

    /// Fetch the blob and decrypt it
    pub async fn download(&mut self) -> Result<RetrievedFile> {
        self.expect_state(
            &[RetrievalState::MetadataFetched, RetrievalState::PasswordSubmitted],
            "download",
        )?;

        match self.fetch_and_decrypt().await {
            Ok(file) => Ok(file),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn fetch_and_decrypt(&mut self) -> Result<RetrievedFile> {
        let opaque_id = self
            .opaque_id
            .clone()
            .ok_or_else(|| Error::InvalidState("no share opened".to_string()))?;
        let password = self.password.as_ref().map(|p| p.as_str());

        let fetched = self.transport.fetch(&opaque_id, password).await?;
        let blob = STANDARD
            .decode(fetched.blob_base64.as_bytes())
            .map_err(|_| Error::MalformedBlob {
                len: fetched.blob_base64.len(),
            })?;
        self.transition(RetrievalState::BlobFetched);

        let key = self
            .key
            .take()
            .ok_or_else(|| Error::InvalidState("key already consumed".to_string()))?;
        let bytes = crypto::open(&blob, &key)?;
        self.password = None;
        self.transition(RetrievalState::Decrypted);

        info!("Decrypted share {} ({} bytes)", opaque_id, bytes.len());
        Ok(RetrievedFile {
            file_name: fetched.file_name,
            mime_type: fetched.mime_type,
            bytes,
        })
    }

    /// Download, decrypt and hand the result to `sink`
    pub async fn deliver_to<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        let file = self.download().await?;
        sink.deliver(file).await
    }
}

/// Retrieve a share in one call
///
/// When the share is gated and `password` is `None` or empty, fails with
/// [`Error::Unauthorized`] without requesting the blob.
pub async fn retrieve<T: Transport + ?Sized>(
    transport: &T,
    share_url: &str,
    password: Option<&str>,
) -> Result<RetrievedFile> {
    let mut flow = RetrievalOrchestrator::new(transport);
    flow.open(share_url).await?;

    if flow.needs_password() {
        match password {
            Some(p) if !p.is_empty() => flow.submit_password(p)?,
            _ => return Err(Error::Unauthorized),
        }
    }

    flow.download().await
}

fn extract(share_url: &str) -> Result<(String, EncryptionKey)> {
    let descriptor = parse_share_url(share_url)?;
    let key = crypto::import_key(&descriptor.key)?;
    Ok((descriptor.opaque_id, key))
}
