//! Upload request validation
//!
//! Mirrors the checks the server applies to an upload so a request that would
//! be rejected fails before any key is generated or byte encrypted.

use crate::error::{Error, Result};
use std::path::Path;

/// Server-side hard cap on declared file size: 500MB
pub const MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Shortest allowed lifetime of a share, in minutes
pub const MIN_EXPIRY_MINUTES: u32 = 5;

/// Longest allowed lifetime of a share: 5 days, in minutes
pub const MAX_EXPIRY_MINUTES: u32 = 5 * 24 * 60;

/// Longest accepted file name, in characters
pub const MAX_FILE_NAME_LEN: usize = 255;

/// MIME type used when nothing better is known
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// MIME types the server accepts
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    // Text
    "text/plain",
    "text/html",
    "text/css",
    "text/javascript",
    "text/markdown",
    "text/csv",
    // Images
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "image/bmp",
    "image/tiff",
    // Videos
    "video/mp4",
    "video/mpeg",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
    // Audio
    "audio/mpeg",
    "audio/wav",
    "audio/ogg",
    "audio/webm",
    "audio/aac",
    "audio/flac",
    // Documents
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
    "application/rtf",
    // Archives
    "application/zip",
    "application/x-7z-compressed",
    "application/x-rar-compressed",
    "application/x-tar",
    "application/gzip",
    // Code/Data
    "application/json",
    "application/xml",
    "text/xml",
    "application/x-yaml",
    // Generic binary
    DEFAULT_MIME_TYPE,
];

/// Broad file category, used for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Other,
}

impl FileCategory {
    /// Classify a MIME type
    pub fn of(mime_type: &str) -> Self {
        match mime_type {
            "application/pdf"
            | "application/msword"
            | "application/rtf"
            | "application/vnd.ms-excel"
            | "application/vnd.ms-powerpoint" => FileCategory::Document,
            m if m.starts_with("application/vnd.openxmlformats-officedocument.")
                || m.starts_with("application/vnd.oasis.opendocument.") =>
            {
                FileCategory::Document
            }
            "application/zip"
            | "application/x-7z-compressed"
            | "application/x-rar-compressed"
            | "application/x-tar"
            | "application/gzip" => FileCategory::Archive,
            m if m.starts_with("text/") => FileCategory::Text,
            m if m.starts_with("image/") => FileCategory::Image,
            m if m.starts_with("video/") => FileCategory::Video,
            m if m.starts_with("audio/") => FileCategory::Audio,
            _ => FileCategory::Other,
        }
    }
}

/// Whether the server accepts this MIME type
pub fn is_allowed_mime_type(mime_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime_type)
}

/// Guess a MIME type from a file name's extension
pub fn guess_mime_type(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("txt") | Some("log") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("md") | Some("markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("mp4") => "video/mp4",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("webm") => "video/webm",
        Some("ogv") => "video/ogg",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("aac") => "audio/aac",
        Some("flac") => "audio/flac",
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Some("odt") => "application/vnd.oasis.opendocument.text",
        Some("ods") => "application/vnd.oasis.opendocument.spreadsheet",
        Some("odp") => "application/vnd.oasis.opendocument.presentation",
        Some("rtf") => "application/rtf",
        Some("zip") => "application/zip",
        Some("7z") => "application/x-7z-compressed",
        Some("rar") => "application/x-rar-compressed",
        Some("tar") => "application/x-tar",
        Some("gz") | Some("tgz") => "application/gzip",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("yaml") | Some("yml") => "application/x-yaml",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Validate a file name
pub fn validate_file_name(file_name: &str) -> Result<()> {
    let len = file_name.chars().count();
    if len == 0 || len > MAX_FILE_NAME_LEN {
        return Err(Error::Validation(format!(
            "file name must be 1 to {} characters, got {}",
            MAX_FILE_NAME_LEN, len
        )));
    }
    Ok(())
}

/// Validate a declared size against `limit`
pub fn validate_size(size: u64, limit: u64) -> Result<()> {
    if size == 0 {
        return Err(Error::Validation("file is empty".to_string()));
    }
    if size > limit {
        return Err(Error::PayloadTooLarge(format!(
            "{} bytes exceeds limit of {} bytes",
            size, limit
        )));
    }
    Ok(())
}

/// Validate a requested lifetime in minutes
pub fn validate_expiry(minutes: u32) -> Result<()> {
    if !(MIN_EXPIRY_MINUTES..=MAX_EXPIRY_MINUTES).contains(&minutes) {
        return Err(Error::Validation(format!(
            "expiry must be between {} and {} minutes, got {}",
            MIN_EXPIRY_MINUTES, MAX_EXPIRY_MINUTES, minutes
        )));
    }
    Ok(())
}

/// Validate a MIME type against the allow-list
pub fn validate_mime_type(mime_type: &str) -> Result<()> {
    if !is_allowed_mime_type(mime_type) {
        return Err(Error::Validation(format!(
            "unsupported file type: {}",
            mime_type
        )));
    }
    Ok(())
}

/// A password, when given, must not be empty
pub fn validate_password(password: Option<&str>) -> Result<()> {
    match password {
        Some(p) if p.is_empty() => Err(Error::Validation(
            "password protection requires a non-empty password".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_bounds() {
        assert!(validate_file_name("a").is_ok());
        assert!(validate_file_name(&"x".repeat(255)).is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_size_bounds() {
        assert!(validate_size(1, MAX_FILE_SIZE).is_ok());
        assert!(validate_size(MAX_FILE_SIZE, MAX_FILE_SIZE).is_ok());
        assert!(matches!(validate_size(0, MAX_FILE_SIZE), Err(Error::Validation(_))));
        assert!(matches!(
            validate_size(MAX_FILE_SIZE + 1, MAX_FILE_SIZE),
            Err(Error::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_expiry_bounds() {
        assert!(validate_expiry(5).is_ok());
        assert!(validate_expiry(24 * 60).is_ok());
        assert!(validate_expiry(7200).is_ok());
        assert!(validate_expiry(4).is_err());
        assert!(validate_expiry(7201).is_err());
    }

    #[test]
    fn test_mime_allow_list() {
        assert!(validate_mime_type("text/plain").is_ok());
        assert!(validate_mime_type("application/octet-stream").is_ok());
        assert!(validate_mime_type("application/x-msdownload").is_err());
    }

    #[test]
    fn test_guessed_types_are_allowed() {
        for name in ["a.txt", "b.PNG", "c.docx", "d.tar", "e.yml", "f.unknown", "noext"] {
            assert!(is_allowed_mime_type(guess_mime_type(name)), "{}", name);
        }
        assert_eq!(guess_mime_type("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime_type("noext"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_categories() {
        assert_eq!(FileCategory::of("text/csv"), FileCategory::Text);
        assert_eq!(FileCategory::of("image/png"), FileCategory::Image);
        assert_eq!(FileCategory::of("application/pdf"), FileCategory::Document);
        assert_eq!(
            FileCategory::of("application/vnd.oasis.opendocument.text"),
            FileCategory::Document
        );
        assert_eq!(FileCategory::of("application/zip"), FileCategory::Archive);
        assert_eq!(FileCategory::of("application/json"), FileCategory::Other);
    }

    #[test]
    fn test_password() {
        assert!(validate_password(None).is_ok());
        assert!(validate_password(Some("hunter2")).is_ok());
        assert!(validate_password(Some("")).is_err());
    }
}
