//! Share link construction and parsing
//!
//! A share link is `<view base>/<opaque id>#key=<key>`. The opaque id is the
//! only part a server ever sees; browsers never send the fragment, and the
//! HTTP transport strips it from every outbound URL. The key must never be
//! placed in the query string.

use crate::error::{Error, Result};
use std::fmt;
use url::{form_urlencoded, Url};

/// Fragment parameter carrying the exported key
pub const KEY_PARAM: &str = "key";

/// The two independent halves of a share link
#[derive(Clone, PartialEq, Eq)]
pub struct ShareDescriptor {
    /// Server-assigned handle, carries no key material
    pub opaque_id: String,
    /// Exported key, fragment only
    pub key: String,
    /// Whether the server gates the blob behind a password
    pub password_protected: bool,
}

impl ShareDescriptor {
    pub fn new(opaque_id: impl Into<String>, key: impl Into<String>, password_protected: bool) -> Self {
        ShareDescriptor {
            opaque_id: opaque_id.into(),
            key: key.into(),
            password_protected,
        }
    }

    /// Render into a complete share URL under `base_view_url`
    pub fn to_url(&self, base_view_url: &str) -> Result<Url> {
        build_share_url(base_view_url, &self.opaque_id, &self.key)
    }
}

impl fmt::Debug for ShareDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareDescriptor")
            .field("opaque_id", &self.opaque_id)
            .field("key", &"<redacted>")
            .field("password_protected", &self.password_protected)
            .finish()
    }
}

/// Parse a base view URL that share ids can be appended to
pub fn parse_view_base(base_view_url: &str) -> Result<Url> {
    let url = Url::parse(base_view_url)
        .map_err(|e| Error::InvalidShareUrl(format!("{}: {}", base_view_url, e)))?;
    if url.cannot_be_a_base() {
        return Err(Error::InvalidShareUrl(format!(
            "{} cannot carry path segments",
            base_view_url
        )));
    }
    Ok(url)
}

/// Append `opaque_id` as a path segment and the key as the `#key=` fragment
pub fn build_share_url(base_view_url: &str, opaque_id: &str, key: &str) -> Result<Url> {
    if opaque_id.is_empty() {
        return Err(Error::InvalidShareUrl("empty share id".to_string()));
    }
    if key.is_empty() {
        return Err(Error::MissingKey);
    }

    let mut url = parse_view_base(base_view_url)?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| Error::InvalidShareUrl(base_view_url.to_string()))?
        .pop_if_empty()
        .push(opaque_id);
    url.set_fragment(Some(&format!("{}={}", KEY_PARAM, key)));

    Ok(url)
}

/// Extract the `key` value from the fragment of `current_url`
///
/// Returns [`Error::MissingKey`] when there is no fragment, no `key` entry,
/// or an empty value. Callers treat that as terminal.
pub fn parse_key_from_url(current_url: &str) -> Result<String> {
    key_from_fragment(parse(current_url)?.fragment())
}

fn key_from_fragment(fragment: Option<&str>) -> Result<String> {
    let fragment = fragment.ok_or(Error::MissingKey)?;
    form_urlencoded::parse(fragment.as_bytes())
        .find(|(name, _)| name == KEY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or(Error::MissingKey)
}

fn parse(share_url: &str) -> Result<Url> {
    Url::parse(share_url).map_err(|e| Error::InvalidShareUrl(format!("{}: {}", share_url, e)))
}

fn id_from_path(url: &Url) -> Result<String> {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidShareUrl("no share id in path".to_string()))
}

/// Extract only the opaque id from a share URL; the key may be absent
pub fn parse_share_id(share_url: &str) -> Result<String> {
    id_from_path(&parse(share_url)?)
}

/// Split a share URL into its opaque id and key
pub fn parse_share_url(share_url: &str) -> Result<ShareDescriptor> {
    let url = parse(share_url)?;
    let key = key_from_fragment(url.fragment())?;
    let opaque_id = id_from_path(&url)?;

    Ok(ShareDescriptor::new(opaque_id, key, false))
}

/// Copy of `url` with any fragment removed, for use in outbound requests
pub fn strip_fragment(url: &Url) -> Url {
    let mut stripped = url.clone();
    stripped.set_fragment(None);
    stripped
}
