//! HTTP transport to the storage server
//!
//! Endpoints, relative to the configured API root:
//!
//! - `POST   /upload`              multipart, returns share id and owner token
//! - `GET    /view/{id}/info`      metadata only
//! - `POST   /view/{id}`           JSON `{ password? }`, returns base64 blob
//! - `DELETE /delete/{token}`      early deletion
//! - `GET    /delete/{token}/info` owner view, including view count
//!
//! Every URL is built from the API root and passed through
//! [`strip_fragment`] before use, so a share link's `#key=` can never reach
//! the wire even if one is mistakenly configured as the API root.

use super::{
    ErrorBody, FetchResponse, FileMetadata, OwnerInfo, Transport, UploadRequest, UploadResponse,
};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::share::strip_fragment;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Transport backed by `reqwest`
pub struct HttpTransport {
    client: Client,
    api_root: Url,
}

#[derive(Serialize)]
struct FetchBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

impl HttpTransport {
    /// Create a transport from server configuration
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let api_root = Url::parse(&config.api_url)
            .map_err(|e| Error::InvalidConfig(format!("api_url {}: {}", config.api_url, e)))?;
        if api_root.fragment().is_some() {
            warn!("Ignoring fragment on configured API URL");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("filepush/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpTransport {
            client,
            api_root: strip_fragment(&api_root),
        })
    }

    /// Build an endpoint URL from path segments; segments are percent-encoded
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_root.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig(format!("{} cannot be a base URL", self.api_root)))?
            .pop_if_empty()
            .extend(segments);
        Ok(strip_fragment(&url))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        debug!("Server returned {}: {}", status, message);
        Err(Error::from_status(status.as_u16(), message))
    }

    fn upload_request(&self, request: UploadRequest) -> Result<RequestBuilder> {
        let url = self.endpoint(&["upload"])?;

        let file_part = Part::bytes(request.blob)
            .file_name(request.file_name.clone())
            .mime_str("application/octet-stream")?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("fileName", request.file_name)
            .text("fileType", request.mime_type)
            .text("fileSize", request.size.to_string())
            .text("expiresIn", request.expires_in_minutes.to_string());
        if let Some(password) = request.password {
            form = form.text("password", password);
        }

        Ok(self.client.post(url).multipart(form))
    }

    fn info_request(&self, opaque_id: &str) -> Result<RequestBuilder> {
        Ok(self.client.get(self.endpoint(&["view", opaque_id, "info"])?))
    }

    fn fetch_request(&self, opaque_id: &str, password: Option<&str>) -> Result<RequestBuilder> {
        let url = self.endpoint(&["view", opaque_id])?;
        Ok(self.client.post(url).json(&FetchBody { password }))
    }

    fn delete_request(&self, owner_token: &str) -> Result<RequestBuilder> {
        Ok(self.client.delete(self.endpoint(&["delete", owner_token])?))
    }

    fn owner_info_request(&self, owner_token: &str) -> Result<RequestBuilder> {
        Ok(self.client.get(self.endpoint(&["delete", owner_token, "info"])?))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse> {
        let response = self.upload_request(request)?.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn info(&self, opaque_id: &str) -> Result<FileMetadata> {
        let response = self.info_request(opaque_id)?.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn fetch(&self, opaque_id: &str, password: Option<&str>) -> Result<FetchResponse> {
        let response = self.fetch_request(opaque_id, password)?.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete(&self, owner_token: &str) -> Result<()> {
        let response = self.delete_request(owner_token)?.send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn owner_info(&self, owner_token: &str) -> Result<OwnerInfo> {
        let response = self.owner_info_request(owner_token)?.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(api_url: &str) -> HttpTransport {
        HttpTransport::new(&ServerConfig {
            api_url: api_url.to_string(),
            ..ServerConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoints() {
        let t = transport("https://files.example.com/api");
        assert_eq!(
            t.endpoint(&["view", "abcdefghijkl", "info"]).unwrap().as_str(),
            "https://files.example.com/api/view/abcdefghijkl/info"
        );
        assert_eq!(
            t.endpoint(&["upload"]).unwrap().as_str(),
            "https://files.example.com/api/upload"
        );
    }

    #[test]
    fn test_endpoint_never_carries_fragment() {
        let t = transport("https://files.example.com/api/#key=oops");
        let url = t.endpoint(&["view", "abcdefghijkl"]).unwrap();
        assert!(url.fragment().is_none());
        assert!(!url.as_str().contains("oops"));
    }

    #[test]
    fn test_segments_are_encoded() {
        let t = transport("http://localhost:3001/api");
        let url = t.endpoint(&["view", "a/b#c"]).unwrap();
        assert_eq!(url.path(), "/api/view/a%2Fb%23c");
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_built_requests_drop_fragment() {
        let t = transport("https://files.example.com/api#key=oops");

        let fetch = t.fetch_request("abcdefghijkl", Some("pw")).unwrap().build().unwrap();
        assert_eq!(fetch.method(), reqwest::Method::POST);
        assert_eq!(fetch.url().as_str(), "https://files.example.com/api/view/abcdefghijkl");
        let body = fetch.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, br#"{"password":"pw"}"#);

        let open = t.fetch_request("abcdefghijkl", None).unwrap().build().unwrap();
        assert_eq!(open.body().and_then(|b| b.as_bytes()).unwrap(), b"{}");

        let owner = t.owner_info_request("owner-token-0123456789").unwrap().build().unwrap();
        assert_eq!(owner.method(), reqwest::Method::GET);
        assert_eq!(
            owner.url().path(),
            "/api/delete/owner-token-0123456789/info"
        );

        let upload = t
            .upload_request(UploadRequest {
                blob: vec![0u8; 40],
                file_name: "a.txt".to_string(),
                mime_type: "text/plain".to_string(),
                size: 12,
                expires_in_minutes: 60,
                password: None,
            })
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(upload.url().path(), "/api/upload");
        assert!(upload.url().fragment().is_none());
        for request in [&fetch, &open, &owner, &upload] {
            assert!(!request.url().as_str().contains("oops"));
        }
    }

    #[test]
    fn test_rejects_bad_api_url() {
        assert!(HttpTransport::new(&ServerConfig {
            api_url: "::not a url".to_string(),
            ..ServerConfig::default()
        })
        .is_err());
    }
}
