//! Origin client for verge.
//!
//! The origin holds durable file metadata and bytes; the edge talks to it
//! through the [`Origin`] trait so the delivery pipeline can be exercised
//! against an in-memory implementation in tests. [`HttpOrigin`] is the
//! production implementation.

use crate::config::OriginConfig;
use crate::error::{Result, VergeError};
use crate::types::FileMetadata;
use async_trait::async_trait;
use reqwest::StatusCode;

/// Content fetched from the origin along with its response headers.
#[derive(Debug, Clone)]
pub struct OriginContent {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub cache_control: Option<String>,
}

/// Outcome of a content fetch.
#[derive(Debug, Clone)]
pub enum ContentFetch {
    /// Full entity.
    Content(OriginContent),
    /// Origin answered 304; only possible when validators were forwarded.
    NotModified,
}

/// Interface to the durable storage tier.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Fetch file metadata (`GET /files/{id}`).
    ///
    /// `NotFound` means the resource does not exist; any other failure is
    /// non-fatal for the pipeline, which falls back to a direct content
    /// fetch.
    async fn fetch_metadata(&self, id: &str) -> Result<FileMetadata>;

    /// Fetch file content (`GET /files/{id}/download`).
    async fn fetch_content(&self, id: &str) -> Result<ContentFetch>;
}

/// HTTP origin client built on reqwest.
///
/// Metadata round trips use a short timeout; content transfers get a longer
/// one since a large body may legitimately take a while.
#[derive(Clone)]
pub struct HttpOrigin {
    base_url: String,
    client: reqwest::Client,
    config: OriginConfig,
}

impl HttpOrigin {
    /// Create a new origin client.
    pub fn new(config: OriginConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            config,
        }
    }

    fn header(resp: &reqwest::Response, name: &str) -> Option<String> {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch_metadata(&self, id: &str) -> Result<FileMetadata> {
        let url = format!("{}/files/{}", self.base_url, id);

        let response = self
            .client
            .get(&url)
            .timeout(self.config.metadata_timeout)
            .send()
            .await
            .map_err(|e| VergeError::OriginUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(VergeError::NotFound(id.to_string())),
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| VergeError::OriginUnavailable(format!("invalid metadata: {}", e))),
            status => Err(VergeError::OriginUnavailable(format!(
                "metadata fetch returned {}",
                status
            ))),
        }
    }

    async fn fetch_content(&self, id: &str) -> Result<ContentFetch> {
        let url = format!("{}/files/{}/download", self.base_url, id);

        let response = self
            .client
            .get(&url)
            .timeout(self.config.content_timeout)
            .send()
            .await
            .map_err(|e| VergeError::OriginUnavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(VergeError::NotFound(id.to_string()));
        }
        if status == StatusCode::NOT_MODIFIED {
            return Ok(ContentFetch::NotModified);
        }
        if !status.is_success() {
            return Err(VergeError::OriginUnavailable(format!(
                "content fetch returned {}",
                status
            )));
        }

        let content_type = Self::header(&response, "content-type")
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let etag = Self::header(&response, "etag");
        let last_modified = Self::header(&response, "last-modified");
        let cache_control = Self::header(&response, "cache-control");

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VergeError::OriginUnavailable(e.to_string()))?
            .to_vec();

        Ok(ContentFetch::Content(OriginContent {
            bytes,
            content_type,
            etag,
            last_modified,
            cache_control,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let origin = HttpOrigin::new(OriginConfig {
            base_url: "http://origin.local:9000/".to_string(),
            ..Default::default()
        });
        assert_eq!(origin.base_url, "http://origin.local:9000");
    }

    #[tokio::test]
    async fn test_unreachable_origin_maps_to_unavailable() {
        // Reserved TEST-NET address; connect fails fast with the short timeout.
        let origin = HttpOrigin::new(OriginConfig {
            base_url: "http://192.0.2.1:9".to_string(),
            connect_timeout: std::time::Duration::from_millis(200),
            metadata_timeout: std::time::Duration::from_millis(300),
            content_timeout: std::time::Duration::from_millis(300),
        });

        let err = origin.fetch_metadata("x").await.unwrap_err();
        assert!(matches!(err, VergeError::OriginUnavailable(_)));
        assert!(err.is_retryable());
    }
}
