//! The edge delivery pipeline.
//!
//! Each request moves through a fixed sequence of states:
//!
//! ```text
//! AuthCheck -> CacheLookup -> { Hit | Miss -> OriginFetch -> CacheFill }
//!           -> ResponseAssembly -> Terminal
//! ```
//!
//! Requests carrying `expires`/`signature` parameters are verified against
//! the URL signer; requests without them are treated as public. The pipeline
//! does not consult the resource's `is_public` flag - enforcing that is the
//! origin's responsibility at fetch time, a trust boundary inherited from the
//! wider system.
//!
//! Concurrent misses on the same logical name are coalesced: one origin
//! fetch runs per key while followers wait and then re-check the cache.

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::compression::{self, CompressionConfig};
use crate::error::{Result, VergeError};
use crate::headers::{self, RangeOutcome};
use crate::invalidation::VersionSource;
use crate::origin::{ContentFetch, Origin};
use crate::signing::UrlSigner;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Cache-Control used when the origin supplied none.
const DEFAULT_CACHE_CONTROL: &str = "public, max-age=3600";

/// The parts of a client request the pipeline evaluates.
#[derive(Debug, Clone, Default)]
pub struct DeliveryRequest {
    /// Requested logical resource name.
    pub resource_id: String,
    /// `expires` query parameter, when present.
    pub expires: Option<u64>,
    /// `signature` query parameter, when present.
    pub signature: Option<String>,
    /// `If-None-Match` header.
    pub if_none_match: Option<String>,
    /// `If-Modified-Since` header.
    pub if_modified_since: Option<String>,
    /// `Range` header.
    pub range: Option<String>,
    /// `Accept-Encoding` header.
    pub accept_encoding: Option<String>,
}

impl DeliveryRequest {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            ..Default::default()
        }
    }
}

/// A fully assembled, transport-agnostic response.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// HTTP status code (200, 206, 304, 416).
    pub status: u16,
    /// Response headers in insertion order.
    pub headers: Vec<(&'static str, String)>,
    /// Response body; empty for 304/416.
    pub body: Vec<u8>,
    /// True when served from cache without an origin fetch in this request.
    pub cache_hit: bool,
}

impl Delivery {
    /// Look up a header value by name (case-sensitive, test helper).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Orchestrates signature check, cache lookup, origin fetch, and response
/// assembly. Constructed explicitly and injected into the server; there is
/// no process-wide cache singleton.
pub struct DeliveryPipeline {
    cache: Arc<CacheStore>,
    origin: Arc<dyn Origin>,
    signer: Arc<UrlSigner>,
    versions: Arc<dyn VersionSource>,
    compression: CompressionConfig,
    /// Per-name guards coalescing concurrent origin fetches.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeliveryPipeline {
    pub fn new(
        cache: Arc<CacheStore>,
        origin: Arc<dyn Origin>,
        signer: Arc<UrlSigner>,
        versions: Arc<dyn VersionSource>,
        compression: CompressionConfig,
    ) -> Self {
        Self {
            cache,
            origin,
            signer,
            versions,
            compression,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, req: DeliveryRequest) -> Result<Delivery> {
        self.check_auth(&req)?;

        // CacheLookup under the currently tracked version.
        let key = self.current_key(&req.resource_id).await;
        if let Some(entry) = self.cache.get(&key).await {
            debug!(key = %key, "Cache hit");
            return self.assemble(&entry, &req, true);
        }

        // Miss: take the per-name flight guard, then re-check - a follower
        // arriving here finds the leader's freshly inserted entry.
        let guard = self.flight_guard(&req.resource_id).await;
        let held = guard.lock().await;

        let key = self.current_key(&req.resource_id).await;
        if let Some(entry) = self.cache.get(&key).await {
            debug!(key = %key, "Cache hit after coalesced fetch");
            return self.assemble(&entry, &req, true);
        }

        let fetched = self.fetch_and_fill(&req.resource_id, key).await;
        drop(held);
        drop(guard);
        self.release_flight_guard(&req.resource_id).await;
        let (entry, key) = fetched?;

        debug!(key = %key, size = entry.size(), "Cache fill from origin");
        self.assemble(&entry, &req, false)
    }

    /// AuthCheck: verify signed-URL parameters when present.
    fn check_auth(&self, req: &DeliveryRequest) -> Result<()> {
        if req.expires.is_none() && req.signature.is_none() {
            // Public request; is_public enforcement is the origin's concern.
            return Ok(());
        }

        let expires = req.expires.ok_or(VergeError::InvalidSignature)?;
        let signature = req.signature.as_deref().ok_or(VergeError::InvalidSignature)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now > expires {
            return Err(VergeError::Expired);
        }

        if !self.signer.verify(&req.resource_id, expires, signature) {
            return Err(VergeError::InvalidSignature);
        }

        Ok(())
    }

    /// Build the cache key from the tracked version, defaulting to 1.
    async fn current_key(&self, resource_id: &str) -> CacheKey {
        let version = self
            .versions
            .current_version(resource_id)
            .await
            .unwrap_or(1);
        CacheKey::new(resource_id, version)
    }

    /// OriginFetch + CacheFill. Metadata failures other than `NotFound` are
    /// non-fatal; the pipeline falls back to a direct content fetch under
    /// the already-known key.
    async fn fetch_and_fill(
        &self,
        resource_id: &str,
        fallback_key: CacheKey,
    ) -> Result<(CacheEntry, CacheKey)> {
        let key = match self.origin.fetch_metadata(resource_id).await {
            Ok(meta) => {
                self.versions.record_version(resource_id, meta.version).await;
                CacheKey::new(resource_id, meta.version)
            }
            Err(VergeError::NotFound(id)) => return Err(VergeError::NotFound(id)),
            Err(e) => {
                warn!(resource = %resource_id, error = %e, "Metadata fetch failed, falling back to content fetch");
                fallback_key
            }
        };

        // The resolved key may differ from the looked-up one; re-check so a
        // version bump between lookup and fetch still hits.
        if let Some(entry) = self.cache.get(&key).await {
            return Ok((entry, key));
        }

        let content = match self.origin.fetch_content(resource_id).await? {
            ContentFetch::Content(content) => content,
            ContentFetch::NotModified => {
                // We forward no validators, so a 304 here is an origin
                // protocol anomaly.
                return Err(VergeError::OriginUnavailable(
                    "unexpected 304 from origin".to_string(),
                ));
            }
        };

        let entry = CacheEntry {
            content: Arc::new(content.bytes),
            content_type: content.content_type,
            etag: content.etag.or_else(|| {
                // Synthesize a validator so conditional requests work even
                // when the origin sends none.
                Some(format!("\"{}\"", uuid::Uuid::new_v4().simple()))
            }),
            last_modified: content.last_modified,
            cache_control: content.cache_control,
        };

        self.cache.insert(key.clone(), entry.clone()).await;
        Ok((entry, key))
    }

    async fn flight_guard(&self, name: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        Arc::clone(
            inflight
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop a guard entry once no other request holds it.
    async fn release_flight_guard(&self, name: &str) {
        let mut inflight = self.inflight.lock().await;
        if let Some(guard) = inflight.get(name) {
            if Arc::strong_count(guard) == 1 {
                inflight.remove(name);
            }
        }
    }

    /// ResponseAssembly: conditional, then range, then compression.
    fn assemble(&self, entry: &CacheEntry, req: &DeliveryRequest, cache_hit: bool) -> Result<Delivery> {
        let x_cache = if cache_hit { "HIT" } else { "MISS" };
        let cache_control = entry
            .cache_control
            .clone()
            .unwrap_or_else(|| DEFAULT_CACHE_CONTROL.to_string());
        let total = entry.content.len() as u64;

        // Conditional check: validators only, no body, no content headers.
        if headers::is_not_modified(
            req.if_none_match.as_deref(),
            req.if_modified_since.as_deref(),
            entry.etag.as_deref(),
            entry.last_modified.as_deref(),
        ) {
            let mut headers = vec![("Cache-Control", cache_control)];
            if let Some(ref etag) = entry.etag {
                headers.push(("ETag", etag.clone()));
            }
            if let Some(ref lm) = entry.last_modified {
                headers.push(("Last-Modified", lm.clone()));
            }
            headers.push(("X-Cache", x_cache.to_string()));

            return Ok(Delivery {
                status: 304,
                headers,
                body: Vec::new(),
                cache_hit,
            });
        }

        // Range check. Range responses are never compressed.
        match headers::parse_range(req.range.as_deref(), total) {
            RangeOutcome::Unsatisfiable => {
                return Ok(Delivery {
                    status: 416,
                    headers: vec![
                        ("Content-Range", format!("bytes */{}", total)),
                        ("Cache-Control", cache_control),
                        ("X-Cache", x_cache.to_string()),
                    ],
                    body: Vec::new(),
                    cache_hit,
                });
            }
            RangeOutcome::Satisfiable { start, end } => {
                let slice = entry.content[start as usize..=end as usize].to_vec();
                let mut headers = vec![
                    ("Content-Type", entry.content_type.clone()),
                    ("Content-Length", slice.len().to_string()),
                    ("Content-Range", format!("bytes {}-{}/{}", start, end, total)),
                    ("Accept-Ranges", "bytes".to_string()),
                    ("Cache-Control", cache_control),
                ];
                if let Some(ref etag) = entry.etag {
                    headers.push(("ETag", etag.clone()));
                }
                if let Some(ref lm) = entry.last_modified {
                    headers.push(("Last-Modified", lm.clone()));
                }
                headers.push(("X-Cache", x_cache.to_string()));

                return Ok(Delivery {
                    status: 206,
                    headers,
                    body: slice,
                    cache_hit,
                });
            }
            RangeOutcome::None => {}
        }

        // Full entity, with compression negotiation.
        let accepted = headers::accepted_encodings(req.accept_encoding.as_deref());
        let mut body = entry.content.as_ref().clone();
        let mut encoding = None;

        if let Some(enc) = compression::negotiate(
            &self.compression,
            accepted,
            &entry.content_type,
            body.len(),
        ) {
            let compressed = compression::compress(&body, enc)?;
            // Only keep the encoding when it actually shrinks the entity.
            if compressed.len() < body.len() {
                body = compressed;
                encoding = Some(enc);
            }
        }

        let mut headers = vec![
            ("Content-Type", entry.content_type.clone()),
            ("Content-Length", body.len().to_string()),
            ("Accept-Ranges", "bytes".to_string()),
            ("Cache-Control", cache_control),
        ];
        if let Some(ref etag) = entry.etag {
            headers.push(("ETag", etag.clone()));
        }
        if let Some(ref lm) = entry.last_modified {
            headers.push(("Last-Modified", lm.clone()));
        }
        if let Some(enc) = encoding {
            headers.push(("Content-Encoding", enc.name().to_string()));
            headers.push(("Vary", "Accept-Encoding".to_string()));
        }
        headers.push(("X-Cache", x_cache.to_string()));

        Ok(Delivery {
            status: 200,
            headers,
            body,
            cache_hit,
        })
    }

    /// Apply a purge event on this edge: drop every cached version of the
    /// name and track the new version when the event carries one.
    pub async fn apply_purge(&self, resource_id: &str, new_version: Option<u64>) -> usize {
        if let Some(version) = new_version {
            self.versions.record_version(resource_id, version).await;
        }
        self.cache.remove_name(resource_id).await
    }

    /// Drop every cached entry on this edge.
    pub async fn purge_all(&self) {
        self.cache.clear().await;
    }
}
