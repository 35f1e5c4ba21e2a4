//! End-to-end tests driving the delivery pipeline and the edge HTTP surface
//! against an in-memory origin.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use verge::cache::{CacheConfig, CacheEntry, CacheKey, CacheStore};
use verge::invalidation::VersionSource;
use verge::compression::CompressionConfig;
use verge::config::{InvalidationConfig, SigningConfig};
use verge::delivery::{DeliveryPipeline, DeliveryRequest};
use verge::invalidation::{EdgeVersionMap, InvalidationCoordinator, MemoryVersionStore, VersionStore};
use verge::origin::{ContentFetch, Origin, OriginContent};
use verge::server::{edge_router, EdgeState};
use verge::signing::UrlSigner;
use verge::types::FileMetadata;
use verge::{Result, VergeError};

/// In-memory origin with mutable content and a shared fetch counter.
#[derive(Clone)]
struct TestOrigin {
    files: Arc<Mutex<HashMap<String, (u64, Vec<u8>, String)>>>,
    content_fetches: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl TestOrigin {
    fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            content_fetches: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    async fn put(&self, id: &str, version: u64, bytes: &[u8], content_type: &str) {
        self.files.lock().await.insert(
            id.to_string(),
            (version, bytes.to_vec(), content_type.to_string()),
        );
    }

    fn fetches(&self) -> usize {
        self.content_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Origin for TestOrigin {
    async fn fetch_metadata(&self, id: &str) -> Result<FileMetadata> {
        let files = self.files.lock().await;
        let (version, bytes, content_type) = files
            .get(id)
            .ok_or_else(|| VergeError::NotFound(id.to_string()))?;
        Ok(FileMetadata {
            id: id.to_string(),
            filename: id.to_string(),
            mime_type: content_type.clone(),
            size: bytes.len() as u64,
            is_public: true,
            version: *version,
            storage_path: None,
        })
    }

    async fn fetch_content(&self, id: &str) -> Result<ContentFetch> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.content_fetches.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().await;
        let (version, bytes, content_type) = files
            .get(id)
            .ok_or_else(|| VergeError::NotFound(id.to_string()))?;
        Ok(ContentFetch::Content(OriginContent {
            bytes: bytes.clone(),
            content_type: content_type.clone(),
            etag: Some(format!("\"{}-v{}\"", id, version)),
            last_modified: Some("Sun, 06 Nov 1994 08:49:37 GMT".to_string()),
            cache_control: None,
        }))
    }
}

const SECRET: &str = "integration-test-secret-0123456789abcdef";

fn signer() -> Arc<UrlSigner> {
    Arc::new(
        UrlSigner::new(SigningConfig {
            secret: SECRET.to_string(),
            url_ttl: Duration::from_secs(900),
            base_path: "/cdn".to_string(),
        })
        .unwrap(),
    )
}

struct Harness {
    origin: TestOrigin,
    cache: Arc<CacheStore>,
    versions: Arc<MemoryVersionStore>,
    pipeline: Arc<DeliveryPipeline>,
}

fn harness() -> Harness {
    let origin = TestOrigin::new();
    let cache = Arc::new(CacheStore::new(CacheConfig::default()));
    let versions = Arc::new(MemoryVersionStore::new());
    let pipeline = Arc::new(DeliveryPipeline::new(
        Arc::clone(&cache),
        Arc::new(origin.clone()),
        signer(),
        Arc::clone(&versions) as _,
        CompressionConfig::default(),
    ));
    Harness {
        origin,
        cache,
        versions,
        pipeline,
    }
}

#[tokio::test]
async fn single_flight_shares_one_origin_fetch() {
    let h = {
        let mut h = harness();
        h.origin.delay = Some(Duration::from_millis(50));
        // The pipeline captured a clone before the delay was set; rebuild.
        h.pipeline = Arc::new(DeliveryPipeline::new(
            Arc::clone(&h.cache),
            Arc::new(h.origin.clone()),
            signer(),
            Arc::clone(&h.versions) as _,
            CompressionConfig::default(),
        ));
        h
    };
    h.origin.put("hot.css", 1, b"body { color: red }", "text/css").await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let pipeline = Arc::clone(&h.pipeline);
        tasks.push(tokio::spawn(async move {
            pipeline.handle(DeliveryRequest::new("hot.css")).await.unwrap()
        }));
    }
    for task in tasks {
        let resp = task.await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"body { color: red }");
    }

    assert_eq!(h.origin.fetches(), 1, "concurrent misses must coalesce");
}

#[tokio::test]
async fn purge_invalidates_without_rewriting_bytes() {
    let h = harness();
    h.origin.put("logo.svg", 1, b"<svg>v1</svg>", "image/svg+xml").await;

    let first = h.pipeline.handle(DeliveryRequest::new("logo.svg")).await.unwrap();
    assert_eq!(first.header("X-Cache"), Some("MISS"));
    assert_eq!(first.body, b"<svg>v1</svg>");

    let hit = h.pipeline.handle(DeliveryRequest::new("logo.svg")).await.unwrap();
    assert_eq!(hit.header("X-Cache"), Some("HIT"));

    // Publish new content and purge through the shared version store.
    h.origin.put("logo.svg", 2, b"<svg>v2</svg>", "image/svg+xml").await;
    let new_version = h.versions.bump("logo.svg").await.unwrap();
    assert_eq!(new_version, 2);

    let fresh = h.pipeline.handle(DeliveryRequest::new("logo.svg")).await.unwrap();
    assert_eq!(fresh.header("X-Cache"), Some("MISS"));
    assert_eq!(fresh.body, b"<svg>v2</svg>");

    // The v1 entry is orphaned, not rewritten.
    assert!(h.cache.get(&CacheKey::new("logo.svg", 1)).await.is_some());
    assert_eq!(h.cache.len().await, 2);
}

#[tokio::test]
async fn signed_url_lifecycle() {
    let h = harness();
    h.origin.put("private.pdf", 1, b"%PDF-1.7", "application/pdf").await;

    let signed = signer().sign("private.pdf", Some(Duration::from_secs(60)));

    let mut req = DeliveryRequest::new("private.pdf");
    req.expires = Some(signed.expires_at);
    req.signature = Some(signed.signature.clone());
    assert_eq!(h.pipeline.handle(req).await.unwrap().status, 200);

    // Tampered expiry fails verification even before it would extend life.
    let mut req = DeliveryRequest::new("private.pdf");
    req.expires = Some(signed.expires_at + 3600);
    req.signature = Some(signed.signature.clone());
    assert!(matches!(
        h.pipeline.handle(req).await.unwrap_err(),
        VergeError::InvalidSignature
    ));

    // A signature minted for one resource does not open another.
    h.origin.put("other.pdf", 1, b"%PDF-1.7", "application/pdf").await;
    let mut req = DeliveryRequest::new("other.pdf");
    req.expires = Some(signed.expires_at);
    req.signature = Some(signed.signature);
    assert!(matches!(
        h.pipeline.handle(req).await.unwrap_err(),
        VergeError::InvalidSignature
    ));
}

async fn spawn_edge(state: EdgeState) -> String {
    let router = edge_router(state, "/cdn");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn edge_http_surface_roundtrip() {
    let h = harness();
    h.origin.put("app.js", 1, b"console.log('hi')", "application/javascript").await;

    let base = spawn_edge(EdgeState {
        pipeline: Arc::clone(&h.pipeline),
        cache: Arc::clone(&h.cache),
    })
    .await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/cdn/app.js", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-cache"], "MISS");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"console.log('hi')");

    let resp = client.get(format!("{}/cdn/app.js", base)).send().await.unwrap();
    assert_eq!(resp.headers()["x-cache"], "HIT");

    let stats: serde_json::Value = client
        .get(format!("{}/cache-stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["enabled"], true);
    assert_eq!(stats["size"], 1);
    assert_eq!(stats["hits"], 1);
    assert_eq!(stats["misses"], 1);

    // Unknown resources surface as structured 404s with no leaked detail.
    let resp = client.get(format!("{}/cdn/ghost.js", base)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not found");

    let resp = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn edge_purge_endpoint_applies_event() {
    let h = harness();
    h.origin.put("style.css", 2, b"v2", "text/css").await;

    // Seed a v1 entry as though it had been served before the purge.
    h.versions.record_version("style.css", 1).await;
    h.cache
        .insert(
            CacheKey::new("style.css", 1),
            CacheEntry::new(b"v1".to_vec(), "text/css"),
        )
        .await;

    let base = spawn_edge(EdgeState {
        pipeline: Arc::clone(&h.pipeline),
        cache: Arc::clone(&h.cache),
    })
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/purge/style.css", base))
        .json(&serde_json::json!({ "resource": "style.css", "newVersion": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["fileId"], "style.css");

    // All cached versions of the name are gone; the next request fetches v2.
    assert!(h.cache.is_empty().await);
    let resp = client.get(format!("{}/cdn/style.css", base)).send().await.unwrap();
    assert_eq!(resp.headers()["x-cache"], "MISS");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"v2");
}

#[tokio::test]
async fn coordinator_fans_out_to_live_edge() {
    // Edge node with its own local version map, fed only by purge events.
    let origin = TestOrigin::new();
    origin.put("banner.png", 2, b"png-v2", "image/png").await;

    let cache = Arc::new(CacheStore::new(CacheConfig::default()));
    let edge_versions = Arc::new(EdgeVersionMap::new());
    let pipeline = Arc::new(DeliveryPipeline::new(
        Arc::clone(&cache),
        Arc::new(origin.clone()),
        signer(),
        Arc::clone(&edge_versions) as _,
        CompressionConfig::default(),
    ));
    cache
        .insert(
            CacheKey::new("banner.png", 1),
            CacheEntry::new(b"png-v1".to_vec(), "image/png"),
        )
        .await;

    let base = spawn_edge(EdgeState {
        pipeline,
        cache: Arc::clone(&cache),
    })
    .await;

    // Origin-side coordinator pointed at the live edge.
    let store = Arc::new(MemoryVersionStore::new());
    store.record_version("banner.png", 1).await;
    let coordinator = InvalidationCoordinator::new(
        store as Arc<dyn VersionStore>,
        InvalidationConfig {
            edges: vec![base.clone()],
            notify_timeout: Duration::from_secs(2),
        },
    );

    let event = coordinator.purge("banner.png").await.unwrap();
    assert_eq!(event.new_version, 2);

    // The notification runs detached; poll until the edge has applied it.
    let mut applied = false;
    for _ in 0..50 {
        if cache.is_empty().await {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(applied, "edge never received the purge event");

    let client = reqwest::Client::new();
    let resp = client.get(format!("{}/cdn/banner.png", base)).send().await.unwrap();
    assert_eq!(resp.headers()["x-cache"], "MISS");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"png-v2");
}

#[tokio::test]
async fn conditional_and_range_over_http() {
    let h = harness();
    h.origin.put("doc.txt", 1, b"0123456789", "text/plain").await;

    let base = spawn_edge(EdgeState {
        pipeline: Arc::clone(&h.pipeline),
        cache: Arc::clone(&h.cache),
    })
    .await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/cdn/doc.txt", base)).send().await.unwrap();
    let etag = resp.headers()["etag"].to_str().unwrap().to_string();
    assert_eq!(etag, "\"doc.txt-v1\"");

    let resp = client
        .get(format!("{}/cdn/doc.txt", base))
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 304);
    assert!(resp.bytes().await.unwrap().is_empty());

    let resp = client
        .get(format!("{}/cdn/doc.txt", base))
        .header("Range", "bytes=2-5")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(resp.headers()["content-range"], "bytes 2-5/10");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"2345");

    let resp = client
        .get(format!("{}/cdn/doc.txt", base))
        .header("Range", "bytes=99-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 416);
    assert_eq!(resp.headers()["content-range"], "bytes */10");
}

#[tokio::test]
async fn signed_request_over_http() {
    let h = harness();
    h.origin.put("paid.mp3", 1, b"ID3", "audio/mpeg").await;

    let base = spawn_edge(EdgeState {
        pipeline: Arc::clone(&h.pipeline),
        cache: Arc::clone(&h.cache),
    })
    .await;
    let client = reqwest::Client::new();

    let signed = signer().sign("paid.mp3", None);
    let resp = client
        .get(format!("{}{}", base, signed.url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!(
            "{}/cdn/paid.mp3?expires={}&signature=bogus",
            base, signed.expires_at
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid signature");
}
