//! Version-based cache invalidation.
//!
//! A purge never rewrites cached bytes. The origin-side coordinator bumps
//! the resource version, which changes the cache key every edge builds from
//! then on; stale entries are simply never addressed again and age out.
//! Edge notification is best-effort: a failed notify is logged and the purge
//! still succeeds, because edges will miss and refetch under the new key.

use crate::error::Result;
use crate::types::PurgeEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

pub use crate::config::InvalidationConfig;

/// Read access to the current version of a resource.
///
/// The delivery pipeline consults this when building cache keys; a resource
/// with no recorded version defaults to 1.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Current version, if tracked.
    async fn current_version(&self, resource: &str) -> Option<u64>;

    /// Record a discovered or purge-assigned version.
    async fn record_version(&self, resource: &str, version: u64);
}

/// Authoritative version state with an atomic bump operation.
///
/// `bump` must be serialized per resource: two concurrent purges of the same
/// resource never compute the same new version.
#[async_trait]
pub trait VersionStore: VersionSource {
    /// Atomically increment and return the new version.
    async fn bump(&self, resource: &str) -> Result<u64>;
}

/// In-memory version store.
///
/// The mutex serializes every read-then-write bump, which satisfies the
/// per-resource ordering requirement.
#[derive(Default)]
pub struct MemoryVersionStore {
    versions: Mutex<HashMap<String, u64>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionSource for MemoryVersionStore {
    async fn current_version(&self, resource: &str) -> Option<u64> {
        self.versions.lock().await.get(resource).copied()
    }

    async fn record_version(&self, resource: &str, version: u64) {
        self.versions.lock().await.insert(resource.to_string(), version);
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn bump(&self, resource: &str) -> Result<u64> {
        let mut versions = self.versions.lock().await;
        let next = versions.get(resource).copied().unwrap_or(1) + 1;
        versions.insert(resource.to_string(), next);
        Ok(next)
    }
}

/// Edge-local version tracker, updated from purge events and resolved
/// metadata. Used where the edge has no shared store with the origin.
#[derive(Default)]
pub struct EdgeVersionMap {
    versions: RwLock<HashMap<String, u64>>,
}

impl EdgeVersionMap {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionSource for EdgeVersionMap {
    async fn current_version(&self, resource: &str) -> Option<u64> {
        self.versions.read().await.get(resource).copied()
    }

    async fn record_version(&self, resource: &str, version: u64) {
        self.versions.write().await.insert(resource.to_string(), version);
    }
}

/// Invalidation statistics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidationStats {
    pub purges: u64,
    pub edges_notified: u64,
    pub notify_failures: u64,
}

/// Origin-side purge coordinator.
///
/// Purge success is defined solely by the version bump; edge notifications
/// run as detached tasks with a bounded timeout and a discarded result.
pub struct InvalidationCoordinator {
    store: Arc<dyn VersionStore>,
    config: InvalidationConfig,
    client: reqwest::Client,
    purges: AtomicU64,
    edges_notified: AtomicU64,
    notify_failures: Arc<AtomicU64>,
}

impl InvalidationCoordinator {
    /// Create a new coordinator.
    pub fn new(store: Arc<dyn VersionStore>, config: InvalidationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.notify_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            store,
            config,
            client,
            purges: AtomicU64::new(0),
            edges_notified: AtomicU64::new(0),
            notify_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Purge a resource: bump its version, then notify edges best-effort.
    pub async fn purge(&self, resource: &str) -> Result<PurgeEvent> {
        let new_version = self.store.bump(resource).await?;
        self.purges.fetch_add(1, Ordering::Relaxed);

        let event = PurgeEvent {
            resource: resource.to_string(),
            new_version,
        };

        debug!(resource = %resource, version = new_version, "Purged resource");

        for edge in &self.config.edges {
            self.edges_notified.fetch_add(1, Ordering::Relaxed);
            self.notify_edge(edge.clone(), event.clone());
        }

        Ok(event)
    }

    /// Notify one edge in a detached task; the caller never waits on it.
    fn notify_edge(&self, edge: String, event: PurgeEvent) {
        let client = self.client.clone();
        let timeout = self.config.notify_timeout;
        let failures = Arc::clone(&self.notify_failures);

        tokio::spawn(async move {
            let url = format!("{}/purge/{}", edge.trim_end_matches('/'), event.resource);
            let request = client.post(&url).json(&event).send();

            match tokio::time::timeout(timeout, request).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    debug!(edge = %edge, resource = %event.resource, "Edge purge delivered");
                }
                Ok(Ok(response)) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(edge = %edge, status = %response.status(), "Edge purge rejected");
                }
                Ok(Err(e)) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(edge = %edge, error = %e, "Edge purge notification failed");
                }
                Err(_) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(edge = %edge, "Edge purge notification timed out");
                }
            }
        });
    }

    /// Current version as seen by the authoritative store.
    pub async fn current_version(&self, resource: &str) -> Option<u64> {
        self.store.current_version(resource).await
    }

    /// Get statistics.
    pub fn stats(&self) -> InvalidationStats {
        InvalidationStats {
            purges: self.purges.load(Ordering::Relaxed),
            edges_notified: self.edges_notified.load(Ordering::Relaxed),
            notify_failures: self.notify_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bump_starts_at_two() {
        // An untracked resource is implicitly at version 1, so the first
        // purge moves it to 2.
        let store = MemoryVersionStore::new();
        assert_eq!(store.bump("a.jpg").await.unwrap(), 2);
        assert_eq!(store.current_version("a.jpg").await, Some(2));
        assert_eq!(store.bump("a.jpg").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_bumps_never_collide() {
        let store = Arc::new(MemoryVersionStore::new());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.bump("hot").await.unwrap() }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }

        versions.sort_unstable();
        versions.dedup();
        assert_eq!(versions.len(), 32, "every purge must compute a distinct version");
        assert_eq!(store.current_version("hot").await, Some(33));
    }

    #[tokio::test]
    async fn test_purge_succeeds_when_edge_unreachable() {
        let store = Arc::new(MemoryVersionStore::new());
        let coordinator = InvalidationCoordinator::new(
            store,
            InvalidationConfig {
                edges: vec!["http://192.0.2.1:9".to_string()],
                notify_timeout: Duration::from_millis(100),
            },
        );

        // Success is defined by the version bump alone.
        let event = coordinator.purge("a.jpg").await.unwrap();
        assert_eq!(event.new_version, 2);
        assert_eq!(coordinator.stats().purges, 1);

        // Give the detached notification time to fail and be recorded.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(coordinator.stats().notify_failures, 1);
    }

    #[tokio::test]
    async fn test_edge_version_map() {
        let map = EdgeVersionMap::new();
        assert_eq!(map.current_version("a").await, None);
        map.record_version("a", 5).await;
        assert_eq!(map.current_version("a").await, Some(5));
    }
}
