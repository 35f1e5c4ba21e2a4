//! Verge - an edge delivery cache for versioned origin content.
//!
//! Verge sits between clients and an origin file service. It caches content
//! bytes in a bounded in-memory store, verifies HMAC-signed URLs, coalesces
//! concurrent origin fetches, and assembles full HTTP responses including
//! conditionals, byte ranges, and negotiated compression. Invalidation is
//! version-based: a purge bumps the resource version, which changes every
//! cache key derived from it, so stale entries are never rewritten - they
//! are simply orphaned and age out.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Verge                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  Edge: signed URLs | cache store | delivery pipeline     │
//! ├──────────────────────────────────────────────────────────┤
//! │  Origin client: metadata + content over HTTP             │
//! ├──────────────────────────────────────────────────────────┤
//! │  Invalidation: version bumps | best-effort edge fan-out  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use verge::config::VergeConfig;
//!
//! #[tokio::main]
//! async fn main() -> verge::Result<()> {
//!     let config = VergeConfig::development();
//!     verge::run(config).await
//! }
//! ```

pub mod cache;
pub mod compression;
pub mod config;
pub mod delivery;
pub mod error;
pub mod headers;
pub mod invalidation;
pub mod observability;
pub mod origin;
pub mod server;
pub mod signing;
pub mod types;

pub use error::{Result, VergeError};
pub use types::*;

use crate::cache::CacheStore;
use crate::config::VergeConfig;
use crate::delivery::DeliveryPipeline;
use crate::invalidation::{
    EdgeVersionMap, InvalidationCoordinator, MemoryVersionStore, VersionSource, VersionStore,
};
use crate::origin::HttpOrigin;
use crate::server::{AdminState, EdgeState};
use crate::signing::UrlSigner;
use std::sync::Arc;
use tracing::{error, info};

/// Run a verge node with the given configuration.
///
/// Always serves the edge surface. When `server.admin_addr` is set the node
/// also hosts the purge coordinator, sharing one version store with the
/// delivery pipeline so local purges take effect without a network hop.
pub async fn run(config: VergeConfig) -> Result<()> {
    config.validate()?;
    observability::init(&config.observability)?;

    info!(origin = %config.origin.base_url, "Starting verge edge");

    let cache = Arc::new(CacheStore::new(config.cache.clone()));
    let origin = Arc::new(HttpOrigin::new(config.origin.clone()));
    let signer = Arc::new(UrlSigner::new(config.signing.clone())?);

    // Colocated nodes share the authoritative version store; pure edges
    // track versions locally from purge events and resolved metadata.
    let coordinator_store: Option<Arc<MemoryVersionStore>> = config
        .server
        .admin_addr
        .as_ref()
        .map(|_| Arc::new(MemoryVersionStore::new()));

    let versions: Arc<dyn VersionSource> = match &coordinator_store {
        Some(store) => Arc::clone(store) as Arc<dyn VersionSource>,
        None => Arc::new(EdgeVersionMap::new()),
    };

    let pipeline = Arc::new(DeliveryPipeline::new(
        Arc::clone(&cache),
        origin,
        Arc::clone(&signer),
        versions,
        config.compression.clone(),
    ));

    let mut handles = Vec::new();

    let edge_state = EdgeState {
        pipeline,
        cache: Arc::clone(&cache),
    };
    let edge_router = server::edge_router(edge_state, &config.signing.base_path);
    let server_config = config.server.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = server::run_edge_server(&server_config, edge_router).await {
            error!(error = %e, "Edge server error");
        }
    }));

    if let (Some(store), Some(admin_addr)) = (coordinator_store, config.server.admin_addr) {
        let coordinator = Arc::new(InvalidationCoordinator::new(
            store as Arc<dyn VersionStore>,
            config.invalidation.clone(),
        ));
        let admin_router = server::admin_router(AdminState {
            coordinator,
            signer,
        });
        handles.push(tokio::spawn(async move {
            if let Err(e) = server::run_admin_server(admin_addr, admin_router).await {
                error!(error = %e, "Admin server error");
            }
        }));
    }

    if config.observability.metrics_enabled {
        let obs_config = config.observability.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config).await {
                error!(error = %e, "Metrics server error");
            }
        }));

        let gauge_cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
            loop {
                interval.tick().await;
                let stats = gauge_cache.stats().await;
                observability::record_cache_occupancy(stats.size as u64, stats.bytes);
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| VergeError::Internal(format!("signal handler: {}", e)))?;
    info!("Shutdown signal received");

    for handle in handles {
        handle.abort();
    }

    Ok(())
}
