//! Shared data types for verge.

use serde::{Deserialize, Serialize};

fn default_version() -> u64 {
    1
}

/// File metadata as served by the origin (`GET /files/{id}`).
///
/// The origin owns this record; verge only reads it. Updates happen at the
/// origin through a purge-triggered version bump, never by mutating a cached
/// copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Stable resource identifier.
    pub id: String,
    /// Original filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether the file is publicly accessible without a signed URL.
    #[serde(default)]
    pub is_public: bool,
    /// Current content version; bumped on purge.
    #[serde(default = "default_version")]
    pub version: u64,
    /// Storage path at the origin (opaque to verge).
    #[serde(default)]
    pub storage_path: Option<String>,
}

/// Purge message sent from the invalidation coordinator to edge nodes.
///
/// Transient; causes cache-key invalidation and a version-tracker update,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeEvent {
    /// Logical resource name or ID being purged.
    pub resource: String,
    /// New version assigned by the origin-side bump.
    pub new_version: u64,
}
