//! Response compression for verge.
//!
//! Negotiates a content encoding for full-entity responses. Only textual and
//! markup-like content types are eligible; brotli is preferred over gzip when
//! the client accepts both. Range responses are never compressed.

use crate::error::{Result, VergeError};
use crate::headers::AcceptedEncodings;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Content types eligible for compression, matched by prefix so parameters
/// like `; charset=utf-8` do not defeat the check.
const COMPRESSIBLE_TYPES: &[&str] = &[
    "text/",
    "application/javascript",
    "application/json",
    "application/xml",
    "application/x-javascript",
    "image/svg+xml",
];

/// Negotiated response encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// Brotli, preferred when accepted.
    Brotli,
    /// Gzip.
    Gzip,
}

impl ContentEncoding {
    /// The `Content-Encoding` header value.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Brotli => "br",
            Self::Gzip => "gzip",
        }
    }
}

impl std::fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compression negotiation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Offer gzip encoding.
    pub enable_gzip: bool,
    /// Offer brotli encoding.
    pub enable_brotli: bool,
    /// Minimum entity size worth compressing (bytes).
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enable_gzip: true,
            enable_brotli: true,
            min_size: 512,
        }
    }
}

/// Check whether a content type is in the compressible allow-list.
pub fn is_compressible(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    COMPRESSIBLE_TYPES.iter().any(|prefix| ct.starts_with(prefix))
}

/// Pick an encoding for a full-entity response, or `None` for identity.
pub fn negotiate(
    config: &CompressionConfig,
    accepted: AcceptedEncodings,
    content_type: &str,
    size: usize,
) -> Option<ContentEncoding> {
    if size < config.min_size || !is_compressible(content_type) {
        return None;
    }

    if config.enable_brotli && accepted.brotli {
        return Some(ContentEncoding::Brotli);
    }
    if config.enable_gzip && accepted.gzip {
        return Some(ContentEncoding::Gzip);
    }

    None
}

/// Compress an entity with the chosen encoding.
pub fn compress(data: &[u8], encoding: ContentEncoding) -> Result<Vec<u8>> {
    match encoding {
        ContentEncoding::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| VergeError::Internal(format!("gzip encode failed: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| VergeError::Internal(format!("gzip encode failed: {}", e)))
        }
        ContentEncoding::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
                writer
                    .write_all(data)
                    .map_err(|e| VergeError::Internal(format!("brotli encode failed: {}", e)))?;
                writer
                    .flush()
                    .map_err(|e| VergeError::Internal(format!("brotli encode failed: {}", e)))?;
            }
            Ok(out)
        }
    }
}
