//! Signed-URL generation and verification.
//!
//! Links carry an expiry timestamp and an HMAC-SHA256 signature over
//! `resource_id:expires_at`, hex-encoded. Tokens are stateless; nothing is
//! persisted, and a rotated secret invalidates every outstanding link.

use crate::config::SigningConfig;
use crate::error::{Result, VergeError};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Minimum secret length before a warning is logged.
const MIN_SECRET_LENGTH: usize = 32;

/// A generated signed link.
#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    /// Resource the link grants access to.
    pub resource_id: String,
    /// Expiry as Unix epoch seconds.
    pub expires_at: u64,
    /// Hex-encoded HMAC-SHA256 signature.
    pub signature: String,
    /// Ready-to-use URL path with query parameters.
    pub url: String,
}

/// Signs and verifies expiring resource links.
#[derive(Clone)]
pub struct UrlSigner {
    config: SigningConfig,
}

impl UrlSigner {
    /// Create a new signer.
    ///
    /// Returns an error if the secret is empty; warns when the secret is
    /// shorter than recommended.
    pub fn new(config: SigningConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(VergeError::InvalidConfig {
                field: "signing.secret".to_string(),
                reason: "signing secret must not be empty".to_string(),
            });
        }
        if config.secret.len() < MIN_SECRET_LENGTH {
            tracing::warn!(
                "Signing secret is shorter than {} bytes. Consider using a longer secret for production.",
                MIN_SECRET_LENGTH
            );
        }
        Ok(Self { config })
    }

    /// Sign a resource, producing a link valid for `ttl` (or the configured
    /// default when `None`).
    pub fn sign(&self, resource_id: &str, ttl: Option<Duration>) -> SignedUrl {
        let ttl = ttl.unwrap_or(self.config.url_ttl);
        let expires_at = now_epoch() + ttl.as_secs();
        let signature = self.compute_signature(resource_id, expires_at);
        let url = format!(
            "{}/{}?expires={}&signature={}",
            self.config.base_path, resource_id, expires_at, signature
        );

        SignedUrl {
            resource_id: resource_id.to_string(),
            expires_at,
            signature,
            url,
        }
    }

    /// Verify a presented token. Total: returns `false` rather than erroring.
    ///
    /// Expiry is checked before the MAC so expired tokens fail regardless of
    /// signature correctness; the comparison itself is constant-time.
    pub fn verify(&self, resource_id: &str, expires_at: u64, signature: &str) -> bool {
        if now_epoch() > expires_at {
            return false;
        }

        let expected = self.compute_signature(resource_id, expires_at);
        constant_time_compare(expected.as_bytes(), signature.as_bytes())
    }

    fn compute_signature(&self, resource_id: &str, expires_at: u64) -> String {
        let message = format!("{}:{}", resource_id, expires_at);
        hex::encode(compute_hmac_sha256(&message, &self.config.secret))
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Compute HMAC-SHA256 using the hmac crate.
fn compute_hmac_sha256(message: &str, key: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    // XOR all bytes and accumulate - takes same time regardless of where mismatch occurs
    let result = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    result == 0
}
