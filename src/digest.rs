//! Digest primitive and short identifier rendering.
//!
//! Collection ids are `base64url(digest(content_id))` truncated to a
//! system-wide length. The length trades id size against collision odds.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Truncation length of short ids in characters.
pub const DEFAULT_ID_LENGTH: usize = 27;

/// Base64url length of a SHA-256 digest.
pub const SHA256_ID_CHARS: usize = 43;

/// A stable cryptographic hash.
pub trait ContentDigest: Send + Sync {
    fn digest(&self, bytes: &[u8]) -> Vec<u8>;
}

/// SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl ContentDigest for Sha256Digest {
    fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        Sha256::digest(bytes).to_vec()
    }
}

/// Render a digest in the URL-safe alphabet and cut it to `length` chars.
pub fn short_id(digest: &[u8], length: usize) -> String {
    let mut id = URL_SAFE_NO_PAD.encode(digest);
    id.truncate(length);
    id
}
