//! API key format and hashing.
//!
//! Raw keys look like `sk_<64 hex chars>`. Only the SHA-256 hex digest and a
//! short display prefix are ever stored.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::principal::OwnerId;
use crate::Timestamp;

pub const API_KEY_PREFIX: &str = "sk_";

/// Number of hex characters after the prefix.
pub const API_KEY_SECRET_LEN: usize = 64;

/// Leading characters of a raw key kept for display.
pub const DISPLAY_PREFIX_LEN: usize = 10;

/// One-way hash of a raw key, the only form ever compared.
pub fn hash_api_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// The non-secret part shown in key listings.
pub fn display_prefix(raw: &str) -> String {
    raw.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// Cheap shape check done before any storage lookup.
pub fn has_api_key_shape(raw: &str) -> bool {
    raw.strip_prefix(API_KEY_PREFIX).is_some_and(|secret| {
        secret.len() == API_KEY_SECRET_LEN && secret.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// Build a raw key from secret bytes.
pub fn format_api_key(secret: &[u8; API_KEY_SECRET_LEN / 2]) -> String {
    format!("{}{}", API_KEY_PREFIX, hex::encode(secret))
}

/// A stored key, without its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: i64,
    pub owner: OwnerId,
    pub name: String,
    pub key_prefix: String,
    pub created_at: Timestamp,
    pub last_used_at: Option<Timestamp>,
    pub is_active: bool,
}
