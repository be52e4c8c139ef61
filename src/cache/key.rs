//! Deterministic request fingerprints.
//!
//! A [`CacheKey`] is a pure function of the request shape plus the current
//! schema version. Two logically identical requests must produce an identical
//! key; collisions across semantically different requests would be a
//! correctness bug, so the parameter digest uses a cryptographic hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Description of one upstream request: endpoint identity plus query
/// parameters.
///
/// Parameter order as supplied by the caller is irrelevant; key derivation
/// normalizes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub endpoint: String,
    pub params: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        RequestDescriptor { endpoint: endpoint.into(), params: Vec::new() }
    }

    /// Builder-style parameter addition.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Endpoint identity with surrounding slashes trimmed.
    pub fn normalized_endpoint(&self) -> &str {
        self.endpoint.trim_matches('/')
    }
}

/// Deterministic cache key: `{endpoint}/{param digest}-v{schema version}`.
///
/// The schema version is part of the key, so entries written under an older
/// payload format are structurally unreachable after a version bump and get
/// replaced on the next fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    key: String,
    prefix: String,
}

impl CacheKey {
    /// Derive the key for a request under the given schema version.
    ///
    /// Parameters are sorted by name, then value, before hashing, so the
    /// result does not depend on the caller's iteration order.
    pub fn derive(descriptor: &RequestDescriptor, schema_version: u32) -> Self {
        let mut params = descriptor.params.clone();
        params.sort();

        let mut hasher = Sha256::new();
        for (name, value) in &params {
            hasher.update(name.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value.as_bytes());
            hasher.update([0x1e]);
        }
        let digest = hex_string(&hasher.finalize()[..8]);

        let prefix = descriptor.normalized_endpoint().to_string();
        let key = format!("{prefix}/{digest}-v{schema_version}");
        CacheKey { key, prefix }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Endpoint prefix, usable for bulk clears of one endpoint's entries.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Lowercase hex encoding, also used for content hashes.
pub(crate) fn hex_string(bytes: &[u8]) -> String {
    use fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// SHA-256 content hash of a payload as lowercase hex.
pub(crate) fn content_hash(payload: &[u8]) -> String {
    hex_string(&Sha256::digest(payload))
}
