// ============================================================================
// Response Dedup Cache
// ============================================================================
//
// Short-TTL store collapsing rapid duplicate retries: a fingerprint of
// (identity, path, canonical body) maps to the last successful response.
// Lazy expiry on lookup is the correctness-critical half; the periodic
// sweep only bounds memory.
//
// Fingerprint canonicalization: bodies that parse as JSON are re-serialized
// with object keys sorted recursively at every nesting level, so logically
// identical bodies collide regardless of key order. Non-JSON bodies are
// hashed as raw bytes.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A previously observed successful response, replayable on a cache hit
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

struct CacheEntry {
    created_at: Instant,
    response: CachedResponse,
}

/// Process-wide dedup cache with TTL-based reclamation
pub struct DedupCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached response for `fingerprint` if one exists within
    /// its TTL. An expired entry found here is removed on the spot: no
    /// entry is ever trusted past its TTL regardless of sweep timing.
    pub fn lookup(&self, fingerprint: &str, now: Instant) -> Option<CachedResponse> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("dedup cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        match entries.get(fingerprint) {
            Some(entry) if now.duration_since(entry.created_at) < self.ttl => {
                Some(entry.response.clone())
            }
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Stores `response` under `fingerprint`, unconditionally overwriting
    /// any existing entry (last writer wins).
    pub fn store(&self, fingerprint: &str, response: CachedResponse, now: Instant) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("dedup cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                created_at: now,
                response,
            },
        );
    }

    /// Drops expired entries. Called by the periodic sweep.
    pub fn sweep(&self, now: Instant) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("dedup cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let ttl = self.ttl;
        entries.retain(|_, entry| now.duration_since(entry.created_at) < ttl);
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes the dedup fingerprint for a request.
pub fn fingerprint(identity: &str, path: &str, body: &[u8]) -> String {
    let canonical = canonicalize_body(body);

    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(&canonical);
    let hash = hasher.finalize();

    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// JSON bodies are rewritten with sorted object keys; anything else is
/// hashed verbatim.
fn canonicalize_body(body: &[u8]) -> Vec<u8> {
    if body.is_empty() {
        return Vec::new();
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let mut out = String::new();
            write_canonical(&value, &mut out);
            out.into_bytes()
        }
        Err(_) => body.to_vec(),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
