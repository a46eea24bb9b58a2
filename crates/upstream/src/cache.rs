//! Short-lived cache for GET responses, shared by every session.
//!
//! Entries are keyed by [`Fingerprint`] and never served once their TTL has
//! elapsed. Mutations invalidate by *resource root* (`/api/states`,
//! `/api/services`, ...). Each root carries a generation counter: a read
//! records the generation before it goes upstream and its result is only
//! stored if no invalidation of that root happened meanwhile.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use hamcp_domain::config::CacheConfig;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;

use crate::request::UpstreamRequest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fingerprint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalized identity of a cacheable request: method, path, and the query
/// pairs sorted by key then value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    method: String,
    path: String,
    query: String,
}

impl Fingerprint {
    pub fn of(request: &UpstreamRequest) -> Self {
        let mut pairs: Vec<(&str, &str)> = request
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort_unstable();
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        Self {
            method: request.method.as_str().to_owned(),
            path: normalize_path(&request.path),
            query,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resource_root(&self) -> String {
        resource_root(&self.path)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.query.is_empty() {
            write!(f, "{} {}", self.method, self.path)
        } else {
            write!(f, "{} {}?{}", self.method, self.path, self.query)
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".into()
    } else {
        trimmed.to_owned()
    }
}

/// The collection a path belongs to: `/api/states/light.kitchen` →
/// `/api/states`, `/api/services/light/turn_on` → `/api/services`.
pub fn resource_root(path: &str) -> String {
    let mut segments = path.trim_matches('/').split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some("api"), Some(collection)) => format!("/api/{collection}"),
        (Some(first), _) => format!("/{first}"),
        (None, _) => "/".into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct CachedResponse {
    payload: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedResponse {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<Fingerprint, CachedResponse>,
    generations: HashMap<String, u64>,
}

pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    inner: RwLock<CacheInner>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: RwLock::new(CacheInner::default()),
        }
    }

    pub fn from_config(cfg: &CacheConfig) -> Option<Self> {
        cfg.enabled
            .then(|| Self::new(Duration::from_secs(cfg.ttl_secs), cfg.max_entries))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh payload for `fp`, if any.
    pub fn get(&self, fp: &Fingerprint) -> Option<Value> {
        let now = Instant::now();
        let inner = self.inner.read();
        inner
            .entries
            .get(fp)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.payload.clone())
    }

    /// Current invalidation generation of `root`.
    pub fn generation(&self, root: &str) -> u64 {
        self.inner.read().generations.get(root).copied().unwrap_or(0)
    }

    /// Store `payload` unless `root` was invalidated since `observed` was
    /// read. Returns whether the entry was stored.
    pub fn insert(&self, fp: Fingerprint, payload: Value, observed: u64) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.write();

        let root = fp.resource_root();
        if inner.generations.get(&root).copied().unwrap_or(0) != observed {
            return false;
        }

        if inner.entries.len() >= self.max_entries && !inner.entries.contains_key(&fp) {
            inner.entries.retain(|_, e| e.is_fresh(now));
            if inner.entries.len() >= self.max_entries {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(key) = oldest {
                    inner.entries.remove(&key);
                }
            }
        }

        inner.entries.insert(
            fp,
            CachedResponse {
                payload,
                stored_at: now,
                ttl: self.ttl,
            },
        );
        true
    }

    /// Drop every entry under `root` and bump its generation.
    pub fn invalidate_root(&self, root: &str) -> usize {
        let mut inner = self.inner.write();
        *inner.generations.entry(root.to_owned()).or_insert(0) += 1;
        let before = inner.entries.len();
        inner.entries.retain(|fp, _| fp.resource_root() != root);
        before - inner.entries.len()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.is_fresh(now));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
