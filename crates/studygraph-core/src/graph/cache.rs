//! Graph response cache
//!
//! Assembled graphs are cached per query for a short TTL; registry writes
//! invalidate by workspace prefix, cross-workspace sync drops everything.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache seam so an external cache can replace the in-process map
pub trait GraphCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn invalidate_prefix(&self, prefix: &str);
    fn invalidate_all(&self);
}

/// Process-local TTL cache
pub struct InMemoryGraphCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl InMemoryGraphCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl_seconds(seconds: u64) -> Self {
        Self::new(Duration::from_secs(seconds))
    }
}

impl Default for InMemoryGraphCache {
    fn default() -> Self {
        Self::with_ttl_seconds(30)
    }
}

impl GraphCache for InMemoryGraphCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: Value) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), (Instant::now(), value));
    }

    fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        debug!(prefix = %prefix, dropped = before - entries.len(), "Graph cache invalidated");
    }

    fn invalidate_all(&self) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.clear();
    }
}

/// Cache key for one graph query
pub fn graph_cache_key(
    workspace_id: i64,
    scope: &str,
    q: &str,
    limit: i64,
    include_format_nodes: bool,
    dedupe: bool,
    include_variants: bool,
) -> String {
    format!(
        "workspace:{}:graph:scope={}|q={}|limit={}|format={}|dedupe={}|variants={}",
        workspace_id,
        scope,
        q.trim().to_lowercase(),
        limit,
        include_format_nodes as u8,
        dedupe as u8,
        include_variants as u8,
    )
}

/// Invalidation prefix covering every cached response of one workspace
pub fn workspace_cache_prefix(workspace_id: i64) -> String {
    format!("workspace:{}:", workspace_id)
}
