use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CachedReport {
    pub data: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}

impl CachedReport {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now - self.cached_at;
        // Clock skew (negative age) counts as fresh.
        match age.to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }
}

/// In-memory cache for computed reports. Entries expire after `ttl`; any write
/// to the workspace clears everything.
#[derive(Debug)]
pub struct ReportCache {
    ttl: Duration,
    entries: HashMap<String, CachedReport>,
}

impl ReportCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn key(kind: &str, ids: &[&str]) -> String {
        let mut k = kind.to_string();
        for id in ids {
            k.push(':');
            k.push_str(id);
        }
        k
    }

    pub fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&mut self, key: &str, now: DateTime<Utc>) -> Option<serde_json::Value> {
        if self.ttl.is_zero() {
            return None;
        }
        let fresh = self.entries.get(key).map(|e| e.is_fresh(now, self.ttl))?;
        if !fresh {
            debug!(key, "report cache entry expired");
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.data.clone())
    }

    pub fn put(&mut self, key: String, data: serde_json::Value) {
        self.put_entry(key, CachedReport::new(data));
    }

    pub fn put_entry(&mut self, key: String, entry: CachedReport) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(key, entry);
    }

    pub fn clear(&mut self) {
        if !self.is_empty() {
            debug!(entries = self.len(), "report cache cleared");
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = ReportCache::new(Duration::from_secs(300));
        let key = ReportCache::key("classResults", &["exam-1"]);
        let entry = CachedReport::new(json!({ "rows": 3 }));
        let stored_at = entry.cached_at;
        cache.put_entry(key.clone(), entry);

        let early = stored_at + chrono::Duration::seconds(299);
        assert_eq!(cache.get_at(&key, early), Some(json!({ "rows": 3 })));

        let late = stored_at + chrono::Duration::seconds(300);
        assert_eq!(cache.get_at(&key, late), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let mut cache = ReportCache::new(Duration::ZERO);
        cache.put("k".to_string(), json!(1));
        assert!(cache.is_empty());
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = ReportCache::new(Duration::from_secs(60));
        cache.put(ReportCache::key("a", &["1"]), json!(1));
        cache.put(ReportCache::key("b", &["2", "3"]), json!(2));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
