use std::time::Duration;

use moka::sync::Cache;

use crate::config::DEFAULT_HTTP2_FAILURE_TTL;

/// Process-wide memory of hosts that cannot speak HTTP/2.
pub trait HostCompatibility: Send + Sync {
    fn has(&self, host: &str) -> bool;
    fn add(&self, host: &str);
    fn clear(&self);
}

/// Hosts where HTTP/2 failed, each forgotten after a TTL.
#[derive(Clone)]
pub struct Http2FailureCache {
    hosts: Cache<String, ()>,
}

impl Default for Http2FailureCache {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP2_FAILURE_TTL)
    }
}

impl Http2FailureCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            hosts: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl HostCompatibility for Http2FailureCache {
    fn has(&self, host: &str) -> bool {
        self.hosts.contains_key(&host.to_ascii_lowercase())
    }

    fn add(&self, host: &str) {
        self.hosts.insert(host.to_ascii_lowercase(), ());
    }

    fn clear(&self) {
        self.hosts.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_has_clear() {
        let cache = Http2FailureCache::default();
        assert!(!cache.has("example.com"));
        cache.add("example.com");
        assert!(cache.has("example.com"));
        assert!(!cache.has("other.example.com"));
        cache.clear();
        assert!(!cache.has("example.com"));
    }

    #[test]
    fn test_entries_expire() {
        let cache = Http2FailureCache::new(Duration::from_millis(20));
        cache.add("example.com");
        assert!(cache.has("example.com"));
        std::thread::sleep(Duration::from_millis(60));
        assert!(!cache.has("example.com"));
    }
}
