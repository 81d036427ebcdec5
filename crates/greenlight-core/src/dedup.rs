use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// DedupCache
// ---------------------------------------------------------------------------

/// Suppresses identical sends within a TTL window.
///
/// Entries are keyed by channel name plus a content hash of the payload, so
/// the same text going to two different channels is not deduplicated.
pub struct DedupCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns false when an identical payload went to the same channel
    /// within the TTL. Otherwise records the send and returns true.
    pub fn should_send(&self, channel: &str, payload: &str, now: DateTime<Utc>) -> bool {
        let key = (channel.to_string(), content_hash(payload));
        let mut entries = self.entries.lock().unwrap();
        if let Some(sent_at) = entries.get(&key) {
            if now - *sent_at < self.ttl {
                tracing::debug!(channel, "duplicate send suppressed");
                return false;
            }
        }
        entries.insert(key, now);
        true
    }

    /// Forgets a recorded send so a later retry of the same payload is not
    /// suppressed. Used when the transport send failed after recording.
    pub fn forget(&self, channel: &str, payload: &str) {
        let key = (channel.to_string(), content_hash(payload));
        self.entries.lock().unwrap().remove(&key);
    }

    /// Drops entries older than twice the TTL. Returns the number removed.
    pub fn compact(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl * 2;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, sent_at| *sent_at >= cutoff);
        before - entries.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

fn content_hash(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    crate::item::hex_lower(&digest)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_within_ttl() {
        let cache = DedupCache::new(Duration::seconds(60));
        let now = Utc::now();
        assert!(cache.should_send("console", "item queued", now));
        assert!(!cache.should_send("console", "item queued", now + Duration::seconds(30)));
    }

    #[test]
    fn allows_after_ttl() {
        let cache = DedupCache::new(Duration::seconds(60));
        let now = Utc::now();
        assert!(cache.should_send("console", "item queued", now));
        assert!(cache.should_send("console", "item queued", now + Duration::seconds(61)));
    }

    #[test]
    fn different_channel_or_payload_passes() {
        let cache = DedupCache::new(Duration::seconds(60));
        let now = Utc::now();
        assert!(cache.should_send("console", "item queued", now));
        assert!(cache.should_send("ops", "item queued", now));
        assert!(cache.should_send("console", "item rejected", now));
    }

    #[test]
    fn forget_reopens_the_window() {
        let cache = DedupCache::new(Duration::seconds(60));
        let now = Utc::now();
        assert!(cache.should_send("console", "item queued", now));
        cache.forget("console", "item queued");
        assert!(cache.should_send("console", "item queued", now));
    }

    #[test]
    fn compact_drops_old_entries() {
        let cache = DedupCache::new(Duration::seconds(60));
        let now = Utc::now();
        cache.should_send("console", "old", now - Duration::seconds(200));
        cache.should_send("console", "fresh", now);
        assert_eq!(cache.len(), 2);

        let removed = cache.compact(now);
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
    }
}
