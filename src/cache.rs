//! Feature-id to image-URL cache.
//!
//! At-most-once-write per key: the first successful fetch wins and later
//! writes for the same id are ignored. All writes happen on the event-loop
//! thread, so there is no locking. Unlike the browser-tab original this
//! cache is bounded, evicting the least recently used entry when full.

use std::collections::HashMap;

#[derive(Debug)]
struct Slot {
    url: String,
    last_used: u64,
}

/// Recency is a monotonic stamp per entry, so reads stay O(1); the
/// least-recently-used scan only runs on insertion into a full cache.
#[derive(Debug)]
pub struct ImageCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, Slot>,
}

impl ImageCache {
    /// A cache holding at most `capacity` entries; zero means unbounded.
    pub fn new(capacity: usize) -> Self {
        ImageCache {
            capacity,
            tick: 0,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cached image URL for a feature, refreshing its recency.
    pub fn get(&mut self, feature_id: &str) -> Option<&str> {
        self.tick += 1;
        let tick = self.tick;

        self.entries.get_mut(feature_id).map(|slot| {
            slot.last_used = tick;
            slot.url.as_str()
        })
    }

    /// Insert unless the key is already present. Returns whether the value
    /// was stored.
    pub fn insert_if_absent(&mut self, feature_id: &str, url: &str) -> bool {
        if self.entries.contains_key(feature_id) {
            return false;
        }

        if self.capacity > 0 && self.entries.len() >= self.capacity {
            let stalest = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(id, _)| id.clone());

            if let Some(id) = stalest {
                self.entries.remove(&id);
            }
        }

        self.tick += 1;
        self.entries.insert(
            feature_id.to_string(),
            Slot {
                url: url.to_string(),
                last_used: self.tick,
            },
        );

        true
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        // Plenty for a session's worth of viewed posts
        ImageCache::new(4096)
    }
}
