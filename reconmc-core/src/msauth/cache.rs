//! Per-refresh-token working-combo cache.
//!
//! Keyed by the first 16 characters of the refresh token so the full
//! secret never needs to sit in the cache key; records which
//! `(clientId, scope)` pair last succeeded so a subsequent refresh for the
//! same token does one HTTP call instead of up to twenty.

use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub const CACHE_CAPACITY: usize = 500;
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Combo {
    pub client_id: &'static str,
    pub scope: &'static str,
}

struct Entry {
    combo: Combo,
    inserted_at: Instant,
}

pub struct ComboCache {
    inner: Mutex<LruCache<String, Entry>>,
}

impl ComboCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
        }
    }

    fn key(refresh_token: &str) -> String {
        refresh_token.chars().take(16).collect()
    }

    /// Returns the previously-successful combo for this token, if present
    /// and not yet expired. A stale entry is evicted on lookup.
    pub fn get(&self, refresh_token: &str) -> Option<Combo> {
        let key = Self::key(refresh_token);
        let mut guard = self.inner.lock();
        if let Some(entry) = guard.peek(&key) {
            if entry.inserted_at.elapsed() < CACHE_TTL {
                return Some(entry.combo);
            }
            guard.pop(&key);
        }
        None
    }

    pub fn put(&self, refresh_token: &str, combo: Combo) {
        let key = Self::key(refresh_token);
        self.inner.lock().put(
            key,
            Entry {
                combo,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop a combo that turned out not to work anymore (cached-combo
    /// failure on a later call) so the next attempt does a full scan.
    pub fn invalidate(&self, refresh_token: &str) {
        let key = Self::key(refresh_token);
        self.inner.lock().pop(&key);
    }
}

impl Default for ComboCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves_combo() {
        let cache = ComboCache::new();
        let combo = Combo {
            client_id: "00000000402b5328",
            scope: "XboxLive.signin%20XboxLive.offline_access",
        };
        cache.put("abcdefghijklmnopqrstuvwxyz", combo);
        assert_eq!(cache.get("abcdefghijklmnopqrstuvwxyz"), Some(combo));
    }

    #[test]
    fn keys_on_first_16_chars_only() {
        let cache = ComboCache::new();
        let combo = Combo {
            client_id: "x",
            scope: "y",
        };
        cache.put("1234567890123456-rest-of-token-ignored", combo);
        assert_eq!(
            cache.get("1234567890123456-different-tail"),
            Some(combo)
        );
    }

    #[test]
    fn invalidate_clears_entry() {
        let cache = ComboCache::new();
        cache.put(
            "tokenabcdefghijkl",
            Combo {
                client_id: "a",
                scope: "b",
            },
        );
        cache.invalidate("tokenabcdefghijkl");
        assert_eq!(cache.get("tokenabcdefghijkl"), None);
    }
}
