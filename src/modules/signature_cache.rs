use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const MIN_SIGNATURE_LENGTH: usize = 50;

struct CacheState {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

/// Bounded thinking-signature cache with FIFO eviction. Maps a signature to
/// the model family it was produced by.
pub struct SignatureCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::with_capacity(crate::constants::SIGNATURE_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn insert(&self, signature: &str, family: &str) {
        if signature.len() < MIN_SIGNATURE_LENGTH {
            return;
        }
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state
            .entries
            .insert(signature.to_string(), family.to_string())
            .is_none()
        {
            state.order.push_back(signature.to_string());
        }
        while state.entries.len() > self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            tracing::debug!("[SignatureCache] Evicted oldest entry (capacity {})", self.capacity);
        }
    }

    pub fn get(&self, signature: &str) -> Option<String> {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.entries.get(signature).cloned()
    }

    pub fn len(&self) -> usize {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(tag: char) -> String {
        std::iter::repeat(tag).take(60).collect()
    }

    #[test]
    fn stores_and_returns_families() {
        let cache = SignatureCache::with_capacity(10);
        cache.insert(&sig('a'), "claude");
        assert_eq!(cache.get(&sig('a')), Some("claude".to_string()));
        assert_eq!(cache.get(&sig('b')), None);
    }

    #[test]
    fn short_signatures_are_ignored() {
        let cache = SignatureCache::with_capacity(10);
        cache.insert("short", "claude");
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_is_first_in_first_out() {
        let cache = SignatureCache::with_capacity(2);
        cache.insert(&sig('a'), "one");
        cache.insert(&sig('b'), "two");
        cache.insert(&sig('c'), "three");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&sig('a')), None);
        assert_eq!(cache.get(&sig('b')), Some("two".to_string()));
        assert_eq!(cache.get(&sig('c')), Some("three".to_string()));
    }

    #[test]
    fn reinserting_does_not_duplicate_order_entries() {
        let cache = SignatureCache::with_capacity(2);
        cache.insert(&sig('a'), "one");
        cache.insert(&sig('a'), "one-updated");
        cache.insert(&sig('b'), "two");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&sig('a')), Some("one-updated".to_string()));
    }
}
