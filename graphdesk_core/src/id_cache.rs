use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 512;

/// What a short handle points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Mail,
    Event,
    OnlineMeeting,
    DriveItem,
    Transcript,
}

impl HandleKind {
    pub fn prefix(&self) -> char {
        match self {
            HandleKind::Mail => 'm',
            HandleKind::Event => 'e',
            HandleKind::OnlineMeeting => 'o',
            HandleKind::DriveItem => 'f',
            HandleKind::Transcript => 't',
        }
    }
}

#[derive(Default)]
struct Inner {
    by_handle: HashMap<String, String>,
    by_id: HashMap<(HandleKind, String), String>,
    order: VecDeque<String>,
    counters: HashMap<HandleKind, u64>,
}

/// In-memory map from short handles (`m3`, `f12`) to long Graph ids, so
/// results can be referenced in follow-up commands. Never persisted.
pub struct IdCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for IdCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl IdCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Returns the handle for `id`, allocating one on first sight.
    pub fn remember(&self, kind: HandleKind, id: &str) -> String {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let key = (kind, id.to_string());
        if let Some(handle) = inner.by_id.get(&key) {
            return handle.clone();
        }

        let counter = inner.counters.entry(kind).or_insert(0);
        *counter += 1;
        let handle = format!("{}{}", kind.prefix(), counter);

        inner.by_handle.insert(handle.clone(), id.to_string());
        inner.by_id.insert(key, handle.clone());
        inner.order.push_back(handle.clone());
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                if let Some(old_id) = inner.by_handle.remove(&evicted) {
                    inner.by_id.retain(|_, h| *h != evicted);
                    tracing::trace!(handle = %evicted, id = %old_id, "evicted id handle");
                }
            }
        }
        handle
    }

    /// Full id for a known handle; anything else is returned unchanged.
    pub fn resolve(&self, input: &str) -> String {
        let trimmed = input.trim();
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .by_handle
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_handle
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_stable_per_id_and_kind() {
        let cache = IdCache::default();
        let a = cache.remember(HandleKind::Mail, "AAMkAD-long-1");
        let b = cache.remember(HandleKind::Mail, "AAMkAD-long-2");
        assert_eq!(a, "m1");
        assert_eq!(b, "m2");
        assert_eq!(cache.remember(HandleKind::Mail, "AAMkAD-long-1"), "m1");
        assert_eq!(cache.remember(HandleKind::DriveItem, "01ABC"), "f1");
        assert_eq!(cache.resolve(" m2 "), "AAMkAD-long-2");
    }

    #[test]
    fn unknown_input_passes_through() {
        let cache = IdCache::default();
        assert_eq!(cache.resolve("m9"), "m9");
        assert_eq!(cache.resolve("AAMkAD-raw"), "AAMkAD-raw");
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache = IdCache::with_capacity(2);
        cache.remember(HandleKind::Event, "one");
        cache.remember(HandleKind::Event, "two");
        cache.remember(HandleKind::Event, "three");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.resolve("e1"), "e1");
        assert_eq!(cache.resolve("e3"), "three");
        // A re-remembered evicted id gets a fresh handle.
        assert_eq!(cache.remember(HandleKind::Event, "one"), "e4");
    }
}
