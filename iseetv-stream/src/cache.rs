//! Lock-guarded per-channel stores used by the codec and capability memos.

use iseetv_core::ChannelId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Map from channel id to a cached value.
///
/// Every write, including the whole-map clear, happens under one write lock,
/// so a reader never sees a half-cleared map.
#[derive(Debug)]
pub struct ChannelCache<V> {
    entries: RwLock<HashMap<ChannelId, V>>,
}

impl<V: Clone> ChannelCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get(&self, id: &ChannelId) -> Option<V> {
        self.entries.read().get(id).cloned()
    }

    pub fn put(&self, id: ChannelId, value: V) {
        self.entries.write().insert(id, value);
    }

    /// Drop every entry and store `value` as the only one, atomically.
    pub fn replace_all_with(&self, id: ChannelId, value: V) {
        let mut entries = self.entries.write();
        entries.clear();
        entries.insert(id, value);
    }

    pub fn invalidate(&self, id: &ChannelId) -> Option<V> {
        self.entries.write().remove(id)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone> Default for ChannelCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_invalidate() {
        let cache = ChannelCache::new();
        cache.put(ChannelId::from(1), "h264".to_string());
        cache.put(ChannelId::from(2), "hevc".to_string());

        assert_eq!(cache.get(&ChannelId::from(1)).as_deref(), Some("h264"));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.invalidate(&ChannelId::from(1)).as_deref(), Some("h264"));
        assert!(cache.get(&ChannelId::from(1)).is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replace_all_with_keeps_only_new_entry() {
        let cache = ChannelCache::new();
        cache.put(ChannelId::from(1), true);
        cache.put(ChannelId::from(2), false);

        cache.replace_all_with(ChannelId::from(3), true);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&ChannelId::from(3)), Some(true));
        assert!(cache.get(&ChannelId::from(1)).is_none());
    }
}
