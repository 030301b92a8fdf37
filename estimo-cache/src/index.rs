//! Reverse dependency index.
//!
//! Maps each encoded tag to the encoded keys that depend on it, and each key
//! back to its tags, so invalidation can find every key for a tag and
//! removing a key can prune it from all its tags. The index is process-local
//! and is rebuilt lazily as entries are written.
//!
//! Both maps live under one lock, so a reader never observes a key that is in
//! `by_tag` but missing from `by_key` or vice versa.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct IndexInner {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, HashSet<String>>,
}

impl IndexInner {
    fn link(&mut self, key: &str, tag: &str) {
        self.by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        self.by_key
            .entry(key.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    fn unlink_tag_side(&mut self, key: &str, tag: &str) {
        if let Some(keys) = self.by_tag.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_tag.remove(tag);
            }
        }
    }

    fn remove_key(&mut self, key: &str) -> bool {
        match self.by_key.remove(key) {
            Some(tags) => {
                for tag in &tags {
                    self.unlink_tag_side(key, tag);
                }
                true
            }
            None => false,
        }
    }
}

/// Thread-safe tag ↔ key index.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    inner: RwLock<IndexInner>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // Every update leaves both maps consistent, so a poisoned lock is usable.
    fn read(&self) -> RwLockReadGuard<'_, IndexInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that `key` depends on each of `tags`. Existing links are kept.
    pub fn add_key_to_tags<I, S>(&self, key: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.write();
        for tag in tags {
            inner.link(key, tag.as_ref());
        }
    }

    /// Make `tags` the exact dependency set of `key`.
    ///
    /// Used when an entry is rewritten so links from its previous write do
    /// not linger. An empty `tags` removes the key from the index.
    pub fn replace_tags<I, S>(&self, key: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.write();
        inner.remove_key(key);
        for tag in tags {
            inner.link(key, tag.as_ref());
        }
    }

    /// Like [`replace_tags`](Self::replace_tags), but only takes the write
    /// lock when the indexed tags of `key` differ from `tags`.
    ///
    /// Returns `true` if the index changed.
    pub fn sync_tags(&self, key: &str, tags: &BTreeSet<String>) -> bool {
        let in_sync = match self.read().by_key.get(key) {
            Some(current) => current.len() == tags.len() && tags.iter().all(|t| current.contains(t)),
            None => tags.is_empty(),
        };
        if in_sync {
            return false;
        }
        self.replace_tags(key, tags);
        true
    }

    /// Remove `key` from every tag it was registered under.
    ///
    /// Returns `false` if the key was not indexed. Calling it twice is fine.
    pub fn remove_key(&self, key: &str) -> bool {
        self.write().remove_key(key)
    }

    /// Drop a tag and unlink it from its keys. Returns the keys it held.
    pub fn remove_tag(&self, tag: &str) -> HashSet<String> {
        let mut inner = self.write();
        let keys = inner.by_tag.remove(tag).unwrap_or_default();
        for key in &keys {
            if let Some(tags) = inner.by_key.get_mut(key) {
                tags.remove(tag);
                if tags.is_empty() {
                    inner.by_key.remove(key);
                }
            }
        }
        keys
    }

    /// Snapshot of the keys depending on `tag`. Empty for an unknown tag.
    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        self.read().by_tag.get(tag).cloned().unwrap_or_default()
    }

    /// Snapshot of the tags `key` depends on.
    pub fn tags_for_key(&self, key: &str) -> HashSet<String> {
        self.read().by_key.get(key).cloned().unwrap_or_default()
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn remove_keys_with_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.write();
        let keys: Vec<String> = inner
            .by_key
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            inner.remove_key(key);
        }
        keys.len()
    }

    pub fn tag_count(&self) -> usize {
        self.read().by_tag.len()
    }

    pub fn key_count(&self) -> usize {
        self.read().by_key.len()
    }

    /// Snapshot of every indexed key.
    pub fn indexed_keys(&self) -> Vec<String> {
        self.read().by_key.keys().cloned().collect()
    }
}
