//! First-seen index assignment
//!
//! Hands out dense indices in the order keys are first seen. Used wherever an
//! opaque handle (a stream, an object id) needs a small stable number for
//! display.

use std::collections::HashMap;
use std::hash::Hash;

/// Insertion-ordered key to index map
#[derive(Debug, Clone)]
pub struct IdRegistry<K> {
    index: HashMap<K, u32>,
    order: Vec<K>,
}

impl<K: Eq + Hash + Clone> IdRegistry<K> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Index of `key`, assigning the next free one on first sight
    pub fn get_or_insert(&mut self, key: K) -> u32 {
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.order.len() as u32;
        self.index.insert(key.clone(), idx);
        self.order.push(key);
        idx
    }

    pub fn get(&self, key: &K) -> Option<u32> {
        self.index.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys in first-seen order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }
}

impl<K: Eq + Hash + Clone> Default for IdRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
