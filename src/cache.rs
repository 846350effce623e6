//! Bounded least-recently-used cache for memoising per-key computations.

use std::collections::HashMap;
use std::hash::Hash;

struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Entry-count bounded LRU. Slots live in a vector and are linked by index,
/// head is the most recently used.
pub struct RecentCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> RecentCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.map.get(key).copied() {
            Some(idx) => {
                self.hits += 1;
                self.move_to_front(idx);
                Some(self.slots[idx].value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, key: K, value: V) {
        if let Some(idx) = self.map.get(&key).copied() {
            self.slots[idx].value = value;
            self.move_to_front(idx);
            return;
        }

        let idx = if self.slots.len() < self.capacity {
            self.slots.push(Slot {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            });
            self.slots.len() - 1
        } else {
            // Reuse the least recently used slot.
            let Some(idx) = self.tail else {
                return;
            };
            self.unlink(idx);
            let old_key = std::mem::replace(&mut self.slots[idx].key, key.clone());
            self.map.remove(&old_key);
            self.slots[idx].value = value;
            idx
        };

        self.map.insert(key, idx);
        self.push_front(idx);
    }

    /// Returns the cached value or computes, stores and returns it.
    pub fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, compute: F) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.put(key, value.clone());
        value
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.head = None;
        self.tail = None;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = None;
        self.slots[idx].next = self.head;
        if let Some(h) = self.head {
            self.slots[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}
