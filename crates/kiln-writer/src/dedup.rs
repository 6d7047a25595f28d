//! Content-keyed deduplication store.
//!
//! Open addressing over a power-of-two slot array, FNV-1a hashing and linear
//! probing. Keys compare bytewise, so a hash collision never merges two
//! different blobs. Entries keep their insertion order.

use kiln_core::fnv1a64;

use crate::error::{Result, WriteError};

const INITIAL_SLOTS: usize = 64;

struct Entry<V> {
    hash: u64,
    key: Vec<u8>,
    value: V,
}

/// Maps byte blobs to the value assigned on first insertion.
pub(crate) struct DedupStore<V> {
    name: &'static str,
    slots: Vec<Option<u32>>,
    entries: Vec<Entry<V>>,
    max_entries: usize,
}

impl<V: Copy> DedupStore<V> {
    pub(crate) fn new(name: &'static str, max_entries: usize) -> Self {
        Self {
            name,
            slots: vec![None; INITIAL_SLOTS],
            entries: Vec::new(),
            max_entries,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<V> {
        let hash = fnv1a64(key);
        let mask = self.slots.len() - 1;
        let mut pos = hash as usize & mask;
        while let Some(index) = self.slots[pos] {
            let entry = &self.entries[index as usize];
            if entry.hash == hash && entry.key == key {
                return Some(entry.value);
            }
            pos = (pos + 1) & mask;
        }
        None
    }

    /// Return the value stored for `key`, or insert the one `make` produces.
    ///
    /// The flag is `true` when the key was already present.
    pub(crate) fn get_or_insert_with(
        &mut self,
        key: &[u8],
        make: impl FnOnce() -> Result<V>,
    ) -> Result<(V, bool)> {
        if let Some(value) = self.get(key) {
            return Ok((value, true));
        }
        if self.entries.len() >= self.max_entries {
            return Err(WriteError::limits(format!(
                "{} dedup store is full ({} entries)",
                self.name, self.max_entries
            )));
        }

        let value = make()?;
        if (self.entries.len() + 1) * 4 > self.slots.len() * 3 {
            self.grow();
        }
        let hash = fnv1a64(key);
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            hash,
            key: key.to_vec(),
            value,
        });
        self.place(hash, index);
        Ok((value, false))
    }

    /// Values in insertion order.
    pub(crate) fn values(&self) -> impl Iterator<Item = (&[u8], V)> {
        self.entries.iter().map(|e| (e.key.as_slice(), e.value))
    }

    fn place(&mut self, hash: u64, index: u32) {
        let mask = self.slots.len() - 1;
        let mut pos = hash as usize & mask;
        while self.slots[pos].is_some() {
            pos = (pos + 1) & mask;
        }
        self.slots[pos] = Some(index);
    }

    fn grow(&mut self) {
        self.slots = vec![None; self.slots.len() * 2];
        for index in 0..self.entries.len() {
            self.place(self.entries[index].hash, index as u32);
        }
    }
}
