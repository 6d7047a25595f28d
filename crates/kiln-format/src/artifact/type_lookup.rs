//! Descriptor → class-def index hash tables.
//!
//! Open addressing over `next_power_of_two(class_count)` slots of
//! `[u32 descriptor_hash][u32 class_def_index]`; an empty slot has index
//! `u32::MAX`. Collisions probe linearly.

use kiln_core::modified_utf8_hash;

use crate::bytes::{put_u32, read_u32_le};

const EMPTY: u32 = u32::MAX;
const ENTRY_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry {
    hash: u32,
    class_def_index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeLookupTable {
    slots: Vec<Option<Entry>>,
}

impl TypeLookupTable {
    /// Build from descriptors in class-def order.
    pub fn build<'a>(descriptors: impl IntoIterator<Item = &'a str>) -> Self {
        let descriptors: Vec<&str> = descriptors.into_iter().collect();
        let capacity = Self::capacity_for(descriptors.len());
        let mut slots = vec![None; capacity];

        for (class_def_index, descriptor) in descriptors.iter().enumerate() {
            let hash = modified_utf8_hash(descriptor);
            let mut pos = hash as usize & (capacity - 1);
            while slots[pos].is_some() {
                pos = (pos + 1) & (capacity - 1);
            }
            slots[pos] = Some(Entry {
                hash,
                class_def_index: class_def_index as u32,
            });
        }

        Self { slots }
    }

    fn capacity_for(class_count: usize) -> usize {
        if class_count == 0 {
            0
        } else {
            class_count.next_power_of_two()
        }
    }

    /// Encoded size for a container with `class_count` classes.
    pub fn encoded_size(class_count: usize) -> usize {
        Self::capacity_for(class_count) * ENTRY_SIZE
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for slot in &self.slots {
            let (hash, index) = slot.map_or((0, EMPTY), |e| (e.hash, e.class_def_index));
            put_u32(out, hash);
            put_u32(out, index);
        }
    }

    pub fn decode(bytes: &[u8], class_count: usize) -> Option<Self> {
        let capacity = Self::capacity_for(class_count);
        let slots = (0..capacity)
            .map(|i| {
                let hash = read_u32_le(bytes, i * ENTRY_SIZE)?;
                let index = read_u32_le(bytes, i * ENTRY_SIZE + 4)?;
                Some((index != EMPTY).then_some(Entry {
                    hash,
                    class_def_index: index,
                }))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { slots })
    }

    /// Find the class-def index for `descriptor`.
    ///
    /// `descriptor_of` resolves a candidate class-def index to its descriptor
    /// so hash collisions can be told apart.
    pub fn lookup<'a>(
        &self,
        descriptor: &str,
        descriptor_of: impl Fn(u32) -> Option<&'a str>,
    ) -> Option<u32> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let hash = modified_utf8_hash(descriptor);
        let mut pos = hash as usize & mask;

        for _ in 0..self.slots.len() {
            let entry = self.slots[pos]?;
            if entry.hash == hash && descriptor_of(entry.class_def_index) == Some(descriptor) {
                return Some(entry.class_def_index);
            }
            pos = (pos + 1) & mask;
        }
        None
    }
}
