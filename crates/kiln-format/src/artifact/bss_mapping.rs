//! Serialized BSS slot mappings.
//!
//! One mapping per (container, kind) with at least one slot:
//! `[u8 kind][u8 slot_size][u16 0][u32 index_space][u32 entry_count]
//! [u32 first_offset][u32 × ceil(index_space / 32) bitmap]`.
//! The i-th set bit of the bitmap owns the slot at
//! `first_offset + i * slot_size`; slots are assigned in ascending index order.

use crate::bytes::{Cursor, put_u16, put_u32};

/// The six BSS slot kinds, in allocation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BssKind {
    Method,
    Type,
    PublicType,
    PackageType,
    String,
    MethodType,
}

impl BssKind {
    pub const ALL: [BssKind; 6] = [
        Self::Method,
        Self::Type,
        Self::PublicType,
        Self::PackageType,
        Self::String,
        Self::MethodType,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// GC-root slots hold compressed references; method slots hold pointers.
    pub fn is_gc_root(self) -> bool {
        self != Self::Method
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Type => "type",
            Self::PublicType => "public-type",
            Self::PackageType => "package-type",
            Self::String => "string",
            Self::MethodType => "method-type",
        }
    }
}

/// Decoded (or to-be-encoded) BSS mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BssMapping {
    pub kind: BssKind,
    pub slot_size: u8,
    /// Size of the symbol table the indices point into.
    pub index_space: u32,
    /// BSS offset of the slot for the smallest index.
    pub first_offset: u32,
    /// Ascending symbol indices that own a slot.
    pub indices: Vec<u32>,
}

impl BssMapping {
    pub fn encoded_size(index_space: u32) -> usize {
        16 + 4 * (index_space as usize).div_ceil(32)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind.to_u8());
        out.push(self.slot_size);
        put_u16(out, 0);
        put_u32(out, self.index_space);
        put_u32(out, self.indices.len() as u32);
        put_u32(out, self.first_offset);

        let mut bitmap = vec![0u32; (self.index_space as usize).div_ceil(32)];
        for &index in &self.indices {
            bitmap[index as usize / 32] |= 1 << (index % 32);
        }
        for word in bitmap {
            put_u32(out, word);
        }
    }

    pub fn decode(bytes: &[u8], offset: usize) -> Option<Self> {
        let mut cur = Cursor::at(bytes, offset);
        let kind = BssKind::from_u8(cur.u8()?)?;
        let slot_size = cur.u8()?;
        cur.u16()?;
        let index_space = cur.u32()?;
        let entry_count = cur.u32()? as usize;
        let first_offset = cur.u32()?;

        let mut indices = Vec::with_capacity(entry_count);
        for word_index in 0..(index_space as usize).div_ceil(32) {
            let word = cur.u32()?;
            for bit in 0..32usize {
                if word & (1u32 << bit) != 0 {
                    indices.push((word_index * 32 + bit) as u32);
                }
            }
        }
        if indices.len() != entry_count {
            return None;
        }

        Some(Self {
            kind,
            slot_size,
            index_space,
            first_offset,
            indices,
        })
    }

    /// BSS offset of the slot owned by `index`, if any.
    pub fn offset_of(&self, index: u32) -> Option<u32> {
        let rank = self.indices.binary_search(&index).ok()?;
        Some(self.first_offset + rank as u32 * self.slot_size as u32)
    }
}
