//! Reference tables filled by the layout walk: BSS slots and rel-ro entries.

use std::collections::BTreeMap;

use kiln_core::{ContainerIndex, SymbolRef};
use kiln_format::{BssKind, BssMapping, Container};

use crate::error::{Result, WriteError};

/// Size of the symbol table a BSS kind indexes into.
pub(crate) fn index_space(container: &Container, kind: BssKind) -> u32 {
    let len = match kind {
        BssKind::Method => container.method_ids.len(),
        BssKind::Type | BssKind::PublicType | BssKind::PackageType => container.type_ids.len(),
        BssKind::String => container.strings.len(),
        BssKind::MethodType => container.proto_ids.len(),
    };
    len as u32
}

/// Per-container, per-kind BSS slot assignment.
///
/// Slots are discovered in visit order and laid out in ascending index
/// order: all method slots first (pointer sized), then the 4-byte GC-root
/// slots grouped by container and kind.
#[derive(Debug)]
pub(crate) struct BssTables {
    pointer_size: u32,
    /// Referenced symbol index to its slot rank, numbered by `layout`.
    referenced: Vec<[BTreeMap<u32, u32>; 6]>,
    /// Offset of each (container, kind)'s first slot from the BSS start.
    first: Vec<[u32; 6]>,
    methods_size: u32,
    roots_size: u32,
}

impl BssTables {
    pub(crate) fn new(container_count: usize, pointer_size: u32) -> Self {
        Self {
            pointer_size,
            referenced: (0..container_count).map(|_| Default::default()).collect(),
            first: vec![[0; 6]; container_count],
            methods_size: 0,
            roots_size: 0,
        }
    }

    /// Record a reference; repeated references share one slot.
    pub(crate) fn record(&mut self, kind: BssKind, target: SymbolRef) {
        self.referenced[target.container.as_usize()][kind.index()]
            .entry(target.index)
            .or_insert(0);
    }

    pub(crate) fn slot_size(&self, kind: BssKind) -> u32 {
        if kind.is_gc_root() { 4 } else { self.pointer_size }
    }

    pub(crate) fn has_slots(&self, container: ContainerIndex, kind: BssKind) -> bool {
        !self.referenced[container.as_usize()][kind.index()].is_empty()
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.referenced.iter().flatten().map(BTreeMap::len).sum()
    }

    /// Assign region-relative offsets to every slot.
    pub(crate) fn layout(&mut self) -> Result<()> {
        for slots in self.referenced.iter_mut().flatten() {
            for (rank, slot) in slots.values_mut().enumerate() {
                *slot = rank as u32;
            }
        }

        let mut offset = 0u32;
        for (c, kinds) in self.referenced.iter().enumerate() {
            self.first[c][BssKind::Method.index()] = offset;
            offset = region_add(offset, kinds[BssKind::Method.index()].len(), self.pointer_size)?;
        }
        self.methods_size = offset;

        for (c, kinds) in self.referenced.iter().enumerate() {
            for kind in BssKind::ALL.into_iter().filter(|k| k.is_gc_root()) {
                self.first[c][kind.index()] = offset;
                offset = region_add(offset, kinds[kind.index()].len(), 4)?;
            }
        }
        self.roots_size = offset - self.methods_size;
        Ok(())
    }

    pub(crate) fn methods_size(&self) -> u32 {
        self.methods_size
    }

    pub(crate) fn roots_size(&self) -> u32 {
        self.roots_size
    }

    pub(crate) fn size(&self) -> u32 {
        self.methods_size + self.roots_size
    }

    /// Absolute offset of the slot for `target`, given the BSS start.
    /// Only meaningful after [`BssTables::layout`].
    pub(crate) fn slot_offset(&self, kind: BssKind, target: SymbolRef, bss_offset: u32) -> Option<u32> {
        let indices = self.referenced.get(target.container.as_usize())?;
        let rank = *indices[kind.index()].get(&target.index)?;
        let first = self.first[target.container.as_usize()][kind.index()];
        Some(bss_offset + first + rank * self.slot_size(kind))
    }

    /// Serialized mapping for one (container, kind), `None` without slots.
    pub(crate) fn mapping(
        &self,
        container: ContainerIndex,
        kind: BssKind,
        index_space: u32,
        bss_offset: u32,
    ) -> Option<BssMapping> {
        let indices = &self.referenced[container.as_usize()][kind.index()];
        if indices.is_empty() {
            return None;
        }
        Some(BssMapping {
            kind,
            slot_size: self.slot_size(kind) as u8,
            index_space,
            first_offset: bss_offset + self.first[container.as_usize()][kind.index()],
            indices: indices.keys().copied().collect(),
        })
    }
}

fn region_add(offset: u32, count: usize, slot_size: u32) -> Result<u32> {
    u32::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(slot_size))
        .and_then(|size| offset.checked_add(size))
        .ok_or_else(|| WriteError::overflow("BSS"))
}

/// Boot-image targets reached through rel-ro entries, sorted by target.
#[derive(Debug, Default)]
pub(crate) struct RelRoTable {
    entries: BTreeMap<u32, u32>,
}

impl RelRoTable {
    pub(crate) fn record(&mut self, boot_image_offset: u32) {
        self.entries.entry(boot_image_offset).or_insert(0);
    }

    /// Number the entries in target order.
    pub(crate) fn layout(&mut self) {
        for (rank, slot) in self.entries.values_mut().enumerate() {
            *slot = rank as u32;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn size(&self) -> Result<u32> {
        u32::try_from(self.entries.len())
            .ok()
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| WriteError::overflow("rel-ro segment"))
    }

    /// Absolute offset of the entry holding `boot_image_offset`.
    pub(crate) fn entry_offset(&self, boot_image_offset: u32, rel_ro_offset: u32) -> Option<u32> {
        self.entries
            .get(&boot_image_offset)
            .map(|rank| rel_ro_offset + rank * 4)
    }

    /// Entry values in segment order.
    pub(crate) fn targets(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }
}
