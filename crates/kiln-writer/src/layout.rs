//! Offset assignment for every section of the executable artifact.
//!
//! `Layout::compute` runs the sub-phases in order, each one seeing only the
//! results of earlier ones:
//!
//! ```text
//! L1 header + key/value store      L6 container metadata records
//! L2 lookup and class-offset tables L7 BSS slots
//! L3 class descriptors              L8 trampolines, method headers and code
//! L4 stackmap blobs (deduplicated)  L9 trailing thunks
//! L5 BSS and rel-ro references      L10 rel-ro segment, BSS placement
//! ```
//!
//! Nothing here touches the output stream; the builder writes the sections
//! at exactly these offsets afterwards.

use kiln_core::{InstructionSet, align_up};
use kiln_format::{
    BssKind, BssMapping, ClassDescriptor, CompiledMethod, ContainerRecord, HEADER_SIZE, Header,
    METHOD_HEADER_SIZE, MethodHeader, PatchKind, PcRelativeTarget, TrampolineKind,
    TypeLookupTable, VaLayout,
};
use tracing::debug;

use crate::config::WriterConfig;
use crate::dedup::DedupStore;
use crate::error::{Result, WriteError};
use crate::patcher::{MethodOffsetMap, RelativePatcher};
use crate::refs::{BssTables, RelRoTable, index_space};
use crate::source::SourceSet;
use crate::trampolines::trampoline_code;
use crate::visitor::{ClassEntry, MethodEntry, MethodTable, Phase, walk, walk_ordered};

/// Placement of one input container's read-only data.
#[derive(Clone, Debug)]
pub(crate) struct ContainerLayout {
    pub(crate) lookup_table_offset: u32,
    pub(crate) class_offsets_offset: u32,
    pub(crate) record_offset: u32,
    pub(crate) record: ContainerRecord,
}

/// One method header and code block in the code segment.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CodeSlot {
    /// Compiled record written here.
    pub(crate) compiled: usize,
    /// Offset handed to the patcher; thunks reserved there precede the header.
    pub(crate) reserve_at: u32,
    pub(crate) header_offset: u32,
    pub(crate) header: MethodHeader,
}

impl CodeSlot {
    pub(crate) fn code_start(&self) -> u32 {
        self.header_offset + METHOD_HEADER_SIZE
    }
}

/// Every offset of the artifact, fixed by `PrepareLayout`.
pub(crate) struct Layout {
    /// Header with every field but the checksum filled in.
    pub(crate) header: Header,
    pub(crate) containers: Vec<ContainerLayout>,
    /// Descriptor offset of each class, indexed like [`MethodTable::classes`].
    pub(crate) class_entries: Vec<u32>,
    /// Stackmap offset of each compiled record; 0 when it has none.
    pub(crate) stackmaps: Vec<u32>,
    pub(crate) maps: DedupStore<u32>,
    /// Code start of each emitted trampoline.
    pub(crate) trampolines: Vec<(TrampolineKind, u32)>,
    /// Unique code blocks in layout order.
    pub(crate) code: Vec<CodeSlot>,
    /// Code offset (entry adjustment included) of each compiled record.
    pub(crate) code_offsets: Vec<u32>,
    pub(crate) method_offsets: MethodOffsetMap,
    /// Offset passed to `reserve_space_end`.
    pub(crate) end_reserve: u32,
    pub(crate) bss: BssTables,
    pub(crate) rel_ro: RelRoTable,
}

fn advance(offset: u32, size: usize, what: &str) -> Result<u32> {
    u32::try_from(size)
        .ok()
        .and_then(|size| offset.checked_add(size))
        .ok_or_else(|| WriteError::overflow(what))
}

fn align(offset: u32, alignment: u32, what: &str) -> Result<u32> {
    align_up(offset, alignment).ok_or_else(|| WriteError::overflow(what))
}

impl Layout {
    pub(crate) fn compute(
        table: &MethodTable,
        sources: &SourceSet,
        config: &WriterConfig,
        key_value_store_size: u32,
        patcher: &mut RelativePatcher,
    ) -> Result<Self> {
        let isa = config.isa();
        let mut layout = Self {
            header: Header {
                isa: isa.id(),
                isa_features: config.features().bits(),
                container_count: sources.len() as u32,
                key_value_store_size,
                ..Header::default()
            },
            containers: Vec::with_capacity(sources.len()),
            class_entries: Vec::with_capacity(table.classes.len()),
            stackmaps: vec![0; table.compiled_count()],
            maps: DedupStore::new("stackmap", config.dedup_limit()),
            trampolines: Vec::new(),
            code: Vec::new(),
            code_offsets: vec![0; table.compiled_count()],
            method_offsets: MethodOffsetMap::new(),
            end_reserve: 0,
            bss: BssTables::new(sources.len(), isa.pointer_size()),
            rel_ro: RelRoTable::default(),
        };

        let kv_end = advance(HEADER_SIZE, key_value_store_size as usize, "key/value store")?;
        debug!(target: "layout", kv_end, "L1 header");

        let offset = layout.reserve_tables(sources, kv_end)?;
        let offset = layout.reserve_class_entries(table, offset)?;
        let offset = layout.reserve_maps(table, offset)?;
        layout.collect_references(table)?;
        let offset = layout.reserve_metadata(sources, offset)?;
        layout.bss.layout()?;
        debug!(
            target: "layout",
            slots = layout.bss.slot_count(),
            methods_size = layout.bss.methods_size(),
            roots_size = layout.bss.roots_size(),
            "L7 bss"
        );
        let offset = layout.reserve_code(table, config, offset, patcher)?;
        let offset = layout.reserve_code_end(offset, patcher)?;
        layout.reserve_rel_ro(config, offset)?;
        layout.finalize_mappings(sources);
        Ok(layout)
    }

    /// L2: one type lookup table per container, then one class-offset table
    /// per container.
    fn reserve_tables(&mut self, sources: &SourceSet, kv_end: u32) -> Result<u32> {
        let mut offset = align(kv_end, 4, "lookup tables")?;
        self.header.lookup_tables_offset = offset;
        let mut lookup = Vec::with_capacity(sources.len());
        for (_, loaded) in sources.iter() {
            lookup.push(offset);
            offset = advance(offset, TypeLookupTable::encoded_size(loaded.class_count()), "lookup tables")?;
        }

        offset = align(offset, 4, "class offset tables")?;
        self.header.class_offsets_offset = offset;
        for ((_, loaded), lookup_table_offset) in sources.iter().zip(lookup) {
            self.containers.push(ContainerLayout {
                lookup_table_offset,
                class_offsets_offset: offset,
                record_offset: 0,
                record: ContainerRecord {
                    location: loaded.location.clone(),
                    checksum: loaded.checksum(),
                    va_offset: 0,
                    lookup_table_offset,
                    class_offsets_offset: offset,
                    class_count: loaded.class_count() as u32,
                    bss_mappings: Default::default(),
                },
            });
            offset = advance(offset, 4 * loaded.class_count(), "class offset tables")?;
        }
        debug!(
            target: "layout",
            lookup_tables = self.header.lookup_tables_offset,
            class_offsets = self.header.class_offsets_offset,
            end = offset,
            "L2 tables"
        );
        Ok(offset)
    }

    /// L3: one dispatch descriptor per class.
    fn reserve_class_entries(&mut self, table: &MethodTable, offset: u32) -> Result<u32> {
        self.header.class_entries_offset = offset;
        let mut phase = DescriptorPhase {
            offset,
            compiled: 0,
            offsets: std::mem::take(&mut self.class_entries),
        };
        walk(table, &mut phase)?;
        self.class_entries = phase.offsets;
        debug!(target: "layout", classes = self.class_entries.len(), end = phase.offset, "L3 class entries");
        Ok(phase.offset)
    }

    /// L4: unique stackmap blobs, packed back to back.
    fn reserve_maps(&mut self, table: &MethodTable, offset: u32) -> Result<u32> {
        self.header.maps_offset = offset;
        let mut phase = StackmapPhase {
            store: &mut self.maps,
            next: offset,
            offsets: &mut self.stackmaps,
        };
        walk(table, &mut phase)?;
        let end = phase.next;
        self.header.maps_size = end - offset;
        debug!(
            target: "layout",
            unique = self.maps.len(),
            size = self.header.maps_size,
            "L4 maps"
        );
        align(end, 4, "maps region")
    }

    /// L5: every BSS slot and boot-image entry a patch refers to.
    fn collect_references(&mut self, table: &MethodTable) -> Result<()> {
        let mut phase = ReferencePhase {
            bss: &mut self.bss,
            rel_ro: &mut self.rel_ro,
        };
        walk(table, &mut phase)?;
        debug!(
            target: "layout",
            bss_slots = self.bss.slot_count(),
            rel_ro_entries = self.rel_ro.len(),
            "L5 references"
        );
        Ok(())
    }

    /// L6: container metadata records.
    ///
    /// Mapping sizes depend only on which kinds have slots, so placeholder
    /// mappings size the records now and the real ones replace them once the
    /// BSS offset is known.
    fn reserve_metadata(&mut self, sources: &SourceSet, offset: u32) -> Result<u32> {
        let va = VaLayout::compute(
            sources.iter().map(|(_, c)| (c.checksum(), c.size(), c.class_count())),
            0,
        )
        .ok_or_else(|| WriteError::overflow("verification artifact"))?;

        self.header.container_metadata_offset = offset;
        let mut offset = offset;
        for (((index, loaded), container), entry) in
            sources.iter().zip(&mut self.containers).zip(&va.entries)
        {
            container.record.va_offset = entry.offset;
            for kind in BssKind::ALL {
                if self.bss.has_slots(index, kind) {
                    container.record.bss_mappings[kind.index()] = Some(BssMapping {
                        kind,
                        slot_size: self.bss.slot_size(kind) as u8,
                        index_space: index_space(&loaded.container, kind),
                        first_offset: 0,
                        indices: Vec::new(),
                    });
                }
            }
            container.record_offset = offset;
            offset = offset
                .checked_add(container.record.encoded_size())
                .ok_or_else(|| WriteError::overflow("container metadata"))?;
        }
        debug!(
            target: "layout",
            records = self.containers.len(),
            start = self.header.container_metadata_offset,
            end = offset,
            "L6 container metadata"
        );
        Ok(offset)
    }

    /// L8: page-aligned code segment with trampolines and method code.
    fn reserve_code(
        &mut self,
        table: &MethodTable,
        config: &WriterConfig,
        offset: u32,
        patcher: &mut RelativePatcher,
    ) -> Result<u32> {
        let isa = config.isa();
        let mut offset = align(offset, config.page(), "code segment")?;
        self.header.executable_offset = offset;

        if config.trampolines_enabled() {
            for kind in TrampolineKind::ALL {
                offset = align(offset, isa.code_alignment(), "trampolines")?;
                self.header.trampoline_offsets[kind.index()] = offset + isa.entry_adjustment();
                self.trampolines.push((kind, offset));
                offset = advance(offset, trampoline_code(isa, kind)?.len(), "trampolines")?;
            }
            patcher.set_interpreter_bridge(
                self.header
                    .trampoline_offset(TrampolineKind::QuickToInterpreterBridge),
            );
        }

        for index in 0..table.compiled_count() {
            self.method_offsets.mark_compiled(table.compiled_method_ref(index));
        }

        let mut phase = CodePhase {
            isa,
            patcher,
            store: DedupStore::new("method code", config.dedup_limit()),
            stackmaps: &self.stackmaps,
            method_offsets: &mut self.method_offsets,
            code_offsets: &mut self.code_offsets,
            slots: &mut self.code,
            offset,
        };
        walk_ordered(table, &mut phase)?;
        let end = phase.offset;
        debug!(
            target: "layout",
            executable_offset = self.header.executable_offset,
            methods = table.compiled_count(),
            unique = self.code.len(),
            end,
            "L8 code"
        );
        Ok(end)
    }

    /// L9: thunks still owed after the last method.
    fn reserve_code_end(&mut self, offset: u32, patcher: &mut RelativePatcher) -> Result<u32> {
        self.end_reserve = offset;
        let end = patcher.reserve_space_end(offset, &self.method_offsets)?;
        self.header.code_size = end - self.header.executable_offset;
        debug!(
            target: "layout",
            code_size = self.header.code_size,
            thunks = patcher.thunk_count(),
            "L9 patcher reserve"
        );
        Ok(end)
    }

    /// L10: rel-ro after the code, then BSS past the end of the artifact.
    fn reserve_rel_ro(&mut self, config: &WriterConfig, code_end: u32) -> Result<()> {
        self.rel_ro.layout();
        let page = config.page();
        let (rel_ro_offset, rel_ro_size) = if self.rel_ro.is_empty() {
            (code_end, 0)
        } else {
            (align(code_end, page, "rel-ro segment")?, self.rel_ro.size()?)
        };
        let total_size = rel_ro_offset
            .checked_add(rel_ro_size)
            .ok_or_else(|| WriteError::overflow("artifact"))?;
        let bss_offset = align(total_size, page, "BSS")?;
        bss_offset
            .checked_add(self.bss.size())
            .ok_or_else(|| WriteError::overflow("BSS"))?;

        let header = &mut self.header;
        header.rel_ro_offset = rel_ro_offset;
        header.rel_ro_size = rel_ro_size;
        header.total_size = total_size;
        header.bss_offset = bss_offset;
        header.bss_size = self.bss.size();
        header.bss_methods_offset = bss_offset;
        header.bss_roots_offset = bss_offset + self.bss.methods_size();
        debug!(
            target: "layout",
            rel_ro_offset,
            rel_ro_size,
            total_size,
            bss_offset,
            "L10 rel-ro"
        );
        Ok(())
    }

    fn finalize_mappings(&mut self, sources: &SourceSet) {
        let bss_offset = self.header.bss_offset;
        for ((index, loaded), container) in sources.iter().zip(&mut self.containers) {
            for kind in BssKind::ALL {
                container.record.bss_mappings[kind.index()] = self.bss.mapping(
                    index,
                    kind,
                    index_space(&loaded.container, kind),
                    bss_offset,
                );
            }
        }
    }

    /// Absolute offset a pc-relative patch resolves to.
    pub(crate) fn pc_relative_target(&self, kind: &PatchKind) -> Result<u32> {
        match *kind {
            PatchKind::BssEntry { kind, target } => self
                .bss
                .slot_offset(kind, target, self.header.bss_offset)
                .ok_or_else(|| WriteError::invariant(format!("no BSS slot for {} {target:?}", kind.name()))),
            PatchKind::LiteralPcRelative {
                target: PcRelativeTarget::BootImage(offset),
            } => self
                .rel_ro
                .entry_offset(offset, self.header.rel_ro_offset)
                .ok_or_else(|| WriteError::invariant(format!("no rel-ro entry for {offset:#x}"))),
            PatchKind::LiteralPcRelative {
                target: PcRelativeTarget::Method(method),
            } => self.method_offsets.get(method).ok_or_else(|| {
                WriteError::input(format!("pc-relative reference to {method}, which has no code"))
            }),
            _ => Err(WriteError::invariant(format!("{kind:?} is not pc-relative"))),
        }
    }
}

struct DescriptorPhase {
    offset: u32,
    compiled: usize,
    offsets: Vec<u32>,
}

impl Phase for DescriptorPhase {
    fn start_class(&mut self, _class: &ClassEntry) -> Result<()> {
        self.compiled = 0;
        Ok(())
    }

    fn visit_method(&mut self, _method: &MethodEntry, compiled: Option<&CompiledMethod>) -> Result<()> {
        if compiled.is_some() {
            self.compiled += 1;
        }
        Ok(())
    }

    fn end_class(&mut self, class: &ClassEntry) -> Result<()> {
        self.offsets.push(self.offset);
        let size = ClassDescriptor::encoded_size(class.method_count(), self.compiled);
        self.offset = advance(self.offset, size, "class descriptors")?;
        Ok(())
    }
}

struct StackmapPhase<'a> {
    store: &'a mut DedupStore<u32>,
    next: u32,
    offsets: &'a mut [u32],
}

impl Phase for StackmapPhase<'_> {
    fn visit_method(&mut self, method: &MethodEntry, compiled: Option<&CompiledMethod>) -> Result<()> {
        let (Some(index), Some(compiled)) = (method.compiled, compiled) else {
            return Ok(());
        };
        if compiled.stackmap.is_empty() {
            return Ok(());
        }
        let next = self.next;
        let (offset, existed) = self.store.get_or_insert_with(&compiled.stackmap, || Ok(next))?;
        if !existed {
            self.next = advance(next, compiled.stackmap.len(), "maps region")?;
        }
        self.offsets[index] = offset;
        Ok(())
    }
}

struct ReferencePhase<'a> {
    bss: &'a mut BssTables,
    rel_ro: &'a mut RelRoTable,
}

impl Phase for ReferencePhase<'_> {
    fn visit_method(&mut self, _method: &MethodEntry, compiled: Option<&CompiledMethod>) -> Result<()> {
        for patch in compiled.iter().flat_map(|c| &c.patches) {
            match patch.kind {
                PatchKind::BssEntry { kind, target } => self.bss.record(kind, target),
                PatchKind::LiteralPcRelative {
                    target: PcRelativeTarget::BootImage(offset),
                } => self.rel_ro.record(offset),
                _ => {}
            }
        }
        Ok(())
    }
}

struct CodePhase<'a> {
    isa: InstructionSet,
    patcher: &'a mut RelativePatcher,
    /// Keyed by method header plus the full compiled record, so methods
    /// differing in frame layout or patches never share code.
    store: DedupStore<u32>,
    stackmaps: &'a [u32],
    method_offsets: &'a mut MethodOffsetMap,
    code_offsets: &'a mut [u32],
    slots: &'a mut Vec<CodeSlot>,
    offset: u32,
}

impl Phase for CodePhase<'_> {
    fn visit_method(&mut self, method: &MethodEntry, compiled: Option<&CompiledMethod>) -> Result<()> {
        let (Some(index), Some(compiled)) = (method.compiled, compiled) else {
            return Ok(());
        };
        let header = MethodHeader {
            stackmap_offset: self.stackmaps[index],
            frame_size: compiled.frame_size,
            core_spill_mask: compiled.core_spill_mask,
            fp_spill_mask: compiled.fp_spill_mask,
            code_size: compiled.code.len() as u32,
        };
        let mut key = header.to_bytes().to_vec();
        key.extend_from_slice(&compiled.encode());

        if let Some(code_offset) = self.store.get(&key) {
            self.method_offsets.insert(method.method, code_offset);
            self.code_offsets[index] = code_offset;
            return Ok(());
        }

        let reserve_at = self.offset;
        let after_thunks =
            self.patcher
                .reserve_space(reserve_at, compiled, method.method, self.method_offsets)?;
        let code_start = after_thunks
            .checked_add(METHOD_HEADER_SIZE)
            .and_then(|o| align_up(o, self.isa.code_alignment()))
            .ok_or_else(|| WriteError::overflow("code segment"))?;
        let code_offset = code_start + self.isa.entry_adjustment();
        self.offset = advance(code_start, compiled.code.len(), "code segment")?;

        self.store.get_or_insert_with(&key, || Ok(code_offset))?;
        self.method_offsets.insert(method.method, code_offset);
        self.code_offsets[index] = code_offset;
        self.slots.push(CodeSlot {
            compiled: index,
            reserve_at,
            header_offset: code_start - METHOD_HEADER_SIZE,
            header,
        });
        Ok(())
    }
}
