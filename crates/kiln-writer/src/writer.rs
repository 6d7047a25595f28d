//! Section emission at the offsets fixed by the layout.
//!
//! Every byte after the key/value store goes through one [`SectionWriter`],
//! which feeds the checksum and zero-fills the gaps the layout left. Each
//! section start is checked against the real stream position.

use std::borrow::Cow;
use std::io::{Seek, Write};

use crc32fast::Hasher;
use kiln_core::InstructionSet;
use kiln_format::{ClassDescriptor, CompiledMethod, PatchKind, TypeLookupTable};

use crate::checksum::ChecksumWriter;
use crate::error::{Result, WriteError};
use crate::layout::Layout;
use crate::patcher::RelativePatcher;
use crate::source::SourceSet;
use crate::trampolines::trampoline_code;
use crate::visitor::MethodTable;

pub(crate) struct SectionWriter<'a, W: Write + Seek> {
    out: ChecksumWriter<'a, W>,
    /// Stream position of artifact offset 0.
    base: u64,
    /// Artifact offset of the next byte.
    pos: u32,
}

fn mismatch(section: &str, expected: u32, actual: u64) -> WriteError {
    let err = WriteError::invariant(format!(
        "{section}: reserved at {expected:#x}, write position is {actual:#x}"
    ));
    if cfg!(debug_assertions) {
        panic!("{err}");
    }
    err
}

impl<'a, W: Write + Seek> SectionWriter<'a, W> {
    pub(crate) fn new(out: &'a mut W, hasher: &'a mut Hasher, base: u64, pos: u32) -> Self {
        Self {
            out: ChecksumWriter::new(out, hasher),
            base,
            pos,
        }
    }

    pub(crate) fn position(&self) -> u32 {
        self.pos
    }

    /// Zero-fill up to `offset` and check that the stream is there.
    pub(crate) fn begin(&mut self, section: &str, offset: u32) -> Result<()> {
        self.pad_to(section, offset)?;
        self.check(section, offset)
    }

    /// Check that both the tracked and the real position equal `offset`.
    pub(crate) fn check(&mut self, section: &str, offset: u32) -> Result<()> {
        if self.pos != offset {
            return Err(mismatch(section, offset, self.pos as u64));
        }
        let actual = self.out.stream_position()?.saturating_sub(self.base);
        if actual != offset as u64 {
            return Err(mismatch(section, offset, actual));
        }
        Ok(())
    }

    pub(crate) fn pad_to(&mut self, section: &str, offset: u32) -> Result<()> {
        if offset < self.pos {
            return Err(mismatch(section, offset, self.pos as u64));
        }
        self.out.zero_fill(offset - self.pos)?;
        self.pos = offset;
        Ok(())
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.pos = u32::try_from(bytes.len())
            .ok()
            .and_then(|len| self.pos.checked_add(len))
            .ok_or_else(|| WriteError::overflow("artifact"))?;
        Ok(())
    }

    /// Emit the thunks the patcher reserved at `offset`.
    pub(crate) fn thunks(&mut self, patcher: &RelativePatcher, offset: u32) -> Result<()> {
        self.pad_to("thunks", offset)?;
        let before = self.out.written();
        let end = patcher.write_thunks(&mut self.out, offset)?;
        let written = self.out.written() - before;
        if offset as u64 + written != end as u64 {
            return Err(mismatch("thunks", end, offset as u64 + written));
        }
        self.pos = end;
        Ok(())
    }
}

/// Lookup tables, class-offset tables, class descriptors, stackmaps and
/// container records.
pub(crate) fn write_ro_data<W: Write + Seek>(
    w: &mut SectionWriter<'_, W>,
    layout: &Layout,
    table: &MethodTable,
    sources: &SourceSet,
) -> Result<()> {
    let mut buf = Vec::new();

    w.begin("lookup tables", layout.header.lookup_tables_offset)?;
    for ((_, loaded), container) in sources.iter().zip(&layout.containers) {
        w.begin("lookup table", container.lookup_table_offset)?;
        buf.clear();
        TypeLookupTable::build(loaded.container.class_descriptors()).encode(&mut buf);
        w.write(&buf)?;
    }

    w.begin("class offset tables", layout.header.class_offsets_offset)?;
    for ((index, _), container) in sources.iter().zip(&layout.containers) {
        w.begin("class offset table", container.class_offsets_offset)?;
        buf.clear();
        let offsets = table
            .classes
            .iter()
            .zip(&layout.class_entries)
            .filter(|(class, _)| class.container == index);
        for (_, offset) in offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        w.write(&buf)?;
    }

    w.begin("class entries", layout.header.class_entries_offset)?;
    for (class, &offset) in table.classes.iter().zip(&layout.class_entries) {
        w.pad_to("class entry", offset)?;
        let code_offsets = table.methods[class.methods.clone()]
            .iter()
            .map(|m| m.compiled.map(|i| layout.code_offsets[i]))
            .collect();
        buf.clear();
        ClassDescriptor::new(class.status, code_offsets).encode(&mut buf);
        w.write(&buf)?;
    }

    w.begin("maps", layout.header.maps_offset)?;
    for (blob, offset) in layout.maps.values() {
        w.pad_to("stackmap", offset)?;
        w.write(blob)?;
    }

    w.begin("container metadata", layout.header.container_metadata_offset)?;
    for container in &layout.containers {
        w.pad_to("container record", container.record_offset)?;
        buf.clear();
        container.record.encode(container.record_offset, &mut buf);
        w.write(&buf)?;
    }
    Ok(())
}

/// Trampolines, thunks and every unique method header and code block.
pub(crate) fn write_code<W: Write + Seek>(
    w: &mut SectionWriter<'_, W>,
    layout: &Layout,
    table: &MethodTable,
    patcher: &RelativePatcher,
    isa: InstructionSet,
) -> Result<()> {
    w.begin("code", layout.header.executable_offset)?;
    for &(kind, offset) in &layout.trampolines {
        w.pad_to("trampoline", offset)?;
        w.write(&trampoline_code(isa, kind)?)?;
    }

    for slot in &layout.code {
        w.thunks(patcher, slot.reserve_at)?;
        w.pad_to("method header", slot.header_offset)?;
        w.write(&slot.header.to_bytes())?;
        let compiled = &table.compiled[slot.compiled];
        w.write(&patched_code(layout, patcher, compiled, slot.code_start())?)?;
    }

    w.thunks(patcher, layout.end_reserve)?;
    w.check("code end", layout.header.executable_offset + layout.header.code_size)
}

/// A copy of the method's code with every patch applied.
fn patched_code<'c>(
    layout: &Layout,
    patcher: &RelativePatcher,
    compiled: &'c CompiledMethod,
    code_start: u32,
) -> Result<Cow<'c, [u8]>> {
    if compiled.patches.is_empty() {
        return Ok(Cow::Borrowed(&compiled.code));
    }
    let mut code = compiled.code.clone();
    for patch in &compiled.patches {
        let patch_offset = code_start + patch.literal_offset;
        match patch.kind {
            PatchKind::CallRelative { target } => patcher.patch_call(
                &mut code,
                patch.literal_offset,
                patch_offset,
                layout.method_offsets.get(target),
            )?,
            PatchKind::EntrypointCall { .. } => {
                patcher.patch_entrypoint_call(&mut code, patch, patch_offset)?
            }
            PatchKind::ReadBarrierBranch { .. } => {
                patcher.patch_read_barrier_branch(&mut code, patch, patch_offset)?
            }
            PatchKind::BssEntry { .. } | PatchKind::LiteralPcRelative { .. } => {
                let target = layout.pc_relative_target(&patch.kind)?;
                patcher.patch_pc_relative(&mut code, patch, patch_offset, target)?
            }
        }
    }
    Ok(Cow::Owned(code))
}

/// The rel-ro segment: one boot-image offset per entry.
pub(crate) fn write_rel_ro<W: Write + Seek>(w: &mut SectionWriter<'_, W>, layout: &Layout) -> Result<()> {
    if !layout.rel_ro.is_empty() {
        w.begin("rel-ro", layout.header.rel_ro_offset)?;
        for target in layout.rel_ro.targets() {
            w.write(&target.to_le_bytes())?;
        }
    }
    w.check("artifact end", layout.header.total_size)
}
