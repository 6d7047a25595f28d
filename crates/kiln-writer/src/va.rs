//! Verification artifact writer.
//!
//! The verification artifact carries the input containers byte for byte,
//! the verifier dependency blob and one type lookup table per container.
//! Its layout is computed the same way as the container offsets recorded in
//! the executable artifact, so the two always agree.

use std::io::Write;

use kiln_format::{TypeLookupTable, VaLayout};
use tracing::debug;

use crate::error::{Result, WriteError};
use crate::source::SourceSet;

/// Writes the verification artifact for a builder's containers.
pub struct VaWriter<'a> {
    sources: &'a SourceSet,
}

impl<'a> VaWriter<'a> {
    pub(crate) fn new(sources: &'a SourceSet) -> Self {
        Self { sources }
    }

    /// Section placement for a verifier dependency blob of the given size.
    pub fn layout(&self, verifier_deps_size: u32) -> Result<VaLayout> {
        VaLayout::compute(
            self.sources
                .iter()
                .map(|(_, c)| (c.checksum(), c.size(), c.class_count())),
            verifier_deps_size,
        )
        .ok_or_else(|| WriteError::overflow("verification artifact"))
    }

    pub fn write<W: Write>(&self, out: &mut W, verifier_deps: &[u8]) -> Result<VaLayout> {
        let deps_size = u32::try_from(verifier_deps.len())
            .map_err(|_| WriteError::overflow("verifier dependencies"))?;
        let layout = self.layout(deps_size)?;

        let mut buf = Vec::new();
        layout.encode_header(&mut buf);
        for ((_, loaded), entry) in self.sources.iter().zip(&layout.entries) {
            buf.resize(entry.offset as usize, 0);
            buf.extend_from_slice(loaded.bytes());
        }
        buf.extend_from_slice(verifier_deps);
        for ((_, loaded), entry) in self.sources.iter().zip(&layout.entries) {
            buf.resize(entry.lookup_offset as usize, 0);
            TypeLookupTable::build(loaded.container.class_descriptors()).encode(&mut buf);
        }
        if buf.len() != layout.total_size as usize {
            return Err(WriteError::invariant(format!(
                "verification artifact is {} bytes, laid out as {}",
                buf.len(),
                layout.total_size
            )));
        }

        out.write_all(&buf)?;
        debug!(
            containers = layout.entries.len(),
            verifier_deps = deps_size,
            total_size = layout.total_size,
            "wrote verification artifact"
        );
        Ok(layout)
    }
}
