//! Verification artifact: the input containers, the verifier dependency blob
//! and a descriptor lookup table per container.
//!
//! ```text
//! 0   magic b"kva\n", version b"001\0"
//! 8   container_count, verifier_deps_offset, verifier_deps_size
//! 20  per container: checksum, offset, size, lookup_offset, lookup_size
//!     containers (each 4-aligned) · verifier deps · lookup tables (4-aligned)
//! ```

use crate::artifact::TypeLookupTable;
use crate::bytes::{Cursor, put_u32};

pub const VA_MAGIC: [u8; 4] = *b"kva\n";
pub const VA_VERSION: [u8; 4] = *b"001\0";
pub const VA_HEADER_SIZE: u32 = 20;
pub const VA_ENTRY_SIZE: u32 = 20;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VaError {
    #[error("invalid verification artifact magic")]
    InvalidMagic,
    #[error("unsupported verification artifact version")]
    UnsupportedVersion,
    #[error("truncated verification artifact: {what} at offset {offset}")]
    Truncated { what: &'static str, offset: u32 },
}

/// Placement of one container inside the verification artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VaContainerEntry {
    pub checksum: u32,
    pub offset: u32,
    pub size: u32,
    pub lookup_offset: u32,
    pub lookup_size: u32,
}

/// Deterministic placement of every section of a verification artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaLayout {
    pub entries: Vec<VaContainerEntry>,
    pub verifier_deps_offset: u32,
    pub verifier_deps_size: u32,
    pub total_size: u32,
}

impl VaLayout {
    /// Lay out containers given as `(checksum, size, class_count)`.
    ///
    /// Returns `None` when the artifact would not fit in 32-bit offsets.
    pub fn compute(
        containers: impl IntoIterator<Item = (u32, u32, usize)>,
        verifier_deps_size: u32,
    ) -> Option<Self> {
        let containers: Vec<_> = containers.into_iter().collect();
        let mut offset = VA_HEADER_SIZE.checked_add(VA_ENTRY_SIZE.checked_mul(containers.len() as u32)?)?;

        let mut entries = Vec::with_capacity(containers.len());
        for &(checksum, size, class_count) in &containers {
            offset = align4(offset)?;
            entries.push(VaContainerEntry {
                checksum,
                offset,
                size,
                lookup_offset: 0,
                lookup_size: u32::try_from(TypeLookupTable::encoded_size(class_count)).ok()?,
            });
            offset = offset.checked_add(size)?;
        }

        let verifier_deps_offset = offset;
        offset = offset.checked_add(verifier_deps_size)?;
        for entry in &mut entries {
            offset = align4(offset)?;
            entry.lookup_offset = offset;
            offset = offset.checked_add(entry.lookup_size)?;
        }

        Some(Self {
            entries,
            verifier_deps_offset,
            verifier_deps_size,
            total_size: offset,
        })
    }

    /// Encode the fixed header and container entries.
    pub fn encode_header(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&VA_MAGIC);
        out.extend_from_slice(&VA_VERSION);
        put_u32(out, self.entries.len() as u32);
        put_u32(out, self.verifier_deps_offset);
        put_u32(out, self.verifier_deps_size);
        for e in &self.entries {
            put_u32(out, e.checksum);
            put_u32(out, e.offset);
            put_u32(out, e.size);
            put_u32(out, e.lookup_offset);
            put_u32(out, e.lookup_size);
        }
    }
}

fn align4(value: u32) -> Option<u32> {
    value.checked_add(3).map(|v| v & !3)
}

/// A parsed verification artifact borrowing its bytes.
#[derive(Clone, Debug)]
pub struct VaFile<'a> {
    bytes: &'a [u8],
    entries: Vec<VaContainerEntry>,
    verifier_deps_offset: u32,
    verifier_deps_size: u32,
}

impl<'a> VaFile<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, VaError> {
        let truncated = |what, offset| VaError::Truncated { what, offset };
        let mut cur = Cursor::new(bytes);
        let magic = cur.take(4).ok_or(truncated("magic", 0))?;
        if magic != VA_MAGIC {
            return Err(VaError::InvalidMagic);
        }
        let version = cur.take(4).ok_or(truncated("version", 4))?;
        if version != VA_VERSION {
            return Err(VaError::UnsupportedVersion);
        }
        let count = cur.u32().ok_or(truncated("header", 8))?;
        let verifier_deps_offset = cur.u32().ok_or(truncated("header", 12))?;
        let verifier_deps_size = cur.u32().ok_or(truncated("header", 16))?;

        let mut entries = Vec::new();
        for _ in 0..count {
            let at = cur.pos() as u32;
            let entry = (|| {
                Some(VaContainerEntry {
                    checksum: cur.u32()?,
                    offset: cur.u32()?,
                    size: cur.u32()?,
                    lookup_offset: cur.u32()?,
                    lookup_size: cur.u32()?,
                })
            })()
            .ok_or(truncated("container entry", at))?;

            if slice(bytes, entry.offset, entry.size).is_none() {
                return Err(truncated("container", entry.offset));
            }
            if slice(bytes, entry.lookup_offset, entry.lookup_size).is_none() {
                return Err(truncated("lookup table", entry.lookup_offset));
            }
            entries.push(entry);
        }
        if slice(bytes, verifier_deps_offset, verifier_deps_size).is_none() {
            return Err(truncated("verifier deps", verifier_deps_offset));
        }

        Ok(Self {
            bytes,
            entries,
            verifier_deps_offset,
            verifier_deps_size,
        })
    }

    pub fn container_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[VaContainerEntry] {
        &self.entries
    }

    /// Bytes of container `index`, exactly as they were given to the writer.
    pub fn container_bytes(&self, index: usize) -> Option<&'a [u8]> {
        let e = self.entries.get(index)?;
        slice(self.bytes, e.offset, e.size)
    }

    pub fn verifier_deps(&self) -> &'a [u8] {
        slice(self.bytes, self.verifier_deps_offset, self.verifier_deps_size).unwrap_or_default()
    }

    pub fn lookup_table(&self, index: usize) -> Option<TypeLookupTable> {
        let e = self.entries.get(index)?;
        let table = slice(self.bytes, e.lookup_offset, e.lookup_size)?;
        TypeLookupTable::decode(table, e.lookup_size as usize / 8)
    }
}

fn slice(bytes: &[u8], offset: u32, len: u32) -> Option<&[u8]> {
    let start = offset as usize;
    bytes.get(start..start.checked_add(len as usize)?)
}
