//! Method header placed immediately before each method's machine code.

use crate::bytes::read_u32_le;

/// Size of the encoded method header.
pub const METHOD_HEADER_SIZE: u32 = 20;

/// Frame and metadata information the runtime reads at `code - 20`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MethodHeader {
    /// Artifact offset of the stackmap blob, 0 when the method has none.
    pub stackmap_offset: u32,
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    pub code_size: u32,
}

impl MethodHeader {
    pub fn to_bytes(&self) -> [u8; METHOD_HEADER_SIZE as usize] {
        let mut bytes = [0u8; METHOD_HEADER_SIZE as usize];
        let fields = [
            self.stackmap_offset,
            self.frame_size,
            self.core_spill_mask,
            self.fp_spill_mask,
            self.code_size,
        ];
        for (i, value) in fields.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            stackmap_offset: read_u32_le(bytes, 0)?,
            frame_size: read_u32_le(bytes, 4)?,
            core_spill_mask: read_u32_le(bytes, 8)?,
            fp_spill_mask: read_u32_le(bytes, 12)?,
            code_size: read_u32_le(bytes, 16)?,
        })
    }
}
