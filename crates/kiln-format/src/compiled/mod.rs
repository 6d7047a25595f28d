//! Compiled-method records handed over by the machine-code compiler.
//!
//! Record layout:
//! `[u32 code_len][code][u32 map_len][stackmap][u32 frame_size]
//! [u32 core_spill_mask][u32 fp_spill_mask][u32 patch_count]`
//! followed by `patch_count` patches of `[u8 tag][3 × 0][u32 literal_offset]
//! [u32 a][u32 b]`.

#[cfg(test)]
mod compiled_tests;

use kiln_core::{ContainerIndex, MethodRef, SymbolRef};

use crate::artifact::BssKind;
use crate::bytes::{Cursor, put_u32};

/// Encoded size of one linker patch.
pub const PATCH_SIZE: usize = 16;

/// Record decode error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("truncated compiled-method record: missing {0}")]
    Truncated(&'static str),
    #[error("unknown patch kind tag {0}")]
    UnknownPatchTag(u8),
    #[error("patch at literal offset {literal_offset} overruns {code_size}-byte code")]
    PatchOutOfRange { literal_offset: u32, code_size: u32 },
    #[error("{0} trailing bytes after compiled-method record")]
    TrailingBytes(usize),
}

/// Target of a pc-relative literal load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PcRelativeTarget {
    /// Code of another method in this build.
    Method(MethodRef),
    /// Object in the boot image; resolved through a rel-ro entry.
    BootImage(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PatchKind {
    CallRelative { target: MethodRef },
    EntrypointCall { entrypoint_offset: u32 },
    BssEntry { kind: BssKind, target: SymbolRef },
    LiteralPcRelative { target: PcRelativeTarget },
    ReadBarrierBranch { custom_data: u32 },
}

impl PatchKind {
    fn tag(&self) -> u8 {
        match self {
            Self::CallRelative { .. } => 0,
            Self::EntrypointCall { .. } => 1,
            Self::BssEntry { kind, .. } => 2 + kind.to_u8(),
            Self::LiteralPcRelative {
                target: PcRelativeTarget::Method(_),
            } => 8,
            Self::ReadBarrierBranch { .. } => 9,
            Self::LiteralPcRelative {
                target: PcRelativeTarget::BootImage(_),
            } => 10,
        }
    }

    fn operands(&self) -> (u32, u32) {
        match *self {
            Self::CallRelative { target }
            | Self::LiteralPcRelative {
                target: PcRelativeTarget::Method(target),
            } => (target.container.get(), target.method_index),
            Self::EntrypointCall { entrypoint_offset } => (entrypoint_offset, 0),
            Self::BssEntry { target, .. } => (target.container.get(), target.index),
            Self::LiteralPcRelative {
                target: PcRelativeTarget::BootImage(offset),
            } => (offset, 0),
            Self::ReadBarrierBranch { custom_data } => (custom_data, 0),
        }
    }

    fn from_parts(tag: u8, a: u32, b: u32) -> Option<Self> {
        let method = || MethodRef::new(ContainerIndex(a), b);
        Some(match tag {
            0 => Self::CallRelative { target: method() },
            1 => Self::EntrypointCall {
                entrypoint_offset: a,
            },
            2..=7 => Self::BssEntry {
                kind: BssKind::from_u8(tag - 2)?,
                target: SymbolRef::new(ContainerIndex(a), b),
            },
            8 => Self::LiteralPcRelative {
                target: PcRelativeTarget::Method(method()),
            },
            9 => Self::ReadBarrierBranch { custom_data: a },
            10 => Self::LiteralPcRelative {
                target: PcRelativeTarget::BootImage(a),
            },
            _ => return None,
        })
    }
}

/// A location in a method's code the linker must rewrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkerPatch {
    /// Offset of the patched instruction from the start of the method's code.
    pub literal_offset: u32,
    pub kind: PatchKind,
}

impl LinkerPatch {
    pub fn call(literal_offset: u32, target: MethodRef) -> Self {
        Self {
            literal_offset,
            kind: PatchKind::CallRelative { target },
        }
    }

    pub fn entrypoint_call(literal_offset: u32, entrypoint_offset: u32) -> Self {
        Self {
            literal_offset,
            kind: PatchKind::EntrypointCall { entrypoint_offset },
        }
    }

    pub fn bss_entry(literal_offset: u32, kind: BssKind, target: SymbolRef) -> Self {
        Self {
            literal_offset,
            kind: PatchKind::BssEntry { kind, target },
        }
    }

    pub fn method_pc_relative(literal_offset: u32, target: MethodRef) -> Self {
        Self {
            literal_offset,
            kind: PatchKind::LiteralPcRelative {
                target: PcRelativeTarget::Method(target),
            },
        }
    }

    pub fn boot_image_rel_ro(literal_offset: u32, boot_image_offset: u32) -> Self {
        Self {
            literal_offset,
            kind: PatchKind::LiteralPcRelative {
                target: PcRelativeTarget::BootImage(boot_image_offset),
            },
        }
    }

    pub fn read_barrier_branch(literal_offset: u32, custom_data: u32) -> Self {
        Self {
            literal_offset,
            kind: PatchKind::ReadBarrierBranch { custom_data },
        }
    }
}

/// Output of the compiler for one method. Empty `code` means the method is
/// left to the interpreter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CompiledMethod {
    pub code: Vec<u8>,
    pub stackmap: Vec<u8>,
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    pub patches: Vec<LinkerPatch>,
}

impl CompiledMethod {
    pub fn new(code: impl Into<Vec<u8>>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_stackmap(mut self, stackmap: impl Into<Vec<u8>>) -> Self {
        self.stackmap = stackmap.into();
        self
    }

    pub fn with_frame(mut self, frame_size: u32, core_spill_mask: u32, fp_spill_mask: u32) -> Self {
        self.frame_size = frame_size;
        self.core_spill_mask = core_spill_mask;
        self.fp_spill_mask = fp_spill_mask;
        self
    }

    pub fn with_patch(mut self, patch: LinkerPatch) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn is_compiled(&self) -> bool {
        !self.code.is_empty()
    }

    /// Check that every patch's 4-byte literal lies inside the code.
    pub fn validate(&self) -> Result<(), RecordError> {
        let code_size = self.code.len() as u32;
        for patch in &self.patches {
            if patch.literal_offset.checked_add(4).is_none_or(|end| end > code_size) {
                return Err(RecordError::PatchOutOfRange {
                    literal_offset: patch.literal_offset,
                    code_size,
                });
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            24 + self.code.len() + self.stackmap.len() + self.patches.len() * PATCH_SIZE,
        );
        put_u32(&mut out, self.code.len() as u32);
        out.extend_from_slice(&self.code);
        put_u32(&mut out, self.stackmap.len() as u32);
        out.extend_from_slice(&self.stackmap);
        put_u32(&mut out, self.frame_size);
        put_u32(&mut out, self.core_spill_mask);
        put_u32(&mut out, self.fp_spill_mask);
        put_u32(&mut out, self.patches.len() as u32);
        for patch in &self.patches {
            let (a, b) = patch.kind.operands();
            out.extend_from_slice(&[patch.kind.tag(), 0, 0, 0]);
            put_u32(&mut out, patch.literal_offset);
            put_u32(&mut out, a);
            put_u32(&mut out, b);
        }
        out
    }

    /// Decode a record, rejecting truncation, unknown tags, trailing bytes
    /// and patches outside the code.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut cur = Cursor::new(bytes);
        let code_len = cur.u32().ok_or(RecordError::Truncated("code length"))?;
        let code = cur
            .take(code_len as usize)
            .ok_or(RecordError::Truncated("code"))?
            .to_vec();
        let map_len = cur.u32().ok_or(RecordError::Truncated("stackmap length"))?;
        let stackmap = cur
            .take(map_len as usize)
            .ok_or(RecordError::Truncated("stackmap"))?
            .to_vec();
        let frame_size = cur.u32().ok_or(RecordError::Truncated("frame size"))?;
        let core_spill_mask = cur.u32().ok_or(RecordError::Truncated("core spill mask"))?;
        let fp_spill_mask = cur.u32().ok_or(RecordError::Truncated("fp spill mask"))?;
        let patch_count = cur.u32().ok_or(RecordError::Truncated("patch count"))?;

        let mut patches = Vec::new();
        for _ in 0..patch_count {
            let raw = cur.take(PATCH_SIZE).ok_or(RecordError::Truncated("patch"))?;
            let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
            let tag = raw[0];
            let kind =
                PatchKind::from_parts(tag, word(8), word(12)).ok_or(RecordError::UnknownPatchTag(tag))?;
            patches.push(LinkerPatch {
                literal_offset: word(4),
                kind,
            });
        }

        let trailing = bytes.len() - cur.pos();
        if trailing != 0 {
            return Err(RecordError::TrailingBytes(trailing));
        }

        let method = Self {
            code,
            stackmap,
            frame_size,
            core_spill_mask,
            fp_spill_mask,
            patches,
        };
        method.validate()?;
        Ok(method)
    }
}
