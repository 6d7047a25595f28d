//! x86-64 patcher: every call and pc-relative reference is a rel32 field.
//!
//! rel32 reaches the whole 32-bit artifact, so no thunks are ever placed.
//! A call to a method without compiled code goes to the interpreter bridge
//! trampoline, so such calls need the trampolines to be emitted.

use std::io::Write;

use kiln_core::MethodRef;
use kiln_format::{CompiledMethod, LinkerPatch, PatchKind};

use super::encoding::write_u32;
use super::{MethodOffsetMap, Thunk, ThunkKey};
use crate::error::{Result, WriteError};

#[derive(Clone, Debug, Default)]
pub struct X86Patcher {
    /// Code offset of the interpreter bridge trampoline, when emitted.
    interpreter_bridge: Option<u32>,
}

impl X86Patcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_interpreter_bridge(&mut self, code_offset: u32) {
        self.interpreter_bridge = Some(code_offset);
    }

    /// Reserves nothing, but rejects calls that could never be patched.
    pub fn reserve_space(
        &mut self,
        offset: u32,
        compiled: &CompiledMethod,
        method: MethodRef,
        offsets: &MethodOffsetMap,
    ) -> Result<u32> {
        if self.interpreter_bridge.is_some() {
            return Ok(offset);
        }
        for patch in &compiled.patches {
            match patch.kind {
                PatchKind::CallRelative { target } if !offsets.is_compiled(target) => {
                    return Err(WriteError::input(format!(
                        "call at +{:#x} in {method} targets {target}, which has no compiled code \
                         and no interpreter bridge was emitted",
                        patch.literal_offset
                    )));
                }
                _ => {}
            }
        }
        Ok(offset)
    }

    pub fn reserve_space_end(&mut self, offset: u32, _offsets: &MethodOffsetMap) -> Result<u32> {
        Ok(offset)
    }

    pub fn write_thunks<W: Write>(&self, _out: &mut W, offset: u32) -> Result<u32> {
        Ok(offset)
    }

    /// The displacement is relative to the end of the 4-byte field.
    fn write_rel32(code: &mut [u8], literal_offset: u32, patch_offset: u32, target: u32) -> Result<()> {
        let disp = target as i64 - (patch_offset as i64 + 4);
        let disp = i32::try_from(disp)
            .map_err(|_| WriteError::patcher(format!("rel32 displacement {disp} out of range")))?;
        write_u32(code, literal_offset, disp as u32)
    }

    pub fn patch_call(
        &self,
        code: &mut [u8],
        literal_offset: u32,
        patch_offset: u32,
        target_offset: Option<u32>,
    ) -> Result<()> {
        let target = target_offset.or(self.interpreter_bridge).ok_or_else(|| {
            WriteError::invariant(format!(
                "call at {patch_offset:#x} has neither a compiled target nor an interpreter bridge"
            ))
        })?;
        Self::write_rel32(code, literal_offset, patch_offset, target)
    }

    pub fn patch_pc_relative(
        &self,
        code: &mut [u8],
        patch: &LinkerPatch,
        patch_offset: u32,
        target_offset: u32,
    ) -> Result<()> {
        Self::write_rel32(code, patch.literal_offset, patch_offset, target_offset)
    }

    pub fn patch_entrypoint_call(&self, _code: &mut [u8], patch: &LinkerPatch, _patch_offset: u32) -> Result<()> {
        Err(WriteError::patcher(format!("x86-64 does not support {:?}", patch.kind)))
    }

    pub fn patch_read_barrier_branch(
        &self,
        _code: &mut [u8],
        patch: &LinkerPatch,
        _patch_offset: u32,
    ) -> Result<()> {
        Err(WriteError::patcher(format!("x86-64 does not support {:?}", patch.kind)))
    }

    pub fn thunk(&self, key: ThunkKey) -> Result<Thunk> {
        Err(WriteError::patcher(format!("x86-64 has no {key}")))
    }
}
