//! Relative patchers: per-ISA thunk reservation and code patching.
//!
//! The layout engine calls [`RelativePatcher::reserve_space`] before each new
//! method's header and [`RelativePatcher::reserve_space_end`] after the last
//! one; the patcher may place thunks at those points. The writer later calls
//! [`RelativePatcher::write_thunks`] at the same offsets and asks the patcher
//! to rewrite every call and pc-relative literal once final offsets are known.

mod arm;
pub(crate) mod encoding;
mod x86;

#[cfg(test)]
mod arm_tests;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;

use kiln_core::{InstructionSet, MethodRef};
use kiln_format::{CompiledMethod, LinkerPatch};

pub use arm::{ArmPatcher, BranchRange};
pub use x86::X86Patcher;

use crate::error::Result;

/// Identifies a thunk body. Thunks with equal keys are interchangeable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThunkKey {
    /// Jumps to the entrypoint of the runtime method object in the first
    /// argument register.
    MethodCall,
    /// Jumps through the thread's entrypoint table at this offset.
    Entrypoint(u32),
    /// Read barrier slow path selected by the patch's custom data.
    ReadBarrier(u32),
}

impl fmt::Display for ThunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodCall => f.write_str("MethodCallThunk"),
            Self::Entrypoint(offset) => write!(f, "EntrypointCallThunk_{offset:#x}"),
            Self::ReadBarrier(data) => write!(f, "ReadBarrierThunk_{data:#x}"),
        }
    }
}

/// Machine code of one thunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thunk {
    pub code: Vec<u8>,
    pub name: String,
}

/// Code offsets (entry adjustment included) of methods placed so far.
#[derive(Clone, Debug, Default)]
pub struct MethodOffsetMap {
    offsets: BTreeMap<MethodRef, u32>,
    compiled: BTreeSet<MethodRef>,
}

impl MethodOffsetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that `method` has code, whether or not it is placed yet.
    pub fn mark_compiled(&mut self, method: MethodRef) {
        self.compiled.insert(method);
    }

    pub fn insert(&mut self, method: MethodRef, code_offset: u32) {
        self.compiled.insert(method);
        self.offsets.insert(method, code_offset);
    }

    pub fn get(&self, method: MethodRef) -> Option<u32> {
        self.offsets.get(&method).copied()
    }

    pub fn is_compiled(&self, method: MethodRef) -> bool {
        self.compiled.contains(&method)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Per-ISA patcher, chosen when the builder is created.
#[derive(Clone, Debug)]
pub enum RelativePatcher {
    Arm(ArmPatcher),
    X86(X86Patcher),
}

impl RelativePatcher {
    pub fn for_isa(isa: InstructionSet) -> Self {
        match isa {
            InstructionSet::Arm64 | InstructionSet::Thumb2 => Self::Arm(ArmPatcher::new(isa)),
            InstructionSet::X86_64 => Self::X86(X86Patcher::new()),
        }
    }

    pub fn isa(&self) -> InstructionSet {
        match self {
            Self::Arm(p) => p.isa(),
            Self::X86(_) => InstructionSet::X86_64,
        }
    }

    /// Route calls to methods without compiled code through the trampoline
    /// at `code_offset`. Arm reaches such callees through its method-call
    /// thunk instead.
    pub fn set_interpreter_bridge(&mut self, code_offset: u32) {
        match self {
            Self::Arm(_) => {}
            Self::X86(p) => p.set_interpreter_bridge(code_offset),
        }
    }

    /// Reserve thunks needed before the method that would start at `offset`.
    ///
    /// Returns the offset after those thunks; the caller then aligns and
    /// reserves the method header and code.
    pub fn reserve_space(
        &mut self,
        offset: u32,
        compiled: &CompiledMethod,
        method: MethodRef,
        offsets: &MethodOffsetMap,
    ) -> Result<u32> {
        match self {
            Self::Arm(p) => p.reserve_space(offset, compiled, method, offsets),
            Self::X86(p) => p.reserve_space(offset, compiled, method, offsets),
        }
    }

    /// Reserve thunks still owed after the last method.
    pub fn reserve_space_end(&mut self, offset: u32, offsets: &MethodOffsetMap) -> Result<u32> {
        match self {
            Self::Arm(p) => p.reserve_space_end(offset, offsets),
            Self::X86(p) => p.reserve_space_end(offset, offsets),
        }
    }

    /// Write the thunks reserved at `offset`, returning the offset after them.
    pub fn write_thunks<W: Write>(&self, out: &mut W, offset: u32) -> Result<u32> {
        match self {
            Self::Arm(p) => p.write_thunks(out, offset),
            Self::X86(p) => p.write_thunks(out, offset),
        }
    }

    /// Rewrite the call at `literal_offset`. `target_offset` is `None` when
    /// the callee has no compiled code.
    pub fn patch_call(
        &self,
        code: &mut [u8],
        literal_offset: u32,
        patch_offset: u32,
        target_offset: Option<u32>,
    ) -> Result<()> {
        match self {
            Self::Arm(p) => p.patch_call(code, literal_offset, patch_offset, target_offset),
            Self::X86(p) => p.patch_call(code, literal_offset, patch_offset, target_offset),
        }
    }

    pub fn patch_pc_relative(
        &self,
        code: &mut [u8],
        patch: &LinkerPatch,
        patch_offset: u32,
        target_offset: u32,
    ) -> Result<()> {
        match self {
            Self::Arm(p) => p.patch_pc_relative(code, patch, patch_offset, target_offset),
            Self::X86(p) => p.patch_pc_relative(code, patch, patch_offset, target_offset),
        }
    }

    pub fn patch_entrypoint_call(
        &self,
        code: &mut [u8],
        patch: &LinkerPatch,
        patch_offset: u32,
    ) -> Result<()> {
        match self {
            Self::Arm(p) => p.patch_entrypoint_call(code, patch, patch_offset),
            Self::X86(p) => p.patch_entrypoint_call(code, patch, patch_offset),
        }
    }

    pub fn patch_read_barrier_branch(
        &self,
        code: &mut [u8],
        patch: &LinkerPatch,
        patch_offset: u32,
    ) -> Result<()> {
        match self {
            Self::Arm(p) => p.patch_read_barrier_branch(code, patch, patch_offset),
            Self::X86(p) => p.patch_read_barrier_branch(code, patch, patch_offset),
        }
    }

    /// Code and debug name of a thunk.
    pub fn thunk(&self, key: ThunkKey) -> Result<Thunk> {
        match self {
            Self::Arm(p) => p.thunk(key),
            Self::X86(p) => p.thunk(key),
        }
    }

    /// Number of thunks reserved so far.
    pub fn thunk_count(&self) -> usize {
        match self {
            Self::Arm(p) => p.thunk_count(),
            Self::X86(_) => 0,
        }
    }

    /// Every reserved thunk as `(offset, key)`, in offset order.
    pub fn thunk_offsets(&self) -> Vec<(u32, ThunkKey)> {
        match self {
            Self::Arm(p) => p.thunk_offsets(),
            Self::X86(_) => Vec::new(),
        }
    }
}
