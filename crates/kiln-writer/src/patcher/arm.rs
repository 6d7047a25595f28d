//! Arm64 and Thumb2 patcher.
//!
//! Calls that cannot reach their destination directly go through a thunk.
//! Each call that still needs a thunk, or whose callee is not placed yet,
//! carries a deadline: the last offset a thunk may start at and still be in
//! range. Before every method the patcher checks whether placing the method
//! would push the next possible thunk position past the earliest deadline;
//! if so, it places all owed thunks (an island) in front of the method.

use std::collections::BTreeMap;
use std::io::Write;

use kiln_core::{InstructionSet, MethodRef, align_up};
use kiln_format::{CompiledMethod, LinkerPatch, METHOD_HEADER_SIZE, PatchKind};
use tracing::trace;

use super::encoding::{arm64, read_thumb, read_u32, thumb2, write_thumb, write_u32};
use super::{MethodOffsetMap, Thunk, ThunkKey};
use crate::error::{Result, WriteError};

/// Thread register holding the entrypoint table.
const ARM64_THREAD_REGISTER: u32 = 19;
const THUMB2_THREAD_REGISTER: u16 = 9;
/// Offset of the quick-code entrypoint in a runtime method object.
const ARM64_METHOD_ENTRYPOINT_OFFSET: u32 = 32;
const THUMB2_METHOD_ENTRYPOINT_OFFSET: u32 = 24;
/// First per-register read barrier mark entrypoint in the thread.
const ARM64_READ_BARRIER_MARK_BASE: u32 = 0x100;
const THUMB2_READ_BARRIER_MARK_BASE: u32 = 0x80;

/// Reach of a branch, in bytes from its PC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchRange {
    pub max_positive: u32,
    pub max_negative: u32,
}

impl BranchRange {
    fn contains(self, pc: u32, target: u32) -> bool {
        let disp = target as i64 - pc as i64;
        disp <= self.max_positive as i64 && -disp <= self.max_negative as i64
    }
}

#[derive(Clone, Copy, Debug)]
struct ForwardCall {
    target: MethodRef,
    patch_offset: u32,
    deadline: u32,
}

#[derive(Clone, Debug)]
pub struct ArmPatcher {
    isa: InstructionSet,
    call_range: BranchRange,
    branch_range: BranchRange,
    /// Placed thunk offsets per key, ascending.
    placed: BTreeMap<ThunkKey, Vec<u32>>,
    /// Thunks placed at each reservation point, keyed by the offset passed to
    /// `reserve_space` or `reserve_space_end`.
    islands: BTreeMap<u32, Vec<(u32, ThunkKey)>>,
    /// Owed thunks and their earliest deadline.
    scheduled: BTreeMap<ThunkKey, u32>,
    forward_calls: Vec<ForwardCall>,
}

impl ArmPatcher {
    /// # Panics
    /// Panics if `isa` is not an Arm instruction set.
    pub fn new(isa: InstructionSet) -> Self {
        let (call_range, branch_range) = match isa {
            InstructionSet::Arm64 => (
                BranchRange {
                    max_positive: (1 << 27) - 4,
                    max_negative: 1 << 27,
                },
                BranchRange {
                    max_positive: (1 << 20) - 4,
                    max_negative: 1 << 20,
                },
            ),
            InstructionSet::Thumb2 => (
                BranchRange {
                    max_positive: (1 << 24) - 2,
                    max_negative: 1 << 24,
                },
                BranchRange {
                    max_positive: (1 << 20) - 2,
                    max_negative: 1 << 20,
                },
            ),
            InstructionSet::X86_64 => panic!("ArmPatcher does not support {isa}"),
        };
        Self {
            isa,
            call_range,
            branch_range,
            placed: BTreeMap::new(),
            islands: BTreeMap::new(),
            scheduled: BTreeMap::new(),
            forward_calls: Vec::new(),
        }
    }

    /// Narrow the reach of calls, for exercising thunks without huge code.
    pub fn with_call_range(mut self, range: BranchRange) -> Self {
        self.call_range = range;
        self
    }

    /// Narrow the reach of read barrier branches.
    pub fn with_branch_range(mut self, range: BranchRange) -> Self {
        self.branch_range = range;
        self
    }

    pub fn isa(&self) -> InstructionSet {
        self.isa
    }

    pub fn thunk_count(&self) -> usize {
        self.placed.values().map(Vec::len).sum()
    }

    pub fn thunk_offsets(&self) -> Vec<(u32, ThunkKey)> {
        self.islands.values().flatten().copied().collect()
    }

    fn pc(&self, patch_offset: u32) -> u32 {
        match self.isa {
            InstructionSet::Thumb2 => patch_offset + 4,
            _ => patch_offset,
        }
    }

    fn deadline(&self, patch_offset: u32, range: BranchRange) -> u32 {
        self.pc(patch_offset).saturating_add(range.max_positive)
    }

    fn alignment(&self) -> u32 {
        self.isa.code_alignment()
    }

    /// Where a method's code would start if its header went at `offset`.
    fn code_start(&self, offset: u32) -> Result<u32> {
        offset
            .checked_add(METHOD_HEADER_SIZE)
            .and_then(|o| align_up(o, self.alignment()))
            .ok_or_else(|| WriteError::overflow("code segment"))
    }

    fn code_address(&self, code_offset: u32) -> u32 {
        code_offset & !self.isa.entry_adjustment()
    }

    pub fn thunk(&self, key: ThunkKey) -> Result<Thunk> {
        let unencodable =
            || WriteError::patcher(format!("{key} cannot be encoded for {}", self.isa));
        let code = match self.isa {
            InstructionSet::Arm64 => {
                let (base, offset) = match key {
                    ThunkKey::MethodCall => (0, ARM64_METHOD_ENTRYPOINT_OFFSET),
                    ThunkKey::Entrypoint(offset) => (ARM64_THREAD_REGISTER, offset),
                    ThunkKey::ReadBarrier(data) => (
                        ARM64_THREAD_REGISTER,
                        ARM64_READ_BARRIER_MARK_BASE + 8 * (data & 0x1f),
                    ),
                };
                let words = arm64::load_and_branch(base, offset).ok_or_else(unencodable)?;
                words.iter().flat_map(|w| w.to_le_bytes()).collect()
            }
            _ => {
                let (base, offset) = match key {
                    ThunkKey::MethodCall => (0, THUMB2_METHOD_ENTRYPOINT_OFFSET),
                    ThunkKey::Entrypoint(offset) => (THUMB2_THREAD_REGISTER, offset),
                    ThunkKey::ReadBarrier(data) => (
                        THUMB2_THREAD_REGISTER,
                        THUMB2_READ_BARRIER_MARK_BASE + 4 * (data & 0xf),
                    ),
                };
                let (first, second) = thumb2::load_pc(base, offset).ok_or_else(unencodable)?;
                [first.to_le_bytes(), second.to_le_bytes()].concat()
            }
        };
        Ok(Thunk {
            code,
            name: key.to_string(),
        })
    }

    fn thunk_size(&self, key: ThunkKey) -> Result<u32> {
        Ok(self.thunk(key)?.code.len() as u32)
    }

    /// Worst-case size of an island holding everything owed right now.
    fn owed_island_size(&self, exclude: MethodRef) -> Result<u32> {
        let mut keys: Vec<ThunkKey> = self.scheduled.keys().copied().collect();
        if self.forward_calls.iter().any(|c| c.target != exclude)
            && !self.scheduled.contains_key(&ThunkKey::MethodCall)
        {
            keys.push(ThunkKey::MethodCall);
        }
        let mut size = 0u32;
        for key in keys {
            let slot = align_up(self.thunk_size(key)?, self.alignment())
                .ok_or_else(|| WriteError::overflow("thunk island"))?;
            size = size.saturating_add(slot);
        }
        Ok(size)
    }

    fn earliest_deadline(&self, exclude: MethodRef) -> Option<u32> {
        let calls = self
            .forward_calls
            .iter()
            .filter(|c| c.target != exclude)
            .map(|c| c.deadline);
        self.scheduled.values().copied().chain(calls).min()
    }

    fn island_needed(&self, next_slot: u32, exclude: MethodRef) -> Result<bool> {
        let Some(deadline) = self.earliest_deadline(exclude) else {
            return Ok(false);
        };
        Ok(next_slot.saturating_add(self.owed_island_size(exclude)?) > deadline)
    }

    /// Place every owed thunk starting at `offset`.
    fn emit_island(&mut self, offset: u32) -> Result<u32> {
        let mut wanted: BTreeMap<ThunkKey, u32> = std::mem::take(&mut self.scheduled);
        if let Some(deadline) = self.forward_calls.iter().map(|c| c.deadline).min() {
            let entry = wanted.entry(ThunkKey::MethodCall).or_insert(deadline);
            *entry = (*entry).min(deadline);
            self.forward_calls.clear();
        }
        let mut order: Vec<(u32, ThunkKey)> = wanted.into_iter().map(|(k, d)| (d, k)).collect();
        order.sort();

        let mut pos = offset;
        let mut island = Vec::with_capacity(order.len());
        for (deadline, key) in order {
            let start =
                align_up(pos, self.alignment()).ok_or_else(|| WriteError::overflow("thunk island"))?;
            if start > deadline {
                return Err(WriteError::patcher(format!(
                    "{key} at {start:#x} is out of reach of its callers (deadline {deadline:#x})"
                )));
            }
            trace!(target: "patcher", thunk = %key, offset = start, deadline, "reserved thunk");
            self.placed.entry(key).or_default().push(start);
            island.push((start, key));
            pos = start
                .checked_add(self.thunk_size(key)?)
                .ok_or_else(|| WriteError::overflow("thunk island"))?;
        }
        if !island.is_empty() {
            self.islands.insert(offset, island);
        }
        Ok(pos)
    }

    fn find_thunk(&self, key: ThunkKey, patch_offset: u32, range: BranchRange) -> Option<u32> {
        let pc = self.pc(patch_offset);
        self.placed
            .get(&key)?
            .iter()
            .copied()
            .find(|&t| range.contains(pc, t))
    }

    fn need_thunk(&mut self, key: ThunkKey, patch_offset: u32, range: BranchRange) {
        if self.find_thunk(key, patch_offset, range).is_some() {
            return;
        }
        let deadline = self.deadline(patch_offset, range);
        let entry = self.scheduled.entry(key).or_insert(deadline);
        *entry = (*entry).min(deadline);
    }

    /// Settle forward calls whose callee has been placed.
    fn resolve_forward_calls(&mut self, offsets: &MethodOffsetMap) {
        for call in std::mem::take(&mut self.forward_calls) {
            match offsets.get(call.target) {
                Some(target) => {
                    let pc = self.pc(call.patch_offset);
                    if !self.call_range.contains(pc, self.code_address(target)) {
                        self.need_thunk(ThunkKey::MethodCall, call.patch_offset, self.call_range);
                    }
                }
                None => self.forward_calls.push(call),
            }
        }
    }

    pub fn reserve_space(
        &mut self,
        offset: u32,
        compiled: &CompiledMethod,
        method: MethodRef,
        offsets: &MethodOffsetMap,
    ) -> Result<u32> {
        self.resolve_forward_calls(offsets);

        let tentative = self.code_start(offset)?;
        let next_slot = tentative
            .checked_add(compiled.code.len() as u32)
            .and_then(|end| align_up(end, self.alignment()))
            .ok_or_else(|| WriteError::overflow("code segment"))?;
        let callers_out_of_reach = self
            .forward_calls
            .iter()
            .any(|c| c.target == method && tentative > c.deadline);

        let offset = if callers_out_of_reach || self.island_needed(next_slot, method)? {
            self.emit_island(offset)?
        } else {
            offset
        };
        let code_start = self.code_start(offset)?;
        self.forward_calls.retain(|c| c.target != method);

        for patch in &compiled.patches {
            let patch_offset = code_start
                .checked_add(patch.literal_offset)
                .ok_or_else(|| WriteError::overflow("code segment"))?;
            match patch.kind {
                PatchKind::CallRelative { target } if target == method => {}
                PatchKind::CallRelative { target } => match offsets.get(target) {
                    Some(t) => {
                        let pc = self.pc(patch_offset);
                        if !self.call_range.contains(pc, self.code_address(t)) {
                            self.need_thunk(ThunkKey::MethodCall, patch_offset, self.call_range);
                        }
                    }
                    None if offsets.is_compiled(target) => {
                        let deadline = self.deadline(patch_offset, self.call_range);
                        self.forward_calls.push(ForwardCall {
                            target,
                            patch_offset,
                            deadline,
                        });
                    }
                    None => self.need_thunk(ThunkKey::MethodCall, patch_offset, self.call_range),
                },
                PatchKind::EntrypointCall { entrypoint_offset } => {
                    let key = ThunkKey::Entrypoint(entrypoint_offset);
                    self.thunk(key)?;
                    self.need_thunk(key, patch_offset, self.call_range);
                }
                PatchKind::ReadBarrierBranch { custom_data } => {
                    let key = ThunkKey::ReadBarrier(custom_data);
                    self.need_thunk(key, patch_offset, self.branch_range);
                }
                PatchKind::BssEntry { .. } | PatchKind::LiteralPcRelative { .. } => {}
            }
        }
        Ok(offset)
    }

    pub fn reserve_space_end(&mut self, offset: u32, offsets: &MethodOffsetMap) -> Result<u32> {
        self.resolve_forward_calls(offsets);
        if self.scheduled.is_empty() && self.forward_calls.is_empty() {
            return Ok(offset);
        }
        self.emit_island(offset)
    }

    pub fn write_thunks<W: Write>(&self, out: &mut W, offset: u32) -> Result<u32> {
        let Some(island) = self.islands.get(&offset) else {
            return Ok(offset);
        };
        let mut pos = offset;
        for &(start, key) in island {
            out.write_all(&vec![0u8; (start - pos) as usize])?;
            let thunk = self.thunk(key)?;
            out.write_all(&thunk.code)?;
            pos = start + thunk.code.len() as u32;
        }
        Ok(pos)
    }

    /// Destination for a branch to `key`'s thunk, or a patcher error.
    fn thunk_destination(&self, key: ThunkKey, patch_offset: u32, range: BranchRange) -> Result<u32> {
        self.find_thunk(key, patch_offset, range).ok_or_else(|| {
            WriteError::patcher(format!("no {key} within reach of the branch at {patch_offset:#x}"))
        })
    }

    fn write_call(&self, code: &mut [u8], literal_offset: u32, patch_offset: u32, dest: u32) -> Result<()> {
        let disp = dest as i64 - self.pc(patch_offset) as i64;
        match self.isa {
            InstructionSet::Arm64 => write_u32(code, literal_offset, arm64::bl(disp)),
            _ => write_thumb(code, literal_offset, thumb2::bl(disp)),
        }
    }

    pub fn patch_call(
        &self,
        code: &mut [u8],
        literal_offset: u32,
        patch_offset: u32,
        target_offset: Option<u32>,
    ) -> Result<()> {
        let pc = self.pc(patch_offset);
        let direct = target_offset
            .map(|t| self.code_address(t))
            .filter(|&t| self.call_range.contains(pc, t));
        let dest = match direct {
            Some(dest) => dest,
            None => self.thunk_destination(ThunkKey::MethodCall, patch_offset, self.call_range)?,
        };
        self.write_call(code, literal_offset, patch_offset, dest)
    }

    pub fn patch_entrypoint_call(&self, code: &mut [u8], patch: &LinkerPatch, patch_offset: u32) -> Result<()> {
        let PatchKind::EntrypointCall { entrypoint_offset } = patch.kind else {
            return Err(WriteError::invariant(format!("{:?} is not an entrypoint call", patch.kind)));
        };
        let key = ThunkKey::Entrypoint(entrypoint_offset);
        let dest = self.thunk_destination(key, patch_offset, self.call_range)?;
        self.write_call(code, patch.literal_offset, patch_offset, dest)
    }

    pub fn patch_read_barrier_branch(
        &self,
        code: &mut [u8],
        patch: &LinkerPatch,
        patch_offset: u32,
    ) -> Result<()> {
        let PatchKind::ReadBarrierBranch { custom_data } = patch.kind else {
            return Err(WriteError::invariant(format!("{:?} is not a read barrier branch", patch.kind)));
        };
        let key = ThunkKey::ReadBarrier(custom_data);
        let dest = self.thunk_destination(key, patch_offset, self.branch_range)?;
        let disp = dest as i64 - self.pc(patch_offset) as i64;
        let at = patch.literal_offset;

        match self.isa {
            InstructionSet::Arm64 => {
                let insn = read_u32(code, at)?;
                if !arm64::is_cbnz(insn) {
                    return Err(WriteError::patcher(format!("expected cbnz at +{at:#x}, found {insn:#010x}")));
                }
                write_u32(code, at, arm64::cbnz(insn, disp))
            }
            _ => {
                let (first, second) = read_thumb(code, at)?;
                if !thumb2::is_conditional_branch(first, second) {
                    return Err(WriteError::patcher(format!(
                        "expected b<cond>.w at +{at:#x}, found {first:#06x} {second:#06x}"
                    )));
                }
                write_thumb(code, at, thumb2::conditional_branch(first, disp))
            }
        }
    }

    /// Arm64 patches an `adrp` and the `add`/`ldr` right after it; Thumb2
    /// patches `movw`, `movt` and the `add rX, pc` that follows them.
    pub fn patch_pc_relative(
        &self,
        code: &mut [u8],
        patch: &LinkerPatch,
        patch_offset: u32,
        target_offset: u32,
    ) -> Result<()> {
        let at = patch.literal_offset;
        match self.isa {
            InstructionSet::Arm64 => {
                let adrp = read_u32(code, at)?;
                if !arm64::is_adrp(adrp) {
                    return Err(WriteError::patcher(format!("expected adrp at +{at:#x}, found {adrp:#010x}")));
                }
                let page_disp = (target_offset & !0xfff) as i64 - (patch_offset & !0xfff) as i64;
                write_u32(code, at, arm64::adrp(adrp, page_disp))?;

                let next = read_u32(code, at + 4)?;
                let patched = arm64::lo12(next, target_offset & 0xfff).ok_or_else(|| {
                    WriteError::patcher(format!(
                        "cannot encode low bits of {target_offset:#x} into {next:#010x} at +{:#x}",
                        at + 4
                    ))
                })?;
                write_u32(code, at + 4, patched)
            }
            _ => {
                let movw = read_thumb(code, at)?;
                let movt = read_thumb(code, at + 4)?;
                if !thumb2::is_movw(movw.0) || !thumb2::is_movt(movt.0) {
                    return Err(WriteError::patcher(format!("expected movw/movt pair at +{at:#x}")));
                }
                // The add reads PC as its own address plus 4.
                let anchor = patch_offset + 8 + 4;
                let disp = target_offset.wrapping_sub(anchor);
                write_thumb(code, at, thumb2::with_imm16(movw, disp as u16))?;
                write_thumb(code, at + 4, thumb2::with_imm16(movt, (disp >> 16) as u16))
            }
        }
    }
}
