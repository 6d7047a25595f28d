//! Instruction field encoders for the patchers.
//!
//! All displacements are byte distances already range-checked by the caller;
//! each encoder masks them to the instruction's field width.

use crate::error::{Result, WriteError};

pub(crate) fn read_u32(code: &[u8], at: u32) -> Result<u32> {
    let at = at as usize;
    code.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| WriteError::patcher(format!("patch at +{at:#x} is outside the code")))
}

pub(crate) fn write_u32(code: &mut [u8], at: u32, value: u32) -> Result<()> {
    let at = at as usize;
    let slot = code
        .get_mut(at..at + 4)
        .ok_or_else(|| WriteError::patcher(format!("patch at +{at:#x} is outside the code")))?;
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Read a 32-bit Thumb2 instruction as its two halfwords.
pub(crate) fn read_thumb(code: &[u8], at: u32) -> Result<(u16, u16)> {
    let word = read_u32(code, at)?;
    Ok((word as u16, (word >> 16) as u16))
}

pub(crate) fn write_thumb(code: &mut [u8], at: u32, (first, second): (u16, u16)) -> Result<()> {
    write_u32(code, at, first as u32 | (second as u32) << 16)
}

pub(crate) mod arm64 {
    pub(crate) const BL: u32 = 0x9400_0000;

    /// `bl` with a byte displacement.
    pub(crate) fn bl(disp: i64) -> u32 {
        BL | ((disp >> 2) as u32 & 0x03ff_ffff)
    }

    pub(crate) fn is_adrp(insn: u32) -> bool {
        insn & 0x9f00_0000 == 0x9000_0000
    }

    /// Replace the page displacement of an `adrp`, keeping its register.
    pub(crate) fn adrp(insn: u32, page_disp: i64) -> u32 {
        let pages = (page_disp >> 12) as u32;
        let immlo = pages & 0x3;
        let immhi = (pages >> 2) & 0x7_ffff;
        (insn & 0x9f00_001f) | immlo << 29 | immhi << 5
    }

    /// Replace the low-12 immediate of an `add` or scaled `ldr` that
    /// completes an `adrp`. `None` for any other instruction or a
    /// misaligned load offset.
    pub(crate) fn lo12(insn: u32, lo12: u32) -> Option<u32> {
        let imm12 = if insn & 0xff80_0000 == 0x9100_0000 {
            lo12
        } else if insn & 0xbfc0_0000 == 0xb940_0000 {
            let scale = if insn & 0x4000_0000 != 0 { 8 } else { 4 };
            if lo12 % scale != 0 {
                return None;
            }
            lo12 / scale
        } else {
            return None;
        };
        Some((insn & !(0xfff << 10)) | imm12 << 10)
    }

    pub(crate) fn is_cbnz(insn: u32) -> bool {
        insn & 0x7f00_0000 == 0x3500_0000
    }

    /// Replace the imm19 displacement of `cbnz`, keeping width and register.
    pub(crate) fn cbnz(insn: u32, disp: i64) -> u32 {
        (insn & 0xff00_001f) | ((disp >> 2) as u32 & 0x7_ffff) << 5
    }

    /// `ldr x16, [xN, #offset]; br x16`, or `None` if `offset` cannot be
    /// encoded as a scaled 12-bit immediate.
    pub(crate) fn load_and_branch(base: u32, offset: u32) -> Option<[u32; 2]> {
        if offset % 8 != 0 || offset / 8 >= 4096 {
            return None;
        }
        let ldr = 0xf940_0000 | (offset / 8) << 10 | base << 5 | 16;
        Some([ldr, 0xd61f_0200])
    }
}

pub(crate) mod thumb2 {
    /// `bl` (T4) with a byte displacement from PC (instruction + 4).
    pub(crate) fn bl(disp: i64) -> (u16, u16) {
        let d = disp as u32;
        let s = (d >> 24) & 1;
        let i1 = (d >> 23) & 1;
        let i2 = (d >> 22) & 1;
        let j1 = (!i1 ^ s) & 1;
        let j2 = (!i2 ^ s) & 1;
        let imm10 = (d >> 12) & 0x3ff;
        let imm11 = (d >> 1) & 0x7ff;
        (
            (0xf000 | s << 10 | imm10) as u16,
            (0xd000 | j1 << 13 | j2 << 11 | imm11) as u16,
        )
    }

    pub(crate) fn is_conditional_branch(first: u16, second: u16) -> bool {
        first & 0xf800 == 0xf000 && second & 0xd000 == 0x8000
    }

    /// Replace the displacement of a conditional `b<cond>.w` (T3), keeping
    /// the condition.
    pub(crate) fn conditional_branch(first: u16, disp: i64) -> (u16, u16) {
        let d = disp as u32;
        let s = (d >> 20) & 1;
        let j2 = (d >> 19) & 1;
        let j1 = (d >> 18) & 1;
        let imm6 = (d >> 12) & 0x3f;
        let imm11 = (d >> 1) & 0x7ff;
        let cond = (first as u32 >> 6) & 0xf;
        (
            (0xf000 | s << 10 | cond << 6 | imm6) as u16,
            (0x8000 | j1 << 13 | j2 << 11 | imm11) as u16,
        )
    }

    const MOVW: u16 = 0xf240;
    const MOVT: u16 = 0xf2c0;

    fn is_mov_imm16(first: u16, opcode: u16) -> bool {
        first & 0xfbf0 == opcode
    }

    pub(crate) fn is_movw(first: u16) -> bool {
        is_mov_imm16(first, MOVW)
    }

    pub(crate) fn is_movt(first: u16) -> bool {
        is_mov_imm16(first, MOVT)
    }

    /// Replace the 16-bit immediate of `movw`/`movt`, keeping the
    /// destination register.
    pub(crate) fn with_imm16((first, second): (u16, u16), imm16: u16) -> (u16, u16) {
        let imm = imm16 as u32;
        let imm4 = (imm >> 12) & 0xf;
        let i = (imm >> 11) & 1;
        let imm3 = (imm >> 8) & 0x7;
        let imm8 = imm & 0xff;
        (
            ((first as u32 & 0xfbf0) | i << 10 | imm4) as u16,
            ((second as u32 & 0x0f00) | imm3 << 12 | imm8) as u16,
        )
    }

    /// `ldr.w pc, [rN, #offset]`, or `None` past the 12-bit immediate.
    pub(crate) fn load_pc(base: u16, offset: u32) -> Option<(u16, u16)> {
        (offset < 4096).then_some((0xf8d0 | base, 0xf000 | offset as u16))
    }
}
