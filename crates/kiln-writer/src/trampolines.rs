//! Runtime trampolines placed at the start of the code segment.
//!
//! Each trampoline jumps through the thread's entrypoint table; the slot
//! offsets below are where the runtime keeps the matching entrypoints.

use kiln_core::InstructionSet;
use kiln_format::TrampolineKind;

use crate::error::{Result, WriteError};
use crate::patcher::encoding::{arm64, thumb2};

/// Thread entrypoint slot of each trampoline, in pointer-sized units.
fn entrypoint_slot(kind: TrampolineKind) -> u32 {
    match kind {
        TrampolineKind::InterpreterToInterpreterBridge => 0x20,
        TrampolineKind::JniDlsymLookup => 0x21,
        TrampolineKind::QuickGenericJniTrampoline => 0x22,
        TrampolineKind::QuickImtConflictTrampoline => 0x23,
        TrampolineKind::QuickResolutionTrampoline => 0x24,
        TrampolineKind::QuickToInterpreterBridge => 0x25,
    }
}

/// Machine code of one trampoline.
pub(crate) fn trampoline_code(isa: InstructionSet, kind: TrampolineKind) -> Result<Vec<u8>> {
    let offset = entrypoint_slot(kind) * isa.pointer_size();
    let code = match isa {
        InstructionSet::Arm64 => arm64::load_and_branch(19, offset)
            .map(|words| words.iter().flat_map(|w| w.to_le_bytes()).collect()),
        InstructionSet::Thumb2 => {
            thumb2::load_pc(9, offset).map(|(a, b)| [a.to_le_bytes(), b.to_le_bytes()].concat())
        }
        // jmp qword ptr gs:[offset]
        InstructionSet::X86_64 => {
            let mut code = vec![0x65, 0xff, 0x24, 0x25];
            code.extend_from_slice(&offset.to_le_bytes());
            Some(code)
        }
    };
    code.ok_or_else(|| WriteError::invariant(format!("{} trampoline is unencodable", kind.name())))
}
