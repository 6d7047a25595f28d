use crate::{InstructionSet, IsaFeatures};

#[test]
fn ids_round_trip() {
    for isa in InstructionSet::ALL {
        assert_eq!(InstructionSet::from_id(isa.id()), Some(isa));
    }
    assert_eq!(InstructionSet::from_id(0), None);
}

#[test]
fn thumb_has_entry_adjustment() {
    assert_eq!(InstructionSet::Thumb2.entry_adjustment(), 1);
    assert_eq!(InstructionSet::Arm64.entry_adjustment(), 0);
    assert_eq!(InstructionSet::X86_64.entry_adjustment(), 0);
}

#[test]
fn code_alignment_is_power_of_two() {
    for isa in InstructionSet::ALL {
        assert!(isa.code_alignment().is_power_of_two());
        assert!(isa.code_alignment() >= isa.instruction_alignment());
    }
}

#[test]
fn parse_accepts_aliases() {
    assert_eq!("aarch64".parse::<InstructionSet>(), Ok(InstructionSet::Arm64));
    assert_eq!("X86_64".parse::<InstructionSet>(), Ok(InstructionSet::X86_64));
    assert_eq!("arm".parse::<InstructionSet>(), Ok(InstructionSet::Thumb2));

    let err = "mips".parse::<InstructionSet>().unwrap_err();
    assert_eq!(err.to_string(), "unknown instruction set: mips");
}

#[test]
fn serde_uses_kebab_case() {
    let json = serde_json::to_string(&InstructionSet::X86_64).unwrap();
    assert_eq!(json, "\"x86-64\"");
    let isa: InstructionSet = serde_json::from_str("\"thumb2\"").unwrap();
    assert_eq!(isa, InstructionSet::Thumb2);
}

#[test]
fn features_contains() {
    let features = IsaFeatures(0b101);
    assert!(features.contains(0b100));
    assert!(!features.contains(0b010));
    assert_eq!(IsaFeatures::NONE.bits(), 0);
}
