use indoc::indoc;
use kiln_core::{InstructionSet, IsaFeatures};

use crate::{WriteError, WriterConfig};

#[test]
fn defaults() {
    let config = WriterConfig::default();
    assert_eq!(config.isa(), InstructionSet::Arm64);
    assert_eq!(config.page(), 4096);
    assert!(!config.trampolines_enabled());
    assert!(config.validate().is_ok());
}

#[test]
fn from_json_fills_missing_fields() {
    let config = WriterConfig::from_json(indoc! {r#"
        {
            "isa": "thumb2",
            "isa-features": 5,
            "emit-trampolines": true
        }
    "#})
    .unwrap();

    assert_eq!(config.isa(), InstructionSet::Thumb2);
    assert_eq!(config.features(), IsaFeatures(5));
    assert!(config.trampolines_enabled());
    assert_eq!(config.page(), 4096);
}

#[test]
fn from_json_rejects_unknown_fields() {
    let err = WriterConfig::from_json(r#"{"isa": "arm64", "compress": true}"#).unwrap_err();
    assert!(matches!(err, WriteError::InputInvalid(msg) if msg.contains("compress")));
}

#[test]
fn from_json_validates() {
    let err = WriterConfig::from_json(r#"{"page-size": 1000}"#).unwrap_err();
    assert!(matches!(err, WriteError::InputInvalid(_)));
}

#[test]
fn page_smaller_than_code_alignment_is_rejected() {
    let config = WriterConfig::new(InstructionSet::Arm64).page_size(8);
    assert!(config.validate().is_err());
    assert!(config.page_size(16).validate().is_ok());
}

#[test]
fn zero_dedup_limit_is_rejected() {
    let config = WriterConfig::default().max_dedup_entries(0);
    assert!(config.validate().is_err());
}

#[test]
fn round_trips_through_json() {
    let config = WriterConfig::new(InstructionSet::X86_64)
        .emit_trampolines(true)
        .max_dedup_entries(16);
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(WriterConfig::from_json(&json).unwrap(), config);
}

#[test]
fn default_json() {
    let json = serde_json::to_string_pretty(&WriterConfig::default()).unwrap();
    insta::assert_snapshot!(json, @r#"
    {
      "isa": "arm64",
      "isa-features": 0,
      "emit-trampolines": false,
      "max-dedup-entries": 1048576,
      "page-size": 4096
    }
    "#);
}
