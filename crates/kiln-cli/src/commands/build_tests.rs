use std::path::Path;

use kiln_core::InstructionSet;
use kiln_format::{Artifact, ClassKind, ContainerBuilder, VaFile};

use super::build::{BuildArgs, BuildInput, execute};

fn write_container(path: &Path) {
    let mut builder = ContainerBuilder::new();
    let class = builder.add_class("LMain;");
    builder.add_method(class, "main", "V", &[0x0e, 0x00], false);
    std::fs::write(path, builder.build()).unwrap();
}

fn args(input: &Path, output: &Path) -> BuildArgs {
    BuildArgs {
        inputs: vec![BuildInput::File(input.to_path_buf())],
        output: output.to_path_buf(),
        vdex: None,
        isa: InstructionSet::Arm64,
        config: None,
        trampolines: false,
    }
}

#[test]
fn build_input_parsing() {
    assert_eq!(BuildInput::parse("app.kdx"), BuildInput::File("app.kdx".into()));
    assert_eq!(
        BuildInput::parse("app.zip"),
        BuildInput::ZipMember {
            archive: "app.zip".into(),
            member: "classes.dex".to_string(),
        }
    );
    assert_eq!(
        BuildInput::parse("base.APK!classes3.dex"),
        BuildInput::ZipMember {
            archive: "base.APK".into(),
            member: "classes3.dex".to_string(),
        }
    );
    assert_eq!(BuildInput::parse("lib.JAR").to_string(), "lib.JAR!classes.dex");
}

#[test]
fn build_writes_verify_only_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.kdx");
    let output = dir.path().join("app.kea");
    write_container(&input);

    let checksum = execute(&args(&input, &output)).unwrap();

    let artifact = Artifact::from_bytes(std::fs::read(&output).unwrap()).unwrap();
    assert_eq!(artifact.header().checksum, checksum);
    assert_eq!(artifact.header().code_size, 0);
    let store = artifact.key_value_store();
    assert_eq!(store.get("class-path"), Some(input.display().to_string().as_str()));
    assert_eq!(store.get("compilation-reason"), Some("verify"));
    let descriptor = artifact.class_descriptor(0, 0, 1).unwrap();
    assert_eq!(descriptor.kind, ClassKind::NoneCompiled);
}

#[test]
fn build_writes_verification_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.kdx");
    let vdex = dir.path().join("app.kva");
    write_container(&input);

    let mut args = args(&input, &dir.path().join("app.kea"));
    args.vdex = Some(vdex.clone());
    execute(&args).unwrap();

    let bytes = std::fs::read(&vdex).unwrap();
    let file = VaFile::parse(&bytes).unwrap();
    assert_eq!(file.container_count(), 1);
    assert!(file.verifier_deps().is_empty());
    assert_eq!(file.container_bytes(0).unwrap(), std::fs::read(&input).unwrap());
}

#[test]
fn config_file_sets_isa() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.kdx");
    let output = dir.path().join("app.kea");
    let config = dir.path().join("writer.json");
    write_container(&input);
    std::fs::write(&config, r#"{ "isa": "x86-64" }"#).unwrap();

    let mut args = args(&input, &output);
    args.config = Some(config);
    args.trampolines = true;
    execute(&args).unwrap();

    let artifact = Artifact::from_bytes(std::fs::read(&output).unwrap()).unwrap();
    assert_eq!(artifact.isa(), InstructionSet::X86_64);
}

#[test]
fn missing_input_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.kdx");
    let err = execute(&args(&input, &dir.path().join("out.kea"))).unwrap_err();
    assert!(err.starts_with(&input.display().to_string()), "{err}");
}

#[test]
fn malformed_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.kdx");
    let config = dir.path().join("writer.json");
    write_container(&input);
    std::fs::write(&config, r#"{ "page-size": "big" }"#).unwrap();

    let mut args = args(&input, &dir.path().join("out.kea"));
    args.config = Some(config.clone());
    let err = execute(&args).unwrap_err();
    assert!(err.starts_with(&config.display().to_string()), "{err}");
}
