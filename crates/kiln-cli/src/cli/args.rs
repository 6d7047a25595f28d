//! Shared argument builders for CLI commands.
//!
//! Each function returns a `clap::Arg` that can be composed into commands.

use std::path::PathBuf;

use clap::{Arg, ArgAction, value_parser};

/// Executable artifact to read (positional).
pub fn artifact_path_arg() -> Arg {
    Arg::new("artifact_path")
        .value_name("ARTIFACT")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Executable artifact file")
}

/// Container file to read (positional).
pub fn container_path_arg() -> Arg {
    Arg::new("container_path")
        .value_name("CONTAINER")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Bytecode container file")
}

/// Verification artifact to read (positional).
pub fn vdex_path_arg() -> Arg {
    Arg::new("vdex_path")
        .value_name("VDEX")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Verification artifact file")
}

/// Input containers for a build (positional, repeatable).
pub fn inputs_arg() -> Arg {
    Arg::new("inputs")
        .value_name("INPUT")
        .required(true)
        .num_args(1..)
        .help("Container files, archives, or archive!member entries")
}

/// Executable artifact to write (-o/--output).
pub fn output_file_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("FILE")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Write the executable artifact to file")
}

/// Verification artifact to write (--vdex).
pub fn vdex_output_arg() -> Arg {
    Arg::new("vdex")
        .long("vdex")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .help("Also write the verification artifact")
}

/// Target instruction set (--isa).
pub fn isa_arg() -> Arg {
    Arg::new("isa")
        .long("isa")
        .value_name("ISA")
        .default_value("arm64")
        .value_parser(["arm64", "thumb2", "x86-64"])
        .help("Target instruction set")
}

/// Writer configuration file (--config).
pub fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .conflicts_with("isa")
        .help("Writer configuration (JSON)")
}

/// Emit runtime trampolines (--trampolines).
pub fn trampolines_arg() -> Arg {
    Arg::new("trampolines")
        .long("trampolines")
        .action(ArgAction::SetTrue)
        .help("Emit the runtime trampolines (boot image builds)")
}

/// Color output control (--color).
pub fn color_arg() -> Arg {
    Arg::new("color")
        .long("color")
        .value_name("WHEN")
        .default_value("auto")
        .value_parser(["auto", "always", "never"])
        .help("Colorize output")
}

/// Verbosity level (-v, -vv, -vvv).
pub fn verbose_arg() -> Arg {
    Arg::new("verbose")
        .short('v')
        .long("verbose")
        .global(true)
        .action(ArgAction::Count)
        .help("Log verbosity (-v info, -vv debug, -vvv trace); KILN_LOG overrides")
}
