//! Command builders for the CLI.
//!
//! Each command is built using the shared arg builders from `args.rs`.

use clap::Command;

use super::args::*;

/// Build the complete CLI with all subcommands.
pub fn build_cli() -> Command {
    Command::new("kiln")
        .about("Build and inspect ahead-of-time compiled artifacts")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(verbose_arg())
        .subcommand(build_command())
        .subcommand(dump_command())
        .subcommand(container_command())
        .subcommand(vdex_command())
}

/// Write a verify-only executable artifact for a set of containers.
pub fn build_command() -> Command {
    Command::new("build")
        .about("Write an executable artifact for bytecode containers")
        .override_usage(
            "\
  kiln build <INPUT>... -o <FILE>
  kiln build <INPUT>... -o <FILE> --vdex <FILE>",
        )
        .after_help(
            r#"EXAMPLES:
  kiln build app.kdx -o app.kea                   # one container
  kiln build app.zip -o app.kea --vdex app.kva    # archive, plus verification artifact
  kiln build app.zip 'app.zip!classes2.dex' -o app.kea --isa x86-64
  kiln build app.kdx -o app.kea --config writer.json

Every method is left to the interpreter; classes are recorded as verified."#,
        )
        .arg(inputs_arg())
        .arg(output_file_arg())
        .arg(vdex_output_arg())
        .arg(isa_arg())
        .arg(config_arg())
        .arg(trampolines_arg())
}

/// Show the sections of an executable artifact.
pub fn dump_command() -> Command {
    Command::new("dump")
        .about("Show the layout of an executable artifact")
        .after_help(
            r#"EXAMPLES:
  kiln dump app.kea
  kiln dump app.kea --color never"#,
        )
        .arg(artifact_path_arg())
        .arg(color_arg())
}

/// Show the classes and methods of a container.
pub fn container_command() -> Command {
    Command::new("container")
        .about("Show the classes and methods of a bytecode container")
        .arg(container_path_arg())
        .arg(color_arg())
}

/// Show the entries of a verification artifact.
pub fn vdex_command() -> Command {
    Command::new("vdex")
        .about("Show the entries of a verification artifact")
        .arg(vdex_path_arg())
        .arg(color_arg())
}
