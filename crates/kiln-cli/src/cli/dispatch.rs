//! Dispatch logic: extract params from ArgMatches and convert to command args.
//!
//! `*Params` structs mirror the command `*Args` but are populated from clap;
//! `Into<*Args>` bridges dispatch to the command handlers.

use std::path::PathBuf;

use clap::ArgMatches;
use kiln_core::InstructionSet;

use super::ColorChoice;
use crate::commands::build::{BuildArgs, BuildInput};
use crate::commands::container::ContainerArgs;
use crate::commands::dump::DumpArgs;
use crate::commands::vdex::VdexArgs;

pub struct BuildParams {
    pub inputs: Vec<String>,
    pub output: PathBuf,
    pub vdex: Option<PathBuf>,
    pub isa: InstructionSet,
    pub config: Option<PathBuf>,
    pub trampolines: bool,
}

impl BuildParams {
    pub fn from_matches(m: &ArgMatches) -> Self {
        Self {
            inputs: m
                .get_many::<String>("inputs")
                .map(|v| v.cloned().collect())
                .unwrap_or_default(),
            output: m
                .get_one::<PathBuf>("output")
                .cloned()
                .unwrap_or_default(),
            vdex: m.get_one::<PathBuf>("vdex").cloned(),
            isa: parse_isa(m),
            config: m.get_one::<PathBuf>("config").cloned(),
            trampolines: m.get_flag("trampolines"),
        }
    }
}

impl From<BuildParams> for BuildArgs {
    fn from(p: BuildParams) -> Self {
        Self {
            inputs: p.inputs.iter().map(|s| BuildInput::parse(s)).collect(),
            output: p.output,
            vdex: p.vdex,
            isa: p.isa,
            config: p.config,
            trampolines: p.trampolines,
        }
    }
}

pub struct DumpParams {
    pub artifact_path: PathBuf,
    pub color: ColorChoice,
}

impl DumpParams {
    pub fn from_matches(m: &ArgMatches) -> Self {
        Self {
            artifact_path: m
                .get_one::<PathBuf>("artifact_path")
                .cloned()
                .unwrap_or_default(),
            color: parse_color(m),
        }
    }
}

impl From<DumpParams> for DumpArgs {
    fn from(p: DumpParams) -> Self {
        Self {
            artifact_path: p.artifact_path,
            color: p.color.should_colorize(),
        }
    }
}

pub struct ContainerParams {
    pub container_path: PathBuf,
    pub color: ColorChoice,
}

impl ContainerParams {
    pub fn from_matches(m: &ArgMatches) -> Self {
        Self {
            container_path: m
                .get_one::<PathBuf>("container_path")
                .cloned()
                .unwrap_or_default(),
            color: parse_color(m),
        }
    }
}

impl From<ContainerParams> for ContainerArgs {
    fn from(p: ContainerParams) -> Self {
        Self {
            container_path: p.container_path,
            color: p.color.should_colorize(),
        }
    }
}

pub struct VdexParams {
    pub vdex_path: PathBuf,
    pub color: ColorChoice,
}

impl VdexParams {
    pub fn from_matches(m: &ArgMatches) -> Self {
        Self {
            vdex_path: m
                .get_one::<PathBuf>("vdex_path")
                .cloned()
                .unwrap_or_default(),
            color: parse_color(m),
        }
    }
}

impl From<VdexParams> for VdexArgs {
    fn from(p: VdexParams) -> Self {
        Self {
            vdex_path: p.vdex_path,
            color: p.color.should_colorize(),
        }
    }
}

fn parse_color(m: &ArgMatches) -> ColorChoice {
    match m.get_one::<String>("color").map(|s| s.as_str()) {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

fn parse_isa(m: &ArgMatches) -> InstructionSet {
    m.get_one::<String>("isa")
        .and_then(|s| s.parse().ok())
        .unwrap_or(InstructionSet::Arm64)
}
