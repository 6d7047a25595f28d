mod cli;
mod commands;
mod logging;

use cli::{BuildParams, ContainerParams, DumpParams, VdexParams, build_cli};

fn main() {
    let matches = build_cli().get_matches();
    logging::init(matches.get_count("verbose"));

    match matches.subcommand() {
        Some(("build", m)) => {
            let params = BuildParams::from_matches(m);
            commands::build::run(params.into());
        }
        Some(("dump", m)) => {
            let params = DumpParams::from_matches(m);
            commands::dump::run(params.into());
        }
        Some(("container", m)) => {
            let params = ContainerParams::from_matches(m);
            commands::container::run(params.into());
        }
        Some(("vdex", m)) => {
            let params = VdexParams::from_matches(m);
            commands::vdex::run(params.into());
        }
        _ => unreachable!("clap should have caught this"),
    }
}
