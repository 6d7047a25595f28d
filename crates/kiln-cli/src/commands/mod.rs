pub mod build;
pub mod container;
pub mod dump;
pub mod vdex;

#[cfg(test)]
mod build_tests;

/// Print `msg` as an error and exit with status 1.
pub(crate) fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("error: {msg}");
    std::process::exit(1);
}
