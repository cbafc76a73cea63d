//! `pbars` CLI binary.
//!
//! This is the minimal entrypoint; all logic is in the library, main only
//! maps the result to a process exit code.

fn main() {
    if let Err(err) = pbars::cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
