//! Fusion.
//!
//! Fusion fronts a remote template repository with a read-through cache. This binary loads the
//! configuration, sets up logging, metrics and error reporting, and runs cache-wrapped template
//! fetches from the command line.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod fetch;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
