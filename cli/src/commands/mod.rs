//! Command modules for the `hula` CLI.

pub mod repl;
pub mod run;

pub use repl::run_repl;
pub use run::{run_file, RunArgs};
