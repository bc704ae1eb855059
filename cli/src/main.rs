//! `hula` - the HulaScript command-line runner and REPL.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{run_file, run_repl, RunArgs};
use error::Result;

/// HulaScript - a small embedded scripting language.
#[derive(Parser, Debug)]
#[command(name = "hula")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run HulaScript files or start an interactive REPL", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true, env = "HULA_VERBOSE")]
    verbose: bool,

    /// Disable color output
    #[arg(long, global = true, env = "HULA_NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile and run a HulaScript file
    Run(RunCommand),

    /// Start an interactive HulaScript REPL
    Repl,
}

#[derive(Parser, Debug)]
struct RunCommand {
    /// Path to the `.hula` script to run
    file: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.no_color);

    match cli.command {
        Commands::Run(args) => run_file(RunArgs { path: args.file }),
        Commands::Repl => run_repl(),
    }
}

fn init_logging(verbose: bool, no_color: bool) {
    let filter = if verbose { EnvFilter::new("debug") } else { EnvFilter::new("info") };
    let subscriber = fmt::layer().with_ansi(!no_color).with_target(false);
    let _ = tracing_subscriber::registry().with(filter).with(subscriber).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::parse_from(["hula", "run", "script.hula"]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.file, PathBuf::from("script.hula")),
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn parses_repl_subcommand() {
        let cli = Cli::parse_from(["hula", "repl"]);
        assert!(matches!(cli.command, Commands::Repl));
    }

    #[test]
    fn parses_global_verbose_before_subcommand() {
        let cli = Cli::parse_from(["hula", "--verbose", "repl"]);
        assert!(cli.verbose);
    }

    #[test]
    fn parses_global_no_color() {
        let cli = Cli::parse_from(["hula", "--no-color", "repl"]);
        assert!(cli.no_color);
    }
}
