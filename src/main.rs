//! Cohort Search Worker main executable

pub mod cohort;
pub mod common;
pub mod err;

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Variant cohort search",
    long_about = "This tool searches variant cohorts in a property graph and computes their statistics"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Cohort search related commands.
    Cohort(Cohort),
}

/// Parsing of "cohort *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Cohort {
    /// The sub command to run
    #[command(subcommand)]
    command: CohortCommands,
}

/// Enum supporting the parsing of "cohort *" sub commands.
#[derive(Debug, Subcommand)]
enum CohortCommands {
    Query(cohort::query::Args),
    Terms(cohort::query::TermsArgs),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Cohort(cohort) => match &cohort.command {
                CohortCommands::Query(args) => {
                    cohort::query::run(&cli.common, args)?;
                }
                CohortCommands::Terms(args) => {
                    cohort::query::run_terms(&cli.common, args)?;
                }
            },
        }

        Ok::<(), anyhow::Error>(())
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
