use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pslu", author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level (RUST_LOG directives take precedence)
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Factor a Matrix Market file and print the report
    Factor {
        /// Square matrix in Matrix Market coordinate format
        #[arg(value_hint = ValueHint::FilePath)]
        matrix: PathBuf,
        /// Worker threads (0 = one per CPU)
        #[arg(short, long, default_value_t = 0)]
        threads: usize,
        /// TOML file with factorization options; missing keys use defaults
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Compute the residual and solve against a known solution
        #[arg(long)]
        check: bool,
    },
    /// Write a test matrix in Matrix Market format
    Generate {
        /// Convection-diffusion operator on a K x K grid
        #[arg(long, value_name = "K", required_unless_present = "random", conflicts_with = "random")]
        grid: Option<usize>,
        /// Random unsymmetric matrix of order N with a weak diagonal
        #[arg(long, value_name = "N")]
        random: Option<usize>,
        /// Convection strength for --grid
        #[arg(long, default_value_t = 10.0)]
        peclet: f64,
        /// Off-diagonal entries per column for --random
        #[arg(long, default_value_t = 3)]
        per_column: usize,
        /// Seed for --random
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Output path
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        out: PathBuf,
    },
    /// Print or save the default options as TOML
    Options {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

pub fn build_cli_command() -> clap::Command {
    Cli::command()
}
