mod bc2firm;
mod cli;
mod config;
mod discover;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pipeline::exit_codes;

use crate::config::SuiteArgs;

#[derive(Parser)]
#[command(
    name = "bc2firm-tests",
    version,
    about = "bytecode2firm test suite: javac -> bytecode2firm -> run and compare"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the ids of the discovered tests.
    List {
        #[command(flatten)]
        suite: SuiteArgs,
    },
    /// Run the suite (or the named tests) and print a report.
    Run {
        #[command(flatten)]
        suite: SuiteArgs,
        /// Test ids to run (default: all discovered tests).
        tests: Vec<String>,
        /// Show the failing step's command and captured output.
        #[arg(short, long)]
        verbose: bool,
        /// Write the full structured result as JSON.
        #[arg(long)]
        json: Option<std::path::PathBuf>,
        /// Rewrite the expectations file with this run's failures.
        #[arg(long)]
        update_expectations: bool,
    },
    /// Re-render a report from a saved JSON result.
    Report {
        path: std::path::PathBuf,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the effective configuration (defaults, config file, flags).
    Config {
        #[command(flatten)]
        suite: SuiteArgs,
        /// Save it to this TOML file instead of printing it.
        #[arg(long)]
        write: Option<std::path::PathBuf>,
    },
    /// Remove the build directory.
    Clean {
        #[command(flatten)]
        suite: SuiteArgs,
    },
}

fn main() {
    pipeline::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::List { suite } => cli::list_tests(&suite),
        Command::Run {
            suite,
            tests,
            verbose,
            json,
            update_expectations,
        } => cli::run_suite(
            &suite,
            &cli::RunOptions {
                tests,
                verbose,
                json,
                update_expectations,
            },
        ),
        Command::Report { path, verbose } => cli::report_results(&path, verbose),
        Command::Config { suite, write } => cli::show_config(&suite, write.as_deref()),
        Command::Clean { suite } => cli::clean(&suite),
    }
}
