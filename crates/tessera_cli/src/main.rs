//! Tessera CLI — the command-line interface for the Tessera site builder.
//!
//! Provides `tessera init` for project scaffolding, `tessera build` for
//! incremental builds, `tessera impact` for reporting which outputs a given
//! input change would affect, and `tessera clean` for removing the cache.

#![warn(missing_docs)]

mod build;
mod clean;
mod impact;
mod init;
mod pipeline;

use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Tessera — an incremental static site builder.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about = "Tessera incremental site builder")]
pub struct Cli {
    /// Suppress all output except errors and warnings.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `tessera.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new Tessera project.
    Init {
        /// Project name (creates a subdirectory). If omitted, initializes
        /// in the current directory.
        name: Option<String>,
    },
    /// Build the site incrementally.
    Build(BuildArgs),
    /// Report which outputs a change to the given input would affect.
    Impact(ImpactArgs),
    /// Remove the build cache.
    Clean(CleanArgs),
}

/// Arguments for the `tessera build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Ignore the existing cache and rebuild everything.
    #[arg(long)]
    pub full: bool,

    /// Number of render worker threads (defaults to the number of cores).
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Arguments for the `tessera impact` subcommand.
#[derive(Parser, Debug)]
pub struct ImpactArgs {
    /// A file or template path, relative to the project root.
    pub path: Option<String>,

    /// A configuration key (dotted path such as `site.title`).
    #[arg(long)]
    pub config_key: Option<String>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `tessera clean` subcommand.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Also remove the rendered output directory.
    #[arg(long)]
    pub output: bool,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Init { name } => init::run(name),
        Command::Build(ref args) => build::run(args, &global),
        Command::Impact(ref args) => impact::run(args, &global),
        Command::Clean(ref args) => clean::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
