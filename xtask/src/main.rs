// Licensed under the Apache-2.0 license

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

mod clippy;
mod deps;
mod format;
mod header;
mod precheckin;

pub(crate) static PROJECT_ROOT: LazyLock<PathBuf> = LazyLock::new(|| {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
});

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Xtask {
    #[command(subcommand)]
    xtask: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run clippy on all targets
    Clippy,
    /// Check that every crate takes its dependencies from the workspace
    Deps,
    /// Check source code format
    Format,
    /// Check that all files have the license header
    HeaderCheck,
    /// Add the license header to files missing it
    HeaderFix,
    /// Run pre-check-in checks
    Precheckin,
    /// Run the workspace tests
    Test {
        /// Only run tests whose name contains this string
        filter: Option<String>,

        /// Log level handed to the tests through RUST_LOG
        #[arg(long)]
        log: Option<String>,
    },
}

fn main() {
    let cli = Xtask::parse();
    let result = match &cli.xtask {
        Commands::Clippy => clippy::clippy(),
        Commands::Deps => deps::check(),
        Commands::Format => format::format(),
        Commands::HeaderCheck => header::check(),
        Commands::HeaderFix => header::fix(),
        Commands::Precheckin => precheckin::precheckin(),
        Commands::Test { filter, log } => test::test(filter.as_deref(), log.as_deref()),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {e:#}");
        std::process::exit(-1);
    });
}
