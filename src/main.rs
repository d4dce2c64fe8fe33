use blobby::archive::{self, ArchiveOptions, ArchiveReport, ChecksumPolicy};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blobby", about = "Pack files and directory trees into a flat blob container")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print mode, size and path of every record
    List {
        blob: PathBuf,
        /// Stop at the first checksum mismatch
        #[arg(long)]
        strict: bool,
    },
    /// Recreate every record under a directory
    Extract {
        blob: PathBuf,
        #[arg(short = 'C', long = "directory", default_value = ".")]
        directory: PathBuf,
        /// Stop at the first checksum mismatch
        #[arg(long)]
        strict: bool,
    },
    /// Write files and directory trees into a new container
    Create {
        blob: PathBuf,
        #[arg(required = true, num_args = 1..)]
        paths: Vec<PathBuf>,
        /// Resolve inputs relative to this directory
        #[arg(short = 'C', long = "directory", default_value = ".")]
        directory: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse().command) {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(report) => {
            error!("{}", report.summary());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<ArchiveReport, Box<dyn std::error::Error>> {
    let report = match command {

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { blob, strict } => {
            let opts = ArchiveOptions { checksum_policy: policy(strict), ..ArchiveOptions::default() };
            archive::list(&blob, &opts, |entry| println!("{entry}"))?
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { blob, directory, strict } => {
            let opts = ArchiveOptions { base_dir: directory, checksum_policy: policy(strict) };
            archive::extract(&blob, &opts)?
        }

        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { blob, paths, directory } => {
            let opts = ArchiveOptions { base_dir: directory, ..ArchiveOptions::default() };
            archive::create(&blob, &paths, &opts)?
        }
    };
    Ok(report)
}

fn policy(strict: bool) -> ChecksumPolicy {
    if strict { ChecksumPolicy::Abort } else { ChecksumPolicy::Continue }
}
