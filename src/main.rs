use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use droplet::{build, verify, Archive, BuildOptions, ExtractOptions, Format, ListEntry};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "droplet", version, about = "Build, list, verify and extract droplet archives")]
struct Cli {
    /// Only log warnings and errors (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the path of every record in archive order
    List {
        archive: PathBuf,
        /// Also show permissions, format and declared length
        #[arg(short, long, visible_alias = "verbose")]
        long: bool,
        #[arg(long)]
        json: bool,
    },
    /// Recompute every record's checksum
    Verify {
        archive: PathBuf,
        #[arg(long)]
        json: bool,
        /// Exit with failure if any record mismatches
        #[arg(long)]
        strict: bool,
    },
    /// Recreate the archived tree
    Extract {
        archive: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        dest: PathBuf,
    },
    /// Write files and directories into an archive
    Build {
        archive: PathBuf,
        /// Append to the archive instead of truncating it
        #[arg(short, long)]
        append: bool,
        /// Payload format: 6, 7 or 8
        #[arg(short, long, env = "DROPLET_FORMAT", default_value = "8", value_parser = parse_format)]
        format: Format,
        /// Resolve inputs against this directory
        #[arg(short = 'C', long, default_value = ".")]
        dir: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { archive, long, json } => {
            let ar = open(&archive)?;
            if json {
                let entries = ar.list()?;
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            let mut out = io::stdout().lock();
            for droplet in ar.droplets() {
                let entry = ListEntry::from(&droplet?);
                if long {
                    writeln!(out, "{}", entry.long_line())?;
                } else {
                    writeln!(out, "{}", entry.path)?;
                }
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { archive, json, strict } => {
            let ar = open(&archive)?;
            let report = if json {
                let report = ar.verify()?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                report
            } else {
                let report = verify::write_lines(ar.droplets(), &mut io::stdout().lock())?;
                tracing::info!("{}", report.summary());
                report
            };
            if strict {
                report.into_result()?;
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { archive, dest } => {
            let ar = open(&archive)?;
            let summary = ar.extract_all(&ExtractOptions { dest: dest.clone() })?;
            tracing::info!(
                directories = summary.directories,
                files = summary.files,
                bytes = summary.bytes_written,
                "extracted to {}",
                dest.display()
            );
        }

        // ── Build ────────────────────────────────────────────────────────────
        Commands::Build { archive, append, format, dir, inputs } => {
            let opts = BuildOptions { format, append, base_dir: dir };
            build(&archive, &inputs, &opts)
                .with_context(|| format!("building {}", archive.display()))?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn open(path: &Path) -> Result<Archive> {
    Archive::open(path).with_context(|| format!("opening {}", path.display()))
}

fn parse_format(s: &str) -> Result<Format, String> {
    Format::from_name(s).ok_or_else(|| format!("unknown format '{s}', expected 6, 7 or 8"))
}
