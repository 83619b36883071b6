//! `labsync`: load a clinical lab extract into REDCap.
//!
//! # Usage
//!
//! ```text
//! labsync --config /etc/labsync/labsync.toml
//! labsync --config labsync.toml --dry-run
//! labsync --config labsync.toml --resume --skip-blanks
//! ```
//!
//! Every setting may also come from a `LABSYNC_*` environment variable,
//! e.g. `LABSYNC_TOKEN`.

mod run;
mod settings;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use run::RunFlags;
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "labsync", version, about = "Load clinical lab results into REDCap")]
struct Args {
  /// Path to the TOML settings file.
  #[arg(short, long, value_name = "FILE", default_value = "labsync.toml")]
  config: PathBuf,

  /// Directory for the checkpoint database and tree export.
  #[arg(long, value_name = "DIR")]
  data_dir: Option<PathBuf>,

  /// Build the tree and write it out without sending anything.
  #[arg(long)]
  dry_run: bool,

  /// Continue from the stored checkpoint instead of rebuilding it.
  #[arg(long)]
  resume: bool,

  /// Stop each form at its first event without data.
  #[arg(long)]
  skip_blanks: bool,

  /// Also write the tree export after uploading.
  #[arg(long)]
  keep: bool,

  /// Log at debug level unless `RUST_LOG` says otherwise.
  #[arg(short, long)]
  verbose: bool,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  let default_level = if args.verbose {
    LevelFilter::DEBUG
  } else {
    LevelFilter::INFO
  };
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy(),
    )
    .init();

  let mut settings = Settings::load(&args.config)
    .with_context(|| format!("loading settings from {}", args.config.display()))?;
  if let Some(dir) = args.data_dir {
    settings.data_directory = dir;
  }

  let flags = RunFlags {
    dry_run:     args.dry_run,
    resume:      args.resume,
    skip_blanks: args.skip_blanks,
    keep:        args.keep,
  };
  let summary = run::run(&settings, flags).await?;

  match summary.upload {
    Some(upload) => tracing::info!(
      requests = upload.requests_sent,
      errors = upload.errors.len(),
      pending = summary.pending,
      "done"
    ),
    None => tracing::info!(pending = summary.pending, "dry run done"),
  }
  Ok(())
}
