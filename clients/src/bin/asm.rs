//! `qpu-remap-asm` - Builds the remap kernel and writes the raw program blob.
//!
//! **Outputs:**
//! - `<output>`: little-endian 64-bit instruction words, ready to upload
//! - `<listing>` (optional): annotated disassembly with labels
//! - `<stats>` (optional): instruction-mix summary as JSON
//!
//! **Usage:**
//! ```
//! qpu-remap-asm [--threads 12] [--output remap.bin] [--listing remap.lst] [--stats stats.json]
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use qpu_remap::{build_kernel, KernelConfig, DEFAULT_THREADS};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the lens-dewarp remap kernel.
#[derive(Parser)]
#[command(
    name = "qpu-remap-asm",
    about = "Generate the VideoCore IV remap kernel as a raw program blob"
)]
struct Args {
    /// Number of QPU threads the program is built for (even, at most 12).
    #[arg(long, default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Program blob path.
    #[arg(long, short, default_value = "remap.bin")]
    output: PathBuf,

    /// Write an annotated listing to this path.
    #[arg(long)]
    listing: Option<PathBuf>,

    /// Write instruction statistics as JSON to this path.
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = KernelConfig::with_threads(args.threads);
    let program = build_kernel(&config)
        .with_context(|| format!("Failed to build kernel for {} threads", args.threads))?;

    fs::write(&args.output, program.to_bytes())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!(path = %args.output.display(), instructions = program.len(), "wrote program");

    if let Some(path) = &args.listing {
        fs::write(path, program.listing().to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote listing");
    }

    let stats = program.stats();
    if let Some(path) = &args.stats {
        let json = serde_json::to_string_pretty(&stats).context("Failed to serialize stats")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    println!("Kernel built for {} threads:", config.threads);
    println!("  Instructions:     {}", stats.instructions);
    println!("  Bytes:            {}", stats.bytes);
    println!("  Branches:         {}", stats.branches);
    println!(
        "  Semaphore ops:    {} up / {} down",
        stats.semaphore_ups, stats.semaphore_downs
    );
    println!("  TMU loads:        {}", stats.tmu_loads);
    println!("  Store starts:     {}", stats.store_starts);
    println!("  Output:           {}", args.output.display());

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
