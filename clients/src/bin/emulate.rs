//! `qpu-remap-emulate` - Remaps one YUYV frame through the reference emulator.
//!
//! Loads a map file and a raw YUYV 4:2:2 frame, runs the remap kernel on the
//! emulated QPUs and writes the planar I420 result. The run's event trace is
//! checked against the kernel's synchronization protocol and the report is
//! printed.
//!
//! **Outputs:**
//! - `<output>`: I420 frame (Y plane, then U, then V)
//! - `<json>` (optional): protocol report and per-thread summaries
//!
//! **Usage:**
//! ```
//! qpu-remap-emulate --map lens.map --input frame.yuyv --output out.i420 [--filter nearest] [--json report.json]
//! ```
//!
//! Exits non-zero if any protocol check fails.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use qpu_remap::emu::report::Severity;
use qpu_remap::emu::YuyvFrame;
use qpu_remap::{
    build_kernel, DisplacementMap, EmulatorOptions, Filter, KernelConfig, ProtocolReport, Scene,
    DEFAULT_THREADS,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Texture filtering applied to source samples.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum FilterArg {
    /// Bilinear interpolation.
    Bilinear,
    /// Nearest texel.
    Nearest,
}

impl From<FilterArg> for Filter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::Bilinear => Self::Bilinear,
            FilterArg::Nearest => Self::Nearest,
        }
    }
}

/// Emulate the remap kernel over one frame.
#[derive(Parser)]
#[command(
    name = "qpu-remap-emulate",
    about = "Run the remap kernel over a YUYV frame in the reference emulator"
)]
struct Args {
    /// Map file produced by qpu-remap-convert.
    #[arg(long)]
    map: PathBuf,

    /// Raw YUYV source frame, sized as in the map header.
    #[arg(long, short)]
    input: PathBuf,

    /// I420 output path.
    #[arg(long, short)]
    output: PathBuf,

    /// Thread count the map was interleaved for.
    #[arg(long, default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Texture filter.
    #[arg(long, value_enum, default_value_t = FilterArg::Bilinear)]
    filter: FilterArg,

    /// Program blob to run instead of a freshly built kernel.
    #[arg(long)]
    kernel: Option<PathBuf>,

    /// Wall-clock budget for the run in milliseconds.
    ///
    /// Deadlocks are reported as soon as every thread stalls, independent of
    /// this budget.
    #[arg(long, default_value_t = 300_000)]
    timeout_ms: u64,

    /// Write the protocol report as JSON to this path.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let file =
        File::open(&args.map).with_context(|| format!("Failed to open {}", args.map.display()))?;
    let map = DisplacementMap::read_from(file, args.threads)
        .with_context(|| format!("Failed to load map {}", args.map.display()))?;
    let header = map.header();

    let data =
        fs::read(&args.input).with_context(|| format!("Failed to read {}", args.input.display()))?;
    let source = YuyvFrame::new(header.image_width, header.image_height, data)
        .with_context(|| format!("{} does not match the map's source size", args.input.display()))?;

    let program = match &args.kernel {
        Some(path) => load_program(path)?,
        None => build_kernel(&KernelConfig::with_threads(args.threads))
            .context("Failed to build kernel")?
            .words()
            .to_vec(),
    };

    let scene =
        Scene::new(&map, &source, args.filter.into()).context("Failed to lay out the scene")?;
    let options = EmulatorOptions {
        timeout: Duration::from_millis(args.timeout_ms),
        ..EmulatorOptions::default()
    };
    let (run, frame) = scene.run(&program, options).context("Emulation failed")?;
    fs::write(&args.output, frame.to_bytes())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!(path = %args.output.display(), width = frame.width, height = frame.height, "wrote frame");

    let report = ProtocolReport::analyze(&run, scene.launch());
    if let Some(path) = &args.json {
        let json = serde_json::json!({
            "report": report,
            "threads": run.threads,
        });
        let text = serde_json::to_string_pretty(&json).context("Failed to serialize report")?;
        fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    println!("Remap Protocol Report");
    println!("=====================");
    println!();
    for result in &report.results {
        let status = match result.severity {
            Severity::Pass => "PASS",
            Severity::Warning => "WARN",
            Severity::Failure => "FAIL",
        };
        println!("[{}] {}: {}", status, result.check, result.message);
        for detail in &result.details {
            println!("       {}", detail);
        }
    }
    println!();
    println!(
        "{} threads, {} trace events, {} instructions, {} stalled ticks",
        run.threads.len(),
        run.trace.len(),
        run.threads.iter().map(|t| t.steps).sum::<u64>(),
        run.threads.iter().map(|t| t.stalls).sum::<u64>()
    );

    let failed = report.failure_count();
    if failed > 0 {
        eprintln!("Protocol FAILED: {} check(s) did not pass.", failed);
        process::exit(1);
    }
    println!("Protocol PASSED.");
    Ok(())
}

/// Reads a raw program blob of little-endian 64-bit words.
fn load_program(path: &Path) -> Result<Vec<u64>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() || bytes.len() % 8 != 0 {
        bail!(
            "{}: {} bytes is not a whole number of instructions",
            path.display(),
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
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
