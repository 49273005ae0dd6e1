//! `qpu-remap-convert` - Converts per-pixel source coordinates to a map file.
//!
//! Inputs are two raw little-endian `f32` fields, row-major, one sample per
//! output pixel, holding the source column and row each output pixel reads
//! from. The output is the binary map the kernel consumes, interleaved for
//! the given thread count.
//!
//! **Usage:**
//! ```
//! qpu-remap-convert --map-width 1920 --map-height 1080 -x map_x.f32 -y map_y.f32 -o lens.map
//! ```
//!
//! Dimensions are long flags only (`--map-width`, `--map-height`,
//! `--image-width`, `--image-height`).

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use qpu_remap::{DisplacementMap, MapHeader, DEFAULT_THREADS};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Convert coordinate fields to a displacement map.
#[derive(Parser)]
#[command(
    name = "qpu-remap-convert",
    about = "Convert float source-coordinate fields to a qpu-remap map file"
)]
struct Args {
    /// Output (map) width in pixels.
    #[arg(long = "map-width")]
    map_width: u32,

    /// Output (map) height in pixels.
    #[arg(long = "map-height")]
    map_height: u32,

    /// Source image width (default: map width).
    #[arg(long = "image-width")]
    image_width: Option<u32>,

    /// Source image height (default: map height).
    #[arg(long = "image-height")]
    image_height: Option<u32>,

    /// Raw f32 field of source columns.
    #[arg(long = "map-x", short = 'x')]
    map_x: PathBuf,

    /// Raw f32 field of source rows.
    #[arg(long = "map-y", short = 'y')]
    map_y: PathBuf,

    /// Thread count the map is interleaved for.
    #[arg(long, default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Map file path.
    #[arg(long, short)]
    output: PathBuf,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let header = MapHeader {
        map_width: args.map_width,
        map_height: args.map_height,
        image_width: args.image_width.unwrap_or(args.map_width),
        image_height: args.image_height.unwrap_or(args.map_height),
    };

    let xs = read_field(&args.map_x)?;
    let ys = read_field(&args.map_y)?;
    let map = DisplacementMap::from_fields(header, args.threads, &xs, &ys)
        .context("Failed to convert coordinate fields")?;

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    map.write_to(BufWriter::new(file))
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    info!(
        path = %args.output.display(),
        entries = map.entries().len(),
        threads = args.threads,
        "wrote map"
    );
    println!(
        "Map {}x{} (source {}x{}, texture width {}) for {} threads -> {}",
        header.map_width,
        header.map_height,
        header.image_width,
        header.image_height,
        header.texture_width(),
        args.threads,
        args.output.display()
    );
    Ok(())
}

/// Reads a raw little-endian `f32` field.
fn read_field(path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        bail!(
            "{}: {} bytes is not a whole number of f32 samples",
            path.display(),
            bytes.len()
        );
    }
    let field: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    debug!(path = %path.display(), samples = field.len(), "read field");
    Ok(field)
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const FIELDS: [&str; 6] = ["-x", "x.f32", "-y", "y.f32", "-o", "out.map"];

    #[test]
    fn dimensions_parse_from_long_flags() {
        Args::command().debug_assert();
        let argv = ["qpu-remap-convert", "--map-width", "256", "--map-height", "24"];
        let args = Args::try_parse_from(argv.iter().chain(&FIELDS));
        assert!(matches!(args, Ok(Args { map_width: 256, map_height: 24, .. })));
    }

    #[test]
    fn abbreviated_dimension_flags_are_rejected() {
        let argv = ["qpu-remap-convert", "-mw", "256", "-mh", "24"];
        assert!(Args::try_parse_from(argv.iter().chain(&FIELDS)).is_err());
    }
}
