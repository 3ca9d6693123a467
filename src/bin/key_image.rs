// Key a single still image and write its mask and composite as PNG files

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chroma_keyer::{
    config::ProcessingConfig,
    keying::{backend_from_config, ColorMode},
    Frame,
};

#[derive(Parser)]
#[command(name = "key_image", about = "Key a still image into a mask and a composite over black")]
struct Args {
    /// Input image (PNG or JPEG)
    input: PathBuf,

    /// Screen colour to remove (green, blue)
    #[arg(short, long, default_value = "green")]
    mode: ColorMode,

    /// Directory for the output PNGs (defaults to the input's directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Classify on the CPU instead of the GPU
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let frame = Frame::open(&args.input)
        .with_context(|| format!("opening {:?}", args.input))?;
    let (width, height) = frame.dimensions();
    info!("Loaded {:?} ({}x{})", args.input, width, height);

    let processing = ProcessingConfig {
        gpu_acceleration: !args.cpu,
        ..ProcessingConfig::default()
    };
    let backend = backend_from_config(&processing).map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let mut classifier = backend.create(width, height)?;
    let keyed = classifier.classify(&frame, &args.mode.settings());
    classifier.destroy();
    let keyed = keyed?;

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| args.input.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = args
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");

    let mask_path = output_dir.join(format!("{}_mask.png", stem));
    let composite_path = output_dir.join(format!("{}_black.png", stem));
    keyed.mask.save_png(&mask_path)?;
    keyed.composite.save_png(&composite_path)?;

    info!("✅ {} key written to {:?} and {:?}", args.mode, mask_path, composite_path);
    Ok(())
}
