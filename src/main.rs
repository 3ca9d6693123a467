use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chroma_keyer::{
    config::Config,
    keying::ColorMode,
    pipeline::KeyingEngine,
    video::{FfmpegSinkProvider, FfmpegSource, OutputKind},
};

#[derive(Parser)]
#[command(
    name = "chroma-keyer",
    version,
    about = "Remove green or blue screen backgrounds from video",
    long_about = "Chroma-Keyer samples a video at a fixed frame rate, keys every frame in HSV space and writes two videos: a greyscale alpha mask and the keyed subject over black."
)]
struct Cli {
    /// Input video file
    #[arg(short, long)]
    input: PathBuf,

    /// Directory for the mask and composite videos (defaults to the input's directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Screen colour to remove (green, blue)
    #[arg(short, long)]
    mode: Option<ColorMode>,

    /// Sampling and playback frame rate
    #[arg(short, long)]
    fps: Option<f64>,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Classify on the CPU instead of the GPU
    #[arg(long)]
    cpu: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting Chroma-Keyer v{}", env!("CARGO_PKG_VERSION"));
    info!("Input: {:?}", cli.input);

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };

    if let Some(fps) = cli.fps {
        config.video.fps = fps;
    }
    if let Some(mode) = cli.mode {
        config.video.color_mode = mode;
    }
    if cli.cpu {
        config.processing.gpu_acceleration = false;
    }
    config.validate()?;

    let output_dir = cli
        .output_dir
        .clone()
        .or_else(|| cli.input.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("creating output directory {:?}", output_dir))?;

    let stem = cli
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let output_path = |kind: OutputKind| {
        output_dir.join(format!("{}_{}.{}", stem, kind.suffix(), config.output.container))
    };
    let mask_path = output_path(OutputKind::Mask);
    let composite_path = output_path(OutputKind::Composite);

    let sinks = FfmpegSinkProvider::new(&config.video.ffmpeg_bin, config.output.clone());
    if !sinks.is_available() {
        anyhow::bail!("{} not found. Please install FFmpeg.", config.video.ffmpeg_bin);
    }

    let mut source = FfmpegSource::open(&cli.input, &config.video)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let color_mode: ColorMode = config.video.color_mode;
    let mut engine = KeyingEngine::new(config).map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let mut last_logged = None;
    let output = engine
        .run(&mut source, color_mode, &sinks, |event| {
            let percent = event.current * 100 / event.total.max(1);
            if last_logged != Some((event.stage, percent / 10)) {
                last_logged = Some((event.stage, percent / 10));
                info!("   {}: {}/{} ({}%)", event.stage, event.current, event.total, percent);
            }
        })
        .await
        .map_err(|e| {
            warn!("Run failed during {}", failed_stage(&e));
            anyhow::anyhow!(e.user_message())
        })?;

    output.mask.save(&mask_path).await?;
    output.composite.save(&composite_path).await?;

    info!("Mask saved to: {:?}", mask_path);
    info!("Composite saved to: {:?}", composite_path);
    info!(
        "Done: {} frames, {:.3}s per video",
        output.mask.frame_count,
        output.mask.duration()
    );
    Ok(())
}

fn failed_stage(err: &chroma_keyer::KeyerError) -> String {
    err.stage()
        .map(|stage| stage.to_string())
        .unwrap_or_else(|| "before the run started".to_string())
}
