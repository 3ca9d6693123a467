//! # Chroma-Keyer
//!
//! Remove green and blue screen backgrounds from video.
//!
//! A source video is sampled at a fixed frame rate, every frame is keyed in HSV
//! space into a greyscale mask and a despilled composite over black, and both
//! streams are replayed in real time into encoded video.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chroma_keyer::{
//!     config::Config,
//!     keying::ColorMode,
//!     pipeline::KeyingEngine,
//!     video::{FfmpegSinkProvider, FfmpegSource},
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::default();
//! let mut source = FfmpegSource::open("greenscreen.mp4", &config.video).await?;
//! let sinks = FfmpegSinkProvider::new(&config.video.ffmpeg_bin, config.output.clone());
//!
//! let mut engine = KeyingEngine::new(config)?;
//! let output = engine
//!     .run(&mut source, ColorMode::Green, &sinks, |event| {
//!         println!("{}: {}/{}", event.stage, event.current, event.total);
//!     })
//!     .await?;
//!
//! output.mask.save("greenscreen_mask.mp4").await?;
//! output.composite.save("greenscreen_black.mp4").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`keying`] - Key settings, the per-pixel classifier and its GPU/CPU backends
//! - [`gpu`] - Headless wgpu device and the offscreen keying pipelines
//! - [`video`] - Frame extraction, processing and reassembly, plus ffmpeg I/O
//! - [`pipeline`] - The engine tying the stages together
//! - [`config`] - Configuration management
//!
//! ## Custom Sources and Sinks
//!
//! Anything seekable can be keyed by implementing [`VideoSource`](video::VideoSource),
//! and output can go anywhere a [`CaptureSink`](video::CaptureSink) can record to.

pub mod config;
pub mod error;
pub mod gpu;
pub mod keying;
pub mod pipeline;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    error::{KeyerError, Result},
    keying::{ColorMode, KeySettings},
    pipeline::{KeyingEngine, KeyingOutput, PipelineStage, ProgressEvent},
    video::{EncodedVideo, Frame},
};
