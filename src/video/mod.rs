//! # Video Processing Module
//!
//! Frame extraction from a seekable source, per-frame classification, and
//! real-time reassembly of keyed frames into encoded video.

pub mod extractor;
pub mod ffmpeg;
pub mod processor;
pub mod reassembler;
pub mod sink;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use extractor::FrameExtractor;
pub use ffmpeg::{FfmpegSink, FfmpegSinkProvider, FfmpegSource};
pub use processor::FrameProcessor;
pub use reassembler::FrameReassembler;
pub use sink::{CaptureSink, OutputKind, SinkCapabilities, SinkProvider};
pub use source::VideoSource;
pub use types::{EncodedVideo, Frame, OutputFormat, VideoMetadata};
