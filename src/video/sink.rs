use std::fmt;

use crate::{
    error::{KeyerError, Result, VideoError},
    video::{EncodedVideo, Frame},
};

/// What a capture sink can do, read once when a sink is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkCapabilities {
    /// Frames are only recorded when `request_frame` is called.
    /// Without it the sink records whatever is drawn.
    pub explicit_frame_request: bool,
}

/// A drawing surface that records frames into an encoded video
pub trait CaptureSink: Send {
    fn capabilities(&self) -> SinkCapabilities;

    /// Draw a frame onto the capture surface
    fn draw(&mut self, frame: &Frame) -> Result<()>;

    /// Record the surface as the next frame of the stream
    fn request_frame(&mut self) -> Result<()>;

    /// Finalize the stream and return the encoded asset
    fn finish(&mut self) -> Result<EncodedVideo>;

    /// Stop recording and discard anything captured so far
    fn abort(&mut self);
}

/// Which output stream a sink is recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Mask,
    Composite,
}

impl OutputKind {
    /// File name suffix used for this output
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Mask => "mask",
            Self::Composite => "black",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mask => f.write_str("mask"),
            Self::Composite => f.write_str("composite"),
        }
    }
}

/// Builds one capture sink per output stream
pub trait SinkProvider: Send + Sync {
    fn create_sink(
        &self,
        kind: OutputKind,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn CaptureSink>>;
}

/// Normalize any sink-side failure to `VideoError::Sink`
pub(crate) fn sink_error(err: KeyerError) -> KeyerError {
    match err {
        KeyerError::Video(VideoError::Sink { .. }) => err,
        other => VideoError::Sink {
            reason: other.to_string(),
        }
        .into(),
    }
}
