use std::borrow::Cow;
use std::path::Path;

use image::{imageops, ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{KeyerError, Result, VideoError};

/// Represents a single video frame
///
/// This is a thin wrapper around an RGBA image buffer. Sources, classifiers and
/// sinks all exchange frames in this layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbaImage,
}

impl Frame {
    /// Create a new frame from an RGBA image buffer
    pub fn new(buffer: RgbaImage) -> Self {
        Self { buffer }
    }

    /// Create a new opaque black frame
    pub fn new_black(width: u32, height: u32) -> Self {
        Self::new_filled(width, height, [0, 0, 0, 255])
    }

    /// Create a new frame filled with the given colour
    pub fn new_filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        let buffer = ImageBuffer::from_pixel(width, height, Rgba(color));
        Self { buffer }
    }

    /// Create a frame from tightly packed RGBA bytes
    pub fn from_rgba_bytes(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        ImageBuffer::from_raw(width, height, data)
            .map(|buffer| Self { buffer })
            .ok_or_else(|| {
                VideoError::Capture {
                    reason: format!(
                        "expected {} bytes for a {}x{} RGBA frame, got {}",
                        expected, width, height, actual
                    ),
                }
                .into()
            })
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Get a pixel at the given coordinates as RGBA
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.buffer.get_pixel(x, y).0
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        self.buffer.put_pixel(x, y, Rgba(color));
    }

    /// Get the underlying image buffer
    pub fn as_image(&self) -> &RgbaImage {
        &self.buffer
    }

    /// Raw RGBA bytes, row-major from the top-left corner
    pub fn as_raw(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.buffer.into_raw()
    }

    /// Stretch to the given size with bilinear filtering
    pub fn resized(&self, width: u32, height: u32) -> Self {
        Self {
            buffer: imageops::resize(&self.buffer, width, height, imageops::FilterType::Triangle),
        }
    }

    /// Borrow the frame if it already has the given size, otherwise stretch a copy
    pub fn fit_to(&self, width: u32, height: u32) -> Cow<'_, Frame> {
        if self.dimensions() == (width, height) {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(self.resized(width, height))
        }
    }

    /// Save the frame as a PNG file
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.buffer
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| KeyerError::generic(format!("Failed to save frame: {}", e)))
    }

    /// Load a still image as a frame
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| VideoError::SourceUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(image.to_rgba8()))
    }
}

/// Properties of a video source as reported by its probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds; unknown for live or unprobeable sources
    pub duration: Option<f64>,
    pub width: u32,
    pub height: u32,
    /// Native frame rate of the source, when known
    pub fps: Option<f64>,
    pub codec: Option<String>,
}

impl VideoMetadata {
    /// Number of frames sampled at `fps`; zero when the duration is unknown or empty
    pub fn frame_count_at(&self, fps: f64) -> usize {
        match self.duration {
            Some(duration) if duration.is_finite() && duration > 0.0 && fps > 0.0 => {
                (duration * fps).floor() as usize
            }
            _ => 0,
        }
    }
}

/// Container and codec pair produced by a capture sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    pub container: String,
    pub codec: String,
}

impl OutputFormat {
    pub fn new<S: Into<String>>(container: S, codec: S) -> Self {
        Self {
            container: container.into(),
            codec: codec.into(),
        }
    }

    /// MIME type for the container, e.g. `video/mp4`
    pub fn mime_type(&self) -> String {
        format!("video/{}", self.container)
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new("mp4", "libx264")
    }
}

/// An encoded video asset held in memory
#[derive(Debug, Clone)]
pub struct EncodedVideo {
    /// Encoded container bytes
    pub data: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: usize,
}

impl EncodedVideo {
    /// Playback duration: frame count over frame rate
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Write the encoded bytes to disk
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        tokio::fs::write(path, &self.data).await?;
        Ok(())
    }
}
