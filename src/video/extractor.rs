use std::time::Duration;

use tracing::{debug, info};

use crate::{
    config::Config,
    error::{Result, VideoError},
    video::{Frame, VideoSource},
};

/// Samples a source at a fixed rate into an ordered list of frames
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    fps: f64,
    seek_timeout: Duration,
}

impl FrameExtractor {
    pub fn new(fps: f64, seek_timeout: Duration) -> Self {
        Self { fps, seek_timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.video.fps, config.processing.seek_timeout())
    }

    /// Seek to every `i / fps` for `i` in `0..floor(duration * fps)` and capture.
    ///
    /// A source with zero or unknown duration yields no frames. Progress is
    /// reported as `(frames captured, total)` after every capture.
    pub async fn extract<S, F>(&self, source: &mut S, mut progress: F) -> Result<Vec<Frame>>
    where
        S: VideoSource,
        F: FnMut(usize, usize),
    {
        let (width, height) = (source.metadata().width, source.metadata().height);
        let total = source.metadata().frame_count_at(self.fps);
        if total == 0 {
            info!("Source has no duration to sample, nothing to extract");
            return Ok(Vec::new());
        }

        info!("Extracting {} frames at {} fps ({}x{})", total, self.fps, width, height);

        let mut frames = Vec::with_capacity(total);
        for i in 0..total {
            let time = i as f64 / self.fps;

            tokio::time::timeout(self.seek_timeout, source.seek(time))
                .await
                .map_err(|_| VideoError::SeekTimeout {
                    time,
                    timeout_ms: self.seek_timeout.as_millis() as u64,
                })??;

            let frame = source.capture()?;
            if frame.dimensions() != (width, height) {
                return Err(VideoError::Capture {
                    reason: format!(
                        "frame at {:.3}s is {}x{}, expected {}x{}",
                        time,
                        frame.width(),
                        frame.height(),
                        width,
                        height
                    ),
                }
                .into());
            }

            debug!("Captured frame {} at {:.3}s", i, time);
            frames.push(frame);
            progress(i + 1, total);
        }

        info!("Extracted {} frames", frames.len());
        Ok(frames)
    }
}
