use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{ConfigError, Result, VideoError},
    video::{sink::sink_error, CaptureSink, EncodedVideo, Frame},
};

/// Replays frames into a capture sink at a fixed real-time rate
#[derive(Debug, Clone)]
pub struct FrameReassembler {
    fps: f64,
    settle_delay: Duration,
}

impl FrameReassembler {
    pub fn new(fps: f64, settle_delay: Duration) -> Self {
        Self { fps, settle_delay }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.video.fps, config.output.settle_delay())
    }

    /// Emit frame `k` no earlier than `start + k / fps`.
    ///
    /// The schedule is absolute: a slow frame delays the next one but never
    /// causes frames to be skipped. After the last frame the sink is given
    /// `settle_delay` to flush before it is finalized. Any sink failure aborts
    /// the sink and is returned as `VideoError::Sink`. A rate that is not a
    /// positive finite number is rejected before the sink is touched.
    pub async fn reassemble<F>(
        &self,
        frames: &[Frame],
        mut sink: Box<dyn CaptureSink>,
        mut progress: F,
    ) -> Result<EncodedVideo>
    where
        F: FnMut(usize, usize),
    {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "video.fps".to_string(),
                value: self.fps.to_string(),
            }
            .into());
        }
        if frames.is_empty() {
            return Err(VideoError::EmptyInput.into());
        }

        let explicit = sink.capabilities().explicit_frame_request;
        let total = frames.len();
        info!(
            "Reassembling {} frames at {} fps ({} capture)",
            total,
            self.fps,
            if explicit { "explicit" } else { "continuous" }
        );

        let start = Instant::now();
        for (k, frame) in frames.iter().enumerate() {
            if let Err(e) = Self::emit(sink.as_mut(), frame, explicit) {
                warn!("Sink failed on frame {}: {}", k, e);
                sink.abort();
                return Err(sink_error(e));
            }
            progress(k + 1, total);

            let due = start + Duration::from_secs_f64((k + 1) as f64 / self.fps);
            if Instant::now() > due {
                debug!("Frame {} overran its slot by {:?}", k, Instant::now() - due);
            }
            sleep_until(due).await;
        }

        sleep(self.settle_delay).await;

        match sink.finish() {
            Ok(video) => {
                info!(
                    "Reassembled {} frames into {:.3}s of video",
                    video.frame_count,
                    video.duration()
                );
                Ok(video)
            }
            Err(e) => {
                sink.abort();
                Err(sink_error(e))
            }
        }
    }

    fn emit(sink: &mut dyn CaptureSink, frame: &Frame, explicit: bool) -> Result<()> {
        sink.draw(frame)?;
        if explicit {
            sink.request_frame()?;
        }
        Ok(())
    }
}
