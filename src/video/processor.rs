use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    error::Result,
    keying::{ClassifierBackend, ColorMode},
    video::Frame,
};

/// Runs every extracted frame through one classifier, in order
pub struct FrameProcessor {
    backend: Arc<dyn ClassifierBackend>,
    yield_interval: usize,
}

impl FrameProcessor {
    pub fn new(backend: Arc<dyn ClassifierBackend>, yield_interval: usize) -> Self {
        Self {
            backend,
            yield_interval: yield_interval.max(1),
        }
    }

    /// Classify `frames` into masks and composites with the preset for `color_mode`.
    ///
    /// One classifier is created per call, sized to the first frame, and released
    /// before returning whether or not classification succeeded.
    pub async fn process<F>(
        &self,
        frames: &[Frame],
        color_mode: ColorMode,
        mut progress: F,
    ) -> Result<(Vec<Frame>, Vec<Frame>)>
    where
        F: FnMut(usize, usize),
    {
        let Some(first) = frames.first() else {
            return Ok((Vec::new(), Vec::new()));
        };

        let settings = color_mode.settings();
        let total = frames.len();
        info!(
            "Classifying {} frames ({} screen, {} backend, {}x{})",
            total,
            color_mode,
            self.backend.name(),
            first.width(),
            first.height()
        );

        let mut classifier = self.backend.create(first.width(), first.height())?;
        let mut masks = Vec::with_capacity(total);
        let mut composites = Vec::with_capacity(total);

        for (i, frame) in frames.iter().enumerate() {
            let classified = match classifier.classify(frame, &settings) {
                Ok(classified) => classified,
                Err(e) => {
                    warn!("Classification failed on frame {}: {}", i, e);
                    classifier.destroy();
                    return Err(e);
                }
            };

            masks.push(classified.mask);
            composites.push(classified.composite);
            progress(i + 1, total);

            if (i + 1) % self.yield_interval == 0 {
                debug!("Yielding after frame {}", i);
                tokio::task::yield_now().await;
            }
        }

        classifier.destroy();
        info!("Classified {} frames", masks.len());
        Ok((masks, composites))
    }
}
