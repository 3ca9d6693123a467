use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{KeyerError, PipelineError, Result, VideoError},
    keying::{backend_from_config, ClassifierBackend, ColorMode},
    video::{
        EncodedVideo, Frame, FrameExtractor, FrameProcessor, FrameReassembler, OutputKind,
        SinkProvider, VideoSource,
    },
};

/// A stage of a keying run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Extracting,
    Classifying,
    ReassemblingMask,
    ReassemblingComposite,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extracting => "Frame extraction",
            Self::Classifying => "Classification",
            Self::ReassemblingMask => "Mask reassembly",
            Self::ReassemblingComposite => "Composite reassembly",
        };
        f.write_str(name)
    }
}

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Running(PipelineStage),
    Done,
    Failed(PipelineStage),
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running(stage) => write!(f, "{}", stage),
            Self::Done => f.write_str("done"),
            Self::Failed(stage) => write!(f, "{} failed", stage),
        }
    }
}

/// One progress report, tagged with the stage it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: PipelineStage,
    pub current: usize,
    pub total: usize,
}

/// The two assets produced by a successful run
#[derive(Debug, Clone)]
pub struct KeyingOutput {
    /// Greyscale alpha video
    pub mask: EncodedVideo,
    /// Keyed subject over black
    pub composite: EncodedVideo,
}

/// Main keying engine that orchestrates one source through the whole pipeline
///
/// The engine follows a clear pipeline:
/// 1. Frame Extraction - Sample the source at the configured frame rate
/// 2. Classification - Key every frame into a mask and a composite
/// 3. Mask Reassembly - Replay the masks into an encoded video
/// 4. Composite Reassembly - Replay the composites into an encoded video
pub struct KeyingEngine {
    config: Config,
    backend: Arc<dyn ClassifierBackend>,
    state: EngineState,
}

impl KeyingEngine {
    /// Create an engine with the classifier backend the configuration selects
    pub fn new(config: Config) -> Result<Self> {
        let backend = backend_from_config(&config.processing)?;
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn ClassifierBackend>) -> Self {
        Self {
            config,
            backend,
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Key `source` and encode the mask and composite streams.
    ///
    /// Nothing is returned unless both assets were produced; the first failing
    /// stage is reported as [`PipelineError::StageFailed`].
    pub async fn run<S, F>(
        &mut self,
        source: &mut S,
        color_mode: ColorMode,
        sinks: &dyn SinkProvider,
        mut on_progress: F,
    ) -> Result<KeyingOutput>
    where
        S: VideoSource,
        F: FnMut(ProgressEvent),
    {
        let meta = source.metadata().clone();
        info!("🎬 Starting chroma key run");
        info!(
            "   Source: {}x{}, {}",
            meta.width,
            meta.height,
            meta.duration
                .map_or("unknown duration".to_string(), |d| format!("{:.2}s", d))
        );
        info!("   Mode: {} screen @ {} fps", color_mode, self.config.video.fps);
        info!("   Classifier: {}", self.backend.name());

        // Pipeline Step 1: Frame Extraction
        let frames = self.extract_frames(source, &mut on_progress).await?;

        // Pipeline Step 2: Classification
        let (masks, composites) = self
            .classify_frames(&frames, color_mode, &mut on_progress)
            .await?;
        self.check_frame_counts(frames.len(), masks.len(), composites.len())?;
        drop(frames);

        // Pipeline Step 3: Mask Reassembly
        let mask = self
            .reassemble(
                PipelineStage::ReassemblingMask,
                OutputKind::Mask,
                &masks,
                sinks,
                &mut on_progress,
            )
            .await?;

        // Pipeline Step 4: Composite Reassembly
        let composite = self
            .reassemble(
                PipelineStage::ReassemblingComposite,
                OutputKind::Composite,
                &composites,
                sinks,
                &mut on_progress,
            )
            .await?;

        self.state = EngineState::Done;
        info!(
            "🎉 Keying complete! {} frames, {:.3}s per output",
            mask.frame_count,
            mask.duration()
        );
        Ok(KeyingOutput { mask, composite })
    }

    /// Every input frame must have produced exactly one mask and one composite
    fn check_frame_counts(&mut self, inputs: usize, masks: usize, composites: usize) -> Result<()> {
        if masks == inputs && composites == inputs {
            return Ok(());
        }
        let err = PipelineError::FrameCountMismatch {
            inputs,
            masks,
            composites,
        };
        Err(self.fail(PipelineStage::Classifying, err.into()))
    }

    fn enter(&mut self, stage: PipelineStage) {
        debug!("Entering stage: {}", stage);
        self.state = EngineState::Running(stage);
    }

    fn fail(&mut self, stage: PipelineStage, err: KeyerError) -> KeyerError {
        warn!("{} failed: {}", stage, err);
        self.state = EngineState::Failed(stage);
        PipelineError::StageFailed {
            stage,
            source: Box::new(err),
        }
        .into()
    }

    // ==========================================
    // PIPELINE STEP 1: FRAME EXTRACTION
    // ==========================================

    async fn extract_frames<S, F>(
        &mut self,
        source: &mut S,
        on_progress: &mut F,
    ) -> Result<Vec<Frame>>
    where
        S: VideoSource,
        F: FnMut(ProgressEvent),
    {
        let stage = PipelineStage::Extracting;
        self.enter(stage);
        info!("📹 Step 1: Extracting frames...");

        let extractor = FrameExtractor::from_config(&self.config);
        let result = extractor
            .extract(source, |current, total| on_progress(ProgressEvent { stage, current, total }))
            .await;

        match result {
            Ok(frames) => {
                info!("   ✅ Frames extracted: {}", frames.len());
                Ok(frames)
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }

    // ==========================================
    // PIPELINE STEP 2: CLASSIFICATION
    // ==========================================

    async fn classify_frames<F>(
        &mut self,
        frames: &[Frame],
        color_mode: ColorMode,
        on_progress: &mut F,
    ) -> Result<(Vec<Frame>, Vec<Frame>)>
    where
        F: FnMut(ProgressEvent),
    {
        let stage = PipelineStage::Classifying;
        self.enter(stage);
        info!("🎨 Step 2: Classifying frames ({} screen)...", color_mode);

        let processor =
            FrameProcessor::new(self.backend.clone(), self.config.processing.yield_interval);
        let result = processor
            .process(frames, color_mode, |current, total| {
                on_progress(ProgressEvent { stage, current, total })
            })
            .await;

        match result {
            Ok(outputs) => {
                info!("   ✅ Masks and composites: {}", outputs.0.len());
                Ok(outputs)
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }

    // ==========================================
    // PIPELINE STEPS 3 & 4: REASSEMBLY
    // ==========================================

    async fn reassemble<F>(
        &mut self,
        stage: PipelineStage,
        kind: OutputKind,
        frames: &[Frame],
        sinks: &dyn SinkProvider,
        on_progress: &mut F,
    ) -> Result<EncodedVideo>
    where
        F: FnMut(ProgressEvent),
    {
        self.enter(stage);
        info!("🎞️  Reassembling {} video...", kind);

        let Some(first) = frames.first() else {
            return Err(self.fail(stage, VideoError::EmptyInput.into()));
        };

        let fps = self.config.video.fps;
        let sink = match sinks.create_sink(kind, first.width(), first.height(), fps) {
            Ok(sink) => sink,
            Err(e) => return Err(self.fail(stage, e)),
        };

        let reassembler = FrameReassembler::from_config(&self.config);
        let result = reassembler
            .reassemble(frames, sink, |current, total| {
                on_progress(ProgressEvent { stage, current, total })
            })
            .await;

        match result {
            Ok(video) => {
                info!(
                    "   ✅ {} video: {} frames, {} KB",
                    kind,
                    video.frame_count,
                    video.size_bytes() / 1024
                );
                Ok(video)
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }
}
