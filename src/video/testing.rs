//! Scripted sources, sinks and classifiers shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::{
    error::{Result, VideoError},
    keying::{ClassifiedFrame, ClassifierBackend, CpuBackend, FrameClassifier, KeySettings},
    video::{
        CaptureSink, EncodedVideo, Frame, OutputFormat, OutputKind, SinkCapabilities,
        SinkProvider, VideoMetadata, VideoSource,
    },
};

/// Source returning a solid frame per position, with a configurable seek latency
pub struct MockSource {
    pub metadata: VideoMetadata,
    pub color: [u8; 4],
    pub seek_delay: Duration,
    /// Size of captured frames when it should differ from the metadata
    pub capture_size: Option<(u32, u32)>,
    pub seeks: Vec<f64>,
    position: Option<f64>,
}

impl MockSource {
    pub fn new(duration: Option<f64>, width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            metadata: VideoMetadata {
                duration,
                width,
                height,
                fps: Some(30.0),
                codec: Some("mock".to_string()),
            },
            color,
            seek_delay: Duration::ZERO,
            capture_size: None,
            seeks: Vec::new(),
            position: None,
        }
    }
}

impl VideoSource for MockSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    async fn seek(&mut self, time: f64) -> Result<()> {
        if !self.seek_delay.is_zero() {
            tokio::time::sleep(self.seek_delay).await;
        }
        self.seeks.push(time);
        self.position = Some(time);
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        if self.position.is_none() {
            return Err(VideoError::Capture {
                reason: "not positioned".to_string(),
            }
            .into());
        }
        let (w, h) = self
            .capture_size
            .unwrap_or((self.metadata.width, self.metadata.height));
        Ok(Frame::new_filled(w, h, self.color))
    }
}

/// Everything a recording sink observed, shared with the test body
#[derive(Debug, Default)]
pub struct SinkLog {
    pub draws: usize,
    pub recorded: Vec<Instant>,
    pub finished_at: Option<Instant>,
    pub aborted: bool,
}

/// Sink that records capture times on the tokio clock
pub struct RecordingSink {
    pub log: Arc<Mutex<SinkLog>>,
    pub explicit: bool,
    pub fail_on_request: Option<usize>,
    fps: f64,
    size: (u32, u32),
}

impl RecordingSink {
    pub fn new(explicit: bool, fps: f64) -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let sink = Self {
            log: log.clone(),
            explicit,
            fail_on_request: None,
            fps,
            size: (0, 0),
        };
        (sink, log)
    }

    fn record(&self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if self.fail_on_request == Some(log.recorded.len()) {
            return Err(VideoError::Sink {
                reason: "disk full".to_string(),
            }
            .into());
        }
        log.recorded.push(Instant::now());
        Ok(())
    }
}

impl CaptureSink for RecordingSink {
    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            explicit_frame_request: self.explicit,
        }
    }

    fn draw(&mut self, frame: &Frame) -> Result<()> {
        self.size = frame.dimensions();
        self.log.lock().unwrap().draws += 1;
        if self.explicit {
            Ok(())
        } else {
            self.record()
        }
    }

    fn request_frame(&mut self) -> Result<()> {
        self.record()
    }

    fn finish(&mut self) -> Result<EncodedVideo> {
        let mut log = self.log.lock().unwrap();
        log.finished_at = Some(Instant::now());
        Ok(EncodedVideo {
            data: vec![0; log.recorded.len()],
            format: OutputFormat::default(),
            width: self.size.0,
            height: self.size.1,
            fps: self.fps,
            frame_count: log.recorded.len(),
        })
    }

    fn abort(&mut self) {
        self.log.lock().unwrap().aborted = true;
    }
}

/// Hands out recording sinks and keeps their logs by output kind
#[derive(Default)]
pub struct RecordingSinkProvider {
    pub logs: Mutex<Vec<(OutputKind, Arc<Mutex<SinkLog>>)>>,
    pub fail_kind: Option<OutputKind>,
}

impl RecordingSinkProvider {
    pub fn log_for(&self, kind: OutputKind) -> Arc<Mutex<SinkLog>> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, log)| log.clone())
            .expect("no sink created for this output")
    }
}

impl SinkProvider for RecordingSinkProvider {
    fn create_sink(
        &self,
        kind: OutputKind,
        _width: u32,
        _height: u32,
        fps: f64,
    ) -> Result<Box<dyn CaptureSink>> {
        let (mut sink, log) = RecordingSink::new(true, fps);
        if self.fail_kind == Some(kind) {
            sink.fail_on_request = Some(0);
        }
        self.logs.lock().unwrap().push((kind, log));
        Ok(Box::new(sink))
    }
}

/// Counters shared between a counting backend and the test
#[derive(Debug, Default)]
pub struct BackendStats {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub classified: AtomicUsize,
}

/// CPU backend wrapper that counts lifecycle calls, can fail on a given frame
/// and can block for a while per frame
pub struct CountingBackend {
    pub stats: Arc<BackendStats>,
    pub fail_on: Option<usize>,
    pub delay: Duration,
    inner: CpuBackend,
}

impl CountingBackend {
    pub fn new() -> (Self, Arc<BackendStats>) {
        let stats = Arc::new(BackendStats::default());
        let backend = Self {
            stats: stats.clone(),
            fail_on: None,
            delay: Duration::ZERO,
            inner: CpuBackend::new(1),
        };
        (backend, stats)
    }
}

impl ClassifierBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn create(&self, width: u32, height: u32) -> Result<Box<dyn FrameClassifier>> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingClassifier {
            inner: self.inner.create(width, height)?,
            stats: self.stats.clone(),
            fail_on: self.fail_on,
            delay: self.delay,
        }))
    }
}

struct CountingClassifier {
    inner: Box<dyn FrameClassifier>,
    stats: Arc<BackendStats>,
    fail_on: Option<usize>,
    delay: Duration,
}

impl FrameClassifier for CountingClassifier {
    fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }

    fn classify(&mut self, frame: &Frame, settings: &KeySettings) -> Result<ClassifiedFrame> {
        let index = self.stats.classified.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(index) {
            return Err(crate::error::GpuError::Readback {
                reason: "device lost".to_string(),
            }
            .into());
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.classify(frame, settings)
    }

    fn destroy(self: Box<Self>) {
        self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy();
    }
}
