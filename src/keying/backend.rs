use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::{
    config::ProcessingConfig,
    error::Result,
    gpu::{GpuDevice, GpuPipelineContext},
    keying::{classifier::CpuClassifier, KeySettings},
    video::Frame,
};

/// Mask and composite produced from one input frame
#[derive(Debug, Clone)]
pub struct ClassifiedFrame {
    /// Greyscale alpha: white keeps the subject, black is background
    pub mask: Frame,
    /// Despilled subject over black
    pub composite: Frame,
}

/// A classifier sized for one stream of frames.
///
/// Implementations own whatever resources they allocated and must release them in
/// [`FrameClassifier::destroy`].
pub trait FrameClassifier: Send {
    /// Width and height every output is produced at
    fn dimensions(&self) -> (u32, u32);

    /// Key one frame. Inputs of a different size are stretched to `dimensions()`.
    fn classify(&mut self, frame: &Frame, settings: &KeySettings) -> Result<ClassifiedFrame>;

    /// Release all resources held by the classifier
    fn destroy(self: Box<Self>);
}

/// Factory for classifiers
pub trait ClassifierBackend: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, width: u32, height: u32) -> Result<Box<dyn FrameClassifier>>;
}

/// Classifies on the GPU through a render pipeline per mask and composite output
pub struct GpuBackend {
    device: Arc<GpuDevice>,
    readback_timeout: Duration,
}

impl GpuBackend {
    /// Acquire a GPU device, falling back to a software adapter if needed
    pub fn new(readback_timeout: Duration) -> Result<Self> {
        let device = GpuDevice::new_blocking()?;
        Ok(Self::with_device(Arc::new(device), readback_timeout))
    }

    pub fn with_device(device: Arc<GpuDevice>, readback_timeout: Duration) -> Self {
        Self { device, readback_timeout }
    }

    pub fn device(&self) -> &Arc<GpuDevice> {
        &self.device
    }
}

impl ClassifierBackend for GpuBackend {
    fn name(&self) -> &str {
        "gpu"
    }

    fn create(&self, width: u32, height: u32) -> Result<Box<dyn FrameClassifier>> {
        let context =
            GpuPipelineContext::create(self.device.clone(), width, height, self.readback_timeout)?;
        Ok(Box::new(context))
    }
}

/// Classifies on the CPU with the reference math
pub struct CpuBackend {
    threads: usize,
}

impl CpuBackend {
    pub fn new(threads: usize) -> Self {
        Self { threads: threads.max(1) }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl ClassifierBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create(&self, width: u32, height: u32) -> Result<Box<dyn FrameClassifier>> {
        Ok(Box::new(CpuClassifier::new(width, height, self.threads)?))
    }
}

/// Pick the backend the configuration asks for
pub fn backend_from_config(config: &ProcessingConfig) -> Result<Arc<dyn ClassifierBackend>> {
    if config.gpu_acceleration {
        let backend = GpuBackend::new(config.readback_timeout())?;
        info!("🖥️  GPU classifier on {}", backend.device().adapter_summary());
        Ok(Arc::new(backend))
    } else {
        info!("🧮 CPU classifier on {} threads", config.processing_threads);
        Ok(Arc::new(CpuBackend::new(config.processing_threads)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_backend_from_config() {
        let config = ProcessingConfig {
            gpu_acceleration: false,
            processing_threads: 2,
            ..ProcessingConfig::default()
        };
        let backend = backend_from_config(&config).unwrap();
        assert_eq!(backend.name(), "cpu");

        let classifier = backend.create(16, 9).unwrap();
        assert_eq!(classifier.dimensions(), (16, 9));
        classifier.destroy();
    }

    #[test]
    fn test_cpu_backend_rejects_empty_size() {
        assert!(CpuBackend::new(1).create(0, 0).is_err());
    }
}
