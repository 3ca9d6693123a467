use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Main error type for the chroma-keyer library
#[derive(Error, Debug)]
pub enum KeyerError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Video processing error: {0}")]
    Video(#[from] VideoError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// GPU-specific errors
#[derive(Error, Debug)]
pub enum GpuError {
    /// Surface, shader, pipeline or buffer allocation failed. Fatal to the run.
    #[error("Failed to create GPU resource '{resource}': {reason}")]
    ResourceCreation { resource: String, reason: String },

    #[error("GPU readback failed: {reason}")]
    Readback { reason: String },
}

/// Video source and sink errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Video source unavailable: {path} ({reason})")]
    SourceUnavailable { path: String, reason: String },

    #[error("Seek to {time:.3}s failed: {reason}")]
    SeekFailed { time: f64, reason: String },

    #[error("Seek to {time:.3}s did not complete within {timeout_ms} ms")]
    SeekTimeout { time: f64, timeout_ms: u64 },

    #[error("Frame capture failed: {reason}")]
    Capture { reason: String },

    #[error("Cannot reassemble a video from zero frames")]
    EmptyInput,

    #[error("Capture sink failed: {reason}")]
    Sink { reason: String },
}

/// Errors surfaced by the orchestrator
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} failed: {source}")]
    StageFailed {
        stage: PipelineStage,
        #[source]
        source: Box<KeyerError>,
    },

    #[error("Frame count mismatch: {inputs} inputs, {masks} masks, {composites} composites")]
    FrameCountMismatch {
        inputs: usize,
        masks: usize,
        composites: usize,
    },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Coarse classification of an error, independent of where it was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ResourceCreation,
    Source,
    EmptyInput,
    Sink,
    Readback,
    Config,
    Other,
}

/// Convenience type alias for Results using KeyerError
pub type Result<T> = std::result::Result<T, KeyerError>;

impl KeyerError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Classify this error, looking through stage wrappers added by the orchestrator
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Gpu(GpuError::ResourceCreation { .. }) => ErrorKind::ResourceCreation,
            Self::Gpu(GpuError::Readback { .. }) => ErrorKind::Readback,
            Self::Video(VideoError::EmptyInput) => ErrorKind::EmptyInput,
            Self::Video(VideoError::Sink { .. }) => ErrorKind::Sink,
            Self::Video(_) => ErrorKind::Source,
            Self::Pipeline(PipelineError::StageFailed { source, .. }) => source.kind(),
            Self::Config(_) => ErrorKind::Config,
            _ => ErrorKind::Other,
        }
    }

    /// The stage that failed, if the error came out of the orchestrator
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Pipeline(PipelineError::StageFailed { stage, .. }) => Some(*stage),
            _ => None,
        }
    }

    /// Check if this error is recoverable (can be retried)
    ///
    /// GPU, source and sink failures are not expected to be transient within one
    /// run, so only plain IO errors qualify.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Gpu(GpuError::ResourceCreation { resource, .. }) => {
                format!("Could not set up the GPU ({}). Try again with --cpu.", resource)
            }
            Self::Video(VideoError::SourceUnavailable { path, .. }) => {
                format!(
                    "Could not open video '{}'. Please check the file exists and that ffprobe is installed.",
                    path
                )
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            Self::Pipeline(PipelineError::StageFailed { stage, source }) => {
                format!("{} failed: {}", stage, source.user_message())
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_stage_wrapper() {
        let err: KeyerError = PipelineError::StageFailed {
            stage: PipelineStage::ReassemblingMask,
            source: Box::new(VideoError::Sink { reason: "pipe closed".into() }.into()),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::Sink);
        assert_eq!(err.stage(), Some(PipelineStage::ReassemblingMask));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_taxonomy_kinds() {
        let gpu: KeyerError = GpuError::ResourceCreation {
            resource: "render target".into(),
            reason: "zero size".into(),
        }
        .into();
        assert_eq!(gpu.kind(), ErrorKind::ResourceCreation);

        let empty: KeyerError = VideoError::EmptyInput.into();
        assert_eq!(empty.kind(), ErrorKind::EmptyInput);

        let seek: KeyerError = VideoError::SeekTimeout { time: 1.0, timeout_ms: 10 }.into();
        assert_eq!(seek.kind(), ErrorKind::Source);
        assert_eq!(seek.stage(), None);
    }
}
