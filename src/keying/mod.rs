//! # Keying Module
//!
//! Colour-space classification of frames into a greyscale mask and a despilled
//! composite over black, with GPU and CPU backends.

pub mod backend;
pub mod classifier;
pub mod settings;

pub use backend::{
    backend_from_config, ClassifiedFrame, ClassifierBackend, CpuBackend, FrameClassifier,
    GpuBackend,
};
pub use classifier::{composite_pixel, key_pixel, mask_pixel, CpuClassifier, PixelKey};
pub use settings::{ColorMode, KeySettings};
