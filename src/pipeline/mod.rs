//! # Keying Pipeline
//!
//! The engine drives a source through extraction, classification and the two
//! reassembly passes, reporting progress per stage.

pub mod engine;

pub use engine::{EngineState, KeyingEngine, KeyingOutput, PipelineStage, ProgressEvent};
