//! Error types for the highlighting pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The model could not be loaded; the capability it backs is unavailable.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Forward inference failed for one frame or one box.
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model output did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Frame has no pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ort::Error> for PipelineError {
    fn from(err: ort::Error) -> Self {
        PipelineError::Inference(err.to_string())
    }
}
