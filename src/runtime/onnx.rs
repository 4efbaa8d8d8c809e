use super::{ModelOutputs, ModelRuntime, Tensor};
use crate::error::PipelineError;
use ndarray::ArrayD;
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;

/// ONNX model served by ONNX Runtime
///
/// TensorRT and CUDA are registered first; when neither is usable the
/// session quietly runs on the CPU provider.
pub struct OnnxModel {
    session: Session,
    label: String,
}

impl OnnxModel {
    /// Load a model from an ONNX file
    pub fn from_file<P: AsRef<Path>>(model_path: P, intra_threads: usize) -> Result<Self, PipelineError> {
        let path = model_path.as_ref();
        tracing::info!("Loading model from {}", path.display());

        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::ModelLoad(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self::from_bytes(&bytes, intra_threads, label)
    }

    /// Load a model from an in-memory ONNX definition
    pub fn from_bytes(bytes: &[u8], intra_threads: usize, label: impl Into<String>) -> Result<Self, PipelineError> {
        let label = label.into();

        let session = Session::builder()
            .map_err(|e| load_error(&label, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(&label, e))?
            .with_intra_threads(intra_threads)
            .map_err(|e| load_error(&label, e))?
            .with_execution_providers([
                TensorRTExecutionProvider::default().build(),
                CUDAExecutionProvider::default().build(),
            ])
            .map_err(|e| load_error(&label, e))?
            .commit_from_memory(bytes)
            .map_err(|e| load_error(&label, e))?;

        tracing::info!("Model {} loaded successfully", label);

        Ok(Self { session, label })
    }
}

impl ModelRuntime for OnnxModel {
    fn run(&mut self, inputs: &[(&str, &Tensor)]) -> Result<ModelOutputs, PipelineError> {
        let _span = tracing::debug_span!("inference", model = %self.label).entered();

        let mut values = Vec::with_capacity(inputs.len());
        for (name, tensor) in inputs {
            let shape: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
            let data: Vec<f32> = tensor.iter().copied().collect();
            let value = ort::value::Tensor::from_array((shape, data))?;
            values.push((name.to_string(), value));
        }

        let outputs = self.session.run(values)?;

        let mut collected = Vec::new();
        for (name, value) in outputs.iter() {
            let (shape, data) = value.try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            let tensor = ArrayD::from_shape_vec(dims, data.to_vec())
                .map_err(|e| PipelineError::Decode(format!("output {}: {}", name, e)))?;
            collected.push((name.to_string(), tensor));
        }

        Ok(ModelOutputs::new(collected))
    }
}

fn load_error(label: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::ModelLoad(format!("{}: {}", label, err))
}
