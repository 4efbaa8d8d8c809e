mod onnx;

pub use onnx::OnnxModel;

use crate::error::PipelineError;
use ndarray::ArrayD;

/// Float32 tensor in channel-major layout
pub type Tensor = ArrayD<f32>;

/// Named outputs of one forward pass, in the order the backend reported them
#[derive(Debug, Default)]
pub struct ModelOutputs(Vec<(String, Tensor)>);

impl ModelOutputs {
    pub fn new(outputs: Vec<(String, Tensor)>) -> Self {
        Self(outputs)
    }

    /// Output names differ between exports, so callers take the first one.
    pub fn into_first(self) -> Result<Tensor, PipelineError> {
        self.0
            .into_iter()
            .next()
            .map(|(_, tensor)| tensor)
            .ok_or_else(|| PipelineError::Decode("model produced no outputs".to_string()))
    }
}

/// Trait for inference backends
/// Lets the pipeline run against ONNX Runtime or a scripted stand-in
pub trait ModelRuntime: Send {
    /// Run one forward pass
    ///
    /// # Arguments
    /// * `inputs` - Input tensors keyed by the model's input names
    fn run(&mut self, inputs: &[(&str, &Tensor)]) -> Result<ModelOutputs, PipelineError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Canned reply for one `run` call
    pub enum Reply {
        Output(Tensor),
        Fail(String),
    }

    /// Replays scripted replies; once the script runs out the last reply repeats.
    pub struct ScriptedRuntime {
        replies: VecDeque<Reply>,
        last: Option<Tensor>,
        calls: Arc<AtomicUsize>,
        on_call: Option<Box<dyn Fn(usize) + Send>>,
    }

    impl ScriptedRuntime {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: replies.into(),
                last: None,
                calls: Arc::new(AtomicUsize::new(0)),
                on_call: None,
            }
        }

        pub fn repeating(output: Tensor) -> Self {
            Self::new(vec![Reply::Output(output)])
        }

        pub fn call_counter(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }

        /// Hook invoked with the 1-based call number before replying
        pub fn on_call(mut self, hook: impl Fn(usize) + Send + 'static) -> Self {
            self.on_call = Some(Box::new(hook));
            self
        }
    }

    impl ModelRuntime for ScriptedRuntime {
        fn run(&mut self, inputs: &[(&str, &Tensor)]) -> Result<ModelOutputs, PipelineError> {
            assert!(!inputs.is_empty(), "runtime called without inputs");
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(hook) = &self.on_call {
                hook(call);
            }
            match self.replies.pop_front() {
                Some(Reply::Output(tensor)) => {
                    self.last = Some(tensor.clone());
                    Ok(ModelOutputs::new(vec![("output".to_string(), tensor)]))
                }
                Some(Reply::Fail(msg)) => Err(PipelineError::Inference(msg)),
                None => match &self.last {
                    Some(tensor) => Ok(ModelOutputs::new(vec![(
                        "output".to_string(),
                        tensor.clone(),
                    )])),
                    None => Err(PipelineError::Inference("script exhausted".to_string())),
                },
            }
        }
    }

    /// Detector output tensor `[N, 6]` from records
    pub fn detector_output(records: &[[f32; 6]]) -> Tensor {
        let flat: Vec<f32> = records.iter().flatten().copied().collect();
        ArrayD::from_shape_vec(vec![records.len(), 6], flat).unwrap()
    }

    /// Uniform `[1, 1, size, size]` heat-map
    pub fn uniform_heatmap(size: usize, value: f32) -> Tensor {
        ArrayD::from_elem(vec![1, 1, size, size], value)
    }
}
