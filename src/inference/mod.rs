//! The inference engine wraps a frozen classifier behind the [`Backend`]
//! trait and turns its raw output into a probability distribution.
//!
//! The engine is built once at startup and only read afterwards. Backends
//! must be safe to call from several requests at once; a backend whose
//! runtime is not serializes its calls internally.

pub mod onnx;
#[cfg(feature = "torch")]
pub mod torch;

use crate::config::ModelSettings;
use crate::error::{ClassifyError, Result};
use crate::preprocess::ImageTensor;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// Which runtime executes the model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// ONNX graph executed by tract
    Onnx,
    /// TorchScript module executed by libtorch
    Torch,
}

/// What the model's output vector holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Unnormalized scores; softmax is applied
    Logits,
    /// Already a distribution; renormalized to absorb rounding
    Probabilities,
}

/// A loaded model: one tensor batch in, one raw score per class out
pub trait Backend: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn forward(&self, input: &ImageTensor) -> anyhow::Result<Vec<f32>>;
}

/// The model's verdict on one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    /// Arg-max of `probabilities`
    pub class_index: usize,
    /// One entry per class, summing to 1
    pub probabilities: Vec<f32>,
    /// `probabilities[class_index]`
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct InferenceEngine {
    backend: Arc<dyn Backend>,
    output: OutputKind,
    input_shape: [usize; 4],
}

impl InferenceEngine {
    pub fn new(backend: Arc<dyn Backend>, output: OutputKind, input_shape: [usize; 4]) -> Self {
        InferenceEngine {
            backend,
            output,
            input_shape,
        }
    }

    /// Load the configured model artifact for inputs of `input_shape`
    pub fn load(settings: &ModelSettings, input_shape: [usize; 4]) -> anyhow::Result<Self> {
        let backend: Arc<dyn Backend> = match settings.backend {
            BackendKind::Onnx => Arc::new(onnx::OnnxBackend::load(&settings.path, input_shape)?),
            #[cfg(feature = "torch")]
            BackendKind::Torch => Arc::new(torch::TorchBackend::load(&settings.path)?),
            #[cfg(not(feature = "torch"))]
            BackendKind::Torch => {
                anyhow::bail!("the torch backend needs a build with the `torch` feature")
            }
        };
        info!(
            "loaded {} model from {:?} for input {:?}",
            backend.name(),
            settings.path,
            input_shape
        );
        Ok(Self::new(backend, settings.output, input_shape))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    /// Run the model on one batch. Synchronous; callers on an async runtime
    /// should move this onto a blocking thread.
    pub fn predict(&self, tensor: &ImageTensor) -> Result<PredictionResult> {
        if tensor.shape() != self.input_shape {
            return Err(ClassifyError::Inference(anyhow!(
                "input shape {:?} does not match the model input {:?}",
                tensor.shape(),
                self.input_shape
            )));
        }

        let raw = self
            .backend
            .forward(tensor)
            .map_err(ClassifyError::Inference)?;
        if raw.is_empty() {
            return Err(ClassifyError::Inference(anyhow!("model returned no scores")));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(ClassifyError::Inference(anyhow!(
                "model returned non-finite scores: {raw:?}"
            )));
        }

        let probabilities = match self.output {
            OutputKind::Logits => softmax(&raw),
            OutputKind::Probabilities => normalize(&raw).map_err(ClassifyError::Inference)?,
        };
        let (class_index, confidence) = argmax(&probabilities);

        Ok(PredictionResult {
            class_index,
            probabilities,
            confidence,
        })
    }
}

/// `exp(x_i) / sum(exp(x_j))`, shifted by the maximum so large logits do
/// not overflow
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits.iter().map(|&x| f64::from(x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| (e / sum) as f32).collect()
}

fn normalize(probabilities: &[f32]) -> anyhow::Result<Vec<f32>> {
    anyhow::ensure!(
        probabilities.iter().all(|&p| p >= 0.0),
        "model returned negative probabilities: {probabilities:?}"
    );
    let sum: f64 = probabilities.iter().map(|&p| f64::from(p)).sum();
    anyhow::ensure!(sum > 0.0, "model returned an all-zero distribution");
    Ok(probabilities
        .iter()
        .map(|&p| (f64::from(p) / sum) as f32)
        .collect())
}

/// Index and value of the largest entry; ties go to the lowest index
fn argmax(values: &[f32]) -> (usize, f32) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
}
