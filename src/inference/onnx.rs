//! ONNX backend on tract, a pure-Rust runtime. Its plans are immutable once
//! built, so one plan serves every request without locking.

use super::Backend;
use crate::preprocess::ImageTensor;
use anyhow::{anyhow, Context, Result};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

pub struct OnnxBackend {
    path: PathBuf,
    plan: OnnxPlan,
}

impl OnnxBackend {
    /// Load and optimize an ONNX graph, pinning its input to `input_shape`
    pub fn load(path: &Path, input_shape: [usize; 4]) -> Result<Self> {
        let shape: TVec<usize> = input_shape.iter().copied().collect();
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read ONNX model {path:?}"))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))?
            .into_optimized()?
            .into_runnable()?;

        Ok(OnnxBackend {
            path: path.to_path_buf(),
            plan,
        })
    }
}

impl Debug for OnnxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OnnxBackend {{ path: {:?} }}", self.path)
    }
}

impl Backend for OnnxBackend {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let [n, a, b, c] = input.shape();
        let tensor = tract_ndarray::Array4::from_shape_vec((n, a, b, c), input.as_slice().to_vec())?
            .into_tensor();

        let outputs = self.plan.run(tvec!(tensor.into_tvalue()))?;
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("ONNX model produced no outputs"))?
            .to_array_view::<f32>()?;

        Ok(scores.iter().copied().collect())
    }
}
