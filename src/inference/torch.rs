//! TorchScript backend on libtorch. A `CModule` makes no promise about
//! concurrent `forward` calls, so calls go through a mutex and requests
//! queue up behind it.

use super::Backend;
use crate::preprocess::ImageTensor;
use anyhow::{anyhow, Context, Result};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tch::{no_grad, CModule, Device, Kind, Tensor};

pub struct TorchBackend {
    path: PathBuf,
    model: Mutex<CModule>,
}

impl TorchBackend {
    pub fn load(path: &Path) -> Result<Self> {
        let mut model = CModule::load_on_device(path, Device::Cpu)
            .with_context(|| format!("failed to load TorchScript model {path:?}"))?;
        model.set_eval();

        Ok(TorchBackend {
            path: path.to_path_buf(),
            model: Mutex::new(model),
        })
    }
}

impl Debug for TorchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TorchBackend {{ path: {:?} }}", self.path)
    }
}

impl Backend for TorchBackend {
    fn name(&self) -> &'static str {
        "torch"
    }

    fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let [n, a, b, c] = input.shape().map(|d| d as i64);
        let tensor = Tensor::from_slice(input.as_slice()).view([n, a, b, c]);

        let model = self
            .model
            .lock()
            .map_err(|_| anyhow!("torch model lock poisoned"))?;
        let output = no_grad(|| model.forward_ts(&[tensor]))?;
        drop(model);

        let scores = output.to_kind(Kind::Float).view([-1]);
        Ok(Vec::<f32>::try_from(&scores)?)
    }
}
