//! The request pipeline: gatekeeper, scratch file, preprocessing, inference
//! and result mapping, wired together once at startup.

use crate::config::Settings;
use crate::error::{ClassifyError, Result};
use crate::inference::{InferenceEngine, PredictionResult};
use crate::mapper::{self, ClassificationResponse};
use crate::preprocess::Preprocessor;
use crate::registry::ClassRegistry;
use crate::scratch::{DiskScratchStore, ScratchLease, ScratchStore};
use crate::upload::{UploadGate, UploadedImage};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinError};
use tokio::time;
use tracing::{info, instrument};

/// Classifies uploaded images. Cheap to share: everything inside is either
/// immutable or behind an `Arc`.
pub struct Classifier {
    gate: UploadGate,
    store: Arc<dyn ScratchStore>,
    preprocessor: Arc<Preprocessor>,
    engine: InferenceEngine,
    registry: ClassRegistry,
    timeout: Duration,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("gate", &self.gate)
            .field("preprocessor", &self.preprocessor)
            .field("engine", &self.engine)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Classifier {
    pub fn new(
        gate: UploadGate,
        store: Arc<dyn ScratchStore>,
        preprocessor: Preprocessor,
        engine: InferenceEngine,
        registry: ClassRegistry,
        timeout: Duration,
    ) -> Self {
        Classifier {
            gate,
            store,
            preprocessor: Arc::new(preprocessor),
            engine,
            registry,
            timeout,
        }
    }

    /// Build the pipeline described by `settings`, loading the model
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let preprocessor = Preprocessor::new(&settings.preprocess);
        let engine = InferenceEngine::load(&settings.model, preprocessor.input_shape())?;
        let store = DiskScratchStore::new(&settings.upload.scratch_dir)?;

        let classifier = Classifier::new(
            UploadGate::from_settings(&settings.upload),
            Arc::new(store),
            preprocessor,
            engine,
            ClassRegistry::bristol(),
            settings.model.timeout(),
        );
        if settings.model.verify_on_start {
            classifier.verify()?;
        }
        Ok(classifier)
    }

    pub fn gate(&self) -> &UploadGate {
        &self.gate
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Probe the model with a blank image and check that it scores exactly
    /// the classes in the registry
    pub fn verify(&self) -> anyhow::Result<()> {
        let probe = self.preprocessor.blank();

        let prediction = self
            .engine
            .predict(&probe)
            .context("warm-up prediction failed")?;
        anyhow::ensure!(
            prediction.probabilities.len() == self.registry.len(),
            "model scores {} classes but the registry has {}",
            prediction.probabilities.len(),
            self.registry.len()
        );
        info!(
            "verified {} backend against {} classes",
            self.engine.backend_name(),
            self.registry.len()
        );
        Ok(())
    }

    /// Classify an accepted upload. File IO, decoding and inference run on
    /// the blocking pool; inference is bounded by the configured timeout.
    #[instrument(skip(self))]
    pub async fn classify(&self, upload: UploadedImage) -> Result<ClassificationResponse> {
        let store = Arc::clone(&self.store);
        let preprocessor = Arc::clone(&self.preprocessor);
        let (lease, tensor) = task::spawn_blocking(move || -> Result<_> {
            let lease = ScratchLease::acquire(store, &upload)?;
            let tensor = preprocessor.transform(lease.file())?;
            Ok((lease, tensor))
        })
        .await
        .map_err(aborted)??;

        let engine = self.engine.clone();
        let prediction =
            time::timeout(self.timeout, task::spawn_blocking(move || engine.predict(&tensor)))
                .await
                .map_err(|_| ClassifyError::InferenceTimeout(self.timeout))?
                .map_err(aborted)??;
        drop(lease);

        self.respond(&prediction)
    }

    /// Same stages as [`Classifier::classify`] on the calling thread, without
    /// the timeout
    #[instrument(skip(self))]
    pub fn classify_blocking(&self, upload: UploadedImage) -> Result<ClassificationResponse> {
        let lease = ScratchLease::acquire(Arc::clone(&self.store), &upload)?;
        let tensor = self.preprocessor.transform(lease.file())?;
        let prediction = self.engine.predict(&tensor)?;
        drop(lease);

        self.respond(&prediction)
    }

    fn respond(&self, prediction: &PredictionResult) -> Result<ClassificationResponse> {
        let response = mapper::map(&self.registry, prediction)?;
        info!(
            "image most likely belongs to {} with a {:.2} percent confidence",
            response.descriptor.label, response.confidence_percent
        );
        Ok(response)
    }
}

fn aborted(err: JoinError) -> ClassifyError {
    ClassifyError::Aborted(err.to_string())
}
