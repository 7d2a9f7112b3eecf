//! Service configuration. Built-in defaults, overridden by an optional TOML
//! file, overridden by `BRISTOL_`-prefixed environment variables

use crate::inference::{BackendKind, OutputKind};
use crate::preprocess::{ResizeFilter, TensorLayout};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default tracing filter when `RUST_LOG` is unset
pub const RUST_LOG: &str = "bristol_classifier=info,actix_web=info";

/// Config file read from the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "bristol.toml";

/// Prefix of environment overrides, e.g. `BRISTOL_SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "BRISTOL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub upload: UploadSettings,
    pub preprocess: PreprocessSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".into(),
            port: 5000,
            max_upload_mb: 10,
        }
    }
}

impl ServerSettings {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Multipart field that carries the image
    pub field_name: String,
    pub allowed_extensions: Vec<String>,
    pub scratch_dir: PathBuf,
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            field_name: "file".into(),
            allowed_extensions: vec!["jpeg".into(), "jpg".into(), "png".into()],
            scratch_dir: PathBuf::from("./scratch"),
        }
    }
}

/// The fixed transform from a decoded image to the model's input tensor.
/// Sizes are `[height, width]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Canonical input size of the model
    pub image_size: [u32; 2],
    /// Resize to this first and center-crop down to `image_size`
    pub resize_size: Option<[u32; 2]>,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Applied to raw 0-255 channel values before normalization
    pub pixel_scale: f32,
    pub layout: TensorLayout,
    pub filter: ResizeFilter,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        // The Keras model rescales internally, so it takes raw pixels
        PreprocessSettings {
            image_size: [180, 180],
            resize_size: None,
            mean: [0.0; 3],
            std: [1.0; 3],
            pixel_scale: 1.0,
            layout: TensorLayout::Nhwc,
            filter: ResizeFilter::Nearest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub backend: BackendKind,
    /// Path to the frozen model artifact
    pub path: PathBuf,
    pub output: OutputKind,
    pub timeout_ms: u64,
    /// Run a warm-up prediction at startup and check the output width
    pub verify_on_start: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        ModelSettings {
            backend: BackendKind::Onnx,
            path: PathBuf::from("./bristol-model/bristol-model.onnx"),
            output: OutputKind::Logits,
            timeout_ms: 10_000,
            verify_on_start: true,
        }
    }
}

impl ModelSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Settings {
    /// Load the layered configuration. With no explicit file, `bristol.toml`
    /// is read if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would only fail later, mid-request
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.server.max_upload_mb > 0,
            "server.max_upload_mb must be positive"
        );
        anyhow::ensure!(
            !self.upload.field_name.is_empty(),
            "upload.field_name must not be empty"
        );
        anyhow::ensure!(
            !self.upload.allowed_extensions.is_empty(),
            "upload.allowed_extensions must not be empty"
        );
        anyhow::ensure!(self.model.timeout_ms > 0, "model.timeout_ms must be positive");

        let pre = &self.preprocess;
        anyhow::ensure!(
            pre.image_size.iter().all(|&d| d > 0),
            "preprocess.image_size must be positive"
        );
        if let Some(resize) = pre.resize_size {
            anyhow::ensure!(
                resize[0] >= pre.image_size[0] && resize[1] >= pre.image_size[1],
                "preprocess.resize_size {:?} is smaller than image_size {:?}",
                resize,
                pre.image_size
            );
        }
        anyhow::ensure!(
            pre.std.iter().all(|s| s.is_finite() && *s != 0.0),
            "preprocess.std must be finite and non-zero"
        );
        anyhow::ensure!(
            pre.pixel_scale.is_finite() && pre.pixel_scale > 0.0,
            "preprocess.pixel_scale must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test::scratch_dir;
    use std::fs;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.preprocess.image_size, [180, 180]);
        assert_eq!(settings.upload.allowed_extensions, ["jpeg", "jpg", "png"]);
        assert_eq!(settings.model.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_file() {
        let dir = scratch_dir();
        let path = dir.join("bristol.toml");
        fs::write(
            &path,
            r#"
            [upload]
            allowed_extensions = ["png"]

            [preprocess]
            image_size = [224, 224]
            resize_size = [256, 256]
            mean = [0.485, 0.456, 0.406]
            std = [0.229, 0.224, 0.225]
            pixel_scale = 0.00392156862745098
            layout = "nchw"
            filter = "triangle"

            [model]
            backend = "onnx"
            output = "probabilities"
            "#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.upload.allowed_extensions, ["png"]);
        assert_eq!(settings.upload.field_name, "file");
        assert_eq!(settings.preprocess.resize_size, Some([256, 256]));
        assert_eq!(settings.preprocess.layout, TensorLayout::Nchw);
        assert_eq!(settings.preprocess.filter, ResizeFilter::Triangle);
        assert_eq!(settings.model.output, OutputKind::Probabilities);
        assert_eq!(settings.server.port, 5000);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = Settings::default();
        settings.preprocess.resize_size = Some([100, 100]);
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.preprocess.std = [1.0, 0.0, 1.0];
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.upload.allowed_extensions.clear();
        assert!(settings.validate().is_err());
    }
}
