//! Turns a scratch file into the single-image batch the model expects. The
//! transform is fixed at startup and deterministic: no randomness, no
//! augmentation.

use crate::config::PreprocessSettings;
use crate::error::{ClassifyError, Result};
use crate::scratch::ScratchFile;
use image::imageops::FilterType;
use image::{io::Reader as ImageReader, DynamicImage, ImageError, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Memory order of the input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, 3, H, W]`, channel-first (torchvision, most ONNX exports)
    Nchw,
    /// `[1, H, W, 3]`, channel-last (Keras)
    Nhwc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> FilterType {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// A batch of exactly one normalized RGB image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
    layout: TensorLayout,
}

impl ImageTensor {
    pub const CHANNELS: usize = 3;

    /// An all-zero batch, used to probe the model at startup
    pub fn zeros(height: usize, width: usize, layout: TensorLayout) -> Self {
        ImageTensor {
            data: vec![0.0; Self::CHANNELS * height * width],
            height,
            width,
            layout,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        shape_of(self.height, self.width, self.layout)
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Value of channel `c` at pixel `(x, y)`
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[offset(self.layout, self.height, self.width, c, y, x)]
    }
}

fn shape_of(height: usize, width: usize, layout: TensorLayout) -> [usize; 4] {
    match layout {
        TensorLayout::Nchw => [1, ImageTensor::CHANNELS, height, width],
        TensorLayout::Nhwc => [1, height, width, ImageTensor::CHANNELS],
    }
}

fn offset(layout: TensorLayout, height: usize, width: usize, c: usize, y: usize, x: usize) -> usize {
    match layout {
        TensorLayout::Nchw => (c * height + y) * width + x,
        TensorLayout::Nhwc => (y * width + x) * ImageTensor::CHANNELS + c,
    }
}

/// The configured image transform
#[derive(Debug, Clone)]
pub struct Preprocessor {
    /// `(height, width)` of the tensor
    size: (u32, u32),
    /// `(height, width)` to resize to before the center crop
    resize: Option<(u32, u32)>,
    mean: [f32; 3],
    std: [f32; 3],
    scale: f32,
    layout: TensorLayout,
    filter: FilterType,
}

impl Preprocessor {
    pub fn new(settings: &PreprocessSettings) -> Self {
        let [height, width] = settings.image_size;
        Preprocessor {
            size: (height, width),
            // resizing to the canonical size needs no crop
            resize: settings
                .resize_size
                .map(|[h, w]| (h, w))
                .filter(|&resize| resize != (height, width)),
            mean: settings.mean,
            std: settings.std,
            scale: settings.pixel_scale,
            layout: settings.layout,
            filter: settings.filter.into(),
        }
    }

    /// Shape of every tensor this preprocessor produces
    pub fn input_shape(&self) -> [usize; 4] {
        shape_of(self.size.0 as usize, self.size.1 as usize, self.layout)
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    /// An all-zero tensor of the configured shape
    pub fn blank(&self) -> ImageTensor {
        ImageTensor::zeros(self.size.0 as usize, self.size.1 as usize, self.layout)
    }

    /// Decode a scratch file and convert it to a tensor batch
    pub fn transform(&self, file: &ScratchFile) -> Result<ImageTensor> {
        let image = decode(&file.path)?;
        Ok(self.tensorize(&image))
    }

    /// Convert an already decoded image to a tensor batch
    pub fn tensorize(&self, image: &DynamicImage) -> ImageTensor {
        let rgb = self.resize_and_crop(image);
        let (height, width) = (self.size.0 as usize, self.size.1 as usize);

        let mut tensor = ImageTensor::zeros(height, width, self.layout);
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..ImageTensor::CHANNELS {
                let value = f32::from(pixel[c]) * self.scale;
                let i = offset(self.layout, height, width, c, y as usize, x as usize);
                tensor.data[i] = (value - self.mean[c]) / self.std[c];
            }
        }
        tensor
    }

    fn resize_and_crop(&self, image: &DynamicImage) -> RgbImage {
        let (height, width) = self.size;
        match self.resize {
            None => image.resize_exact(width, height, self.filter).to_rgb8(),
            Some((resize_h, resize_w)) => {
                let resized = image.resize_exact(resize_w, resize_h, self.filter);
                let x = resize_w.saturating_sub(width) / 2;
                let y = resize_h.saturating_sub(height) / 2;
                resized.crop_imm(x, y, width, height).to_rgb8()
            }
        }
    }
}

/// Decode an image, sniffing the format from its content
pub fn decode(path: &Path) -> Result<DynamicImage> {
    let read_error = |source: std::io::Error| ClassifyError::Read {
        path: path.to_path_buf(),
        source,
    };

    let reader = ImageReader::open(path)
        .map_err(read_error)?
        .with_guessed_format()
        .map_err(read_error)?;

    reader.decode().map_err(|e| match e {
        ImageError::IoError(source) => read_error(source),
        e => ClassifyError::Decode(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::{DiskScratchStore, ScratchStore};
    use crate::upload::UploadedImage;
    use crate::util::test::{jpeg_bytes, png_bytes, scratch_dir, solid_image};
    use image::{GrayImage, Luma};
    use std::fs;

    fn persist(store: &DiskScratchStore, bytes: Vec<u8>, extension: &str) -> ScratchFile {
        store
            .persist(&UploadedImage {
                bytes,
                original_filename: format!("upload.{extension}"),
                extension: extension.into(),
            })
            .unwrap()
    }

    fn imagenet() -> PreprocessSettings {
        PreprocessSettings {
            image_size: [224, 224],
            resize_size: Some([256, 256]),
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            pixel_scale: 1.0 / 255.0,
            layout: TensorLayout::Nchw,
            filter: ResizeFilter::Triangle,
        }
    }

    #[test]
    fn test_default_shape() {
        let dir = scratch_dir();
        let store = DiskScratchStore::new(&dir).unwrap();
        let file = persist(&store, jpeg_bytes(500, 500), "jpeg");

        let pre = Preprocessor::new(&PreprocessSettings::default());
        let tensor = pre.transform(&file).unwrap();
        assert_eq!(tensor.shape(), [1, 180, 180, 3]);
        assert_eq!(tensor.shape(), pre.input_shape());
        assert!(tensor.as_slice().iter().all(|v| (0.0..=255.0).contains(v)));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_deterministic() {
        let dir = scratch_dir();
        let store = DiskScratchStore::new(&dir).unwrap();
        let bytes = jpeg_bytes(320, 240);
        let first = persist(&store, bytes.clone(), "jpg");
        let second = persist(&store, bytes, "jpg");

        for settings in [PreprocessSettings::default(), imagenet()] {
            let pre = Preprocessor::new(&settings);
            let a = pre.transform(&first).unwrap();
            let b = pre.transform(&first).unwrap();
            let c = pre.transform(&second).unwrap();
            assert_eq!(a, b);
            assert_eq!(a, c);
        }

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_normalization_and_crop() {
        let pre = Preprocessor::new(&imagenet());
        let image = DynamicImage::ImageRgb8(solid_image(300, 400, [255, 0, 128]));
        let tensor = pre.tensorize(&image);

        assert_eq!(tensor.shape(), [1, 3, 224, 224]);
        let expected = [
            (1.0 - 0.485) / 0.229,
            (0.0 - 0.456) / 0.224,
            (128.0 / 255.0 - 0.406) / 0.225,
        ];
        for (c, want) in expected.iter().enumerate() {
            for (y, x) in [(0, 0), (111, 57), (223, 223)] {
                assert!((tensor.get(c, y, x) - want).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_layouts_agree() {
        let image = DynamicImage::ImageRgb8(crate::util::test::gradient_image(64, 48));
        let nhwc = Preprocessor::new(&PreprocessSettings {
            image_size: [32, 32],
            ..PreprocessSettings::default()
        })
        .tensorize(&image);
        let nchw = Preprocessor::new(&PreprocessSettings {
            image_size: [32, 32],
            layout: TensorLayout::Nchw,
            ..PreprocessSettings::default()
        })
        .tensorize(&image);

        assert_eq!(nhwc.shape(), [1, 32, 32, 3]);
        assert_eq!(nchw.shape(), [1, 3, 32, 32]);
        for c in 0..3 {
            for y in 0..32 {
                for x in 0..32 {
                    assert_eq!(nhwc.get(c, y, x), nchw.get(c, y, x));
                }
            }
        }
    }

    #[test]
    fn test_grayscale_becomes_rgb() {
        let pre = Preprocessor::new(&PreprocessSettings::default());
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([77])));
        let tensor = pre.tensorize(&gray);
        assert!(tensor.as_slice().iter().all(|&v| v == 77.0));
    }

    #[test]
    fn test_png_content_with_jpeg_extension() {
        let dir = scratch_dir();
        let store = DiskScratchStore::new(&dir).unwrap();
        let file = persist(&store, png_bytes(40, 40), "jpeg");

        let pre = Preprocessor::new(&PreprocessSettings::default());
        assert!(pre.transform(&file).is_ok());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_decode_error() {
        let dir = scratch_dir();
        let store = DiskScratchStore::new(&dir).unwrap();
        let file = persist(&store, b"definitely not a jpeg".to_vec(), "jpeg");

        let pre = Preprocessor::new(&PreprocessSettings::default());
        match pre.transform(&file) {
            Err(err @ ClassifyError::Decode(_)) => assert!(err.is_client_error()),
            other => panic!("expected Decode error, got {other:?}"),
        }
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let dir = scratch_dir();
        let file = ScratchFile {
            path: dir.join("gone.jpeg"),
            id: uuid::Uuid::new_v4(),
            extension: "jpeg".into(),
        };
        let pre = Preprocessor::new(&PreprocessSettings::default());
        assert!(matches!(pre.transform(&file), Err(ClassifyError::Read { .. })));
        fs::remove_dir_all(dir).unwrap();
    }
}
