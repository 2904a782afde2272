use std::path::Path;

use burn::{
    config::Config,
    prelude::*,
    tensor::{Element, TensorData},
};
use image::{imageops::FilterType, DynamicImage, RgbImage};

use crate::error::{self, ensure_exists, ExplainError};

// ImageNet mean and std values
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Image preprocessing configuration.
#[derive(Config, Debug)]
pub struct PreprocessConfig {
    /// Length of the shorter image side after resizing.
    #[config(default = 256)]
    pub resize: u32,
    /// Side of the square center crop taken after resizing.
    #[config(default = 224)]
    pub crop: u32,
}

/// Normalizer with ImageNet values, the pretrained classifiers expect their input in this
/// normalized range.
#[derive(Clone)]
pub struct Normalizer<B: Backend> {
    pub mean: Tensor<B, 4>,
    pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
    /// Creates a new normalizer.
    pub fn new(device: &Device<B>) -> Self {
        let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, device).reshape([1, 3, 1, 1]);
        Self { mean, std }
    }

    /// Normalizes the input image according to the ImageNet dataset.
    ///
    /// The input image should be in the range [0, 1].
    ///
    /// The normalization is done according to the following formula:
    /// `input = (input - mean) / std`
    pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        (input - self.mean.clone()) / self.std.clone()
    }

    /// Inverse of [normalize](Normalizer::normalize), maps a model input back to the [0, 1]
    /// display range.
    ///
    /// `input = input * std + mean`
    pub fn denormalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        input * self.std.clone() + self.mean.clone()
    }
}

/// Decodes image files into model inputs: shorter side resized, center crop, [0, 1] range.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    resize: u32,
    crop: u32,
}

impl ImagePreprocessor {
    pub fn new(config: &PreprocessConfig) -> error::Result<Self> {
        if config.crop == 0 || config.crop > config.resize {
            return Err(ExplainError::Config(format!(
                "crop size {} must be in [1, {}]",
                config.crop, config.resize
            )));
        }

        Ok(Self {
            resize: config.resize,
            crop: config.crop,
        })
    }

    /// Open the image at `path` and return the resized and cropped RGB pixels.
    pub fn open(&self, path: &Path) -> error::Result<RgbImage> {
        ensure_exists(path)?;
        let image = image::open(path)?;

        Ok(self.resize_and_crop(image))
    }

    /// Resize so the shorter side equals the resize length, then take the center crop.
    pub fn resize_and_crop(&self, image: DynamicImage) -> RgbImage {
        let (width, height) = (image.width(), image.height());
        let (width, height) = if width <= height {
            (self.resize, scale_side(self.resize, height, width))
        } else {
            (scale_side(self.resize, width, height), self.resize)
        };

        let resized = image.resize_exact(
            width,
            height,
            FilterType::Triangle, // also known as bilinear in 2D
        );

        let left = crop_offset(width, self.crop);
        let top = crop_offset(height, self.crop);
        resized.crop_imm(left, top, self.crop, self.crop).into_rgb8()
    }

    /// Open, resize, crop and normalize the image at `path` into a `[1, 3, crop, crop]` input.
    pub fn load<B: Backend>(
        &self,
        path: &Path,
        normalizer: &Normalizer<B>,
        device: &Device<B>,
    ) -> error::Result<Tensor<B, 4>> {
        let image = self.open(path)?;
        let (width, height) = (image.width() as usize, image.height() as usize);
        let tensor = to_tensor(image.into_raw(), [height, width, 3], device).unsqueeze::<4>(); // [B, C, H, W]

        Ok(normalizer.normalize(tensor))
    }
}

/// Longer side after resizing the shorter one to `size`, truncated like torchvision.
fn scale_side(size: u32, long: u32, short: u32) -> u32 {
    (size as u64 * long as u64 / short.max(1) as u64) as u32
}

fn crop_offset(size: u32, crop: u32) -> u32 {
    ((size.saturating_sub(crop)) as f64 / 2.0).round_ties_even() as u32
}

pub fn to_tensor<B: Backend, T: Element>(
    data: Vec<T>,
    shape: [usize; 3],
    device: &Device<B>,
) -> Tensor<B, 3> {
    Tensor::<B, 3>::from_data(TensorData::new(data, shape).convert::<B::FloatElem>(), device)
        // [H, W, C] -> [C, H, W]
        .permute([2, 0, 1])
        / 255 // normalize between [0, 1]
}

/// Copy a float tensor to host memory as `f32` values.
pub(crate) fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> error::Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| ExplainError::Tensor(format!("{err:?}")))
}

/// Convert the first image of a `[B, 3, H, W]` tensor in [0, 1] range into 8-bit RGB pixels.
///
/// Values outside of [0, 1] are clamped.
pub fn to_rgb_image<B: Backend>(image: Tensor<B, 4>) -> error::Result<RgbImage> {
    let [_, channels, height, width] = image.dims();
    if channels != 3 {
        return Err(ExplainError::InvalidSample(format!(
            "expected an RGB image with 3 channels, got {channels}"
        )));
    }

    let pixels = image
        .slice([0..1, 0..channels, 0..height, 0..width])
        .reshape([channels, height, width])
        .permute([1, 2, 0]); // [H, W, C]
    let pixels = to_vec(pixels)?
        .into_iter()
        .map(|value| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect::<Vec<_>>();

    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| ExplainError::Tensor("pixel buffer does not match image size".into()))
}
