//! Attribution maps reduced to a single channel, rescaled to [0, 1] and colored.

use burn::prelude::*;
use image::{Rgb, RgbImage};

use crate::{
    error::{ExplainError, Result},
    preprocess::to_vec,
};

/// Viridis colormap anchors, evenly spaced over [0, 1].
const VIRIDIS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [71, 44, 122],
    [59, 81, 139],
    [44, 113, 142],
    [33, 144, 141],
    [39, 173, 129],
    [92, 200, 99],
    [170, 220, 50],
    [253, 231, 37],
];

/// Reduce the first attribution map of a `[B, C, H, W]` batch to `[H, W]` with the maximum
/// absolute value over the channels.
pub fn reduce_channels<B: Backend>(attribution: Tensor<B, 4>) -> Tensor<B, 2> {
    let [_, channels, height, width] = attribution.dims();

    attribution
        .slice([0..1, 0..channels, 0..height, 0..width])
        .abs()
        .max_dim(1)
        .reshape([height, width])
}

/// Min-max rescale `values` in place so the minimum maps to 0 and the maximum to 1.
///
/// A constant map (or one whose range is not finite) has no meaningful scale and becomes all
/// zeros.
pub fn normalize(values: &mut [f32]) {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &value| {
            (min.min(value), max.max(value))
        });
    let range = max - min;

    if !(range.is_finite() && range > 0.0) {
        tracing::debug!("Degenerate attribution map (min {min}, max {max}), using zeros");
        values.fill(0.0);
        return;
    }

    for value in values.iter_mut() {
        *value = (*value - min) / range;
    }
}

/// Single channel attribution map in [0, 1], stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl Heatmap {
    pub fn new(width: u32, height: u32, mut values: Vec<f32>) -> Result<Self> {
        if values.len() != width as usize * height as usize {
            return Err(ExplainError::Tensor(format!(
                "expected {} heatmap values, got {}",
                width as usize * height as usize,
                values.len()
            )));
        }
        normalize(&mut values);

        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// Reduce and normalize an attribution map `[1, C, H, W]`.
    pub fn from_attribution<B: Backend>(attribution: Tensor<B, 4>) -> Result<Self> {
        let [_, _, height, width] = attribution.dims();
        let values = to_vec(reduce_channels(attribution))?;

        Self::new(width as u32, height as u32, values)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Color the map with the viridis colormap.
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            viridis(self.values[(y * self.width + x) as usize])
        })
    }
}

/// Viridis color of `value`, clamped to [0, 1], interpolated linearly between the anchors.
pub fn viridis(value: f32) -> Rgb<u8> {
    let value = if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    };
    let position = value * (VIRIDIS.len() - 1) as f32;
    let lower = (position.floor() as usize).min(VIRIDIS.len() - 2);
    let t = position - lower as f32;

    let [low, high] = [VIRIDIS[lower], VIRIDIS[lower + 1]];
    Rgb(core::array::from_fn(|c| {
        (low[c] as f32 + (high[c] as f32 - low[c] as f32) * t).round() as u8
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn normalize_maps_extremes_to_unit_range() {
        let mut values = vec![-2.0, 0.0, 6.0, 2.0];

        normalize(&mut values);

        assert_eq!(values, vec![0.0, 0.25, 1.0, 0.5]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut values = vec![3.0, 7.5, 1.0, 4.25];
        normalize(&mut values);
        let once = values.clone();

        normalize(&mut values);

        assert_eq!(values, once);
    }

    #[test]
    fn constant_map_becomes_zeros() {
        let mut zeros = vec![0.0; 6];
        let mut constant = vec![0.7; 4];

        normalize(&mut zeros);
        normalize(&mut constant);

        assert!(zeros.iter().all(|v| *v == 0.0));
        assert!(constant.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn reduce_channels_takes_max_absolute_value() {
        let device = Default::default();
        // 2 channels of 1x2 pixels
        let attribution = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, -4.0, -3.0, 2.0], [1, 2, 1, 2]),
            &device,
        );

        let reduced = reduce_channels(attribution);

        assert_eq!(reduced.dims(), [1, 2]);
        assert_eq!(to_vec(reduced).unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn heatmap_from_attribution_is_normalized() {
        let device = Default::default();
        let attribution = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(
                (0..27).map(|i| i as f32 - 13.0).collect::<Vec<_>>(),
                [1, 3, 3, 3],
            ),
            &device,
        );

        let heatmap = Heatmap::from_attribution(attribution).unwrap();

        assert_eq!((heatmap.width(), heatmap.height()), (3, 3));
        let min = heatmap.values().iter().cloned().fold(f32::INFINITY, f32::min);
        let max = heatmap.values().iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_eq!((min, max), (0.0, 1.0));
    }

    #[test]
    fn heatmap_rejects_mismatched_size() {
        assert!(Heatmap::new(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn viridis_endpoints() {
        assert_eq!(viridis(0.0), Rgb([68, 1, 84]));
        assert_eq!(viridis(1.0), Rgb([253, 231, 37]));
        assert_eq!(viridis(0.5), Rgb([33, 144, 141]));
        assert_eq!(viridis(f32::NAN), Rgb([68, 1, 84]));
    }

    #[test]
    fn to_rgb_colors_every_pixel() {
        let heatmap = Heatmap::new(2, 1, vec![0.0, 1.0]).unwrap();

        let image = heatmap.to_rgb();

        assert_eq!(image.get_pixel(0, 0), &Rgb([68, 1, 84]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([253, 231, 37]));
    }
}
