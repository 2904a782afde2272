use std::path::PathBuf;

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig,
    },
    record::{FullPrecisionSettings, Recorder, RecorderError},
    tensor::{backend::Backend, Device, Tensor},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use super::{
    conv::{BasicConv2d, BasicConv2dConfig},
    inception::{pad_for_ceil_mode, Inception, InceptionConfig},
    Classifier,
};
use crate::preprocess::{MEAN, STD};

#[cfg(feature = "pretrained")]
use super::weights::{self, WeightsMeta};

// Inception block configs (in, 1x1, 3x3 reduce, 3x3, 5x5 reduce, 5x5, pool proj)
const INCEPTION_3A: [usize; 7] = [192, 64, 96, 128, 16, 32, 32];
const INCEPTION_3B: [usize; 7] = [256, 128, 128, 192, 32, 96, 64];
const INCEPTION_4A: [usize; 7] = [480, 192, 96, 208, 16, 48, 64];
const INCEPTION_4B: [usize; 7] = [512, 160, 112, 224, 24, 64, 64];
const INCEPTION_4C: [usize; 7] = [512, 128, 128, 256, 24, 64, 64];
const INCEPTION_4D: [usize; 7] = [512, 112, 144, 288, 32, 64, 64];
const INCEPTION_4E: [usize; 7] = [528, 256, 160, 320, 32, 128, 128];
const INCEPTION_5A: [usize; 7] = [832, 256, 160, 320, 32, 128, 128];
const INCEPTION_5B: [usize; 7] = [832, 384, 192, 384, 48, 128, 128];

/// GoogLeNet (Inception v1) implementation, inference only.
/// Derived from [torchvision.models.googlenet.GoogLeNet](https://github.com/pytorch/vision/blob/main/torchvision/models/googlenet.py)
///
/// The auxiliary classifiers and the dropout before the last layer are only active during
/// training and are left out.
#[derive(Module, Debug)]
pub struct GoogLeNet<B: Backend> {
    conv1: BasicConv2d<B>,
    maxpool1: MaxPool2d,
    conv2: BasicConv2d<B>,
    conv3: BasicConv2d<B>,
    maxpool2: MaxPool2d,
    inception3a: Inception<B>,
    inception3b: Inception<B>,
    maxpool3: MaxPool2d,
    inception4a: Inception<B>,
    inception4b: Inception<B>,
    inception4c: Inception<B>,
    inception4d: Inception<B>,
    inception4e: Inception<B>,
    maxpool4: MaxPool2d,
    inception5a: Inception<B>,
    inception5b: Inception<B>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> GoogLeNet<B> {
    /// Class logits for ImageNet-normalized images.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let out = Self::transform_input(input);

        // Stem; ceil mode pools emulated with extra bottom/right padding
        let out = self.conv1.forward(out);
        let out = self.maxpool1.forward(pad_for_ceil_mode(out, 3, 2, 0));
        let out = self.conv2.forward(out);
        let out = self.conv3.forward(out);
        let out = self.maxpool2.forward(pad_for_ceil_mode(out, 3, 2, 0));

        let out = self.inception3a.forward(out);
        let out = self.inception3b.forward(out);
        let out = self.maxpool3.forward(pad_for_ceil_mode(out, 3, 2, 0));

        let out = self.inception4a.forward(out);
        let out = self.inception4b.forward(out);
        let out = self.inception4c.forward(out);
        let out = self.inception4d.forward(out);
        let out = self.inception4e.forward(out);
        let out = self.maxpool4.forward(pad_for_ceil_mode(out, 2, 2, 0));

        let out = self.inception5a.forward(out);
        let out = self.inception5b.forward(out);

        let out = self.avgpool.forward(out);
        // Reshape [B, 1024, 1, 1] -> [B, 1024]
        let out = out.flatten(1, 3);

        self.fc.forward(out)
    }

    /// The released weights were trained on inputs scaled to [-1, 1], map the ImageNet
    /// normalization to that range.
    fn transform_input(input: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = input.device();
        let scale = STD.map(|std| std / 0.5);
        let shift = MEAN.map(|mean| (mean - 0.5) / 0.5);
        let scale = Tensor::<B, 1>::from_floats(scale, &device).reshape([1, 3, 1, 1]);
        let shift = Tensor::<B, 1>::from_floats(shift, &device).reshape([1, 3, 1, 1]);

        input * scale + shift
    }

    /// GoogLeNet from [`Going Deeper with Convolutions`](https://arxiv.org/abs/1409.4842).
    ///
    /// # Arguments
    ///
    /// * `num_classes`: Number of output classes of the model.
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// A GoogLeNet module.
    pub fn googlenet(num_classes: usize, device: &Device<B>) -> Self {
        GoogLeNetConfig::new(num_classes).init(device)
    }

    /// GoogLeNet from [`Going Deeper with Convolutions`](https://arxiv.org/abs/1409.4842)
    /// with pre-trained weights.
    ///
    /// # Arguments
    ///
    /// * `weights`: Pre-trained weights to load.
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// A GoogLeNet module with pre-trained weights.
    #[cfg(feature = "pretrained")]
    pub fn googlenet_pretrained(
        weights: weights::GoogLeNet,
        device: &Device<B>,
    ) -> Result<Self, RecorderError> {
        let weights = weights.weights();
        // Download torch weights
        let torch_weights = weights.download().map_err(|err| {
            RecorderError::Unknown(format!("Could not download weights.\nError: {err}"))
        })?;

        Self::from_torch_weights(torch_weights, weights.num_classes, device)
    }

    /// GoogLeNet with the weights of a torchvision `state_dict` file.
    pub fn from_torch_weights(
        path: impl Into<PathBuf>,
        num_classes: usize,
        device: &Device<B>,
    ) -> Result<Self, RecorderError> {
        // Map *.branch4.1.* -> *.branch4.* (the pool has no parameters)
        let load_args = LoadArgs::new(path.into())
            .with_key_remap("(.+)\\.branch4\\.1\\.(.+)", "$1.branch4.$2");
        let record: GoogLeNetRecord<B> =
            PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)?;

        Ok(Self::googlenet(num_classes, device).load_record(record))
    }
}

impl<B: Backend> Classifier<B> for GoogLeNet<B> {
    fn logits(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(input)
    }

    fn num_classes(&self) -> usize {
        let [_d_input, d_output] = self.fc.weight.dims();
        d_output
    }
}

fn inception_block<B: Backend>(config: [usize; 7], device: &Device<B>) -> Inception<B> {
    let [in_channels, ch1x1, ch3x3_reduce, ch3x3, ch5x5_reduce, ch5x5, pool_proj] = config;
    InceptionConfig::new(
        in_channels,
        ch1x1,
        ch3x3_reduce,
        ch3x3,
        ch5x5_reduce,
        ch5x5,
        pool_proj,
    )
    .init(device)
}

/// [GoogLeNet](GoogLeNet) configuration.
struct GoogLeNetConfig {
    num_classes: usize,
}

impl GoogLeNetConfig {
    fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }

    /// Initialize a new [GoogLeNet](GoogLeNet) module.
    fn init<B: Backend>(self, device: &Device<B>) -> GoogLeNet<B> {
        let inception = |config: [usize; 7]| inception_block(config, device);
        // 3x3 max pool, /2 (2x2 before the last stage)
        let maxpool = |kernel: usize| {
            MaxPool2dConfig::new([kernel, kernel])
                .with_strides([2, 2])
                .init()
        };

        GoogLeNet {
            // 7x7 conv, 64, /2
            conv1: BasicConv2dConfig::new(3, 64, 7)
                .with_stride(2)
                .with_padding(3)
                .init(device),
            maxpool1: maxpool(3),
            conv2: BasicConv2dConfig::new(64, 64, 1).init(device),
            conv3: BasicConv2dConfig::new(64, 192, 3)
                .with_padding(1)
                .init(device),
            maxpool2: maxpool(3),
            inception3a: inception(INCEPTION_3A),
            inception3b: inception(INCEPTION_3B),
            maxpool3: maxpool(3),
            inception4a: inception(INCEPTION_4A),
            inception4b: inception(INCEPTION_4B),
            inception4c: inception(INCEPTION_4C),
            inception4d: inception(INCEPTION_4D),
            inception4e: inception(INCEPTION_4E),
            maxpool4: maxpool(2),
            inception5a: inception(INCEPTION_5A),
            inception5b: inception(INCEPTION_5B),
            // Average pooling [B, 1024, H, W] -> [B, 1024, 1, 1]
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(1024, self.num_classes).init(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::Normalizer;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn inception_channels_chain() {
        let stages = [
            INCEPTION_3A,
            INCEPTION_3B,
            INCEPTION_4A,
            INCEPTION_4B,
            INCEPTION_4C,
            INCEPTION_4D,
            INCEPTION_4E,
            INCEPTION_5A,
            INCEPTION_5B,
        ];
        for pair in stages.windows(2) {
            let [_, ch1x1, _, ch3x3, _, ch5x5, pool_proj] = pair[0];
            assert_eq!(ch1x1 + ch3x3 + ch5x5 + pool_proj, pair[1][0]);
        }
        let [_, ch1x1, _, ch3x3, _, ch5x5, pool_proj] = INCEPTION_5B;
        assert_eq!(ch1x1 + ch3x3 + ch5x5 + pool_proj, 1024);
    }

    #[test]
    fn transform_input_maps_normalized_input_to_unit_range() {
        let device = Default::default();
        let pixels = [0.0, 0.3, 1.0];
        let input = Tensor::<TestBackend, 1>::from_floats(pixels, &device).reshape([1, 3, 1, 1]);
        let normalized = Normalizer::new(&device).normalize(input);

        let output = GoogLeNet::<TestBackend>::transform_input(normalized)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        for (actual, pixel) in output.iter().zip(pixels) {
            let expected = (pixel - 0.5) / 0.5;
            assert!((actual - expected).abs() < 1e-5, "{output:?}");
        }
    }

    #[test]
    fn forward_produces_class_logits() {
        let device = Default::default();
        let model = GoogLeNet::<TestBackend>::googlenet(10, &device);

        let logits = model.forward(Tensor::zeros([2, 3, 64, 64], &device));

        assert_eq!(logits.dims(), [2, 10]);
        assert_eq!(model.num_classes(), 10);
    }
}
