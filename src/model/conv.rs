use core::f64::consts::SQRT_2;

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Initializer, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};

/// Batch norm epsilon of the torchvision GoogLeNet.
const NORM_EPS: f64 = 1e-3;

/// Batch normalization that always uses its running statistics.
///
/// The parameter names follow the PyTorch state dict (`weight`, `bias`, `running_mean`,
/// `running_var`) so pretrained weights load without remapping.
#[derive(Module, Debug)]
pub struct InferenceNorm<B: Backend> {
    weight: Param<Tensor<B, 1>>,
    bias: Param<Tensor<B, 1>>,
    running_mean: Param<Tensor<B, 1>>,
    running_var: Param<Tensor<B, 1>>,
}

impl<B: Backend> InferenceNorm<B> {
    pub fn new(channels: usize, device: &Device<B>) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([channels], device)),
            bias: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: Param::from_tensor(Tensor::zeros([channels], device)),
            running_var: Param::from_tensor(Tensor::ones([channels], device)),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [channels] = self.weight.dims();

        // y = (x - mean) / sqrt(var + eps) * weight + bias
        let scale = self.weight.val() / self.running_var.val().add_scalar(NORM_EPS).sqrt();
        let shift = self.bias.val() - self.running_mean.val() * scale.clone();

        input * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }
}

/// Convolution followed by batch norm and ReLU.
#[derive(Module, Debug)]
pub struct BasicConv2d<B: Backend> {
    conv: Conv2d<B>,
    bn: InferenceNorm<B>,
    relu: Relu,
}

impl<B: Backend> BasicConv2d<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        let out = self.bn.forward(out);

        self.relu.forward(out)
    }
}

/// [BasicConv2d](BasicConv2d) configuration.
#[derive(Config, Debug)]
pub struct BasicConv2dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    #[config(default = 1)]
    pub stride: usize,
    #[config(default = 0)]
    pub padding: usize,
}

impl BasicConv2dConfig {
    /// Initialize a new [BasicConv2d](BasicConv2d) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> BasicConv2d<B> {
        let conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
        .with_bias(false)
        .with_initializer(Initializer::KaimingNormal {
            gain: SQRT_2, // recommended value for ReLU
            fan_out_only: true,
        })
        .init(device);

        BasicConv2d {
            conv,
            bn: InferenceNorm::new(self.out_channels, device),
            relu: Relu::new(),
        }
    }
}
