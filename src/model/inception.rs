use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::conv::{BasicConv2d, BasicConv2dConfig};

/// Inception block with four parallel branches concatenated along channels.
/// Derived from [torchvision.models.googlenet.Inception](https://github.com/pytorch/vision/blob/main/torchvision/models/googlenet.py)
#[derive(Module, Debug)]
pub struct Inception<B: Backend> {
    /// 1x1 conv.
    branch1: BasicConv2d<B>,
    /// 1x1 reduce -> 3x3 conv.
    branch2: Vec<BasicConv2d<B>>,
    /// 1x1 reduce -> 3x3 conv (5x5 in the paper, 3x3 in the released weights).
    branch3: Vec<BasicConv2d<B>>,
    /// 3x3 max pool -> 1x1 projection.
    pool: MaxPool2d,
    branch4: BasicConv2d<B>,
}

impl<B: Backend> Inception<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let branch1 = self.branch1.forward(input.clone());
        let branch2 = forward_sequential(&self.branch2, input.clone());
        let branch3 = forward_sequential(&self.branch3, input.clone());
        // 3x3 stride 1 pool with padding 1: ceil mode never adds padding
        let branch4 = self.branch4.forward(self.pool.forward(input));

        Tensor::cat(vec![branch1, branch2, branch3, branch4], 1)
    }
}

fn forward_sequential<B: Backend>(
    layers: &[BasicConv2d<B>],
    input: Tensor<B, 4>,
) -> Tensor<B, 4> {
    layers.iter().fold(input, |out, layer| layer.forward(out))
}

/// [Inception](Inception) block configuration.
#[derive(Config, Debug)]
pub struct InceptionConfig {
    pub in_channels: usize,
    pub ch1x1: usize,
    pub ch3x3_reduce: usize,
    pub ch3x3: usize,
    pub ch5x5_reduce: usize,
    pub ch5x5: usize,
    pub pool_proj: usize,
}

impl InceptionConfig {
    /// Output channels of the block.
    pub fn out_channels(&self) -> usize {
        self.ch1x1 + self.ch3x3 + self.ch5x5 + self.pool_proj
    }

    /// Initialize a new [Inception](Inception) block.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Inception<B> {
        let branch1 = BasicConv2dConfig::new(self.in_channels, self.ch1x1, 1).init(device);
        let branch2 = vec![
            BasicConv2dConfig::new(self.in_channels, self.ch3x3_reduce, 1).init(device),
            BasicConv2dConfig::new(self.ch3x3_reduce, self.ch3x3, 3)
                .with_padding(1)
                .init(device),
        ];
        let branch3 = vec![
            BasicConv2dConfig::new(self.in_channels, self.ch5x5_reduce, 1).init(device),
            BasicConv2dConfig::new(self.ch5x5_reduce, self.ch5x5, 3)
                .with_padding(1)
                .init(device),
        ];
        let pool = MaxPool2dConfig::new([3, 3])
            .with_strides([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();
        let branch4 = BasicConv2dConfig::new(self.in_channels, self.pool_proj, 1).init(device);

        Inception {
            branch1,
            branch2,
            branch3,
            pool,
            branch4,
        }
    }
}

/// Extra bottom/right padding that makes a floor-mode pool produce the output size of a
/// ceil-mode pool (PyTorch `ceil_mode=True`) over an input side of length `size`.
pub fn ceil_mode_padding(size: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    let padded = size + 2 * padding;
    if padded < kernel {
        return kernel - padded;
    }

    let mut out = (padded - kernel).div_ceil(stride) + 1;
    // The last window has to start inside the input or the left padding
    if (out - 1) * stride >= size + padding {
        out -= 1;
    }

    ((out - 1) * stride + kernel).saturating_sub(padded)
}

/// Zero-pad the bottom and right edges of `input` so that a floor-mode max pool behaves like a
/// ceil-mode one.
///
/// Only valid for non-negative inputs (e.g. post-ReLU activations), where zeros never win
/// over a real value of the window.
pub fn pad_for_ceil_mode<B: Backend>(
    input: Tensor<B, 4>,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Tensor<B, 4> {
    let [batch, channels, height, width] = input.dims();
    let pad_h = ceil_mode_padding(height, kernel, stride, padding);
    let pad_w = ceil_mode_padding(width, kernel, stride, padding);
    let device = input.device();

    let mut out = input;
    if pad_h > 0 {
        let zeros = Tensor::zeros([batch, channels, pad_h, width], &device);
        out = Tensor::cat(vec![out, zeros], 2);
    }
    if pad_w > 0 {
        let zeros = Tensor::zeros([batch, channels, height + pad_h, pad_w], &device);
        out = Tensor::cat(vec![out, zeros], 3);
    }

    out
}
