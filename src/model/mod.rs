mod conv;
pub mod googlenet;
mod inception;
pub mod weights;

use burn::tensor::{backend::Backend, Tensor};

pub use googlenet::GoogLeNet;

/// An image classifier producing one raw score (logit) per class.
pub trait Classifier<B: Backend> {
    /// Class logits `[N, num_classes]` for a batch of normalized images `[N, 3, H, W]`.
    fn logits(&self, input: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;
}
