//! Gradient based attributions of a classifier's logits to its input pixels.

use burn::{
    config::Config,
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend, ElementConversion},
};
use serde::{Deserialize, Serialize};

use crate::{error, model::Classifier, preprocess::to_vec};

/// [Integrated gradients](https://arxiv.org/abs/1703.01365) configuration.
#[derive(Config, Debug)]
pub struct IntegratedGradientsConfig {
    /// Number of points on the path from the baseline to the input.
    #[config(default = 50)]
    pub steps: usize,
    /// Number of path points evaluated in a single forward/backward pass.
    #[config(default = 10)]
    pub internal_batch_size: usize,
}

/// Attribution technique.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AttributionMethod {
    /// Absolute gradient of the target logit w.r.t. the input
    /// ([Simonyan et al.](https://arxiv.org/abs/1312.6034)).
    Saliency,
    /// Path integral of the gradients from a zero baseline to the input
    /// ([Sundararajan et al.](https://arxiv.org/abs/1703.01365)).
    IntegratedGradients(IntegratedGradientsConfig),
    /// DeepLift Rescale rule with a zero reference
    /// ([Shrikumar et al.](https://arxiv.org/abs/1704.02685)), computed as
    /// `(input - reference) * gradient`. For piecewise-linear networks this matches the
    /// Rescale rule up to bias terms ([Ancona et al.](https://arxiv.org/abs/1711.06104)).
    DeepLift,
}

impl AttributionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Saliency => "saliency",
            Self::IntegratedGradients(_) => "integrated gradients",
            Self::DeepLift => "deeplift",
        }
    }
}

/// Top-1 prediction of a classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: usize,
    /// Softmax probabilities over all classes.
    pub probabilities: Vec<f32>,
}

impl Prediction {
    pub fn confidence(&self) -> f32 {
        self.probabilities.get(self.class).copied().unwrap_or_default()
    }
}

/// Explains the decisions of a classifier with one attribution method.
///
/// The model is borrowed so that several explainers can share one instance. Its parameters
/// should be detached from the autodiff graph beforehand (see
/// [`Module::no_grad`](burn::module::Module::no_grad)), only the input gradient is needed.
pub struct Explainer<'a, M> {
    model: &'a M,
    method: AttributionMethod,
}

impl<'a, M> Explainer<'a, M> {
    pub fn new(model: &'a M, method: AttributionMethod) -> Self {
        Self { model, method }
    }

    pub fn method(&self) -> &AttributionMethod {
        &self.method
    }

    /// Softmax probabilities and top-1 class for a single input `[1, 3, H, W]`.
    pub fn predict<B>(&self, input: Tensor<B, 4>) -> error::Result<Prediction>
    where
        B: AutodiffBackend,
        M: Classifier<B>,
    {
        let logits = self.model.logits(input.detach()).inner();
        let [_, num_classes] = logits.dims();
        let probabilities = softmax(logits.slice([0..1, 0..num_classes]), 1);
        let class = probabilities
            .clone()
            .argmax(1)
            .into_scalar()
            .elem::<i64>() as usize;

        Ok(Prediction {
            class,
            probabilities: to_vec(probabilities)?,
        })
    }

    /// Attribution of the `target` logit to every input value, same shape as `input`.
    pub fn explain<B>(&self, input: Tensor<B, 4>, target: usize) -> Tensor<B::InnerBackend, 4>
    where
        B: AutodiffBackend,
        M: Classifier<B>,
    {
        match &self.method {
            AttributionMethod::Saliency => saliency(self.model, input, target),
            AttributionMethod::IntegratedGradients(config) => {
                integrated_gradients(self.model, input, target, config)
            }
            AttributionMethod::DeepLift => deeplift(self.model, input, target),
        }
    }
}

/// Gradient of the summed `target` logits w.r.t. the input batch.
fn input_gradient<B, M>(model: &M, input: Tensor<B, 4>, target: usize) -> Tensor<B::InnerBackend, 4>
where
    B: AutodiffBackend,
    M: Classifier<B>,
{
    let input = input.detach().require_grad();
    let logits = model.logits(input.clone());
    let [batch_size, _] = logits.dims();

    // Samples are independent, the gradient of the sum is the per-sample gradient
    let score = logits.slice([0..batch_size, target..target + 1]).sum();
    let grads = score.backward();

    input
        .grad(&grads)
        .unwrap_or_else(|| input.clone().inner().zeros_like())
}

pub fn saliency<B, M>(model: &M, input: Tensor<B, 4>, target: usize) -> Tensor<B::InnerBackend, 4>
where
    B: AutodiffBackend,
    M: Classifier<B>,
{
    input_gradient(model, input, target).abs()
}

pub fn integrated_gradients<B, M>(
    model: &M,
    input: Tensor<B, 4>,
    target: usize,
    config: &IntegratedGradientsConfig,
) -> Tensor<B::InnerBackend, 4>
where
    B: AutodiffBackend,
    M: Classifier<B>,
{
    let steps = config.steps.max(1);
    let input = input.detach();
    // x - x0 with a zero baseline
    let delta = input.clone();

    // Riemann middle rule: alpha_k = (k + 0.5) / steps
    let alphas = (0..steps)
        .map(|k| (k as f64 + 0.5) / steps as f64)
        .collect::<Vec<_>>();

    let mut total: Option<Tensor<B::InnerBackend, 4>> = None;
    for chunk in alphas.chunks(config.internal_batch_size.max(1)) {
        let scaled = chunk
            .iter()
            .map(|alpha| delta.clone().mul_scalar(*alpha))
            .collect::<Vec<_>>();
        let grads = input_gradient(model, Tensor::cat(scaled, 0), target).sum_dim(0);

        total = Some(match total {
            Some(total) => total + grads,
            None => grads,
        });
    }

    let mean_grads = total
        .unwrap_or_else(|| delta.clone().inner().zeros_like())
        .div_scalar(steps as f64);

    delta.inner() * mean_grads
}

pub fn deeplift<B, M>(model: &M, input: Tensor<B, 4>, target: usize) -> Tensor<B::InnerBackend, 4>
where
    B: AutodiffBackend,
    M: Classifier<B>,
{
    // x - x0 with a zero reference
    let delta = input.clone().detach().inner();

    delta * input_gradient(model, input, target)
}
