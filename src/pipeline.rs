//! One explanation pass: samples in, one figure out.

use std::path::PathBuf;

use burn::{prelude::*, tensor::backend::AutodiffBackend};

use crate::{
    attribution::Explainer,
    config::PipelineConfig,
    error::{ExplainError, Result},
    figure::{Figure, FigureRow},
    heatmap::Heatmap,
    labels::LabelTable,
    model::Classifier,
    preprocess::{to_rgb_image, ImagePreprocessor, Normalizer},
};

/// Run a pass and write its figure to the configured output.
///
/// Any failing sample aborts the pass before the figure is written, so no partial output is
/// left behind.
pub fn run<B, M>(
    model: &M,
    labels: &LabelTable,
    config: &PipelineConfig,
    device: &Device<B>,
) -> Result<PathBuf>
where
    B: AutodiffBackend,
    M: Classifier<B>,
{
    let figure = render_figure(model, labels, config, device)?;
    figure.save(&config.output)?;

    Ok(config.output.clone())
}

/// Explain every sample of the configured source in order and collect the figure rows.
pub fn render_figure<B, M>(
    model: &M,
    labels: &LabelTable,
    config: &PipelineConfig,
    device: &Device<B>,
) -> Result<Figure>
where
    B: AutodiffBackend,
    M: Classifier<B>,
{
    let preprocessor = ImagePreprocessor::new(&config.preprocess)?;
    let normalizer = Normalizer::<B>::new(device);
    let explainer = Explainer::new(model, config.method.clone());
    let num_classes = model.num_classes();

    tracing::info!(
        "Running {} with {} attributions",
        config.name,
        explainer.method().name()
    );

    let mut figure = Figure::new(config.figure.clone());
    for sample in config
        .source
        .samples(&preprocessor, &normalizer, num_classes, device)?
    {
        let sample = sample?;
        let prediction = explainer.predict(sample.image.clone())?;
        if prediction.class >= num_classes {
            return Err(ExplainError::InvalidSample(format!(
                "{}: predicted class {} is out of range",
                sample.name, prediction.class
            )));
        }

        let true_map =
            Heatmap::from_attribution(explainer.explain(sample.image.clone(), sample.label))?;
        let predicted_map =
            Heatmap::from_attribution(explainer.explain(sample.image.clone(), prediction.class))?;
        let original = to_rgb_image(normalizer.denormalize(sample.image))?;

        let true_label = sample
            .label_human
            .unwrap_or_else(|| labels.display_name(sample.label));
        let predicted_label = labels.display_name(prediction.class);
        tracing::info!(
            "{}: true {} ({true_label}), predicted {} ({predicted_label}, p={:.3})",
            sample.name,
            sample.label,
            prediction.class,
            prediction.confidence()
        );

        figure.push_row(FigureRow {
            original,
            true_map,
            true_title: format!("True: {true_label}"),
            predicted_map,
            predicted_title: format!("Predicted: {predicted_label}"),
        });
    }

    if figure.is_empty() {
        return Err(ExplainError::EmptySource);
    }

    Ok(figure)
}
