use std::path::{Path, PathBuf};

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::{
    attribution::{AttributionMethod, IntegratedGradientsConfig},
    error::{self, ensure_exists, ExplainError},
    figure::FigureConfig,
    preprocess::PreprocessConfig,
    samples::default_image_list,
};

pub use crate::samples::{ImageEntry, SampleSource};

/// Device the model runs on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceChoice {
    /// First accelerator backend compiled in, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    /// GPU backend, falls back to CPU with a warning when none is compiled in.
    Accelerator,
}

/// One explanation pass: a sample source, an attribution method and the figure it produces.
#[derive(Config, Debug)]
pub struct PipelineConfig {
    pub name: String,
    pub source: SampleSource,
    pub method: AttributionMethod,
    /// Output PNG, replaced when it exists.
    pub output: PathBuf,
    #[config(default = "PreprocessConfig::new()")]
    pub preprocess: PreprocessConfig,
    #[config(default = "FigureConfig::new()")]
    pub figure: FigureConfig,
}

/// Application configuration, loaded from JSON or built from the command line.
#[derive(Config, Debug)]
pub struct AppConfig {
    /// ImageNet class index to labels text dump.
    pub labels: PathBuf,
    #[config(default = "DeviceChoice::Auto")]
    pub device: DeviceChoice,
    /// Local torchvision GoogLeNet state dict, the released weights are downloaded when unset.
    pub weights: Option<PathBuf>,
    #[config(default = "Vec::new()")]
    pub variants: Vec<PipelineConfig>,
}

impl AppConfig {
    /// The four standard passes: saliency over the sample bank, then saliency, integrated
    /// gradients and DeepLift over the hand-picked images in `images_dir`.
    pub fn standard(labels: &Path, sample_bank: &Path, images_dir: &Path, out_dir: &Path) -> Self {
        let images = SampleSource::Images {
            entries: default_image_list(images_dir),
        };
        let variant = |name: &str, source: SampleSource, method, output: &str| {
            PipelineConfig::new(name.to_string(), source, method, out_dir.join(output))
        };

        Self::new(labels.to_path_buf()).with_variants(vec![
            variant(
                "saliency",
                SampleSource::Bank {
                    path: sample_bank.to_path_buf(),
                },
                AttributionMethod::Saliency,
                "Saliency.png",
            ),
            variant(
                "bespoke-saliency",
                images.clone(),
                AttributionMethod::Saliency,
                "BespokeSaliency.png",
            ),
            variant(
                "integrated-gradients",
                images.clone(),
                AttributionMethod::IntegratedGradients(IntegratedGradientsConfig::new()),
                "IntegratedGradients.png",
            ),
            variant(
                "deeplift",
                images,
                AttributionMethod::DeepLift,
                "DeepLift.png",
            ),
        ])
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> error::Result<Self> {
        ensure_exists(path)?;

        Self::load(path)
            .map_err(|err| ExplainError::Config(format!("{}: {err}", path.display())))
    }

    /// Variants to run, all of them when `names` is empty. Unknown names are an error.
    pub fn select(&self, names: &[String]) -> error::Result<Vec<&PipelineConfig>> {
        if names.is_empty() {
            return Ok(self.variants.iter().collect());
        }

        names
            .iter()
            .map(|name| {
                self.variants
                    .iter()
                    .find(|variant| &variant.name == name)
                    .ok_or_else(|| {
                        let known = self
                            .variants
                            .iter()
                            .map(|variant| variant.name.as_str())
                            .collect::<Vec<_>>();
                        ExplainError::Config(format!(
                            "unknown variant `{name}`, expected one of {known:?}"
                        ))
                    })
            })
            .collect()
    }
}
