pub mod attribution;
pub mod config;
pub mod error;
pub mod figure;
pub mod heatmap;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod samples;

pub use attribution::{AttributionMethod, Explainer, IntegratedGradientsConfig, Prediction};
pub use config::{AppConfig, DeviceChoice, PipelineConfig};
pub use error::{ExplainError, Result};
pub use labels::LabelTable;
pub use model::{Classifier, GoogLeNet};
pub use samples::{ImageEntry, Sample, SampleBank, SampleSource};
