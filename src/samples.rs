//! Evaluation samples: the persisted sample bank and lists of image files.

use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ensure_exists, ExplainError, Result},
    preprocess::{ImagePreprocessor, Normalizer},
};

/// One evaluation unit: a normalized `[1, 3, H, W]` image and its ground truth.
#[derive(Debug, Clone)]
pub struct Sample<B: Backend> {
    pub image: Tensor<B, 4>,
    pub label: usize,
    /// Human readable ground truth, falls back to the label table when missing.
    pub label_human: Option<String>,
    /// Where the sample comes from, for logging.
    pub name: String,
}

impl<B: Backend> Sample<B> {
    fn validate(&self, num_classes: usize) -> Result<()> {
        let [batch, channels, _, _] = self.image.dims();
        if batch != 1 || channels != 3 {
            return Err(ExplainError::InvalidSample(format!(
                "{}: expected an image of shape [1, 3, H, W], got {:?}",
                self.name,
                self.image.dims()
            )));
        }
        if self.label >= num_classes {
            return Err(ExplainError::InvalidSample(format!(
                "{}: label {} is out of range for {num_classes} classes",
                self.name, self.label
            )));
        }

        Ok(())
    }
}

/// Sample bank entry as stored on disk.
#[derive(Record)]
pub struct SampleRecord<B: Backend> {
    pub image: Tensor<B, 4>,
    pub label: i64,
    /// Empty when the bank carries no human readable label.
    pub label_human: String,
}

#[derive(Record)]
pub struct SampleBankRecord<B: Backend> {
    pub samples: Vec<SampleRecord<B>>,
}

/// Ordered collection of preprocessed samples persisted as a named MessagePack record.
#[derive(Debug, Clone)]
pub struct SampleBank<B: Backend> {
    samples: Vec<Sample<B>>,
}

impl<B: Backend> SampleBank<B> {
    pub fn new(samples: Vec<Sample<B>>) -> Self {
        Self { samples }
    }

    /// Load and validate the sample bank at `path` (the `.mpk` extension is implied).
    pub fn load(path: &Path, num_classes: usize, device: &Device<B>) -> Result<Self> {
        ensure_exists(&path.with_extension("mpk"))?;

        let record: SampleBankRecord<B> = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .load(path.to_path_buf(), device)?;

        let samples = record
            .samples
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let label = usize::try_from(record.label).map_err(|_| {
                    ExplainError::InvalidSample(format!(
                        "sample {index}: negative label {}",
                        record.label
                    ))
                })?;
                let sample = Sample {
                    image: record.image,
                    label,
                    label_human: Some(record.label_human).filter(|label| !label.is_empty()),
                    name: format!("{} #{index}", path.display()),
                };
                sample.validate(num_classes)?;

                Ok(sample)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("Loaded {} samples from {}", samples.len(), path.display());
        Ok(Self { samples })
    }

    /// Write the bank to `path` (the `.mpk` extension is added).
    pub fn save(&self, path: &Path) -> Result<()> {
        let record = SampleBankRecord {
            samples: self
                .samples
                .iter()
                .map(|sample| SampleRecord {
                    image: sample.image.clone(),
                    label: sample.label as i64,
                    label_human: sample.label_human.clone().unwrap_or_default(),
                })
                .collect(),
        };

        NamedMpkFileRecorder::<FullPrecisionSettings>::new().record(record, path.to_path_buf())?;
        tracing::info!("Saved {} samples to {}", self.len(), path.display());

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample<B>] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample<B>> {
        self.samples
    }
}

/// Image file paired with its ground truth class index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub path: PathBuf,
    pub label: usize,
}

impl ImageEntry {
    pub fn new(path: impl Into<PathBuf>, label: usize) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }

    /// Decode and preprocess the image into a validated sample.
    pub fn load<B: Backend>(
        &self,
        preprocessor: &ImagePreprocessor,
        normalizer: &Normalizer<B>,
        num_classes: usize,
        device: &Device<B>,
    ) -> Result<Sample<B>> {
        let sample = Sample {
            image: preprocessor.load(&self.path, normalizer, device)?,
            label: self.label,
            label_human: None,
            name: self.path.display().to_string(),
        };
        sample.validate(num_classes)?;

        Ok(sample)
    }
}

/// Hand-picked ImageNet validation images, relative to `images_dir`.
pub fn default_image_list(images_dir: &Path) -> Vec<ImageEntry> {
    [
        ("golden_retriever.JPEG", 207),
        ("black_swan.JPEG", 100),
        ("goldfish.JPEG", 1),
        ("hummingbird.JPEG", 94),
        ("daisy.JPEG", 985),
    ]
    .into_iter()
    .map(|(file, label)| ImageEntry::new(images_dir.join(file), label))
    .collect()
}

/// Where the samples of a pass come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SampleSource {
    /// Preprocessed samples stored in a sample bank file.
    Bank { path: PathBuf },
    /// Image files, decoded and preprocessed one at a time.
    Images { entries: Vec<ImageEntry> },
}

impl SampleSource {
    /// Samples in source order. Bank samples are loaded and validated up front, images are
    /// decoded lazily.
    pub fn samples<'a, B: Backend>(
        &'a self,
        preprocessor: &'a ImagePreprocessor,
        normalizer: &'a Normalizer<B>,
        num_classes: usize,
        device: &'a Device<B>,
    ) -> Result<Box<dyn Iterator<Item = Result<Sample<B>>> + 'a>> {
        match self {
            Self::Bank { path } => {
                let bank = SampleBank::load(path, num_classes, device)?;
                Ok(Box::new(bank.into_samples().into_iter().map(Ok)))
            }
            Self::Images { entries } => Ok(Box::new(entries.iter().map(move |entry| {
                entry.load(preprocessor, normalizer, num_classes, device)
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::PreprocessConfig;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn sample(value: f32, label: usize, label_human: Option<&str>) -> Sample<TestBackend> {
        let device = Default::default();
        Sample {
            image: Tensor::full([1, 3, 4, 4], value, &device),
            label,
            label_human: label_human.map(String::from),
            name: format!("sample {label}"),
        }
    }

    #[test]
    fn sample_bank_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank");
        let bank = SampleBank::new(vec![
            sample(0.5, 207, Some("golden retriever")),
            sample(-1.0, 1, None),
        ]);

        bank.save(&path).unwrap();
        let loaded = SampleBank::<TestBackend>::load(&path, 1000, &Default::default()).unwrap();

        assert_eq!(loaded.len(), 2);
        let [first, second] = loaded.samples() else {
            panic!("expected two samples");
        };
        assert_eq!(first.label, 207);
        assert_eq!(first.label_human.as_deref(), Some("golden retriever"));
        assert_eq!(second.label, 1);
        assert_eq!(second.label_human, None);
        assert_eq!(second.image.dims(), [1, 3, 4, 4]);
        assert_eq!(second.image.clone().sum().into_scalar(), -48.0);
    }

    #[test]
    fn sample_bank_rejects_out_of_range_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank");
        SampleBank::new(vec![sample(0.0, 12, None)]).save(&path).unwrap();

        let err = SampleBank::<TestBackend>::load(&path, 10, &Default::default()).unwrap_err();

        assert!(matches!(err, ExplainError::InvalidSample(_)));
    }

    #[test]
    fn sample_bank_rejects_bad_image_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank");
        let device = Default::default();
        let bad = Sample::<TestBackend> {
            image: Tensor::zeros([2, 1, 4, 4], &device),
            label: 0,
            label_human: None,
            name: "bad".into(),
        };
        SampleBank::new(vec![bad]).save(&path).unwrap();

        let err = SampleBank::<TestBackend>::load(&path, 10, &device).unwrap_err();

        assert!(matches!(err, ExplainError::InvalidSample(_)));
    }

    #[test]
    fn missing_sample_bank_is_not_found() {
        let err = SampleBank::<TestBackend>::load(Path::new("no_such_bank"), 10, &Default::default())
            .unwrap_err();

        assert!(matches!(err, ExplainError::ResourceNotFound(_)));
    }

    #[test]
    fn default_image_list_keeps_order_and_labels() {
        let entries = default_image_list(Path::new("images"));

        let labels = entries.iter().map(|entry| entry.label).collect::<Vec<_>>();
        assert_eq!(labels, vec![207, 100, 1, 94, 985]);
        assert_eq!(entries[0].path, Path::new("images/golden_retriever.JPEG"));
    }

    #[test]
    fn image_source_loads_lazily_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        RgbImage::from_pixel(40, 30, Rgb([255, 0, 0]))
            .save(&path)
            .unwrap();
        let source = SampleSource::Images {
            entries: vec![
                ImageEntry::new(&path, 3),
                ImageEntry::new(dir.path().join("missing.png"), 4),
            ],
        };
        let device = Default::default();
        let preprocessor =
            ImagePreprocessor::new(&PreprocessConfig::new().with_resize(32).with_crop(24)).unwrap();
        let normalizer = Normalizer::<TestBackend>::new(&device);

        let mut samples = source
            .samples(&preprocessor, &normalizer, 10, &device)
            .unwrap();

        let first = samples.next().unwrap().unwrap();
        assert_eq!(first.image.dims(), [1, 3, 24, 24]);
        assert_eq!(first.label, 3);
        assert!(matches!(
            samples.next().unwrap(),
            Err(ExplainError::ResourceNotFound(_))
        ));
        assert!(samples.next().is_none());
    }
}
