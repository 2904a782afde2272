//! End-to-end passes with a small classifier and generated images.

use std::path::{Path, PathBuf};

use burn::{
    backend::{Autodiff, NdArray},
    module::Module,
    nn::{Linear, LinearConfig},
    prelude::*,
};
use image::{Rgb, RgbImage};
use saliency_burn::{
    figure::FigureConfig,
    pipeline,
    preprocess::{ImagePreprocessor, Normalizer, PreprocessConfig},
    samples::default_image_list,
    AttributionMethod, Classifier, ExplainError, IntegratedGradientsConfig, LabelTable,
    PipelineConfig, SampleBank, SampleSource,
};
use tempfile::TempDir;

type TestBackend = Autodiff<NdArray<f32>>;

const NUM_CLASSES: usize = 1000;
const CROP: u32 = 24;

const LABELS: &str = "{
1: 'goldfish, Carassius auratus',
94: 'hummingbird',
100: 'black swan, Cygnus atratus',
207: 'golden retriever',
985: 'daisy',
}
";

const TRUE_TITLES: [&str; 5] = [
    "True: golden retriever",
    "True: black swan",
    "True: goldfish",
    "True: hummingbird",
    "True: daisy",
];

#[derive(Module, Debug)]
struct TinyClassifier<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> TinyClassifier<B> {
    fn new(device: &B::Device) -> Self {
        let pixels = 3 * (CROP * CROP) as usize;
        Self {
            linear: LinearConfig::new(pixels, NUM_CLASSES).init(device),
        }
    }
}

impl<B: Backend> Classifier<B> for TinyClassifier<B> {
    fn logits(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.linear.forward(input.flatten(1, 3))
    }

    fn num_classes(&self) -> usize {
        NUM_CLASSES
    }
}

struct Fixture {
    dir: TempDir,
    model: TinyClassifier<TestBackend>,
    labels: LabelTable,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (index, entry) in default_image_list(dir.path()).iter().enumerate() {
            let shade = 40 * index as u8;
            RgbImage::from_fn(48, 36, |x, y| Rgb([shade, (x * 5) as u8, (y * 7) as u8]))
                .save(&entry.path)
                .unwrap();
        }

        Self {
            model: TinyClassifier::new(&Default::default()).no_grad(),
            labels: LabelTable::parse(LABELS).unwrap(),
            dir,
        }
    }

    fn images(&self) -> SampleSource {
        SampleSource::Images {
            entries: default_image_list(self.dir.path()),
        }
    }

    fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join("out").join(name)
    }

    fn config(&self, source: SampleSource, method: AttributionMethod) -> PipelineConfig {
        PipelineConfig::new(
            "test".to_string(),
            source,
            method,
            self.output("figure.png"),
        )
        .with_preprocess(PreprocessConfig::new().with_resize(32).with_crop(CROP))
        .with_figure(FigureConfig::new().with_panel_size(CROP))
    }
}

fn true_titles(figure: &saliency_burn::figure::Figure) -> Vec<&str> {
    figure
        .rows()
        .iter()
        .map(|row| row.true_title.as_str())
        .collect()
}

#[test]
fn every_method_renders_one_row_per_image_in_order() {
    let fixture = Fixture::new();
    let methods = [
        AttributionMethod::Saliency,
        AttributionMethod::IntegratedGradients(
            IntegratedGradientsConfig::new()
                .with_steps(4)
                .with_internal_batch_size(3),
        ),
        AttributionMethod::DeepLift,
    ];

    for method in methods {
        let config = fixture.config(fixture.images(), method);

        let figure =
            pipeline::render_figure(&fixture.model, &fixture.labels, &config, &Default::default())
                .unwrap();

        assert_eq!(true_titles(&figure), TRUE_TITLES);
        assert_eq!(figure.dimensions(), (3 * CROP, 5 * (40 + CROP)));
        for row in figure.rows() {
            assert!(row.predicted_title.starts_with("Predicted: "));
            assert_eq!(row.original.dimensions(), (CROP, CROP));
            for map in [&row.true_map, &row.predicted_map] {
                assert!(map.values().iter().all(|v| (0.0..=1.0).contains(v)));
            }
        }
    }
}

#[test]
fn run_writes_the_figure() {
    let fixture = Fixture::new();
    let config = fixture.config(fixture.images(), AttributionMethod::Saliency);

    let output =
        pipeline::run(&fixture.model, &fixture.labels, &config, &Default::default()).unwrap();

    assert_eq!(output, fixture.output("figure.png"));
    let written = image::open(&output).unwrap();
    assert_eq!(
        (written.width(), written.height()),
        (3 * CROP, 5 * (40 + CROP))
    );
}

#[test]
fn missing_image_aborts_the_pass_without_output() {
    let fixture = Fixture::new();
    std::fs::remove_file(fixture.dir.path().join("hummingbird.JPEG")).unwrap();
    let config = fixture.config(fixture.images(), AttributionMethod::DeepLift);

    let err = pipeline::run(&fixture.model, &fixture.labels, &config, &Default::default())
        .unwrap_err();

    match err {
        ExplainError::ResourceNotFound(path) => assert!(path.ends_with("hummingbird.JPEG")),
        err => panic!("unexpected error {err}"),
    }
    assert!(!config.output.exists());
}

#[test]
fn empty_source_is_an_error() {
    let fixture = Fixture::new();
    let config = fixture.config(
        SampleSource::Images {
            entries: Vec::new(),
        },
        AttributionMethod::Saliency,
    );

    let err = pipeline::run(&fixture.model, &fixture.labels, &config, &Default::default())
        .unwrap_err();

    assert!(matches!(err, ExplainError::EmptySource));
    assert!(!config.output.exists());
}

#[test]
fn sample_bank_pass_uses_stored_labels() {
    let fixture = Fixture::new();
    let device = Default::default();
    let preprocessor =
        ImagePreprocessor::new(&PreprocessConfig::new().with_resize(32).with_crop(CROP)).unwrap();
    let normalizer = Normalizer::<NdArray<f32>>::new(&device);
    let samples = default_image_list(fixture.dir.path())
        .iter()
        .take(2)
        .map(|entry| {
            let mut sample = entry
                .load(&preprocessor, &normalizer, NUM_CLASSES, &device)
                .unwrap();
            sample.label_human = Some(format!("stored {}", entry.label));
            sample
        })
        .collect::<Vec<_>>();
    let bank = fixture.dir.path().join("bank");
    SampleBank::new(samples).save(&bank).unwrap();

    let config = fixture.config(
        SampleSource::Bank { path: bank },
        AttributionMethod::Saliency,
    );
    let figure =
        pipeline::render_figure(&fixture.model, &fixture.labels, &config, &Default::default())
            .unwrap();

    assert_eq!(true_titles(&figure), ["True: stored 207", "True: stored 100"]);
}

#[test]
fn out_of_range_label_is_rejected() {
    let fixture = Fixture::new();
    let path = fixture.dir.path().join("goldfish.JPEG");
    let config = fixture.config(
        SampleSource::Images {
            entries: vec![saliency_burn::ImageEntry::new(path, NUM_CLASSES)],
        },
        AttributionMethod::Saliency,
    );

    let err = pipeline::render_figure(&fixture.model, &fixture.labels, &config, &Default::default())
        .unwrap_err();

    assert!(matches!(err, ExplainError::InvalidSample(_)));
}

#[test]
fn label_table_file_round_trip() {
    let fixture = Fixture::new();
    let path: &Path = &fixture.dir.path().join("labels.txt");
    std::fs::write(path, LABELS).unwrap();

    let labels = LabelTable::from_file(path).unwrap();

    assert_eq!(labels, fixture.labels);
    assert_eq!(labels.display_name(0), "class 0");
}
