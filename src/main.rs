#![recursion_limit = "256"] // wgpu

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::{
    backend::ndarray::{NdArray, NdArrayDevice},
    module::Module,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Device,
    },
};
use clap::{Args, Parser, Subcommand};
use saliency_burn::{
    config::{AppConfig, DeviceChoice},
    model::GoogLeNet,
    pipeline,
    preprocess::{ImagePreprocessor, Normalizer, PreprocessConfig},
    samples::{ImageEntry, SampleBank},
    LabelTable,
};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// ImageNet-1k classes.
const NUM_CLASSES: usize = 1000;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Explain the classifier predictions and write one figure per variant.
    Run(RunArgs),
    /// Preprocess images into a sample bank file.
    Pack(PackArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON configuration file, the standard variants are built from the flags below when unset.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ImageNet class index to labels text dump.
    #[arg(long, default_value = "imagenet1000_clsidx_to_labels.txt")]
    labels: PathBuf,

    /// Sample bank of the `saliency` variant (`.mpk` extension implied).
    #[arg(long, default_value = "sample_imagenetdata")]
    sample_bank: PathBuf,

    /// Directory holding the hand-picked images.
    #[arg(long, default_value = "images")]
    images: PathBuf,

    /// Output directory for the figures.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Variants to run (all when omitted).
    #[arg(long = "variant")]
    variants: Vec<String>,

    /// Device to run the model on.
    #[arg(long, value_enum)]
    device: Option<DeviceChoice>,

    /// Force CPU mode
    #[arg(long, conflicts_with = "device")]
    cpu: bool,

    /// Local torchvision GoogLeNet weights (`.pth`), downloaded when omitted.
    #[arg(long)]
    weights: Option<PathBuf>,

    /// TrueType font for the figure titles.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PackArgs {
    /// Images with their class index, as `PATH:LABEL`.
    #[arg(required = true, value_parser = parse_entry)]
    entries: Vec<ImageEntry>,

    /// Output sample bank (`.mpk` extension added).
    #[arg(short, long, default_value = "sample_imagenetdata")]
    output: PathBuf,

    /// Label table used to store human readable labels.
    #[arg(long)]
    labels: Option<PathBuf>,
}

fn parse_entry(value: &str) -> Result<ImageEntry, String> {
    let (path, label) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected PATH:LABEL, got `{value}`"))?;
    let label = label
        .trim()
        .parse::<usize>()
        .map_err(|err| format!("invalid label `{label}`: {err}"))?;

    Ok(ImageEntry::new(path, label))
}

type Runner = fn(&AppConfig, &[String]) -> Result<usize>;

/// Load the classifier and run the selected variants, returns the number of failed variants.
fn explain<B: AutodiffBackend>(
    config: &AppConfig,
    names: &[String],
    device: Device<B>,
) -> Result<usize> {
    let labels = LabelTable::from_file(&config.labels)
        .with_context(|| format!("Failed to load labels from {}", config.labels.display()))?;
    let variants = config.select(names)?;

    let model = load_model::<B>(config.weights.as_deref(), &device)?.no_grad();
    tracing::debug!("GoogLeNet loaded ({} parameters)", model.num_params());
    tracing::debug!("{model}");

    let mut failed = 0;
    for variant in variants {
        match pipeline::run(&model, &labels, variant, &device) {
            Ok(output) => info!("{} written to {}", variant.name, output.display()),
            Err(err) => {
                error!("{} failed: {err}", variant.name);
                failed += 1;
            }
        }
    }

    Ok(failed)
}

fn load_model<B: Backend>(weights: Option<&Path>, device: &Device<B>) -> Result<GoogLeNet<B>> {
    if let Some(path) = weights {
        if !path.exists() {
            bail!("Weights file {} not found", path.display());
        }
        return GoogLeNet::from_torch_weights(path, NUM_CLASSES, device)
            .with_context(|| format!("Failed to load weights from {}", path.display()));
    }

    #[cfg(feature = "pretrained")]
    let model = GoogLeNet::googlenet_pretrained(
        saliency_burn::model::weights::GoogLeNet::ImageNet1kV1,
        device,
    )
    .context("Failed to load the pretrained GoogLeNet weights");
    #[cfg(not(feature = "pretrained"))]
    let model = Err(anyhow::anyhow!(
        "No weights given, pass --weights or enable the `pretrained` feature"
    ));

    model
}

mod cpu {
    use super::*;
    use burn::backend::Autodiff;

    pub fn run(config: &AppConfig, names: &[String]) -> Result<usize> {
        super::explain::<Autodiff<NdArray>>(config, names, NdArrayDevice::Cpu)
    }
}

#[cfg(feature = "tch-gpu")]
mod tch_gpu {
    use super::*;
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };

    pub fn run(config: &AppConfig, names: &[String]) -> Result<usize> {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        super::explain::<Autodiff<LibTorch>>(config, names, device)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use super::*;
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };

    pub fn run(config: &AppConfig, names: &[String]) -> Result<usize> {
        super::explain::<Autodiff<Wgpu>>(config, names, WgpuDevice::default())
    }
}

#[cfg(feature = "cuda")]
mod cuda {
    use super::*;
    use burn::backend::{cuda::CudaDevice, Autodiff, Cuda};

    pub fn run(config: &AppConfig, names: &[String]) -> Result<usize> {
        super::explain::<Autodiff<Cuda>>(config, names, CudaDevice::default())
    }
}

/// First accelerator backend compiled in.
#[allow(unreachable_code)]
fn accelerator() -> Option<Runner> {
    #[cfg(feature = "cuda")]
    return Some(cuda::run as Runner);
    #[cfg(feature = "tch-gpu")]
    return Some(tch_gpu::run as Runner);
    #[cfg(feature = "wgpu")]
    return Some(wgpu::run as Runner);

    None
}

fn runner(device: DeviceChoice) -> Runner {
    match (device, accelerator()) {
        (DeviceChoice::Cpu, _) => cpu::run,
        (_, Some(run)) => run,
        (DeviceChoice::Accelerator, None) => {
            tracing::warn!("No accelerator backend compiled in, falling back to CPU");
            cpu::run
        }
        (DeviceChoice::Auto, None) => cpu::run,
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::standard(&args.labels, &args.sample_bank, &args.images, &args.out_dir),
    };

    if args.cpu {
        config.device = DeviceChoice::Cpu;
    } else if let Some(device) = args.device {
        config.device = device;
    }
    if args.weights.is_some() {
        config.weights = args.weights;
    }
    if let Some(font) = args.font {
        for variant in config.variants.iter_mut() {
            variant.figure.font = Some(font.clone());
        }
    }

    let failed = runner(config.device)(&config, &args.variants)?;
    if failed > 0 {
        bail!("{failed} variant(s) failed");
    }

    Ok(())
}

fn pack(args: PackArgs) -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let labels = args
        .labels
        .as_deref()
        .map(LabelTable::from_file)
        .transpose()?;
    let preprocessor = ImagePreprocessor::new(&PreprocessConfig::new())?;
    let normalizer = Normalizer::<NdArray>::new(&device);

    let samples = args
        .entries
        .iter()
        .map(|entry| {
            let mut sample = entry.load(&preprocessor, &normalizer, NUM_CLASSES, &device)?;
            sample.label_human = labels
                .as_ref()
                .and_then(|labels| labels.get(entry.label))
                .and_then(|names| names.first().cloned());
            Ok(sample)
        })
        .collect::<saliency_burn::Result<Vec<_>>>()?;

    SampleBank::new(samples)
        .save(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Run(args) => run(args),
        Command::Pack(args) => pack(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(any(feature = "cuda", feature = "tch-gpu", feature = "wgpu")))]
    fn every_device_choice_runs_on_cpu_without_accelerator() {
        let cpu = cpu::run as Runner as usize;

        assert!(accelerator().is_none());
        for device in [DeviceChoice::Cpu, DeviceChoice::Auto, DeviceChoice::Accelerator] {
            assert_eq!(runner(device) as usize, cpu, "{device:?}");
        }
    }

    #[test]
    fn parse_entry_splits_on_last_colon() {
        let entry = parse_entry("C:/images/goldfish.JPEG:1").unwrap();

        assert_eq!(entry, ImageEntry::new("C:/images/goldfish.JPEG", 1));
        assert!(parse_entry("goldfish.JPEG").is_err());
        assert!(parse_entry("goldfish.JPEG:fish").is_err());
    }

    #[test]
    fn cli_parses_variants_and_device() {
        let cli = Cli::parse_from([
            "saliency-burn",
            "run",
            "--variant",
            "deeplift",
            "--variant",
            "saliency",
            "--device",
            "cpu",
        ]);

        let Command::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        assert_eq!(args.variants, ["deeplift", "saliency"]);
        assert_eq!(args.device, Some(DeviceChoice::Cpu));
    }
}
