/// Pre-trained weights metadata.
pub struct Weights {
    pub(super) url: &'static str,
    pub(super) num_classes: usize,
}

#[cfg(feature = "pretrained")]
mod downloader {
    use super::*;
    use burn::data::network::downloader;
    use std::fs::{create_dir_all, File};
    use std::io::{Error, ErrorKind, Write};
    use std::path::PathBuf;

    impl Weights {
        /// Download the pre-trained weights to the local cache directory.
        pub fn download(&self) -> Result<PathBuf, Error> {
            // Model cache directory
            let model_dir = dirs::home_dir()
                .ok_or_else(|| Error::new(ErrorKind::NotFound, "Could not find home directory"))?
                .join(".cache")
                .join("saliency-burn");

            if !model_dir.exists() {
                create_dir_all(&model_dir)?;
            }

            let file_base_name = self
                .url
                .rsplit_once('/')
                .map(|(_, name)| name)
                .unwrap_or(self.url);
            let file_name = model_dir.join(file_base_name);
            if !file_name.exists() {
                tracing::info!("Downloading {} to {}", self.url, file_name.display());
                // Download file content
                let bytes = downloader::download_file_as_bytes(self.url, file_base_name);

                // Write content to file
                let mut output_file = File::create(&file_name)?;
                let bytes_written = output_file.write(&bytes)?;

                if bytes_written != bytes.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "Failed to write the whole model weights file.",
                    ));
                }
            }

            Ok(file_name)
        }
    }
}

pub trait WeightsMeta {
    fn weights(&self) -> Weights;
}

/// GoogLeNet pre-trained weights.
pub enum GoogLeNet {
    /// Weights ported from the original TensorFlow release by torchvision.
    /// Top-1 accuracy: 69.778%.
    /// Top-5 accuracy: 89.530%.
    ImageNet1kV1,
}
impl WeightsMeta for GoogLeNet {
    fn weights(&self) -> Weights {
        Weights {
            url: "https://download.pytorch.org/models/googlenet-1378be20.pth",
            num_classes: 1000,
        }
    }
}
