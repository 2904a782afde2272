use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use burn::config::Config;
use image::{
    imageops::{self, FilterType},
    ImageFormat, Rgb, RgbImage,
};
use plotters::{
    prelude::*,
    style::{
        text_anchor::{HPos, Pos, VPos},
        FontStyle,
    },
};

use crate::{
    error::{self, ExplainError},
    heatmap::Heatmap,
};

/// Family name the title font is registered under.
const FONT_FAMILY: &str = "sans-serif";

/// Fonts tried when none is configured.
const SYSTEM_FONTS: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static FONT: OnceLock<bool> = OnceLock::new();

/// Figure layout configuration.
#[derive(Config, Debug)]
pub struct FigureConfig {
    /// Side of the square panels in pixels.
    #[config(default = 224)]
    pub panel_size: u32,
    /// Height of the title band above each row.
    #[config(default = 40)]
    pub title_height: u32,
    #[config(default = 24.0)]
    pub font_size: f64,
    /// TrueType font used for the titles, common system fonts are tried when unset.
    ///
    /// The font is registered once per process by the first composed figure, later figures
    /// keep using it whatever their own setting.
    pub font: Option<PathBuf>,
}

/// One figure row: the original image and the heatmaps of the true and predicted classes.
#[derive(Debug, Clone)]
pub struct FigureRow {
    pub original: RgbImage,
    pub true_map: Heatmap,
    pub true_title: String,
    pub predicted_map: Heatmap,
    pub predicted_title: String,
}

/// Grid of `rows x 3` panels, built row by row and written once.
///
/// Panels touch each other horizontally. Vertically each row is preceded by its title band
/// of `title_height` pixels, which is the only gap between the panels of consecutive rows.
#[derive(Debug)]
pub struct Figure {
    config: FigureConfig,
    rows: Vec<FigureRow>,
}

impl Figure {
    pub fn new(config: FigureConfig) -> Self {
        Self {
            config,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: FigureRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[FigureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn row_height(&self) -> u32 {
        self.config.title_height + self.config.panel_size
    }

    /// Width and height of the composed figure.
    pub fn dimensions(&self) -> (u32, u32) {
        (
            3 * self.config.panel_size,
            self.rows.len() as u32 * self.row_height(),
        )
    }

    /// Compose all rows into one image.
    pub fn compose(&self) -> error::Result<RgbImage> {
        if self.rows.is_empty() {
            return Err(ExplainError::EmptySource);
        }

        let (width, height) = self.dimensions();
        let panel = self.config.panel_size;
        let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

        for (index, row) in self.rows.iter().enumerate() {
            let top = (index as u32 * self.row_height() + self.config.title_height) as i64;
            let panels = [
                self.fit(&row.original, FilterType::Triangle),
                self.fit(&row.true_map.to_rgb(), FilterType::Nearest),
                self.fit(&row.predicted_map.to_rgb(), FilterType::Nearest),
            ];
            for (column, image) in panels.iter().enumerate() {
                imageops::replace(&mut canvas, image, column as i64 * panel as i64, top);
            }
        }

        if register_font(self.config.font.as_deref()) {
            self.draw_titles(&mut canvas)?;
        } else {
            tracing::warn!("No font available, the figure titles are skipped");
        }

        Ok(canvas)
    }

    /// Compose the figure and write it as a PNG file, replacing any existing file.
    pub fn save(&self, path: &Path) -> error::Result<()> {
        let image = self.compose()?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        image.save_with_format(path, ImageFormat::Png)?;
        tracing::info!(
            "Saved {} row figure to {}",
            self.rows.len(),
            path.display()
        );

        Ok(())
    }

    fn fit(&self, image: &RgbImage, filter: FilterType) -> RgbImage {
        let size = self.config.panel_size;
        if image.dimensions() == (size, size) {
            image.clone()
        } else {
            imageops::resize(image, size, size, filter)
        }
    }

    fn draw_titles(&self, canvas: &mut RgbImage) -> error::Result<()> {
        let (width, height) = canvas.dimensions();
        let panel = self.config.panel_size as i32;
        let style = TextStyle::from((FONT_FAMILY, self.config.font_size).into_font())
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Center));

        let root = BitMapBackend::with_buffer(&mut **canvas, (width, height)).into_drawing_area();
        for (index, row) in self.rows.iter().enumerate() {
            let y = (index as u32 * self.row_height() + self.config.title_height / 2) as i32;
            // The original image column has no title
            for (column, title) in [(1, &row.true_title), (2, &row.predicted_title)] {
                let x = column * panel + panel / 2;
                root.draw(&Text::new(title.as_str(), (x, y), style.clone()))
                    .map_err(|err| ExplainError::Render(err.to_string()))?;
            }
        }
        root.present()
            .map_err(|err| ExplainError::Render(err.to_string()))?;

        Ok(())
    }
}

/// Register the title font once per process, returns whether a font is available.
fn register_font(configured: Option<&Path>) -> bool {
    *FONT.get_or_init(|| {
        let candidates = configured
            .into_iter()
            .map(Path::to_path_buf)
            .chain(SYSTEM_FONTS.iter().map(PathBuf::from));

        for candidate in candidates {
            let Ok(bytes) = fs::read(&candidate) else {
                continue;
            };
            // The font registry keeps the bytes for the lifetime of the process
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if plotters::style::register_font(FONT_FAMILY, FontStyle::Normal, bytes).is_ok() {
                tracing::debug!("Using font {}", candidate.display());
                return true;
            }
            tracing::warn!("Could not parse font {}", candidate.display());
        }

        false
    })
}
