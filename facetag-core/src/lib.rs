pub mod align;
pub mod annotate;
pub mod backend;
pub mod config;
pub mod detect;
pub mod embed;
pub mod font;
pub mod gallery;
pub mod matcher;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use serde::Serialize;
use thiserror::Error;

use annotate::AnnotationStyle;
use backend::{FaceBackend, OnnxBackend};
use gallery::{GalleryBuild, SkippedReference};
use matcher::{MatchResult, Summary};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Backend error: {0}")]
    Backend(#[from] backend::BackendError),
    #[error("Gallery error: {0}")]
    Gallery(#[from] gallery::GalleryError),
    #[error("Matching error: {0}")]
    Match(#[from] matcher::MatchError),
    #[error("Cannot read query image {path}: {source}")]
    UnreadableQueryImage {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Cannot write output image {path}: {source}")]
    Output {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Decode an image by sniffing its content, falling back to the extension
pub fn read_rgb_image<P: AsRef<Path>>(path: P) -> Result<RgbImage, image::ImageError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image.to_rgb8())
}

/// Everything one tagging run produced
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub results: Vec<MatchResult>,
    pub summary: Summary,
    pub output_path: PathBuf,
    pub gallery_size: usize,
    pub skipped: Vec<SkippedReference>,
}

/// Builds the gallery, matches a query image and writes the annotated copy
pub struct FaceTagger<B: FaceBackend> {
    config: config::Config,
    backend: B,
}

impl FaceTagger<OnnxBackend> {
    /// Create a tagger backed by the ONNX models named in the configuration
    pub fn new(config: config::Config) -> Result<Self, Error> {
        config.validate()?;
        let backend = OnnxBackend::new(&config)?;
        Ok(Self { config, backend })
    }
}

impl<B: FaceBackend> FaceTagger<B> {
    /// Create a tagger around any backend. The configuration is validated
    /// the same way as for [`FaceTagger::new`].
    pub fn with_backend(config: config::Config, backend: B) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    /// Discover reference images in the configured directory and embed them
    pub fn build_gallery(&mut self) -> Result<GalleryBuild, Error> {
        let gallery_config = &self.config.gallery;
        let references = gallery::discover(&gallery_config.images_dir, &gallery_config.extension)?;
        let built = gallery::build(&mut self.backend, &references, gallery_config.multi_face);

        log::info!(
            "Gallery ready: {} known face(s), {} reference image(s) skipped",
            built.gallery.len(),
            built.skipped.len()
        );
        Ok(built)
    }

    /// Run the configured query image through the whole pipeline
    pub fn run(&mut self) -> Result<Report, Error> {
        let query = self.config.input.image_path.clone();
        let output = self.config.output.image_path.clone();
        self.run_on(&query, &output)
    }

    /// Tag `query` and write the annotated image to `output`.
    ///
    /// Nothing is written if any step fails.
    pub fn run_on(&mut self, query: &Path, output: &Path) -> Result<Report, Error> {
        let GalleryBuild { gallery, skipped } = self.build_gallery()?;

        let mut image = read_rgb_image(query).map_err(|source| Error::UnreadableQueryImage {
            path: query.to_path_buf(),
            source,
        })?;

        let results = matcher::recognize(
            &mut self.backend,
            &image,
            &gallery,
            self.config.matching.threshold,
        )?;

        annotate::annotate(
            &mut image,
            &results,
            &AnnotationStyle::from(&self.config.annotation),
        );

        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| Error::OutputDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        image.save(output).map_err(|source| Error::Output {
            path: output.to_path_buf(),
            source,
        })?;
        log::info!("Annotated image saved to {}", output.display());

        Ok(Report {
            summary: Summary::from_results(&results),
            results,
            output_path: output.to_path_buf(),
            gallery_size: gallery.len(),
            skipped,
        })
    }
}
