use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gallery: GalleryConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub detection: DetectionConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchingConfig,
    #[serde(default)]
    pub annotation: AnnotationConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryConfig {
    pub images_dir: PathBuf,

    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default)]
    pub multi_face: MultiFacePolicy,
}

fn default_extension() -> String {
    "jpg".to_string()
}

/// What to do with a reference image in which more than one face is found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultiFacePolicy {
    /// Skip the reference image
    #[default]
    Reject,
    /// Keep the detector's first face (largest, most confident)
    MostProminent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub image_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub image_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Maximum embedding distance at which two faces are the same person
    pub threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    pub box_color: [u8; 3],
    pub text_color: [u8; 3],
    pub text_scale: u32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            box_color: [255, 0, 0],
            text_color: [255, 255, 255],
            text_scale: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // CPU-only execution
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. ./facetag.toml (working directory)
    /// 2. ~/.config/facetag/facetag.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        let mut candidates = vec![PathBuf::from("facetag.toml")];
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("facetag")
                    .join("facetag.toml"),
            );
        }
        Self::load_first(&candidates)
    }

    /// First candidate file that exists and parses, else compiled defaults.
    /// A file that exists but cannot be loaded is skipped with a warning.
    fn load_first(candidates: &[PathBuf]) -> Result<Self, ConfigError> {
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_path(path) {
                Ok(config) => {
                    config.validate()?;
                    log::debug!("Loaded configuration from {}", path.display());
                    return Ok(config);
                }
                Err(e) => log::warn!("Ignoring config file {}: {}", path.display(), e),
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gallery.extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::Validation(
                "Gallery image extension cannot be empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Detection confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !self.matching.threshold.is_finite() || self.matching.threshold < 0.0 {
            return Err(ConfigError::Validation(
                "Matching threshold must be a non-negative distance".to_string(),
            ));
        }

        if self.output.image_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Output image path cannot be empty".to_string(),
            ));
        }

        if self.annotation.text_scale == 0 {
            return Err(ConfigError::Validation(
                "Annotation text scale must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery: GalleryConfig {
                images_dir: PathBuf::from("assets/images"),
                extension: default_extension(),
                multi_face: MultiFacePolicy::Reject,
            },
            input: InputConfig {
                image_path: PathBuf::from("input/image.jpg"),
            },
            output: OutputConfig {
                image_path: PathBuf::from("output/recognized_faces_out.jpg"),
            },
            detection: DetectionConfig {
                model_path: PathBuf::from("models/scrfd_500m.onnx"),
                confidence_threshold: 0.5,
            },
            embedding: EmbeddingConfig {
                model_path: PathBuf::from("models/arcface_mobilefacenet.onnx"),
            },
            matching: MatchingConfig {
                threshold: crate::backend::DEFAULT_TOLERANCE,
            },
            annotation: AnnotationConfig::default(),
            runtime: RuntimeConfig {},
        }
    }
}
