//! Face detection and embedding backends.
//!
//! Matching and gallery code only talk to [`FaceBackend`], so a different
//! detector or embedding model can be dropped in without touching them.

use crate::align::{align_face, AlignmentError};
use crate::config::Config;
use crate::detect::{DetectionError, FaceDetector, FaceLocation};
use crate::embed::{EmbedError, Embedding, FaceEmbedder};
use crate::runtime::OnnxRuntime;
use image::RgbImage;
use thiserror::Error;

/// Default maximum distance at which two embeddings are the same person
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),
    #[error("Alignment error: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbedError),
}

/// Channel order a backend expects its input pixels in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// One face found in an image
#[derive(Debug, Clone)]
pub struct Detection {
    pub location: FaceLocation,
    pub embedding: Embedding,
}

pub trait FaceBackend {
    /// Locate every face in `image` and compute one embedding per face
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<Detection>, BackendError>;

    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    /// Euclidean distance between two embeddings
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        euclidean_distance(a, b)
    }

    fn is_match(&self, known: &Embedding, candidate: &Embedding, threshold: f32) -> bool {
        self.distance(known, candidate) <= threshold
    }
}

/// Embeddings of different lengths come from different models and are
/// infinitely far apart.
pub fn euclidean_distance(a: &Embedding, b: &Embedding) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Swap the red and blue channels in place
pub fn swap_red_blue(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        pixel.0.swap(0, 2);
    }
}

/// SCRFD detection, landmark alignment and ArcFace embedding via ONNX Runtime
pub struct OnnxBackend {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxBackend {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let runtime = OnnxRuntime::new();

        log::info!("Loading face detection model...");
        let detector = FaceDetector::new(
            &config.detection.model_path,
            &runtime,
            &config.runtime,
            config.detection.confidence_threshold,
        )?;

        log::info!("Loading face embedding model...");
        let embedder = FaceEmbedder::new(&config.embedding.model_path, &runtime, &config.runtime)?;

        Ok(Self { detector, embedder })
    }
}

impl FaceBackend for OnnxBackend {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<Detection>, BackendError> {
        let faces = self.detector.detect(image)?;

        faces
            .iter()
            .map(|face| -> Result<Detection, BackendError> {
                let aligned = align_face(image, &face.landmarks)?;
                let embedding = self.embedder.embed(&aligned)?;
                log::debug!(
                    "Embedded face at {:?} (confidence {:.2})",
                    face.location(),
                    face.confidence
                );
                Ok(Detection {
                    location: face.location(),
                    embedding,
                })
            })
            .collect()
    }
}
