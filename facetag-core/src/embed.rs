use crate::align::ALIGNED_SIZE;
use crate::config::RuntimeConfig;
use crate::runtime::OnnxRuntime;
use image::RgbImage;
use ndarray::Array1;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Input must be {expected}x{expected}, got {width}x{height}")]
    InputSize { expected: u32, width: u32, height: u32 },
    #[error("Model produced an embedding of unexpected shape {0:?}")]
    InvalidShape(Vec<i64>),
}

/// L2-normalized face embedding vector
pub type Embedding = Array1<f32>;

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        runtime: &OnnxRuntime,
        runtime_config: &RuntimeConfig,
    ) -> Result<Self, EmbedError> {
        let session = runtime
            .create_session(model_path, runtime_config)
            .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;

        Ok(Self { session })
    }

    /// Generate an embedding for an aligned 112x112 RGB face crop
    pub fn embed(&mut self, aligned_face: &RgbImage) -> Result<Embedding, EmbedError> {
        let (width, height) = aligned_face.dimensions();
        if width != ALIGNED_SIZE || height != ALIGNED_SIZE {
            return Err(EmbedError::InputSize {
                expected: ALIGNED_SIZE,
                width,
                height,
            });
        }

        let input_value = Value::from_array(preprocess(aligned_face))
            .map_err(|e| EmbedError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("Failed to extract embedding: {}", e)))?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        let dim = match dims.as_slice() {
            [1, d] if *d > 0 => *d as usize,
            _ => return Err(EmbedError::InvalidShape(dims)),
        };

        Ok(normalize_embedding(Array1::from_vec(data[..dim].to_vec())))
    }
}

/// Aligned crop to NCHW tensor, `(pixel - 127.5) / 128`
fn preprocess(image: &RgbImage) -> ([usize; 4], Vec<f32>) {
    let size = ALIGNED_SIZE as usize;
    let plane = size * size;
    let mut data = vec![0.0f32; plane * 3];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * size + x as usize;
        for c in 0..3 {
            data[c * plane + offset] = (pixel[c] as f32 - 127.5) / 128.0;
        }
    }

    ([1, 3, size, size], data)
}

/// L2 normalize an embedding vector
pub fn normalize_embedding(mut embedding: Embedding) -> Embedding {
    let norm = embedding.dot(&embedding).sqrt();
    if norm > 0.0 {
        embedding /= norm;
    }
    embedding
}
