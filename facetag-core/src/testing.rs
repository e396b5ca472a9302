use crate::backend::{BackendError, ChannelOrder, Detection, FaceBackend};
use crate::detect::FaceLocation;
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array1;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Backend that answers from a script keyed on the red value of pixel (0, 0)
pub struct ScriptedBackend {
    faces: HashMap<u8, Vec<Vec<f32>>>,
    order: ChannelOrder,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            faces: HashMap::new(),
            order: ChannelOrder::Rgb,
        }
    }

    pub fn with_faces<const N: usize>(mut self, marker: u8, embeddings: &[[f32; N]]) -> Self {
        self.faces
            .insert(marker, embeddings.iter().map(|e| e.to_vec()).collect());
        self
    }

    pub fn expecting(mut self, order: ChannelOrder) -> Self {
        self.order = order;
        self
    }

    /// Box reported for the i-th face of any image
    pub fn location_for(i: usize) -> FaceLocation {
        let offset = 10 + 40 * i as i32;
        FaceLocation::new(10, offset + 30, 40, offset)
    }
}

impl FaceBackend for ScriptedBackend {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<Detection>, BackendError> {
        let marker = image.get_pixel(0, 0)[0];
        Ok(self
            .faces
            .get(&marker)
            .map(|embeddings| {
                embeddings
                    .iter()
                    .enumerate()
                    .map(|(i, e)| Detection {
                        location: Self::location_for(i),
                        embedding: Array1::from_vec(e.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn channel_order(&self) -> ChannelOrder {
        self.order
    }
}

/// Fresh, empty directory under the system temp dir
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("facetag-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write a lossless image whose pixels all carry `marker` in the red channel
pub fn write_marker_image(path: &Path, marker: u8) {
    RgbImage::from_pixel(64, 64, Rgb([marker, 0, 0]))
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}
