use crate::backend::{swap_red_blue, BackendError, ChannelOrder, FaceBackend};
use crate::detect::FaceLocation;
use crate::embed::Embedding;
use crate::gallery::Gallery;
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Label given to faces that match nobody in the gallery
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Cannot match a detected face against an empty gallery")]
    EmptyGallery,
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    Known(String),
    Unknown,
}

impl Label {
    pub fn is_known(&self) -> bool {
        matches!(self, Label::Known(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Label::Known(name) => name,
            Label::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl Serialize for Label {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome for one detected face
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub location: FaceLocation,
    pub label: Label,
    /// Distance to the nearest gallery entry
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub recognized: usize,
    pub unknown: usize,
}

impl Summary {
    pub fn from_results(results: &[MatchResult]) -> Self {
        let recognized = results.iter().filter(|r| r.label.is_known()).count();
        Self {
            recognized,
            unknown: results.len() - recognized,
        }
    }
}

/// Label one embedding against the gallery.
///
/// The nearest entry (first one on ties) wins, but only if the backend also
/// considers that entry a match at `threshold`.
pub fn match_embedding<B: FaceBackend>(
    backend: &B,
    gallery: &Gallery,
    probe: &Embedding,
    threshold: f32,
) -> Result<(Label, f32), MatchError> {
    let (best_index, best_distance) = gallery
        .entries()
        .iter()
        .map(|entry| backend.distance(&entry.embedding, probe))
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((idx, d)),
        })
        .ok_or(MatchError::EmptyGallery)?;

    let best = &gallery.entries()[best_index];
    log::debug!(
        "Nearest gallery entry {} at distance {:.3}",
        best.name,
        best_distance
    );

    let label = if backend.is_match(&best.embedding, probe, threshold) {
        Label::Known(best.name.clone())
    } else {
        Label::Unknown
    };
    Ok((label, best_distance))
}

/// Detect, embed and label every face in an RGB query image.
///
/// Results follow the backend's detection order.
pub fn recognize<B: FaceBackend>(
    backend: &mut B,
    image: &RgbImage,
    gallery: &Gallery,
    threshold: f32,
) -> Result<Vec<MatchResult>, MatchError> {
    let detections = match backend.channel_order() {
        ChannelOrder::Rgb => backend.detect_and_embed(image)?,
        ChannelOrder::Bgr => {
            let mut converted = image.clone();
            swap_red_blue(&mut converted);
            backend.detect_and_embed(&converted)?
        }
    };
    log::info!("Detected {} face(s) in query image", detections.len());

    detections
        .into_iter()
        .map(|detection| -> Result<MatchResult, MatchError> {
            let (label, distance) =
                match_embedding(&*backend, gallery, &detection.embedding, threshold)?;
            Ok(MatchResult {
                location: detection.location,
                label,
                distance,
            })
        })
        .collect()
}
