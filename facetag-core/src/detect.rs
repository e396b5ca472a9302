use crate::config::RuntimeConfig;
use crate::runtime::OnnxRuntime;
use image::{imageops, RgbImage};
use ort::session::Session;
use ort::value::Value;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Empty input image")]
    EmptyImage,
    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),
}

const INPUT_SIZE: u32 = 640;

/// SCRFD uses 3 feature pyramid levels with different strides
const FEATURE_STRIDES: [usize; 3] = [8, 16, 32];
const NUM_ANCHORS: usize = 2;
const NMS_IOU_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

/// Face region in pixel coordinates, edges ordered (top, right, bottom, left)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceLocation {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceLocation {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

impl From<&BoundingBox> for FaceLocation {
    fn from(bbox: &BoundingBox) -> Self {
        Self {
            top: bbox.y.round() as i32,
            right: (bbox.x + bbox.width).round() as i32,
            bottom: (bbox.y + bbox.height).round() as i32,
            left: bbox.x.round() as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacialLandmarks {
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub nose: (f32, f32),
    pub left_mouth: (f32, f32),
    pub right_mouth: (f32, f32),
}

impl FacialLandmarks {
    pub fn points(&self) -> [(f32, f32); 5] {
        [
            self.left_eye,
            self.right_eye,
            self.nose,
            self.left_mouth,
            self.right_mouth,
        ]
    }

    fn scaled(&self, factor: f32) -> Self {
        let s = |(x, y): (f32, f32)| (x * factor, y * factor);
        Self {
            left_eye: s(self.left_eye),
            right_eye: s(self.right_eye),
            nose: s(self.nose),
            left_mouth: s(self.left_mouth),
            right_mouth: s(self.right_mouth),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub landmarks: FacialLandmarks,
    pub confidence: f32,
}

impl DetectedFace {
    pub fn location(&self) -> FaceLocation {
        FaceLocation::from(&self.bbox)
    }

    /// Ranking key: prefer larger, more confident faces
    fn prominence(&self) -> f32 {
        self.confidence * self.bbox.area().max(0.0).sqrt()
    }
}

pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
}

impl FaceDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        runtime: &OnnxRuntime,
        runtime_config: &RuntimeConfig,
        confidence_threshold: f32,
    ) -> Result<Self, DetectionError> {
        let session = runtime
            .create_session(model_path, runtime_config)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

        Ok(Self {
            session,
            confidence_threshold,
        })
    }

    /// Detect faces in an RGB image.
    ///
    /// Returns an empty list when no face clears the confidence threshold.
    /// Faces are ordered most prominent first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectionError::EmptyImage);
        }

        let (input_tensor, det_scale) = preprocess(image);
        let input_value = Value::from_array(input_tensor)
            .map_err(|e| DetectionError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs!["input.1" => input_value])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        if outputs.len() < FEATURE_STRIDES.len() * 3 {
            return Err(DetectionError::Inference(format!(
                "Expected {} outputs (scores, boxes, keypoints per stride), got {}",
                FEATURE_STRIDES.len() * 3,
                outputs.len()
            )));
        }

        let mut detections = Vec::new();
        for (level, &stride) in FEATURE_STRIDES.iter().enumerate() {
            let extract = |idx: usize, what: &str| {
                outputs[idx].try_extract_tensor::<f32>().map_err(|e| {
                    DetectionError::Inference(format!(
                        "Failed to extract {} for stride {}: {}",
                        what, stride, e
                    ))
                })
            };

            // Output layout: all scores, then all boxes, then all keypoints
            let (_, scores) = extract(level, "scores")?;
            let (_, boxes) = extract(level + FEATURE_STRIDES.len(), "boxes")?;
            let (_, keypoints) = extract(level + FEATURE_STRIDES.len() * 2, "keypoints")?;

            let found = decode_stride(stride, scores, boxes, keypoints, self.confidence_threshold);
            log::trace!("Stride {}: {} candidates", stride, found.len());
            detections.extend(found);
        }

        log::debug!("Found {} detections before NMS", detections.len());

        // Map from the letterboxed input back to source pixels
        let inverse = 1.0 / det_scale;
        let mut faces: Vec<DetectedFace> = nms(detections, NMS_IOU_THRESHOLD)
            .into_iter()
            .map(|face| DetectedFace {
                bbox: face.bbox.scaled(inverse),
                landmarks: face.landmarks.scaled(inverse),
                confidence: face.confidence,
            })
            .collect();

        faces.sort_by(|a, b| {
            b.prominence()
                .partial_cmp(&a.prominence())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(faces)
    }
}

/// Anchor centers for one stride, row-major, `NUM_ANCHORS` copies per cell
fn anchor_centers(stride: usize) -> Vec<(f32, f32)> {
    let feat_size = INPUT_SIZE as usize / stride;
    let mut centers = Vec::with_capacity(feat_size * feat_size * NUM_ANCHORS);
    for row in 0..feat_size {
        for col in 0..feat_size {
            let center = ((col * stride) as f32, (row * stride) as f32);
            centers.extend(std::iter::repeat(center).take(NUM_ANCHORS));
        }
    }
    centers
}

/// Decode one stride level into detections in letterboxed input coordinates
fn decode_stride(
    stride: usize,
    scores: &[f32],
    boxes: &[f32],
    keypoints: &[f32],
    threshold: f32,
) -> Vec<DetectedFace> {
    let s = stride as f32;
    let mut faces = Vec::new();

    for (idx, (cx, cy)) in anchor_centers(stride).into_iter().enumerate() {
        let Some(&score) = scores.get(idx) else {
            break;
        };
        if score < threshold {
            continue;
        }

        let (Some(b), Some(k)) = (
            boxes.get(idx * 4..idx * 4 + 4),
            keypoints.get(idx * 10..idx * 10 + 10),
        ) else {
            continue;
        };

        // Box regression is distances from the anchor center, in stride units
        let x1 = cx - b[0] * s;
        let y1 = cy - b[1] * s;
        let x2 = cx + b[2] * s;
        let y2 = cy + b[3] * s;

        let point = |i: usize| (cx + k[i * 2] * s, cy + k[i * 2 + 1] * s);

        faces.push(DetectedFace {
            bbox: BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
            },
            landmarks: FacialLandmarks {
                left_eye: point(0),
                right_eye: point(1),
                nose: point(2),
                left_mouth: point(3),
                right_mouth: point(4),
            },
            confidence: score,
        });
    }

    faces
}

/// Letterbox into a square input and convert to a normalized NCHW tensor.
///
/// Returns the tensor and the scale applied to the source image.
fn preprocess(image: &RgbImage) -> (([usize; 4], Vec<f32>), f32) {
    let (width, height) = image.dimensions();
    let det_scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_width = ((width as f32 * det_scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_height = ((height as f32 * det_scale).round() as u32).clamp(1, INPUT_SIZE);

    let resized = imageops::resize(image, new_width, new_height, imageops::FilterType::Triangle);
    let mut canvas = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
    imageops::replace(&mut canvas, &resized, 0, 0);

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let offset = (y * INPUT_SIZE + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = (pixel[c] as f32 - 127.5) / 128.0;
        }
    }

    let shape = [1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
    ((shape, data), det_scale)
}

/// Non-Maximum Suppression, highest confidence wins
fn nms(mut detections: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<DetectedFace> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, size: f32, confidence: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x,
                y,
                width: size,
                height: size,
            },
            landmarks: FacialLandmarks {
                left_eye: (0.0, 0.0),
                right_eye: (0.0, 0.0),
                nose: (0.0, 0.0),
                left_mouth: (0.0, 0.0),
                right_mouth: (0.0, 0.0),
            },
            confidence,
        }
    }

    #[test]
    fn test_bbox_iou() {
        let bbox1 = face(0.0, 0.0, 10.0, 1.0).bbox;
        let bbox2 = face(5.0, 5.0, 10.0, 1.0).bbox;

        // 25 / (100 + 100 - 25)
        assert!((bbox1.iou(&bbox2) - 0.1428).abs() < 0.01);
    }

    #[test]
    fn test_location_edges() {
        let bbox = BoundingBox {
            x: 10.4,
            y: 20.6,
            width: 30.0,
            height: 40.0,
        };
        let loc = FaceLocation::from(&bbox);
        assert_eq!(loc, FaceLocation::new(21, 40, 61, 10));
        assert_eq!(loc.width(), 30);
        assert_eq!(loc.height(), 40);
    }

    #[test]
    fn test_anchor_centers_layout() {
        let centers = anchor_centers(32);
        let feat = (INPUT_SIZE / 32) as usize;
        assert_eq!(centers.len(), feat * feat * NUM_ANCHORS);
        assert_eq!(centers[0], (0.0, 0.0));
        assert_eq!(centers[1], (0.0, 0.0));
        assert_eq!(centers[2], (32.0, 0.0));
        assert_eq!(centers[feat * NUM_ANCHORS], (0.0, 32.0));
    }

    #[test]
    fn test_decode_stride_thresholds_and_scales() {
        let stride = 32;
        let n = anchor_centers(stride).len();
        let mut scores = vec![0.0; n];
        let mut boxes = vec![0.0; n * 4];
        let mut keypoints = vec![0.0; n * 10];

        // Anchor index 2 sits at (32, 0)
        scores[2] = 0.9;
        boxes[8..12].copy_from_slice(&[0.5, 0.0, 1.0, 2.0]);
        keypoints[20] = 0.25;

        let faces = decode_stride(stride, &scores, &boxes, &keypoints, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!(f.bbox.x, 16.0);
        assert_eq!(f.bbox.y, 0.0);
        assert_eq!(f.bbox.width, 48.0);
        assert_eq!(f.bbox.height, 64.0);
        assert_eq!(f.landmarks.left_eye, (40.0, 0.0));
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let detections = vec![
            face(0.0, 0.0, 10.0, 0.6),
            face(1.0, 1.0, 10.0, 0.9),
            face(50.0, 50.0, 10.0, 0.7),
        ];
        let kept = nms(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_preprocess_letterbox_scale() {
        let image = RgbImage::from_pixel(1280, 320, image::Rgb([255, 255, 255]));
        let ((shape, data), scale) = preprocess(&image);
        assert_eq!(shape, [1, 3, 640, 640]);
        assert!((scale - 0.5).abs() < 1e-6);
        // Padding below the letterboxed content is black
        let bottom_left = (639 * 640) as usize;
        assert!((data[bottom_left] + 127.5 / 128.0).abs() < 1e-6);
        assert!((data[0] - 127.5 / 128.0).abs() < 0.01);
    }

    #[test]
    #[ignore] // Requires model file
    fn test_face_detection() {
        let runtime = OnnxRuntime::new();
        let mut detector =
            FaceDetector::new("models/scrfd_500m.onnx", &runtime, &RuntimeConfig {}, 0.5).unwrap();
        let faces = detector.detect(&RgbImage::new(320, 240)).unwrap();
        assert!(faces.is_empty());
    }
}
