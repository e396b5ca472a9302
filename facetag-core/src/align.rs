use crate::detect::FacialLandmarks;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("Degenerate landmarks, cannot estimate transform")]
    DegenerateLandmarks,
    #[error("Transform is not invertible")]
    Singular,
}

/// Output size for aligned face
pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmark positions in a 112x112 crop
pub const CANONICAL_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Similarity transform `x' = a*x - b*y + tx`, `y' = b*x + a*y + ty`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    /// Least-squares fit mapping `src` points onto `dst` points
    pub fn estimate(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<Self> {
        let n = src.len().min(dst.len());
        if n < 2 {
            return None;
        }
        let nf = n as f32;

        let mean = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts[..n]
                .iter()
                .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / nf, sy / nf)
        };
        let (mx, my) = mean(src);
        let (mu, mv) = mean(dst);

        let mut spread = 0.0;
        let mut dot = 0.0;
        let mut cross = 0.0;
        for (&(x, y), &(u, v)) in src.iter().zip(dst.iter()).take(n) {
            let (x, y) = (x - mx, y - my);
            let (u, v) = (u - mu, v - mv);
            spread += x * x + y * y;
            dot += x * u + y * v;
            cross += x * v - y * u;
        }

        if spread < 1e-6 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: mu - a * mx + b * my,
            ty: mv - b * mx - a * my,
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn to_projection(self) -> Option<Projection> {
        Projection::from_matrix([
            self.a, -self.b, self.tx, //
            self.b, self.a, self.ty, //
            0.0, 0.0, 1.0,
        ])
    }
}

/// Warp a face to the canonical 112x112 ArcFace crop
pub fn align_face(image: &RgbImage, landmarks: &FacialLandmarks) -> Result<RgbImage, AlignmentError> {
    let transform = SimilarityTransform::estimate(&landmarks.points(), &CANONICAL_LANDMARKS)
        .ok_or(AlignmentError::DegenerateLandmarks)?;
    let projection = transform.to_projection().ok_or(AlignmentError::Singular)?;

    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut aligned,
    );
    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-3, "{} != {}", a, b);
    }

    #[test]
    fn test_identity_transform() {
        let t = SimilarityTransform::estimate(&CANONICAL_LANDMARKS, &CANONICAL_LANDMARKS).unwrap();
        assert_close(t.a, 1.0);
        assert_close(t.b, 0.0);
        assert_close(t.tx, 0.0);
        assert_close(t.ty, 0.0);
    }

    #[test]
    fn test_scaled_and_shifted_landmarks() {
        let src: Vec<(f32, f32)> = CANONICAL_LANDMARKS
            .iter()
            .map(|&(x, y)| (x * 2.0 + 10.0, y * 2.0 + 20.0))
            .collect();

        let t = SimilarityTransform::estimate(&src, &CANONICAL_LANDMARKS).unwrap();
        assert_close(t.a, 0.5);
        assert_close(t.b, 0.0);
        for (s, d) in src.iter().zip(CANONICAL_LANDMARKS.iter()) {
            let (u, v) = t.apply(*s);
            assert_close(u, d.0);
            assert_close(v, d.1);
        }
    }

    #[test]
    fn test_degenerate_landmarks() {
        let same = [(5.0, 5.0); 5];
        assert!(SimilarityTransform::estimate(&same, &CANONICAL_LANDMARKS).is_none());
    }

    #[test]
    fn test_align_face_output_size() {
        let image = RgbImage::from_pixel(224, 224, Rgb([200, 100, 50]));
        let landmarks = FacialLandmarks {
            left_eye: (76.6, 103.4),
            right_eye: (147.1, 103.0),
            nose: (112.1, 143.5),
            left_mouth: (83.1, 184.7),
            right_mouth: (141.5, 184.4),
        };
        let aligned = align_face(&image, &landmarks).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        let center = aligned.get_pixel(56, 56);
        for (got, want) in center.0.iter().zip([200u8, 100, 50]) {
            assert!(got.abs_diff(want) <= 1, "{:?}", center);
        }
    }
}
