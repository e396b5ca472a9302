use crate::config::AnnotationConfig;
use crate::detect::FaceLocation;
use crate::font;
use crate::matcher::MatchResult;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const BOX_THICKNESS: i32 = 2;
const LABEL_HEIGHT: i32 = 20;
const LABEL_PADDING: i32 = 6;

#[derive(Debug, Clone, Copy)]
pub struct AnnotationStyle {
    pub box_color: Rgb<u8>,
    pub text_color: Rgb<u8>,
    pub text_scale: u32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self::from(&AnnotationConfig::default())
    }
}

impl From<&AnnotationConfig> for AnnotationStyle {
    fn from(config: &AnnotationConfig) -> Self {
        Self {
            box_color: Rgb(config.box_color),
            text_color: Rgb(config.text_color),
            text_scale: config.text_scale.max(1),
        }
    }
}

/// Rect spanning `left..right`, `top..bottom`, at least 1px each way
fn span(left: i32, top: i32, right: i32, bottom: i32) -> Rect {
    let width = (right - left).max(1) as u32;
    let height = (bottom - top).max(1) as u32;
    Rect::at(left, top).of_size(width, height)
}

/// Draw one labeled face box
pub fn draw_face(image: &mut RgbImage, location: &FaceLocation, name: &str, style: &AnnotationStyle) {
    let FaceLocation {
        top,
        right,
        bottom,
        left,
    } = *location;

    for inset in 0..BOX_THICKNESS {
        draw_hollow_rect_mut(
            image,
            span(left + inset, top + inset, right - inset, bottom - inset),
            style.box_color,
        );
    }

    draw_filled_rect_mut(image, span(left, bottom - LABEL_HEIGHT, right, bottom), style.box_color);

    // Baseline sits LABEL_PADDING above the bottom edge
    let glyph_height = (font::GLYPH_HEIGHT * style.text_scale) as i32;
    font::draw_text(
        image,
        left + LABEL_PADDING,
        bottom - LABEL_PADDING - glyph_height,
        name,
        style.text_scale,
        style.text_color,
    );
}

/// Draw every match result onto `image` in place
pub fn annotate(image: &mut RgbImage, results: &[MatchResult], style: &AnnotationStyle) {
    for result in results {
        draw_face(image, &result.location, result.label.as_str(), style);
    }
}
