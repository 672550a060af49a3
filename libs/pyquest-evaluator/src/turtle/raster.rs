//! Raster comparison for free-form drawings.
//!
//! The recorded path is drawn onto a white canvas with the turtle origin at
//! the centre and y pointing up, then scored against a reference PNG with a
//! tolerant F1 over ink pixels: an ink pixel counts as matched when the other
//! image has ink within `radius` pixels.

use crate::error::{EvalError, Result};
use base64::{engine::general_purpose, Engine as _};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, Luma};
use pyquest_common::config::CanvasSize;
use pyquest_common::types::PathSegment;
use std::io::Cursor;

const BACKGROUND: Luma<u8> = Luma([255]);
const INK: Luma<u8> = Luma([0]);

/// Pixels darker than this are ink.
const INK_THRESHOLD: u8 = 128;

fn to_canvas(point: [f64; 2], canvas: CanvasSize) -> (f64, f64) {
    (
        canvas.width as f64 / 2.0 + point[0],
        canvas.height as f64 / 2.0 - point[1],
    )
}

/// Liang-Barsky clip of a segment against the rectangle `[min, max]`.
/// `None` when no part of the segment lies inside.
fn clip(from: (f64, f64), to: (f64, f64), min: (f64, f64), max: (f64, f64)) -> Option<((f64, f64), (f64, f64))> {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);

    for (p, q) in [
        (-dx, from.0 - min.0),
        (dx, max.0 - from.0),
        (-dy, from.1 - min.1),
        (dy, max.1 - from.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let start = (from.0 + dx * t0, from.1 + dy * t0);
    let end = (from.0 + dx * t1, from.1 + dy * t1);
    let finite = [start.0, start.1, end.0, end.1].iter().all(|v| v.is_finite());
    finite.then_some((start, end))
}

fn draw_line(image: &mut GrayImage, from: (f64, f64), to: (f64, f64)) {
    let (width, height) = image.dimensions();
    if ![from.0, from.1, to.0, to.1].iter().all(|v| v.is_finite()) {
        return;
    }
    // Stepping is bounded by the canvas, however far the turtle travelled
    let Some((from, to)) = clip(from, to, (-0.5, -0.5), (width as f64 - 0.5, height as f64 - 0.5)) else {
        return;
    };

    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as usize;

    for step in 0..=steps {
        let t = step as f64 / steps as f64;
        let x = (from.0 + dx * t).round();
        let y = (from.1 + dy * t).round();
        if x >= 0.0 && y >= 0.0 && x < width as f64 && y < height as f64 {
            image.put_pixel(x as u32, y as u32, INK);
        }
    }
}

/// Draw the segments; anything off the canvas is clipped.
pub fn rasterize(segments: &[PathSegment], canvas: CanvasSize) -> GrayImage {
    let mut image = GrayImage::from_pixel(canvas.width, canvas.height, BACKGROUND);
    for segment in segments {
        draw_line(
            &mut image,
            to_canvas(segment.start, canvas),
            to_canvas(segment.end, canvas),
        );
    }
    image
}

/// Decode a reference PNG to grayscale at canvas size. Transparent pixels
/// count as background.
pub fn load_reference(bytes: &[u8], canvas: CanvasSize) -> Result<GrayImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| EvalError::TurtleValidation(format!("failed to decode reference image: {}", e)))?;

    let with_alpha = decoded.to_luma_alpha8();
    let (width, height) = with_alpha.dimensions();
    let gray = GrayImage::from_fn(width, height, |x, y| {
        let [luma, alpha] = with_alpha.get_pixel(x, y).0;
        if alpha < INK_THRESHOLD {
            BACKGROUND
        } else {
            Luma([luma])
        }
    });

    if (width, height) == (canvas.width, canvas.height) {
        Ok(gray)
    } else {
        Ok(imageops::resize(&gray, canvas.width, canvas.height, FilterType::Nearest))
    }
}

fn ink_mask(image: &GrayImage) -> Vec<bool> {
    image.pixels().map(|p| p.0[0] < INK_THRESHOLD).collect()
}

/// Grow every ink pixel into a (2r+1)-square neighbourhood.
fn dilate(mask: &[bool], width: usize, height: usize, radius: usize) -> Vec<bool> {
    let mut grown = vec![false; mask.len()];
    for y in 0..height {
        for x in 0..width {
            if !mask[y * width + x] {
                continue;
            }
            for ny in y.saturating_sub(radius)..=(y + radius).min(height - 1) {
                for nx in x.saturating_sub(radius)..=(x + radius).min(width - 1) {
                    grown[ny * width + nx] = true;
                }
            }
        }
    }
    grown
}

fn matched_fraction(ink: &[bool], other_grown: &[bool]) -> f64 {
    let total = ink.iter().filter(|&&p| p).count();
    if total == 0 {
        return 0.0;
    }
    let matched = ink.iter().zip(other_grown).filter(|(&p, &g)| p && g).count();
    matched as f64 / total as f64
}

/// Similarity in [0, 1]. Two blank canvases are identical.
pub fn similarity(student: &GrayImage, reference: &GrayImage, radius: u32) -> Result<f64> {
    if student.dimensions() != reference.dimensions() {
        return Err(EvalError::TurtleValidation(format!(
            "canvas is {:?} but reference is {:?}",
            student.dimensions(),
            reference.dimensions()
        )));
    }

    let (width, height) = (student.width() as usize, student.height() as usize);
    let student_ink = ink_mask(student);
    let reference_ink = ink_mask(reference);

    let student_any = student_ink.iter().any(|&p| p);
    let reference_any = reference_ink.iter().any(|&p| p);
    match (student_any, reference_any) {
        (false, false) => return Ok(1.0),
        (false, true) | (true, false) => return Ok(0.0),
        (true, true) => {}
    }

    let radius = radius as usize;
    let precision = matched_fraction(&student_ink, &dilate(&reference_ink, width, height, radius));
    let recall = matched_fraction(&reference_ink, &dilate(&student_ink, width, height, radius));

    if precision + recall == 0.0 {
        return Ok(0.0);
    }
    Ok(2.0 * precision * recall / (precision + recall))
}

pub fn to_png(image: &GrayImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| EvalError::TurtleValidation(format!("failed to encode canvas: {}", e)))?;
    Ok(bytes)
}

/// Canvas as an inline `data:` URL for the UI.
pub fn to_data_url(image: &GrayImage) -> Result<String> {
    let png = to_png(image)?;
    Ok(format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(png)))
}
