//! Drawing primitives on RGB images.
//!
//! Segments are clipped to the canvas before rasterizing, so endpoints far off
//! frame cost nothing. Single-pixel strokes are rasterized by `imageproc`;
//! thickness and dashes are layered on top.

use glam::DVec2;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

/// Draw a line with thickness as parallel one-pixel strokes at perpendicular offsets.
///
/// Returns whether any part of the segment was inside the canvas.
pub fn draw_line(image: &mut RgbImage, start: DVec2, end: DVec2, color: Rgb<u8>, thickness: f32) -> bool {
    let Some((start, end)) = clip_to_canvas(image, start, end, thickness) else {
        return false;
    };

    let delta = end - start;
    let length = delta.length();
    if length < 0.001 {
        stroke(image, start, start, color);
        return true;
    }

    let dir = delta / length;
    let perp = DVec2::new(-dir.y, dir.x);
    let half_thick = thickness as f64 / 2.0;
    let thick_steps = (thickness.ceil() as i32).max(1);

    for j in -thick_steps..=thick_steps {
        let offset = j as f64 * 0.5;
        if offset.abs() > half_thick {
            continue;
        }
        stroke(image, start + perp * offset, end + perp * offset, color);
    }
    true
}

/// Draw a dashed line: `dash` pixels on, `gap` pixels off.
pub fn draw_dotted_line(
    image: &mut RgbImage,
    start: DVec2,
    end: DVec2,
    color: Rgb<u8>,
    thickness: f32,
    dash: f64,
    gap: f64,
) -> bool {
    let length = (end - start).length();
    let period = dash + gap;
    if length < 0.001 || period <= 0.0 {
        return draw_line(image, start, end, color, thickness);
    }

    let dir = (end - start) / length;
    let mut drawn = false;
    let mut pos = 0.0;
    while pos < length {
        let dash_end = (pos + dash).min(length);
        drawn |= draw_line(image, start + dir * pos, start + dir * dash_end, color, thickness);
        pos += period;
    }
    drawn
}

/// Draw consecutive segments of `points`. Returns the number of segments that
/// touched the canvas.
pub fn draw_polyline(image: &mut RgbImage, points: &[DVec2], color: Rgb<u8>, thickness: f32) -> usize {
    points
        .windows(2)
        .filter(|pair| draw_line(image, pair[0], pair[1], color, thickness))
        .count()
}

pub fn draw_dotted_polyline(
    image: &mut RgbImage,
    points: &[DVec2],
    color: Rgb<u8>,
    thickness: f32,
    dash: f64,
    gap: f64,
) -> usize {
    points
        .windows(2)
        .filter(|pair| draw_dotted_line(image, pair[0], pair[1], color, thickness, dash, gap))
        .count()
}

/// One-pixel stroke between pixel centres nearest to `start` and `end`.
#[inline]
fn stroke(image: &mut RgbImage, start: DVec2, end: DVec2, color: Rgb<u8>) {
    let start = start.round().as_vec2();
    let end = end.round().as_vec2();
    draw_line_segment_mut(image, (start.x, start.y), (end.x, end.y), color);
}

/// Liang–Barsky clip of a segment against the canvas grown by `thickness`.
fn clip_to_canvas(image: &RgbImage, start: DVec2, end: DVec2, thickness: f32) -> Option<(DVec2, DVec2)> {
    if !start.is_finite() || !end.is_finite() {
        return None;
    }
    let pad = thickness as f64 + 1.0;
    let min = DVec2::splat(-pad);
    let max = DVec2::new(image.width() as f64, image.height() as f64) + pad;

    let delta = end - start;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;

    for (p, q) in [
        (-delta.x, start.x - min.x),
        (delta.x, max.x - start.x),
        (-delta.y, start.y - min.y),
        (delta.y, max.y - start.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }

    Some((start + delta * t0, start + delta * t1))
}
