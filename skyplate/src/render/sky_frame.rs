//! North-up, east-left frame for the sky-normalized render.

use glam::DVec2;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, warp_into_with};

use super::drawing::draw_dotted_polyline;
use crate::config::GridConfig;
use crate::error::{Error, Result};
use crate::overlay::OverlayFeature;
use crate::projection::{Footprint, ProjectedFeature, project_grid_lines, project_overlay_feature};
use crate::wcs::{CoordinateSolution, SkyCoord, Wcs, normalize_ra};

/// Samples per image edge when measuring the reprojected bounds.
const EDGE_SAMPLES: usize = 16;
/// Frames larger than this multiple of the source's longest side are rejected.
const MAX_GROWTH: f64 = 4.0;
/// Longest straight piece of a densified sky polyline, degrees.
const DENSIFY_STEP_DEG: f64 = 1.0;
const GRATICULE_DASH: f64 = 6.0;
const GRATICULE_GAP: f64 = 4.0;
/// Source position for frame pixels that map behind the photo's tangent plane.
const OUTSIDE: (f32, f32) = (-1.0, -1.0);

/// A TAN frame centred on the photo centre with north up and east left, at the
/// photo's own pixel scale, sized to contain the whole reprojected photo.
#[derive(Debug, Clone)]
pub struct SkyFrame {
    wcs: Wcs,
    width: u32,
    height: u32,
}

impl SkyFrame {
    pub fn around(solution: &impl CoordinateSolution, width: u32, height: u32) -> Result<Self> {
        let center_px = DVec2::new(width as f64 / 2.0, height as f64 / 2.0);
        let center = solution.pixel_to_sky(center_px);
        let scale = pixel_scale_deg(solution, center_px);
        if !center.is_finite() || !(scale.is_finite() && scale > 0.0) {
            return Err(frame_error(format!(
                "cannot measure photo centre/scale (centre {center}, scale {scale})"
            )));
        }

        // Provisional frame with the tangent point at pixel (0, 0).
        let provisional = north_up_wcs(DVec2::ZERO, center, scale)?;

        let mut min = DVec2::INFINITY;
        let mut max = DVec2::NEG_INFINITY;
        for edge_point in boundary_points(width, height) {
            let p = provisional.sky_to_pixel(solution.pixel_to_sky(edge_point));
            if !p.is_finite() {
                return Err(frame_error(format!(
                    "photo edge at {edge_point:?} does not reproject"
                )));
            }
            min = min.min(p);
            max = max.max(p);
        }

        let size = (max - min).ceil() + DVec2::ONE;
        let limit = MAX_GROWTH * width.max(height) as f64;
        if size.x > limit || size.y > limit {
            return Err(frame_error(format!(
                "reprojected frame {}x{} is implausibly large",
                size.x, size.y
            )));
        }

        let wcs = north_up_wcs(-min, center, scale)?;
        tracing::debug!(
            "Sky frame {}x{} centred on {} at {:.3}\"/px",
            size.x,
            size.y,
            center,
            scale * 3600.0
        );
        Ok(Self {
            wcs,
            width: size.x.max(1.0) as u32,
            height: size.y.max(1.0) as u32,
        })
    }

    pub fn wcs(&self) -> &Wcs {
        &self.wcs
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bilinear resample of `photo` into this frame; uncovered pixels stay black.
    pub fn resample(&self, photo: &RgbImage, solution: &(impl CoordinateSolution + Sync)) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        warp_into_with(
            photo,
            |x, y| {
                let sky = self.wcs.pixel_to_sky(DVec2::new(x as f64, y as f64));
                let src = solution.sky_to_pixel(sky);
                if src.is_finite() {
                    (src.x as f32, src.y as f32)
                } else {
                    OUTSIDE
                }
            },
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
            &mut out,
        );
        out
    }

    /// Densifies and projects `feature` into this frame.
    pub fn project_feature(
        &self,
        feature: &OverlayFeature,
        footprint: &Footprint,
        margin: f64,
    ) -> Option<ProjectedFeature> {
        let dense = OverlayFeature::new(
            feature.name.clone(),
            feature.lines.iter().map(|line| densify(line, DENSIFY_STEP_DEG)).collect(),
        );
        project_overlay_feature(&self.wcs, &dense, footprint, self.width, self.height, margin)
    }

    /// Dotted RA/Dec grid over `footprint`. Returns the number of segments drawn.
    pub fn draw_graticule(
        &self,
        canvas: &mut RgbImage,
        footprint: &Footprint,
        grid: &GridConfig,
        color: Rgb<u8>,
        thickness: f32,
    ) -> usize {
        project_grid_lines(&self.wcs, footprint, self.width, self.height, grid)
            .iter()
            .flat_map(|line| line.runs.iter())
            .map(|run| draw_dotted_polyline(canvas, run, color, thickness, GRATICULE_DASH, GRATICULE_GAP))
            .sum()
    }
}

fn frame_error(reason: String) -> Error {
    Error::Render {
        feature: "sky frame".to_string(),
        reason,
    }
}

/// North up (Dec decreasing with row), east left (RA decreasing with column).
fn north_up_wcs(crpix: DVec2, center: SkyCoord, scale_deg: f64) -> Result<Wcs> {
    Wcs::new(crpix, center, [[-scale_deg, 0.0], [0.0, -scale_deg]])
}

/// Mean angular size of one pixel at `at`, degrees.
fn pixel_scale_deg(solution: &impl CoordinateSolution, at: DVec2) -> f64 {
    let here = solution.pixel_to_sky(at);
    let right = solution.pixel_to_sky(at + DVec2::X);
    let down = solution.pixel_to_sky(at + DVec2::Y);
    (angular_separation(here, right) + angular_separation(here, down)) / 2.0
}

/// Great-circle distance in degrees (haversine).
pub fn angular_separation(a: SkyCoord, b: SkyCoord) -> f64 {
    let (dec1, dec2) = (a.dec.to_radians(), b.dec.to_radians());
    let half_ddec = (dec2 - dec1) / 2.0;
    let half_dra = (b.ra - a.ra).to_radians() / 2.0;
    let h = half_ddec.sin().powi(2) + dec1.cos() * dec2.cos() * half_dra.sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin().to_degrees()
}

/// Points along the photo border, corners included.
fn boundary_points(width: u32, height: u32) -> Vec<DVec2> {
    let (w, h) = (width as f64, height as f64);
    let mut points = Vec::with_capacity(4 * EDGE_SAMPLES);
    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / EDGE_SAMPLES as f64;
        points.push(DVec2::new(t * w, 0.0));
        points.push(DVec2::new(w, t * h));
        points.push(DVec2::new(w - t * w, h));
        points.push(DVec2::new(0.0, h - t * h));
    }
    points
}

/// Inserts vertices so no piece is longer than `max_step` degrees. RA steps
/// take the short way across the 0/360 seam.
pub fn densify(line: &[SkyCoord], max_step: f64) -> Vec<SkyCoord> {
    let mut out = Vec::with_capacity(line.len());
    for pair in line.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        out.push(a);
        let dra = (b.ra - a.ra + 540.0).rem_euclid(360.0) - 180.0;
        let ddec = b.dec - a.dec;
        let mean_cos = ((a.dec + b.dec) / 2.0).to_radians().cos();
        let length = (dra * mean_cos).hypot(ddec);
        if !length.is_finite() {
            continue;
        }
        let pieces = (length / max_step).ceil() as usize;
        for k in 1..pieces {
            let t = k as f64 / pieces as f64;
            out.push(SkyCoord::new(normalize_ra(a.ra + dra * t), a.dec + ddec * t));
        }
    }
    if let Some(last) = line.last() {
        out.push(*last);
    }
    out
}
