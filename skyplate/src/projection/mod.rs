//! Sky geometry → image pixels through a [`CoordinateSolution`].
//!
//! Everything here is a pure function of its inputs. Samples that project to a
//! non-finite pixel (behind the tangent plane) or far outside the frame are
//! dropped, and a dropped sample splits a polyline into separate runs so that a
//! line is never bridged across a singularity.


use glam::DVec2;

use crate::config::GridConfig;
use crate::overlay::OverlayFeature;
use crate::wcs::{CoordinateSolution, SkyCoord, image_corners, normalize_ra};

/// Sky bounding region covered by an image frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub ra_min: f64,
    pub ra_max: f64,
    pub dec_min: f64,
    pub dec_max: f64,
}

impl Footprint {
    pub const FULL_SKY: Footprint = Footprint {
        ra_min: 0.0,
        ra_max: 360.0,
        dec_min: -90.0,
        dec_max: 90.0,
    };

    /// RA covers the whole circle, i.e. meridians wrap and parallels close.
    pub fn is_full_ra(&self) -> bool {
        self.ra_max - self.ra_min >= 360.0
    }

    pub fn overlaps_dec(&self, lo: f64, hi: f64) -> bool {
        hi >= self.dec_min && lo <= self.dec_max
    }
}

/// Sky region covered by a `width × height` frame, padded by `padding` degrees.
///
/// When the corners' RA span exceeds 180° the frame straddles the 0/360 seam
/// (or a pole) and the RA range becomes the full [0, 360). A celestial pole
/// inside the frame also forces the full RA range and extends Dec to that pole.
pub fn image_footprint(
    solution: &impl CoordinateSolution,
    width: u32,
    height: u32,
    padding: f64,
) -> Footprint {
    let corners = image_corners(width, height).map(|p| solution.pixel_to_sky(p));
    if corners.iter().any(|c| !c.is_finite()) {
        tracing::debug!("Non-finite footprint corner, using the full sky");
        return Footprint::FULL_SKY;
    }

    let extent = |f: fn(&SkyCoord) -> f64| {
        corners.iter().map(f).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
    };
    let (ra_lo, ra_hi) = extent(|c| c.ra);
    let (dec_lo, dec_hi) = extent(|c| c.dec);

    let mut dec_min = (dec_lo - padding).max(-90.0);
    let mut dec_max = (dec_hi + padding).min(90.0);

    let north = contains_pixel(solution.sky_to_pixel(SkyCoord::new(0.0, 90.0)), width, height);
    let south = contains_pixel(solution.sky_to_pixel(SkyCoord::new(0.0, -90.0)), width, height);
    if north {
        dec_max = 90.0;
    }
    if south {
        dec_min = -90.0;
    }

    let (ra_min, ra_max) = if ra_hi - ra_lo > 180.0 || north || south {
        (0.0, 360.0)
    } else {
        ((ra_lo - padding).max(0.0), (ra_hi + padding).min(360.0))
    };

    Footprint {
        ra_min,
        ra_max,
        dec_min,
        dec_max,
    }
}

fn contains_pixel(p: DVec2, width: u32, height: u32) -> bool {
    p.is_finite() && p.x >= 0.0 && p.y >= 0.0 && p.x <= width as f64 && p.y <= height as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridLineKind {
    /// Constant RA.
    Meridian,
    /// Constant Dec.
    Parallel,
}

/// One grid line as drawable runs of finite, in-range pixel samples.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLine {
    pub kind: GridLineKind,
    /// RA for meridians, Dec for parallels, degrees.
    pub value: f64,
    pub runs: Vec<Vec<DVec2>>,
}

impl GridLine {
    pub fn sample_count(&self) -> usize {
        self.runs.iter().map(Vec::len).sum()
    }
}

/// RA values of the meridians crossing `footprint`, every `step` degrees.
pub fn meridian_values(footprint: &Footprint, step: f64) -> Vec<f64> {
    let start = (footprint.ra_min / step).ceil() * step;
    let mut values = Vec::new();
    let mut k = 0;
    loop {
        let ra = start + k as f64 * step;
        if ra > footprint.ra_max || ra >= 360.0 {
            break;
        }
        values.push(ra);
        k += 1;
    }
    values
}

/// Dec values of the parallels: from `floor(dec_min/step)·step` to
/// `ceil(dec_max/step)·step` plus one extra step, limited to [-90, 90].
pub fn parallel_values(footprint: &Footprint, step: f64) -> Vec<f64> {
    let first = (footprint.dec_min / step).floor() as i64;
    let last = (footprint.dec_max / step).ceil() as i64 + 1;
    (first..=last)
        .map(|k| k as f64 * step)
        .filter(|dec| (-90.0..=90.0).contains(dec))
        .collect()
}

/// Meridians and parallels over `footprint`, projected into a `width × height`
/// frame. Lines with no drawable run are omitted.
pub fn project_grid_lines(
    solution: &impl CoordinateSolution,
    footprint: &Footprint,
    width: u32,
    height: u32,
    grid: &GridConfig,
) -> Vec<GridLine> {
    let samples = grid.samples_per_line.max(2);
    let bounds = SampleBounds::new(width, height);
    let mut lines = Vec::new();

    for ra in meridian_values(footprint, grid.ra_step_deg) {
        let points = (0..samples).map(|i| {
            let t = i as f64 / (samples - 1) as f64;
            SkyCoord::new(ra, lerp(footprint.dec_min, footprint.dec_max, t))
        });
        let runs = project_runs(solution, points, &bounds);
        if !runs.is_empty() {
            lines.push(GridLine {
                kind: GridLineKind::Meridian,
                value: ra,
                runs,
            });
        }
    }

    let (ra_start, ra_end) = if footprint.is_full_ra() {
        unwrapped_ra_window(solution, width, height, grid.footprint_padding_deg)
            .unwrap_or((footprint.ra_min, footprint.ra_max))
    } else {
        (footprint.ra_min, footprint.ra_max)
    };

    for dec in parallel_values(footprint, grid.dec_step_deg) {
        let points = (0..samples).map(|i| {
            let t = i as f64 / (samples - 1) as f64;
            SkyCoord::new(normalize_ra(lerp(ra_start, ra_end, t)), dec)
        });
        let runs = project_runs(solution, points, &bounds);
        if !runs.is_empty() {
            lines.push(GridLine {
                kind: GridLineKind::Parallel,
                value: dec,
                runs,
            });
        }
    }

    lines
}

/// RA interval covered by a frame that straddles the 0/360 seam, unwrapped
/// around the frame centre (so either end may lie outside [0, 360]) and padded
/// by `padding` degrees.
///
/// `None` when a corner does not project, a pole is in the frame or the corners
/// span more than half the circle: parallels then need the whole RA range.
fn unwrapped_ra_window(
    solution: &impl CoordinateSolution,
    width: u32,
    height: u32,
    padding: f64,
) -> Option<(f64, f64)> {
    if pole_in_frame(solution, width, height) {
        return None;
    }
    let center = solution.pixel_to_sky(DVec2::new(width as f64 / 2.0, height as f64 / 2.0));
    if !center.is_finite() {
        return None;
    }

    let (mut lo, mut hi) = (0.0f64, 0.0f64);
    for corner in image_corners(width, height) {
        let sky = solution.pixel_to_sky(corner);
        if !sky.is_finite() {
            return None;
        }
        let offset = (sky.ra - center.ra + 540.0).rem_euclid(360.0) - 180.0;
        lo = lo.min(offset);
        hi = hi.max(offset);
    }
    if hi - lo > 180.0 {
        return None;
    }
    Some((center.ra + lo - padding, center.ra + hi + padding))
}

fn pole_in_frame(solution: &impl CoordinateSolution, width: u32, height: u32) -> bool {
    [90.0, -90.0].into_iter().any(|dec| {
        contains_pixel(solution.sky_to_pixel(SkyCoord::new(0.0, dec)), width, height)
    })
}

/// An overlay feature projected into pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedFeature {
    pub name: String,
    /// Runs of finite pixels, in the feature's vertex order.
    pub runs: Vec<Vec<DVec2>>,
}

impl ProjectedFeature {
    pub fn vertex_count(&self) -> usize {
        self.runs.iter().map(Vec::len).sum()
    }
}

/// Projects `feature` or rejects it.
///
/// Rejected when its Dec range misses the footprint, when every vertex is
/// non-finite, or when no finite vertex lies inside the frame grown by
/// `margin` (a fraction of the frame size) on each side.
pub fn project_overlay_feature(
    solution: &impl CoordinateSolution,
    feature: &OverlayFeature,
    footprint: &Footprint,
    width: u32,
    height: u32,
    margin: f64,
) -> Option<ProjectedFeature> {
    let (dec_lo, dec_hi) = feature.dec_range()?;
    if !footprint.overlaps_dec(dec_lo, dec_hi) {
        return None;
    }

    let (w, h) = (width as f64, height as f64);
    let near_frame = |p: &DVec2| {
        (-margin * w..=(1.0 + margin) * w).contains(&p.x)
            && (-margin * h..=(1.0 + margin) * h).contains(&p.y)
    };

    let mut runs = Vec::new();
    let mut any_near = false;
    for line in &feature.lines {
        let mut current: Vec<DVec2> = Vec::new();
        for vertex in line {
            let pixel = solution.sky_to_pixel(*vertex);
            if pixel.is_finite() {
                any_near |= near_frame(&pixel);
                current.push(pixel);
            } else if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
    }

    if runs.is_empty() || !any_near {
        return None;
    }
    Some(ProjectedFeature {
        name: feature.name.clone(),
        runs,
    })
}

/// Grid samples are kept within `[-w, 2w] × [-h, 2h]`.
struct SampleBounds {
    min: DVec2,
    max: DVec2,
}

impl SampleBounds {
    fn new(width: u32, height: u32) -> Self {
        let size = DVec2::new(width as f64, height as f64);
        Self {
            min: -size,
            max: size * 2.0,
        }
    }

    fn contains(&self, p: DVec2) -> bool {
        p.is_finite() && p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

fn project_runs(
    solution: &impl CoordinateSolution,
    points: impl Iterator<Item = SkyCoord>,
    bounds: &SampleBounds,
) -> Vec<Vec<DVec2>> {
    let mut runs = Vec::new();
    let mut current: Vec<DVec2> = Vec::new();

    for sky in points {
        let pixel = solution.sky_to_pixel(sky);
        if bounds.contains(pixel) {
            current.push(pixel);
        } else if !current.is_empty() {
            flush_run(&mut runs, &mut current);
        }
    }
    flush_run(&mut runs, &mut current);
    runs
}

/// A single isolated sample cannot be drawn as a line.
fn flush_run(runs: &mut Vec<Vec<DVec2>>, current: &mut Vec<DVec2>) {
    if current.len() >= 2 {
        runs.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
