//! Overlay rendering in two frames.
//!
//! * Camera-native: the photo as shot, grid and figures projected through the
//!   solution. Output has exactly the photo's dimensions, row 0 at the top.
//! * Sky-normalized: the photo resampled into a north-up, east-left frame
//!   ([`SkyFrame`]) with a dotted graticule and the same figures.
//!
//! A feature that cannot be drawn is logged and skipped; it never aborts a render.

mod drawing;
mod sky_frame;


use image::{Rgb, RgbImage};

use crate::config::{GridConfig, OverlayConfig};
use crate::error::{Error, Result};
use crate::overlay::{OverlayFeature, OverlayGeometry};
use crate::projection::{
    ProjectedFeature, image_footprint, project_grid_lines, project_overlay_feature,
};
use crate::wcs::CoordinateSolution;

pub use drawing::{draw_dotted_line, draw_dotted_polyline, draw_line, draw_polyline};
pub use sky_frame::{SkyFrame, angular_separation, densify};

/// What one render drew.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub grid_segments: usize,
    pub segments_drawn: usize,
    pub features_drawn: usize,
    /// Features that failed to draw.
    pub features_skipped: usize,
    /// Features rejected by projection culling or entirely off canvas.
    pub features_culled: usize,
}

#[derive(Debug, Clone)]
pub struct Rendered {
    pub image: RgbImage,
    pub report: RenderReport,
}

/// Line styles for a render.
#[derive(Debug, Clone, Copy)]
pub struct RenderStyle {
    pub grid_color: Rgb<u8>,
    pub grid_thickness: f32,
    pub figure_color: Rgb<u8>,
    pub figure_thickness: f32,
}

impl From<&OverlayConfig> for RenderStyle {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            grid_color: Rgb(config.grid_color),
            grid_thickness: config.grid_thickness,
            figure_color: Rgb(config.figure_color),
            figure_thickness: config.figure_thickness,
        }
    }
}

pub fn render_camera_native(
    photo: &RgbImage,
    solution: &impl CoordinateSolution,
    geometry: Option<&OverlayGeometry>,
    grid: &GridConfig,
    style: &RenderStyle,
) -> Rendered {
    let (width, height) = photo.dimensions();
    let mut canvas = photo.clone();
    let mut report = RenderReport::default();

    let footprint = image_footprint(solution, width, height, grid.footprint_padding_deg);
    tracing::debug!("Camera-native footprint: {:?}", footprint);

    for line in project_grid_lines(solution, &footprint, width, height, grid) {
        for run in &line.runs {
            report.grid_segments +=
                draw_polyline(&mut canvas, run, style.grid_color, style.grid_thickness);
        }
    }

    if let Some(geometry) = geometry {
        draw_features(&mut canvas, geometry, &mut report, style, |feature| {
            project_overlay_feature(solution, feature, &footprint, width, height, grid.feature_margin)
        });
    }

    tracing::info!(
        "Camera-native overlay: {} grid segments, {} figure segments, {} features drawn, {} skipped",
        report.grid_segments,
        report.segments_drawn,
        report.features_drawn,
        report.features_skipped
    );
    Rendered {
        image: canvas,
        report,
    }
}

/// Renders into a north-up frame. Fails only when the frame itself cannot be
/// built (e.g. a solution too distorted to reproject the photo border).
pub fn render_sky_normalized(
    photo: &RgbImage,
    solution: &(impl CoordinateSolution + Sync),
    geometry: Option<&OverlayGeometry>,
    grid: &GridConfig,
    style: &RenderStyle,
) -> Result<Rendered> {
    let (width, height) = photo.dimensions();
    let frame = SkyFrame::around(solution, width, height)?;
    let mut canvas = frame.resample(photo, solution);
    let mut report = RenderReport::default();

    let footprint = image_footprint(solution, width, height, grid.footprint_padding_deg);
    report.grid_segments =
        frame.draw_graticule(&mut canvas, &footprint, grid, style.grid_color, style.grid_thickness);

    if let Some(geometry) = geometry {
        draw_features(&mut canvas, geometry, &mut report, style, |feature| {
            frame.project_feature(feature, &footprint, grid.feature_margin)
        });
    }

    tracing::info!(
        "Sky-normalized overlay {}x{}: {} grid segments, {} figure segments, {} features drawn, {} skipped",
        frame.width(),
        frame.height(),
        report.grid_segments,
        report.segments_drawn,
        report.features_drawn,
        report.features_skipped
    );
    Ok(Rendered {
        image: canvas,
        report,
    })
}

fn draw_features(
    canvas: &mut RgbImage,
    geometry: &OverlayGeometry,
    report: &mut RenderReport,
    style: &RenderStyle,
    project: impl Fn(&OverlayFeature) -> Option<ProjectedFeature>,
) {
    for feature in &geometry.features {
        let Some(projected) = project(feature) else {
            report.features_culled += 1;
            continue;
        };
        match draw_feature(canvas, &projected, style) {
            Ok(0) => report.features_culled += 1,
            Ok(segments) => {
                report.segments_drawn += segments;
                report.features_drawn += 1;
            }
            Err(err) => {
                tracing::warn!("{}", err);
                report.features_skipped += 1;
            }
        }
    }
}

/// Draws every run of a projected feature. A feature with no run of two or
/// more vertices has nothing to connect and is an error.
pub fn draw_feature(
    canvas: &mut RgbImage,
    feature: &ProjectedFeature,
    style: &RenderStyle,
) -> Result<usize> {
    if feature.runs.iter().all(|run| run.len() < 2) {
        return Err(Error::Render {
            feature: feature.name.clone(),
            reason: format!(
                "only {} isolated projectable vertices",
                feature.vertex_count()
            ),
        });
    }
    Ok(feature
        .runs
        .iter()
        .map(|run| draw_polyline(canvas, run, style.figure_color, style.figure_thickness))
        .sum())
}
