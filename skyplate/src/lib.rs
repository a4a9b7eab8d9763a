//! Skyplate - plate-solve a night-sky photo and overlay the sky on it.
//!
//! The photo is solved remotely by nova.astrometry.net; the returned coordinate
//! solution drives an equatorial grid and constellation figures drawn over the
//! photo, once in the camera's own frame and once resampled north-up.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use skyplate::{ApiKey, Config};
//!
//! let config = Config::load("skyplate.yaml".as_ref())?;
//! let api_key = ApiKey::from_env()?;
//! let summary = skyplate::run(&config, &api_key)?;
//! println!("Solved job {}", summary.job.job);
//! ```

pub mod config;
pub mod discovery;
mod error;
pub mod fetch;
pub mod job;
pub mod nova;
pub mod overlay;
pub mod pipeline;
pub mod projection;
pub mod render;
pub mod wcs;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{API_KEY_ENV, ApiKey, Config};
pub use error::{Error, PollPhase, Result};

// ============================================================================
// Remote solving
// ============================================================================

pub use job::{JobOutcome, JobRunner, JobState, SolvedJob};
pub use nova::{Calibration, JobId, JobStatus, NovaClient, Session, SolverApi, SubmissionId};

// ============================================================================
// Geometry
// ============================================================================

pub use overlay::{OverlayFeature, OverlayGeometry};
pub use projection::{Footprint, GridLine, image_footprint, project_grid_lines, project_overlay_feature};
pub use wcs::{CoordinateSolution, SkyCoord, Wcs};

// ============================================================================
// Rendering and pipeline
// ============================================================================

pub use pipeline::{RunSummary, run};
pub use render::{RenderReport, render_camera_native, render_sky_normalized};
