//! Retrieval of a solved job's results.
//!
//! The WCS artifact can lag the job's `success` status by a few seconds, so it
//! is retried with its own backoff budget. Overlay geometry and the solver's
//! annotated image are optional: failures degrade the output instead of
//! aborting the run.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;

use crate::config::ArtifactConfig;
use crate::error::{Error, Result};
use crate::job::SolvedJob;
use crate::nova::{Calibration, SolverApi, Transport};
use crate::overlay::OverlayGeometry;
use crate::wcs::Wcs;

/// The downloaded WCS header and the solution parsed from it.
#[derive(Debug, Clone)]
pub struct WcsArtifact {
    pub wcs: Wcs,
    pub raw: Bytes,
}

pub struct ResultFetcher<'a, S: SolverApi> {
    api: &'a S,
    job: &'a SolvedJob,
    artifact: ArtifactConfig,
    sleep: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a, S: SolverApi> ResultFetcher<'a, S> {
    pub fn new(api: &'a S, job: &'a SolvedJob, artifact: ArtifactConfig) -> Self {
        Self {
            api,
            job,
            artifact,
            sleep: Box::new(std::thread::sleep),
        }
    }

    pub fn with_sleeper(mut self, sleep: impl FnMut(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn calibration(&self) -> Result<Calibration> {
        let calibration = self.api.calibration(&self.job.session, self.job.job)?;
        tracing::info!("Calibration: {}", calibration);
        Ok(calibration)
    }

    /// Downloads and parses the WCS artifact, retrying while it is not ready.
    pub fn coordinate_solution(&mut self) -> Result<WcsArtifact> {
        let job = self.job.job;
        let attempts = self.artifact.attempts.max(1);

        for attempt in 1..=attempts {
            match self.api.wcs_file(&self.job.session, job) {
                Ok(raw) => {
                    let wcs = Wcs::from_fits_header(&raw)?;
                    tracing::info!(
                        "WCS for job {}: centre {}, {:.3}\"/px, rotation {:.2}°{}",
                        job,
                        wcs.crval,
                        wcs.pixel_scale_arcsec(),
                        wcs.rotation_degrees(),
                        if wcs.sip.is_some() { ", SIP" } else { "" }
                    );
                    return Ok(WcsArtifact { wcs, raw });
                }
                Err(err) if err.is_transient() => {
                    if attempt == attempts {
                        tracing::warn!("WCS artifact attempt {}/{}: {}", attempt, attempts, err);
                        break;
                    }
                    let delay = self.artifact.delay(attempt - 1);
                    tracing::warn!(
                        "WCS artifact attempt {}/{}: {}, retrying in {:.1}s",
                        attempt,
                        attempts,
                        err,
                        delay.as_secs_f64()
                    );
                    (self.sleep)(delay);
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::ArtifactUnavailable { job, attempts })
    }

    /// The solver's own annotated rendering, if it can be had in one try.
    pub fn annotated_image(&self) -> Option<Bytes> {
        match self.api.annotated_image(&self.job.session, self.job.job) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!("Annotated image unavailable (ignored): {}", err);
                None
            }
        }
    }

}

/// Loads constellation lines from an `http(s)://` URL or a local file.
pub fn fetch_overlay_geometry(source: &str, transport: &Transport) -> Result<OverlayGeometry> {
    let text = if source.starts_with("http://") || source.starts_with("https://") {
        transport.get_text(source).map_err(|e| Error::OverlayFetch {
            source_name: source.to_string(),
            reason: e.to_string(),
        })?
    } else {
        std::fs::read_to_string(Path::new(source)).map_err(|e| Error::OverlayFetch {
            source_name: source.to_string(),
            reason: e.to_string(),
        })?
    };

    let geometry = OverlayGeometry::from_geojson(source, &text)?;
    tracing::info!("Loaded {} overlay features from {}", geometry.features.len(), source);
    Ok(geometry)
}

/// [`fetch_overlay_geometry`], degrading to `None` (grid-only render) on failure.
pub fn constellation_lines(source: &str, transport: &Transport) -> Option<OverlayGeometry> {
    match fetch_overlay_geometry(source, transport) {
        Ok(geometry) => Some(geometry),
        Err(err) => {
            tracing::warn!("{}; rendering grid only", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::{RetryConfig, ServiceConfig};
    use crate::nova::{JobId, Session, SubmissionId};
    use crate::testing::{MockResponse, MockServer, ScriptedSolver, init_tracing, not_ready, transient};
    use crate::wcs::CoordinateSolution;

    fn solved() -> SolvedJob {
        SolvedJob {
            session: Session::new("s"),
            submission: SubmissionId(1),
            job: JobId(77),
        }
    }

    fn wcs_header() -> Bytes {
        Bytes::from(crate::wcs::sample_fits_header())
    }

    fn artifact_config(attempts: u32) -> ArtifactConfig {
        ArtifactConfig {
            attempts,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            fetch_annotated: false,
        }
    }

    #[test]
    fn test_wcs_retried_until_ready() {
        init_tracing();
        let solver = ScriptedSolver::new().with_wcs_files([Err(not_ready()), Err(transient()), Ok(wcs_header())]);
        let job = solved();
        let sleeps = RefCell::new(Vec::new());

        let artifact = ResultFetcher::new(&solver, &job, artifact_config(5))
            .with_sleeper(|d| sleeps.borrow_mut().push(d))
            .coordinate_solution()
            .unwrap();

        assert_eq!(solver.count("wcs_file"), 3);
        assert_eq!(sleeps.into_inner(), vec![Duration::from_secs(2), Duration::from_secs(4)]);
        assert!(artifact.wcs.pixel_to_sky(artifact.wcs.crpix).is_finite());
        assert_eq!(artifact.raw, wcs_header());
    }

    #[test]
    fn test_wcs_never_ready_is_unavailable() {
        let solver = ScriptedSolver::new();
        let job = solved();
        let sleeps = RefCell::new(0);

        let err = ResultFetcher::new(&solver, &job, artifact_config(4))
            .with_sleeper(|_| *sleeps.borrow_mut() += 1)
            .coordinate_solution()
            .unwrap_err();

        assert!(matches!(err, Error::ArtifactUnavailable { job: JobId(77), attempts: 4 }));
        assert_eq!(solver.count("wcs_file"), 4);
        assert_eq!(sleeps.into_inner(), 3);
    }

    #[test]
    fn test_unvalidated_multiplier_waits_max_delay() {
        let solver = ScriptedSolver::new();
        let job = solved();
        let sleeps = RefCell::new(Vec::new());
        let artifact = ArtifactConfig {
            multiplier: -2.0,
            ..artifact_config(3)
        };

        let err = ResultFetcher::new(&solver, &job, artifact)
            .with_sleeper(|d| sleeps.borrow_mut().push(d))
            .coordinate_solution()
            .unwrap_err();

        assert!(matches!(err, Error::ArtifactUnavailable { attempts: 3, .. }));
        assert_eq!(
            sleeps.into_inner(),
            vec![Duration::from_secs(2), Duration::from_secs(30)]
        );
    }

    #[test]
    fn test_garbage_wcs_is_invalid() {
        let solver = ScriptedSolver::new().with_wcs_files([Ok(Bytes::from_static(b"not a fits header"))]);
        let job = solved();
        let err = ResultFetcher::new(&solver, &job, artifact_config(3))
            .with_sleeper(|_| {})
            .coordinate_solution()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidWcs(_)));
    }

    #[test]
    fn test_annotated_image_is_best_effort() {
        let solver = ScriptedSolver::new();
        let job = solved();
        assert!(ResultFetcher::new(&solver, &job, artifact_config(1)).annotated_image().is_none());

        solver.annotated.borrow_mut().push_back(Ok(Bytes::from_static(b"\x89PNG")));
        assert!(ResultFetcher::new(&solver, &job, artifact_config(1)).annotated_image().is_some());
    }

    #[test]
    fn test_calibration_with_missing_fields() {
        let solver = ScriptedSolver::new();
        solver.calibrations.borrow_mut().push_back(Ok(Calibration {
            ra: Some(83.8),
            ..Calibration::default()
        }));
        let job = solved();
        let calibration = ResultFetcher::new(&solver, &job, artifact_config(1)).calibration().unwrap();
        assert_eq!(calibration.ra, Some(83.8));
        assert!(calibration.to_string().contains("Dec=unknown"));
    }

    fn transport() -> Transport {
        let retry = RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            multiplier: 1.0,
            jitter: 0.0,
        };
        Transport::new(&ServiceConfig::default(), retry).unwrap()
    }

    #[test]
    fn test_overlay_from_url() {
        let server = MockServer::start([MockResponse::json(
            200,
            r#"{"features": [{"id": "Ori", "geometry": {"type": "MultiLineString",
                "coordinates": [[[88.8, 7.4], [81.3, 6.3]]]}}]}"#,
        )]);
        let url = format!("{}/constellations.lines.json", server.url());
        let geometry = constellation_lines(&url, &transport()).unwrap();
        assert_eq!(geometry.features[0].name, "Ori");
    }

    #[test]
    fn test_overlay_failure_degrades_to_none() {
        let server = MockServer::start([MockResponse::html(404, "missing")]);
        let url = format!("{}/constellations.lines.json", server.url());
        assert!(constellation_lines(&url, &transport()).is_none());

        let err = fetch_overlay_geometry("/nonexistent/lines.json", &transport()).unwrap_err();
        assert!(err.is_degradable());
    }

    #[test]
    fn test_overlay_from_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.json");
        std::fs::write(
            &path,
            r#"{"features": [{"id": "Cas", "geometry": {"type": "LineString", "coordinates": [[-10, 60], [10, 62]]}}]}"#,
        )
        .unwrap();
        let geometry = constellation_lines(path.to_str().unwrap(), &transport()).unwrap();
        assert_eq!(geometry.features[0].lines[0][0].ra, 350.0);
    }
}
