//! nova.astrometry.net protocol client.
//!
//! Three-step remote protocol (authenticate, submit, poll) plus the result
//! downloads. [`SolverApi`] is the seam the job state machine and the result
//! fetcher are written against; [`NovaClient`] is the HTTP implementation.
//!
//! # Endpoints
//!
//! | Call | Request |
//! |------|---------|
//! | authenticate | `POST {api}/login` form `request-json={"apikey": ..}` |
//! | submit | `POST {api}/upload` multipart `request-json` + `file` |
//! | poll submission | `GET {api}/submissions/{id}` → `{"jobs": [id | null, ..]}` |
//! | poll job | `GET {api}/jobs/{id}` → `{"status": ..}` |
//! | calibration | `GET {api}/jobs/{id}/calibration` |
//! | WCS artifact | `GET {site}/wcs_file/{id}` (FITS header) |
//! | annotated image | `GET {site}/annotated_display/{id}` |

mod client;
mod transport;


use std::fmt;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::{ApiKey, UploadOptions};
use crate::error::{Error, Result};

pub use client::{NovaClient, upload_request_json};
pub use transport::Transport;

/// Opaque session token issued at login. Held for the process lifetime, never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Session(String);

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(4).collect();
        write!(f, "Session({visible}…)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote job status. Anything other than `success`/`failure` is still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Solving,
    /// Absent or unrecognized status string.
    Unknown(String),
    Success,
    Failure,
}

impl JobStatus {
    pub fn from_api(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            Some("success") => JobStatus::Success,
            Some("failure") => JobStatus::Failure,
            Some("solving") => JobStatus::Solving,
            Some("queued") | Some("queued_submission") => JobStatus::Queued,
            Some(other) => JobStatus::Unknown(other.to_string()),
            None => JobStatus::Unknown(String::new()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => f.write_str("queued"),
            JobStatus::Solving => f.write_str("solving"),
            JobStatus::Unknown(s) if s.is_empty() => f.write_str("unknown"),
            JobStatus::Unknown(s) => write!(f, "unknown ({s})"),
            JobStatus::Success => f.write_str("success"),
            JobStatus::Failure => f.write_str("failure"),
        }
    }
}

/// Summary astrometric metadata of a solved image. Missing fields stay `None`
/// and display as `unknown`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Field center right ascension, degrees.
    pub ra: Option<f64>,
    /// Field center declination, degrees.
    pub dec: Option<f64>,
    /// Field radius, degrees.
    pub radius: Option<f64>,
    /// Arcseconds per pixel.
    pub pixscale: Option<f64>,
    /// Degrees east of north of the image "up" direction.
    pub orientation: Option<f64>,
    /// 1.0 or -1.0.
    pub parity: Option<f64>,
}

impl fmt::Display for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(value: Option<f64>, precision: usize) -> String {
            value
                .map(|v| format!("{v:.precision$}"))
                .unwrap_or_else(|| "unknown".to_string())
        }
        write!(
            f,
            "RA={} Dec={} radius={} deg scale={} arcsec/px orientation={} deg parity={}",
            field(self.ra, 5),
            field(self.dec, 5),
            field(self.radius, 3),
            field(self.pixscale, 3),
            field(self.orientation, 2),
            field(self.parity, 0),
        )
    }
}

/// Image file contents ready for upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::Upload {
            message: format!("unreadable image '{}': {e}", path.display()),
        })?;
        if bytes.is_empty() {
            return Err(Error::Upload {
                message: format!("image '{}' is empty", path.display()),
            });
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().trim().to_string())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self { file_name, bytes })
    }

    pub fn mime(&self) -> &'static str {
        let lower = self.file_name.to_ascii_lowercase();
        if lower.ends_with(".png") {
            "image/png"
        } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            "image/jpeg"
        } else {
            "application/octet-stream"
        }
    }
}

/// Remote solver operations.
pub trait SolverApi {
    fn authenticate(&self, api_key: &ApiKey) -> Result<Session>;

    fn submit(
        &self,
        session: &Session,
        image: &ImageUpload,
        options: &UploadOptions,
    ) -> Result<SubmissionId>;

    /// Job ids assigned so far. `None` entries mean "not yet assigned".
    fn poll_submission(&self, session: &Session, id: SubmissionId) -> Result<Vec<Option<JobId>>>;

    fn poll_job(&self, session: &Session, id: JobId) -> Result<JobStatus>;

    fn calibration(&self, session: &Session, id: JobId) -> Result<Calibration>;

    /// FITS header holding the job's coordinate solution.
    /// `Error::ArtifactNotReady` while the server has not produced it yet.
    fn wcs_file(&self, session: &Session, id: JobId) -> Result<Bytes>;

    /// The solver's own pre-rendered annotation. Undocumented endpoint; best effort.
    fn annotated_image(&self, session: &Session, id: JobId) -> Result<Bytes>;
}
