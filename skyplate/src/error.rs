//! Error taxonomy for the solve-and-overlay run.
//!
//! Each variant carries its own retry policy: see [`Error::is_transient`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::nova::{JobId, SubmissionId};

/// Which bounded polling phase ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum PollPhase {
    #[strum(to_string = "job assignment")]
    Assignment,
    #[strum(to_string = "job completion")]
    Completion,
}

/// Errors that can occur while solving a photo and rendering its overlay.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No file matching '{pattern}' found in '{dir}'")]
    Discovery { dir: PathBuf, pattern: String },

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Upload failed: {message}")]
    Upload { message: String },

    /// Timeout, connection reset, 5xx, 429 or an unparseable body.
    #[error("Transient network failure on {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("HTTP {status} from {url}: {excerpt}")]
    Http {
        status: u16,
        url: String,
        excerpt: String,
    },

    #[error("Remote solver could not solve job {job}")]
    JobFailure { job: JobId },

    #[error("Timed out waiting for {phase} after {attempts} attempts (submission {submission})")]
    PollingTimeout {
        phase: PollPhase,
        attempts: u32,
        submission: SubmissionId,
    },

    /// Artifact not materialized server-side yet (404 or non-binary content).
    #[error("Artifact at {url} is not ready: {reason}")]
    ArtifactNotReady { url: String, reason: String },

    #[error("Artifact for job {job} unavailable after {attempts} attempts")]
    ArtifactUnavailable { job: JobId, attempts: u32 },

    #[error("Overlay geometry unavailable from '{source_name}': {reason}")]
    OverlayFetch { source_name: String, reason: String },

    #[error("Failed to render feature '{feature}': {reason}")]
    Render { feature: String, reason: String },

    #[error("Invalid coordinate solution: {0}")]
    InvalidWcs(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Image error on '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::ArtifactNotReady { .. })
    }

    /// Whether the run can continue with a degraded result.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::OverlayFetch { .. } | Error::Render { .. })
    }

    /// Process exit code for this error when it terminates the run.
    pub fn exit_code(&self) -> i32 {
        1
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
