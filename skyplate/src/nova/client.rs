//! HTTP implementation of [`SolverApi`] for nova.astrometry.net.

use bytes::Bytes;
use reqwest::blocking::multipart;
use serde::Deserialize;

use super::transport::Transport;
use super::{Calibration, ImageUpload, JobId, JobStatus, Session, SolverApi, SubmissionId};
use crate::config::{ApiKey, RetryConfig, ServiceConfig, UploadOptions};
use crate::error::{Error, Result};

/// Client for the nova.astrometry.net JSON API.
#[derive(Debug)]
pub struct NovaClient {
    api_url: String,
    site_url: String,
    transport: Transport,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: Option<String>,
    session: Option<String>,
    #[serde(default, alias = "message")]
    errormessage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    status: Option<String>,
    subid: Option<u64>,
    hash: Option<String>,
    #[serde(default, alias = "message")]
    errormessage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionStatusResponse {
    #[serde(default)]
    jobs: Option<Vec<Option<u64>>>,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: Option<String>,
}

impl NovaClient {
    pub fn new(service: &ServiceConfig, retry: RetryConfig) -> Result<Self> {
        Ok(Self {
            api_url: service.api_url.trim_end_matches('/').to_string(),
            site_url: service.site_url.trim_end_matches('/').to_string(),
            transport: Transport::new(service, retry)?,
        })
    }

    /// The underlying transport, for non-API downloads under the same policy.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    fn site(&self, path: &str) -> String {
        format!("{}/{}", self.site_url, path)
    }
}

impl SolverApi for NovaClient {
    fn authenticate(&self, api_key: &ApiKey) -> Result<Session> {
        let url = self.api("login");
        let request_json = serde_json::json!({ "apikey": api_key.expose() });

        let login: LoginResponse = self
            .transport
            .post_form_json(&url, &[("request-json", request_json.to_string())])
            .map_err(as_auth_error)?;

        if login.status.as_deref() != Some("success") {
            return Err(Error::Auth {
                message: login
                    .errormessage
                    .unwrap_or_else(|| format!("status {:?}", login.status)),
            });
        }

        let session = login.session.filter(|s| !s.is_empty()).ok_or_else(|| Error::Auth {
            message: "no session in login response".to_string(),
        })?;

        tracing::info!("Logged in to {}", self.api_url);
        Ok(Session::new(session))
    }

    fn submit(
        &self,
        session: &Session,
        image: &ImageUpload,
        options: &UploadOptions,
    ) -> Result<SubmissionId> {
        let url = self.api("upload");
        let request_json = upload_request_json(session, options).to_string();

        let upload: UploadResponse = self
            .transport
            .post_multipart_json(&url, || {
                let part = multipart::Part::bytes(image.bytes.clone())
                    .file_name(image.file_name.clone())
                    .mime_str(image.mime())
                    .map_err(|e| Error::Upload {
                        message: format!("invalid mime type: {e}"),
                    })?;
                Ok(multipart::Form::new()
                    .text("request-json", request_json.clone())
                    .part("file", part))
            })
            .map_err(as_upload_error)?;

        if upload.status.as_deref() != Some("success") {
            return Err(Error::Upload {
                message: upload
                    .errormessage
                    .unwrap_or_else(|| format!("status {:?}", upload.status)),
            });
        }

        let subid = upload.subid.ok_or_else(|| Error::Upload {
            message: "no submission id in upload response".to_string(),
        })?;

        tracing::info!(
            "Uploaded {} ({} bytes), submission ID: {}, hash: {:?}",
            image.file_name,
            image.bytes.len(),
            subid,
            upload.hash
        );
        Ok(SubmissionId(subid))
    }

    fn poll_submission(&self, session: &Session, id: SubmissionId) -> Result<Vec<Option<JobId>>> {
        let url = self.api(&format!("submissions/{id}"));
        let status: SubmissionStatusResponse = self
            .transport
            .get_json(&url, &[("session", session.as_str())])?;

        Ok(status
            .jobs
            .unwrap_or_default()
            .into_iter()
            .map(|job| job.map(JobId))
            .collect())
    }

    fn poll_job(&self, session: &Session, id: JobId) -> Result<JobStatus> {
        let url = self.api(&format!("jobs/{id}"));
        let status: JobStatusResponse = self
            .transport
            .get_json(&url, &[("session", session.as_str())])?;
        Ok(JobStatus::from_api(status.status.as_deref()))
    }

    fn calibration(&self, session: &Session, id: JobId) -> Result<Calibration> {
        let url = self.api(&format!("jobs/{id}/calibration"));
        self.transport
            .get_json(&url, &[("session", session.as_str())])
    }

    fn wcs_file(&self, session: &Session, id: JobId) -> Result<Bytes> {
        let url = self.site(&format!("wcs_file/{id}"));
        self.transport
            .get_binary(&url, &[("session", session.as_str())])
    }

    fn annotated_image(&self, session: &Session, id: JobId) -> Result<Bytes> {
        let url = self.site(&format!("annotated_display/{id}"));
        self.transport
            .get_binary(&url, &[("session", session.as_str())])
    }
}

/// Builds the `request-json` field of an upload. Unset hints are omitted so the
/// service falls back to a blind search for them.
pub fn upload_request_json(session: &Session, options: &UploadOptions) -> serde_json::Value {
    fn yes_no(flag: bool) -> &'static str {
        if flag { "y" } else { "n" }
    }

    let mut json = serde_json::json!({
        "session": session.as_str(),
        "publicly_visible": yes_no(options.publicly_visible),
        "allow_commercial_use": yes_no(options.allow_commercial_use),
        "allow_modifications": yes_no(options.allow_modifications),
    });

    if options.scale_lower.is_some() || options.scale_upper.is_some() {
        json["scale_units"] = serde_json::json!(options.scale_units.as_api_str());
        json["scale_type"] = serde_json::json!("ul");
    }
    if let Some(lower) = options.scale_lower {
        json["scale_lower"] = serde_json::json!(lower);
    }
    if let Some(upper) = options.scale_upper {
        json["scale_upper"] = serde_json::json!(upper);
    }
    if let (Some(ra), Some(dec)) = (options.center_ra, options.center_dec) {
        json["center_ra"] = serde_json::json!(ra);
        json["center_dec"] = serde_json::json!(dec);
        if let Some(radius) = options.radius {
            json["radius"] = serde_json::json!(radius);
        }
    }
    if let Some(factor) = options.downsample_factor {
        json["downsample_factor"] = serde_json::json!(factor);
    }

    json
}

/// Login failures that survive transport retries are authentication failures.
fn as_auth_error(err: Error) -> Error {
    match err {
        Error::Transient { reason, .. } => Error::Auth { message: reason },
        Error::Http {
            status, excerpt, ..
        } => Error::Auth {
            message: format!("HTTP {status}: {excerpt}"),
        },
        other => other,
    }
}

fn as_upload_error(err: Error) -> Error {
    match err {
        Error::Transient { reason, .. } => Error::Upload { message: reason },
        Error::Http {
            status, excerpt, ..
        } => Error::Upload {
            message: format!("HTTP {status}: {excerpt}"),
        },
        other => other,
    }
}
