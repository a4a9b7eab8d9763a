//! Blocking HTTP transport with timeouts and bounded exponential backoff.

use std::thread::sleep;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response, multipart};
use serde::de::DeserializeOwned;

use crate::config::{RetryConfig, ServiceConfig};
use crate::error::{Error, Result};

/// Longest response excerpt carried in errors and logs.
const EXCERPT_CHARS: usize = 200;

/// HTTP transport shared by all solver calls.
///
/// Transient failures (connect errors, timeouts, HTTP 5xx and 429, unparseable
/// JSON bodies) are retried up to `RetryConfig::max_retries` times. Everything
/// else is returned on the first occurrence.
#[derive(Debug)]
pub struct Transport {
    client: Client,
    retry: RetryConfig,
}

impl Transport {
    pub fn new(service: &ServiceConfig, retry: RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(service.connect_timeout)
            .timeout(service.read_timeout)
            .user_agent(concat!("skyplate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, retry })
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        self.execute(url, || self.client.get(url).query(query), read_json)
    }

    pub fn post_form_json<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<T> {
        self.execute(url, || self.client.post(url).form(form), read_json)
    }

    /// `build_form` is called once per attempt since a multipart body is consumed by sending.
    pub fn post_multipart_json<T: DeserializeOwned>(
        &self,
        url: &str,
        build_form: impl Fn() -> Result<multipart::Form>,
    ) -> Result<T> {
        let mut retry = 0;
        loop {
            let form = build_form()?;
            let outcome = self.attempt(url, self.client.post(url).multipart(form), read_json);
            match self.next_delay(url, &outcome, retry) {
                Some(delay) => {
                    sleep(delay);
                    retry += 1;
                }
                None => return outcome,
            }
        }
    }

    /// Downloads a binary artifact. 404 or a textual content type means the
    /// artifact is not materialized yet and yields `Error::ArtifactNotReady`.
    pub fn get_binary(&self, url: &str, query: &[(&str, &str)]) -> Result<Bytes> {
        self.execute(url, || self.client.get(url).query(query), read_binary)
    }

    pub fn get_text(&self, url: &str) -> Result<String> {
        self.execute(url, || self.client.get(url), read_text)
    }

    fn execute<T>(
        &self,
        url: &str,
        request: impl Fn() -> RequestBuilder,
        read: fn(&str, Response) -> Result<T>,
    ) -> Result<T> {
        let mut retry = 0;
        loop {
            let outcome = self.attempt(url, request(), read);
            match self.next_delay(url, &outcome, retry) {
                Some(delay) => {
                    sleep(delay);
                    retry += 1;
                }
                None => return outcome,
            }
        }
    }

    fn attempt<T>(
        &self,
        url: &str,
        request: RequestBuilder,
        read: fn(&str, Response) -> Result<T>,
    ) -> Result<T> {
        let response = request.send().map_err(|e| transient(url, describe_send_error(&e)))?;
        read(url, response)
    }

    /// Delay before the next attempt, or `None` when `outcome` is final.
    fn next_delay<T>(&self, url: &str, outcome: &Result<T>, retry: u32) -> Option<Duration> {
        let Err(Error::Transient { reason, .. }) = outcome else {
            return None;
        };
        if retry >= self.retry.max_retries {
            tracing::warn!(
                "Giving up on {} after {} retries: {}",
                url,
                self.retry.max_retries,
                reason
            );
            return None;
        }
        let delay = self.jittered(self.retry.backoff(retry));
        tracing::warn!(
            "Transient failure on {} ({}), retry {}/{} in {:.1}s",
            url,
            reason,
            retry + 1,
            self.retry.max_retries,
            delay.as_secs_f64()
        );
        Some(delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.retry.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let cut = rand::rng().random_range(0.0..=self.retry.jitter);
        delay.mul_f64(1.0 - cut)
    }
}

fn transient(url: &str, reason: impl Into<String>) -> Error {
    Error::Transient {
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn describe_send_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timeout: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Maps a non-success status to a transient or fatal error.
fn status_error(url: &str, response: Response) -> Error {
    let status = response.status();
    let excerpt = common::truncate_excerpt(&response.text().unwrap_or_default(), EXCERPT_CHARS);
    if is_retryable_status(status) {
        transient(url, format!("HTTP {}: {}", status.as_u16(), excerpt))
    } else {
        Error::Http {
            status: status.as_u16(),
            url: url.to_string(),
            excerpt,
        }
    }
}

fn read_json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(status_error(url, response));
    }
    let body = response
        .text()
        .map_err(|e| transient(url, format!("failed to read body: {e}")))?;

    serde_json::from_str(&body).map_err(|e| {
        let excerpt = common::truncate_excerpt(&body, EXCERPT_CHARS);
        tracing::warn!("Malformed JSON from {}: {} (body: {:?})", url, e, excerpt);
        transient(url, format!("malformed JSON: {e}"))
    })
}

fn read_text(url: &str, response: Response) -> Result<String> {
    if !response.status().is_success() {
        return Err(status_error(url, response));
    }
    response
        .text()
        .map_err(|e| transient(url, format!("failed to read body: {e}")))
}

fn read_binary(url: &str, response: Response) -> Result<Bytes> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(Error::ArtifactNotReady {
            url: url.to_string(),
            reason: "HTTP 404".to_string(),
        });
    }
    if !status.is_success() {
        return Err(status_error(url, response));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if is_textual(&content_type) {
        let excerpt = common::truncate_excerpt(&response.text().unwrap_or_default(), EXCERPT_CHARS);
        return Err(Error::ArtifactNotReady {
            url: url.to_string(),
            reason: format!("content-type '{content_type}': {excerpt}"),
        });
    }

    let bytes = response
        .bytes()
        .map_err(|e| transient(url, format!("failed to read body: {e}")))?;
    if bytes.is_empty() {
        return Err(Error::ArtifactNotReady {
            url: url.to_string(),
            reason: "empty body".to_string(),
        });
    }
    Ok(bytes)
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/") || content_type.contains("json")
}
