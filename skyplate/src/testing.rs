//! Test doubles shared across modules.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use glam::DVec2;

use crate::config::{ApiKey, UploadOptions};
use crate::error::{Error, Result};
use crate::nova::{Calibration, ImageUpload, JobId, JobStatus, Session, SolverApi, SubmissionId};
use crate::wcs::{CoordinateSolution, SkyCoord};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Pixel (x, y) is sky (RA, Dec) in degrees, unwrapped.
#[derive(Debug, Clone, Copy)]
pub struct IdentitySolution;

impl CoordinateSolution for IdentitySolution {
    fn pixel_to_sky(&self, pixel: DVec2) -> SkyCoord {
        SkyCoord::new(pixel.x, pixel.y)
    }

    fn sky_to_pixel(&self, sky: SkyCoord) -> DVec2 {
        DVec2::new(sky.ra, sky.dec)
    }
}

pub fn test_image() -> ImageUpload {
    ImageUpload {
        file_name: "starphoto.jpg".to_string(),
        bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3],
    }
}

pub fn not_ready() -> Error {
    Error::ArtifactNotReady {
        url: "mock".to_string(),
        reason: "HTTP 404".to_string(),
    }
}

pub fn transient() -> Error {
    Error::Transient {
        url: "mock".to_string(),
        reason: "timeout".to_string(),
    }
}

/// [`SolverApi`] fake replaying scripted results per call kind. An exhausted
/// script falls back to a "still pending" answer.
#[derive(Default)]
pub struct ScriptedSolver {
    pub auth: RefCell<VecDeque<Result<Session>>>,
    pub submits: RefCell<VecDeque<Result<SubmissionId>>>,
    pub submissions: RefCell<VecDeque<Result<Vec<Option<JobId>>>>>,
    pub jobs: RefCell<VecDeque<Result<JobStatus>>>,
    pub calibrations: RefCell<VecDeque<Result<Calibration>>>,
    pub wcs_files: RefCell<VecDeque<Result<Bytes>>>,
    pub annotated: RefCell<VecDeque<Result<Bytes>>>,
    pub calls: RefCell<Vec<&'static str>>,
}

impl ScriptedSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submissions(self, polls: impl IntoIterator<Item = Result<Vec<Option<JobId>>>>) -> Self {
        self.submissions.borrow_mut().extend(polls);
        self
    }

    pub fn with_jobs(self, polls: impl IntoIterator<Item = Result<JobStatus>>) -> Self {
        self.jobs.borrow_mut().extend(polls);
        self
    }

    pub fn with_wcs_files(self, results: impl IntoIterator<Item = Result<Bytes>>) -> Self {
        self.wcs_files.borrow_mut().extend(results);
        self
    }

    pub fn with_auth(self, result: Result<Session>) -> Self {
        self.auth.borrow_mut().push_back(result);
        self
    }

    pub fn with_submit(self, result: Result<SubmissionId>) -> Self {
        self.submits.borrow_mut().push_back(result);
        self
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.borrow().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.borrow_mut().push(call);
    }
}

impl SolverApi for ScriptedSolver {
    fn authenticate(&self, _api_key: &ApiKey) -> Result<Session> {
        self.record("authenticate");
        self.auth
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Session::new("session-token")))
    }

    fn submit(&self, _session: &Session, _image: &ImageUpload, _options: &UploadOptions) -> Result<SubmissionId> {
        self.record("submit");
        self.submits
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(SubmissionId(1)))
    }

    fn poll_submission(&self, _session: &Session, _id: SubmissionId) -> Result<Vec<Option<JobId>>> {
        self.record("poll_submission");
        self.submissions
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![None]))
    }

    fn poll_job(&self, _session: &Session, _id: JobId) -> Result<JobStatus> {
        self.record("poll_job");
        self.jobs
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(JobStatus::Solving))
    }

    fn calibration(&self, _session: &Session, _id: JobId) -> Result<Calibration> {
        self.record("calibration");
        self.calibrations
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Calibration::default()))
    }

    fn wcs_file(&self, _session: &Session, _id: JobId) -> Result<Bytes> {
        self.record("wcs_file");
        self.wcs_files
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(not_ready()))
    }

    fn annotated_image(&self, _session: &Session, _id: JobId) -> Result<Bytes> {
        self.record("annotated_image");
        self.annotated
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(not_ready()))
    }
}

/// One canned HTTP response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self::bytes(status, "application/json", body.as_bytes())
    }

    pub fn html(status: u16, body: &str) -> Self {
        Self::bytes(status, "text/html; charset=utf-8", body.as_bytes())
    }

    pub fn bytes(status: u16, content_type: &str, body: &[u8]) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.to_vec(),
        }
    }
}

/// A request as seen by [`MockServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including the query string.
    pub target: String,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Minimal HTTP/1.1 responder on a loopback port. Serves scripted responses in
/// order (then 500s), one request per connection.
pub struct MockServer {
    addr: SocketAddr,
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start(responses: impl IntoIterator<Item = MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let responses = Arc::new(Mutex::new(responses.into_iter().collect::<VecDeque<_>>()));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let responses = Arc::clone(&responses);
            let requests = Arc::clone(&requests);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(stream) = stream else { continue };
                    serve(stream, &responses, &requests);
                }
            })
        };

        Self {
            addr,
            responses,
            requests,
            stop,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(
    mut stream: TcpStream,
    responses: &Mutex<VecDeque<MockResponse>>,
    requests: &Mutex<Vec<RecordedRequest>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    requests.lock().unwrap().push(request);

    let response = responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| MockResponse::html(500, "no scripted response left"));

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        response.content_type,
        response.body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&response.body);
    let _ = stream.flush();
}

fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    // reqwest sends sized bodies for both forms and multipart uploads
    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Some(RecordedRequest {
        method,
        target,
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
