//! In-process HTTP server serving byte ranges of a fixed payload.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE,
};
use axum::http::{self, HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::get;
use base64::Engine;
use bytes::Bytes;
use range_dl::{
    DownloadConfig, DownloadPlan, DownloadProgress, DownloadReport, Error, ProgressFrame,
};

/// How the served file misbehaves.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Send `Accept-Ranges: bytes` on HEAD.
    pub advertise_ranges: bool,
    /// Answer ranged GETs with 206 (otherwise 200 and the whole body).
    pub honor_ranges: bool,
    /// Send `Content-Length` on HEAD.
    pub send_length: bool,
    /// Value of `Content-Md5`.
    pub md5: Option<String>,
    /// Value of `Content-Disposition`.
    pub disposition: Option<String>,
    /// Extra bytes appended to every multi-byte range.
    pub over_deliver: usize,
    /// Bytes withheld from every multi-byte range.
    pub under_deliver: usize,
    /// Abort the first multi-byte ranged response halfway through.
    pub drop_first: bool,
    /// Report a `Content-Range` one byte past the requested start.
    pub shift_content_range: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            advertise_ranges: true,
            honor_ranges: true,
            send_length: true,
            md5: None,
            disposition: None,
            over_deliver: 0,
            under_deliver: 0,
            drop_first: false,
            shift_content_range: false,
        }
    }
}

/// Shared server state.
pub struct Served {
    pub data: Vec<u8>,
    pub behavior: Behavior,
    pub ranges: Mutex<Vec<(u64, u64)>>,
    pub gets: AtomicUsize,
    dropped: AtomicBool,
}

/// Deterministic, non-repeating-per-chunk test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 256) % 251) as u8).collect()
}

/// Base64 Content-MD5 value for `data`.
pub fn content_md5(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0)
}

/// Settings that keep tests fast.
pub fn fast_config(threads: usize) -> DownloadConfig {
    DownloadConfig::new()
        .with_threads(threads)
        .with_retry_delay(Duration::from_millis(10))
        .with_max_retries(Some(3))
        .with_progress_interval(Duration::from_millis(20))
}

fn parse_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get(RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn serve_file(State(served): State<Arc<Served>>, method: Method, headers: HeaderMap) -> Response {
    let behavior = &served.behavior;
    let mut response = http::Response::builder();
    if behavior.advertise_ranges {
        response = response.header(ACCEPT_RANGES, "bytes");
    }
    if let Some(md5) = &behavior.md5 {
        response = response.header("content-md5", md5);
    }
    if let Some(disposition) = &behavior.disposition {
        response = response.header(CONTENT_DISPOSITION, disposition);
    }

    if method == Method::HEAD {
        if behavior.send_length {
            response = response.header(CONTENT_LENGTH, served.data.len());
        }
        return response.body(Body::empty()).unwrap();
    }

    served.gets.fetch_add(1, Ordering::SeqCst);
    let range = parse_range(&headers).filter(|_| behavior.honor_ranges);
    let Some((start, end)) = range else {
        return response
            .status(StatusCode::OK)
            .body(Body::from(served.data.clone()))
            .unwrap();
    };
    served.ranges.lock().unwrap().push((start, end));

    let last = served.data.len() as u64 - 1;
    let end = end.min(last);
    let mut body = served.data[start as usize..=end as usize].to_vec();
    let multi_byte = body.len() > 1;
    if multi_byte {
        body.extend(std::iter::repeat_n(0xAA, behavior.over_deliver));
        body.truncate(body.len().saturating_sub(behavior.under_deliver));
    }

    let reported = start + u64::from(behavior.shift_content_range);
    let response = response
        .status(StatusCode::PARTIAL_CONTENT)
        .header(CONTENT_RANGE, format!("bytes {reported}-{end}/{}", last + 1));

    if multi_byte && behavior.drop_first && !served.dropped.swap(true, Ordering::SeqCst) {
        let half = Bytes::from(body[..body.len() / 2].to_vec());
        let stream = futures::stream::iter(vec![
            Ok(half),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "dropped")),
        ]);
        return response.body(Body::from_stream(stream)).unwrap();
    }

    response.body(Body::from(body)).unwrap()
}

async fn redirect_to_file() -> Response {
    http::Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, "/files/real-name.bin")
        .body(Body::empty())
        .unwrap()
}

/// A running test server.
pub struct TestServer {
    pub addr: SocketAddr,
    pub served: Arc<Served>,
}

impl TestServer {
    /// Starts a server publishing `data` at `/files/data.bin` and
    /// `/files/real-name.bin`, plus a redirect at `/go`.
    pub async fn start(data: Vec<u8>, behavior: Behavior) -> Self {
        let served = Arc::new(Served {
            data,
            behavior,
            ranges: Mutex::new(Vec::new()),
            gets: AtomicUsize::new(0),
            dropped: AtomicBool::new(false),
        });
        let app = Router::new()
            .route("/files/data.bin", get(serve_file))
            .route("/files/real-name.bin", get(serve_file))
            .route("/go", get(redirect_to_file))
            .with_state(Arc::clone(&served));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, served }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges = self.served.ranges.lock().unwrap().clone();
        ranges.sort_unstable();
        ranges
    }
}

/// Records everything the job reports.
#[derive(Default)]
pub struct Recorder {
    pub plans: Mutex<Vec<DownloadPlan>>,
    pub frames: Mutex<Vec<ProgressFrame>>,
    pub retries: Mutex<Vec<usize>>,
    pub merged: Mutex<Vec<(usize, u64)>>,
    pub completed: Mutex<Option<DownloadReport>>,
}

impl DownloadProgress for Recorder {
    fn on_plan(&self, plan: &DownloadPlan) {
        self.plans.lock().unwrap().push(plan.clone());
    }

    fn on_frame(&self, frame: &ProgressFrame) {
        self.frames.lock().unwrap().push(frame.clone());
    }

    fn on_chunk_retry(&self, chunk: usize, _attempt: u32, _error: &Error) {
        self.retries.lock().unwrap().push(chunk);
    }

    fn on_merge_chunk(&self, chunk: usize, bytes: u64) {
        self.merged.lock().unwrap().push((chunk, bytes));
    }

    fn on_complete(&self, report: &DownloadReport) {
        *self.completed.lock().unwrap() = Some(report.clone());
    }
}
