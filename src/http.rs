//! HTTP access: the shared client, ranged GETs and redirect reporting.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    HeaderMap, RANGE,
};
use reqwest::{Response, StatusCode};

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::url::filename_from_url;

/// Vendor header carrying the expected MD5 of the whole resource.
pub const CONTENT_MD5: &str = "content-md5";

/// Body of a ranged response, yielded in the sizes the transport delivers.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// A request was redirected: where it ended up and the name that implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Final URL after following redirects.
    pub url: String,
    /// Last path segment of the final URL, if it has one.
    pub filename: Option<String>,
}

/// A response value together with the redirect it went through, if any.
///
/// Callers decide whether to apply the redirect to their own state; the
/// client never mutates anything behind their back.
#[derive(Debug)]
pub struct Fetched<T> {
    /// The response payload.
    pub value: T,
    /// Set when the final URL differs from the requested one.
    pub redirect: Option<Redirect>,
}

/// Headers of a HEAD response relevant to planning a download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadInfo {
    /// Parsed `Content-Length`.
    pub content_length: Option<u64>,
    /// Raw `Accept-Ranges`.
    pub accept_ranges: Option<String>,
    /// Raw `Content-Md5`.
    pub content_md5: Option<String>,
    /// Raw `Content-Disposition`.
    pub content_disposition: Option<String>,
}

impl HeadInfo {
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        };
        Self {
            // Read the header itself: reqwest reports a zero body size for HEAD.
            content_length: text(CONTENT_LENGTH.as_str()).and_then(|v| v.parse().ok()),
            accept_ranges: text(ACCEPT_RANGES.as_str()),
            content_md5: text(CONTENT_MD5).filter(|v| !v.is_empty()),
            content_disposition: text(CONTENT_DISPOSITION.as_str()),
        }
    }
}

/// A source of byte ranges. Implemented by [`HttpClient`] and by test fakes.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Opens a response for bytes `start..=end` of `url`.
    ///
    /// # Errors
    ///
    /// Transient failures are reported so the caller can classify them with
    /// [`Error::is_transient`].
    async fn open_range(&self, url: &str, start: u64, end: u64) -> Result<BodyStream>;
}

/// Builds the shared `reqwest` client from a download configuration.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] for a malformed proxy URL.
pub fn build_http_client(config: &DownloadConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .tcp_keepalive(config.tcp_keepalive())
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(config.threads)
        .user_agent(config.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(10));

    if let Some(proxy_url) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| Error::InvalidConfig(format!("proxy {proxy_url}: {e}")))?;
        log::info!("Routing requests through proxy {proxy_url}");
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// The HTTP client shared by the probe and all chunk fetchers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Creates a client configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the TLS backend fails to load.
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        Ok(Self {
            inner: build_http_client(config)?,
        })
    }

    /// Issues a HEAD request and collects the planning headers.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and non-success statuses.
    pub async fn head(&self, url: &str) -> Result<Fetched<HeadInfo>> {
        let response = self.inner.head(url).send().await?;
        let response = check_status(url, response)?;
        let redirect = redirect_of(url, &response);
        Ok(Fetched {
            value: HeadInfo::from_headers(response.headers()),
            redirect,
        })
    }

    /// Issues a `bytes=0-0` GET and returns the response status.
    ///
    /// # Errors
    ///
    /// Fails only on transport errors; any status is returned to the caller.
    pub async fn probe_single_byte(&self, url: &str) -> Result<Fetched<StatusCode>> {
        let response = self.ranged_get(url, "bytes=0-0").send().await?;
        let redirect = redirect_of(url, &response);
        Ok(Fetched {
            value: response.status(),
            redirect,
        })
    }

    fn ranged_get(&self, url: &str, range: &str) -> reqwest::RequestBuilder {
        self.inner
            .get(url)
            .header(RANGE, range)
            .header(ACCEPT_ENCODING, "identity")
            .header(ACCEPT, "*/*")
    }
}

#[async_trait]
impl RangeSource for HttpClient {
    async fn open_range(&self, url: &str, start: u64, end: u64) -> Result<BodyStream> {
        let response = self
            .ranged_get(url, &format!("bytes={start}-{end}"))
            .send()
            .await?;
        let response = check_status(url, response)?;

        if response.status() == StatusCode::PARTIAL_CONTENT {
            // Bytes are written at our own offset, so the server must start there too.
            if let Some(served) =
                content_range_start(response.headers()).filter(|&served| served != start)
            {
                log::error!("{url} answered bytes={start}-{end} with a range starting at {served}");
                return Err(Error::RangeUnsupported {
                    url: url.to_string(),
                });
            }
        } else if start != 0 {
            // A 200 carries the whole resource from byte 0; that only lines up
            // with a range that starts at 0.
            return Err(Error::RangeUnsupported {
                url: url.to_string(),
            });
        } else {
            log::debug!("{url} answered a ranged GET with {}", response.status());
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .boxed())
    }
}

/// First byte of a `Content-Range: bytes start-end/total` header.
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (start, _) = value.trim().strip_prefix("bytes ")?.split_once('-')?;
    start.trim().parse().ok()
}

fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Status {
            url: url.to_string(),
            status,
        })
    }
}

fn redirect_of(requested: &str, response: &Response) -> Option<Redirect> {
    let final_url = response.url().as_str();
    if final_url == requested
        || reqwest::Url::parse(requested).is_ok_and(|u| u.as_str() == final_url)
    {
        return None;
    }
    Some(Redirect {
        url: final_url.to_string(),
        filename: filename_from_url(final_url),
    })
}
