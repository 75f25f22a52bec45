//! One-time capability probe: resource size, range support and checksum.

use reqwest::StatusCode;

use crate::checksum::ExpectedMd5;
use crate::error::{Error, Result};
use crate::http::{HttpClient, Redirect};
use crate::url::filename_from_content_disposition;

/// How range support was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSupport {
    /// The HEAD response carried `Accept-Ranges: bytes`.
    Advertised,
    /// A `bytes=0-0` GET was answered with 206.
    Probed,
}

/// What the probe learned about the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Total resource size from `Content-Length`.
    pub total_size: u64,
    /// Expected digest from `Content-Md5`, if the server sent a usable one.
    pub checksum: Option<ExpectedMd5>,
    /// Filename suggested by `Content-Disposition`.
    pub server_filename: Option<String>,
    /// How range support was confirmed.
    pub range_support: RangeSupport,
    /// Redirects seen, in request order. The last one is authoritative.
    pub redirects: Vec<Redirect>,
}

impl ProbeReport {
    /// The last redirect seen by any probe request.
    #[must_use]
    pub fn final_redirect(&self) -> Option<&Redirect> {
        self.redirects.last()
    }
}

/// Issues HEAD (and, if needed, a single-byte ranged GET) against `url`.
///
/// # Errors
///
/// - [`Error::SizeUnknown`] when the HEAD response lacks `Content-Length`.
/// - [`Error::RangeUnsupported`] when neither `Accept-Ranges` nor the active
///   probe confirms byte-range support.
/// - Transport and status errors from either request.
pub async fn probe(client: &HttpClient, url: &str) -> Result<ProbeReport> {
    let head = client.head(url).await?;
    let mut redirects: Vec<Redirect> = head.redirect.into_iter().collect();
    let info = head.value;
    let effective_url = redirects.last().map_or(url, |r| r.url.as_str()).to_string();

    let Some(total_size) = info.content_length else {
        return Err(Error::SizeUnknown {
            url: effective_url,
        });
    };
    log::info!("Total length of {effective_url}: {total_size} bytes");

    let checksum = info.content_md5.as_deref().and_then(|raw| {
        let parsed = ExpectedMd5::parse(raw);
        if parsed.is_none() {
            log::warn!("Ignoring unparseable Content-Md5 header: {raw}");
        }
        parsed
    });

    let range_support = if info.accept_ranges.as_deref() == Some("bytes") {
        RangeSupport::Advertised
    } else {
        log::debug!(
            "Accept-Ranges is {:?}, probing with a single-byte request",
            info.accept_ranges
        );
        let probe = client.probe_single_byte(&effective_url).await?;
        redirects.extend(probe.redirect);
        if probe.value != StatusCode::PARTIAL_CONTENT {
            log::debug!("Single-byte probe answered {}", probe.value);
            return Err(Error::RangeUnsupported {
                url: effective_url,
            });
        }
        RangeSupport::Probed
    };

    Ok(ProbeReport {
        total_size,
        checksum,
        server_filename: info
            .content_disposition
            .as_deref()
            .and_then(filename_from_content_disposition),
        range_support,
        redirects,
    })
}
