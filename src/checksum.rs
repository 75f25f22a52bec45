//! Content-MD5 parsing and end-to-end digest comparison.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// An MD5 digest announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedMd5([u8; 16]);

impl ExpectedMd5 {
    /// Parses a `Content-Md5` header value.
    ///
    /// Accepts the RFC 1864 base64 form as well as 32 hex digits, which some
    /// servers send instead.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() == 32
            && let Ok(bytes) = hex::decode(value)
        {
            return bytes.try_into().ok().map(Self);
        }
        BASE64
            .decode(value)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .map(Self)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ExpectedMd5 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Running MD5 over the merged output.
pub struct Md5Digest(md5::Context);

impl Default for Md5Digest {
    fn default() -> Self {
        Self::new()
    }
}

impl Md5Digest {
    /// Starts an empty digest.
    #[must_use]
    pub fn new() -> Self {
        Self(md5::Context::new())
    }

    /// Feeds bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.0.consume(data);
    }

    /// Finishes the digest.
    #[must_use]
    pub fn finish(self) -> [u8; 16] {
        self.0.compute().0
    }
}

/// Outcome of comparing the merged file against the server's checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    /// The server announced no checksum.
    NotProvided,
    /// Digests agree.
    Match {
        /// Hex digest of the merged file.
        digest: String,
    },
    /// Digests disagree. The output file is kept.
    Mismatch {
        /// Hex digest announced by the server.
        expected: String,
        /// Hex digest of the merged file.
        actual: String,
    },
}

impl ChecksumStatus {
    /// Compares a computed digest with the expected one, if any.
    #[must_use]
    pub fn compare(expected: Option<&ExpectedMd5>, actual: Option<[u8; 16]>) -> Self {
        match (expected, actual) {
            (Some(expected), Some(actual)) if expected.as_bytes() == &actual => Self::Match {
                digest: hex::encode(actual),
            },
            (Some(expected), Some(actual)) => Self::Mismatch {
                expected: expected.to_string(),
                actual: hex::encode(actual),
            },
            _ => Self::NotProvided,
        }
    }

    /// True unless the digests disagree.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Mismatch { .. })
    }
}
