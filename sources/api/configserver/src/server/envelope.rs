//! The envelope is what a successful read hands back: the payload bytes, their content type, and
//! the version stamp the payload was read at.  It renders either as a set of response headers
//! plus body, or as a single-part multipart body for clients that ask for one.

use bytes::{BufMut, Bytes, BytesMut};
use configstore::VersionStamp;
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use rand::distributions::Alphanumeric;
use rand::Rng;
use snafu::ResultExt;

use super::error::{self, Result};
use super::http_date::format_http_date;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_XML: &str = "text/xml";
pub const TEXT_PLAIN: &str = "text/plain";

/// Name of the single part in a multipart rendering.
pub const PART_NAME: &str = "config-data";

const BOUNDARY_LENGTH: usize = 30;
const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    content_type: String,
    payload: Bytes,
    stamp: Option<VersionStamp>,
}

impl Envelope {
    pub fn new<S, B>(content_type: S, payload: B, stamp: VersionStamp) -> Self
    where
        S: Into<String>,
        B: Into<Bytes>,
    {
        Self {
            content_type: content_type.into(),
            payload: payload.into(),
            stamp: Some(stamp),
        }
    }

    /// An envelope for a computed response, like a listing, that has no version of its own.
    pub fn listing<S, B>(content_type: S, payload: B) -> Self
    where
        S: Into<String>,
        B: Into<Bytes>,
    {
        Self {
            content_type: content_type.into(),
            payload: payload.into(),
            stamp: None,
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn stamp(&self) -> Option<&VersionStamp> {
        self.stamp.as_ref()
    }

    pub fn content_length(&self) -> usize {
        self.payload.len()
    }

    /// The headers describing the payload: Content-Type, Content-Length, and for versioned
    /// payloads Last-Modified and a quoted ETag.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, header_value("Content-Type", &self.content_type)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.content_length()));
        if let Some(stamp) = &self.stamp {
            headers.extend(stamp_headers(stamp)?);
        }
        Ok(headers)
    }

    /// Renders the envelope as a multipart/form-data body with a single part named
    /// "config-data", carrying the same headers `headers` returns.
    pub fn to_multipart(&self, boundary: &str) -> Bytes {
        let mut body = BytesMut::with_capacity(self.payload.len() + 256);
        body.put_slice(b"--");
        body.put_slice(boundary.as_bytes());
        body.put_slice(CRLF);
        body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"",
                PART_NAME
            )
            .as_bytes(),
        );
        body.put_slice(CRLF);
        body.put_slice(format!("Content-Type: {}", self.content_type).as_bytes());
        body.put_slice(CRLF);
        body.put_slice(format!("Content-Length: {}", self.content_length()).as_bytes());
        body.put_slice(CRLF);
        if let Some(stamp) = &self.stamp {
            body.put_slice(
                format!("Last-Modified: {}", format_http_date(stamp.last_modified_ms())).as_bytes(),
            );
            body.put_slice(CRLF);
            body.put_slice(format!("ETag: {}", stamp).as_bytes());
            body.put_slice(CRLF);
        }
        body.put_slice(CRLF);
        body.put_slice(&self.payload);
        body.put_slice(CRLF);
        body.put_slice(b"--");
        body.put_slice(boundary.as_bytes());
        body.put_slice(b"--");
        body.put_slice(CRLF);
        body.freeze()
    }
}

/// The headers that identify a version: Last-Modified and ETag.  Also sent alone with
/// not-modified and successful-write responses.
pub fn stamp_headers(stamp: &VersionStamp) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        LAST_MODIFIED,
        header_value("Last-Modified", &format_http_date(stamp.last_modified_ms()))?,
    );
    headers.insert(ETAG, header_value("ETag", &stamp.to_string())?);
    Ok(headers)
}

/// The Content-Type for a multipart rendering that uses `boundary`.
pub fn multipart_content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={}", boundary)
}

/// A fresh boundary for a multipart rendering.
pub fn random_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LENGTH)
        .map(char::from)
        .collect()
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).context(error::HeaderValueSnafu { name })
}
