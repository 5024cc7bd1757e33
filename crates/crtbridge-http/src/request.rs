//! Outgoing request representation and its marshalled byte image.
//!
//! An [`HttpRequest`] is what callers hand to a connection or client. Before
//! dispatch it is flattened by [`HttpRequest::marshal`] into the image the
//! engine consumes:
//!
//! ```text
//! [u32 len][method] [u32 len][path] ([u32 len][name] [u32 len][value])*
//! ```
//!
//! All lengths are big-endian. The body is never part of the image; it
//! travels next to it as a [`HttpRequestBodyStream`].

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crtbridge_core::{CrtError, CrtResult};
use http::Method;

use crate::body::HttpRequestBodyStream;

/// Name of the header that carries the target host.
pub const HOST_HEADER: &str = "Host";

/// A single request or response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    name: String,
    value: String,
}

impl HttpHeader {
    /// Create a header.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Header name as given.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Case-insensitive name comparison.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// An outgoing HTTP request.
#[derive(Clone)]
pub struct HttpRequest {
    method: Method,
    encoded_path: String,
    headers: Vec<HttpHeader>,
    body: Option<Arc<dyn HttpRequestBodyStream>>,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("encoded_path", &self.encoded_path)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl HttpRequest {
    /// A request without headers or body.
    ///
    /// # Examples
    ///
    /// ```
    /// use crtbridge_http::HttpRequest;
    /// use http::Method;
    ///
    /// let request = HttpRequest::new(Method::GET, "/bucket/key")
    ///     .with_header("Accept", "*/*");
    /// assert_eq!(request.header("accept"), Some("*/*"));
    /// ```
    #[must_use]
    pub fn new(method: Method, encoded_path: impl Into<String>) -> Self {
        Self {
            method,
            encoded_path: encoded_path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HttpHeader::new(name, value));
        self
    }

    /// Attach a body source.
    #[must_use]
    pub fn with_body(mut self, body: Arc<dyn HttpRequestBodyStream>) -> Self {
        self.body = Some(body);
        self
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The already-encoded path and query.
    #[must_use]
    pub fn encoded_path(&self) -> &str {
        &self.encoded_path
    }

    /// Headers in send order.
    #[must_use]
    pub fn headers(&self) -> &[HttpHeader] {
        &self.headers
    }

    /// Replace all headers.
    pub fn set_headers(&mut self, headers: Vec<HttpHeader>) {
        self.headers = headers;
    }

    /// Append a header.
    pub fn add_header(&mut self, header: HttpHeader) {
        self.headers.push(header);
    }

    /// Value of the first header named `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|h| h.is(name)).map(HttpHeader::value)
    }

    /// The body source, if any.
    #[must_use]
    pub fn body_stream(&self) -> Option<&Arc<dyn HttpRequestBodyStream>> {
        self.body.as_ref()
    }

    /// Replace the body source.
    pub fn set_body_stream(&mut self, body: Option<Arc<dyn HttpRequestBodyStream>>) {
        self.body = body;
    }

    /// Flatten method, path and headers into the engine's byte image.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::InvalidRequest`] if a field is longer than a `u32`
    /// length prefix can express.
    pub fn marshal(&self) -> CrtResult<Bytes> {
        let size = 8
            + self.method.as_str().len()
            + self.encoded_path.len()
            + self
                .headers
                .iter()
                .map(|h| 8 + h.name.len() + h.value.len())
                .sum::<usize>();
        let mut buf = BytesMut::with_capacity(size);
        put_field(&mut buf, self.method.as_str().as_bytes(), "method")?;
        put_field(&mut buf, self.encoded_path.as_bytes(), "path")?;
        for header in &self.headers {
            put_field(&mut buf, header.name.as_bytes(), "header name")?;
            put_field(&mut buf, header.value.as_bytes(), "header value")?;
        }
        Ok(buf.freeze())
    }

    /// Parse a byte image produced by [`marshal`](Self::marshal).
    ///
    /// The result has no body source.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::InvalidRequest`] if the image is truncated, has a
    /// dangling header name, or holds invalid UTF-8 or an invalid method.
    pub fn unmarshal(mut image: &[u8]) -> CrtResult<Self> {
        let method = take_field(&mut image, "method")?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| CrtError::InvalidRequest(format!("invalid method: {e}")))?;
        let encoded_path = take_field(&mut image, "path")?;

        let mut headers = Vec::new();
        while image.has_remaining() {
            let name = take_field(&mut image, "header name")?;
            if !image.has_remaining() {
                return Err(CrtError::InvalidRequest(format!(
                    "header {name} has no value"
                )));
            }
            let value = take_field(&mut image, "header value")?;
            headers.push(HttpHeader { name, value });
        }

        Ok(Self {
            method,
            encoded_path,
            headers,
            body: None,
        })
    }
}

fn put_field(buf: &mut BytesMut, field: &[u8], what: &str) -> CrtResult<()> {
    buf.put_u32(field_len(field.len(), what)?);
    buf.put_slice(field);
    Ok(())
}

fn field_len(len: usize, what: &str) -> CrtResult<u32> {
    u32::try_from(len).map_err(|_| {
        CrtError::InvalidRequest(format!("{what} of {len} bytes is too long to marshal"))
    })
}

fn take_field(image: &mut &[u8], what: &str) -> CrtResult<String> {
    if image.remaining() < 4 {
        return Err(CrtError::InvalidRequest(format!(
            "request image truncated before {what} length"
        )));
    }
    let len = image.get_u32() as usize;
    if image.remaining() < len {
        return Err(CrtError::InvalidRequest(format!(
            "request image truncated inside {what}"
        )));
    }
    let remaining: &[u8] = *image;
    let (field, rest) = remaining.split_at(len);
    *image = rest;
    String::from_utf8(field.to_vec())
        .map_err(|_| CrtError::InvalidRequest(format!("{what} is not valid UTF-8")))
}
