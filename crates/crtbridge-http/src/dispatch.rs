//! Request dispatcher: endpoint resolution shared by connections and clients.
//!
//! [`prepare`] turns a caller's request plus an optional per-request URI into
//! the values handed to the engine's dispatch entry points:
//!
//! 1. With a URI override, TLS follows the URI scheme (`https`,
//!    case-insensitive), the port is the URI port or the scheme default, and
//!    every `Host` header is replaced by a single trailing one carrying the
//!    URI host.
//! 2. Without one, TLS is the caller's default, the port is left to the
//!    engine and headers are untouched.
//! 3. The body source is passed through by reference.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use crtbridge_core::{CrtError, CrtResult};
use http::Uri;
use tracing::debug;

use crate::body::HttpRequestBodyStream;
use crate::request::{HOST_HEADER, HttpHeader, HttpRequest};

/// Default port for `https` endpoints.
pub const HTTPS_PORT: u16 = 443;

/// Default port for plain `http` endpoints.
pub const HTTP_PORT: u16 = 80;

/// A request ready for a native dispatch call.
#[derive(Clone)]
pub struct PreparedRequest {
    use_tls: bool,
    port: Option<u16>,
    headers: Vec<HttpHeader>,
    marshaled: Bytes,
    body: Option<Arc<dyn HttpRequestBodyStream>>,
}

impl fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("use_tls", &self.use_tls)
            .field("port", &self.port)
            .field("headers", &self.headers)
            .field("marshaled_len", &self.marshaled.len())
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl PreparedRequest {
    /// Whether the engine should use TLS.
    #[must_use]
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Effective port; `None` leaves the choice to the engine.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Normalized headers.
    #[must_use]
    pub fn headers(&self) -> &[HttpHeader] {
        &self.headers
    }

    /// The marshalled request image.
    #[must_use]
    pub fn marshaled(&self) -> &Bytes {
        &self.marshaled
    }

    /// The body source, shared with the caller's request.
    #[must_use]
    pub fn body(&self) -> Option<&Arc<dyn HttpRequestBodyStream>> {
        self.body.as_ref()
    }

    /// Split into the marshalled image and body source.
    #[must_use]
    pub fn into_parts(self) -> (Bytes, Option<Arc<dyn HttpRequestBodyStream>>) {
        (self.marshaled, self.body)
    }
}

/// Resolve TLS, port and headers for `request` and marshal it.
///
/// # Errors
///
/// Returns [`CrtError::InvalidRequest`] if `uri_override` has no host or
/// the request cannot be marshalled.
///
/// # Examples
///
/// ```
/// use crtbridge_http::{HttpRequest, dispatch};
/// use http::{Method, Uri};
///
/// let request = HttpRequest::new(Method::GET, "/x").with_header("hoST", "old.example");
/// let uri: Uri = "https://example.com:8443/x".parse().unwrap();
///
/// let prepared = dispatch::prepare(&request, Some(&uri), false).unwrap();
/// assert!(prepared.use_tls());
/// assert_eq!(prepared.port(), Some(8443));
/// assert_eq!(prepared.headers().len(), 1);
/// assert_eq!(prepared.headers()[0].value(), "example.com");
/// ```
pub fn prepare(
    request: &HttpRequest,
    uri_override: Option<&Uri>,
    default_tls: bool,
) -> CrtResult<PreparedRequest> {
    let Some(uri) = uri_override else {
        return Ok(PreparedRequest {
            use_tls: default_tls,
            port: None,
            headers: request.headers().to_vec(),
            marshaled: request.marshal()?,
            body: request.body_stream().cloned(),
        });
    };

    let host = uri
        .host()
        .ok_or_else(|| CrtError::InvalidRequest(format!("uri override {uri} has no host")))?;
    let use_tls = uri
        .scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"));
    let port = uri
        .port_u16()
        .unwrap_or(if use_tls { HTTPS_PORT } else { HTTP_PORT });

    let mut headers: Vec<HttpHeader> = request
        .headers()
        .iter()
        .filter(|h| !h.is(HOST_HEADER))
        .cloned()
        .collect();
    headers.push(HttpHeader::new(HOST_HEADER, host));

    let mut normalized = request.clone();
    normalized.set_headers(headers.clone());
    debug!(host, port, use_tls, "request endpoint overridden by uri");

    Ok(PreparedRequest {
        use_tls,
        port: Some(port),
        headers,
        marshaled: normalized.marshal()?,
        body: request.body_stream().cloned(),
    })
}
