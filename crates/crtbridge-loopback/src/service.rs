//! Object operations served by the loopback engine.
//!
//! Both HTTP streams and S3 meta-requests end up here: a parsed request plus
//! its fully read body goes in, a status, headers and body come out. Paths
//! are used as object keys verbatim, minus any query string.

use bytes::Bytes;
use crtbridge_http::{HttpHeader, HttpRequest};
use http::Method;
use tracing::debug;
use uuid::Uuid;

use crate::store::ObjectStore;

/// Header naming the source of a server-side copy.
pub const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";

/// Header carrying the per-response request id.
pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// A response produced by [`serve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// HTTP status.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<HttpHeader>,
    /// Response body; an S3 error document for failures.
    pub body: Bytes,
}

impl ServiceResponse {
    fn new(status: u16, request_id: &str) -> Self {
        Self {
            status,
            headers: vec![HttpHeader::new(REQUEST_ID_HEADER, request_id)],
            body: Bytes::new(),
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push(HttpHeader::new(name, value));
        self
    }

    fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    fn error(status: u16, code: &str, message: &str, resource: &str, request_id: &str) -> Self {
        let document = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{code}</Code><Message>{message}</Message><Resource>{resource}</Resource><RequestId>{request_id}</RequestId></Error>"
        );
        Self::new(status, request_id)
            .header("Content-Type", "application/xml")
            .body(Bytes::from(document))
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Execute `request` against `store`.
///
/// `copy` forces a `PUT` to be treated as a server-side copy even without
/// the copy-source header being the reason.
pub fn serve(store: &ObjectStore, request: &HttpRequest, body: Bytes, copy: bool) -> ServiceResponse {
    let request_id = Uuid::new_v4().to_string();
    let key = request
        .encoded_path()
        .split('?')
        .next()
        .unwrap_or_default();
    debug!(method = %request.method(), key, %request_id, "serving loopback request");

    if key.len() < 2 || !key.starts_with('/') {
        return ServiceResponse::error(400, "InvalidURI", "Couldn't parse the specified URI.", key, &request_id);
    }

    match *request.method() {
        Method::GET => get_object(store, request, key, &request_id),
        Method::HEAD => head_object(store, key, &request_id),
        Method::PUT if copy || request.header(COPY_SOURCE_HEADER).is_some() => {
            copy_object(store, request, key, &request_id)
        }
        Method::PUT => {
            let etag = store.put(key, body, request.header("content-type"));
            ServiceResponse::new(200, &request_id).header("ETag", etag)
        }
        Method::DELETE => {
            store.remove(key);
            ServiceResponse::new(204, &request_id)
        }
        _ => ServiceResponse::error(
            405,
            "MethodNotAllowed",
            "The specified method is not allowed against this resource.",
            key,
            &request_id,
        ),
    }
}

fn no_such_key(key: &str, request_id: &str) -> ServiceResponse {
    ServiceResponse::error(404, "NoSuchKey", "The specified key does not exist.", key, request_id)
}

fn get_object(store: &ObjectStore, request: &HttpRequest, key: &str, request_id: &str) -> ServiceResponse {
    let Some(object) = store.get(key) else {
        return no_such_key(key, request_id);
    };
    let total = object.data.len();
    let response = ServiceResponse::new(200, request_id)
        .header("ETag", object.etag)
        .header("Content-Type", object.content_type);

    match request.header("range").map(|range| parse_range(range, total)) {
        None => response
            .header("Content-Length", total.to_string())
            .body(object.data),
        Some(Some((start, end))) => {
            let mut response = response
                .header("Content-Length", (end - start + 1).to_string())
                .header("Content-Range", format!("bytes {start}-{end}/{total}"))
                .body(object.data.slice(start..=end));
            response.status = 206;
            response
        }
        Some(None) => ServiceResponse::error(
            416,
            "InvalidRange",
            "The requested range is not satisfiable",
            key,
            request_id,
        ),
    }
}

fn head_object(store: &ObjectStore, key: &str, request_id: &str) -> ServiceResponse {
    match store.get(key) {
        Some(object) => ServiceResponse::new(200, request_id)
            .header("ETag", object.etag)
            .header("Content-Type", object.content_type)
            .header("Content-Length", object.data.len().to_string()),
        None => ServiceResponse::new(404, request_id),
    }
}

fn copy_object(store: &ObjectStore, request: &HttpRequest, key: &str, request_id: &str) -> ServiceResponse {
    let Some(source) = request.header(COPY_SOURCE_HEADER) else {
        return ServiceResponse::error(
            400,
            "InvalidRequest",
            "Copy requests must name a copy source.",
            key,
            request_id,
        );
    };
    let source = if source.starts_with('/') {
        source.to_owned()
    } else {
        format!("/{source}")
    };

    match store.copy(&source, key) {
        Some(etag) => {
            let document = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CopyObjectResult><ETag>{etag}</ETag></CopyObjectResult>"
            );
            ServiceResponse::new(200, request_id)
                .header("Content-Type", "application/xml")
                .body(Bytes::from(document))
        }
        None => no_such_key(&source, request_id),
    }
}

/// Parse a single `bytes=` range against an object of `total` bytes into an
/// inclusive `(start, end)` pair.
fn parse_range(range: &str, total: usize) -> Option<(usize, usize)> {
    let bounds = range.trim().strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => {
            let suffix: usize = suffix.parse().ok()?;
            (total.checked_sub(suffix.min(total))?, total.checked_sub(1)?)
        }
        (start, "") => (start.parse().ok()?, total.checked_sub(1)?),
        (start, end) => (start.parse().ok()?, end.parse::<usize>().ok()?.min(total.checked_sub(1)?)),
    };
    (start <= end && end < total).then_some((start, end))
}
