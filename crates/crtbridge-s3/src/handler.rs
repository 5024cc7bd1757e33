//! Meta-request response callbacks.
//!
//! Callers implement [`S3MetaRequestResponseHandler`] (or use
//! [`BufferedResponseHandler`]). The engine drives a [`MetaRequestSink`],
//! implemented by [`MetaRequestAdapter`], which guarantees that
//! `on_finished` is the last callback a handler sees and that it is seen
//! exactly once, even when the engine tears the meta-request down early.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use crtbridge_core::{CompletionBridge, CompletionFuture, ErrorCode, ResourceLifecycle};
use crtbridge_http::HttpHeader;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

/// Terminal outcome of a meta-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3FinishedResponseContext {
    /// `SUCCESS` or the failure reported by the engine.
    pub error_code: ErrorCode,
    /// Status of the failing (or final) response; `0` if none arrived.
    pub response_status: u16,
    /// Body of the failing response, usually an S3 error document.
    pub error_payload: Bytes,
}

impl S3FinishedResponseContext {
    /// A successful outcome.
    #[must_use]
    pub fn success(response_status: u16) -> Self {
        Self {
            error_code: ErrorCode::SUCCESS,
            response_status,
            error_payload: Bytes::new(),
        }
    }

    /// A failed outcome without a response.
    #[must_use]
    pub fn failed(error_code: ErrorCode) -> Self {
        Self {
            error_code,
            response_status: 0,
            error_payload: Bytes::new(),
        }
    }

    /// Whether the meta-request succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_code.is_success()
    }
}

/// Caller-side callbacks for one meta-request.
///
/// Callbacks run on engine threads, one at a time. Body parts of a split
/// download may arrive out of offset order; `range_start` says where each
/// one belongs.
pub trait S3MetaRequestResponseHandler: Send + 'static {
    /// Headers of the (first) response.
    fn on_response_headers(&mut self, _status: u16, _headers: &[HttpHeader]) {}

    /// A body part covering `range_start..range_end` of the object.
    ///
    /// Returns the number of bytes by which to grow the read window.
    fn on_response_body(&mut self, body: &[u8], _range_start: u64, _range_end: u64) -> usize {
        body.len()
    }

    /// The meta-request finished; always the last callback.
    fn on_finished(&mut self, context: S3FinishedResponseContext);
}

/// Engine-facing callbacks for one meta-request.
pub trait MetaRequestSink: Send + Sync {
    /// Response headers.
    fn on_response_headers(&self, status: u16, headers: &[HttpHeader]);

    /// A body part. Returns the read window increment.
    fn on_response_body(&self, body: &[u8], range_start: u64, range_end: u64) -> usize;

    /// Terminal outcome.
    fn on_finished(&self, context: S3FinishedResponseContext);

    /// Native meta-request resources are gone. Called once, after release.
    fn on_shutdown(&self);
}

type SharedHandler = Arc<Mutex<Option<Box<dyn S3MetaRequestResponseHandler>>>>;

/// Bridges a [`MetaRequestSink`] to a caller's handler and the
/// meta-request lifecycle.
pub struct MetaRequestAdapter {
    handler: SharedHandler,
    finished: CompletionBridge<S3FinishedResponseContext>,
    /// Held across terminal delivery so shutdown waits for it to return.
    terminal: ReentrantMutex<()>,
    lifecycle: Arc<ResourceLifecycle>,
}

impl fmt::Debug for MetaRequestAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaRequestAdapter")
            .field("finished", &self.is_finished())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl MetaRequestAdapter {
    /// Wrap `handler` for the meta-request owning `lifecycle`.
    pub fn new(
        handler: Box<dyn S3MetaRequestResponseHandler>,
        lifecycle: Arc<ResourceLifecycle>,
    ) -> Self {
        let handler: SharedHandler = Arc::new(Mutex::new(Some(handler)));
        let target = Arc::clone(&handler);
        let finished = CompletionBridge::callback("s3 meta request", move |context: S3FinishedResponseContext| {
            let handler = target.lock().take();
            if let Some(mut handler) = handler {
                handler.on_finished(context);
            }
        });
        Self {
            handler,
            finished,
            terminal: ReentrantMutex::new(()),
            lifecycle,
        }
    }

    /// Whether `on_finished` has been delivered.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.is_delivered()
    }
}

impl MetaRequestSink for MetaRequestAdapter {
    fn on_response_headers(&self, status: u16, headers: &[HttpHeader]) {
        match self.handler.lock().as_mut() {
            Some(handler) => handler.on_response_headers(status, headers),
            None => warn!(id = %self.lifecycle.id(), "dropping meta request headers after finish"),
        }
    }

    fn on_response_body(&self, body: &[u8], range_start: u64, range_end: u64) -> usize {
        match self.handler.lock().as_mut() {
            Some(handler) => handler.on_response_body(body, range_start, range_end),
            None => {
                warn!(id = %self.lifecycle.id(), range_start, "dropping meta request body after finish");
                0
            }
        }
    }

    fn on_finished(&self, context: S3FinishedResponseContext) {
        debug!(
            id = %self.lifecycle.id(),
            error_code = %context.error_code,
            status = context.response_status,
            "s3 meta request finished"
        );
        let _terminal = self.terminal.lock();
        self.finished.complete(context);
    }

    fn on_shutdown(&self) {
        {
            let _terminal = self.terminal.lock();
            if !self.finished.is_delivered() {
                debug!(id = %self.lifecycle.id(), "s3 meta request shut down before finishing");
                self.finished.complete(S3FinishedResponseContext::failed(
                    ErrorCode::SHUTDOWN_BEFORE_COMPLETION,
                ));
            }
        }
        self.lifecycle.on_native_shutdown_complete();
    }
}

/// A fully buffered meta-request response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedResponse {
    /// Status of the response headers; `0` if none arrived.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<HttpHeader>,
    /// Response body, reassembled in object order.
    pub body: Bytes,
    /// `SUCCESS` or the engine's failure code.
    pub error_code: ErrorCode,
    /// S3 error document for failed requests.
    pub error_payload: Bytes,
}

impl BufferedResponse {
    /// Whether the meta-request succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_code.is_success()
    }

    /// The body as UTF-8 text, if it is.
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Handler that buffers the whole response and hands it to a future.
///
/// # Examples
///
/// ```
/// use crtbridge_core::ErrorCode;
/// use crtbridge_s3::{BufferedResponseHandler, S3FinishedResponseContext, S3MetaRequestResponseHandler};
///
/// # tokio_test::block_on(async {
/// let (mut handler, response) = BufferedResponseHandler::new();
/// handler.on_response_headers(200, &[]);
/// handler.on_response_body(b"world", 6, 11);
/// handler.on_response_body(b"hello ", 0, 6);
/// handler.on_finished(S3FinishedResponseContext::success(200));
///
/// let response = response.await.unwrap();
/// assert_eq!(response.body_text(), Some("hello world"));
/// assert_eq!(response.error_code, ErrorCode::SUCCESS);
/// # });
/// ```
pub struct BufferedResponseHandler {
    status: u16,
    headers: Vec<HttpHeader>,
    parts: Vec<(u64, Bytes)>,
    done: CompletionBridge<BufferedResponse>,
}

impl fmt::Debug for BufferedResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedResponseHandler")
            .field("status", &self.status)
            .field("parts", &self.parts.len())
            .finish_non_exhaustive()
    }
}

impl BufferedResponseHandler {
    /// A handler plus the future its response is delivered to.
    #[must_use]
    pub fn new() -> (Self, CompletionFuture<BufferedResponse>) {
        let (done, response) = CompletionBridge::future("buffered s3 response");
        let handler = Self {
            status: 0,
            headers: Vec::new(),
            parts: Vec::new(),
            done,
        };
        (handler, response)
    }
}

impl S3MetaRequestResponseHandler for BufferedResponseHandler {
    fn on_response_headers(&mut self, status: u16, headers: &[HttpHeader]) {
        self.status = status;
        self.headers.extend_from_slice(headers);
    }

    fn on_response_body(&mut self, body: &[u8], range_start: u64, _range_end: u64) -> usize {
        self.parts.push((range_start, Bytes::copy_from_slice(body)));
        body.len()
    }

    fn on_finished(&mut self, context: S3FinishedResponseContext) {
        self.parts.sort_by_key(|(offset, _)| *offset);
        let size = self.parts.iter().map(|(_, part)| part.len()).sum();
        let mut body = BytesMut::with_capacity(size);
        for (_, part) in self.parts.drain(..) {
            body.extend_from_slice(&part);
        }

        let status = if context.response_status == 0 {
            self.status
        } else {
            context.response_status
        };
        self.done.complete(BufferedResponse {
            status,
            headers: std::mem::take(&mut self.headers),
            body: body.freeze(),
            error_code: context.error_code,
            error_payload: context.error_payload,
        });
    }
}
