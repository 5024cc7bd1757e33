//! Response callbacks, from the engine boundary to caller handlers.
//!
//! The engine drives a [`StreamSink`]; callers implement
//! [`HttpStreamResponseHandler`]. [`StreamAdapter`] sits between the two and
//! enforces the per-stream ordering contract:
//!
//! - the completion callback reaches the handler at most once, through a
//!   [`CompletionBridge`];
//! - nothing reaches the handler after completion;
//! - a shutdown that arrives before completion delivers a synthetic
//!   `SHUTDOWN_BEFORE_COMPLETION` completion first;
//! - the stream's lifecycle finishes only after completion was delivered.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use crtbridge_core::{CompletionBridge, ErrorCode, ResourceLifecycle};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

use crate::request::HttpHeader;

/// Which header block a header callback belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBlock {
    /// The main response headers.
    Main,
    /// An informational (1xx) response.
    Informational,
    /// Trailing headers after the body.
    Trailing,
}

/// Caller-side response callbacks for one HTTP stream.
///
/// Callbacks run on engine threads, one at a time and in engine order.
pub trait HttpStreamResponseHandler: Send + 'static {
    /// A batch of response headers arrived.
    fn on_response_headers(&mut self, status: u16, block: HeaderBlock, headers: &[HttpHeader]);

    /// All headers of `block` have arrived.
    fn on_response_header_block_done(&mut self, _block: HeaderBlock) {}

    /// A chunk of response body arrived.
    ///
    /// Returns the number of bytes by which to grow the flow-control window.
    fn on_response_body(&mut self, body: &[u8]) -> usize {
        body.len()
    }

    /// The stream finished; this is always the last callback.
    fn on_response_complete(&mut self, error_code: ErrorCode);
}

/// Engine-facing callbacks for one HTTP stream.
pub trait StreamSink: Send + Sync {
    /// Response headers.
    fn on_response_headers(&self, status: u16, block: HeaderBlock, headers: &[HttpHeader]);

    /// End of a header block.
    fn on_response_header_block_done(&self, block: HeaderBlock);

    /// A body chunk. Returns the window increment.
    fn on_response_body(&self, body: &[u8]) -> usize;

    /// Terminal outcome of the request.
    fn on_response_complete(&self, error_code: ErrorCode);

    /// Native stream resources are gone. Called once, after release.
    fn on_stream_shutdown(&self);
}

type SharedHandler = Arc<Mutex<Option<Box<dyn HttpStreamResponseHandler>>>>;

/// Bridges a [`StreamSink`] to a caller's handler and the stream lifecycle.
pub struct StreamAdapter {
    handler: SharedHandler,
    completion: CompletionBridge<ErrorCode>,
    /// Held across terminal delivery so shutdown waits for it to return.
    terminal: ReentrantMutex<()>,
    status: AtomicU16,
    lifecycle: Arc<ResourceLifecycle>,
}

impl fmt::Debug for StreamAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamAdapter")
            .field("status", &self.response_status())
            .field("completed", &self.is_complete())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl StreamAdapter {
    /// Wrap `handler` for the stream owning `lifecycle`.
    pub fn new(
        handler: Box<dyn HttpStreamResponseHandler>,
        lifecycle: Arc<ResourceLifecycle>,
    ) -> Self {
        let handler: SharedHandler = Arc::new(Mutex::new(Some(handler)));
        let target = Arc::clone(&handler);
        let completion = CompletionBridge::callback("http stream", move |code: ErrorCode| {
            let handler = target.lock().take();
            if let Some(mut handler) = handler {
                handler.on_response_complete(code);
            }
        });
        Self {
            handler,
            completion,
            terminal: ReentrantMutex::new(()),
            status: AtomicU16::new(0),
            lifecycle,
        }
    }

    /// Status code of the main response, once its headers arrived.
    #[must_use]
    pub fn response_status(&self) -> Option<u16> {
        match self.status.load(Ordering::Acquire) {
            0 => None,
            status => Some(status),
        }
    }

    /// Whether the completion callback has fired.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion.is_delivered()
    }

    fn with_handler<R>(
        &self,
        callback: &'static str,
        f: impl FnOnce(&mut dyn HttpStreamResponseHandler) -> R,
    ) -> Option<R> {
        let mut guard = self.handler.lock();
        if let Some(handler) = guard.as_mut() {
            Some(f(handler.as_mut()))
        } else {
            warn!(callback, id = %self.lifecycle.id(), "dropping http stream callback after completion");
            None
        }
    }
}

impl StreamSink for StreamAdapter {
    fn on_response_headers(&self, status: u16, block: HeaderBlock, headers: &[HttpHeader]) {
        if block == HeaderBlock::Main {
            self.status.store(status, Ordering::Release);
        }
        self.with_handler("response headers", |h| {
            h.on_response_headers(status, block, headers);
        });
    }

    fn on_response_header_block_done(&self, block: HeaderBlock) {
        self.with_handler("header block done", |h| h.on_response_header_block_done(block));
    }

    fn on_response_body(&self, body: &[u8]) -> usize {
        self.with_handler("response body", |h| h.on_response_body(body))
            .unwrap_or(0)
    }

    fn on_response_complete(&self, error_code: ErrorCode) {
        debug!(id = %self.lifecycle.id(), %error_code, "http stream complete");
        let _terminal = self.terminal.lock();
        self.completion.complete(error_code);
    }

    fn on_stream_shutdown(&self) {
        {
            let _terminal = self.terminal.lock();
            if !self.completion.is_delivered() {
                debug!(id = %self.lifecycle.id(), "http stream shut down before completing");
                self.completion.complete(ErrorCode::SHUTDOWN_BEFORE_COMPLETION);
            }
        }
        self.lifecycle.on_native_shutdown_complete();
    }
}
