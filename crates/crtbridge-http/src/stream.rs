//! One in-flight request/response pair.

use std::sync::Arc;

use crtbridge_core::{CrtResource, CrtResult, ResourceLifecycle};
use futures::future::BoxFuture;
use tracing::debug;

use crate::engine::HttpEngine;
use crate::response::StreamAdapter;

/// A request started on an
/// [`HttpClientConnection`](crate::HttpClientConnection).
///
/// Dropping or closing the stream releases it; if the request is still in
/// flight the engine cancels it and the handler sees a failed completion.
/// The stream counts as released only once the engine confirms teardown.
#[derive(Debug)]
pub struct HttpStream {
    lifecycle: Arc<ResourceLifecycle>,
    adapter: Arc<StreamAdapter>,
    engine: Arc<dyn HttpEngine>,
}

impl HttpStream {
    pub(crate) fn new(
        lifecycle: Arc<ResourceLifecycle>,
        adapter: Arc<StreamAdapter>,
        engine: Arc<dyn HttpEngine>,
    ) -> Self {
        Self {
            lifecycle,
            adapter,
            engine,
        }
    }

    /// Status code of the main response, once its headers arrived.
    #[must_use]
    pub fn response_status_code(&self) -> Option<u16> {
        self.adapter.response_status()
    }

    /// Whether the response completed (successfully or not).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.adapter.is_complete()
    }

    /// Grow the flow-control window by `increment` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::UseAfterRelease`](crtbridge_core::CrtError::UseAfterRelease)
    /// once the stream was closed.
    pub fn update_window(&self, increment: usize) -> CrtResult<()> {
        let handle = self.lifecycle.handle()?;
        self.engine.update_stream_window(handle, increment);
        Ok(())
    }

    /// Release the stream. Idempotent.
    pub fn close(&self) {
        let engine = &self.engine;
        if self.lifecycle.release(|handle| engine.release_stream(handle)) {
            debug!(id = %self.lifecycle.id(), "http stream closed");
        }
    }

    /// Resolves once the engine has torn the stream down.
    pub fn wait_for_shutdown(&self) -> BoxFuture<'static, ()> {
        self.lifecycle.wait_for_shutdown()
    }
}

impl CrtResource for HttpStream {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        self.close();
    }
}
