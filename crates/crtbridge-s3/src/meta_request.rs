//! One in-flight meta-request.

use std::sync::Arc;

use crtbridge_core::{CrtResource, CrtResult, ResourceLifecycle};
use futures::future::BoxFuture;
use tracing::debug;

use crate::engine::S3Engine;
use crate::handler::MetaRequestAdapter;

/// Handle to a meta-request started by
/// [`S3Client::make_meta_request`](crate::S3Client::make_meta_request).
///
/// Its outcome is delivered to the response handler. Closing (or dropping)
/// the meta-request cancels it if still running; it counts as released only
/// once the engine confirms, at which point a per-request credentials
/// provider is let go.
#[derive(Debug)]
pub struct S3MetaRequest {
    lifecycle: Arc<ResourceLifecycle>,
    adapter: Arc<MetaRequestAdapter>,
    engine: Arc<dyn S3Engine>,
}

impl S3MetaRequest {
    pub(crate) fn new(
        lifecycle: Arc<ResourceLifecycle>,
        adapter: Arc<MetaRequestAdapter>,
        engine: Arc<dyn S3Engine>,
    ) -> Self {
        Self {
            lifecycle,
            adapter,
            engine,
        }
    }

    /// Ask the engine to stop early. The handler still gets `on_finished`,
    /// typically with `CANCELED`.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::UseAfterRelease`](crtbridge_core::CrtError::UseAfterRelease)
    /// once the meta-request was closed.
    pub fn cancel(&self) -> CrtResult<()> {
        let handle = self.lifecycle.handle()?;
        debug!(id = %self.lifecycle.id(), "cancelling s3 meta request");
        self.engine.cancel_meta_request(handle);
        Ok(())
    }

    /// Grow the read window by `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::UseAfterRelease`](crtbridge_core::CrtError::UseAfterRelease)
    /// once the meta-request was closed.
    pub fn increment_read_window(&self, bytes: u64) -> CrtResult<()> {
        let handle = self.lifecycle.handle()?;
        self.engine.increment_read_window(handle, bytes);
        Ok(())
    }

    /// Whether the handler has received `on_finished`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.adapter.is_finished()
    }

    /// Release the meta-request. Idempotent.
    pub fn close(&self) {
        let engine = &self.engine;
        self.lifecycle
            .release(|handle| engine.destroy_meta_request(handle));
    }

    /// Resolves once the engine has torn the meta-request down.
    pub fn wait_for_shutdown(&self) -> BoxFuture<'static, ()> {
        self.lifecycle.wait_for_shutdown()
    }
}

impl CrtResource for S3MetaRequest {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for S3MetaRequest {
    fn drop(&mut self) {
        self.close();
    }
}
