//! A single pooled HTTP connection.

use std::sync::Arc;

use crtbridge_core::{
    CrtError, CrtResource, CrtResult, NativeHandle, ReleasePolicy, ResourceLifecycle,
};
use tracing::{debug, warn};

use crate::dispatch;
use crate::engine::HttpEngine;
use crate::error::HttpResult;
use crate::request::HttpRequest;
use crate::response::{HttpStreamResponseHandler, StreamAdapter, StreamSink};
use crate::stream::HttpStream;

/// A connection leased from an
/// [`HttpClientConnectionManager`](crate::HttpClientConnectionManager).
///
/// Closing (or dropping) the connection returns it to the pool. That is
/// synchronous, so the connection uses the immediate release policy.
#[derive(Debug)]
pub struct HttpClientConnection {
    lifecycle: ResourceLifecycle,
    engine: Arc<dyn HttpEngine>,
}

impl HttpClientConnection {
    /// Wrap a connection handle handed out by the pool.
    pub(crate) fn from_pool(engine: Arc<dyn HttpEngine>, handle: NativeHandle) -> CrtResult<Self> {
        let lifecycle = ResourceLifecycle::new("http connection", ReleasePolicy::Immediate);
        lifecycle.attach(handle)?;
        Ok(Self { lifecycle, engine })
    }

    /// Start `request` on this connection.
    ///
    /// `handler` receives the response from engine threads. The returned
    /// stream may be closed at any time, which cancels the request.
    ///
    /// # Errors
    ///
    /// - [`CrtError::UseAfterRelease`] if the connection was already closed.
    /// - [`CrtError::DispatchFailed`] carrying the native code if the engine
    ///   refused the request.
    pub fn make_request<H>(&self, request: &HttpRequest, handler: H) -> HttpResult<HttpStream>
    where
        H: HttpStreamResponseHandler,
    {
        let connection = self.lifecycle.handle()?;
        let (image, body) = dispatch::prepare(request, None, false)?.into_parts();

        let stream_lifecycle = Arc::new(ResourceLifecycle::new(
            "http stream",
            ReleasePolicy::Deferred,
        ));
        let adapter = Arc::new(StreamAdapter::new(
            Box::new(handler),
            Arc::clone(&stream_lifecycle),
        ));
        let sink: Arc<dyn StreamSink> = adapter.clone();

        let handle = match self.engine.make_request(connection, image, body, sink) {
            Ok(handle) => handle,
            Err(code) => {
                warn!(connection = ?connection, %code, "http request dispatch failed");
                stream_lifecycle.release(|_| {});
                return Err(CrtError::DispatchFailed { code }.into());
            }
        };
        stream_lifecycle.attach(handle)?;
        debug!(
            connection = ?connection,
            stream = ?handle,
            method = %request.method(),
            path = request.encoded_path(),
            "http request dispatched"
        );

        Ok(HttpStream::new(
            stream_lifecycle,
            adapter,
            Arc::clone(&self.engine),
        ))
    }

    /// Close the underlying transport while keeping the wrapper.
    ///
    /// The connection still has to be closed to go back to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::UseAfterRelease`] if the connection was already closed.
    pub fn shutdown(&self) -> CrtResult<()> {
        let handle = self.lifecycle.handle()?;
        debug!(connection = ?handle, "shutting down http connection");
        self.engine.shutdown_connection(handle);
        Ok(())
    }

    /// Whether the connection is still leased.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Return the connection to its pool. Idempotent.
    pub fn close(&self) {
        let engine = &self.engine;
        self.lifecycle.release(|handle| engine.release_connection(handle));
    }
}

impl CrtResource for HttpClientConnection {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for HttpClientConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use crtbridge_core::{ErrorCode, LifecycleStatus};
    use http::Method;

    use super::*;
    use crate::body::BytesBodyStream;
    use crate::error::HttpError;
    use crate::response::HeaderBlock;
    use crate::testing::{NullHandler, RecordingHttpEngine};

    fn connection(engine: &Arc<RecordingHttpEngine>) -> HttpClientConnection {
        let handle = engine.mint();
        HttpClientConnection::from_pool(engine.clone(), handle).unwrap()
    }

    #[test]
    fn test_should_dispatch_marshalled_request_with_body() {
        let engine = Arc::new(RecordingHttpEngine::default());
        let conn = connection(&engine);
        let request = HttpRequest::new(Method::PUT, "/bucket/key")
            .with_header("Host", "example.com")
            .with_body(Arc::new(BytesBodyStream::new("data")));

        let stream = conn.make_request(&request, NullHandler::default()).unwrap();

        let dispatched = engine.dispatched.lock();
        assert_eq!(dispatched.len(), 1);
        let (image, has_body) = &dispatched[0];
        assert_eq!(image, &request.marshal().unwrap());
        assert!(*has_body);
        assert_eq!(stream.lifecycle().status(), LifecycleStatus::Active);
    }

    #[test]
    fn test_should_fail_with_native_code_when_dispatch_is_refused() {
        let engine = Arc::new(RecordingHttpEngine::default());
        let conn = connection(&engine);
        *engine.fail_with.lock() = Some(ErrorCode::CONNECTION_CLOSED);

        let err = conn
            .make_request(&HttpRequest::new(Method::GET, "/"), NullHandler::default())
            .unwrap_err();
        assert!(matches!(
            err,
            HttpError::Crt(CrtError::DispatchFailed { code }) if code == ErrorCode::CONNECTION_CLOSED
        ));
        assert_eq!(engine.count("release_stream"), 0);
    }

    #[test]
    fn test_should_refuse_requests_after_close() {
        let engine = Arc::new(RecordingHttpEngine::default());
        let conn = connection(&engine);
        conn.close();

        let err = conn
            .make_request(&HttpRequest::new(Method::GET, "/"), NullHandler::default())
            .unwrap_err();
        assert!(matches!(
            err,
            HttpError::Crt(CrtError::UseAfterRelease { resource: "http connection" })
        ));
        assert!(engine.dispatched.lock().is_empty());
        assert!(matches!(conn.shutdown(), Err(CrtError::UseAfterRelease { .. })));
    }

    #[test]
    fn test_should_return_to_pool_exactly_once() {
        let engine = Arc::new(RecordingHttpEngine::default());
        let conn = connection(&engine);
        assert!(conn.is_open());

        conn.close();
        conn.close();
        drop(conn);

        assert_eq!(engine.count("release_connection"), 1);
    }

    #[test]
    fn test_should_shutdown_without_releasing() {
        let engine = Arc::new(RecordingHttpEngine::default());
        let conn = connection(&engine);

        conn.shutdown().unwrap();
        assert_eq!(engine.count("shutdown_connection"), 1);
        assert_eq!(engine.count("release_connection"), 0);
        assert!(conn.is_open());

        drop(conn);
        assert_eq!(engine.count("release_connection"), 1);
    }

    #[tokio::test]
    async fn test_should_release_stream_only_after_engine_confirms() {
        let engine = Arc::new(RecordingHttpEngine::default());
        let conn = connection(&engine);
        let stream = conn
            .make_request(&HttpRequest::new(Method::GET, "/"), NullHandler::default())
            .unwrap();
        let sink = engine.last_sink().unwrap();

        sink.on_response_headers(200, HeaderBlock::Main, &[]);
        assert_eq!(stream.response_status_code(), Some(200));
        stream.update_window(1024).unwrap();
        assert_eq!(engine.count("update_stream_window"), 1);

        let shutdown = stream.wait_for_shutdown();
        stream.close();
        assert_eq!(engine.count("release_stream"), 1);
        assert_eq!(stream.lifecycle().status(), LifecycleStatus::Releasing);
        assert!(stream.update_window(1).is_err());

        sink.on_stream_shutdown();
        shutdown.await;
        assert!(stream.is_complete());
        assert_eq!(stream.lifecycle().status(), LifecycleStatus::Released);

        drop(stream);
        assert_eq!(engine.count("release_stream"), 1);
    }
}
