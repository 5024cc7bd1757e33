//! Connection pool and HTTP stream integration tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crtbridge_core::{CrtError, ErrorCode};
    use crtbridge_http::{BytesBodyStream, HeaderBlock, HttpError, HttpHeader, HttpStreamResponseHandler};
    use http::Method;
    use tokio::sync::oneshot;

    use crate::{Harness, request, test_object_path};

    #[derive(Debug)]
    struct Outcome {
        status: u16,
        body: Vec<u8>,
        error_code: ErrorCode,
    }

    #[derive(Debug)]
    struct Collect {
        status: u16,
        body: Vec<u8>,
        done: Option<oneshot::Sender<Outcome>>,
    }

    fn collect() -> (Collect, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let handler = Collect {
            status: 0,
            body: Vec::new(),
            done: Some(tx),
        };
        (handler, rx)
    }

    impl HttpStreamResponseHandler for Collect {
        fn on_response_headers(&mut self, status: u16, block: HeaderBlock, _headers: &[HttpHeader]) {
            if block == HeaderBlock::Main {
                self.status = status;
            }
        }

        fn on_response_body(&mut self, body: &[u8]) -> usize {
            self.body.extend_from_slice(body);
            body.len()
        }

        fn on_response_complete(&mut self, error_code: ErrorCode) {
            if let Some(done) = self.done.take() {
                let _ = done.send(Outcome {
                    status: self.status,
                    body: std::mem::take(&mut self.body),
                    error_code,
                });
            }
        }
    }

    #[tokio::test]
    async fn test_should_exchange_requests_over_pooled_connection() {
        let harness = Harness::new();
        let manager = harness.connection_manager(2);
        let path = test_object_path("http");
        let connection = manager.acquire_connection().await.unwrap();

        let (handler, outcome) = collect();
        let put = request(Method::PUT, &path).with_body(Arc::new(BytesBodyStream::new("over the wire")));
        let stream = connection.make_request(&put, handler).unwrap();
        let outcome = outcome.await.unwrap();
        assert!(outcome.error_code.is_success());
        assert_eq!(outcome.status, 200);
        assert_eq!(stream.response_status_code(), Some(200));
        stream.close();

        let (handler, outcome) = collect();
        let stream = connection.make_request(&request(Method::GET, &path), handler).unwrap();
        let outcome = outcome.await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body, b"over the wire");
        stream.close();
        stream.wait_for_shutdown().await;

        connection.close();
        let shutdown = manager.wait_for_shutdown();
        manager.close();
        shutdown.await;
    }

    #[tokio::test]
    async fn test_should_queue_acquisitions_beyond_capacity() {
        let harness = Harness::new();
        let manager = harness.connection_manager(1);
        let first = manager.acquire_connection().await.unwrap();

        let waiter = tokio::spawn(manager.acquire_connection());
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        first.close();
        let second = waiter.await.unwrap().unwrap();
        assert!(second.is_open());
        assert_eq!(harness.engine.call_count("acquire_connection"), 2);
    }

    #[tokio::test]
    async fn test_should_return_cancelled_acquisition_to_pool() {
        let harness = Harness::new();
        let manager = harness.connection_manager(1);

        let mut pending = manager.acquire_connection();
        pending.cancel();
        drop(pending);

        let connection = manager.acquire_connection().await.unwrap();
        assert!(connection.is_open());
        assert_eq!(harness.engine.call_count("release_connection"), 1);
    }

    #[tokio::test]
    async fn test_should_fail_acquisition_with_native_code() {
        let harness = Harness::new();
        let manager = harness.connection_manager(4);
        harness.engine.fail_next("acquire_connection", ErrorCode::CONNECTION_CLOSED);

        let err = manager.acquire_connection().await.unwrap_err();

        assert_eq!(err.error_code(), Some(ErrorCode::CONNECTION_CLOSED));
        assert!(manager.acquire_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_should_refuse_requests_on_shut_down_connection() {
        let harness = Harness::new();
        let manager = harness.connection_manager(1);
        let connection = manager.acquire_connection().await.unwrap();

        connection.shutdown().unwrap();
        let (handler, _outcome) = collect();
        let err = connection.make_request(&request(Method::GET, "/test-bucket/key"), handler).unwrap_err();
        assert!(matches!(
            err,
            HttpError::Crt(CrtError::DispatchFailed { code }) if code == ErrorCode::CONNECTION_CLOSED
        ));

        connection.close();
        let (handler, _outcome) = collect();
        let err = connection.make_request(&request(Method::GET, "/test-bucket/key"), handler).unwrap_err();
        assert!(matches!(err, HttpError::Crt(CrtError::UseAfterRelease { .. })));
        assert_eq!(harness.engine.call_count("release_connection"), 1);
    }

    #[tokio::test]
    async fn test_should_cancel_stream_released_mid_flight() {
        let harness = Harness::new();
        let manager = harness.connection_manager(1);
        let path = test_object_path("released");
        harness.engine.put_object(&path, "never delivered");
        let connection = manager.acquire_connection().await.unwrap();

        let (handler, outcome) = collect();
        let stream = connection.make_request(&request(Method::GET, &path), handler).unwrap();
        let shutdown = stream.wait_for_shutdown();
        drop(stream);

        let outcome = outcome.await.unwrap();
        assert_eq!(outcome.error_code, ErrorCode::CANCELED);
        assert!(outcome.body.is_empty());
        shutdown.await;
    }

    #[tokio::test]
    async fn test_should_defer_pool_shutdown_until_connections_return() {
        let harness = Harness::new();
        let manager = harness.connection_manager(2);
        let connection = manager.acquire_connection().await.unwrap();

        let shutdown = manager.wait_for_shutdown();
        manager.close();
        tokio::task::yield_now().await;
        assert!(!manager.is_shutdown_complete());

        connection.close();
        shutdown.await;
        assert!(manager.is_shutdown_complete());
    }
}
