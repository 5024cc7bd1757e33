//! S3 meta-request integration tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use crtbridge_core::{CrtError, CrtResource, ErrorCode};
    use crtbridge_http::BytesBodyStream;
    use crtbridge_loopback::INVALID_RESPONSE_STATUS;
    use crtbridge_s3::{BufferedResponseHandler, MetaRequestType, S3MetaRequestOptions};
    use http::Method;

    use crate::{Harness, request, run, start, test_object_path};

    fn put_request(path: &str, data: &'static str) -> crtbridge_http::HttpRequest {
        request(Method::PUT, path)
            .with_header("Content-Type", "text/plain")
            .with_header("Content-Length", data.len().to_string())
            .with_body(Arc::new(BytesBodyStream::new(data)))
    }

    #[tokio::test]
    async fn test_should_put_and_get_object_in_parts() {
        let harness = Harness::new();
        let client = harness.s3_client(8);
        let path = test_object_path("round-trip");
        let data = "the quick brown fox jumps over the lazy dog";

        let put = run(&client, MetaRequestType::PutObject, put_request(&path, data)).await;
        assert!(put.is_success(), "put failed: {put:?}");
        let etag = put.headers.iter().find(|h| h.is("etag")).map(|h| h.value().to_owned());
        assert_eq!(etag.as_deref(), Some(harness.engine.object(&path).unwrap().etag.as_str()));

        let get = run(&client, MetaRequestType::GetObject, request(Method::GET, &path)).await;
        assert!(get.is_success());
        assert_eq!(get.status, 200);
        assert_eq!(get.body_text(), Some(data));
    }

    #[tokio::test]
    async fn test_should_report_missing_object_with_error_payload() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);
        let path = test_object_path("missing");

        let response = run(&client, MetaRequestType::GetObject, request(Method::GET, &path)).await;

        assert!(!response.is_success());
        assert_eq!(response.error_code, INVALID_RESPONSE_STATUS);
        assert_eq!(response.status, 404);
        assert!(response.body.is_empty());
        let payload = String::from_utf8_lossy(&response.error_payload);
        assert!(payload.contains("<Code>NoSuchKey</Code>"), "payload: {payload}");
    }

    #[tokio::test]
    async fn test_should_copy_object_server_side() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);
        let source = test_object_path("copy-source");
        let target = test_object_path("copy-target");
        harness.engine.put_object(&source, "copied bytes");

        let copy = request(Method::PUT, &target).with_header("x-amz-copy-source", source.trim_start_matches('/'));
        let response = run(&client, MetaRequestType::CopyObject, copy).await;

        assert!(response.is_success(), "copy failed: {response:?}");
        assert!(response.body_text().unwrap_or_default().contains("<CopyObjectResult>"));
        assert_eq!(harness.engine.object(&target).unwrap().data, Bytes::from_static(b"copied bytes"));
    }

    #[tokio::test]
    async fn test_should_serve_request_sent_to_endpoint_override() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);
        let path = test_object_path("override");
        harness.engine.put_object(&path, "overridden");

        let (handler, response) = BufferedResponseHandler::new();
        let options = S3MetaRequestOptions::builder()
            .meta_request_type(MetaRequestType::GetObject)
            .http_request(request(Method::GET, &path).with_header("Host", "ignored.example.com"))
            .response_handler(Box::new(handler))
            .uri("http://localhost:9000".parse().unwrap())
            .build();
        let meta_request = client.make_meta_request(options).unwrap();

        let response = response.await.unwrap();
        assert_eq!(response.body_text(), Some("overridden"));
        assert!(meta_request.is_finished());
        let shutdown = meta_request.wait_for_shutdown();
        meta_request.close();
        shutdown.await;
    }

    #[tokio::test]
    async fn test_should_keep_request_credentials_until_meta_request_shutdown() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);
        let path = test_object_path("creds");
        harness.engine.put_object(&path, "signed");

        let credentials = harness.credentials_provider("REQUEST-SCOPED");
        let weak = Arc::downgrade(&credentials);
        let (handler, response) = BufferedResponseHandler::new();
        let options = S3MetaRequestOptions::builder()
            .meta_request_type(MetaRequestType::GetObject)
            .http_request(request(Method::GET, &path))
            .response_handler(Box::new(handler))
            .credentials_provider(credentials)
            .build();
        let meta_request = client.make_meta_request(options).unwrap();

        assert!(response.await.unwrap().is_success());
        assert!(weak.upgrade().is_some(), "credentials released before meta request shutdown");

        let shutdown = meta_request.wait_for_shutdown();
        meta_request.close();
        shutdown.await;
        assert!(weak.upgrade().is_none(), "credentials outlived their meta request");
    }

    #[tokio::test]
    async fn test_should_reject_meta_request_without_handler() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);

        let options = S3MetaRequestOptions::builder()
            .meta_request_type(MetaRequestType::GetObject)
            .http_request(request(Method::GET, "/test-bucket/key"))
            .build();
        let err = client.make_meta_request(options).unwrap_err();

        assert!(matches!(err, CrtError::InvalidRequest(_)));
        assert_eq!(harness.engine.call_count("make_meta_request"), 0);
    }

    #[tokio::test]
    async fn test_should_surface_dispatch_failure_code() {
        let harness = Harness::new();
        let client = harness.s3_client(1024);
        harness.engine.fail_next("make_meta_request", ErrorCode::UNKNOWN);

        let (handler, _response) = BufferedResponseHandler::new();
        let options = S3MetaRequestOptions::builder()
            .http_request(request(Method::GET, "/test-bucket/key"))
            .response_handler(Box::new(handler))
            .build();
        let err = client.make_meta_request(options).unwrap_err();

        assert!(matches!(err, CrtError::DispatchFailed { code } if code == ErrorCode::UNKNOWN));
        assert_eq!(harness.engine.open_handles(), 4, "only io resources and the client stay open");
    }

    #[tokio::test]
    async fn test_should_cancel_meta_request_once() {
        let harness = Harness::new();
        let client = harness.s3_client(4);
        let path = test_object_path("cancel");
        harness.engine.put_object(&path, "x".repeat(4096));

        let (meta_request, response) = start(&client, MetaRequestType::GetObject, request(Method::GET, &path));
        meta_request.cancel().unwrap();
        meta_request.cancel().unwrap();

        let response = response.await.unwrap();
        assert_eq!(response.error_code, ErrorCode::CANCELED);
        assert_eq!(harness.engine.call_count("cancel_meta_request"), 2);

        let shutdown = meta_request.wait_for_shutdown();
        meta_request.close();
        meta_request.close();
        shutdown.await;
        assert_eq!(harness.engine.call_count("destroy_meta_request"), 1);
        assert!(matches!(
            meta_request.cancel(),
            Err(CrtError::UseAfterRelease { resource: "s3 meta request" })
        ));
    }

    #[tokio::test]
    async fn test_should_run_concurrent_meta_requests() {
        let harness = Harness::new();
        let client = Arc::new(harness.s3_client(16));

        let uploads = (0..8).map(|i| {
            let client = Arc::clone(&client);
            async move {
                let path = format!("/test-bucket/concurrent-{i}");
                let body = format!("payload number {i}");
                let put = request(Method::PUT, &path)
                    .with_header("Content-Length", body.len().to_string())
                    .with_body(Arc::new(BytesBodyStream::new(body.clone())));
                let response = run(&client, MetaRequestType::PutObject, put).await;
                (path, body, response.is_success())
            }
        });
        let results = futures::future::join_all(uploads).await;

        for (path, body, ok) in results {
            assert!(ok, "upload to {path} failed");
            assert_eq!(harness.engine.object(&path).unwrap().data, Bytes::from(body));
        }
        assert_eq!(harness.engine.call_count("make_meta_request"), 8);
        assert_eq!(client.lifecycle().kind(), "s3 client");
    }
}
