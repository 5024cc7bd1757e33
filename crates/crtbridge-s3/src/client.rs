//! The S3 client.

use std::fmt;
use std::sync::Arc;

use crtbridge_core::{CrtError, CrtResource, CrtResult, ReleasePolicy, ResourceLifecycle};
use crtbridge_http::dispatch;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::engine::{ClientConfig, MetaRequestDispatch, S3Engine};
use crate::handler::{MetaRequestAdapter, MetaRequestSink};
use crate::meta_request::S3MetaRequest;
use crate::options::{S3ClientOptions, S3MetaRequestOptions};

/// Client for S3 meta-requests.
///
/// The engine may still be draining meta-requests after the client is
/// closed, so the client uses the deferred release policy: its bootstrap,
/// credentials provider and TLS context stay alive until the engine reports
/// the client fully shut down.
pub struct S3Client {
    lifecycle: Arc<ResourceLifecycle>,
    engine: Arc<dyn S3Engine>,
    region: String,
    use_tls: bool,
}

impl fmt::Debug for S3Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Client")
            .field("lifecycle", &self.lifecycle)
            .field("region", &self.region)
            .field("use_tls", &self.use_tls)
            .finish_non_exhaustive()
    }
}

impl S3Client {
    /// Create a client.
    ///
    /// TLS is used by default when a TLS context is given or
    /// `tls_enabled` is set.
    ///
    /// # Errors
    ///
    /// - [`CrtError::InvalidConfiguration`] if a required option is missing.
    /// - [`CrtError::UseAfterRelease`] if a dependency was already released.
    /// - [`CrtError::AcquisitionFailed`] if the engine refuses the client.
    pub fn new(engine: Arc<dyn S3Engine>, options: S3ClientOptions) -> CrtResult<Self> {
        options.validate()?;
        let use_tls = options.uses_tls();
        let S3ClientOptions {
            region: Some(region),
            endpoint,
            client_bootstrap: Some(bootstrap),
            credentials_provider: Some(credentials),
            tls_context,
            part_size,
            throughput_target_gbps,
            max_connections,
            standard_retry_options,
            compute_content_md5,
            ..
        } = options
        else {
            return Err(CrtError::InvalidConfiguration(
                "region, client bootstrap and credentials provider are required".to_owned(),
            ));
        };

        let config = ClientConfig {
            region: region.clone(),
            endpoint,
            bootstrap: bootstrap.lifecycle().handle()?,
            tls_context: tls_context
                .as_ref()
                .map(|tls| tls.lifecycle().handle())
                .transpose()?,
            use_tls,
            credentials_provider: credentials.lifecycle().handle()?,
            part_size,
            throughput_target_gbps,
            max_connections,
            retry: standard_retry_options,
            compute_content_md5,
        };

        let lifecycle = Arc::new(ResourceLifecycle::new("s3 client", ReleasePolicy::Deferred));
        let on_shutdown = lifecycle.shutdown_callback();
        lifecycle.acquire(|| engine.new_client(&config, on_shutdown))?;

        let client = Self {
            lifecycle,
            engine,
            region,
            use_tls,
        };
        client.lifecycle.add_strong_reference(bootstrap)?;
        client.lifecycle.add_strong_reference(credentials)?;
        if let Some(tls) = tls_context {
            client.lifecycle.add_strong_reference(tls)?;
        }
        info!(
            region = %client.region,
            use_tls,
            part_size,
            throughput_target_gbps,
            "s3 client created"
        );
        Ok(client)
    }

    /// Start a meta-request.
    ///
    /// With a URI override in `options`, TLS and port follow the URI and the
    /// request's `Host` header is replaced by the URI host. A per-request
    /// credentials provider is kept alive until the meta-request shuts down.
    ///
    /// The returned handle must be kept until the handler sees
    /// `on_finished`; dropping it earlier cancels the transfer.
    ///
    /// # Errors
    ///
    /// - [`CrtError::InvalidRequest`] if the request or response handler is
    ///   missing. Nothing reaches the engine in that case.
    /// - [`CrtError::UseAfterRelease`] if the client was closed.
    /// - [`CrtError::DispatchFailed`] carrying the native code if the engine
    ///   refused the meta-request.
    pub fn make_meta_request(&self, options: S3MetaRequestOptions) -> CrtResult<S3MetaRequest> {
        let S3MetaRequestOptions {
            meta_request_type,
            http_request,
            response_handler,
            credentials_provider,
            uri,
        } = options;

        let Some(request) = http_request else {
            error!("s3 meta request has invalid options: http request is missing");
            return Err(CrtError::InvalidRequest(
                "http request cannot be missing".to_owned(),
            ));
        };
        let Some(handler) = response_handler else {
            error!("s3 meta request has invalid options: response handler is missing");
            return Err(CrtError::InvalidRequest(
                "response handler cannot be missing".to_owned(),
            ));
        };

        let client = self.lifecycle.handle()?;
        let prepared = dispatch::prepare(&request, uri.as_ref(), self.use_tls)?;
        let credentials = credentials_provider
            .as_ref()
            .map(|provider| provider.lifecycle().handle())
            .transpose()?;

        let lifecycle = Arc::new(ResourceLifecycle::new(
            "s3 meta request",
            ReleasePolicy::Deferred,
        ));
        if let Some(provider) = credentials_provider {
            lifecycle.add_strong_reference(provider)?;
        }
        let adapter = Arc::new(MetaRequestAdapter::new(handler, Arc::clone(&lifecycle)));
        let sink: Arc<dyn MetaRequestSink> = adapter.clone();

        let use_tls = prepared.use_tls();
        let port = prepared.port();
        let (image, body) = prepared.into_parts();
        let dispatch = MetaRequestDispatch {
            region: self.region.clone(),
            meta_request_type,
            request: image,
            body,
            credentials_provider: credentials,
            use_tls,
            port,
        };

        let handle = match self.engine.make_meta_request(client, dispatch, sink) {
            Ok(handle) => handle,
            Err(code) => {
                warn!(%code, kind = ?meta_request_type, "s3 meta request dispatch failed");
                lifecycle.release(|_| {});
                return Err(CrtError::DispatchFailed { code });
            }
        };
        lifecycle.attach(handle)?;
        debug!(
            id = %lifecycle.id(),
            kind = ?meta_request_type,
            method = %request.method(),
            path = request.encoded_path(),
            use_tls,
            ?port,
            "s3 meta request dispatched"
        );

        Ok(S3MetaRequest::new(lifecycle, adapter, Arc::clone(&self.engine)))
    }

    /// Signing region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Whether meta-requests use TLS unless a URI override says otherwise.
    #[must_use]
    pub fn uses_tls(&self) -> bool {
        self.use_tls
    }

    /// Begin tearing the client down. Idempotent.
    pub fn close(&self) {
        let engine = &self.engine;
        if self.lifecycle.release(|handle| engine.destroy_client(handle)) {
            debug!(id = %self.lifecycle.id(), "s3 client closing");
        }
    }

    /// Whether the engine has finished tearing the client down.
    #[must_use]
    pub fn is_shutdown_complete(&self) -> bool {
        self.lifecycle.is_shutdown_complete()
    }

    /// Resolves once the engine has finished tearing the client down and its
    /// dependencies were let go.
    pub fn wait_for_shutdown(&self) -> BoxFuture<'static, ()> {
        self.lifecycle.wait_for_shutdown()
    }
}

impl CrtResource for S3Client {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for S3Client {
    fn drop(&mut self) {
        self.close();
    }
}
