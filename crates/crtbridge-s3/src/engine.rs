//! The S3 boundary of the native engine.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use crtbridge_core::{ErrorCode, NativeHandle, ShutdownCallback};
use crtbridge_http::HttpRequestBodyStream;

use crate::handler::MetaRequestSink;
use crate::options::{MetaRequestType, StandardRetryOptions};

/// Native client configuration resolved from
/// [`S3ClientOptions`](crate::S3ClientOptions).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Signing region.
    pub region: String,
    /// Endpoint override.
    pub endpoint: Option<String>,
    /// Bootstrap handle.
    pub bootstrap: NativeHandle,
    /// TLS context handle, if one was given.
    pub tls_context: Option<NativeHandle>,
    /// Default TLS usage.
    pub use_tls: bool,
    /// Default credentials provider handle.
    pub credentials_provider: NativeHandle,
    /// Part size in bytes.
    pub part_size: u64,
    /// Throughput target in Gbps.
    pub throughput_target_gbps: f64,
    /// Connection cap; `0` for engine-derived.
    pub max_connections: usize,
    /// Retry strategy.
    pub retry: Option<StandardRetryOptions>,
    /// Compute `Content-MD5` for uploads.
    pub compute_content_md5: bool,
}

/// Everything the engine needs to start one meta-request.
#[derive(Clone)]
pub struct MetaRequestDispatch {
    /// Signing region.
    pub region: String,
    /// Kind of transfer.
    pub meta_request_type: MetaRequestType,
    /// Marshalled request image.
    pub request: Bytes,
    /// Body source, pulled lazily.
    pub body: Option<Arc<dyn HttpRequestBodyStream>>,
    /// Per-request credentials provider handle.
    pub credentials_provider: Option<NativeHandle>,
    /// Whether to use TLS.
    pub use_tls: bool,
    /// Port; `None` for the engine default.
    pub port: Option<u16>,
}

impl fmt::Debug for MetaRequestDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaRequestDispatch")
            .field("region", &self.region)
            .field("meta_request_type", &self.meta_request_type)
            .field("request_len", &self.request.len())
            .field("has_body", &self.body.is_some())
            .field("credentials_provider", &self.credentials_provider)
            .field("use_tls", &self.use_tls)
            .field("port", &self.port)
            .finish()
    }
}

/// Engine entry points for S3 clients and meta-requests.
pub trait S3Engine: Send + Sync + fmt::Debug + 'static {
    /// Create a client. `on_shutdown` runs once the client is fully torn
    /// down, which may be long after [`destroy_client`](Self::destroy_client)
    /// if meta-requests are still draining.
    fn new_client(
        &self,
        config: &ClientConfig,
        on_shutdown: ShutdownCallback,
    ) -> Result<NativeHandle, ErrorCode>;

    /// Begin tearing a client down.
    fn destroy_client(&self, client: NativeHandle);

    /// Start a meta-request.
    fn make_meta_request(
        &self,
        client: NativeHandle,
        dispatch: MetaRequestDispatch,
        sink: Arc<dyn MetaRequestSink>,
    ) -> Result<NativeHandle, ErrorCode>;

    /// Ask the engine to stop a meta-request early. It still finishes
    /// through the sink.
    fn cancel_meta_request(&self, meta_request: NativeHandle);

    /// Grow a meta-request's read window.
    fn increment_read_window(&self, meta_request: NativeHandle, bytes: u64);

    /// Release a meta-request. The engine calls
    /// [`MetaRequestSink::on_shutdown`] once it is gone.
    fn destroy_meta_request(&self, meta_request: NativeHandle);
}
