//! End-to-end tests for crtbridge.
//!
//! Every test runs the real wrappers against the in-process loopback engine,
//! so resource lifecycles, reference edges and shutdown ordering are
//! exercised exactly as a native engine would drive them.
//!
//! Run them with:
//! ```text
//! cargo test -p crtbridge-integration
//! ```

use std::sync::{Arc, Once};

use crtbridge_core::{ClientBootstrap, Credentials, CredentialsProvider, EventLoopGroup};
use crtbridge_http::{HttpClientConnectionManager, HttpClientConnectionManagerOptions, HttpRequest};
use crtbridge_loopback::LoopbackEngine;
use crtbridge_s3::{
    BufferedResponse, BufferedResponseHandler, MetaRequestType, S3Client, S3ClientOptions,
    S3MetaRequest, S3MetaRequestOptions,
};

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Host header used by test requests.
pub const TEST_HOST: &str = "test-bucket.s3.localhost";

/// A loopback engine plus the I/O resources clients depend on.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct Harness {
    /// The engine.
    pub engine: Arc<LoopbackEngine>,
    /// Bootstrap shared by clients and pools.
    pub bootstrap: Arc<ClientBootstrap>,
    /// Default credentials.
    pub credentials: Arc<CredentialsProvider>,
}

impl Harness {
    /// Create a harness on the current runtime.
    #[must_use]
    pub fn new() -> Self {
        init_tracing();
        let engine = Arc::new(LoopbackEngine::new().expect("loopback engine"));
        let group = EventLoopGroup::new(engine.clone(), 2).expect("event loop group");
        let bootstrap = ClientBootstrap::new(engine.clone(), group, 16).expect("bootstrap");
        let credentials = CredentialsProvider::new_static(engine.clone(), &Credentials::new("test", "test"))
            .expect("credentials provider");
        Self {
            engine,
            bootstrap,
            credentials,
        }
    }

    /// An S3 client over this harness's resources.
    #[must_use]
    pub fn s3_client(&self, part_size: u64) -> S3Client {
        let options = S3ClientOptions::builder()
            .region("us-east-1")
            .client_bootstrap(self.bootstrap.clone())
            .credentials_provider(self.credentials.clone())
            .tls_enabled(false)
            .part_size(part_size)
            .build();
        S3Client::new(self.engine.clone(), options).expect("s3 client")
    }

    /// A connection pool for [`TEST_HOST`].
    #[must_use]
    pub fn connection_manager(&self, max_connections: usize) -> HttpClientConnectionManager {
        let options = HttpClientConnectionManagerOptions::builder()
            .client_bootstrap(self.bootstrap.clone())
            .uri(format!("http://{TEST_HOST}").parse().expect("uri"))
            .max_connections(max_connections)
            .build();
        HttpClientConnectionManager::new(self.engine.clone(), options).expect("connection manager")
    }

    /// A fresh static credentials provider.
    #[must_use]
    pub fn credentials_provider(&self, access_key_id: &str) -> Arc<CredentialsProvider> {
        CredentialsProvider::new_static(self.engine.clone(), &Credentials::new(access_key_id, "secret"))
            .expect("credentials provider")
    }

    /// Drop the harness's own references and keep only the engine.
    #[must_use]
    pub fn into_engine(self) -> Arc<LoopbackEngine> {
        self.engine
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a unique object path for a test.
#[must_use]
pub fn test_object_path(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("/test-bucket/{prefix}-{id}")
}

/// A request for `path` carrying the test host header.
#[must_use]
pub fn request(method: http::Method, path: &str) -> HttpRequest {
    HttpRequest::new(method, path).with_header("Host", TEST_HOST)
}

/// Start a meta-request with a buffering handler.
pub fn start(
    client: &S3Client,
    kind: MetaRequestType,
    request: HttpRequest,
) -> (S3MetaRequest, crtbridge_core::CompletionFuture<BufferedResponse>) {
    let (handler, response) = BufferedResponseHandler::new();
    let options = S3MetaRequestOptions::builder()
        .meta_request_type(kind)
        .http_request(request)
        .response_handler(Box::new(handler))
        .build();
    let meta_request = client.make_meta_request(options).expect("meta request");
    (meta_request, response)
}

/// Run a meta-request to completion and wait for its native teardown.
pub async fn run(client: &S3Client, kind: MetaRequestType, request: HttpRequest) -> BufferedResponse {
    let (meta_request, response) = start(client, kind, request);
    let response = response.await.expect("meta request response");
    let shutdown = meta_request.wait_for_shutdown();
    meta_request.close();
    shutdown.await;
    response
}

mod test_client;
mod test_connection;
mod test_lifecycle;
