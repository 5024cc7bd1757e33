//! crtbridge demo - a put/get round trip over the loopback engine.
//!
//! Uploads an object with a `PutObject` meta-request, downloads it again in
//! parts with `GetObject`, reads it once more over a pooled HTTP connection,
//! then tears everything down and waits for the engine to confirm.
//!
//! # Usage
//!
//! ```text
//! CRT_PART_SIZE=16 crtbridge-demo
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CRT_LOG_LEVEL` | `info` | Log level filter |
//! | `CRT_DEFAULT_REGION` | `us-east-1` | Signing region |
//! | `CRT_PART_SIZE` | `8388608` | Meta-request part size |
//! | `CRT_EVENT_LOOP_THREADS` | `0` | Event loop threads (0 = one per core) |
//! | `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` | `test` | Static credentials |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `CRT_LOG_LEVEL`) |

use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use crtbridge_core::{
    ClientBootstrap, Credentials, CredentialsProvider, CrtConfig, ErrorCode, EventLoopGroup,
};
use crtbridge_http::{
    BytesBodyStream, HeaderBlock, HttpClientConnectionManager, HttpClientConnectionManagerOptions,
    HttpHeader, HttpRequest, HttpStreamResponseHandler,
};
use crtbridge_loopback::LoopbackEngine;
use crtbridge_s3::{
    BufferedResponse, BufferedResponseHandler, MetaRequestType, S3Client, S3ClientOptions,
    S3MetaRequestOptions,
};
use http::Method;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const BUCKET_HOST: &str = "demo-bucket.s3.localhost";
const OBJECT_PATH: &str = "/demo-bucket/hello.txt";

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `CRT_LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

fn credentials_from_env() -> Credentials {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_else(|_| "test".to_owned());
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_else(|_| "test".to_owned());
    Credentials::new(access_key, secret_key)
}

async fn run_meta_request(
    client: &S3Client,
    kind: MetaRequestType,
    request: HttpRequest,
) -> Result<BufferedResponse> {
    let (handler, response) = BufferedResponseHandler::new();
    let options = S3MetaRequestOptions::builder()
        .meta_request_type(kind)
        .http_request(request)
        .response_handler(Box::new(handler))
        .build();

    let meta_request = client
        .make_meta_request(options)
        .with_context(|| format!("failed to start {kind:?} meta request"))?;
    let response = response.await.context("meta request dropped its response")?;
    let shutdown = meta_request.wait_for_shutdown();
    meta_request.close();
    shutdown.await;

    if !response.is_success() {
        bail!(
            "{kind:?} failed with {} (status {}): {}",
            response.error_code,
            response.status,
            String::from_utf8_lossy(&response.error_payload)
        );
    }
    Ok(response)
}

/// Collects a plain HTTP response into a channel.
struct Collect {
    status: u16,
    body: Vec<u8>,
    done: Option<oneshot::Sender<(u16, Vec<u8>, ErrorCode)>>,
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
            let _ = done.send((self.status, std::mem::take(&mut self.body), error_code));
        }
    }
}

async fn read_over_connection(
    engine: &Arc<LoopbackEngine>,
    bootstrap: Arc<ClientBootstrap>,
) -> Result<Vec<u8>> {
    let options = HttpClientConnectionManagerOptions::builder()
        .client_bootstrap(bootstrap)
        .uri(
            format!("http://{BUCKET_HOST}")
                .parse::<http::Uri>()
                .context("invalid endpoint uri")?,
        )
        .build();
    let manager = HttpClientConnectionManager::new(engine.clone(), options)
        .context("failed to create connection manager")?;
    let connection = manager
        .acquire_connection()
        .await
        .context("failed to acquire connection")?;

    let (tx, rx) = oneshot::channel();
    let handler = Collect {
        status: 0,
        body: Vec::new(),
        done: Some(tx),
    };
    let request = HttpRequest::new(Method::GET, OBJECT_PATH).with_header("Host", BUCKET_HOST);
    let stream = connection
        .make_request(&request, handler)
        .context("failed to start http request")?;
    let (status, body, error_code) = rx.await.context("http stream dropped its handler")?;
    ensure!(error_code.is_success(), "http stream failed with {error_code}");
    ensure!(status == 200, "unexpected http status {status}");

    stream.close();
    stream.wait_for_shutdown().await;
    connection.close();
    let shutdown = manager.wait_for_shutdown();
    manager.close();
    shutdown.await;
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = CrtConfig::from_env();
    init_tracing(&config.log_level)?;
    info!(
        config = %serde_json::to_string(&config).context("failed to render configuration")?,
        "starting crtbridge demo"
    );

    let engine = Arc::new(LoopbackEngine::new().context("failed to start loopback engine")?);
    let group = EventLoopGroup::new(engine.clone(), config.resolved_event_loop_threads())
        .context("failed to create event loop group")?;
    let bootstrap = ClientBootstrap::new(engine.clone(), group, config.host_resolver_max_entries)
        .context("failed to create client bootstrap")?;
    let credentials = CredentialsProvider::new_static(engine.clone(), &credentials_from_env())
        .context("failed to create credentials provider")?;

    let options = S3ClientOptions::builder()
        .client_bootstrap(bootstrap.clone())
        .credentials_provider(credentials)
        .tls_enabled(false)
        .build()
        .with_config_defaults(&config);
    let client = S3Client::new(engine.clone(), options).context("failed to create s3 client")?;

    let payload = "hello from crtbridge\n".repeat(64);
    let put = HttpRequest::new(Method::PUT, OBJECT_PATH)
        .with_header("Host", BUCKET_HOST)
        .with_header("Content-Type", "text/plain")
        .with_header("Content-Length", payload.len().to_string())
        .with_body(Arc::new(BytesBodyStream::new(payload.clone())));
    let response = run_meta_request(&client, MetaRequestType::PutObject, put).await?;
    let etag = response
        .headers
        .iter()
        .find(|h| h.is("etag"))
        .map(|h| h.value().to_owned())
        .unwrap_or_default();
    info!(path = OBJECT_PATH, size = payload.len(), %etag, "uploaded object");

    let get = HttpRequest::new(Method::GET, OBJECT_PATH).with_header("Host", BUCKET_HOST);
    let response = run_meta_request(&client, MetaRequestType::GetObject, get).await?;
    ensure!(
        response.body[..] == *payload.as_bytes(),
        "downloaded object does not match the upload"
    );
    info!(path = OBJECT_PATH, size = response.body.len(), "downloaded object");

    let body = read_over_connection(&engine, bootstrap).await?;
    ensure!(body == payload.as_bytes(), "http read does not match the upload");
    info!(size = body.len(), "read object over pooled connection");

    let shutdown = client.wait_for_shutdown();
    client.close();
    shutdown.await;

    let open = engine.open_handles();
    if open > 0 {
        warn!(open, "native handles still open after shutdown");
    }
    info!(calls = engine.calls().len(), "crtbridge demo finished");
    Ok(())
}
