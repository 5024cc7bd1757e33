//! Connection pool front end.
//!
//! [`HttpClientConnectionManager`] wraps the engine's connection pool. Leasing
//! is asynchronous: [`acquire_connection`](HttpClientConnectionManager::acquire_connection)
//! returns an [`AcquireConnection`] future that the engine completes from one
//! of its threads. If the future is gone by then, the connection is handed
//! straight back to the pool.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crtbridge_core::{
    ClientBootstrap, CompletionBridge, CompletionFuture, CrtError, CrtResource, CrtResult,
    ErrorCode, NativeHandle, ReleasePolicy, ResourceLifecycle, TlsContext,
};
use futures::future::BoxFuture;
use http::Uri;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::connection::HttpClientConnection;
use crate::dispatch::{HTTP_PORT, HTTPS_PORT};
use crate::engine::{ConnectionManagerConfig, HttpEngine};
use crate::error::{HttpError, HttpResult};

/// Default pool capacity.
pub const DEFAULT_MAX_CONNECTIONS: usize = 2;

/// Default per-stream flow-control window (16 MiB).
pub const DEFAULT_WINDOW_SIZE: usize = 16 * 1024 * 1024;

/// Options for an [`HttpClientConnectionManager`].
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use crtbridge_core::ClientBootstrap;
/// # fn options(bootstrap: Arc<ClientBootstrap>) {
/// use crtbridge_http::HttpClientConnectionManagerOptions;
///
/// let options = HttpClientConnectionManagerOptions::builder()
///     .client_bootstrap(bootstrap)
///     .uri("http://localhost:4566".parse().unwrap())
///     .max_connections(8)
///     .build();
/// assert!(options.validate().is_ok());
/// # }
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct HttpClientConnectionManagerOptions {
    /// Bootstrap used to open sockets. Required.
    #[builder(default, setter(strip_option))]
    pub client_bootstrap: Option<Arc<ClientBootstrap>>,

    /// Endpoint every pooled connection talks to. Required.
    #[builder(default, setter(strip_option))]
    pub uri: Option<Uri>,

    /// TLS context; required for `https` endpoints.
    #[builder(default, setter(strip_option))]
    pub tls_context: Option<Arc<TlsContext>>,

    /// Pool capacity.
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Initial flow-control window per stream.
    #[builder(default = DEFAULT_WINDOW_SIZE)]
    pub window_size: usize,

    /// Whether the caller grows stream windows explicitly.
    #[builder(default = false)]
    pub manual_window_management: bool,
}

impl HttpClientConnectionManagerOptions {
    /// Check that required options are present and consistent.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::InvalidConfiguration`] naming the first problem.
    pub fn validate(&self) -> CrtResult<()> {
        if self.client_bootstrap.is_none() {
            return Err(invalid("client bootstrap is required"));
        }
        let Some(uri) = &self.uri else {
            return Err(invalid("uri is required"));
        };
        if uri.host().is_none() {
            return Err(invalid(&format!("uri {uri} has no host")));
        }
        if is_https(uri) && self.tls_context.is_none() {
            return Err(invalid("https endpoints require a tls context"));
        }
        if self.max_connections == 0 {
            return Err(invalid("max connections must be positive"));
        }
        if self.window_size == 0 {
            return Err(invalid("window size must be positive"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> CrtError {
    CrtError::InvalidConfiguration(reason.to_owned())
}

fn is_https(uri: &Uri) -> bool {
    uri.scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"))
}

/// A pool of connections to one endpoint.
///
/// The pool stays alive until the engine reports that every leased
/// connection came back, so it uses the deferred release policy and keeps
/// its bootstrap and TLS context alive until then.
pub struct HttpClientConnectionManager {
    lifecycle: Arc<ResourceLifecycle>,
    engine: Arc<dyn HttpEngine>,
    uri: Uri,
    max_connections: usize,
}

impl fmt::Debug for HttpClientConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConnectionManager")
            .field("lifecycle", &self.lifecycle)
            .field("uri", &self.uri)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

impl HttpClientConnectionManager {
    /// Create a pool.
    ///
    /// # Errors
    ///
    /// - [`CrtError::InvalidConfiguration`] if `options` fail validation.
    /// - [`CrtError::UseAfterRelease`] if a dependency was already released.
    /// - [`CrtError::AcquisitionFailed`] if the engine refuses the pool.
    pub fn new(
        engine: Arc<dyn HttpEngine>,
        options: HttpClientConnectionManagerOptions,
    ) -> CrtResult<Self> {
        options.validate()?;
        let HttpClientConnectionManagerOptions {
            client_bootstrap: Some(bootstrap),
            uri: Some(uri),
            tls_context,
            max_connections,
            window_size,
            manual_window_management,
        } = options
        else {
            return Err(invalid("client bootstrap and uri are required"));
        };

        let use_tls = is_https(&uri);
        let config = ConnectionManagerConfig {
            bootstrap: bootstrap.lifecycle().handle()?,
            tls_context: tls_context
                .as_ref()
                .map(|tls| tls.lifecycle().handle())
                .transpose()?,
            host: uri.host().unwrap_or_default().to_owned(),
            port: uri
                .port_u16()
                .unwrap_or(if use_tls { HTTPS_PORT } else { HTTP_PORT }),
            use_tls,
            max_connections,
            initial_window_size: window_size,
            manual_window_management,
        };

        let lifecycle = Arc::new(ResourceLifecycle::new(
            "http connection manager",
            ReleasePolicy::Deferred,
        ));
        let on_shutdown = lifecycle.shutdown_callback();
        lifecycle.acquire(|| engine.new_connection_manager(&config, on_shutdown))?;

        let manager = Self {
            lifecycle,
            engine,
            uri,
            max_connections,
        };
        manager.lifecycle.add_strong_reference(bootstrap)?;
        if let Some(tls) = tls_context {
            manager.lifecycle.add_strong_reference(tls)?;
        }
        info!(
            host = %config.host,
            port = config.port,
            use_tls,
            max_connections,
            "http connection manager created"
        );
        Ok(manager)
    }

    /// Lease a connection.
    ///
    /// The future fails with [`HttpError::Exception`] if the engine could not
    /// provide one. Dropping it before completion abandons the lease; a
    /// connection that arrives afterwards goes straight back to the pool.
    pub fn acquire_connection(&self) -> AcquireConnection {
        let manager = match self.lifecycle.handle() {
            Ok(handle) => handle,
            Err(e) => return AcquireConnection::failed(e.into()),
        };

        let (bridge, future) = CompletionBridge::future("acquire connection");
        let engine = Arc::clone(&self.engine);
        self.engine.acquire_connection(
            manager,
            Box::new(move |result| on_connection_acquired(&bridge, engine, result)),
        );
        AcquireConnection::pending(future)
    }

    /// The endpoint this pool connects to.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Pool capacity.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Begin tearing the pool down. Idempotent.
    pub fn close(&self) {
        let engine = &self.engine;
        if self
            .lifecycle
            .release(|handle| engine.release_connection_manager(handle))
        {
            debug!(uri = %self.uri, "http connection manager closing");
        }
    }

    /// Whether the engine has finished tearing the pool down.
    #[must_use]
    pub fn is_shutdown_complete(&self) -> bool {
        self.lifecycle.is_shutdown_complete()
    }

    /// Resolves once the engine has finished tearing the pool down.
    pub fn wait_for_shutdown(&self) -> BoxFuture<'static, ()> {
        self.lifecycle.wait_for_shutdown()
    }
}

impl CrtResource for HttpClientConnectionManager {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for HttpClientConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn on_connection_acquired(
    bridge: &CompletionBridge<HttpResult<HttpClientConnection>>,
    engine: Arc<dyn HttpEngine>,
    result: Result<NativeHandle, ErrorCode>,
) {
    let handle = match result {
        Ok(handle) => handle,
        Err(code) => {
            debug!(%code, "connection acquisition failed");
            bridge.complete(Err(HttpError::Exception { code }));
            return;
        }
    };

    let connection = match HttpClientConnection::from_pool(Arc::clone(&engine), handle) {
        Ok(connection) => connection,
        Err(e) => {
            engine.release_connection(handle);
            bridge.complete(Err(e.into()));
            return;
        }
    };

    if let Some(Ok(connection)) = bridge.complete(Ok(connection)).into_undelivered() {
        debug!(connection = ?handle, "acquisition abandoned, returning connection to pool");
        connection.close();
    }
}

enum AcquireState {
    Pending(CompletionFuture<HttpResult<HttpClientConnection>>),
    Failed(Option<HttpError>),
}

/// Future returned by [`HttpClientConnectionManager::acquire_connection`].
pub struct AcquireConnection {
    state: AcquireState,
}

impl fmt::Debug for AcquireConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            AcquireState::Pending(_) => "pending",
            AcquireState::Failed(_) => "failed",
        };
        f.debug_struct("AcquireConnection")
            .field("state", &state)
            .finish()
    }
}

impl AcquireConnection {
    fn pending(future: CompletionFuture<HttpResult<HttpClientConnection>>) -> Self {
        Self {
            state: AcquireState::Pending(future),
        }
    }

    fn failed(error: HttpError) -> Self {
        Self {
            state: AcquireState::Failed(Some(error)),
        }
    }

    /// Abandon the lease without dropping the future.
    pub fn cancel(&mut self) {
        if let AcquireState::Pending(future) = &mut self.state {
            future.cancel();
        }
    }
}

impl Future for AcquireConnection {
    type Output = HttpResult<HttpClientConnection>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            AcquireState::Pending(future) => Pin::new(future)
                .poll(cx)
                .map(|delivered| delivered.map_err(HttpError::from).and_then(|r| r)),
            AcquireState::Failed(error) => Poll::Ready(Err(error.take().unwrap_or_else(|| {
                HttpError::Crt(CrtError::InvalidState(
                    "acquire future polled after completion".to_owned(),
                ))
            }))),
        }
    }
}
