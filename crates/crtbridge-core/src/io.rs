//! I/O resources that clients and connection pools depend on.
//!
//! Event loop groups, bootstraps, TLS contexts, and credentials providers are
//! acquired from an [`IoEngine`] and shared through `Arc`. Their native handle
//! is released when the last `Arc` goes away, which includes the strong
//! references dependents hold through the [`ReferenceGraph`](crate::ReferenceGraph).

use std::fmt;
use std::sync::Arc;

use crate::error::{CrtResult, ErrorCode};
use crate::handle::NativeHandle;
use crate::lifecycle::{CrtResource, ReleasePolicy, ResourceLifecycle};

/// Engine entry points for I/O resources.
pub trait IoEngine: Send + Sync + fmt::Debug + 'static {
    /// Create an event loop group with `threads` loops.
    fn new_event_loop_group(&self, threads: usize) -> Result<NativeHandle, ErrorCode>;

    /// Create a client bootstrap bound to an event loop group.
    fn new_client_bootstrap(
        &self,
        event_loop_group: NativeHandle,
        host_resolver_max_entries: usize,
    ) -> Result<NativeHandle, ErrorCode>;

    /// Create a client TLS context.
    fn new_tls_context(&self, options: &TlsContextOptions) -> Result<NativeHandle, ErrorCode>;

    /// Create a credentials provider that always returns `credentials`.
    fn new_static_credentials_provider(
        &self,
        credentials: &Credentials,
    ) -> Result<NativeHandle, ErrorCode>;

    /// Release any handle produced by this trait.
    fn release_io_resource(&self, handle: NativeHandle);
}

/// A pool of native event loop threads.
#[derive(Debug)]
pub struct EventLoopGroup {
    lifecycle: ResourceLifecycle,
    engine: Arc<dyn IoEngine>,
    threads: usize,
}

impl EventLoopGroup {
    /// Create an event loop group with `threads` loops.
    pub fn new(engine: Arc<dyn IoEngine>, threads: usize) -> CrtResult<Arc<Self>> {
        let lifecycle = ResourceLifecycle::new("event loop group", ReleasePolicy::Immediate);
        lifecycle.acquire(|| engine.new_event_loop_group(threads))?;
        Ok(Arc::new(Self {
            lifecycle,
            engine,
            threads,
        }))
    }

    /// Number of event loops.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl CrtResource for EventLoopGroup {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for EventLoopGroup {
    fn drop(&mut self) {
        self.lifecycle.release(|h| self.engine.release_io_resource(h));
    }
}

/// Connection bootstrap: event loops plus host resolution.
#[derive(Debug)]
pub struct ClientBootstrap {
    lifecycle: ResourceLifecycle,
    engine: Arc<dyn IoEngine>,
}

impl ClientBootstrap {
    /// Create a bootstrap that keeps `event_loop_group` alive.
    pub fn new(
        engine: Arc<dyn IoEngine>,
        event_loop_group: Arc<EventLoopGroup>,
        host_resolver_max_entries: usize,
    ) -> CrtResult<Arc<Self>> {
        let group_handle = event_loop_group.lifecycle().handle()?;
        let lifecycle = ResourceLifecycle::new("client bootstrap", ReleasePolicy::Immediate);
        lifecycle.acquire(|| engine.new_client_bootstrap(group_handle, host_resolver_max_entries))?;

        let bootstrap = Arc::new(Self { lifecycle, engine });
        bootstrap.lifecycle.add_strong_reference(event_loop_group)?;
        Ok(bootstrap)
    }
}

impl CrtResource for ClientBootstrap {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for ClientBootstrap {
    fn drop(&mut self) {
        self.lifecycle.release(|h| self.engine.release_io_resource(h));
    }
}

/// Options for a client TLS context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsContextOptions {
    /// Verify the server certificate chain.
    pub verify_peer: bool,
    /// ALPN protocol list, `;`-separated.
    pub alpn_list: Option<String>,
}

impl Default for TlsContextOptions {
    fn default() -> Self {
        Self {
            verify_peer: true,
            alpn_list: None,
        }
    }
}

/// A client TLS context.
#[derive(Debug)]
pub struct TlsContext {
    lifecycle: ResourceLifecycle,
    engine: Arc<dyn IoEngine>,
}

impl TlsContext {
    /// Create a TLS context.
    pub fn new(engine: Arc<dyn IoEngine>, options: &TlsContextOptions) -> CrtResult<Arc<Self>> {
        let lifecycle = ResourceLifecycle::new("tls context", ReleasePolicy::Immediate);
        lifecycle.acquire(|| engine.new_tls_context(options))?;
        Ok(Arc::new(Self { lifecycle, engine }))
    }
}

impl CrtResource for TlsContext {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for TlsContext {
    fn drop(&mut self) {
        self.lifecycle.release(|h| self.engine.release_io_resource(h));
    }
}

/// AWS credentials for request signing.
#[derive(Clone, Default)]
pub struct Credentials {
    /// The AWS access key ID.
    pub access_key_id: String,
    /// The AWS secret access key.
    pub secret_access_key: String,
    /// Optional session token for temporary credentials.
    pub session_token: Option<String>,
}

impl Credentials {
    /// Long-term credentials without a session token.
    #[must_use]
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Source of signing credentials.
#[derive(Debug)]
pub struct CredentialsProvider {
    lifecycle: ResourceLifecycle,
    engine: Arc<dyn IoEngine>,
    access_key_id: String,
}

impl CredentialsProvider {
    /// A provider that always returns `credentials`.
    pub fn new_static(engine: Arc<dyn IoEngine>, credentials: &Credentials) -> CrtResult<Arc<Self>> {
        let lifecycle = ResourceLifecycle::new("credentials provider", ReleasePolicy::Immediate);
        lifecycle.acquire(|| engine.new_static_credentials_provider(credentials))?;
        Ok(Arc::new(Self {
            lifecycle,
            engine,
            access_key_id: credentials.access_key_id.clone(),
        }))
    }

    /// Access key id of the credentials this provider hands out.
    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }
}

impl CrtResource for CredentialsProvider {
    fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }
}

impl Drop for CredentialsProvider {
    fn drop(&mut self) {
        self.lifecycle.release(|h| self.engine.release_io_resource(h));
    }
}
