//! The HTTP boundary of the native engine.
//!
//! Everything the HTTP wrappers ask of the engine goes through
//! [`HttpEngine`]. Calls either return a handle or fail synchronously with an
//! [`ErrorCode`]; outcomes of the work they start arrive later through the
//! callbacks and sinks passed in.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use crtbridge_core::{ErrorCode, NativeHandle, ShutdownCallback};

use crate::body::HttpRequestBodyStream;
use crate::response::StreamSink;

/// Receives the outcome of one connection acquisition.
pub type AcquireCallback = Box<dyn FnOnce(Result<NativeHandle, ErrorCode>) + Send>;

/// Native pool configuration derived from
/// [`HttpClientConnectionManagerOptions`](crate::HttpClientConnectionManagerOptions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionManagerConfig {
    /// Bootstrap used to open sockets.
    pub bootstrap: NativeHandle,
    /// TLS context for secure endpoints.
    pub tls_context: Option<NativeHandle>,
    /// Endpoint host.
    pub host: String,
    /// Endpoint port.
    pub port: u16,
    /// Whether connections negotiate TLS.
    pub use_tls: bool,
    /// Pool capacity.
    pub max_connections: usize,
    /// Initial flow-control window per stream.
    pub initial_window_size: usize,
    /// Whether the caller grows the window explicitly.
    pub manual_window_management: bool,
}

/// Engine entry points for HTTP connection pools, connections and streams.
pub trait HttpEngine: Send + Sync + fmt::Debug + 'static {
    /// Create a connection pool. `on_shutdown` runs once the pool is gone.
    fn new_connection_manager(
        &self,
        config: &ConnectionManagerConfig,
        on_shutdown: ShutdownCallback,
    ) -> Result<NativeHandle, ErrorCode>;

    /// Begin tearing a pool down.
    fn release_connection_manager(&self, manager: NativeHandle);

    /// Lease a connection. `on_acquired` runs exactly once, usually on an
    /// engine thread.
    fn acquire_connection(&self, manager: NativeHandle, on_acquired: AcquireCallback);

    /// Return a connection to its pool. Synchronous.
    fn release_connection(&self, connection: NativeHandle);

    /// Close the connection's transport. The connection must still be
    /// released afterwards.
    fn shutdown_connection(&self, connection: NativeHandle);

    /// Start a request on a connection.
    fn make_request(
        &self,
        connection: NativeHandle,
        request: Bytes,
        body: Option<Arc<dyn HttpRequestBodyStream>>,
        sink: Arc<dyn StreamSink>,
    ) -> Result<NativeHandle, ErrorCode>;

    /// Grow a stream's flow-control window.
    fn update_stream_window(&self, stream: NativeHandle, increment: usize);

    /// Release a stream. The engine cancels it if still in flight and later
    /// calls [`StreamSink::on_stream_shutdown`].
    fn release_stream(&self, stream: NativeHandle);
}
