//! Connection pools, connections and streams.
//!
//! A pool leases at most `max_connections` connections and queues further
//! acquisitions until one is returned. Releasing a pool with nothing leased
//! reports shutdown on the calling thread; otherwise the last returned
//! connection does.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use crtbridge_core::{ErrorCode, NativeHandle, ShutdownCallback};
use crtbridge_http::{
    AcquireCallback, ConnectionManagerConfig, HeaderBlock, HttpEngine, HttpRequest,
    HttpRequestBodyStream, StreamSink,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::{Inner, LoopbackEngine, Teardown, read_body};
use crate::service;

pub(crate) struct ManagerState {
    config: ConnectionManagerConfig,
    pool: Mutex<Pool>,
    on_shutdown: Mutex<Option<ShutdownCallback>>,
}

#[derive(Default)]
struct Pool {
    leased: usize,
    waiters: VecDeque<AcquireCallback>,
    released: bool,
}

#[derive(Debug)]
pub(crate) struct ConnectionState {
    manager: NativeHandle,
    open: AtomicBool,
}

pub(crate) struct StreamState {
    connection: NativeHandle,
    sink: Arc<dyn StreamSink>,
    cancelled: AtomicBool,
    teardown: Teardown,
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamState")
            .field("connection", &self.connection)
            .field("cancelled", &self.cancelled.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn manager(&self, handle: NativeHandle) -> Option<Arc<ManagerState>> {
        self.managers.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    fn connection(&self, handle: NativeHandle) -> Option<Arc<ConnectionState>> {
        self.connections
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn stream(&self, handle: NativeHandle) -> Option<Arc<StreamState>> {
        self.streams.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    /// Hand a fresh connection from `manager` to `on_acquired` on an engine
    /// task. The lease must already be counted.
    fn lease(self: &Arc<Self>, manager: NativeHandle, on_acquired: AcquireCallback) {
        let connection = self.mint();
        self.connections.insert(
            connection,
            Arc::new(ConnectionState {
                manager,
                open: AtomicBool::new(true),
            }),
        );
        debug!(?manager, ?connection, "loopback connection leased");
        self.spawn(async move { on_acquired(Ok(connection)) });
    }

    fn shut_down_manager(&self, handle: NativeHandle) {
        let Some((_, manager)) = self.managers.remove(&handle) else {
            return;
        };
        let callback = manager.on_shutdown.lock().take();
        debug!(manager = ?handle, host = %manager.config.host, "loopback connection manager shut down");
        if let Some(callback) = callback {
            callback();
        }
    }

    fn shut_down_stream(&self, handle: NativeHandle) {
        if let Some((_, stream)) = self.streams.remove(&handle) {
            debug!(stream = ?handle, "loopback stream shut down");
            stream.sink.on_stream_shutdown();
        }
    }
}

impl HttpEngine for LoopbackEngine {
    fn new_connection_manager(
        &self,
        config: &ConnectionManagerConfig,
        on_shutdown: ShutdownCallback,
    ) -> Result<NativeHandle, ErrorCode> {
        let inner = &self.inner;
        inner.check_fault("new_connection_manager")?;
        let tls_live = config.tls_context.is_none_or(|tls| self.is_live_io(tls));
        if !self.is_live_io(config.bootstrap) || !tls_live {
            return Err(ErrorCode::INVALID_ARGUMENT);
        }

        let handle = inner.mint();
        inner.record("new_connection_manager", Some(handle));
        inner.managers.insert(
            handle,
            Arc::new(ManagerState {
                config: config.clone(),
                pool: Mutex::new(Pool::default()),
                on_shutdown: Mutex::new(Some(on_shutdown)),
            }),
        );
        debug!(
            manager = ?handle,
            host = %config.host,
            port = config.port,
            max_connections = config.max_connections,
            "loopback connection manager created"
        );
        Ok(handle)
    }

    fn release_connection_manager(&self, manager: NativeHandle) {
        let inner = &self.inner;
        inner.record("release_connection_manager", Some(manager));
        let Some(state) = inner.manager(manager) else {
            return;
        };
        let (waiters, idle) = {
            let mut pool = state.pool.lock();
            pool.released = true;
            (std::mem::take(&mut pool.waiters), pool.leased == 0)
        };
        for waiter in waiters {
            inner.spawn(async move { waiter(Err(ErrorCode::CONNECTION_CLOSED)) });
        }
        if idle {
            inner.shut_down_manager(manager);
        }
    }

    fn acquire_connection(&self, manager: NativeHandle, on_acquired: AcquireCallback) {
        let inner = &self.inner;
        if let Err(code) = inner.check_fault("acquire_connection") {
            inner.spawn(async move { on_acquired(Err(code)) });
            return;
        }
        inner.record("acquire_connection", Some(manager));
        let Some(state) = inner.manager(manager) else {
            inner.spawn(async move { on_acquired(Err(ErrorCode::CONNECTION_CLOSED)) });
            return;
        };

        let mut pool = state.pool.lock();
        if pool.released {
            drop(pool);
            inner.spawn(async move { on_acquired(Err(ErrorCode::CONNECTION_CLOSED)) });
        } else if pool.leased < state.config.max_connections {
            pool.leased += 1;
            drop(pool);
            inner.lease(manager, on_acquired);
        } else {
            debug!(?manager, waiting = pool.waiters.len() + 1, "loopback pool exhausted, queueing acquisition");
            pool.waiters.push_back(on_acquired);
        }
    }

    fn release_connection(&self, connection: NativeHandle) {
        let inner = &self.inner;
        inner.record("release_connection", Some(connection));
        let Some((_, state)) = inner.connections.remove(&connection) else {
            warn!(?connection, "loopback release of an unknown connection");
            return;
        };
        let Some(manager) = inner.manager(state.manager) else {
            return;
        };

        let (next, idle) = {
            let mut pool = manager.pool.lock();
            match pool.waiters.pop_front() {
                Some(waiter) => (Some(waiter), false),
                None => {
                    pool.leased = pool.leased.saturating_sub(1);
                    (None, pool.released && pool.leased == 0)
                }
            }
        };
        if let Some(waiter) = next {
            inner.lease(state.manager, waiter);
        } else if idle {
            inner.shut_down_manager(state.manager);
        }
    }

    fn shutdown_connection(&self, connection: NativeHandle) {
        self.inner.record("shutdown_connection", Some(connection));
        if let Some(state) = self.inner.connection(connection) {
            state.open.store(false, Ordering::Release);
        }
    }

    fn make_request(
        &self,
        connection: NativeHandle,
        request: Bytes,
        body: Option<Arc<dyn HttpRequestBodyStream>>,
        sink: Arc<dyn StreamSink>,
    ) -> Result<NativeHandle, ErrorCode> {
        let inner = &self.inner;
        inner.check_fault("make_request")?;
        let open = inner
            .connection(connection)
            .is_some_and(|state| state.open.load(Ordering::Acquire));
        if !open {
            return Err(ErrorCode::CONNECTION_CLOSED);
        }

        let handle = inner.mint();
        inner.record("make_request", Some(handle));
        let state = Arc::new(StreamState {
            connection,
            sink,
            cancelled: AtomicBool::new(false),
            teardown: Teardown::default(),
        });
        inner.streams.insert(handle, Arc::clone(&state));

        let task_inner = Arc::clone(inner);
        inner.spawn(async move {
            let error_code = run_stream(&task_inner, &state, &request, body).await;
            state.sink.on_response_complete(error_code);
            if state.teardown.finish() {
                task_inner.shut_down_stream(handle);
            }
        });
        Ok(handle)
    }

    fn update_stream_window(&self, stream: NativeHandle, increment: usize) {
        self.inner.record("update_stream_window", Some(stream));
        debug!(?stream, increment, "loopback stream window grown");
    }

    fn release_stream(&self, stream: NativeHandle) {
        let inner = &self.inner;
        inner.record("release_stream", Some(stream));
        let Some(state) = inner.stream(stream) else {
            return;
        };
        state.cancelled.store(true, Ordering::Release);
        if state.teardown.release() {
            let task_inner = Arc::clone(inner);
            inner.spawn(async move { task_inner.shut_down_stream(stream) });
        }
    }
}

/// Serve one request over a connection. Returns the completion code.
async fn run_stream(
    inner: &Inner,
    state: &StreamState,
    image: &[u8],
    body: Option<Arc<dyn HttpRequestBodyStream>>,
) -> ErrorCode {
    const BODY_CHUNK: usize = 64 * 1024;

    tokio::task::yield_now().await;
    let cancelled = || state.cancelled.load(Ordering::Acquire);
    let connection_open = || {
        inner
            .connection(state.connection)
            .is_some_and(|connection| connection.open.load(Ordering::Acquire))
    };
    if cancelled() {
        return ErrorCode::CANCELED;
    }

    let request = match HttpRequest::unmarshal(image) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "loopback stream carries a malformed request");
            return ErrorCode::INVALID_ARGUMENT;
        }
    };
    let Some(body) = read_body(body.as_ref(), BODY_CHUNK, cancelled) else {
        return ErrorCode::CANCELED;
    };
    if !connection_open() {
        return ErrorCode::CONNECTION_CLOSED;
    }

    let response = service::serve(&inner.store, &request, body, false);
    debug!(
        method = %request.method(),
        path = request.encoded_path(),
        status = response.status,
        "loopback stream served"
    );
    let sink = &state.sink;
    sink.on_response_headers(response.status, HeaderBlock::Main, &response.headers);
    sink.on_response_header_block_done(HeaderBlock::Main);
    if !response.body.is_empty() {
        tokio::task::yield_now().await;
        if cancelled() {
            return ErrorCode::CANCELED;
        }
        sink.on_response_body(&response.body);
    }
    ErrorCode::SUCCESS
}
