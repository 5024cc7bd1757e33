//! Recording engine fake shared by this crate's unit tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use crtbridge_core::{ErrorCode, NativeHandle, ShutdownCallback};
use parking_lot::Mutex;

use crate::body::HttpRequestBodyStream;
use crate::engine::{AcquireCallback, ConnectionManagerConfig, HttpEngine};
use crate::request::HttpHeader;
use crate::response::{HeaderBlock, HttpStreamResponseHandler, StreamSink};

/// Synchronous engine that records every boundary call.
///
/// Acquisitions are parked until a test resolves them with
/// [`resolve_acquire`](Self::resolve_acquire).
#[derive(Default)]
pub(crate) struct RecordingHttpEngine {
    next: AtomicU64,
    pub calls: Mutex<Vec<(&'static str, NativeHandle)>>,
    pub fail_with: Mutex<Option<ErrorCode>>,
    pub configs: Mutex<Vec<ConnectionManagerConfig>>,
    pub dispatched: Mutex<Vec<(Bytes, bool)>>,
    pending_acquires: Mutex<Vec<AcquireCallback>>,
    manager_shutdowns: Mutex<Vec<ShutdownCallback>>,
    sinks: Mutex<Vec<Arc<dyn StreamSink>>>,
}

impl fmt::Debug for RecordingHttpEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHttpEngine")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl RecordingHttpEngine {
    pub fn mint(&self) -> NativeHandle {
        let raw = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        NativeHandle::from_raw(raw).expect("non-null handle")
    }

    fn record(&self, operation: &'static str, handle: NativeHandle) {
        self.calls.lock().push((operation, handle));
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|(op, _)| *op == operation).count()
    }

    pub fn handles(&self, operation: &str) -> Vec<NativeHandle> {
        self.calls
            .lock()
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, h)| *h)
            .collect()
    }

    pub fn pending_acquires(&self) -> usize {
        self.pending_acquires.lock().len()
    }

    /// Complete the oldest parked acquisition.
    pub fn resolve_acquire(&self, result: Result<NativeHandle, ErrorCode>) {
        let callback = self.pending_acquires.lock().remove(0);
        callback(result);
    }

    /// Report every released pool as shut down.
    pub fn finish_manager_shutdowns(&self) {
        let callbacks: Vec<_> = self.manager_shutdowns.lock().drain(..).collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn last_sink(&self) -> Option<Arc<dyn StreamSink>> {
        self.sinks.lock().last().cloned()
    }

    fn fault(&self) -> Result<(), ErrorCode> {
        match *self.fail_with.lock() {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
}

impl HttpEngine for RecordingHttpEngine {
    fn new_connection_manager(
        &self,
        config: &ConnectionManagerConfig,
        on_shutdown: ShutdownCallback,
    ) -> Result<NativeHandle, ErrorCode> {
        self.fault()?;
        let handle = self.mint();
        self.record("new_connection_manager", handle);
        self.configs.lock().push(config.clone());
        self.manager_shutdowns.lock().push(on_shutdown);
        Ok(handle)
    }

    fn release_connection_manager(&self, manager: NativeHandle) {
        self.record("release_connection_manager", manager);
    }

    fn acquire_connection(&self, manager: NativeHandle, on_acquired: AcquireCallback) {
        self.record("acquire_connection", manager);
        self.pending_acquires.lock().push(on_acquired);
    }

    fn release_connection(&self, connection: NativeHandle) {
        self.record("release_connection", connection);
    }

    fn shutdown_connection(&self, connection: NativeHandle) {
        self.record("shutdown_connection", connection);
    }

    fn make_request(
        &self,
        connection: NativeHandle,
        request: Bytes,
        body: Option<Arc<dyn HttpRequestBodyStream>>,
        sink: Arc<dyn StreamSink>,
    ) -> Result<NativeHandle, ErrorCode> {
        self.fault()?;
        self.record("make_request", connection);
        self.dispatched.lock().push((request, body.is_some()));
        self.sinks.lock().push(sink);
        Ok(self.mint())
    }

    fn update_stream_window(&self, stream: NativeHandle, _increment: usize) {
        self.record("update_stream_window", stream);
    }

    fn release_stream(&self, stream: NativeHandle) {
        self.record("release_stream", stream);
    }
}

/// Handler that ignores everything.
#[derive(Debug, Default)]
pub(crate) struct NullHandler;

impl HttpStreamResponseHandler for NullHandler {
    fn on_response_headers(&mut self, _status: u16, _block: HeaderBlock, _headers: &[HttpHeader]) {}

    fn on_response_complete(&mut self, _error_code: ErrorCode) {}
}
