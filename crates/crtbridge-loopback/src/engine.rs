//! The loopback engine: shared state, call recording and fault injection.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use crtbridge_core::{CrtError, CrtResult, ErrorCode, NativeHandle};
use crtbridge_http::HttpRequestBodyStream;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::trace;

use crate::io::IoResource;
use crate::pool::{ConnectionState, ManagerState, StreamState};
use crate::s3::{ClientState, MetaRequestState};
use crate::store::{ObjectStore, StoredObject};

/// Error code reported for meta-requests that received a non-2xx response.
pub const INVALID_RESPONSE_STATUS: ErrorCode = ErrorCode::new(14343);

/// One boundary call seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    /// Boundary operation name, e.g. `"make_meta_request"`.
    pub operation: &'static str,
    /// The handle the call created or targeted.
    pub handle: Option<NativeHandle>,
}

/// An in-process engine that serves requests from an [`ObjectStore`].
///
/// It implements [`IoEngine`](crtbridge_core::IoEngine),
/// [`HttpEngine`](crtbridge_http::HttpEngine) and
/// [`S3Engine`](crtbridge_s3::S3Engine). Callbacks run on tokio tasks, the
/// way a native engine calls back from its event loop threads. Every
/// boundary call is recorded, and any fallible call can be made to fail
/// once with [`fail_next`](Self::fail_next).
///
/// # Examples
///
/// ```
/// use crtbridge_loopback::LoopbackEngine;
///
/// # tokio_test::block_on(async {
/// let engine = LoopbackEngine::new().unwrap();
/// let etag = engine.put_object("/bucket/key", "hello");
/// assert_eq!(etag, "\"5d41402abc4b2a76b9719d911017c592\"");
/// assert_eq!(engine.object("/bucket/key").unwrap().data, "hello");
/// # });
/// ```
#[derive(Clone)]
pub struct LoopbackEngine {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    runtime: Handle,
    next: AtomicU64,
    calls: Mutex<Vec<CallRecord>>,
    faults: DashMap<&'static str, ErrorCode>,
    pub(crate) io: DashMap<NativeHandle, IoResource>,
    pub(crate) clients: DashMap<NativeHandle, Arc<ClientState>>,
    pub(crate) meta_requests: DashMap<NativeHandle, Arc<MetaRequestState>>,
    pub(crate) managers: DashMap<NativeHandle, Arc<ManagerState>>,
    pub(crate) connections: DashMap<NativeHandle, Arc<ConnectionState>>,
    pub(crate) streams: DashMap<NativeHandle, Arc<StreamState>>,
    pub(crate) store: ObjectStore,
}

impl fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackEngine")
            .field("calls", &self.inner.calls.lock().len())
            .field("open_handles", &self.open_handles())
            .field("objects", &self.inner.store.len())
            .finish_non_exhaustive()
    }
}

impl LoopbackEngine {
    /// Create an engine that runs callbacks on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::InvalidConfiguration`] outside a tokio runtime.
    pub fn new() -> CrtResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            CrtError::InvalidConfiguration(format!("loopback engine requires a tokio runtime: {e}"))
        })?;
        Ok(Self::with_runtime(runtime))
    }

    /// Create an engine that runs callbacks on `runtime`.
    #[must_use]
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                next: AtomicU64::new(0),
                calls: Mutex::new(Vec::new()),
                faults: DashMap::new(),
                io: DashMap::new(),
                clients: DashMap::new(),
                meta_requests: DashMap::new(),
                managers: DashMap::new(),
                connections: DashMap::new(),
                streams: DashMap::new(),
                store: ObjectStore::default(),
            }),
        }
    }

    /// Make the next call to `operation` fail with `code`.
    pub fn fail_next(&self, operation: &'static str, code: ErrorCode) {
        self.inner.faults.insert(operation, code);
    }

    /// Every boundary call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.inner.calls.lock().clone()
    }

    /// How many times `operation` was called.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Number of native objects not yet torn down.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        let inner = &self.inner;
        inner.io.len()
            + inner.clients.len()
            + inner.meta_requests.len()
            + inner.managers.len()
            + inner.connections.len()
            + inner.streams.len()
    }

    /// Seed an object. Returns its ETag.
    pub fn put_object(&self, key: &str, data: impl Into<Bytes>) -> String {
        self.inner.store.put(key, data.into(), None)
    }

    /// The object stored under `key`.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.inner.store.get(key)
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &ObjectStore {
        &self.inner.store
    }
}

impl Inner {
    pub(crate) fn mint(&self) -> NativeHandle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        NativeHandle::from_raw(raw).unwrap_or_else(|| unreachable!("handle counter starts at one"))
    }

    pub(crate) fn record(&self, operation: &'static str, handle: Option<NativeHandle>) {
        trace!(operation, ?handle, "loopback boundary call");
        self.calls.lock().push(CallRecord { operation, handle });
    }

    /// Consume an injected fault for `operation`, if any.
    pub(crate) fn check_fault(&self, operation: &'static str) -> Result<(), ErrorCode> {
        match self.faults.remove(operation) {
            Some((_, code)) => {
                self.record(operation, None);
                Err(code)
            }
            None => Ok(()),
        }
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.runtime.spawn(task));
    }
}

/// Completion bookkeeping for a meta-request or stream.
///
/// Native teardown is reported once both the operation has delivered its
/// terminal callback and the caller has released it, whichever comes last.
#[derive(Debug, Default)]
pub(crate) struct Teardown(Mutex<TeardownState>);

#[derive(Debug, Default)]
struct TeardownState {
    finished: bool,
    released: bool,
    reported: bool,
}

impl Teardown {
    /// Record the terminal callback. Returns `true` if teardown is due now.
    pub(crate) fn finish(&self) -> bool {
        let mut state = self.0.lock();
        state.finished = true;
        Self::due(&mut state)
    }

    /// Record the caller's release. Returns `true` if teardown is due now.
    pub(crate) fn release(&self) -> bool {
        let mut state = self.0.lock();
        state.released = true;
        Self::due(&mut state)
    }

    fn due(state: &mut TeardownState) -> bool {
        if state.finished && state.released && !state.reported {
            state.reported = true;
            return true;
        }
        false
    }
}

/// Pull a whole body out of `source`, `chunk` bytes at a time.
///
/// Returns `None` if `cancelled` turned true in between.
pub(crate) fn read_body(
    source: Option<&Arc<dyn HttpRequestBodyStream>>,
    chunk: usize,
    cancelled: impl Fn() -> bool,
) -> Option<Bytes> {
    let Some(source) = source else {
        return Some(Bytes::new());
    };
    let capacity = source
        .content_length()
        .and_then(|len| usize::try_from(len).ok())
        .unwrap_or(chunk);
    let mut body = BytesMut::with_capacity(capacity);
    loop {
        if cancelled() {
            return None;
        }
        let before = body.len();
        let done = source.send_request_body(&mut body, chunk.max(1));
        if done {
            return Some(body.freeze());
        }
        if body.len() == before {
            trace!(read = before, "body source stalled, treating as complete");
            return Some(body.freeze());
        }
    }
}
