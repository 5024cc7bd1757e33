//! Acquisition and release of a single native handle.
//!
//! Every managed wrapper embeds a [`ResourceLifecycle`]. It moves through four
//! states:
//!
//! ```text
//! Pending --acquire/attach--> Active --release--> Releasing --shutdown complete--> Released
//!    |                                                 ^  (Immediate policy: synchronous)
//!    +-------------------- release -------------------+--------------------------> Released
//! ```
//!
//! Strong references to other resources live in the [`ReferenceGraph`]. They
//! are dropped together with the handle for [`ReleasePolicy::Immediate`]
//! resources, and only once the engine confirms teardown for
//! [`ReleasePolicy::Deferred`] ones.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{CrtError, CrtResult, ErrorCode};
use crate::graph::ReferenceGraph;
use crate::handle::{NativeHandle, ResourceId};

/// A managed wrapper over a native resource.
pub trait CrtResource: Send + Sync + fmt::Debug {
    /// The lifecycle that owns the wrapper's native handle.
    fn lifecycle(&self) -> &ResourceLifecycle;
}

/// Engine-side notification that a resource's native teardown has finished.
pub type ShutdownCallback = Box<dyn FnOnce() + Send>;

/// When a resource drops its strong references relative to releasing its
/// native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// References are dropped synchronously with the native destroy call.
    Immediate,
    /// References are kept until the engine reports shutdown complete.
    Deferred,
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    /// Created, no native handle yet.
    Pending,
    /// Holding a valid native handle.
    Active,
    /// Destroy issued, waiting for the engine to finish teardown.
    Releasing,
    /// Native resources gone, references dropped.
    Released,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Pending,
    Active(NativeHandle),
    Releasing,
    Released,
}

impl State {
    fn status(self) -> LifecycleStatus {
        match self {
            Self::Pending => LifecycleStatus::Pending,
            Self::Active(_) => LifecycleStatus::Active,
            Self::Releasing => LifecycleStatus::Releasing,
            Self::Released => LifecycleStatus::Released,
        }
    }
}

/// One-shot completion cell signalled when native resources are fully gone.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Create an incomplete signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Complete the signal. Returns `false` if it was already complete.
    pub fn complete(&self) -> bool {
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    /// Whether the signal has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    /// A future resolving once the signal completes.
    ///
    /// Also resolves if the signal itself is dropped, since nothing can
    /// complete it afterwards.
    pub fn wait(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.tx.subscribe();
        Box::pin(async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
    }
}

/// Manages one native handle, the strong references of its owner, and the
/// shutdown signal.
pub struct ResourceLifecycle {
    id: ResourceId,
    kind: &'static str,
    policy: ReleasePolicy,
    state: Mutex<State>,
    /// Set by whichever terminal transition runs first.
    finished: AtomicBool,
    shutdown: ShutdownSignal,
    graph: Arc<ReferenceGraph>,
}

impl fmt::Debug for ResourceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLifecycle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ResourceLifecycle {
    /// Create a pending lifecycle registered with the global graph.
    #[must_use]
    pub fn new(kind: &'static str, policy: ReleasePolicy) -> Self {
        Self::with_graph(kind, policy, ReferenceGraph::global())
    }

    /// Create a pending lifecycle registered with `graph`.
    #[must_use]
    pub fn with_graph(kind: &'static str, policy: ReleasePolicy, graph: Arc<ReferenceGraph>) -> Self {
        Self {
            id: ResourceId::next(),
            kind,
            policy,
            state: Mutex::new(State::Pending),
            finished: AtomicBool::new(false),
            shutdown: ShutdownSignal::new(),
            graph,
        }
    }

    /// Identity of the owning resource.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Human-readable resource kind, used in errors and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The release policy.
    #[must_use]
    pub fn policy(&self) -> ReleasePolicy {
        self.policy
    }

    /// The graph this lifecycle records its edges in.
    #[must_use]
    pub fn graph(&self) -> &Arc<ReferenceGraph> {
        &self.graph
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> LifecycleStatus {
        self.state.lock().status()
    }

    /// Whether the handle is valid.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(*self.state.lock(), State::Active(_))
    }

    /// Run a native acquisition call and store the handle it returns.
    ///
    /// # Errors
    ///
    /// - [`CrtError::AcquisitionFailed`] carrying the native code if the call fails.
    /// - [`CrtError::InvalidState`] if a handle was already acquired or the
    ///   lifecycle was released.
    pub fn acquire<F>(&self, acquire: F) -> CrtResult<NativeHandle>
    where
        F: FnOnce() -> Result<NativeHandle, ErrorCode>,
    {
        if !matches!(*self.state.lock(), State::Pending) {
            return Err(self.already_acquired());
        }

        let handle = acquire().map_err(|code| {
            warn!(resource = self.kind, id = %self.id, %code, "native acquisition failed");
            CrtError::AcquisitionFailed {
                resource: self.kind,
                code,
            }
        })?;
        self.attach(handle)?;
        Ok(handle)
    }

    /// Store a handle produced elsewhere (a pool, a dispatch call).
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::InvalidState`] unless the lifecycle is pending.
    pub fn attach(&self, handle: NativeHandle) -> CrtResult<()> {
        let mut state = self.state.lock();
        if !matches!(*state, State::Pending) {
            return Err(self.already_acquired());
        }
        *state = State::Active(handle);
        debug!(resource = self.kind, id = %self.id, ?handle, "native handle acquired");
        Ok(())
    }

    /// The native handle.
    ///
    /// # Errors
    ///
    /// - [`CrtError::UseAfterRelease`] once release has begun.
    /// - [`CrtError::InvalidState`] while no handle has been acquired.
    pub fn handle(&self) -> CrtResult<NativeHandle> {
        match *self.state.lock() {
            State::Active(handle) => Ok(handle),
            State::Pending => Err(CrtError::InvalidState(format!(
                "{} {} has no native handle yet",
                self.kind, self.id
            ))),
            State::Releasing | State::Released => Err(CrtError::UseAfterRelease {
                resource: self.kind,
            }),
        }
    }

    /// Make this resource keep `dependency` alive.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::InvalidState`] once release has begun, or if the
    /// dependency was created after this resource.
    pub fn add_strong_reference(&self, dependency: Arc<dyn CrtResource>) -> CrtResult<()> {
        let state = self.state.lock();
        match *state {
            State::Pending | State::Active(_) => self.graph.add_edge(self.id, dependency),
            State::Releasing | State::Released => Err(CrtError::InvalidState(format!(
                "cannot add references to {} {} after release has begun",
                self.kind, self.id
            ))),
        }
    }

    /// Ids of the resources this one keeps alive.
    #[must_use]
    pub fn strong_references(&self) -> Vec<ResourceId> {
        self.graph.dependencies_of(self.id)
    }

    /// Release the native handle. Idempotent.
    ///
    /// `destroy` is invoked at most once, without any internal lock held, so
    /// the engine may call [`on_native_shutdown_complete`] from inside it.
    /// Returns `true` if this call started the release.
    ///
    /// [`on_native_shutdown_complete`]: Self::on_native_shutdown_complete
    pub fn release<F>(&self, destroy: F) -> bool
    where
        F: FnOnce(NativeHandle),
    {
        let handle = {
            let mut state = self.state.lock();
            match *state {
                State::Active(handle) => {
                    *state = State::Releasing;
                    Some(handle)
                }
                State::Pending => {
                    *state = State::Releasing;
                    None
                }
                State::Releasing | State::Released => return false,
            }
        };

        match handle {
            Some(handle) => {
                debug!(resource = self.kind, id = %self.id, ?handle, policy = ?self.policy, "releasing native handle");
                destroy(handle);
                if self.policy == ReleasePolicy::Immediate && !self.finished.swap(true, Ordering::AcqRel) {
                    self.finish();
                }
            }
            None => {
                debug!(resource = self.kind, id = %self.id, "released before a native handle was acquired");
                if !self.finished.swap(true, Ordering::AcqRel) {
                    self.finish();
                }
            }
        }
        true
    }

    /// Called by the engine once native teardown has completed.
    ///
    /// # Panics
    ///
    /// Panics if called twice: the engine and the managed side disagree about
    /// this resource's lifetime and nothing downstream can be trusted.
    pub fn on_native_shutdown_complete(&self) {
        assert!(
            !self.finished.swap(true, Ordering::AcqRel),
            "{} {} received native shutdown notification after it was already released",
            self.kind,
            self.id
        );
        self.finish();
    }

    /// A callback for the engine to invoke once native teardown completes.
    ///
    /// The callback keeps the lifecycle alive until it runs or is dropped.
    #[must_use]
    pub fn shutdown_callback(self: &Arc<Self>) -> ShutdownCallback {
        let lifecycle = Arc::clone(self);
        Box::new(move || lifecycle.on_native_shutdown_complete())
    }

    fn finish(&self) {
        *self.state.lock() = State::Released;
        let dropped = self.graph.release_edges(self.id);
        self.shutdown.complete();
        debug!(resource = self.kind, id = %self.id, dropped, "native resources released");
    }

    /// Whether native resources are fully released.
    #[must_use]
    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown.is_complete()
    }

    /// A future resolving once native resources are fully released.
    pub fn wait_for_shutdown(&self) -> BoxFuture<'static, ()> {
        self.shutdown.wait()
    }

    fn already_acquired(&self) -> CrtError {
        CrtError::InvalidState(format!(
            "{} {} is not awaiting a native handle",
            self.kind, self.id
        ))
    }
}

impl Drop for ResourceLifecycle {
    fn drop(&mut self) {
        if !*self.finished.get_mut() {
            let dropped = self.graph.release_edges(self.id);
            if dropped > 0 {
                debug!(resource = self.kind, id = %self.id, dropped, "lifecycle dropped before release completed");
            }
        }
    }
}
