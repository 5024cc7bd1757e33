//! Opaque identities for native objects and managed wrappers.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, non-owning reference to an object owned by the native engine.
///
/// A handle carries identity only. Whether it may still be used is tracked by
/// the [`ResourceLifecycle`](crate::ResourceLifecycle) that holds it; once
/// that lifecycle releases the handle it is never handed out again.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(NonZeroU64);

impl NativeHandle {
    /// Wrap a raw value minted by an engine. Zero is the null handle and
    /// yields `None`.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw value, for passing back across the engine boundary.
    #[must_use]
    pub fn into_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:#x})", self.0.get())
    }
}

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a managed resource wrapper.
///
/// Ids are allocated from a process-wide monotonic counter, so a resource
/// created earlier always has a smaller id than one created later. The
/// [`ReferenceGraph`](crate::ReferenceGraph) relies on this to keep itself
/// acyclic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocate the next id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
