//! Exactly-once delivery of native completions.
//!
//! Engine threads report the outcome of an operation by calling back into
//! managed code. A [`CompletionBridge`] turns the first such call into a
//! single delivery to either a future ([`CompletionFuture`]) or a callback,
//! and drops every later call with a warning.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{CrtError, CrtResult};

enum Target<T> {
    Future(oneshot::Sender<T>),
    Callback(Box<dyn FnOnce(T) + Send>),
}

/// Result of offering a value to a [`CompletionBridge`].
#[derive(Debug)]
pub enum Delivery<T> {
    /// The value reached its target.
    Delivered,
    /// A value was already delivered; this one is handed back.
    Duplicate(T),
    /// The awaiting future was dropped; the value is handed back so the
    /// caller can dispose of it.
    Abandoned(T),
}

impl<T> Delivery<T> {
    /// Whether the value reached its target.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// The value, if it was not delivered.
    #[must_use]
    pub fn into_undelivered(self) -> Option<T> {
        match self {
            Self::Delivered => None,
            Self::Duplicate(value) | Self::Abandoned(value) => Some(value),
        }
    }
}

/// Converts native callback invocations into one caller-visible delivery.
///
/// # Examples
///
/// ```
/// use crtbridge_core::CompletionBridge;
///
/// # tokio_test::block_on(async {
/// let (bridge, result) = CompletionBridge::future("acquire");
/// assert!(bridge.complete(7).is_delivered());
/// assert!(!bridge.complete(8).is_delivered());
/// assert_eq!(result.await.unwrap(), 7);
/// # });
/// ```
pub struct CompletionBridge<T> {
    operation: &'static str,
    delivered: AtomicBool,
    target: Mutex<Option<Target<T>>>,
}

impl<T> fmt::Debug for CompletionBridge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBridge")
            .field("operation", &self.operation)
            .field("delivered", &self.is_delivered())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> CompletionBridge<T> {
    /// A bridge delivering into the returned future.
    #[must_use]
    pub fn future(operation: &'static str) -> (Self, CompletionFuture<T>) {
        let (tx, rx) = oneshot::channel();
        let bridge = Self {
            operation,
            delivered: AtomicBool::new(false),
            target: Mutex::new(Some(Target::Future(tx))),
        };
        (bridge, CompletionFuture { operation, rx })
    }

    /// A bridge delivering by invoking `callback` on the completing thread.
    #[must_use]
    pub fn callback<F>(operation: &'static str, callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            operation,
            delivered: AtomicBool::new(false),
            target: Mutex::new(Some(Target::Callback(Box::new(callback)))),
        }
    }
}

impl<T> CompletionBridge<T> {
    /// Deliver `value` if nothing was delivered yet.
    ///
    /// Callbacks run without the bridge's lock held.
    pub fn complete(&self, value: T) -> Delivery<T> {
        if self.delivered.swap(true, Ordering::AcqRel) {
            warn!(operation = self.operation, "dropping duplicate native completion");
            return Delivery::Duplicate(value);
        }

        let target = self.target.lock().take();
        match target {
            Some(Target::Future(tx)) => match tx.send(value) {
                Ok(()) => Delivery::Delivered,
                Err(value) => {
                    debug!(operation = self.operation, "completion target was dropped before delivery");
                    Delivery::Abandoned(value)
                }
            },
            Some(Target::Callback(callback)) => {
                callback(value);
                Delivery::Delivered
            }
            None => Delivery::Duplicate(value),
        }
    }

    /// Whether a value has been delivered (or attempted).
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    /// The operation label used in logs and errors.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

/// Caller side of a future-targeted [`CompletionBridge`].
///
/// Dropping it cancels interest; a later completion is then handed back to
/// the completing side as [`Delivery::Abandoned`].
pub struct CompletionFuture<T> {
    operation: &'static str,
    rx: oneshot::Receiver<T>,
}

impl<T> fmt::Debug for CompletionFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionFuture")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

impl<T> CompletionFuture<T> {
    /// Stop waiting without dropping the future.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

impl<T> Future for CompletionFuture<T> {
    type Output = CrtResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let operation = this.operation;
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| CrtError::CompletionDropped { operation }))
    }
}
